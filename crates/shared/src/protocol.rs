use serde::{Deserialize, Serialize};

use crate::domain::BatchAction;

/// One record from the shop table as exposed to clients. The public contract
/// is exactly these two columns; nothing else from the table passes through.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShopRow {
    pub orderid: i64,
    pub cargoid: Option<i64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PageMeta {
    pub page: u32,
    pub limit: u32,
    pub total: u64,
    pub total_pages: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PageResponse {
    pub success: bool,
    pub data: Vec<ShopRow>,
    pub pagination: PageMeta,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoLookup {
    pub orderid: i64,
    pub cargoids: Vec<i64>,
    pub count: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CargoLookupResponse {
    pub success: bool,
    pub data: CargoLookup,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchActionRequest {
    #[serde(default)]
    pub ids: Vec<i64>,
    pub action: BatchAction,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchActionResponse {
    pub success: bool,
    pub message: String,
}

/// Uniform failure envelope; `success` is always false.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiFailure {
    pub success: bool,
    pub message: String,
}

impl ApiFailure {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            success: false,
            message: message.into(),
        }
    }
}
