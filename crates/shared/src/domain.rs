use serde::{Deserialize, Serialize};

macro_rules! id_newtype {
    ($name:ident) => {
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
        pub struct $name(pub i64);
    };
}

id_newtype!(OrderId);
id_newtype!(CargoId);

/// Closed set of batch actions the server accepts. Unknown tags fail
/// deserialization and are rejected at the HTTP boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BatchAction {
    Export,
    Delete,
}

impl BatchAction {
    pub const ALL: &'static [BatchAction] = &[BatchAction::Export, BatchAction::Delete];

    pub fn tag(self) -> &'static str {
        match self {
            BatchAction::Export => "export",
            BatchAction::Delete => "delete",
        }
    }
}
