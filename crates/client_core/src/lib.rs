use std::{collections::HashSet, sync::Arc, time::Duration};

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use reqwest::Client;
use serde::de::DeserializeOwned;
use shared::{
    domain::BatchAction,
    protocol::{
        ApiFailure, BatchActionRequest, BatchActionResponse, CargoLookup, CargoLookupResponse,
        PageResponse, ShopRow,
    },
};
use thiserror::Error;
use tokio::sync::{broadcast, Mutex};
use tracing::warn;

pub const DEFAULT_PAGE_LIMIT: u32 = 10;

/// How long a successful delete acknowledgement stays on screen before the
/// selection is cleared and the current page reloaded.
const DELETE_REFRESH_DELAY: Duration = Duration::from_millis(1000);

/// Network seam between the controller and the shop API. Production uses
/// [`HttpShopTransport`]; tests substitute mocks.
#[async_trait]
pub trait ShopTransport: Send + Sync {
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse>;
    async fn lookup_cargo(&self, order_id: i64) -> Result<CargoLookup>;
    async fn batch_action(&self, ids: &[i64], action: BatchAction) -> Result<BatchActionResponse>;
}

pub struct HttpShopTransport {
    http: Client,
    server_url: String,
}

impl HttpShopTransport {
    pub fn new(server_url: impl Into<String>) -> Self {
        Self {
            http: Client::new(),
            server_url: server_url.into(),
        }
    }
}

async fn read_envelope<T: DeserializeOwned>(response: reqwest::Response) -> Result<T> {
    let status = response.status();
    if status.is_success() {
        return Ok(response.json().await?);
    }
    let message = match response.json::<ApiFailure>().await {
        Ok(failure) => failure.message,
        Err(_) => format!("request failed with status {status}"),
    };
    Err(anyhow!(message))
}

#[async_trait]
impl ShopTransport for HttpShopTransport {
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse> {
        let response = self
            .http
            .get(format!("{}/api/shop", self.server_url))
            .query(&[("page", page), ("limit", limit)])
            .send()
            .await?;
        read_envelope(response).await
    }

    async fn lookup_cargo(&self, order_id: i64) -> Result<CargoLookup> {
        let response = self
            .http
            .get(format!("{}/api/shop/cargo/{order_id}", self.server_url))
            .send()
            .await?;
        let envelope: CargoLookupResponse = read_envelope(response).await?;
        Ok(envelope.data)
    }

    async fn batch_action(&self, ids: &[i64], action: BatchAction) -> Result<BatchActionResponse> {
        let response = self
            .http
            .post(format!("{}/api/shop/batch-action", self.server_url))
            .json(&BatchActionRequest {
                ids: ids.to_vec(),
                action,
            })
            .send()
            .await?;
        read_envelope(response).await
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectAllState {
    Checked,
    Indeterminate,
    Unchecked,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RowView {
    pub order_id: i64,
    pub cargo_id: Option<i64>,
    pub selected: bool,
}

/// What the presentation layer renders. Derived, never stored: rebuilt from
/// controller state after every mutation and load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PageView {
    pub page: u32,
    pub total_pages: u32,
    pub total_items: u64,
    pub rows: Vec<RowView>,
    pub select_all: SelectAllState,
    pub selected_count: usize,
}

#[derive(Debug, Clone)]
pub enum ControllerEvent {
    Loading(bool),
    ViewUpdated(PageView),
    LoadFailed(String),
    Notice(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The response replaced controller state.
    Applied,
    /// A newer load was issued while this one was in flight; response dropped.
    Superseded,
    /// The request was out of range and silently ignored.
    Ignored,
}

#[derive(Debug, Error)]
pub enum ControllerError {
    #[error("select items first")]
    EmptySelection,
    #[error("invalid order id {0}")]
    InvalidOrderId(i64),
    #[error("{0}")]
    Transport(#[from] anyhow::Error),
}

/// Pure projection of visible rows against the persistent selection set.
/// The selection itself is untouched; only its display form is computed.
pub fn project_page(rows: &[ShopRow], selection: &HashSet<i64>) -> (Vec<RowView>, SelectAllState) {
    let views: Vec<RowView> = rows
        .iter()
        .map(|row| RowView {
            order_id: row.orderid,
            cargo_id: row.cargoid,
            selected: selection.contains(&row.orderid),
        })
        .collect();

    let selected_visible = views.iter().filter(|row| row.selected).count();
    let select_all = if views.is_empty() || selected_visible == 0 {
        SelectAllState::Unchecked
    } else if selected_visible == views.len() {
        SelectAllState::Checked
    } else {
        SelectAllState::Indeterminate
    };

    (views, select_all)
}

struct ControllerState {
    current_page: u32,
    total_pages: u32,
    total_items: u64,
    visible_rows: Vec<ShopRow>,
    selection: HashSet<i64>,
    loading: bool,
    load_generation: u64,
}

impl ControllerState {
    fn view(&self) -> PageView {
        let (rows, select_all) = project_page(&self.visible_rows, &self.selection);
        PageView {
            page: self.current_page,
            total_pages: self.total_pages,
            total_items: self.total_items,
            rows,
            select_all,
            selected_count: self.selection.len(),
        }
    }
}

/// Session-scoped pagination and selection state machine. One instance owns
/// all mutable client state; the presentation layer only ever sees
/// [`PageView`] snapshots and [`ControllerEvent`]s.
pub struct ShopController {
    transport: Arc<dyn ShopTransport>,
    page_limit: u32,
    inner: Mutex<ControllerState>,
    events: broadcast::Sender<ControllerEvent>,
}

impl ShopController {
    pub fn new(transport: Arc<dyn ShopTransport>, page_limit: u32) -> Arc<Self> {
        let (events, _) = broadcast::channel(64);
        Arc::new(Self {
            transport,
            page_limit: page_limit.max(1),
            inner: Mutex::new(ControllerState {
                current_page: 1,
                total_pages: 1,
                total_items: 0,
                visible_rows: Vec::new(),
                selection: HashSet::new(),
                loading: false,
                load_generation: 0,
            }),
            events,
        })
    }

    pub fn subscribe_events(&self) -> broadcast::Receiver<ControllerEvent> {
        self.events.subscribe()
    }

    pub async fn page_view(&self) -> PageView {
        self.inner.lock().await.view()
    }

    pub async fn is_loading(&self) -> bool {
        self.inner.lock().await.loading
    }

    pub async fn selected_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.inner.lock().await.selection.iter().copied().collect();
        ids.sort_unstable();
        ids
    }

    /// Fetches one page and, if this is still the latest request, replaces
    /// the rendered row set and pagination metadata. A stale response never
    /// clobbers state or the loading indicator; a failed one leaves both the
    /// rows and the selection at their last known-good values.
    pub async fn load(&self, page: u32) -> Result<LoadOutcome, ControllerError> {
        let generation = {
            let mut guard = self.inner.lock().await;
            guard.load_generation += 1;
            guard.loading = true;
            guard.load_generation
        };
        let _ = self.events.send(ControllerEvent::Loading(true));

        let result = self.transport.fetch_page(page, self.page_limit).await;

        let mut guard = self.inner.lock().await;
        if generation != guard.load_generation {
            return Ok(LoadOutcome::Superseded);
        }
        guard.loading = false;

        match result {
            Ok(response) => {
                guard.current_page = response.pagination.page;
                guard.total_pages = response.pagination.total_pages;
                guard.total_items = response.pagination.total;
                guard.visible_rows = response.data;
                let view = guard.view();
                drop(guard);
                let _ = self.events.send(ControllerEvent::Loading(false));
                let _ = self.events.send(ControllerEvent::ViewUpdated(view));
                Ok(LoadOutcome::Applied)
            }
            Err(err) => {
                drop(guard);
                let _ = self.events.send(ControllerEvent::Loading(false));
                let _ = self.events.send(ControllerEvent::LoadFailed(err.to_string()));
                Err(ControllerError::Transport(err))
            }
        }
    }

    /// Silently ignores out-of-range targets; otherwise delegates to `load`.
    pub async fn change_page(&self, page: u32) -> Result<LoadOutcome, ControllerError> {
        let total_pages = self.inner.lock().await.total_pages;
        if page < 1 || page > total_pages {
            return Ok(LoadOutcome::Ignored);
        }
        self.load(page).await
    }

    /// The only selection-clearing path besides a successful delete.
    pub async fn refresh(&self) -> Result<LoadOutcome, ControllerError> {
        let current_page = {
            let mut guard = self.inner.lock().await;
            guard.selection.clear();
            guard.current_page
        };
        self.load(current_page).await
    }

    pub async fn toggle_selection(&self, order_id: i64, is_selected: bool) {
        let view = {
            let mut guard = self.inner.lock().await;
            if is_selected {
                guard.selection.insert(order_id);
            } else {
                guard.selection.remove(&order_id);
            }
            guard.view()
        };
        let _ = self.events.send(ControllerEvent::ViewUpdated(view));
    }

    /// Applies to the currently visible rows only; selections made on other
    /// pages are untouched.
    pub async fn toggle_select_all(&self, is_selected: bool) {
        let view = {
            let mut guard = self.inner.lock().await;
            let visible: Vec<i64> = guard.visible_rows.iter().map(|row| row.orderid).collect();
            for order_id in visible {
                if is_selected {
                    guard.selection.insert(order_id);
                } else {
                    guard.selection.remove(&order_id);
                }
            }
            guard.view()
        };
        let _ = self.events.send(ControllerEvent::ViewUpdated(view));
    }

    /// Non-destructive: a successful export leaves the selection intact.
    pub async fn export_selection(&self) -> Result<String, ControllerError> {
        let ids = self.require_selection().await?;
        let response = self
            .transport
            .batch_action(&ids, BatchAction::Export)
            .await?;
        let _ = self
            .events
            .send(ControllerEvent::Notice(response.message.clone()));
        Ok(response.message)
    }

    /// On success the acknowledgement is shown for a fixed delay, then the
    /// selection is cleared and the current page reloaded.
    pub async fn delete_selection(&self) -> Result<String, ControllerError> {
        let ids = self.require_selection().await?;
        let response = self
            .transport
            .batch_action(&ids, BatchAction::Delete)
            .await?;
        let _ = self
            .events
            .send(ControllerEvent::Notice(response.message.clone()));

        tokio::time::sleep(DELETE_REFRESH_DELAY).await;

        let current_page = {
            let mut guard = self.inner.lock().await;
            guard.selection.clear();
            guard.current_page
        };
        if let Err(err) = self.load(current_page).await {
            // The delete itself succeeded; the reload failure was already
            // surfaced through LoadFailed.
            warn!(%err, "post-delete reload failed");
        }

        Ok(response.message)
    }

    pub async fn lookup_cargo(&self, order_id: i64) -> Result<CargoLookup, ControllerError> {
        if order_id <= 0 {
            return Err(ControllerError::InvalidOrderId(order_id));
        }
        Ok(self.transport.lookup_cargo(order_id).await?)
    }

    async fn require_selection(&self) -> Result<Vec<i64>, ControllerError> {
        let ids = self.selected_ids().await;
        if ids.is_empty() {
            let _ = self
                .events
                .send(ControllerEvent::Notice("select items first".into()));
            return Err(ControllerError::EmptySelection);
        }
        Ok(ids)
    }
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
