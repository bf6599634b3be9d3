use super::*;
use axum::{http::StatusCode, routing::get, routing::post, Json, Router};
use shared::protocol::PageMeta;
use tokio::{net::TcpListener, sync::Notify};

struct MockTransport {
    table: Vec<ShopRow>,
    fail_fetch: bool,
    fail_batch: Option<String>,
    fetch_calls: Arc<Mutex<Vec<u32>>>,
    batch_calls: Arc<Mutex<Vec<(Vec<i64>, BatchAction)>>>,
    cargo_calls: Arc<Mutex<Vec<i64>>>,
}

impl MockTransport {
    fn with_orders(order_ids: &[i64]) -> Self {
        Self {
            table: order_ids
                .iter()
                .map(|id| ShopRow {
                    orderid: *id,
                    cargoid: None,
                })
                .collect(),
            fail_fetch: false,
            fail_batch: None,
            fetch_calls: Arc::new(Mutex::new(Vec::new())),
            batch_calls: Arc::new(Mutex::new(Vec::new())),
            cargo_calls: Arc::new(Mutex::new(Vec::new())),
        }
    }

    fn failing_fetch() -> Self {
        let mut transport = Self::with_orders(&[]);
        transport.fail_fetch = true;
        transport
    }

    fn page_of(&self, page: u32, limit: u32) -> PageResponse {
        let mut rows = self.table.clone();
        rows.sort_by_key(|row| row.orderid);
        let total = rows.len() as u64;
        let offset = ((page - 1) * limit) as usize;
        let data: Vec<ShopRow> = rows.into_iter().skip(offset).take(limit as usize).collect();
        PageResponse {
            success: true,
            data,
            pagination: PageMeta {
                page,
                limit,
                total,
                total_pages: total.div_ceil(u64::from(limit)) as u32,
            },
        }
    }
}

#[async_trait]
impl ShopTransport for MockTransport {
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse> {
        self.fetch_calls.lock().await.push(page);
        if self.fail_fetch {
            return Err(anyhow!("query failed"));
        }
        Ok(self.page_of(page, limit))
    }

    async fn lookup_cargo(&self, order_id: i64) -> Result<CargoLookup> {
        self.cargo_calls.lock().await.push(order_id);
        Ok(CargoLookup {
            orderid: order_id,
            cargoids: vec![10, 11],
            count: 2,
        })
    }

    async fn batch_action(&self, ids: &[i64], action: BatchAction) -> Result<BatchActionResponse> {
        self.batch_calls.lock().await.push((ids.to_vec(), action));
        if let Some(message) = &self.fail_batch {
            return Err(anyhow!(message.clone()));
        }
        Ok(BatchActionResponse {
            success: true,
            message: format!("accepted {} for {} rows", action.tag(), ids.len()),
        })
    }
}

/// Holds the configured page's response until released, so a test can force
/// two loads to resolve out of order.
struct GatedTransport {
    inner: MockTransport,
    gated_page: u32,
    gate: Arc<Notify>,
}

#[async_trait]
impl ShopTransport for GatedTransport {
    async fn fetch_page(&self, page: u32, limit: u32) -> Result<PageResponse> {
        if page == self.gated_page {
            self.gate.notified().await;
        }
        self.inner.fetch_page(page, limit).await
    }

    async fn lookup_cargo(&self, order_id: i64) -> Result<CargoLookup> {
        self.inner.lookup_cargo(order_id).await
    }

    async fn batch_action(&self, ids: &[i64], action: BatchAction) -> Result<BatchActionResponse> {
        self.inner.batch_action(ids, action).await
    }
}

fn controller_with_orders(order_ids: &[i64], limit: u32) -> (Arc<ShopController>, Arc<MockTransport>) {
    let transport = Arc::new(MockTransport::with_orders(order_ids));
    let controller = ShopController::new(transport.clone(), limit);
    (controller, transport)
}

#[test]
fn projection_reports_tri_state_select_all() {
    let rows = vec![
        ShopRow {
            orderid: 1,
            cargoid: Some(9),
        },
        ShopRow {
            orderid: 2,
            cargoid: None,
        },
    ];

    let none: HashSet<i64> = HashSet::new();
    assert_eq!(project_page(&rows, &none).1, SelectAllState::Unchecked);

    let some: HashSet<i64> = [1].into_iter().collect();
    let (views, state) = project_page(&rows, &some);
    assert_eq!(state, SelectAllState::Indeterminate);
    assert!(views[0].selected);
    assert!(!views[1].selected);

    let all: HashSet<i64> = [1, 2].into_iter().collect();
    assert_eq!(project_page(&rows, &all).1, SelectAllState::Checked);

    assert_eq!(project_page(&[], &all).1, SelectAllState::Unchecked);
}

#[tokio::test]
async fn load_replaces_rows_and_pagination() {
    let (controller, _) = controller_with_orders(&(1..=12).collect::<Vec<i64>>(), 5);

    let outcome = controller.load(2).await.expect("load");
    assert_eq!(outcome, LoadOutcome::Applied);

    let view = controller.page_view().await;
    assert_eq!(view.page, 2);
    assert_eq!(view.total_pages, 3);
    assert_eq!(view.total_items, 12);
    let order_ids: Vec<i64> = view.rows.iter().map(|row| row.order_id).collect();
    assert_eq!(order_ids, vec![6, 7, 8, 9, 10]);
}

#[tokio::test]
async fn selection_persists_across_page_navigation() {
    let (controller, _) = controller_with_orders(&(1..=10).collect::<Vec<i64>>(), 5);

    controller.load(1).await.expect("load page 1");
    controller.toggle_selection(3, true).await;

    controller.load(2).await.expect("load page 2");
    let view = controller.page_view().await;
    assert!(view.rows.iter().all(|row| !row.selected));
    assert_eq!(view.select_all, SelectAllState::Unchecked);
    assert_eq!(controller.selected_ids().await, vec![3]);

    controller.load(1).await.expect("back to page 1");
    let view = controller.page_view().await;
    let selected: Vec<i64> = view
        .rows
        .iter()
        .filter(|row| row.selected)
        .map(|row| row.order_id)
        .collect();
    assert_eq!(selected, vec![3]);
    assert_eq!(view.select_all, SelectAllState::Indeterminate);
}

#[tokio::test]
async fn select_all_applies_to_visible_page_only() {
    let (controller, _) = controller_with_orders(&(1..=10).collect::<Vec<i64>>(), 5);

    controller.load(2).await.expect("load page 2");
    controller.toggle_selection(3, true).await;

    controller.toggle_select_all(true).await;
    assert_eq!(controller.selected_ids().await, vec![3, 6, 7, 8, 9, 10]);

    controller.toggle_select_all(false).await;
    assert_eq!(controller.selected_ids().await, vec![3]);
}

#[tokio::test]
async fn select_all_indicator_tracks_visible_rows() {
    let (controller, _) = controller_with_orders(&[1, 2, 3], 5);
    controller.load(1).await.expect("load");

    assert_eq!(controller.page_view().await.select_all, SelectAllState::Unchecked);

    controller.toggle_selection(1, true).await;
    assert_eq!(
        controller.page_view().await.select_all,
        SelectAllState::Indeterminate
    );

    controller.toggle_select_all(true).await;
    assert_eq!(controller.page_view().await.select_all, SelectAllState::Checked);
}

#[tokio::test]
async fn empty_selection_guard_makes_no_network_calls() {
    let (controller, transport) = controller_with_orders(&[1, 2], 5);
    controller.load(1).await.expect("load");

    let export = controller.export_selection().await;
    assert!(matches!(export, Err(ControllerError::EmptySelection)));
    let delete = controller.delete_selection().await;
    assert!(matches!(delete, Err(ControllerError::EmptySelection)));

    assert!(transport.batch_calls.lock().await.is_empty());
}

#[tokio::test]
async fn refresh_clears_selection_and_reloads_current_page() {
    let (controller, transport) = controller_with_orders(&(1..=10).collect::<Vec<i64>>(), 5);

    controller.load(2).await.expect("load page 2");
    controller.toggle_selection(6, true).await;

    controller.refresh().await.expect("refresh");
    assert!(controller.selected_ids().await.is_empty());
    assert_eq!(*transport.fetch_calls.lock().await, vec![2, 2]);
}

#[tokio::test(start_paused = true)]
async fn delete_success_clears_selection_and_reloads() {
    let (controller, transport) = controller_with_orders(&(1..=10).collect::<Vec<i64>>(), 5);

    controller.load(1).await.expect("load");
    controller.toggle_selection(2, true).await;
    controller.toggle_selection(4, true).await;

    let message = controller.delete_selection().await.expect("delete");
    assert!(message.contains("2 rows"));

    assert!(controller.selected_ids().await.is_empty());
    assert_eq!(*transport.fetch_calls.lock().await, vec![1, 1]);

    let calls = transport.batch_calls.lock().await;
    assert_eq!(calls.len(), 1);
    assert_eq!(calls[0], (vec![2, 4], BatchAction::Delete));
}

#[tokio::test]
async fn export_success_keeps_selection_and_does_not_reload() {
    let (controller, transport) = controller_with_orders(&(1..=10).collect::<Vec<i64>>(), 5);

    controller.load(1).await.expect("load");
    controller.toggle_selection(3, true).await;

    controller.export_selection().await.expect("export");

    assert_eq!(controller.selected_ids().await, vec![3]);
    assert_eq!(*transport.fetch_calls.lock().await, vec![1]);
    assert_eq!(
        transport.batch_calls.lock().await[0],
        (vec![3], BatchAction::Export)
    );
}

#[tokio::test]
async fn batch_failure_surfaces_message_and_keeps_selection() {
    let mut transport = MockTransport::with_orders(&[1, 2]);
    transport.fail_batch = Some("handler exploded".into());
    let controller = ShopController::new(Arc::new(transport), 5);

    controller.load(1).await.expect("load");
    controller.toggle_selection(1, true).await;

    let err = controller.delete_selection().await.expect_err("must fail");
    assert!(err.to_string().contains("handler exploded"));
    assert_eq!(controller.selected_ids().await, vec![1]);
}

#[tokio::test]
async fn failed_load_keeps_last_known_state() {
    let controller = ShopController::new(Arc::new(MockTransport::failing_fetch()), 5);
    controller.toggle_selection(2, true).await;
    let mut events = controller.subscribe_events();

    let err = controller.load(1).await.expect_err("must fail");
    assert!(err.to_string().contains("query failed"));

    let view = controller.page_view().await;
    assert_eq!(view.page, 1);
    assert_eq!(view.total_pages, 1);
    assert!(view.rows.is_empty());
    assert_eq!(controller.selected_ids().await, vec![2]);
    assert!(!controller.is_loading().await);

    assert!(matches!(events.recv().await, Ok(ControllerEvent::Loading(true))));
    assert!(matches!(events.recv().await, Ok(ControllerEvent::Loading(false))));
    assert!(matches!(events.recv().await, Ok(ControllerEvent::LoadFailed(_))));
}

#[tokio::test]
async fn loading_flag_cleared_on_success_path() {
    let (controller, _) = controller_with_orders(&[1], 5);
    controller.load(1).await.expect("load");
    assert!(!controller.is_loading().await);
}

#[tokio::test]
async fn stale_load_response_is_discarded() {
    let gate = Arc::new(Notify::new());
    let transport = Arc::new(GatedTransport {
        inner: MockTransport::with_orders(&(1..=10).collect::<Vec<i64>>()),
        gated_page: 1,
        gate: gate.clone(),
    });
    let controller = ShopController::new(transport, 5);

    let slow = {
        let controller = controller.clone();
        tokio::spawn(async move { controller.load(1).await })
    };
    // Give the gated load time to register its generation before racing it.
    tokio::task::yield_now().await;

    assert_eq!(controller.load(2).await.expect("fast load"), LoadOutcome::Applied);

    gate.notify_one();
    let outcome = slow.await.expect("join").expect("slow load");
    assert_eq!(outcome, LoadOutcome::Superseded);

    let view = controller.page_view().await;
    assert_eq!(view.page, 2);
    let order_ids: Vec<i64> = view.rows.iter().map(|row| row.order_id).collect();
    assert_eq!(order_ids, vec![6, 7, 8, 9, 10]);
    assert!(!controller.is_loading().await);
}

#[tokio::test]
async fn change_page_silently_ignores_out_of_range_targets() {
    let (controller, transport) = controller_with_orders(&(1..=10).collect::<Vec<i64>>(), 5);
    controller.load(1).await.expect("load");

    assert_eq!(
        controller.change_page(0).await.expect("page 0"),
        LoadOutcome::Ignored
    );
    assert_eq!(
        controller.change_page(3).await.expect("page 3"),
        LoadOutcome::Ignored
    );
    assert_eq!(
        controller.change_page(2).await.expect("page 2"),
        LoadOutcome::Applied
    );
    assert_eq!(*transport.fetch_calls.lock().await, vec![1, 2]);
}

#[tokio::test]
async fn lookup_cargo_validates_before_any_network_call() {
    let (controller, transport) = controller_with_orders(&[], 5);

    for bad in [0, -3] {
        let err = controller.lookup_cargo(bad).await.expect_err("must reject");
        assert!(matches!(err, ControllerError::InvalidOrderId(_)));
    }
    assert!(transport.cargo_calls.lock().await.is_empty());

    let lookup = controller.lookup_cargo(3).await.expect("lookup");
    assert_eq!(lookup.cargoids, vec![10, 11]);
}

#[tokio::test]
async fn events_carry_notices_and_view_updates() {
    let (controller, _) = controller_with_orders(&[1, 2], 5);
    let mut events = controller.subscribe_events();

    controller.load(1).await.expect("load");
    assert!(matches!(events.recv().await, Ok(ControllerEvent::Loading(true))));
    assert!(matches!(events.recv().await, Ok(ControllerEvent::Loading(false))));
    assert!(matches!(events.recv().await, Ok(ControllerEvent::ViewUpdated(_))));

    let _ = controller.export_selection().await;
    match events.recv().await {
        Ok(ControllerEvent::Notice(message)) => assert_eq!(message, "select items first"),
        other => panic!("expected notice, got {other:?}"),
    }
}

async fn spawn_stub_server() -> String {
    async fn shop() -> Json<PageResponse> {
        Json(PageResponse {
            success: true,
            data: vec![ShopRow {
                orderid: 1,
                cargoid: Some(7),
            }],
            pagination: PageMeta {
                page: 1,
                limit: 10,
                total: 1,
                total_pages: 1,
            },
        })
    }

    async fn batch() -> (StatusCode, Json<ApiFailure>) {
        (
            StatusCode::BAD_REQUEST,
            Json(ApiFailure::new("select items first")),
        )
    }

    let app = Router::new()
        .route("/api/shop", get(shop))
        .route("/api/shop/batch-action", post(batch));

    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}")
}

#[tokio::test]
async fn http_transport_parses_envelopes_and_maps_failures() {
    let server_url = spawn_stub_server().await;
    let transport = HttpShopTransport::new(server_url);

    let page = transport.fetch_page(1, 10).await.expect("page");
    assert_eq!(page.data.len(), 1);
    assert_eq!(page.data[0].orderid, 1);
    assert_eq!(page.pagination.total_pages, 1);

    let err = transport
        .batch_action(&[], BatchAction::Export)
        .await
        .expect_err("must fail");
    assert_eq!(err.to_string(), "select items first");
}
