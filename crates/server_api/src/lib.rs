use futures::future::BoxFuture;
use shared::{
    domain::{BatchAction, OrderId},
    error::ApiError,
    protocol::{CargoLookup, PageMeta, ShopRow},
};
use storage::Storage;
use tracing::{error, info};

pub const DEFAULT_PAGE: u32 = 1;
pub const DEFAULT_PAGE_LIMIT: u32 = 10;

#[derive(Clone)]
pub struct ApiContext {
    pub storage: Storage,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchOutcome {
    pub count: usize,
    pub message: String,
}

/// Bounded read of the shop table plus pagination metadata. Two independent
/// reads (page rows, aggregate count); total and page contents may diverge
/// under concurrent writes.
pub async fn fetch_page(
    ctx: &ApiContext,
    page: u32,
    limit: u32,
) -> Result<(Vec<ShopRow>, PageMeta), ApiError> {
    let page = page.max(DEFAULT_PAGE);
    let limit = limit.max(1);
    let offset = u64::from(page - 1) * u64::from(limit);

    let rows = ctx
        .storage
        .list_shop_page(limit, offset)
        .await
        .map_err(query_failed)?;
    let total = ctx.storage.count_shop_rows().await.map_err(query_failed)?;
    let total_pages = total.div_ceil(u64::from(limit)) as u32;

    let data = rows
        .into_iter()
        .map(|row| ShopRow {
            orderid: row.order_id.0,
            cargoid: row.cargo_id.map(|id| id.0),
        })
        .collect();

    Ok((
        data,
        PageMeta {
            page,
            limit,
            total,
            total_pages,
        },
    ))
}

/// Resolves all cargo ids associated with one order. Validation runs before
/// any storage read; an order with no matches yields an empty result.
pub async fn lookup_cargo(ctx: &ApiContext, order_id: i64) -> Result<CargoLookup, ApiError> {
    if order_id <= 0 {
        return Err(ApiError::validation("order id must be a positive integer"));
    }

    let cargo_ids = ctx
        .storage
        .cargo_ids_for_order(OrderId(order_id))
        .await
        .map_err(query_failed)?;

    let cargoids: Vec<i64> = cargo_ids.into_iter().map(|id| id.0).collect();
    Ok(CargoLookup {
        orderid: order_id,
        count: cargoids.len(),
        cargoids,
    })
}

type BatchHandler = for<'a> fn(&'a ApiContext, &'a [OrderId]) -> BoxFuture<'a, Result<BatchOutcome, ApiError>>;

/// Action dispatch table. Adding an action means adding a row here; the
/// validation path above it never changes.
const BATCH_HANDLERS: &[(BatchAction, BatchHandler)] = &[
    (BatchAction::Export, handle_export),
    (BatchAction::Delete, handle_delete),
];

pub async fn perform_batch_action(
    ctx: &ApiContext,
    ids: &[OrderId],
    action: BatchAction,
) -> Result<BatchOutcome, ApiError> {
    if ids.is_empty() {
        return Err(ApiError::validation("select items first"));
    }

    let handler = BATCH_HANDLERS
        .iter()
        .find(|(tag, _)| *tag == action)
        .map(|(_, handler)| handler)
        .ok_or_else(|| ApiError::validation(format!("unknown action '{}'", action.tag())))?;

    handler(ctx, ids).await
}

fn handle_export<'a>(
    _ctx: &'a ApiContext,
    ids: &'a [OrderId],
) -> BoxFuture<'a, Result<BatchOutcome, ApiError>> {
    Box::pin(async move {
        // Acknowledge only; artifact generation is a pluggable extension point.
        info!(count = ids.len(), "batch export requested");
        Ok(BatchOutcome {
            count: ids.len(),
            message: format!("accepted export for {} rows", ids.len()),
        })
    })
}

fn handle_delete<'a>(
    _ctx: &'a ApiContext,
    ids: &'a [OrderId],
) -> BoxFuture<'a, Result<BatchOutcome, ApiError>> {
    Box::pin(async move {
        // Acknowledge only; actual row removal is a pluggable extension point.
        info!(count = ids.len(), "batch delete requested");
        Ok(BatchOutcome {
            count: ids.len(),
            message: format!("accepted delete for {} rows", ids.len()),
        })
    })
}

fn query_failed(err: anyhow::Error) -> ApiError {
    error!(%err, "shop query failed");
    ApiError::internal("query failed")
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
