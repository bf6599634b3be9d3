use anyhow::{Context, Result};
use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    Pool, Row, Sqlite,
};
use std::{
    fs,
    path::{Path, PathBuf},
    str::FromStr,
};

use shared::domain::{CargoId, OrderId};

#[derive(Clone)]
pub struct Storage {
    pool: Pool<Sqlite>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StoredShopRow {
    pub order_id: OrderId,
    pub cargo_id: Option<CargoId>,
}

impl Storage {
    pub async fn new(database_url: &str) -> Result<Self> {
        ensure_sqlite_parent_dir_exists(database_url)?;

        let connect_options = SqliteConnectOptions::from_str(database_url)?.create_if_missing(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(connect_options)
            .await?;
        sqlx::migrate!("./migrations").run(&pool).await?;
        Ok(Self { pool })
    }

    pub fn pool(&self) -> &Pool<Sqlite> {
        &self.pool
    }

    pub async fn health_check(&self) -> Result<()> {
        let _: i64 = sqlx::query_scalar("SELECT 1")
            .fetch_one(&self.pool)
            .await
            .context("sqlite ping failed")?;
        Ok(())
    }

    pub async fn insert_shop_row(
        &self,
        order_id: OrderId,
        cargo_id: Option<CargoId>,
    ) -> Result<i64> {
        let rec = sqlx::query("INSERT INTO shop (orderid, cargoid) VALUES (?, ?) RETURNING id")
            .bind(order_id.0)
            .bind(cargo_id.map(|id| id.0))
            .fetch_one(&self.pool)
            .await?;
        Ok(rec.get::<i64, _>(0))
    }

    /// One bounded page of the shop table, ordered by orderid ascending so
    /// repeated reads against an unchanged table return identical pages.
    pub async fn list_shop_page(&self, limit: u32, offset: u64) -> Result<Vec<StoredShopRow>> {
        let rows = sqlx::query(
            "SELECT orderid, cargoid FROM shop
             ORDER BY orderid ASC
             LIMIT ? OFFSET ?",
        )
        .bind(limit)
        .bind(i64::try_from(offset).unwrap_or(i64::MAX))
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| StoredShopRow {
                order_id: OrderId(r.get::<i64, _>(0)),
                cargo_id: r.get::<Option<i64>, _>(1).map(CargoId),
            })
            .collect())
    }

    pub async fn count_shop_rows(&self) -> Result<u64> {
        let total: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM shop")
            .fetch_one(&self.pool)
            .await?;
        Ok(total as u64)
    }

    /// All non-null cargo ids recorded for an order, in storage order.
    pub async fn cargo_ids_for_order(&self, order_id: OrderId) -> Result<Vec<CargoId>> {
        let rows = sqlx::query(
            "SELECT cargoid FROM shop
             WHERE orderid = ? AND cargoid IS NOT NULL
             ORDER BY id ASC",
        )
        .bind(order_id.0)
        .fetch_all(&self.pool)
        .await?;
        Ok(rows
            .into_iter()
            .map(|r| CargoId(r.get::<i64, _>(0)))
            .collect())
    }
}

fn ensure_sqlite_parent_dir_exists(database_url: &str) -> Result<()> {
    let Some(path) = sqlite_path(database_url) else {
        return Ok(());
    };

    let Some(parent) = path.parent() else {
        return Ok(());
    };

    fs::create_dir_all(parent).with_context(|| {
        format!(
            "failed to create parent directory '{}' for database url '{database_url}'",
            parent.display()
        )
    })?;

    Ok(())
}

fn sqlite_path(database_url: &str) -> Option<PathBuf> {
    if database_url == "sqlite::memory:" || !database_url.starts_with("sqlite:") {
        return None;
    }

    let path = database_url
        .trim_start_matches("sqlite://")
        .trim_start_matches("sqlite:")
        .split('?')
        .next()
        .unwrap_or_default();

    if path.is_empty() {
        return None;
    }

    Some(Path::new(path).to_path_buf())
}

#[cfg(test)]
#[path = "tests/lib_tests.rs"]
mod tests;
