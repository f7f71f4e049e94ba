//! Read-only façade over `store_master`.

use sqlx::PgPool;
use sync_types::{Store, SyncConfig, SyncError, SyncGroup};

use crate::db::map_db_error;

#[derive(sqlx::FromRow)]
struct StoreRow {
    store_code: String,
    sync_group: String,
    cost_center: String,
    start_date: chrono::NaiveDate,
    sync_orders_flag: bool,
    is_active: bool,
    sync_config: serde_json::Value,
}

impl TryFrom<StoreRow> for Store {
    type Error = SyncError;

    fn try_from(row: StoreRow) -> Result<Self, Self::Error> {
        let sync_group: SyncGroup = row.sync_group.parse()?;
        let sync_config = SyncConfig::try_from_json(&row.sync_config)?;
        Ok(Store {
            store_code: row.store_code,
            sync_group,
            cost_center: row.cost_center,
            start_date: row.start_date,
            sync_orders_flag: row.sync_orders_flag,
            is_active: row.is_active,
            sync_config,
        })
    }
}

/// Active stores with `sync_orders_flag = true`, optionally narrowed by
/// `group` and/or a single `explicit_code`.
pub async fn eligible_stores(
    pool: &PgPool,
    group: Option<SyncGroup>,
    explicit_code: Option<&str>,
) -> Result<Vec<Store>, SyncError> {
    let rows: Vec<StoreRow> = sqlx::query_as(
        r#"
        SELECT store_code, sync_group, cost_center, start_date,
               sync_orders_flag, is_active, sync_config
        FROM store_master
        WHERE is_active = true
          AND sync_orders_flag = true
          AND ($1::text IS NULL OR sync_group = $1)
          AND ($2::text IS NULL OR store_code = $2)
        ORDER BY store_code
        "#,
    )
    .bind(group.map(|g| g.to_string()))
    .bind(explicit_code)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to query eligible stores", e))?;

    rows.into_iter().map(Store::try_from).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn store_row_rejects_unknown_sync_group() {
        let row = StoreRow {
            store_code: "A1".into(),
            sync_group: "XX".into(),
            cost_center: "C1".into(),
            start_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            sync_orders_flag: true,
            is_active: true,
            sync_config: serde_json::json!({}),
        };
        assert!(Store::try_from(row).is_err());
    }
}
