//! Chunked UPSERT into staging tables on their business keys.

use sqlx::PgPool;
use sync_types::SyncError;

use crate::db::map_db_error;
use crate::workbook::ParsedRow;

/// A staging row ready for insertion, carrying the externally-injected
/// fields (`store_code`, `cost_center`, `run_id`, `run_date`,
/// `source_system`) alongside the parsed workbook fields.
#[derive(Debug, Clone)]
pub struct StagingRow {
    pub store_code: String,
    pub cost_center: String,
    pub run_id: String,
    pub run_date: chrono::NaiveDate,
    pub source_system: &'static str,
    pub parsed: ParsedRow,
    pub is_duplicate: bool,
    pub is_edited_order: bool,
}

/// Computes `is_duplicate`/`is_edited_order` per staging row by checking for
/// repeated `(store_code, order_number)` pairs within the same batch.
/// The first occurrence of a key is never a duplicate; the second and
/// later occurrences are both duplicates, and are further flagged as
/// "edited" when any tracked mutable field differs from the first
/// occurrence.
pub fn compute_duplicate_flags(rows: &mut [StagingRow], mutable_fields: &[&str]) {
    use std::collections::HashMap;

    let mut seen: HashMap<(String, String), usize> = HashMap::new();
    let mut first_occurrence_values: Vec<Vec<Option<String>>> = Vec::new();

    for i in 0..rows.len() {
        let order_number = rows[i].parsed.text("order_number").unwrap_or_default().to_string();
        let key = (rows[i].store_code.clone(), order_number);

        let field_values: Vec<Option<String>> = mutable_fields
            .iter()
            .map(|f| rows[i].parsed.text(f).map(str::to_string))
            .collect();

        match seen.get(&key) {
            None => {
                rows[i].is_duplicate = false;
                rows[i].is_edited_order = false;
                seen.insert(key, first_occurrence_values.len());
                first_occurrence_values.push(field_values);
            }
            Some(&first_idx) => {
                rows[i].is_duplicate = true;
                rows[i].is_edited_order = field_values != first_occurrence_values[first_idx];
            }
        }
    }
}

/// Upsert `rows` into `stg_td_orders`, chunked at `batch_size` rows per
/// statement, on the unique key `(store_code, order_number, order_date)`.
/// Idempotent under full re-execution of the same window: a re-run updates
/// the same rows in place rather than duplicating them.
pub async fn upsert_td_orders(
    pool: &PgPool,
    rows: &[StagingRow],
    batch_size: usize,
) -> Result<u64, SyncError> {
    upsert_chunked(pool, rows, batch_size, insert_td_orders_chunk).await
}

pub async fn upsert_td_sales(
    pool: &PgPool,
    rows: &[StagingRow],
    batch_size: usize,
) -> Result<u64, SyncError> {
    upsert_chunked(pool, rows, batch_size, insert_td_sales_chunk).await
}

pub async fn upsert_uc_orders(
    pool: &PgPool,
    rows: &[StagingRow],
    batch_size: usize,
) -> Result<u64, SyncError> {
    upsert_chunked(pool, rows, batch_size, insert_uc_orders_chunk).await
}

async fn upsert_chunked<F, Fut>(
    pool: &PgPool,
    rows: &[StagingRow],
    batch_size: usize,
    insert_chunk: F,
) -> Result<u64, SyncError>
where
    F: Fn(PgPool, Vec<StagingRow>) -> Fut,
    Fut: std::future::Future<Output = Result<u64, SyncError>>,
{
    let mut total = 0u64;
    for chunk in rows.chunks(batch_size.max(1)) {
        total += insert_chunk(pool.clone(), chunk.to_vec()).await?;
    }
    Ok(total)
}

async fn insert_td_orders_chunk(pool: PgPool, chunk: Vec<StagingRow>) -> Result<u64, SyncError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_db_error("failed to begin staging transaction", e))?;
    for row in &chunk {
        sqlx::query(
            r#"
            INSERT INTO stg_td_orders
                (store_code, order_number, order_date, cost_center, run_id, run_date,
                 source_system, is_duplicate, is_edited_order, payload)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (store_code, order_number, order_date)
            DO UPDATE SET
                cost_center = EXCLUDED.cost_center,
                run_id = EXCLUDED.run_id,
                run_date = EXCLUDED.run_date,
                is_duplicate = EXCLUDED.is_duplicate,
                is_edited_order = EXCLUDED.is_edited_order,
                payload = EXCLUDED.payload
            "#,
        )
        .bind(&row.store_code)
        .bind(row.parsed.text("order_number").unwrap_or_default())
        .bind(row.parsed.date("order_date"))
        .bind(&row.cost_center)
        .bind(&row.run_id)
        .bind(row.run_date)
        .bind(row.source_system)
        .bind(row.is_duplicate)
        .bind(row.is_edited_order)
        .bind(serde_json::to_value(&row.parsed.fields.keys().collect::<Vec<_>>()).ok())
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error("staging upsert into stg_td_orders failed", e))?;
    }
    tx.commit().await.map_err(|e| map_db_error("failed to commit staging transaction", e))?;
    Ok(chunk.len() as u64)
}

async fn insert_td_sales_chunk(pool: PgPool, chunk: Vec<StagingRow>) -> Result<u64, SyncError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_db_error("failed to begin staging transaction", e))?;
    for row in &chunk {
        sqlx::query(
            r#"
            INSERT INTO stg_td_sales
                (store_code, order_number, payment_date, cost_center, run_id, run_date, source_system)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (store_code, order_number, payment_date)
            DO UPDATE SET
                cost_center = EXCLUDED.cost_center,
                run_id = EXCLUDED.run_id,
                run_date = EXCLUDED.run_date
            "#,
        )
        .bind(&row.store_code)
        .bind(row.parsed.text("order_number").unwrap_or_default())
        .bind(row.parsed.date("payment_date"))
        .bind(&row.cost_center)
        .bind(&row.run_id)
        .bind(row.run_date)
        .bind(row.source_system)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error("staging upsert into stg_td_sales failed", e))?;
    }
    tx.commit().await.map_err(|e| map_db_error("failed to commit staging transaction", e))?;
    Ok(chunk.len() as u64)
}

async fn insert_uc_orders_chunk(pool: PgPool, chunk: Vec<StagingRow>) -> Result<u64, SyncError> {
    let mut tx = pool
        .begin()
        .await
        .map_err(|e| map_db_error("failed to begin staging transaction", e))?;
    for row in &chunk {
        sqlx::query(
            r#"
            INSERT INTO stg_uc_orders
                (store_code, order_number, invoice_date, cost_center, run_id, run_date, source_system)
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            ON CONFLICT (store_code, order_number, invoice_date)
            DO UPDATE SET
                cost_center = EXCLUDED.cost_center,
                run_id = EXCLUDED.run_id,
                run_date = EXCLUDED.run_date
            "#,
        )
        .bind(&row.store_code)
        .bind(row.parsed.text("order_number").unwrap_or_default())
        .bind(row.parsed.date("invoice_date"))
        .bind(&row.cost_center)
        .bind(&row.run_id)
        .bind(row.run_date)
        .bind(row.source_system)
        .execute(&mut *tx)
        .await
        .map_err(|e| map_db_error("staging upsert into stg_uc_orders failed", e))?;
    }
    tx.commit().await.map_err(|e| map_db_error("failed to commit staging transaction", e))?;
    Ok(chunk.len() as u64)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::FieldValue;

    fn row(store: &str, order_number: &str, status: &str) -> StagingRow {
        let mut parsed = ParsedRow::default();
        parsed.fields.insert("order_number".into(), FieldValue::Text(order_number.into()));
        parsed.fields.insert("status".into(), FieldValue::Text(status.into()));
        StagingRow {
            store_code: store.into(),
            cost_center: "C1".into(),
            run_id: "run-1".into(),
            run_date: chrono::NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            source_system: "TumbleDry",
            parsed,
            is_duplicate: false,
            is_edited_order: false,
        }
    }

    #[test]
    fn first_occurrence_of_a_key_is_never_a_duplicate() {
        let mut rows = vec![row("A1", "ORD-1", "new")];
        compute_duplicate_flags(&mut rows, &["status"]);
        assert!(!rows[0].is_duplicate);
        assert!(!rows[0].is_edited_order);
    }

    #[test]
    fn repeated_key_with_same_fields_is_duplicate_not_edited() {
        let mut rows = vec![row("A1", "ORD-1", "new"), row("A1", "ORD-1", "new")];
        compute_duplicate_flags(&mut rows, &["status"]);
        assert!(rows[1].is_duplicate);
        assert!(!rows[1].is_edited_order);
    }

    #[test]
    fn repeated_key_with_changed_field_is_edited() {
        let mut rows = vec![row("A1", "ORD-1", "new"), row("A1", "ORD-1", "shipped")];
        compute_duplicate_flags(&mut rows, &["status"]);
        assert!(rows[1].is_duplicate);
        assert!(rows[1].is_edited_order);
    }

    #[test]
    fn different_stores_with_same_order_number_are_distinct_keys() {
        let mut rows = vec![row("A1", "ORD-1", "new"), row("B1", "ORD-1", "new")];
        compute_duplicate_flags(&mut rows, &["status"]);
        assert!(!rows[1].is_duplicate);
    }
}
