//! Production merge from staging.
//!
//! `orders` and `bank` are insert-or-update on their business key; `td_sales`
//! is fed blind-insert-shaped data from staging but still resolves conflicts
//! against its own production unique key, since staging and production carry
//! different key tuples (store_code vs. cost_center).

use sqlx::PgPool;
use sync_types::SyncError;

use crate::db::map_db_error;
use crate::staging::StagingRow;
use crate::workbook::derive_due_fields;

/// Merge staged TD orders rows into production `orders`, computing the
/// due-date-derived fields per row before the insert.
pub async fn merge_td_orders(pool: &PgPool, rows: &[StagingRow]) -> Result<u64, SyncError> {
    let mut merged = 0u64;
    for row in rows {
        let Some(order_date) = row.parsed.date("order_date") else { continue };
        let due_date = row.parsed.date("due_date").unwrap_or_else(|| {
            crate::workbook::default_due_date(order_date)
        });
        let derived = derive_due_fields(order_date, due_date);

        sqlx::query(
            r#"
            INSERT INTO orders
                (cost_center, order_number, order_date, due_date, status, amount,
                 default_due_date, due_days_delta, due_date_flag, complete_processing_by)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT (cost_center, order_number, order_date)
            DO UPDATE SET
                status = EXCLUDED.status,
                amount = EXCLUDED.amount,
                due_date = EXCLUDED.due_date,
                default_due_date = EXCLUDED.default_due_date,
                due_days_delta = EXCLUDED.due_days_delta,
                due_date_flag = EXCLUDED.due_date_flag,
                complete_processing_by = EXCLUDED.complete_processing_by
            "#,
        )
        .bind(&row.cost_center)
        .bind(row.parsed.text("order_number").unwrap_or_default())
        .bind(order_date)
        .bind(due_date)
        .bind(row.parsed.text("status").unwrap_or_default())
        .bind(row.parsed.number("amount").unwrap_or(0.0))
        .bind(derived.default_due_date)
        .bind(derived.due_days_delta as i32)
        .bind(due_date_flag_code(derived.due_date_flag))
        .bind(derived.complete_processing_by)
        .execute(pool)
        .await
        .map_err(|e| map_db_error("production merge into orders failed", e))?;
        merged += 1;
    }
    Ok(merged)
}

/// Merge staged TD sales rows into production `td_sales`.
pub async fn merge_td_sales(pool: &PgPool, rows: &[StagingRow]) -> Result<u64, SyncError> {
    let mut merged = 0u64;
    for row in rows {
        let Some(payment_date) = row.parsed.date("payment_date") else { continue };
        sqlx::query(
            r#"
            INSERT INTO td_sales (cost_center, order_number, payment_date, amount)
            VALUES ($1, $2, $3, $4)
            ON CONFLICT (cost_center, order_number, payment_date)
            DO UPDATE SET amount = EXCLUDED.amount
            "#,
        )
        .bind(&row.cost_center)
        .bind(row.parsed.text("order_number").unwrap_or_default())
        .bind(payment_date)
        .bind(row.parsed.number("amount").unwrap_or(0.0))
        .execute(pool)
        .await
        .map_err(|e| map_db_error("production merge into td_sales failed", e))?;
        merged += 1;
    }
    Ok(merged)
}

/// Merge staged UC orders rows into production `orders`, mapping
/// `invoice_date` to the production `order_date` column.
pub async fn merge_uc_orders(pool: &PgPool, rows: &[StagingRow]) -> Result<u64, SyncError> {
    let mut merged = 0u64;
    for row in rows {
        let Some(invoice_date) = row.parsed.date("invoice_date") else { continue };
        let cgst = row.parsed.number("cgst").unwrap_or(0.0);
        let sgst = row.parsed.number("sgst").unwrap_or(0.0);
        let tax_amount = crate::workbook::uc_tax_amount(cgst, sgst);

        sqlx::query(
            r#"
            INSERT INTO orders (cost_center, order_number, order_date, status, amount, tax_amount)
            VALUES ($1, $2, $3, $4, $5, $6)
            ON CONFLICT (cost_center, order_number, order_date)
            DO UPDATE SET
                status = EXCLUDED.status,
                amount = EXCLUDED.amount,
                tax_amount = EXCLUDED.tax_amount
            "#,
        )
        .bind(&row.cost_center)
        .bind(row.parsed.text("order_number").unwrap_or_default())
        .bind(invoice_date)
        .bind(row.parsed.text("status").unwrap_or_default())
        .bind(row.parsed.number("amount").unwrap_or(0.0))
        .bind(tax_amount)
        .execute(pool)
        .await
        .map_err(|e| map_db_error("production merge into orders (UC) failed", e))?;
        merged += 1;
    }
    Ok(merged)
}

/// Storage code for `orders.due_date_flag`, matching the column's CHECK
/// constraint. Kept distinct from any human-facing label: notification
/// templates render their own wording off the parsed row, not this column.
fn due_date_flag_code(flag: crate::workbook::DueDateFlag) -> &'static str {
    use crate::workbook::DueDateFlag::*;
    match flag {
        Normal => "normal",
        Extended => "extended",
        Express => "express",
    }
}

#[cfg(test)]
mod tests {
    use super::due_date_flag_code;
    use crate::workbook::DueDateFlag;

    #[test]
    fn due_date_flag_codes_match_the_column_check_constraint() {
        assert_eq!(due_date_flag_code(DueDateFlag::Normal), "normal");
        assert_eq!(due_date_flag_code(DueDateFlag::Extended), "extended");
        assert_eq!(due_date_flag_code(DueDateFlag::Express), "express");
    }
}
