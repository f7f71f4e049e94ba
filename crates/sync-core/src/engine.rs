//! TD and UC sync engines: the per-(store, window) procedure.

use sqlx::PgPool;
use sync_retry::RetryExecutor;
use sync_types::{Store, SyncError, SyncErrorKind, SyncStatus, Window};

use crate::session::{self, StorageState};
use crate::staging::{self, StagingRow};
use crate::webauto::{self, FlowOutcome, WebAutomation};
use crate::{production, synclog};

/// Everything one engine invocation needs beyond the store and window:
/// where to run, and how many rows to upsert per statement.
pub struct EngineContext<'a> {
    pub pool: &'a PgPool,
    pub session_dir: &'a std::path::Path,
    pub download_dir: &'a std::path::Path,
    pub run_id: &'a str,
    pub run_env: &'a str,
    pub ingest_batch_size: usize,
}

/// Persist a captured download under a run-scoped subdirectory of the
/// configured download directory, with the deterministic filename the
/// external interfaces contract specifies:
/// `{store}_{td_orders|td_sales|uc_gst}_{YYYYMMDD}_{YYYYMMDD}.xlsx`. Safe
/// under concurrent writers because no two stores ever write the same path
/// (per-store exclusivity is enforced upstream by the profiler).
fn persist_download(
    download_dir: &std::path::Path,
    run_id: &str,
    store_code: &str,
    kind: &str,
    window: Window,
    download: &webauto::Download,
) -> Result<(), SyncError> {
    let run_dir = download_dir.join(run_id);
    std::fs::create_dir_all(&run_dir).map_err(|e| {
        SyncError::with_source(SyncErrorKind::Transport, "failed to create download run directory", e)
    })?;
    let file_name = format!(
        "{store_code}_{kind}_{}_{}.xlsx",
        window.from.format("%Y%m%d"),
        window.to.format("%Y%m%d"),
    );
    std::fs::write(run_dir.join(file_name), &download.bytes).map_err(|e| {
        SyncError::with_source(SyncErrorKind::Transport, "failed to persist downloaded report", e)
    })
}

/// Structured outcome handed back to the profiler after a window runs.
#[derive(Debug)]
pub struct WindowOutcome {
    pub window: Window,
    pub status: SyncStatus,
    pub error_message: Option<String>,
}

/// The sync-log/run-summary pipeline identifier for a store's sync group:
/// `"td_orders"` for TD stores, `"uc_gst"` for UC stores.
pub fn pipeline_id_for(store: &Store) -> &'static str {
    match store.sync_group {
        sync_types::SyncGroup::Td => "td_orders",
        sync_types::SyncGroup::Uc => "uc_gst",
    }
}

/// Run the automation flow, retrying only transient-transport failures
/// against the shared backoff schedule; a fresh browser context is built
/// before every attempt since a failed context cannot be reused. Any other
/// error kind (auth, schema, layout drift, ...) is surfaced on the first
/// attempt, since retrying it would just reproduce the same failure.
async fn run_flow_with_transport_retry<F, Fut>(
    make_automation: &impl Fn() -> F,
    run: impl Fn(Box<dyn WebAutomation>) -> Fut,
) -> Result<FlowOutcome, SyncError>
where
    F: std::future::Future<Output = Result<Box<dyn WebAutomation>, SyncError>>,
    Fut: std::future::Future<Output = Result<FlowOutcome, SyncError>>,
{
    let schedule = RetryExecutor::TRANSIENT_TRANSPORT_SCHEDULE;
    let mut attempt = 0usize;
    loop {
        let automation = make_automation().await?;
        match run(automation).await {
            Ok(outcome) => return Ok(outcome),
            Err(e) if e.kind.is_transient() => match schedule.get(attempt) {
                Some(delay) => {
                    tokio::time::sleep(*delay).await;
                    attempt += 1;
                }
                None => return Err(e),
            },
            Err(e) => return Err(e),
        }
    }
}

/// Execute the TD flow for one (store, window): open the sync-log row, run
/// the browser flow with transport retry, persist session state, stage and
/// merge any downloaded reports, then finalize the sync-log row.
pub async fn run_td_window(
    ctx: &EngineContext<'_>,
    store: &Store,
    window: Window,
    launch_automation: impl Fn() -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Box<dyn WebAutomation>, SyncError>> + Send>,
    >,
) -> Result<WindowOutcome, SyncError> {
    let pipeline_id = pipeline_id_for(store);
    let log_id = synclog::open_window(
        ctx.pool,
        pipeline_id,
        &store.store_code,
        ctx.run_id,
        ctx.run_env,
        &store.cost_center,
        window.from,
        window.to,
    )
    .await?;

    let state = session::load_state(ctx.session_dir, &store.store_code)?;

    let flow_result = run_flow_with_transport_retry(&launch_automation, |mut automation| {
        let state = state.clone();
        async move {
            let outcome = webauto::td_orders_and_sales_flow(
                automation.as_mut(),
                state,
                &store.sync_config,
                &store.store_code,
                window,
            )
            .await;
            let _ = automation.close().await;
            outcome
        }
    })
    .await;

    let flow = match flow_result {
        Ok(flow) => flow,
        Err(e) => {
            let status = e.kind.terminal_status();
            synclog::finalize(ctx.pool, log_id, status, Some(&e.message)).await?;
            return Ok(WindowOutcome { window, status, error_message: Some(e.message) });
        }
    };

    session::save_state(ctx.session_dir, &store.store_code, &flow.state)?;

    let mut orders_ok = false;
    let mut sales_ok = false;
    let mut sales_error_message: Option<String> = None;

    if let Some(download) = &flow.orders {
        if let Err(e) =
            persist_download(ctx.download_dir, ctx.run_id, &store.store_code, "td_orders", window, download)
        {
            tracing::warn!(error = %e, "failed to persist td_orders download artifact");
        }
        match ingest_td_orders(ctx, store, window, download).await {
            Ok(()) => {
                synclog::mark_orders_pulled(ctx.pool, log_id).await?;
                orders_ok = true;
            }
            Err(e) => {
                synclog::finalize(ctx.pool, log_id, SyncStatus::Failed, Some(&e.message)).await?;
                return Ok(WindowOutcome {
                    window,
                    status: SyncStatus::Failed,
                    error_message: Some(e.message),
                });
            }
        }
    }

    // A sales download failure no longer aborts the flow function itself
    // (see webauto::td_orders_and_sales_flow), so orders_pulled_at above is
    // already committed by the time we learn sales failed.
    if let Some(e) = &flow.sales_error {
        tracing::warn!(error = %e, "td sales download failed, window will finalize as partial");
        sales_error_message = Some(e.message.clone());
    } else if let Some(download) = &flow.sales {
        if let Err(e) =
            persist_download(ctx.download_dir, ctx.run_id, &store.store_code, "td_sales", window, download)
        {
            tracing::warn!(error = %e, "failed to persist td_sales download artifact");
        }
        match ingest_td_sales(ctx, store, window, download).await {
            Ok(()) => {
                synclog::mark_sales_pulled(ctx.pool, log_id).await?;
                sales_ok = true;
            }
            Err(e) => sales_error_message = Some(e.message),
        }
    }

    let status = match (orders_ok, sales_ok) {
        (true, true) => SyncStatus::Success,
        (true, false) => SyncStatus::Partial,
        (false, _) => SyncStatus::Failed,
    };
    synclog::finalize(ctx.pool, log_id, status, sales_error_message.as_deref()).await?;
    Ok(WindowOutcome { window, status, error_message: sales_error_message })
}

/// Execute the UC flow for one (store, window).
pub async fn run_uc_window(
    ctx: &EngineContext<'_>,
    store: &Store,
    window: Window,
    launch_automation: impl Fn() -> std::pin::Pin<
        Box<dyn std::future::Future<Output = Result<Box<dyn WebAutomation>, SyncError>> + Send>,
    >,
) -> Result<WindowOutcome, SyncError> {
    let pipeline_id = pipeline_id_for(store);
    let log_id = synclog::open_window(
        ctx.pool,
        pipeline_id,
        &store.store_code,
        ctx.run_id,
        ctx.run_env,
        &store.cost_center,
        window.from,
        window.to,
    )
    .await?;

    let state = session::load_state(ctx.session_dir, &store.store_code)?;
    let flow_result = run_flow_with_transport_retry(&launch_automation, |mut automation| {
        let state = state.clone();
        async move {
            let outcome = webauto::uc_gst_flow(
                automation.as_mut(),
                state,
                &store.sync_config,
                &store.store_code,
                window,
            )
            .await;
            let _ = automation.close().await;
            outcome
        }
    })
    .await;

    let flow = match flow_result {
        Ok(flow) => flow,
        Err(e) => {
            let status = e.kind.terminal_status();
            synclog::finalize(ctx.pool, log_id, status, Some(&e.message)).await?;
            return Ok(WindowOutcome { window, status, error_message: Some(e.message) });
        }
    };

    session::save_state(ctx.session_dir, &store.store_code, &flow.state)?;

    if flow.no_data {
        synclog::mark_orders_pulled(ctx.pool, log_id).await?;
        synclog::finalize(ctx.pool, log_id, SyncStatus::Success, None).await?;
        return Ok(WindowOutcome { window, status: SyncStatus::Success, error_message: None });
    }

    let Some(download) = &flow.orders else {
        let message = "UC flow produced neither a download nor a no-data banner".to_string();
        synclog::finalize(ctx.pool, log_id, SyncStatus::Failed, Some(&message)).await?;
        return Ok(WindowOutcome { window, status: SyncStatus::Failed, error_message: Some(message) });
    };

    if let Err(e) =
        persist_download(ctx.download_dir, ctx.run_id, &store.store_code, "uc_gst", window, download)
    {
        tracing::warn!(error = %e, "failed to persist uc_gst download artifact");
    }

    match ingest_uc_orders(ctx, store, window, download).await {
        Ok(()) => {
            synclog::mark_orders_pulled(ctx.pool, log_id).await?;
            synclog::finalize(ctx.pool, log_id, SyncStatus::Success, None).await?;
            Ok(WindowOutcome { window, status: SyncStatus::Success, error_message: None })
        }
        Err(e) => {
            synclog::finalize(ctx.pool, log_id, SyncStatus::Failed, Some(&e.message)).await?;
            Ok(WindowOutcome { window, status: SyncStatus::Failed, error_message: Some(e.message) })
        }
    }
}

const TD_ORDERS_COLUMNS: &[crate::workbook::ColumnSpec] = &[
    crate::workbook::ColumnSpec {
        aliases: &["ordernumber"],
        canonical: "order_number",
        kind: crate::workbook::ColumnKind::Text,
        is_key: true,
    },
    crate::workbook::ColumnSpec {
        aliases: &["orderdate"],
        canonical: "order_date",
        kind: crate::workbook::ColumnKind::Date,
        is_key: true,
    },
    crate::workbook::ColumnSpec {
        aliases: &["duedate"],
        canonical: "due_date",
        kind: crate::workbook::ColumnKind::Date,
        is_key: false,
    },
    crate::workbook::ColumnSpec {
        aliases: &["status"],
        canonical: "status",
        kind: crate::workbook::ColumnKind::Text,
        is_key: false,
    },
    crate::workbook::ColumnSpec {
        aliases: &["amount", "orderamount"],
        canonical: "amount",
        kind: crate::workbook::ColumnKind::Numeric,
        is_key: false,
    },
];

const TD_SALES_COLUMNS: &[crate::workbook::ColumnSpec] = &[
    crate::workbook::ColumnSpec {
        aliases: &["ordernumber"],
        canonical: "order_number",
        kind: crate::workbook::ColumnKind::Text,
        is_key: true,
    },
    crate::workbook::ColumnSpec {
        aliases: &["paymentdate"],
        canonical: "payment_date",
        kind: crate::workbook::ColumnKind::Date,
        is_key: true,
    },
    crate::workbook::ColumnSpec {
        aliases: &["amount"],
        canonical: "amount",
        kind: crate::workbook::ColumnKind::Numeric,
        is_key: false,
    },
];

const UC_ORDERS_COLUMNS: &[crate::workbook::ColumnSpec] = &[
    crate::workbook::ColumnSpec {
        aliases: &["ordernumber"],
        canonical: "order_number",
        kind: crate::workbook::ColumnKind::Text,
        is_key: true,
    },
    crate::workbook::ColumnSpec {
        aliases: &["invoicedate"],
        canonical: "invoice_date",
        kind: crate::workbook::ColumnKind::Date,
        is_key: true,
    },
    crate::workbook::ColumnSpec {
        aliases: &["status"],
        canonical: "status",
        kind: crate::workbook::ColumnKind::Text,
        is_key: false,
    },
    crate::workbook::ColumnSpec {
        aliases: &["amount"],
        canonical: "amount",
        kind: crate::workbook::ColumnKind::Numeric,
        is_key: false,
    },
    crate::workbook::ColumnSpec {
        aliases: &["cgst"],
        canonical: "cgst",
        kind: crate::workbook::ColumnKind::Numeric,
        is_key: false,
    },
    crate::workbook::ColumnSpec {
        aliases: &["sgst"],
        canonical: "sgst",
        kind: crate::workbook::ColumnKind::Numeric,
        is_key: false,
    },
];

fn to_staging_rows(
    parsed: Vec<crate::workbook::ParsedRow>,
    store: &Store,
    run_id: &str,
    run_date: chrono::NaiveDate,
    source_system: &'static str,
) -> Vec<StagingRow> {
    parsed
        .into_iter()
        .map(|parsed| StagingRow {
            store_code: store.store_code.clone(),
            cost_center: store.cost_center.clone(),
            run_id: run_id.to_string(),
            run_date,
            source_system,
            parsed,
            is_duplicate: false,
            is_edited_order: false,
        })
        .collect()
}

async fn ingest_td_orders(
    ctx: &EngineContext<'_>,
    store: &Store,
    window: Window,
    download: &webauto::Download,
) -> Result<(), SyncError> {
    let tz = chrono_tz::Tz::Asia__Kolkata;
    let parsed = crate::workbook::parse_workbook(&download.bytes, TD_ORDERS_COLUMNS, tz)?;
    let mut rows = to_staging_rows(parsed, store, ctx.run_id, window.to, "TumbleDry");
    staging::compute_duplicate_flags(&mut rows, &["status", "amount"]);
    staging::upsert_td_orders(ctx.pool, &rows, ctx.ingest_batch_size).await?;
    production::merge_td_orders(ctx.pool, &rows).await?;
    Ok(())
}

async fn ingest_td_sales(
    ctx: &EngineContext<'_>,
    store: &Store,
    window: Window,
    download: &webauto::Download,
) -> Result<(), SyncError> {
    let tz = chrono_tz::Tz::Asia__Kolkata;
    let parsed = crate::workbook::parse_workbook(&download.bytes, TD_SALES_COLUMNS, tz)?;
    let rows = to_staging_rows(parsed, store, ctx.run_id, window.to, "TumbleDry");
    staging::upsert_td_sales(ctx.pool, &rows, ctx.ingest_batch_size).await?;
    production::merge_td_sales(ctx.pool, &rows).await?;
    Ok(())
}

async fn ingest_uc_orders(
    ctx: &EngineContext<'_>,
    store: &Store,
    window: Window,
    download: &webauto::Download,
) -> Result<(), SyncError> {
    let tz = chrono_tz::Tz::Asia__Kolkata;
    let parsed = crate::workbook::parse_workbook(&download.bytes, UC_ORDERS_COLUMNS, tz)?;
    let mut rows = to_staging_rows(parsed, store, ctx.run_id, window.to, "UClean");
    staging::compute_duplicate_flags(&mut rows, &["status", "amount"]);
    staging::upsert_uc_orders(ctx.pool, &rows, ctx.ingest_batch_size).await?;
    production::merge_uc_orders(ctx.pool, &rows).await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pipeline_id_matches_sync_group() {
        let td = Store {
            store_code: "A1".into(),
            sync_group: sync_types::SyncGroup::Td,
            cost_center: "C1".into(),
            start_date: chrono::NaiveDate::from_ymd_opt(2025, 1, 1).unwrap(),
            sync_orders_flag: true,
            is_active: true,
            sync_config: serde_json::from_value(serde_json::json!({
                "urls": {"login": "x", "home": "x", "orders_link": "x"},
                "login_selector": {"username": "#u", "password": "#p"},
                "username": "u", "password": "p",
            }))
            .unwrap(),
        };
        assert_eq!(pipeline_id_for(&td), "td_orders");
    }
}
