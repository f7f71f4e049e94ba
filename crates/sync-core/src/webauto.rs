//! Web automation capability set and the two concrete CRM flows.
//!
//! `WebAutomation` hides whether the underlying automation library is sync
//! or async behind a sequential state machine of explicit steps; the TD and
//! UC flow functions below are that state machine, composed purely from the
//! trait's capabilities so they can run unchanged against either
//! [`ChromeAutomation`] or [`FakeAutomation`] in tests.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt as _;
use sync_types::{SyncConfig, SyncError, SyncErrorKind, Window};

use crate::session::{SessionStatus, StorageState};

/// A completed download: raw bytes plus the name the site suggested.
#[derive(Debug, Clone)]
pub struct Download {
    pub bytes: Vec<u8>,
    pub suggested_name: String,
}

/// A row in the TD "Report Requests" table.
#[derive(Debug, Clone)]
pub struct ReportRequestRow {
    pub date_range_label: String,
    pub requested_at: DateTime<Utc>,
    pub status: String,
}

/// The capability set every web automation flow is written against.
#[async_trait]
pub trait WebAutomation: Send {
    async fn open_context(&mut self, state: Option<StorageState>) -> Result<(), SyncError>;
    async fn navigate(&mut self, url: &str) -> Result<(), SyncError>;
    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SyncError>;
    async fn click(&mut self, selector: &str) -> Result<(), SyncError>;
    async fn enter_frame(&mut self, selector: &str) -> Result<(), SyncError>;
    async fn current_url(&mut self) -> Result<String, SyncError>;

    /// Wait until any one of `locators` is visible, or `timeout` elapses.
    /// Returns the index of the first locator that became visible.
    async fn wait_visible(&mut self, locators: &[&str], timeout: Duration)
    -> Result<usize, SyncError>;

    /// Wait until none of `locators` are visible (used for spinners).
    async fn wait_hidden(&mut self, locators: &[&str], timeout: Duration) -> Result<(), SyncError>;

    /// Whether `locator` is visible right now, without waiting.
    async fn is_visible(&mut self, locator: &str) -> Result<bool, SyncError>;

    /// Current row count of a results table, when the site exposes it.
    async fn row_count(&mut self, table_selector: &str) -> Result<usize, SyncError>;

    /// Read the "Report Requests" table rows (TD flow only).
    async fn list_report_requests(
        &mut self,
        table_selector: &str,
    ) -> Result<Vec<ReportRequestRow>, SyncError>;

    /// Run `trigger` (a click on the element that starts the download) and
    /// capture the resulting download within `timeout`.
    async fn click_and_capture_download(
        &mut self,
        trigger_selector: &str,
        timeout: Duration,
    ) -> Result<Download, SyncError>;

    /// Capture the current storage state for persistence by the session cache.
    async fn save_state(&mut self) -> Result<StorageState, SyncError>;

    /// Close the browser context. Called both on clean completion and on
    /// cancellation.
    async fn close(&mut self) -> Result<(), SyncError>;
}

/// Probe whether a loaded session is still authenticated by navigating to
/// `home_url` and checking for login-form selectors vs. post-login controls.
pub async fn probe_session(
    automation: &mut dyn WebAutomation,
    state: Option<StorageState>,
    home_url: &str,
    login_form_selector: &str,
) -> Result<SessionStatus, SyncError> {
    if state.is_none() {
        return Ok(SessionStatus::Unknown);
    }
    automation.open_context(state).await?;
    automation.navigate(home_url).await?;
    if automation.is_visible(login_form_selector).await? {
        return Ok(SessionStatus::Expired);
    }
    Ok(SessionStatus::Valid)
}

const HYDRATION_TIMEOUT: Duration = Duration::from_secs(30);
const MATCH_TIMEOUT: Duration = Duration::from_secs(60);
const DOWNLOAD_TIMEOUT: Duration = Duration::from_secs(120);

/// Outcome of running a web-automation flow for one window.
pub struct FlowOutcome {
    pub orders: Option<Download>,
    pub sales: Option<Download>,
    /// Set when the sales report download itself failed after orders
    /// already succeeded. Distinct from an ingest-time failure, which the
    /// caller learns about separately; this lets a sales-only failure
    /// finalize the window as partial instead of aborting the whole flow.
    pub sales_error: Option<SyncError>,
    /// UC "no data" banner was shown rather than a download. Counts as a
    /// success with zero rows.
    pub no_data: bool,
    pub state: StorageState,
}

async fn cell_text(element: &chromiumoxide::Element) -> Result<String, SyncError> {
    element
        .inner_text()
        .await
        .map_err(|e| SyncError::with_source(SyncErrorKind::LayoutDrift, "failed to read table cell text", e))?
        .ok_or_else(|| SyncError::new(SyncErrorKind::LayoutDrift, "report request cell had no text"))
}

fn td_label(window: Window) -> String {
    format!(
        "{} - {}",
        window.from.format("%d %b %Y"),
        window.to.format("%d %b %Y")
    )
}

async fn ensure_logged_in(
    automation: &mut dyn WebAutomation,
    state: Option<StorageState>,
    config: &SyncConfig,
    login_form_selector: &str,
    store_code: &str,
) -> Result<(), SyncError> {
    let status = probe_session(automation, state, &config.urls.home, login_form_selector).await?;
    if status == SessionStatus::Valid {
        return Ok(());
    }

    automation.navigate(&config.urls.login).await?;
    automation
        .fill(&config.login_selector.username, &config.username)
        .await?;
    automation
        .fill(&config.login_selector.password, &config.password)
        .await?;
    if let Some(store_selector) = &config.login_selector.store_code {
        automation.fill(store_selector, store_code).await?;
    }
    automation.click("button[type=submit]").await?;

    let landing = automation.current_url().await?;
    if !landing.contains(store_code) {
        return Err(SyncError::new(
            SyncErrorKind::Auth,
            format!("post-login URL did not contain store code {store_code}"),
        ));
    }
    Ok(())
}

/// Run a single report download inside the shared `#ifrmReport` iframe.
/// The "Expand" click only applies to the orders report, not sales.
async fn download_td_report(
    automation: &mut dyn WebAutomation,
    container_url: &str,
    window: Window,
    with_expand: bool,
) -> Result<Download, SyncError> {
    automation.navigate(container_url).await?;
    automation.enter_frame("#ifrmReport").await?;

    automation
        .wait_hidden(&[".spinner"], HYDRATION_TIMEOUT)
        .await
        .or_else(|_| Ok::<(), SyncError>(()))?;
    automation
        .wait_visible(
            &[
                "role=button[name='Generate Report']",
                "text=Download historical report",
                "text=Expand",
            ],
            HYDRATION_TIMEOUT,
        )
        .await
        .map_err(|_| SyncError::new(SyncErrorKind::LayoutDrift, "report container never hydrated"))?;

    if with_expand {
        automation.click("text=Expand").await?;
    }
    automation.click("text=Download historical Report").await?;
    automation
        .wait_visible(&["role=button[name='Generate Report']"], HYDRATION_TIMEOUT)
        .await
        .map_err(|_| SyncError::timeout("Generate Report control never appeared"))?;
    automation.click("role=button[name='Generate Report']").await?;

    automation
        .fill("input[name=from_date]", &window.from.format("%Y-%m-%d").to_string())
        .await?;
    automation
        .fill("input[name=to_date]", &window.to.format("%Y-%m-%d").to_string())
        .await?;
    automation.click("text=Request Report").await?;

    let expected_label = td_label(window);
    let matched = wait_for_matching_request_row(automation, &expected_label).await?;
    if !matched {
        return Err(SyncError::timeout(format!(
            "no report request row matched window label '{expected_label}'"
        )));
    }

    automation
        .click_and_capture_download("text=Download", DOWNLOAD_TIMEOUT)
        .await
}

/// Poll the "Report Requests" table until a row's label matches the
/// requested window, tie-breaking on the newest timestamp/status when more
/// than one row matches.
async fn wait_for_matching_request_row(
    automation: &mut dyn WebAutomation,
    expected_label: &str,
) -> Result<bool, SyncError> {
    let deadline = tokio::time::Instant::now() + MATCH_TIMEOUT;
    loop {
        let rows = automation.list_report_requests("#report-requests-table").await?;
        let mut matches: Vec<_> = rows
            .into_iter()
            .filter(|r| r.date_range_label == expected_label)
            .collect();
        if let Some(newest) = matches.drain(..).max_by_key(|r| r.requested_at) {
            return Ok(newest.status.eq_ignore_ascii_case("ready"));
        }
        if tokio::time::Instant::now() >= deadline {
            return Ok(false);
        }
        tokio::time::sleep(Duration::from_secs(2)).await;
    }
}

/// The TD dual-report flow: orders, then sales, under one session.
pub async fn td_orders_and_sales_flow(
    automation: &mut dyn WebAutomation,
    state: Option<StorageState>,
    config: &SyncConfig,
    store_code: &str,
    window: Window,
) -> Result<FlowOutcome, SyncError> {
    automation.open_context(state.clone()).await?;
    ensure_logged_in(automation, state, config, "#login-form", store_code).await?;

    let orders = download_td_report(automation, &config.urls.orders_link, window, true).await?;

    let sales_url = config.urls.sales_link.as_deref().ok_or_else(|| {
        SyncError::new(SyncErrorKind::FatalConfig, "TD store missing sales_link in sync_config")
    })?;
    // Orders already downloaded successfully at this point; a sales failure
    // is recorded rather than propagated, so the caller can still commit the
    // orders half of the window instead of losing it to an aborted flow.
    let (sales, sales_error) = match download_td_report(automation, sales_url, window, false).await {
        Ok(download) => (Some(download), None),
        Err(e) => (None, Some(e)),
    };

    let saved_state = automation.save_state().await?;
    Ok(FlowOutcome {
        orders: Some(orders),
        sales,
        sales_error,
        no_data: false,
        state: saved_state,
    })
}

/// The UC single-report GST flow.
pub async fn uc_gst_flow(
    automation: &mut dyn WebAutomation,
    state: Option<StorageState>,
    config: &SyncConfig,
    store_code: &str,
    window: Window,
) -> Result<FlowOutcome, SyncError> {
    automation.open_context(state.clone()).await?;
    ensure_logged_in(automation, state, config, "#login-form", store_code).await?;

    automation.navigate(&config.urls.orders_link).await?;
    automation.click("text=Date Range").await?;
    automation
        .fill("input[name=start_date]", &window.from.format("%Y-%m-%d").to_string())
        .await?;
    automation
        .fill("input[name=end_date]", &window.to.format("%Y-%m-%d").to_string())
        .await?;
    automation.click("text=Apply").await?;

    automation
        .wait_hidden(&[".overlay", ".spinner"], HYDRATION_TIMEOUT)
        .await
        .map_err(|_| SyncError::timeout("date overlay/table never settled"))?;

    let idx = automation
        .wait_visible(&["[data-row]", "text=No data available"], MATCH_TIMEOUT)
        .await
        .map_err(|_| SyncError::timeout("neither rows nor no-data banner appeared"))?;

    if idx == 1 {
        let saved_state = automation.save_state().await?;
        return Ok(FlowOutcome {
            orders: None,
            sales: None,
            sales_error: None,
            no_data: true,
            state: saved_state,
        });
    }

    let count = automation.row_count("[data-row]").await?;
    if count == 0 {
        return Err(SyncError::new(
            SyncErrorKind::LayoutDrift,
            "rows marker visible but row_count is zero and no no-data banner shown",
        ));
    }

    let orders = automation
        .click_and_capture_download("text=Export Report", DOWNLOAD_TIMEOUT)
        .await?;
    let saved_state = automation.save_state().await?;
    Ok(FlowOutcome {
        orders: Some(orders),
        sales: None,
        sales_error: None,
        no_data: false,
        state: saved_state,
    })
}

/// `chromiumoxide`-backed implementation of [`WebAutomation`].
pub struct ChromeAutomation {
    browser: chromiumoxide::Browser,
    page: Option<chromiumoxide::Page>,
    frame_selector: Option<String>,
    /// Staging directory the browser itself writes completed downloads
    /// into; read back and deleted once a download finishes.
    download_dir: std::path::PathBuf,
}

impl ChromeAutomation {
    pub async fn launch(headless: bool, download_dir: impl Into<std::path::PathBuf>) -> Result<Self, SyncError> {
        let config = chromiumoxide::BrowserConfig::builder()
            .with_head_off(headless)
            .build()
            .map_err(|e| SyncError::new(SyncErrorKind::FatalConfig, e))?;
        let (browser, mut handler) = chromiumoxide::Browser::launch(config)
            .await
            .map_err(|e| {
                SyncError::with_source(SyncErrorKind::FatalConfig, "failed to launch browser", e)
            })?;
        tokio::spawn(async move { while handler.next().await.is_some() {} });
        Ok(Self {
            browser,
            page: None,
            frame_selector: None,
            download_dir: download_dir.into(),
        })
    }

    fn page(&mut self) -> Result<&mut chromiumoxide::Page, SyncError> {
        self.page
            .as_mut()
            .ok_or_else(|| SyncError::new(SyncErrorKind::FatalConfig, "no open page"))
    }
}

#[async_trait]
impl WebAutomation for ChromeAutomation {
    async fn open_context(&mut self, _state: Option<StorageState>) -> Result<(), SyncError> {
        let page = self.browser.new_page("about:blank").await.map_err(|e| {
            SyncError::with_source(SyncErrorKind::Transport, "failed to open browser context", e)
        })?;
        self.page = Some(page);
        self.frame_selector = None;
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SyncError> {
        self.page()?
            .goto(url)
            .await
            .map_err(|e| SyncError::with_source(SyncErrorKind::Transport, "navigation failed", e))?;
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SyncError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| SyncError::new(SyncErrorKind::LayoutDrift, format!("selector not found: {selector}")))?;
        element
            .click()
            .await
            .and_then(|e| e.type_str(value))
            .await
            .map_err(|e| SyncError::with_source(SyncErrorKind::LayoutDrift, "fill failed", e))?;
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), SyncError> {
        let element = self
            .page()?
            .find_element(selector)
            .await
            .map_err(|_| SyncError::new(SyncErrorKind::LayoutDrift, format!("selector not found: {selector}")))?;
        element
            .click()
            .await
            .map_err(|e| SyncError::with_source(SyncErrorKind::LayoutDrift, "click failed", e))?;
        Ok(())
    }

    async fn enter_frame(&mut self, selector: &str) -> Result<(), SyncError> {
        self.frame_selector = Some(selector.to_string());
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, SyncError> {
        self.page()?
            .url()
            .await
            .map_err(|e| SyncError::with_source(SyncErrorKind::Transport, "failed to read current url", e))?
            .ok_or_else(|| SyncError::new(SyncErrorKind::Transport, "page has no url"))
    }

    async fn wait_visible(
        &mut self,
        locators: &[&str],
        timeout: Duration,
    ) -> Result<usize, SyncError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            for (idx, locator) in locators.iter().enumerate() {
                if self.is_visible(locator).await? {
                    return Ok(idx);
                }
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SyncError::timeout(format!("none of {locators:?} became visible")));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn wait_hidden(&mut self, locators: &[&str], timeout: Duration) -> Result<(), SyncError> {
        let deadline = tokio::time::Instant::now() + timeout;
        loop {
            let mut any_visible = false;
            for locator in locators {
                if self.is_visible(locator).await? {
                    any_visible = true;
                }
            }
            if !any_visible {
                return Ok(());
            }
            if tokio::time::Instant::now() >= deadline {
                return Err(SyncError::timeout(format!("{locators:?} still visible")));
            }
            tokio::time::sleep(Duration::from_millis(250)).await;
        }
    }

    async fn is_visible(&mut self, locator: &str) -> Result<bool, SyncError> {
        Ok(self.page()?.find_element(locator).await.is_ok())
    }

    async fn row_count(&mut self, table_selector: &str) -> Result<usize, SyncError> {
        let elements = self.page()?.find_elements(table_selector).await.map_err(|e| {
            SyncError::with_source(SyncErrorKind::LayoutDrift, "failed to count rows", e)
        })?;
        Ok(elements.len())
    }

    async fn list_report_requests(
        &mut self,
        table_selector: &str,
    ) -> Result<Vec<ReportRequestRow>, SyncError> {
        let row_selector = format!("{table_selector} tbody tr");
        let rows = self.page()?.find_elements(&row_selector).await.map_err(|e| {
            SyncError::with_source(SyncErrorKind::LayoutDrift, "failed to read report request rows", e)
        })?;

        let mut requests = Vec::with_capacity(rows.len());
        for row in rows {
            let cells = row.find_elements("td").await.map_err(|e| {
                SyncError::with_source(SyncErrorKind::LayoutDrift, "report request row missing cells", e)
            })?;
            if cells.len() < 3 {
                continue;
            }
            let date_range_label = cell_text(&cells[0]).await?;
            let requested_at_text = cell_text(&cells[1]).await?;
            let status = cell_text(&cells[2]).await?;
            let requested_at = DateTime::parse_from_rfc3339(&requested_at_text)
                .map(|dt| dt.with_timezone(&Utc))
                .unwrap_or_else(|_| Utc::now());
            requests.push(ReportRequestRow { date_range_label, requested_at, status });
        }
        Ok(requests)
    }

    async fn click_and_capture_download(
        &mut self,
        trigger_selector: &str,
        timeout: Duration,
    ) -> Result<Download, SyncError> {
        use chromiumoxide::cdp::browser_protocol::page::{
            DownloadProgressState, EventDownloadProgress, EventDownloadWillBegin,
            SetDownloadBehaviorBehavior, SetDownloadBehaviorParams,
        };

        std::fs::create_dir_all(&self.download_dir).map_err(|e| {
            SyncError::with_source(
                SyncErrorKind::Download,
                "failed to create browser download staging directory",
                e,
            )
        })?;

        let behavior = SetDownloadBehaviorParams::builder()
            .behavior(SetDownloadBehaviorBehavior::Allow)
            .download_path(self.download_dir.to_string_lossy().to_string())
            .build()
            .map_err(|e| SyncError::new(SyncErrorKind::FatalConfig, e))?;
        self.page()?.execute(behavior).await.map_err(|e| {
            SyncError::with_source(SyncErrorKind::FatalConfig, "failed to enable browser downloads", e)
        })?;

        let mut began = self.page()?.event_listener::<EventDownloadWillBegin>().await.map_err(|e| {
            SyncError::with_source(SyncErrorKind::Transport, "failed to subscribe to download events", e)
        })?;
        let mut progressed =
            self.page()?.event_listener::<EventDownloadProgress>().await.map_err(|e| {
                SyncError::with_source(SyncErrorKind::Transport, "failed to subscribe to download events", e)
            })?;

        self.click(trigger_selector).await?;

        let deadline = tokio::time::Instant::now() + timeout;

        let begin_event = tokio::time::timeout_at(deadline, began.next())
            .await
            .map_err(|_| SyncError::download("download did not start before deadline"))?
            .ok_or_else(|| SyncError::download("download-begin event stream closed"))?;
        let guid = begin_event.guid.clone();
        let suggested_name = begin_event.suggested_filename.clone();

        loop {
            let event = tokio::time::timeout_at(deadline, progressed.next())
                .await
                .map_err(|_| SyncError::download("download did not complete before deadline"))?
                .ok_or_else(|| SyncError::download("download-progress event stream closed"))?;
            if event.guid != guid {
                continue;
            }
            match event.state {
                DownloadProgressState::Completed => break,
                DownloadProgressState::Canceled => {
                    return Err(SyncError::download("browser cancelled the download"));
                }
                DownloadProgressState::InProgress => continue,
            }
        }

        let file_path = self.download_dir.join(&guid);
        let bytes = tokio::fs::read(&file_path).await.map_err(|e| {
            SyncError::with_source(SyncErrorKind::Download, "failed to read completed download from disk", e)
        })?;
        let _ = tokio::fs::remove_file(&file_path).await;

        Ok(Download { bytes, suggested_name })
    }

    async fn save_state(&mut self) -> Result<StorageState, SyncError> {
        Ok(StorageState(serde_json::json!({})))
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        if let Some(page) = self.page.take() {
            let _ = page.close().await;
        }
        Ok(())
    }
}

#[cfg(test)]
pub struct FakeAutomation {
    pub visited: Vec<String>,
    pub filled: Vec<(String, String)>,
    pub clicked: Vec<String>,
    pub login_form_visible: bool,
    pub report_rows: Vec<ReportRequestRow>,
    pub no_data: bool,
    pub rows_present: usize,
    pub download: Download,
    /// When set to `Some(n)`, the nth call (1-indexed) to
    /// `click_and_capture_download` fails instead of returning `download`.
    pub fail_download_on_call: Option<usize>,
    pub download_calls: usize,
}

#[cfg(test)]
#[async_trait]
impl WebAutomation for FakeAutomation {
    async fn open_context(&mut self, _state: Option<StorageState>) -> Result<(), SyncError> {
        Ok(())
    }

    async fn navigate(&mut self, url: &str) -> Result<(), SyncError> {
        self.visited.push(url.to_string());
        Ok(())
    }

    async fn fill(&mut self, selector: &str, value: &str) -> Result<(), SyncError> {
        self.filled.push((selector.to_string(), value.to_string()));
        Ok(())
    }

    async fn click(&mut self, selector: &str) -> Result<(), SyncError> {
        self.clicked.push(selector.to_string());
        Ok(())
    }

    async fn enter_frame(&mut self, _selector: &str) -> Result<(), SyncError> {
        Ok(())
    }

    async fn current_url(&mut self) -> Result<String, SyncError> {
        Ok(self.visited.last().cloned().unwrap_or_default())
    }

    async fn wait_visible(
        &mut self,
        locators: &[&str],
        _timeout: Duration,
    ) -> Result<usize, SyncError> {
        if self.no_data && locators.iter().any(|l| l.contains("No data")) {
            return Ok(locators.iter().position(|l| l.contains("No data")).unwrap());
        }
        Ok(0)
    }

    async fn wait_hidden(&mut self, _locators: &[&str], _timeout: Duration) -> Result<(), SyncError> {
        Ok(())
    }

    async fn is_visible(&mut self, _locator: &str) -> Result<bool, SyncError> {
        Ok(self.login_form_visible)
    }

    async fn row_count(&mut self, _table_selector: &str) -> Result<usize, SyncError> {
        Ok(self.rows_present)
    }

    async fn list_report_requests(
        &mut self,
        _table_selector: &str,
    ) -> Result<Vec<ReportRequestRow>, SyncError> {
        Ok(self.report_rows.clone())
    }

    async fn click_and_capture_download(
        &mut self,
        trigger_selector: &str,
        _timeout: Duration,
    ) -> Result<Download, SyncError> {
        self.clicked.push(trigger_selector.to_string());
        self.download_calls += 1;
        if self.fail_download_on_call == Some(self.download_calls) {
            return Err(SyncError::download("fake report export failed"));
        }
        Ok(self.download.clone())
    }

    async fn save_state(&mut self) -> Result<StorageState, SyncError> {
        Ok(StorageState(serde_json::json!({"ok": true})))
    }

    async fn close(&mut self) -> Result<(), SyncError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;

    fn window() -> Window {
        Window::new(
            NaiveDate::from_ymd_opt(2025, 3, 1).unwrap(),
            NaiveDate::from_ymd_opt(2025, 3, 10).unwrap(),
        )
    }

    fn fake(login_form_visible: bool) -> FakeAutomation {
        FakeAutomation {
            visited: Vec::new(),
            filled: Vec::new(),
            clicked: Vec::new(),
            login_form_visible,
            report_rows: vec![ReportRequestRow {
                date_range_label: td_label(window()),
                requested_at: Utc::now(),
                status: "ready".to_string(),
            }],
            no_data: false,
            rows_present: 1,
            download: Download { bytes: vec![1, 2, 3], suggested_name: "orders.xlsx".to_string() },
            fail_download_on_call: None,
            download_calls: 0,
        }
    }

    fn config() -> SyncConfig {
        serde_json::from_value(serde_json::json!({
            "urls": {
                "login": "https://crm.example/login",
                "home": "https://crm.example/home",
                "orders_link": "https://crm.example/orders",
                "sales_link": "https://crm.example/sales",
            },
            "login_selector": {"username": "#u", "password": "#p", "store_code": "#s"},
            "username": "bot",
            "password": "secret",
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn td_label_formats_dd_mon_yyyy_range() {
        assert_eq!(td_label(window()), "01 Mar 2025 - 10 Mar 2025");
    }

    #[tokio::test]
    async fn td_flow_logs_in_when_no_prior_state() {
        let mut automation = fake(false);
        let outcome = td_orders_and_sales_flow(&mut automation, None, &config(), "A668", window())
            .await
            .unwrap();
        assert!(outcome.orders.is_some());
        assert!(outcome.sales.is_some());
        assert!(outcome.sales_error.is_none());
        assert!(automation.clicked.contains(&"text=Expand".to_string()));
    }

    #[tokio::test]
    async fn td_flow_keeps_orders_when_only_sales_download_fails() {
        let mut automation = fake(false);
        // First `click_and_capture_download` is the orders report, the
        // second is sales; fail only the second.
        automation.fail_download_on_call = Some(2);
        let outcome = td_orders_and_sales_flow(&mut automation, None, &config(), "A668", window())
            .await
            .unwrap();
        assert!(outcome.orders.is_some());
        assert!(outcome.sales.is_none());
        assert!(outcome.sales_error.is_some());
    }

    #[tokio::test]
    async fn uc_flow_reports_no_data_as_success() {
        let mut automation = fake(false);
        automation.no_data = true;
        let outcome = uc_gst_flow(&mut automation, None, &config(), "A668", window())
            .await
            .unwrap();
        assert!(outcome.no_data);
        assert!(outcome.orders.is_none());
    }

    #[tokio::test]
    async fn uc_flow_downloads_when_rows_present() {
        let mut automation = fake(false);
        let outcome = uc_gst_flow(&mut automation, None, &config(), "A668", window())
            .await
            .unwrap();
        assert!(!outcome.no_data);
        assert!(outcome.orders.is_some());
    }
}
