use std::collections::BTreeMap;

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// The sync pipeline a store belongs to. TD stores run the dual-report
/// (orders + sales) flow; UC stores run the single-report GST flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum SyncGroup {
    Td,
    Uc,
}

impl std::str::FromStr for SyncGroup {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TD" => Ok(SyncGroup::Td),
            "UC" => Ok(SyncGroup::Uc),
            other => Err(SyncError::fatal_config(format!(
                "unknown sync_group '{other}', expected TD or UC"
            ))),
        }
    }
}

impl std::fmt::Display for SyncGroup {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            SyncGroup::Td => write!(f, "TD"),
            SyncGroup::Uc => write!(f, "UC"),
        }
    }
}

/// CSS-selector bundle for the login form, resolved per store because the
/// two CRM UIs (TD, UC) use different field names.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoginSelectors {
    pub username: String,
    pub password: String,
    #[serde(default)]
    pub store_code: Option<String>,
}

/// URLs a store's sync_config must carry.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncUrls {
    pub login: String,
    pub home: String,
    pub orders_link: String,
    #[serde(default)]
    pub sales_link: Option<String>,
}

/// The frozen, validated value extracted from a store row's `sync_config`
/// JSON column. Unknown fields in the source JSON are ignored; required
/// fields are checked once, at load time, via [`SyncConfig::try_from_json`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SyncConfig {
    pub urls: SyncUrls,
    pub login_selector: LoginSelectors,
    pub username: String,
    pub password: String,
}

impl SyncConfig {
    /// Parse and validate a store's raw `sync_config` JSON value.
    ///
    /// Required fields absent or of the wrong shape produce
    /// `SyncErrorKind::Schema` (this is a boot-time data problem, not a
    /// transient failure, so it is never retried).
    pub fn try_from_json(value: &serde_json::Value) -> Result<Self, SyncError> {
        serde_json::from_value(value.clone())
            .map_err(|e| SyncError::schema(format!("invalid sync_config: {e}")))
    }
}

/// A store row from `store_master`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Store {
    pub store_code: String,
    pub sync_group: SyncGroup,
    pub cost_center: String,
    pub start_date: NaiveDate,
    pub sync_orders_flag: bool,
    pub is_active: bool,
    pub sync_config: SyncConfig,
}

impl Store {
    pub fn is_eligible(&self) -> bool {
        self.is_active && self.sync_orders_flag
    }
}

/// Additional per-run metadata threaded through the call chain, replacing
/// the "global mutable state" pattern flagged in the system's design notes.
#[derive(Debug, Clone)]
pub struct RunContext {
    pub run_id: String,
    pub pipeline_name: String,
    pub store_code: String,
    pub run_env: String,
    pub extra: BTreeMap<String, String>,
}

impl RunContext {
    pub fn new(
        run_id: impl Into<String>,
        pipeline_name: impl Into<String>,
        store_code: impl Into<String>,
        run_env: impl Into<String>,
    ) -> Self {
        Self {
            run_id: run_id.into(),
            pipeline_name: pipeline_name.into(),
            store_code: store_code.into(),
            run_env: run_env.into(),
            extra: BTreeMap::new(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sync_group_parses_case_insensitively() {
        assert_eq!("td".parse::<SyncGroup>().unwrap(), SyncGroup::Td);
        assert_eq!("UC".parse::<SyncGroup>().unwrap(), SyncGroup::Uc);
        assert!("XX".parse::<SyncGroup>().is_err());
    }

    #[test]
    fn sync_config_rejects_missing_required_field() {
        let v = serde_json::json!({
            "urls": { "login": "https://x", "home": "https://x", "orders_link": "https://x" },
            "login_selector": { "username": "#u", "password": "#p" },
            // username/password missing
        });
        let err = SyncConfig::try_from_json(&v).unwrap_err();
        assert_eq!(err.kind, crate::SyncErrorKind::Schema);
    }

    #[test]
    fn sync_config_ignores_unknown_fields() {
        let v = serde_json::json!({
            "urls": { "login": "https://x", "home": "https://x", "orders_link": "https://x" },
            "login_selector": { "username": "#u", "password": "#p" },
            "username": "bot",
            "password": "secret",
            "some_future_field": 42,
        });
        assert!(SyncConfig::try_from_json(&v).is_ok());
    }
}
