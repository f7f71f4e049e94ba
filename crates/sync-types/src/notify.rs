use serde::{Deserialize, Serialize};

use crate::error::SyncError;

/// Who a notification profile's emails go to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NotificationScope {
    Global,
    PerStore,
}

impl std::str::FromStr for NotificationScope {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "global" => Ok(NotificationScope::Global),
            "per_store" => Ok(NotificationScope::PerStore),
            other => Err(SyncError::schema(format!("unknown notification scope '{other}'"))),
        }
    }
}

impl std::fmt::Display for NotificationScope {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            NotificationScope::Global => write!(f, "global"),
            NotificationScope::PerStore => write!(f, "per_store"),
        }
    }
}

/// Which documents (if any) are attached to an email built from a profile.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AttachMode {
    None,
    PerStorePdf,
    AllDocuments,
}

impl std::str::FromStr for AttachMode {
    type Err = SyncError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(AttachMode::None),
            "per_store_pdf" => Ok(AttachMode::PerStorePdf),
            "all_documents" => Ok(AttachMode::AllDocuments),
            other => Err(SyncError::schema(format!("unknown attach mode '{other}'"))),
        }
    }
}

impl std::fmt::Display for AttachMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            AttachMode::None => write!(f, "none"),
            AttachMode::PerStorePdf => write!(f, "per_store_pdf"),
            AttachMode::AllDocuments => write!(f, "all_documents"),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct NotificationProfile {
    pub id: i64,
    pub pipeline_name: String,
    pub scope: NotificationScope,
    pub attach_mode: AttachMode,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Template {
    pub id: i64,
    pub profile_id: i64,
    pub subject: String,
    pub body: String,
    pub is_active: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Recipient {
    pub id: i64,
    pub profile_id: i64,
    pub store_code: Option<String>,
    pub env: String,
    pub email: String,
    pub is_active: bool,
}

/// A recorded artifact produced outside the core (the reporting
/// collaborator) and consumed here only by the dispatcher.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Document {
    pub id: i64,
    pub run_id: String,
    pub pipeline_name: String,
    pub store_code: Option<String>,
    pub doc_type: String,
    pub doc_subtype: Option<String>,
    pub file_path: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn notification_scope_round_trips_through_its_db_text_form() {
        assert_eq!("global".parse::<NotificationScope>().unwrap(), NotificationScope::Global);
        assert_eq!("per_store".parse::<NotificationScope>().unwrap(), NotificationScope::PerStore);
        assert_eq!(NotificationScope::Global.to_string(), "global");
        assert_eq!(NotificationScope::PerStore.to_string(), "per_store");
        assert!("bogus".parse::<NotificationScope>().is_err());
    }

    #[test]
    fn attach_mode_round_trips_through_its_db_text_form() {
        for mode in [AttachMode::None, AttachMode::PerStorePdf, AttachMode::AllDocuments] {
            assert_eq!(mode.to_string().parse::<AttachMode>().unwrap(), mode);
        }
        assert!("bogus".parse::<AttachMode>().is_err());
    }
}
