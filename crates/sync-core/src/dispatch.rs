//! Notification dispatcher: turns a finished run into emails.
//!
//! Mirrors the [`crate::webauto::WebAutomation`] split: the SMTP transport
//! sits behind a [`Mailer`] trait so the resolution/rendering logic can be
//! exercised without a live server.

use std::collections::BTreeSet;

use async_trait::async_trait;
use sqlx::PgPool;
use sync_config::SmtpConfig;
use sync_types::{AttachMode, Document, NotificationProfile, NotificationScope, Recipient, SyncError, SyncErrorKind, Template};

use crate::db::map_db_error;

/// One file to attach to an outgoing email: suggested filename plus bytes.
pub struct Attachment {
    pub file_name: String,
    pub bytes: Vec<u8>,
}

/// A fully-resolved email ready for delivery.
pub struct EmailEnvelope {
    pub to: Vec<String>,
    pub subject: String,
    pub body: String,
    pub attachments: Vec<Attachment>,
}

/// Delivery capability the dispatcher is written against. Production code
/// uses [`SmtpMailer`]; tests substitute a recording fake.
#[async_trait]
pub trait Mailer: Send + Sync {
    async fn send(&self, email: EmailEnvelope) -> Result<(), SyncError>;
}

/// `lettre`-backed transport over the configured SMTP relay.
pub struct SmtpMailer {
    transport: lettre::AsyncSmtpTransport<lettre::Tokio1Executor>,
    from: String,
}

impl SmtpMailer {
    pub fn new(cfg: &SmtpConfig) -> Result<Self, SyncError> {
        use lettre::transport::smtp::authentication::Credentials;

        let mut builder = if cfg.use_tls {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::relay(&cfg.host).map_err(|e| {
                SyncError::with_source(SyncErrorKind::FatalConfig, "failed to build SMTP transport", e)
            })?
        } else {
            lettre::AsyncSmtpTransport::<lettre::Tokio1Executor>::builder_dangerous(&cfg.host)
        };

        builder = builder.port(cfg.port);
        if let (Some(username), Some(password)) = (&cfg.username, &cfg.password) {
            builder = builder.credentials(Credentials::new(username.clone(), password.clone()));
        }

        Ok(Self {
            transport: builder.build(),
            from: cfg.from.clone(),
        })
    }
}

#[async_trait]
impl Mailer for SmtpMailer {
    async fn send(&self, email: EmailEnvelope) -> Result<(), SyncError> {
        use lettre::AsyncTransport;
        use lettre::message::{Attachment as LettreAttachment, MultiPart, SinglePart};

        let mut multipart = MultiPart::mixed().singlepart(SinglePart::plain(email.body.clone()));
        for attachment in &email.attachments {
            multipart = multipart.singlepart(
                LettreAttachment::new(attachment.file_name.clone())
                    .body(attachment.bytes.clone(), "application/octet-stream".parse().unwrap()),
            );
        }

        let mut message = lettre::Message::builder()
            .from(self.from.parse().map_err(|e| {
                SyncError::with_source(SyncErrorKind::FatalConfig, "invalid SMTP from address", e)
            })?)
            .subject(email.subject.clone());
        for to in &email.to {
            message = message.to(to.parse().map_err(|e| {
                SyncError::with_source(SyncErrorKind::Transport, format!("invalid recipient address: {to}"), e)
            })?);
        }
        let message = message
            .multipart(multipart)
            .map_err(|e| SyncError::with_source(SyncErrorKind::Transport, "failed to build email", e))?;

        self.transport
            .send(message)
            .await
            .map_err(|e| SyncError::with_source(SyncErrorKind::Transport, "SMTP delivery failed", e))?;
        Ok(())
    }
}

#[derive(sqlx::FromRow)]
struct RunSummaryRow {
    pipeline_name: String,
    run_env: String,
    overall_status: String,
    summary_text: Option<String>,
}

async fn load_run_summary(pool: &PgPool, run_id: &str) -> Result<RunSummaryRow, SyncError> {
    sqlx::query_as(
        "SELECT pipeline_name, run_env, overall_status, summary_text \
         FROM pipeline_run_summaries WHERE run_id = $1",
    )
    .bind(run_id)
    .fetch_one(pool)
    .await
    .map_err(|e| map_db_error("failed to load run summary for dispatch", e))
}

#[derive(sqlx::FromRow)]
struct ProfileRow {
    id: i64,
    pipeline_name: String,
    scope: String,
    attach_mode: String,
    is_active: bool,
}

impl TryFrom<ProfileRow> for NotificationProfile {
    type Error = SyncError;

    fn try_from(row: ProfileRow) -> Result<Self, Self::Error> {
        Ok(NotificationProfile {
            id: row.id,
            pipeline_name: row.pipeline_name,
            scope: row.scope.parse()?,
            attach_mode: row.attach_mode.parse()?,
            is_active: row.is_active,
        })
    }
}

async fn load_documents(pool: &PgPool, run_id: &str) -> Result<Vec<Document>, SyncError> {
    let rows: Vec<Document> = sqlx::query_as(
        "SELECT id, run_id, pipeline_name, store_code, doc_type, doc_subtype, file_path \
         FROM documents WHERE run_id = $1",
    )
    .bind(run_id)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to load documents for dispatch", e))?;
    Ok(rows)
}

async fn load_active_profiles(
    pool: &PgPool,
    pipeline_name: &str,
) -> Result<Vec<NotificationProfile>, SyncError> {
    let rows: Vec<ProfileRow> = sqlx::query_as(
        "SELECT id, pipeline_name, scope, attach_mode, is_active \
         FROM notification_profiles WHERE pipeline_name = $1 AND is_active = true",
    )
    .bind(pipeline_name)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to load notification profiles", e))?;
    rows.into_iter().map(NotificationProfile::try_from).collect()
}

async fn load_active_template(pool: &PgPool, profile_id: i64) -> Result<Option<Template>, SyncError> {
    let row: Option<Template> = sqlx::query_as(
        "SELECT id, profile_id, subject, body, is_active \
         FROM notification_templates WHERE profile_id = $1 AND is_active = true \
         ORDER BY id LIMIT 1",
    )
    .bind(profile_id)
    .fetch_optional(pool)
    .await
    .map_err(|e| map_db_error("failed to load notification template", e))?;
    Ok(row)
}

async fn load_recipients(
    pool: &PgPool,
    profile_id: i64,
    run_env: &str,
) -> Result<Vec<Recipient>, SyncError> {
    let rows: Vec<Recipient> = sqlx::query_as(
        "SELECT id, profile_id, store_code, env, email, is_active \
         FROM notification_recipients WHERE profile_id = $1 AND env = $2 AND is_active = true",
    )
    .bind(profile_id)
    .bind(run_env)
    .fetch_all(pool)
    .await
    .map_err(|e| map_db_error("failed to load notification recipients", e))?;
    Ok(rows)
}

/// Whether `(run_id, profile_id, store_code)` already has a dispatch-log
/// row — the exactly-once guard preventing a retried or re-entrant run from
/// double-sending the same notification.
async fn already_dispatched(
    pool: &PgPool,
    run_id: &str,
    profile_id: i64,
    store_code: Option<&str>,
) -> Result<bool, SyncError> {
    let (count,): (i64,) = sqlx::query_as(
        "SELECT COUNT(*) FROM notification_dispatch_log \
         WHERE run_id = $1 AND profile_id = $2 \
           AND store_code IS NOT DISTINCT FROM $3",
    )
    .bind(run_id)
    .bind(profile_id)
    .bind(store_code)
    .fetch_one(pool)
    .await
    .map_err(|e| map_db_error("failed to query notification_dispatch_log", e))?;
    Ok(count > 0)
}

async fn record_dispatch(
    pool: &PgPool,
    run_id: &str,
    profile_id: i64,
    store_code: Option<&str>,
) -> Result<(), SyncError> {
    sqlx::query(
        "INSERT INTO notification_dispatch_log (run_id, profile_id, store_code, dispatched_at) \
         VALUES ($1, $2, $3, now())",
    )
    .bind(run_id)
    .bind(profile_id)
    .bind(store_code)
    .execute(pool)
    .await
    .map_err(|e| map_db_error("failed to record notification_dispatch_log row", e))?;
    Ok(())
}

/// Simple `{{var}}` interpolation. Unknown placeholders are left verbatim
/// rather than erroring — a template referencing a field this run doesn't
/// carry is a template bug, not a reason to drop the email.
fn render_template(template: &str, vars: &[(&str, &str)]) -> String {
    let mut out = template.to_string();
    for (key, value) in vars {
        out = out.replace(&format!("{{{{{key}}}}}"), value);
    }
    out
}

/// Select the documents a profile's attach-mode authorizes for the given
/// scope (`None` = the global plan, `Some(store_code)` = a per-store plan).
fn filter_documents<'a>(
    documents: &'a [Document],
    attach_mode: AttachMode,
    store_code: Option<&str>,
) -> Vec<&'a Document> {
    match attach_mode {
        AttachMode::None => Vec::new(),
        AttachMode::AllDocuments => documents
            .iter()
            .filter(|d| d.store_code.as_deref() == store_code)
            .collect(),
        AttachMode::PerStorePdf => documents
            .iter()
            .filter(|d| d.store_code.as_deref() == store_code && d.doc_type == "pdf")
            .take(1)
            .collect(),
    }
}

/// Outcome of one dispatcher invocation.
#[derive(Debug, Default)]
pub struct DispatchOutcome {
    pub emails_sent: usize,
    pub emails_skipped_already_dispatched: usize,
    pub failures: usize,
}

/// Dispatch notifications for one completed run: resolve
/// profiles/templates/recipients, build per-plan emails, and deliver them
/// through `mailer`.
pub async fn dispatch_for_run(
    pool: &PgPool,
    mailer: &dyn Mailer,
    run_id: &str,
) -> Result<DispatchOutcome, SyncError> {
    let summary = load_run_summary(pool, run_id).await?;
    let documents = load_documents(pool, run_id).await?;
    let profiles = load_active_profiles(pool, &summary.pipeline_name).await?;

    let mut outcome = DispatchOutcome::default();

    for profile in profiles {
        let Some(template) = load_active_template(pool, profile.id).await? else {
            continue;
        };
        let recipients = load_recipients(pool, profile.id, &summary.run_env).await?;

        match profile.scope {
            NotificationScope::Global => {
                dispatch_one(
                    pool,
                    mailer,
                    run_id,
                    &profile,
                    &template,
                    &recipients,
                    &documents,
                    None,
                    &summary,
                    &mut outcome,
                )
                .await;
            }
            NotificationScope::PerStore => {
                let store_codes: BTreeSet<String> = recipients
                    .iter()
                    .filter_map(|r| r.store_code.clone())
                    .collect();
                for store_code in &store_codes {
                    dispatch_one(
                        pool,
                        mailer,
                        run_id,
                        &profile,
                        &template,
                        &recipients,
                        &documents,
                        Some(store_code.as_str()),
                        &summary,
                        &mut outcome,
                    )
                    .await;
                }
            }
        }
    }

    if outcome.failures > 0 && summary.overall_status == "ok" {
        sqlx::query(
            "UPDATE pipeline_run_summaries SET overall_status = 'warning' WHERE run_id = $1 AND overall_status = 'ok'",
        )
        .bind(run_id)
        .execute(pool)
        .await
        .map_err(|e| map_db_error("failed to downgrade run summary after dispatch failure", e))?;
    }

    Ok(outcome)
}

#[allow(clippy::too_many_arguments)]
async fn dispatch_one(
    pool: &PgPool,
    mailer: &dyn Mailer,
    run_id: &str,
    profile: &NotificationProfile,
    template: &Template,
    recipients: &[Recipient],
    documents: &[Document],
    store_code: Option<&str>,
    summary: &RunSummaryRow,
    outcome: &mut DispatchOutcome,
) {
    let scoped_recipients: Vec<&Recipient> = recipients
        .iter()
        .filter(|r| r.store_code.as_deref() == store_code)
        .collect();
    if scoped_recipients.is_empty() {
        return;
    }

    match already_dispatched(pool, run_id, profile.id, store_code).await {
        Ok(true) => {
            outcome.emails_skipped_already_dispatched += 1;
            return;
        }
        Ok(false) => {}
        Err(e) => {
            tracing::warn!(error = %e, "failed to check notification_dispatch_log, skipping to avoid a duplicate");
            outcome.failures += 1;
            return;
        }
    }

    let docs = filter_documents(documents, profile.attach_mode, store_code);
    let vars: Vec<(&str, &str)> = vec![
        ("run_id", run_id),
        ("pipeline_name", &summary.pipeline_name),
        ("overall_status", &summary.overall_status),
        ("summary_text", summary.summary_text.as_deref().unwrap_or("")),
        ("store_code", store_code.unwrap_or("")),
    ];
    let subject = render_template(&template.subject, &vars);
    let body = render_template(&template.body, &vars);

    let mut attachments = Vec::with_capacity(docs.len());
    for doc in &docs {
        match tokio::fs::read(&doc.file_path).await {
            Ok(bytes) => attachments.push(Attachment {
                file_name: doc
                    .file_path
                    .rsplit('/')
                    .next()
                    .unwrap_or(&doc.file_path)
                    .to_string(),
                bytes,
            }),
            Err(e) => {
                tracing::warn!(path = %doc.file_path, error = %e, "failed to read document for attachment");
            }
        }
    }

    let email = EmailEnvelope {
        to: scoped_recipients.iter().map(|r| r.email.clone()).collect(),
        subject,
        body,
        attachments,
    };

    match mailer.send(email).await {
        Ok(()) => {
            outcome.emails_sent += 1;
            if let Err(e) = record_dispatch(pool, run_id, profile.id, store_code).await {
                tracing::warn!(error = %e, "failed to record notification_dispatch_log row after send");
            }
        }
        Err(e) => {
            tracing::warn!(error = %e, "notification delivery failed");
            outcome.failures += 1;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::Mutex;

    #[derive(Default)]
    struct FakeMailer {
        sent: Mutex<Vec<EmailEnvelope>>,
    }

    #[async_trait]
    impl Mailer for FakeMailer {
        async fn send(&self, email: EmailEnvelope) -> Result<(), SyncError> {
            self.sent.lock().await.push(email);
            Ok(())
        }
    }

    fn doc(run_id: &str, store_code: Option<&str>, doc_type: &str) -> Document {
        Document {
            id: 1,
            run_id: run_id.to_string(),
            pipeline_name: "td_orders".to_string(),
            store_code: store_code.map(str::to_string),
            doc_type: doc_type.to_string(),
            doc_subtype: None,
            file_path: "/tmp/report.pdf".to_string(),
        }
    }

    #[test]
    fn render_template_substitutes_known_vars() {
        let out = render_template(
            "Run {{run_id}} for {{pipeline_name}} is {{overall_status}}",
            &[("run_id", "r1"), ("pipeline_name", "td_orders"), ("overall_status", "ok")],
        );
        assert_eq!(out, "Run r1 for td_orders is ok");
    }

    #[test]
    fn render_template_leaves_unknown_placeholders_untouched() {
        let out = render_template("Hello {{unknown}}", &[("run_id", "r1")]);
        assert_eq!(out, "Hello {{unknown}}");
    }

    #[test]
    fn attach_mode_none_selects_nothing() {
        let docs = vec![doc("r1", Some("A1"), "pdf")];
        assert!(filter_documents(&docs, AttachMode::None, Some("A1")).is_empty());
    }

    #[test]
    fn per_store_pdf_selects_a_single_matching_document() {
        let docs = vec![
            doc("r1", Some("A1"), "pdf"),
            doc("r1", Some("A1"), "pdf"),
            doc("r1", Some("B1"), "pdf"),
        ];
        let selected = filter_documents(&docs, AttachMode::PerStorePdf, Some("A1"));
        assert_eq!(selected.len(), 1);
        assert_eq!(selected[0].store_code.as_deref(), Some("A1"));
    }

    #[test]
    fn all_documents_selects_every_matching_scope_document() {
        let docs = vec![doc("r1", None, "pdf"), doc("r1", None, "csv"), doc("r1", Some("A1"), "pdf")];
        let selected = filter_documents(&docs, AttachMode::AllDocuments, None);
        assert_eq!(selected.len(), 2);
    }

    #[tokio::test]
    async fn fake_mailer_records_sent_emails() {
        let mailer = FakeMailer::default();
        mailer
            .send(EmailEnvelope {
                to: vec!["ops@example.com".to_string()],
                subject: "s".to_string(),
                body: "b".to_string(),
                attachments: Vec::new(),
            })
            .await
            .unwrap();
        assert_eq!(mailer.sent.lock().await.len(), 1);
    }
}
