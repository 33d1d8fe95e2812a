//! Security audit log
//!
//! Append-only record of every security-relevant action. Events are written
//! synchronously as part of the operation they describe; a failed audit write
//! must never mask or block the primary operation's outcome, so `record`
//! swallows backend errors after escalating them through `tracing::error!`.
//! There is no update or delete path.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sqlx::PgPool;
use std::sync::Mutex;
use uuid::Uuid;

use crate::store::StorageError;

/// Security-relevant actions. One event per attempt; retries produce
/// additional events, never overwrites.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AuditAction {
    EnrollmentStarted,
    EnrollmentCompleted,
    EnrollmentFailed,
    AuthenticationStarted,
    AuthenticationCompleted,
    AuthenticationFailed,
    TokenIntrospected,
    TokenRevoked,
}

impl AuditAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::EnrollmentStarted => "enrollment_started",
            Self::EnrollmentCompleted => "enrollment_completed",
            Self::EnrollmentFailed => "enrollment_failed",
            Self::AuthenticationStarted => "authentication_started",
            Self::AuthenticationCompleted => "authentication_completed",
            Self::AuthenticationFailed => "authentication_failed",
            Self::TokenIntrospected => "token_introspected",
            Self::TokenRevoked => "token_revoked",
        }
    }
}

/// A single audit event
#[derive(Debug, Clone, Serialize)]
pub struct AuditEvent {
    pub actor_email: Option<String>,
    pub actor_device: Option<Uuid>,
    pub actor_ip: String,
    pub action: AuditAction,
    pub resource_type: String,
    pub resource_id: Option<String>,
    pub success: bool,
    pub error_code: Option<String>,
    pub details: serde_json::Value,
    pub user_agent: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl AuditEvent {
    pub fn new(action: AuditAction, success: bool) -> Self {
        Self {
            actor_email: None,
            actor_device: None,
            actor_ip: "unknown".to_string(),
            action,
            resource_type: String::new(),
            resource_id: None,
            success,
            error_code: None,
            details: serde_json::json!({}),
            user_agent: None,
            timestamp: Utc::now(),
        }
    }

    pub fn actor_email(mut self, email: impl Into<String>) -> Self {
        self.actor_email = Some(email.into());
        self
    }

    pub fn actor_device(mut self, device_id: Uuid) -> Self {
        self.actor_device = Some(device_id);
        self
    }

    pub fn client(mut self, ip: impl Into<String>, user_agent: Option<String>) -> Self {
        self.actor_ip = ip.into();
        self.user_agent = user_agent;
        self
    }

    pub fn resource(mut self, resource_type: impl Into<String>, id: impl ToString) -> Self {
        self.resource_type = resource_type.into();
        self.resource_id = Some(id.to_string());
        self
    }

    pub fn error_code(mut self, code: impl Into<String>) -> Self {
        self.error_code = Some(code.into());
        self
    }

    pub fn details(mut self, details: serde_json::Value) -> Self {
        self.details = details;
        self
    }
}

enum Backend {
    Postgres(PgPool),
    Memory(Mutex<Vec<AuditEvent>>),
}

/// Append-only audit log
pub struct AuditLog {
    backend: Backend,
}

impl AuditLog {
    pub fn postgres(pool: PgPool) -> Self {
        Self {
            backend: Backend::Postgres(pool),
        }
    }

    pub fn in_memory() -> Self {
        Self {
            backend: Backend::Memory(Mutex::new(Vec::new())),
        }
    }

    /// Append an event.
    ///
    /// Never fails the caller: losing an audit record is bad, but masking a
    /// security decision behind an audit-storage failure is worse. Backend
    /// errors are escalated through the error log for alerting.
    pub async fn record(&self, event: AuditEvent) {
        tracing::info!(
            action = event.action.as_str(),
            success = event.success,
            error_code = event.error_code.as_deref().unwrap_or(""),
            resource = %format!("{}:{}", event.resource_type, event.resource_id.as_deref().unwrap_or("-")),
            "Audit event"
        );

        if let Err(e) = self.append(&event).await {
            tracing::error!(
                action = event.action.as_str(),
                error = %e,
                "AUDIT WRITE FAILED - event not persisted"
            );
        }
    }

    async fn append(&self, event: &AuditEvent) -> Result<(), StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                sqlx::query(
                    r#"
                    INSERT INTO audit_events
                        (actor_email, actor_device, actor_ip, action, resource_type,
                         resource_id, success, error_code, details, user_agent, occurred_at)
                    VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
                    "#,
                )
                .bind(&event.actor_email)
                .bind(event.actor_device)
                .bind(&event.actor_ip)
                .bind(event.action.as_str())
                .bind(&event.resource_type)
                .bind(&event.resource_id)
                .bind(event.success)
                .bind(&event.error_code)
                .bind(&event.details)
                .bind(&event.user_agent)
                .bind(event.timestamp)
                .execute(pool)
                .await?;
                Ok(())
            }
            Backend::Memory(events) => {
                events
                    .lock()
                    .expect("audit log mutex poisoned")
                    .push(event.clone());
                Ok(())
            }
        }
    }

    /// Most recent events, newest first. Used by tests and ops tooling; the
    /// admin console reads audit history straight from the table.
    pub async fn recent(&self, limit: usize) -> Result<Vec<AuditEvent>, StorageError> {
        match &self.backend {
            Backend::Postgres(pool) => {
                let rows: Vec<AuditRow> = sqlx::query_as(
                    r#"
                    SELECT actor_email, actor_device, actor_ip, action, resource_type,
                           resource_id, success, error_code, details, user_agent, occurred_at
                    FROM audit_events
                    ORDER BY id DESC
                    LIMIT $1
                    "#,
                )
                .bind(limit as i64)
                .fetch_all(pool)
                .await?;
                Ok(rows.into_iter().map(AuditRow::into_event).collect())
            }
            Backend::Memory(events) => {
                let events = events.lock().expect("audit log mutex poisoned");
                Ok(events.iter().rev().take(limit).cloned().collect())
            }
        }
    }
}

/// Database row for audit events
#[derive(sqlx::FromRow)]
struct AuditRow {
    actor_email: Option<String>,
    actor_device: Option<Uuid>,
    actor_ip: String,
    action: String,
    resource_type: String,
    resource_id: Option<String>,
    success: bool,
    error_code: Option<String>,
    details: serde_json::Value,
    user_agent: Option<String>,
    occurred_at: DateTime<Utc>,
}

impl AuditRow {
    fn into_event(self) -> AuditEvent {
        let action = match self.action.as_str() {
            "enrollment_started" => AuditAction::EnrollmentStarted,
            "enrollment_completed" => AuditAction::EnrollmentCompleted,
            "enrollment_failed" => AuditAction::EnrollmentFailed,
            "authentication_started" => AuditAction::AuthenticationStarted,
            "authentication_completed" => AuditAction::AuthenticationCompleted,
            "authentication_failed" => AuditAction::AuthenticationFailed,
            "token_revoked" => AuditAction::TokenRevoked,
            _ => AuditAction::TokenIntrospected,
        };
        AuditEvent {
            actor_email: self.actor_email,
            actor_device: self.actor_device,
            actor_ip: self.actor_ip,
            action,
            resource_type: self.resource_type,
            resource_id: self.resource_id,
            success: self.success,
            error_code: self.error_code,
            details: self.details,
            user_agent: self.user_agent,
            timestamp: self.occurred_at,
        }
    }
}

impl std::fmt::Debug for AuditLog {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let backend = match &self.backend {
            Backend::Postgres(_) => "PostgreSQL",
            Backend::Memory(_) => "Memory",
        };
        f.debug_struct("AuditLog").field("backend", &backend).finish()
    }
}
