use serde_json::Value as JsonValue;
use uuid::Uuid;

/// Emit a security audit event to the tracing pipeline.
///
/// Failures are logged at warn so they survive the default production filter.
pub fn security_event(event_type: &str, success: bool, account_id: Option<&Uuid>, fingerprint: Option<&str>, metadata: Option<JsonValue>) {
    let account = account_id.map(|id| id.to_string());
    let metadata = metadata.map(|m| m.to_string());

    if success {
        tracing::info!(
            category = "audit",
            event_type = event_type,
            success = success,
            account_id = account.as_deref().unwrap_or("-"),
            fingerprint = fingerprint.unwrap_or("-"),
            metadata = metadata.as_deref().unwrap_or("-"),
            "security audit event"
        );
    } else {
        tracing::warn!(
            category = "audit",
            event_type = event_type,
            success = success,
            account_id = account.as_deref().unwrap_or("-"),
            fingerprint = fingerprint.unwrap_or("-"),
            metadata = metadata.as_deref().unwrap_or("-"),
            "security audit event (failure)"
        );
    }
}
