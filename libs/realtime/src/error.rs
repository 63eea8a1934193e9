//! Failure taxonomy for the realtime layer.

use std::time::Duration;

use thiserror::Error;

/// Errors surfaced by the realtime layer. Connection problems feed the
/// reconnect machinery and are never raised per user action; the rest
/// describe the fate of an individual write.
#[derive(Debug, Clone, Error)]
pub enum RealtimeError {
    /// The gateway could not be reached or the socket dropped.
    #[error("gateway unreachable: {0}")]
    Connection(String),

    /// No acknowledgment arrived within the configured bound.
    #[error("no acknowledgment within {0:?}")]
    DeliveryTimeout(Duration),

    /// Every delivery path was exhausted without a confirmation.
    #[error("delivery failed: {0}")]
    DeliveryFailure(String),

    /// A second confirmation arrived for an already-reconciled write.
    #[error("conflicting confirmation for idempotency key {0}")]
    ReconciliationConflict(String),

    /// The server rejected the action outright; retrying cannot help.
    #[error("permission denied: {0}")]
    PermissionDenied(String),
}

impl RealtimeError {
    /// Whether retrying the same action can ever succeed.
    pub fn is_retriable(&self) -> bool {
        matches!(
            self,
            RealtimeError::Connection(_)
                | RealtimeError::DeliveryTimeout(_)
                | RealtimeError::DeliveryFailure(_)
        )
    }
}
