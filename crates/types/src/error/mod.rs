//! Core error types for firelynx.

use thiserror::Error;

/// A trait for assigning a stable, machine-readable string code to an error.
pub trait ErrorCode {
    /// Returns the unique, stable string identifier for this error variant.
    fn code(&self) -> &'static str;
}

/// A configuration snapshot failed its structural or referential checks.
///
/// Validation failures are always terminal for the transaction that carried
/// the snapshot.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// An entry in the named collection has an empty ID.
    #[error("empty ID in {collection} collection")]
    EmptyId {
        /// Which collection the entry belongs to.
        collection: &'static str,
    },
    /// Two entries in the same collection share an ID.
    #[error("duplicate ID: {collection} {id}")]
    DuplicateId {
        /// Which collection the duplicate was found in.
        collection: &'static str,
        /// The duplicated ID.
        id: String,
    },
    /// Two listeners bind the same address.
    #[error("duplicate ID: listener address {address}")]
    DuplicateListenerAddress {
        /// The duplicated `host:port`.
        address: String,
    },
    /// A listener declared no bind address.
    #[error("listener {listener_id} has an empty address")]
    EmptyAddress {
        /// The offending listener.
        listener_id: String,
    },
    /// An endpoint references a listener that does not exist.
    #[error("endpoint {endpoint_id} references unknown listener {listener_id}")]
    UnknownListener {
        /// The referencing endpoint.
        endpoint_id: String,
        /// The unresolved listener ID.
        listener_id: String,
    },
    /// A route references an app that does not exist.
    #[error("endpoint {endpoint_id} references unknown app {app_id}")]
    UnknownApp {
        /// The referencing endpoint.
        endpoint_id: String,
        /// The unresolved app ID.
        app_id: String,
    },
    /// Two endpoints on one listener map the same `(method, path_prefix)`.
    #[error("duplicate route rule on listener {listener_id}: {method} {path_prefix}")]
    DuplicateRouteRule {
        /// The listener carrying both rules.
        listener_id: String,
        /// Normalized method filter (`*` for any).
        method: String,
        /// The duplicated path prefix.
        path_prefix: String,
    },
}

impl ErrorCode for ValidationError {
    fn code(&self) -> &'static str {
        match self {
            Self::EmptyId { .. } => "VALIDATION_EMPTY_ID",
            Self::DuplicateId { .. } => "VALIDATION_DUPLICATE_ID",
            Self::DuplicateListenerAddress { .. } => "VALIDATION_DUPLICATE_ADDRESS",
            Self::EmptyAddress { .. } => "VALIDATION_EMPTY_ADDRESS",
            Self::UnknownListener { .. } => "VALIDATION_UNKNOWN_LISTENER",
            Self::UnknownApp { .. } => "VALIDATION_UNKNOWN_APP",
            Self::DuplicateRouteRule { .. } => "VALIDATION_DUPLICATE_ROUTE_RULE",
        }
    }
}

/// Errors raised by the transaction state machine and the transaction store.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum TransactionError {
    /// Caller misuse, e.g. a negative retention bound.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The lifecycle FSM refused a transition. State is left unchanged.
    #[error("invalid state transition from {from} to {to}")]
    InvalidStateTransition {
        /// State the transaction was in.
        from: &'static str,
        /// State the caller asked for.
        to: &'static str,
    },
    /// A participant sub-state record refused a transition.
    #[error("invalid participant state transition for {participant}: {from} to {to}")]
    InvalidParticipantTransition {
        /// The participant whose record was addressed.
        participant: String,
        /// Sub-state the record was in.
        from: &'static str,
        /// Sub-state the caller asked for.
        to: &'static str,
    },
    /// A participant name was addressed that was never registered.
    #[error("participant {0} is not registered on this transaction")]
    UnknownParticipant(String),
    /// The snapshot failed validation; the transaction is terminally invalid.
    #[error("validation failed: {0}")]
    Validation(#[from] ValidationError),
    /// A wait was cancelled by the caller's context.
    #[error("operation cancelled")]
    Cancelled,
}

impl ErrorCode for TransactionError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::InvalidParticipantTransition { .. } => "INVALID_STATE_TRANSITION",
            Self::UnknownParticipant(_) => "NOT_FOUND",
            Self::Validation(_) => "VALIDATION_FAILURE",
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// Errors surfaced by participant saga hooks (stage, commit, compensate).
#[derive(Debug, Error)]
pub enum ParticipantError {
    /// Staging could not resolve a declared middleware kind.
    #[error("unsupported middleware type: {kind}")]
    UnsupportedMiddleware {
        /// The unrecognized kind string.
        kind: String,
    },
    /// Staging could not resolve a declared app.
    #[error("unsupported app: {detail}")]
    UnsupportedApp {
        /// App ID or kind that failed to resolve.
        detail: String,
    },
    /// A listener could not bind its address.
    #[error("failed to bind {address}: {source}")]
    Bind {
        /// The `host:port` that failed.
        address: String,
        /// The underlying socket error.
        #[source]
        source: std::io::Error,
    },
    /// The participant's serving task did not accept a spec in time.
    #[error("siphon send timed out after {timeout_ms}ms")]
    SiphonTimeout {
        /// The configured bound, in milliseconds.
        timeout_ms: u64,
    },
    /// Caller misuse, e.g. staging without a snapshot.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// The hook was cancelled by the caller's context.
    #[error("operation cancelled")]
    Cancelled,
    /// Any other hook failure, carried verbatim.
    #[error("{0}")]
    Other(String),
}

impl ErrorCode for ParticipantError {
    fn code(&self) -> &'static str {
        match self {
            Self::UnsupportedMiddleware { .. } => "UNSUPPORTED_MIDDLEWARE",
            Self::UnsupportedApp { .. } => "UNSUPPORTED_APP",
            Self::Bind { .. } => "BIND_FAILURE",
            Self::SiphonTimeout { .. } => "SIPHON_TIMEOUT",
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::Cancelled => "CANCELLED",
            Self::Other(_) => "PARTICIPANT_ERROR",
        }
    }
}

/// Errors raised by the saga orchestrator.
#[derive(Debug, Error)]
pub enum SagaError {
    /// Caller misuse, e.g. processing a transaction that is not validated.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),
    /// No transaction with the given ID is known.
    #[error("transaction not found: {0}")]
    NotFound(String),
    /// A participant did not report running within the reload timeout.
    #[error("participant {name} not ready within {timeout_ms}ms")]
    ParticipantNotReady {
        /// The participant that never became ready.
        name: String,
        /// The bound that was exceeded, in milliseconds.
        timeout_ms: u64,
    },
    /// A participant's stage hook failed.
    #[error("stage failed for participant {participant}: {source}")]
    Stage {
        /// The failing participant.
        participant: String,
        /// The hook error.
        #[source]
        source: ParticipantError,
    },
    /// A participant's commit hook failed.
    #[error("commit failed for participant {participant}: {source}")]
    Commit {
        /// The failing participant.
        participant: String,
        /// The hook error.
        #[source]
        source: ParticipantError,
    },
    /// A participant's compensation hook failed. Collected, never fatal to
    /// the compensation loop.
    #[error("compensation failed for participant {participant}: {source}")]
    Compensation {
        /// The failing participant.
        participant: String,
        /// The hook error.
        #[source]
        source: ParticipantError,
    },
    /// Registration rejected: the participant exposes its own reload
    /// capability, which would double-apply configuration.
    #[error("participant {0} exposes a unilateral reload capability; reload is owned by the orchestrator")]
    ReloadCapableParticipant(String),
    /// All participants staged, but the commit-across-participants phase
    /// failed. The current pointer still points at the live transaction.
    #[error("execution succeeded but reload failed: {0}")]
    ReloadFailed(String),
    /// Several participant errors, joined in deterministic order.
    #[error("{0}")]
    Joined(String),
    /// A transaction FSM operation failed.
    #[error(transparent)]
    Transaction(#[from] TransactionError),
    /// The operation was cancelled by the caller's context.
    #[error("operation cancelled")]
    Cancelled,
}

impl ErrorCode for SagaError {
    fn code(&self) -> &'static str {
        match self {
            Self::InvalidArgument(_) => "INVALID_ARGUMENT",
            Self::NotFound(_) => "NOT_FOUND",
            Self::ParticipantNotReady { .. } => "PARTICIPANT_NOT_READY",
            Self::Stage { .. } => "STAGE_FAILURE",
            Self::Commit { .. } => "COMMIT_FAILURE",
            Self::Compensation { .. } => "COMPENSATION_FAILURE",
            Self::ReloadCapableParticipant(_) => "INVALID_ARGUMENT",
            Self::ReloadFailed(_) => "COMMIT_FAILURE",
            Self::Joined(_) => "COMMIT_FAILURE",
            Self::Transaction(e) => e.code(),
            Self::Cancelled => "CANCELLED",
        }
    }
}

/// An application handler failed while serving a request. Mapped to HTTP
/// 500 at the routing layer; never tears down a serving task.
#[derive(Debug, Error)]
pub enum AppError {
    /// The handler rejected the request payload.
    #[error("bad request: {0}")]
    BadRequest(String),
    /// Any internal handler failure.
    #[error("handler error: {0}")]
    Internal(String),
}

impl ErrorCode for AppError {
    fn code(&self) -> &'static str {
        match self {
            Self::BadRequest(_) => "APP_BAD_REQUEST",
            Self::Internal(_) => "APP_INTERNAL",
        }
    }
}

/// Joins error messages in deterministic order for multi-participant
/// failure reporting.
pub fn join_errors<I, S>(errors: I) -> String
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    errors
        .into_iter()
        .map(|e| e.as_ref().to_string())
        .collect::<Vec<_>>()
        .join("; ")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn validation_duplicate_address_message() {
        let err = ValidationError::DuplicateListenerAddress {
            address: "127.0.0.1:8080".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "duplicate ID: listener address 127.0.0.1:8080"
        );
        assert_eq!(err.code(), "VALIDATION_DUPLICATE_ADDRESS");
    }

    #[test]
    fn transition_error_is_stable() {
        let err = TransactionError::InvalidStateTransition {
            from: "created",
            to: "succeeded",
        };
        assert_eq!(err.code(), "INVALID_STATE_TRANSITION");
    }

    #[test]
    fn join_errors_is_order_preserving() {
        assert_eq!(join_errors(["a", "b", "c"]), "a; b; c");
        assert_eq!(join_errors(Vec::<String>::new()), "");
    }
}
