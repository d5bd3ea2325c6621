//! Error taxonomy shared by the routers and the pipeline coordinator.
//!
//! Collaborator failures (`MailError`, `ClassifyError`, `NotifyError`) are
//! converted into [`ScoutError`] at the coordinator boundary — no raw
//! collaborator error type ever reaches a router or a protocol caller.
//! Every variant maps to a stable `errorKind` string in the response
//! envelope, so callers can always tell "no data yet" (`NotFound`) apart
//! from "the upstream call failed" (`UpstreamUnavailable`).

use thiserror::Error;

/// Pipeline stage identifier, used in error reporting and run summaries.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Stage {
    Fetch,
    Classify,
    Notify,
    Delete,
}

impl std::fmt::Display for Stage {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Stage::Fetch => write!(f, "fetch"),
            Stage::Classify => write!(f, "classify"),
            Stage::Notify => write!(f, "notify"),
            Stage::Delete => write!(f, "delete"),
        }
    }
}

#[derive(Debug, Error)]
pub enum ScoutError {
    /// Malformed caller input (both/neither of index/title, wrong types).
    /// Never retried.
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// Query target absent — no cached data yet, or no matching paper.
    #[error("not found: {0}")]
    NotFound(String),

    /// An upstream collaborator call failed (network, auth, quota, timeout).
    /// The prior cache state is preserved; the caller may retry.
    #[error("{stage} stage unavailable: {message}")]
    Upstream { stage: Stage, message: String },

    /// Invariant violation. Fatal to the request, logged, never swallowed.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ScoutError {
    pub fn invalid(msg: impl Into<String>) -> Self {
        ScoutError::InvalidArgument(msg.into())
    }

    pub fn not_found(msg: impl Into<String>) -> Self {
        ScoutError::NotFound(msg.into())
    }

    pub fn upstream(stage: Stage, err: impl std::fmt::Display) -> Self {
        ScoutError::Upstream {
            stage,
            message: err.to_string(),
        }
    }

    /// Stable taxonomy name for the response envelope's `errorKind` field.
    pub fn kind(&self) -> &'static str {
        match self {
            ScoutError::InvalidArgument(_) => "InvalidArgument",
            ScoutError::NotFound(_) => "NotFound",
            ScoutError::Upstream { .. } => "UpstreamUnavailable",
            ScoutError::Internal(_) => "Internal",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn kind_matches_variant() {
        assert_eq!(ScoutError::invalid("x").kind(), "InvalidArgument");
        assert_eq!(ScoutError::not_found("x").kind(), "NotFound");
        assert_eq!(
            ScoutError::upstream(Stage::Fetch, "boom").kind(),
            "UpstreamUnavailable"
        );
        assert_eq!(ScoutError::Internal("x".into()).kind(), "Internal");
    }

    #[test]
    fn upstream_message_names_the_stage() {
        let e = ScoutError::upstream(Stage::Classify, "quota exceeded");
        assert_eq!(e.to_string(), "classify stage unavailable: quota exceeded");
    }
}
