//! Heartbeat error types.

use thiserror::Error;

/// Errors raised while registering with or watching the master.
///
/// The supervisory loop itself never propagates errors; a lost master is
/// handled entirely by the self-termination policy.
#[derive(Debug, Error)]
pub enum HeartbeatError {
    #[error("link error: {0}")]
    Link(#[from] keeldb_link::LinkError),

    #[error("a process named '{name}' is already registered with the master")]
    AlreadyRegistered { name: String },

    #[error("registration payload error: {0}")]
    Payload(#[from] serde_json::Error),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_registered_display() {
        let err = HeartbeatError::AlreadyRegistered {
            name: "demodb".to_string(),
        };
        assert!(err.to_string().contains("demodb"));
    }
}
