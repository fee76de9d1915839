//! Heartbeat process registration descriptor.

use crate::error::HeartbeatError;
use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Environment variable the master sets so a supervised worker registers
/// under the pid the master assigned it.
pub const PID_ENV: &str = "KEELDB_PID";

/// Kind of supervised worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ProcType {
    /// A database server process.
    Server,
    /// A replication agent.
    Replication,
}

/// Descriptor sent to the master once per process lifetime at startup.
///
/// Consumed by the master, never mutated after send.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProcessRegistration {
    /// Registered process/server name.
    pub name: String,
    /// Worker kind.
    pub proc_type: ProcType,
    /// Process id, from [`PID_ENV`] or the OS.
    pub pid: u32,
    /// Executable path for master-driven restart.
    pub exec_path: PathBuf,
    /// Argument vector for master-driven restart.
    pub args: Vec<String>,
    /// Log path; set for replication agents.
    pub log_path: Option<PathBuf>,
}

impl ProcessRegistration {
    /// Builds a descriptor for the current process.
    pub fn for_current_process(name: impl Into<String>, proc_type: ProcType) -> Self {
        Self {
            name: name.into(),
            proc_type,
            pid: pid_from_env(),
            exec_path: std::env::current_exe().unwrap_or_default(),
            args: std::env::args().collect(),
            log_path: None,
        }
    }

    pub fn with_log_path(mut self, path: impl Into<PathBuf>) -> Self {
        self.log_path = Some(path.into());
        self
    }

    /// Serializes the descriptor into the opaque wire payload.
    pub fn to_payload(&self) -> Result<Vec<u8>, HeartbeatError> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Deserializes a descriptor from its wire payload.
    pub fn from_payload(payload: &[u8]) -> Result<Self, HeartbeatError> {
        Ok(serde_json::from_slice(payload)?)
    }
}

fn pid_from_env() -> u32 {
    std::env::var(PID_ENV)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or_else(std::process::id)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_roundtrip() {
        let reg = ProcessRegistration {
            name: "demodb".to_string(),
            proc_type: ProcType::Replication,
            pid: 4242,
            exec_path: PathBuf::from("/usr/bin/keeldb_repl"),
            args: vec!["keeldb_repl".to_string(), "demodb".to_string()],
            log_path: Some(PathBuf::from("/var/log/keeldb/repl.log")),
        };

        let payload = reg.to_payload().unwrap();
        let decoded = ProcessRegistration::from_payload(&payload).unwrap();
        assert_eq!(decoded, reg);
    }

    #[test]
    fn test_proc_type_wire_names() {
        let json = serde_json::to_string(&ProcType::Server).unwrap();
        assert_eq!(json, "\"SERVER\"");
        let json = serde_json::to_string(&ProcType::Replication).unwrap();
        assert_eq!(json, "\"REPLICATION\"");
    }

    #[test]
    fn test_for_current_process() {
        let reg = ProcessRegistration::for_current_process("demodb", ProcType::Server);
        assert_eq!(reg.name, "demodb");
        assert_eq!(reg.proc_type, ProcType::Server);
        assert!(reg.pid > 0);
        assert!(!reg.args.is_empty());
        assert!(reg.log_path.is_none());

        let reg = reg.with_log_path("/tmp/agent.log");
        assert_eq!(reg.log_path, Some(PathBuf::from("/tmp/agent.log")));
    }

    #[test]
    fn test_bad_payload_rejected() {
        assert!(ProcessRegistration::from_payload(b"not json").is_err());
    }
}
