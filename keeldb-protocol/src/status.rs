//! Connect status codes, connect types, and HA node states.

use crate::error::ProtocolError;
use std::fmt;

/// Status codes carried in the first `i32` of a connect reply payload.
///
/// These values are part of the protocol contract and must remain stable
/// across versions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum ConnectStatus {
    /// Handshake succeeded; the connection is usable.
    Connected = 0,
    /// A process with the same identity is already registered.
    AlreadyExists = 1,
    /// The master accepted the request (heartbeat registration path).
    RequestAccepted = 2,
    /// The target server is still booting; the client may retry.
    Started = 3,
    /// The master resolved the server; reconnect to the returned port.
    ConnectedNew = 4,
    /// The server is replaying its log and not yet accepting clients.
    IsRecovering = 5,
    /// The server reached its client connection limit.
    ClientsExceeded = 6,
    /// The client's address is not permitted to reach the server.
    InaccessibleIp = 7,
    /// No server with the requested name is registered.
    NotFound = 8,
    /// The server is registered but unresponsive.
    Hang = 9,
}

impl ConnectStatus {
    /// Returns whether the master follows this status with an ERROR packet
    /// carrying human-readable detail.
    pub fn carries_error_detail(&self) -> bool {
        matches!(
            self,
            ConnectStatus::IsRecovering
                | ConnectStatus::ClientsExceeded
                | ConnectStatus::InaccessibleIp
        )
    }
}

impl TryFrom<i32> for ConnectStatus {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(ConnectStatus::Connected),
            1 => Ok(ConnectStatus::AlreadyExists),
            2 => Ok(ConnectStatus::RequestAccepted),
            3 => Ok(ConnectStatus::Started),
            4 => Ok(ConnectStatus::ConnectedNew),
            5 => Ok(ConnectStatus::IsRecovering),
            6 => Ok(ConnectStatus::ClientsExceeded),
            7 => Ok(ConnectStatus::InaccessibleIp),
            8 => Ok(ConnectStatus::NotFound),
            9 => Ok(ConnectStatus::Hang),
            other => Err(ProtocolError::InvalidStatusCode(other)),
        }
    }
}

impl fmt::Display for ConnectStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectStatus::Connected => write!(f, "SERVER_CONNECTED"),
            ConnectStatus::AlreadyExists => write!(f, "SERVER_ALREADY_EXISTS"),
            ConnectStatus::RequestAccepted => write!(f, "SERVER_REQUEST_ACCEPTED"),
            ConnectStatus::Started => write!(f, "SERVER_STARTED"),
            ConnectStatus::ConnectedNew => write!(f, "SERVER_CONNECTED_NEW"),
            ConnectStatus::IsRecovering => write!(f, "SERVER_IS_RECOVERING"),
            ConnectStatus::ClientsExceeded => write!(f, "SERVER_CLIENTS_EXCEEDED"),
            ConnectStatus::InaccessibleIp => write!(f, "SERVER_INACCESSIBLE_IP"),
            ConnectStatus::NotFound => write!(f, "SERVER_NOT_FOUND"),
            ConnectStatus::Hang => write!(f, "SERVER_HANG"),
        }
    }
}

/// Connect types carried as the function code of the connect COMMAND packet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u16)]
pub enum ConnectType {
    /// Connect through the master to a named database server.
    ToServer = 1,
    /// Administrative/info connection to the master itself.
    Info = 2,
    /// Heartbeat process registration channel.
    HbProc = 3,
}

impl TryFrom<u16> for ConnectType {
    type Error = ProtocolError;

    fn try_from(value: u16) -> Result<Self, ProtocolError> {
        match value {
            1 => Ok(ConnectType::ToServer),
            2 => Ok(ConnectType::Info),
            3 => Ok(ConnectType::HbProc),
            other => Err(ProtocolError::InvalidConnectType(other)),
        }
    }
}

/// HA role of a database node.
///
/// Transitions are decided by the master's heartbeat logic; this substrate
/// only transmits and receives the value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(i32)]
pub enum HaState {
    Na = 0,
    Unknown = 1,
    Master = 2,
    ToBeMaster = 3,
    Slave = 4,
    ToBeSlave = 5,
    Replica = 6,
    Dead = 7,
}

impl TryFrom<i32> for HaState {
    type Error = ProtocolError;

    fn try_from(value: i32) -> Result<Self, ProtocolError> {
        match value {
            0 => Ok(HaState::Na),
            1 => Ok(HaState::Unknown),
            2 => Ok(HaState::Master),
            3 => Ok(HaState::ToBeMaster),
            4 => Ok(HaState::Slave),
            5 => Ok(HaState::ToBeSlave),
            6 => Ok(HaState::Replica),
            7 => Ok(HaState::Dead),
            other => Err(ProtocolError::InvalidHaState(other)),
        }
    }
}

impl fmt::Display for HaState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            HaState::Na => write!(f, "na"),
            HaState::Unknown => write!(f, "unknown"),
            HaState::Master => write!(f, "master"),
            HaState::ToBeMaster => write!(f, "to-be-master"),
            HaState::Slave => write!(f, "slave"),
            HaState::ToBeSlave => write!(f, "to-be-slave"),
            HaState::Replica => write!(f, "replica"),
            HaState::Dead => write!(f, "dead"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connect_status_roundtrip() {
        for code in 0..=9 {
            let status = ConnectStatus::try_from(code).unwrap();
            assert_eq!(status as i32, code);
        }
        assert!(matches!(
            ConnectStatus::try_from(42),
            Err(ProtocolError::InvalidStatusCode(42))
        ));
    }

    #[test]
    fn test_connect_status_display() {
        assert_eq!(ConnectStatus::Connected.to_string(), "SERVER_CONNECTED");
        assert_eq!(ConnectStatus::Hang.to_string(), "SERVER_HANG");
        assert_eq!(
            ConnectStatus::ConnectedNew.to_string(),
            "SERVER_CONNECTED_NEW"
        );
    }

    #[test]
    fn test_error_detail_statuses() {
        assert!(ConnectStatus::IsRecovering.carries_error_detail());
        assert!(ConnectStatus::ClientsExceeded.carries_error_detail());
        assert!(ConnectStatus::InaccessibleIp.carries_error_detail());

        assert!(!ConnectStatus::Connected.carries_error_detail());
        assert!(!ConnectStatus::Started.carries_error_detail());
        assert!(!ConnectStatus::NotFound.carries_error_detail());
        assert!(!ConnectStatus::Hang.carries_error_detail());
    }

    #[test]
    fn test_connect_type_roundtrip() {
        for code in 1..=3u16 {
            let ct = ConnectType::try_from(code).unwrap();
            assert_eq!(ct as u16, code);
        }
        assert!(matches!(
            ConnectType::try_from(0),
            Err(ProtocolError::InvalidConnectType(0))
        ));
    }

    #[test]
    fn test_ha_state_roundtrip() {
        for code in 0..=7 {
            let state = HaState::try_from(code).unwrap();
            assert_eq!(state as i32, code);
        }
        assert!(matches!(
            HaState::try_from(-1),
            Err(ProtocolError::InvalidHaState(-1))
        ));
        assert_eq!(HaState::ToBeMaster.to_string(), "to-be-master");
    }
}
