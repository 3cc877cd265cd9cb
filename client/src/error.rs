use shared::ProtocolError;
use thiserror::Error;

/// Errors surfaced by the connection and the servo client
///
/// UI layers map these to user-facing messages; nothing here triggers an
/// automatic reconnect.
#[derive(Debug, Error)]
pub enum RcError {
    #[error("could not resolve host {host}")]
    UnknownHost { host: String },

    #[error("network I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid password")]
    InvalidPassword,

    #[error("host rejected the authentication request")]
    HostRejected,

    #[error("illegal state: {0}")]
    IllegalState(&'static str),

    #[error("invalid data: {0}")]
    InvalidData(#[from] ProtocolError),
}

impl RcError {
    /// True for transport failures after which the caller should rebuild or disconnect
    pub fn is_transport(&self) -> bool {
        matches!(self, RcError::Io(_))
    }
}
