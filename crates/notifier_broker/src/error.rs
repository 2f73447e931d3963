use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    #[error("Dbus connection error")]
    DbusError(#[from] zbus::Error),
    #[error("could not set up the bus connection: {0}")]
    Connection(String),
    #[error("a StatusNotifierHost is already registered: {0}")]
    AlreadyRegistered(String),
    #[error("peer {0} is not reachable anymore")]
    PeerGone(String),
    #[error("malformed {what} reply: {detail}")]
    MalformedReply { what: &'static str, detail: String },
    #[error("not provided by the peer: {0}")]
    Unsupported(String),
    #[error("invalid arguments: {0}")]
    InvalidArgs(String),
    #[error("Service path {0} was not understood")]
    DbusAddressError(String),
}

impl Error {
    /// Whether the failure means the peer left the bus, in which case its items are dropped.
    pub fn is_peer_gone(&self) -> bool {
        matches!(self, Error::PeerGone(_))
    }
}

pub type Result<T> = std::result::Result<T, Error>;
