use std::net::SocketAddr;

use num_enum::TryFromPrimitiveError;
use thiserror::Error;

use crate::msg::MessageType;
use crate::network::Role;

pub type Result<T> = core::result::Result<T, Error>;

/// Enumeration of errors that may occur during network operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("timed out")]
    TimedOut,
    #[error("socket not connected: {0}")]
    SocketNotConnected(SocketAddr),
    #[error("network was shut down")]
    NetworkShutdown,
    #[error("network already started")]
    AlreadyStarted,
    #[error("operation not available for {0} role")]
    WrongRole(Role),

    #[error("malformed frame: {0}")]
    MalformedFrame(String),
    #[error("frame of {0} bytes exceeds the limit of {1} bytes")]
    FrameTooLarge(usize, usize),
    #[error("unexpected message: {0}")]
    UnexpectedMessage(String),
    #[error("no sync object with id: {0}")]
    NoSuchSyncObject(String),
    #[error("failed requesting new response id: id pool exhausted")]
    RequestIdPoolExhausted,
    #[error("shutting down")]
    ShuttingDown,

    #[error("other: {0}")]
    Other(String),

    #[error("failed parsing int: {0}")]
    IntParseError(#[from] std::num::ParseIntError),
    #[error("failed parsing address: {0}")]
    AddrParseError(#[from] std::net::AddrParseError),

    #[error("io error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("bincode error: {0}")]
    BincodeError(#[from] bincode::Error),

    #[cfg(feature = "msgpack_encoding")]
    #[error("rmp_serde decode error: {0}")]
    RmpsDecodeError(#[from] rmp_serde::decode::Error),
    #[cfg(feature = "msgpack_encoding")]
    #[error("rmp_serde encode error: {0}")]
    RmpsEncodeError(#[from] rmp_serde::encode::Error),

    #[cfg(feature = "json_encoding")]
    #[error("serde_json error: {0}")]
    JsonError(#[from] serde_json::Error),

    #[error("unknown message code: {0}")]
    UnknownMsgCode(#[from] TryFromPrimitiveError<MessageType>),
}
