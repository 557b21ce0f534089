//! Error taxonomy shared by the record layer, the registry and both codecs.

use thiserror::Error;

use crate::protocol::xdr::rpc::auth_stat;

#[derive(Debug, Error)]
pub enum RpcError {
    /// Transport failure, propagated verbatim.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The peer closed the stream on a record boundary.
    #[error("connection closed by peer")]
    ConnectionClosed,

    #[error("invalid record fragment size {0}")]
    InvalidFragmentSize(u32),

    #[error("record too large: {size} bytes exceeds maximum {max}")]
    RecordTooLarge { size: usize, max: usize },

    /// Malformed or truncated XDR inside a record.
    #[error("malformed RPC message: {0}")]
    Decode(#[source] std::io::Error),

    /// A value could not be represented in XDR.
    #[error("cannot encode RPC message: {0}")]
    Encode(#[source] std::io::Error),

    #[error("invalid RPC message type {0}")]
    InvalidMessageType(u32),

    #[error("reply for unknown call id {0}")]
    UnexpectedReplyId(u32),

    #[error("no RPC record is staged for reading")]
    NoRecordStaged,

    #[error("invalid procedure name {0:?}, expected \"Type.Method\"")]
    InvalidProcedureName(String),

    #[error("remote server has no such procedure")]
    ProcedureUnavailable,

    #[error("remote server has not exported program")]
    ProgramUnavailable,

    #[error("program version not supported, server supports {low} to {high}")]
    ProgramMismatch { low: u32, high: u32 },

    #[error("remote procedure cannot decode params")]
    GarbageArguments,

    #[error("system error on remote server")]
    SystemError,

    #[error("RPC version not supported, server supports {low} to {high}")]
    RpcVersionMismatch { low: u32, high: u32 },

    #[error("remote server rejected identity of the caller: {0:?}")]
    AuthenticationError(auth_stat),

    #[error("unrecognized RPC reply: {0}")]
    UnrecognizedReply(String),
}

impl RpcError {
    /// Whether a client connection can no longer be used after this error.
    ///
    /// Protocol-level rejections concern one call only; everything else
    /// leaves the stream in an unknown state. On the server side any error
    /// out of `read_request_header` ends the connection regardless.
    pub fn is_connection_fatal(&self) -> bool {
        !matches!(
            self,
            RpcError::ProcedureUnavailable
                | RpcError::ProgramUnavailable
                | RpcError::ProgramMismatch { .. }
                | RpcError::GarbageArguments
                | RpcError::SystemError
                | RpcError::RpcVersionMismatch { .. }
                | RpcError::AuthenticationError(_)
                | RpcError::UnrecognizedReply(_)
                | RpcError::InvalidProcedureName(_)
                | RpcError::NoRecordStaged
        )
    }
}

pub type Result<T> = std::result::Result<T, RpcError>;
