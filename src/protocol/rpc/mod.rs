//! ONC RPC version 2 over stream transports (RFC 5531, previously RFC 1057).
//!
//! The pieces, leaf first:
//!
//! 1. `record`: record marking, framing whole messages over a byte stream
//! 2. `registry`: (program, version, procedure) to `"Type.Method"` names
//! 3. `client`: call records out, reply records in, correlated by call id
//! 4. `server`: call records in, reply records out
//!
//! Both codecs read a whole record before decoding anything, then decode
//! the message header and the procedure payload from one cursor over that
//! record. The header read stages the record; the body read consumes it.
//!
//! Only `AUTH_NONE` credentials are produced and inbound credentials are
//! not checked. UDP is not supported.

mod client;
mod error;
pub mod record;
mod registry;
mod server;
pub mod sniff;
mod transport;

pub use client::{ClientCodec, ResponseHeader};
pub use error::{Result, RpcError};
pub use record::{read_record, write_record, RecordConfig, MAX_FRAGMENT_SIZE};
pub use registry::{Procedure, ProcedureId, ProcedureRegistry};
pub use server::{RequestHeader, ServerCodec};
pub use transport::{ReadCloser, SplitTransport, Transport};
