//! Protocol implementation.
//!
//! - `xdr`: External Data Representation (RFC 4506) traits and the RPC
//!   message structures.
//! - `rpc`: record marking, the procedure registry and the client and
//!   server codecs.

pub mod rpc;
pub mod xdr;
