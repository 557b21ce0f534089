//! sunrpc - ONC/Sun RPC version 2 codecs for stream transports
//!
//! This library implements the wire side of ONC RPC: record marking over a
//! byte stream, the XDR-encoded call and reply messages, and a pair of
//! codecs that adapt them to "call a remote procedure by name". Procedure
//! names of the form `"Type.Method"` are mapped to the numeric
//! (program, version, procedure) triple by a shared registry.
//!
//! ## Main Components
//!
//! - `xdr`: XDR encoding traits and the RPC message structures, including
//!   the discriminated reply unions.
//!
//! - `protocol::rpc`: record marking, the procedure registry, and the
//!   [`ClientCodec`](protocol::rpc::ClientCodec) and
//!   [`ServerCodec`](protocol::rpc::ServerCodec).
//!
//! - `tcp`: listener, dialer and protocol sniffing over TCP.
//!
//! ## Standards Compliance
//!
//! - RFC 5531: RPC: Remote Procedure Call Protocol Specification Version 2
//! - RFC 4506: XDR: External Data Representation Standard
//!
//! ## Usage
//!
//! Register procedures in a [`ProcedureRegistry`](protocol::rpc::ProcedureRegistry),
//! share it between codecs, and drive the codecs from a front-end that
//! assigns call ids and dispatches by procedure name.

pub mod protocol;
pub mod tcp;

pub use protocol::xdr;
