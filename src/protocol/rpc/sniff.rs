//! Recognises the start of an RPC call record.
//!
//! Lets a listener that multiplexes several protocols on one port decide
//! whether a new connection speaks Sun RPC. It only looks at bytes that
//! were peeked or copied; the authoritative stream is never read.

use std::io::{Cursor, ErrorKind};

use super::record::fragment_size;
use crate::protocol::xdr::deserialize;
use crate::protocol::xdr::rpc::{call_body, CALL, RPC_VERSION};

/// Smallest call message: xid, msg_type, rpcvers, prog, vers, proc and two
/// empty `opaque_auth`s.
pub const MIN_CALL_LEN: usize = 4 * 10;

const FRAGMENT_HEADER_LEN: usize = 4;

/// Whether `peeked` starts with a record fragment holding a well-formed
/// version 2 call header.
pub fn is_rpc_call(peeked: &[u8]) -> bool {
    sniff_call(peeked) == Some(true)
}

/// Like [`is_rpc_call`], but `None` when `peeked` ends before a verdict is
/// possible and more bytes could still change it.
///
/// The call header must fit inside the first fragment. A call whose first
/// fragment is shorter than its header is legal on the wire but is not
/// recognised.
pub fn sniff_call(peeked: &[u8]) -> Option<bool> {
    let (header, body) = peeked.split_first_chunk::<FRAGMENT_HEADER_LEN>()?;
    let header = u32::from_be_bytes(*header);
    let length = fragment_size(header) as usize;
    if length < MIN_CALL_LEN {
        return Some(false);
    }
    let truncated = body.len() < length;
    let visible = &body[..length.min(body.len())];

    let mut cursor = Cursor::new(visible);
    let parsed = deserialize::<u32>(&mut cursor)
        .and_then(|_xid| deserialize::<u32>(&mut cursor))
        .and_then(|msg_type| {
            if msg_type != CALL {
                return Err(ErrorKind::InvalidData.into());
            }
            deserialize::<call_body>(&mut cursor)
        });
    match parsed {
        Ok(call) => Some(call.rpcvers == RPC_VERSION),
        // Ran out of bytes: wait for more unless the fragment itself ended.
        Err(e) if e.kind() == ErrorKind::UnexpectedEof && truncated => None,
        Err(_) => Some(false),
    }
}
