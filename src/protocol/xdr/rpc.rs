//! ONC RPC message structures as defined in RFC 5531 section 9.
//!
//! A message is a transaction id followed by a discriminated union on the
//! message type. Unions are modelled as Rust enums: the discriminant is read
//! first, then exactly the fields of the matching arm. Unknown discriminants
//! are rejected with [`std::io::ErrorKind::InvalidData`].
//!
//! Procedure-specific arguments and results are not part of these types.
//! They follow the last field of `call_body` or of `accept_body::SUCCESS`
//! in the same record, so a decoder that has just read one of these
//! messages is positioned exactly at the payload.

// Type and variant names follow RFC 5531
#![allow(non_camel_case_types)]
#![allow(clippy::upper_case_acronyms)]

use std::io::{Read, Write};

use num_derive::{FromPrimitive, ToPrimitive};

use super::*;

/// The only RPC protocol version this crate speaks.
pub const RPC_VERSION: u32 = 2;

/// `msg_type` discriminant of a call.
pub const CALL: u32 = 0;
/// `msg_type` discriminant of a reply.
pub const REPLY: u32 = 1;

/// Why the server refused to authenticate a caller.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_stat {
    /// Success
    #[default]
    AUTH_OK = 0,
    /// Bad credential (seal broken)
    AUTH_BADCRED = 1,
    /// Client must begin new session
    AUTH_REJECTEDCRED = 2,
    /// Bad verifier (seal broken)
    AUTH_BADVERF = 3,
    /// Verifier expired or replayed
    AUTH_REJECTEDVERF = 4,
    /// Rejected for security reasons
    AUTH_TOOWEAK = 5,
    /// Bogus response verifier
    AUTH_INVALIDRESP = 6,
    /// Reason unknown
    AUTH_FAILED = 7,
    /// Kerberos generic error
    AUTH_KERB_GENERIC = 8,
    /// Time of credential expired
    AUTH_TIMEEXPIRE = 9,
    /// Problem with ticket file
    AUTH_TKT_FILE = 10,
    /// Can't decode authenticator
    AUTH_DECODE = 11,
    /// Wrong net address in ticket
    AUTH_NET_ADDR = 12,
    /// No credentials for user
    RPCSEC_GSS_CREDPROBLEM = 13,
    /// Problem with context
    RPCSEC_GSS_CTXPROBLEM = 14,
}
impl SerializeEnum for auth_stat {}
impl DeserializeEnum for auth_stat {}

/// Authentication flavors registered for ONC RPC.
///
/// Only `AUTH_NONE` is ever produced here; the others are recognised so
/// that a peer's credentials can be skipped over.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, FromPrimitive, ToPrimitive)]
#[repr(u32)]
pub enum auth_flavor {
    #[default]
    AUTH_NONE = 0,
    AUTH_SYS = 1,
    AUTH_SHORT = 2,
    AUTH_DH = 3,
    AUTH_KERB = 4,
    AUTH_RSA = 5,
    RPCSEC_GSS = 6,
    AUTH_TLS = 7,
}
impl SerializeEnum for auth_flavor {}
impl DeserializeEnum for auth_flavor {}

/// Credential or verifier: a flavor plus up to 400 bytes the flavor interprets.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct opaque_auth {
    pub flavor: auth_flavor,
    pub body: Vec<u8>,
}
DeserializeStruct!(opaque_auth, flavor, body);
SerializeStruct!(opaque_auth, flavor, body);

/// An RPC message: transaction id followed by a call or a reply.
///
/// The xid of a reply always echoes the xid of the call it answers. It is
/// a correlation value, not a sequence number.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct rpc_msg {
    pub xid: u32,
    pub body: rpc_body,
}
DeserializeStruct!(rpc_msg, xid, body);
SerializeStruct!(rpc_msg, xid, body);

/// Union on `msg_type`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum rpc_body {
    CALL(call_body),
    REPLY(reply_body),
}

impl Default for rpc_body {
    fn default() -> rpc_body {
        rpc_body::CALL(call_body::default())
    }
}

impl Serialize for rpc_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rpc_body::CALL(v) => {
                CALL.serialize(dest)?;
                v.serialize(dest)
            }
            rpc_body::REPLY(v) => {
                REPLY.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rpc_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            CALL => rpc_body::CALL(deserialize(src)?),
            REPLY => rpc_body::REPLY(deserialize(src)?),
            msg_type => {
                return Err(utils::invalid_data(&format!("invalid msg_type {msg_type}")));
            }
        };
        Ok(())
    }
}

/// Body of a call. Procedure arguments follow `verf` directly.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct call_body {
    /// Must be [`RPC_VERSION`]
    pub rpcvers: u32,
    pub prog: u32,
    pub vers: u32,
    pub proc: u32,
    pub cred: opaque_auth,
    pub verf: opaque_auth,
}
DeserializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);
SerializeStruct!(call_body, rpcvers, prog, vers, proc, cred, verf);

impl call_body {
    /// A version 2 call with null credentials and verifier.
    pub fn new(prog: u32, vers: u32, proc: u32) -> Self {
        Self { rpcvers: RPC_VERSION, prog, vers, proc, ..Default::default() }
    }
}

/// Union on `reply_stat`.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum reply_body {
    MSG_ACCEPTED(accepted_reply),
    MSG_DENIED(rejected_reply),
}

impl Default for reply_body {
    fn default() -> reply_body {
        reply_body::MSG_ACCEPTED(accepted_reply::default())
    }
}

impl Serialize for reply_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            reply_body::MSG_ACCEPTED(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            reply_body::MSG_DENIED(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for reply_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => reply_body::MSG_ACCEPTED(deserialize(src)?),
            1 => reply_body::MSG_DENIED(deserialize(src)?),
            reply_stat => {
                return Err(utils::invalid_data(&format!("invalid reply_stat {reply_stat}")));
            }
        };
        Ok(())
    }
}

/// Lowest and highest supported version, sent with a mismatch.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq)]
pub struct mismatch_info {
    pub low: u32,
    pub high: u32,
}
DeserializeStruct!(mismatch_info, low, high);
SerializeStruct!(mismatch_info, low, high);

/// Reply to a call the server accepted. Acceptance only means the
/// credentials were fine; `reply_data` says whether the call ran.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub struct accepted_reply {
    pub verf: opaque_auth,
    pub reply_data: accept_body,
}
DeserializeStruct!(accepted_reply, verf, reply_data);
SerializeStruct!(accepted_reply, verf, reply_data);

/// Union on `accept_stat`.
#[derive(Clone, Debug, Default, PartialEq, Eq)]
pub enum accept_body {
    /// The procedure ran; its results follow.
    #[default]
    SUCCESS,
    /// Program not exported by the server
    PROG_UNAVAIL,
    /// Program exported, but not in the requested version
    PROG_MISMATCH(mismatch_info),
    /// Program has no such procedure
    PROC_UNAVAIL,
    /// Arguments could not be decoded
    GARBAGE_ARGS,
    /// Memory allocation failure or similar on the server
    SYSTEM_ERR,
}

impl Serialize for accept_body {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            accept_body::SUCCESS => 0_u32.serialize(dest),
            accept_body::PROG_UNAVAIL => 1_u32.serialize(dest),
            accept_body::PROG_MISMATCH(v) => {
                2_u32.serialize(dest)?;
                v.serialize(dest)
            }
            accept_body::PROC_UNAVAIL => 3_u32.serialize(dest),
            accept_body::GARBAGE_ARGS => 4_u32.serialize(dest),
            accept_body::SYSTEM_ERR => 5_u32.serialize(dest),
        }
    }
}

impl Deserialize for accept_body {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => accept_body::SUCCESS,
            1 => accept_body::PROG_UNAVAIL,
            2 => accept_body::PROG_MISMATCH(deserialize(src)?),
            3 => accept_body::PROC_UNAVAIL,
            4 => accept_body::GARBAGE_ARGS,
            5 => accept_body::SYSTEM_ERR,
            accept_stat => {
                return Err(utils::invalid_data(&format!("invalid accept_stat {accept_stat}")));
            }
        };
        Ok(())
    }
}

/// Union on `reject_stat`: the call was refused before it was looked at.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum rejected_reply {
    /// Unsupported RPC version; carries the supported range
    RPC_MISMATCH(mismatch_info),
    /// Caller's credentials were refused
    AUTH_ERROR(auth_stat),
}

impl Default for rejected_reply {
    fn default() -> rejected_reply {
        rejected_reply::AUTH_ERROR(auth_stat::default())
    }
}

impl Serialize for rejected_reply {
    fn serialize<W: Write>(&self, dest: &mut W) -> std::io::Result<()> {
        match self {
            rejected_reply::RPC_MISMATCH(v) => {
                0_u32.serialize(dest)?;
                v.serialize(dest)
            }
            rejected_reply::AUTH_ERROR(v) => {
                1_u32.serialize(dest)?;
                v.serialize(dest)
            }
        }
    }
}

impl Deserialize for rejected_reply {
    fn deserialize<R: Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        *self = match deserialize::<u32>(src)? {
            0 => rejected_reply::RPC_MISMATCH(deserialize(src)?),
            1 => rejected_reply::AUTH_ERROR(deserialize(src)?),
            reject_stat => {
                return Err(utils::invalid_data(&format!("invalid reject_stat {reject_stat}")));
            }
        };
        Ok(())
    }
}

/// Builds a call message with null credentials.
pub fn call_message(xid: u32, prog: u32, vers: u32, proc: u32) -> rpc_msg {
    rpc_msg { xid, body: rpc_body::CALL(call_body::new(prog, vers, proc)) }
}

/// Builds an accepted reply with a null verifier and the given status.
pub fn accepted_reply_message(xid: u32, reply_data: accept_body) -> rpc_msg {
    let reply =
        reply_body::MSG_ACCEPTED(accepted_reply { verf: opaque_auth::default(), reply_data });
    rpc_msg { xid, body: rpc_body::REPLY(reply) }
}

/// Builds a denied reply.
pub fn rejected_reply_message(xid: u32, rejection: rejected_reply) -> rpc_msg {
    rpc_msg { xid, body: rpc_body::REPLY(reply_body::MSG_DENIED(rejection)) }
}

/// Creates a successful reply header; the procedure results go after it.
pub fn make_success_reply(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::SUCCESS)
}

pub fn proc_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::PROC_UNAVAIL)
}

pub fn prog_unavail_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::PROG_UNAVAIL)
}

/// Program version mismatch where the server supports exactly `accepted_ver`.
pub fn prog_mismatch_reply_message(xid: u32, accepted_ver: u32) -> rpc_msg {
    accepted_reply_message(
        xid,
        accept_body::PROG_MISMATCH(mismatch_info { low: accepted_ver, high: accepted_ver }),
    )
}

pub fn garbage_args_reply_message(xid: u32) -> rpc_msg {
    accepted_reply_message(xid, accept_body::GARBAGE_ARGS)
}

/// RPC version mismatch advertising version 2 as the only one supported.
pub fn rpc_vers_mismatch(xid: u32) -> rpc_msg {
    rejected_reply_message(
        xid,
        rejected_reply::RPC_MISMATCH(mismatch_info { low: RPC_VERSION, high: RPC_VERSION }),
    )
}
