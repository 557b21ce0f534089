//! Server side of an RPC connection.
//!
//! [`ServerCodec`] turns call records into named procedure invocations and
//! procedure results into reply records. The methods take `&mut self`:
//! one connection is served by one sequential flow, and a front-end that
//! runs procedures concurrently must funnel their responses through a
//! single writer.

use std::io::Cursor;
use std::sync::Arc;

use tokio::io::{AsyncRead, AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tracing::{debug, warn};

use super::error::{Result, RpcError};
use super::record::{self, RecordConfig};
use super::registry::{ProcedureId, ProcedureRegistry};
use crate::protocol::xdr::rpc::{
    call_body, make_success_reply, opaque_auth, reply_body, rpc_body, rpc_msg, CALL, RPC_VERSION,
};
use crate::protocol::xdr::{deserialize, Deserialize, Serialize};

/// A decoded call, as returned by [`ServerCodec::read_request_header`].
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct RequestHeader {
    pub call_id: u32,
    /// Registered name of the procedure being called
    pub procedure: String,
    pub id: ProcedureId,
    /// Caller credentials; not interpreted.
    pub cred: opaque_auth,
}

/// Sun RPC server codec over one connection.
pub struct ServerCodec<S> {
    stream: S,
    registry: Arc<ProcedureRegistry>,
    config: RecordConfig,
    /// Current call record, positioned at its arguments.
    staged: Option<Cursor<Vec<u8>>>,
    close_signal: Option<(mpsc::UnboundedSender<String>, String)>,
    closed: bool,
}

impl<S> ServerCodec<S>
where
    S: AsyncRead + AsyncWrite + Unpin + Send,
{
    pub fn new(stream: S, registry: Arc<ProcedureRegistry>) -> Self {
        Self {
            stream,
            registry,
            config: RecordConfig::default(),
            staged: None,
            close_signal: None,
            closed: false,
        }
    }

    pub fn with_record_config(mut self, config: RecordConfig) -> Self {
        self.config = config;
        self
    }

    /// Sends `label` on `signal` when the codec is first closed.
    pub fn with_close_signal(
        mut self,
        signal: mpsc::UnboundedSender<String>,
        label: impl Into<String>,
    ) -> Self {
        self.close_signal = Some((signal, label.into()));
        self
    }

    pub fn get_ref(&self) -> &S {
        &self.stream
    }

    /// Reads the next call record and resolves the procedure it addresses.
    ///
    /// Any error means the connection should be closed: the stream is at a
    /// record boundary, but there is no reply that could report a header
    /// that failed to decode. An unknown (program, version, procedure)
    /// triple is reported as [`RpcError::ProcedureUnavailable`] whether or
    /// not the program itself is known, since the registry only holds full
    /// triples.
    pub async fn read_request_header(&mut self) -> Result<RequestHeader> {
        self.staged = None;

        let record = record::read_record(&mut self.stream, &self.config).await?;
        let mut cursor = Cursor::new(record);

        let call_id = deserialize::<u32>(&mut cursor).map_err(RpcError::Decode)?;
        let msg_type = deserialize::<u32>(&mut cursor).map_err(RpcError::Decode)?;
        if msg_type != CALL {
            warn!("Expected a call, got message type {} for xid:{}", msg_type, call_id);
            return Err(RpcError::InvalidMessageType(msg_type));
        }
        let call = deserialize::<call_body>(&mut cursor).map_err(RpcError::Decode)?;
        if call.rpcvers != RPC_VERSION {
            warn!("Invalid RPC version {} != {}", call.rpcvers, RPC_VERSION);
            return Err(RpcError::RpcVersionMismatch { low: RPC_VERSION, high: RPC_VERSION });
        }

        let id = ProcedureId::new(call.prog, call.vers, call.proc);
        let Some(procedure) = self.registry.name_of(id) else {
            debug!("No procedure registered for {} (xid:{})", id, call_id);
            return Err(RpcError::ProcedureUnavailable);
        };
        debug!("Received call xid:{} {} ({})", call_id, procedure, id);

        self.staged = Some(cursor);
        Ok(RequestHeader { call_id, procedure, id, cred: call.cred })
    }

    /// Decodes the staged call's arguments into `args`.
    ///
    /// With `None` nothing is decoded and the staged record is kept.
    pub async fn read_request_body<D>(&mut self, args: Option<&mut D>) -> Result<()>
    where
        D: Deserialize,
    {
        let Some(args) = args else {
            return Ok(());
        };
        let cursor = self.staged.as_mut().ok_or(RpcError::NoRecordStaged)?;
        args.deserialize(cursor).map_err(RpcError::Decode)
    }

    /// Replies to `call_id` with `result` as the procedure's results.
    ///
    /// The reply always reports `SUCCESS`. A `procedure_error` is only
    /// logged: reporting application failures to the caller is up to the
    /// result encoding chosen by the layer above.
    pub async fn write_response<R>(
        &mut self,
        call_id: u32,
        result: &R,
        procedure_error: Option<&str>,
    ) -> Result<()>
    where
        R: Serialize + ?Sized,
    {
        if let Some(error) = procedure_error {
            debug!("Procedure for xid:{} failed: {}", call_id, error);
        }
        let mut payload = Vec::new();
        make_success_reply(call_id).serialize(&mut payload).map_err(RpcError::Encode)?;
        result.serialize(&mut payload).map_err(RpcError::Encode)?;

        record::write_record(&mut self.stream, &payload, &self.config).await?;
        Ok(())
    }

    /// Replies to `call_id` with an arbitrary reply and no payload, for
    /// example `PROC_UNAVAIL` or a denied reply.
    pub async fn write_reply(&mut self, call_id: u32, reply: reply_body) -> Result<()> {
        let msg = rpc_msg { xid: call_id, body: rpc_body::REPLY(reply) };
        let mut payload = Vec::new();
        msg.serialize(&mut payload).map_err(RpcError::Encode)?;

        record::write_record(&mut self.stream, &payload, &self.config).await?;
        Ok(())
    }

    /// Closes the stream. Later calls do nothing.
    pub async fn close(&mut self) -> Result<()> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;
        self.staged = None;
        if let Some((signal, label)) = &self.close_signal {
            let _ = signal.send(label.clone());
        }
        self.stream.shutdown().await?;
        debug!("Server codec closed");
        Ok(())
    }
}
