//! Client side of an RPC connection.
//!
//! [`ClientCodec`] turns named procedure invocations into call records and
//! reply records back into per-call outcomes. It does not pair requests with
//! responses itself: a front-end assigns call ids, runs one reader loop over
//! [`ClientCodec::read_response_header`] and [`ClientCodec::read_response_body`],
//! and hands each result to whoever is waiting for that id. Any number of
//! tasks may call [`ClientCodec::write_request`] concurrently.

use std::collections::HashMap;
use std::io::Cursor;
use std::sync::{Arc, Mutex, PoisonError};

use tokio::io::AsyncWriteExt;
use tokio::sync::{mpsc, watch, Mutex as AsyncMutex};
use tracing::{debug, warn};

use super::error::{Result, RpcError};
use super::record::{self, RecordConfig};
use super::registry::ProcedureRegistry;
use super::transport::{ReadCloser, Transport};
use crate::protocol::xdr::rpc::{accept_body, call_message, rejected_reply, reply_body, REPLY};
use crate::protocol::xdr::{deserialize, Deserialize, Serialize};

/// Outcome of one reply as read by [`ClientCodec::read_response_header`].
#[derive(Debug)]
pub struct ResponseHeader {
    /// Call id echoed by the server
    pub call_id: u32,
    /// Procedure name the call was sent with
    pub procedure: String,
    /// `Ok` if the server ran the procedure and its results follow;
    /// otherwise the protocol-level reason it did not.
    pub result: Result<()>,
}

struct ReadState<R> {
    stream: R,
    staged: Option<Cursor<Vec<u8>>>,
}

/// Sun RPC client codec over one connection.
pub struct ClientCodec<T: Transport> {
    reader: AsyncMutex<ReadState<T::Reader>>,
    writer: AsyncMutex<T::Writer>,
    read_closer: Option<ReadCloser>,
    /// Procedure names of calls written but not yet answered, by call id.
    pending: Mutex<HashMap<u32, String>>,
    registry: Arc<ProcedureRegistry>,
    config: RecordConfig,
    close_signal: Option<(mpsc::UnboundedSender<String>, String)>,
    /// Flips to `true` on the first `close`; wakes readers.
    shutdown: watch::Sender<bool>,
}

impl<T: Transport> ClientCodec<T> {
    pub fn new(transport: T, registry: Arc<ProcedureRegistry>) -> std::io::Result<Self> {
        let split = transport.into_split()?;
        Ok(Self {
            reader: AsyncMutex::new(ReadState { stream: split.reader, staged: None }),
            writer: AsyncMutex::new(split.writer),
            read_closer: split.read_closer,
            pending: Mutex::new(HashMap::new()),
            registry,
            config: RecordConfig::default(),
            close_signal: None,
            shutdown: watch::channel(false).0,
        })
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

    /// Number of calls written whose reply has not been read yet.
    pub fn pending_calls(&self) -> usize {
        self.pending.lock().unwrap_or_else(PoisonError::into_inner).len()
    }

    /// Sends a call to `procedure` with `args` as its argument payload.
    ///
    /// `call_id` must not be in use by another unanswered call on this
    /// connection.
    pub async fn write_request<A>(&self, call_id: u32, procedure: &str, args: &A) -> Result<()>
    where
        A: Serialize + ?Sized,
    {
        let Some(id) = self.registry.id_of(procedure) else {
            debug!("No procedure registered as {}", procedure);
            return Err(RpcError::ProcedureUnavailable);
        };

        let mut payload = Vec::new();
        call_message(call_id, id.program, id.version, id.procedure)
            .serialize(&mut payload)
            .map_err(RpcError::Encode)?;
        args.serialize(&mut payload).map_err(RpcError::Encode)?;

        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(call_id, procedure.to_string());

        let written = {
            let mut writer = self.writer.lock().await;
            record::write_record(&mut *writer, &payload, &self.config).await
        };
        if let Err(e) = written {
            self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&call_id);
            return Err(e);
        }
        debug!("Sent call xid:{} {} ({})", call_id, procedure, id);
        Ok(())
    }

    /// Reads the next reply record and decodes its header.
    ///
    /// An outer `Err` means the connection is unusable. Otherwise the
    /// returned header carries the call it answers and whether it succeeded.
    /// On success the record stays staged for [`Self::read_response_body`].
    ///
    /// Once the codec is closed this returns [`RpcError::ConnectionClosed`],
    /// including for a read that was already waiting.
    pub async fn read_response_header(&self) -> Result<ResponseHeader> {
        let mut state = tokio::select! {
            biased;
            _ = self.wait_closed() => return Err(RpcError::ConnectionClosed),
            state = self.reader.lock() => state,
        };
        state.staged = None;

        let record = tokio::select! {
            biased;
            _ = self.wait_closed() => {
                debug!("Reply read interrupted by close");
                return Err(RpcError::ConnectionClosed);
            }
            record = record::read_record(&mut state.stream, &self.config) => record?,
        };
        let mut cursor = Cursor::new(record);

        let call_id = deserialize::<u32>(&mut cursor).map_err(RpcError::Decode)?;
        let msg_type = deserialize::<u32>(&mut cursor).map_err(RpcError::Decode)?;
        if msg_type != REPLY {
            warn!("Expected a reply, got message type {} for xid:{}", msg_type, call_id);
            return Err(RpcError::InvalidMessageType(msg_type));
        }

        let Some(procedure) =
            self.pending.lock().unwrap_or_else(PoisonError::into_inner).remove(&call_id)
        else {
            warn!("Reply for unknown xid:{}", call_id);
            return Err(RpcError::UnexpectedReplyId(call_id));
        };

        let result = match deserialize::<reply_body>(&mut cursor) {
            Ok(reply) => reply_outcome(reply),
            Err(e) if e.kind() == std::io::ErrorKind::InvalidData => {
                Err(RpcError::UnrecognizedReply(e.to_string()))
            }
            Err(e) => return Err(RpcError::Decode(e)),
        };
        if result.is_ok() {
            state.staged = Some(cursor);
        } else {
            debug!("Call xid:{} {} was not run: {:?}", call_id, procedure, result);
        }

        Ok(ResponseHeader { call_id, procedure, result })
    }

    /// Decodes the result payload of the staged reply into `result`.
    ///
    /// With `None` the rest of the record is discarded. Either way the
    /// staged record is consumed.
    pub async fn read_response_body<D>(&self, result: Option<&mut D>) -> Result<()>
    where
        D: Deserialize,
    {
        let staged = self.reader.lock().await.staged.take();
        match (result, staged) {
            (None, _) => Ok(()),
            (Some(_), None) => Err(RpcError::NoRecordStaged),
            (Some(result), Some(mut cursor)) => {
                result.deserialize(&mut cursor).map_err(RpcError::Decode)
            }
        }
    }

    /// Closes the connection. Later calls do nothing.
    ///
    /// Where the transport can half-close, only the read direction is shut:
    /// the reader loop ends while requests other tasks are still writing go
    /// out undisturbed. Otherwise the write side is shut down as well, and
    /// pending reads are woken with [`RpcError::ConnectionClosed`] either way.
    pub async fn close(&self) -> Result<()> {
        if self.shutdown.send_replace(true) {
            return Ok(());
        }
        if let Some((signal, label)) = &self.close_signal {
            let _ = signal.send(label.clone());
        }

        match &self.read_closer {
            Some(close_read) => close_read()?,
            None => self.writer.lock().await.shutdown().await?,
        }
        debug!("Client codec closed");
        Ok(())
    }

    /// Resolves once [`Self::close`] has been called.
    async fn wait_closed(&self) {
        let mut shutdown = self.shutdown.subscribe();
        let _ = shutdown.wait_for(|closed| *closed).await;
    }
}

/// Maps the reply union onto the per-call outcome.
fn reply_outcome(reply: reply_body) -> Result<()> {
    match reply {
        reply_body::MSG_ACCEPTED(accepted) => match accepted.reply_data {
            accept_body::SUCCESS => Ok(()),
            accept_body::PROG_UNAVAIL => Err(RpcError::ProgramUnavailable),
            accept_body::PROG_MISMATCH(info) => {
                Err(RpcError::ProgramMismatch { low: info.low, high: info.high })
            }
            accept_body::PROC_UNAVAIL => Err(RpcError::ProcedureUnavailable),
            accept_body::GARBAGE_ARGS => Err(RpcError::GarbageArguments),
            accept_body::SYSTEM_ERR => Err(RpcError::SystemError),
        },
        reply_body::MSG_DENIED(rejected_reply::RPC_MISMATCH(info)) => {
            Err(RpcError::RpcVersionMismatch { low: info.low, high: info.high })
        }
        reply_body::MSG_DENIED(rejected_reply::AUTH_ERROR(stat)) => {
            Err(RpcError::AuthenticationError(stat))
        }
    }
}
