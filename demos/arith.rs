//! Arithmetic service over Sun RPC.
//!
//! Starts a server on a loopback port, then calls it from a client that
//! runs its own reader task, the way an RPC front-end sits on top of the
//! codecs: callers get a call id, write their request and wait for the
//! reader to hand over the matching reply.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::{Arc, Mutex};

use anyhow::{anyhow, Context};
use tokio::net::TcpStream;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, info, warn};

use sunrpc::protocol::rpc::{ClientCodec, ProcedureId, ProcedureRegistry, RpcError, ServerCodec};
use sunrpc::tcp::{self, RpcTcpListener};
use sunrpc::{DeserializeStruct, SerializeStruct};

const ARITH_PROGRAM: u32 = 12345;
const ARITH_VERSION: u32 = 1;

#[derive(Clone, Copy, Debug, Default)]
struct Args {
    a: i32,
    b: i32,
}
SerializeStruct!(Args, a, b);
DeserializeStruct!(Args, a, b);

/// Quotient and remainder
#[derive(Clone, Copy, Debug, Default)]
struct Quotient {
    quo: i32,
    rem: i32,
}
SerializeStruct!(Quotient, quo, rem);
DeserializeStruct!(Quotient, quo, rem);

fn registry() -> anyhow::Result<Arc<ProcedureRegistry>> {
    let registry = ProcedureRegistry::new();
    registry.register(ProcedureId::new(ARITH_PROGRAM, ARITH_VERSION, 1), "Arith.Multiply")?;
    registry.register(ProcedureId::new(ARITH_PROGRAM, ARITH_VERSION, 2), "Arith.Divide")?;
    Ok(Arc::new(registry))
}

async fn serve(mut codec: ServerCodec<TcpStream>) {
    loop {
        let request = match codec.read_request_header().await {
            Ok(request) => request,
            Err(RpcError::ConnectionClosed) => break,
            Err(e) => {
                warn!("Dropping connection: {e}");
                break;
            }
        };
        let mut args = Args::default();
        if let Err(e) = codec.read_request_body(Some(&mut args)).await {
            warn!("Bad arguments for {}: {e}", request.procedure);
            break;
        }

        let written = match request.procedure.as_str() {
            "Arith.Multiply" => {
                codec.write_response(request.call_id, &args.a.wrapping_mul(args.b), None).await
            }
            "Arith.Divide" if args.b == 0 => {
                codec
                    .write_response(request.call_id, &Quotient::default(), Some("divide by zero"))
                    .await
            }
            "Arith.Divide" => {
                let quotient = Quotient {
                    quo: args.a.wrapping_div(args.b),
                    rem: args.a.wrapping_rem(args.b),
                };
                codec.write_response(request.call_id, &quotient, None).await
            }
            other => {
                warn!("No handler for {other}");
                codec.write_response(request.call_id, &(), Some("no handler")).await
            }
        };
        if let Err(e) = written {
            warn!("Failed to reply: {e}");
            break;
        }
    }
    if let Err(e) = codec.close().await {
        debug!("Close failed: {e}");
    }
}

type Reply = (sunrpc::protocol::rpc::Result<()>, Vec<u8>);
type Waiters = Arc<Mutex<HashMap<u32, oneshot::Sender<Reply>>>>;

/// Minimal call front-end: one reader task, any number of callers.
struct ArithClient {
    codec: Arc<ClientCodec<TcpStream>>,
    waiters: Waiters,
    next_id: AtomicU32,
}

impl ArithClient {
    fn new(codec: ClientCodec<TcpStream>) -> Self {
        let codec = Arc::new(codec);
        let waiters: Waiters = Arc::default();
        tokio::spawn(read_replies(codec.clone(), waiters.clone()));
        Self { codec, waiters, next_id: AtomicU32::new(1) }
    }

    async fn call<R>(&self, procedure: &str, args: &Args) -> anyhow::Result<R>
    where
        R: sunrpc::xdr::Deserialize + Default,
    {
        let call_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = oneshot::channel();
        self.waiters.lock().map_err(|_| anyhow!("waiters poisoned"))?.insert(call_id, tx);
        if let Err(e) = self.codec.write_request(call_id, procedure, args).await {
            if let Ok(mut waiters) = self.waiters.lock() {
                waiters.remove(&call_id);
            }
            return Err(e.into());
        }

        let (result, payload) = rx.await.context("connection closed before reply")?;
        result?;
        Ok(sunrpc::xdr::deserialize(&mut payload.as_slice())?)
    }
}

async fn read_replies(codec: Arc<ClientCodec<TcpStream>>, waiters: Waiters) {
    loop {
        let header = match codec.read_response_header().await {
            Ok(header) => header,
            Err(e) => {
                info!("Reader stopped: {e}");
                break;
            }
        };
        // Results are opaque bytes here; the caller knows their type.
        let mut payload = Vec::new();
        if header.result.is_ok() {
            if let Err(e) = codec.read_response_body(Some(&mut RawTail(&mut payload))).await {
                warn!("Unreadable reply for {}: {e}", header.procedure);
                break;
            }
        }
        let waiter = waiters.lock().ok().and_then(|mut w| w.remove(&header.call_id));
        if let Some(waiter) = waiter {
            let _ = waiter.send((header.result, payload));
        }
    }
    // Fail everyone still waiting.
    if let Ok(mut w) = waiters.lock() {
        w.clear();
    }
}

/// Collects whatever is left of a record.
struct RawTail<'a>(&'a mut Vec<u8>);

impl sunrpc::xdr::Deserialize for RawTail<'_> {
    fn deserialize<R: std::io::Read>(&mut self, src: &mut R) -> std::io::Result<()> {
        src.read_to_end(self.0).map(|_| ())
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_max_level(tracing::Level::DEBUG)
        .with_writer(std::io::stderr)
        .init();

    let registry = registry()?;
    let (closed_tx, mut closed_rx) = mpsc::unbounded_channel();

    let mut listener = RpcTcpListener::bind("127.0.0.1:0", registry.clone()).await?;
    listener.set_close_listener(closed_tx);
    let addr = listener.local_addr()?;
    println!("Arith server listening on {addr}");
    tokio::spawn(async move {
        if let Err(e) = listener.handle_forever(serve).await {
            warn!("Listener failed: {e}");
        }
    });

    let client = ArithClient::new(tcp::connect(addr, registry).await?);

    let product: i32 = client.call("Arith.Multiply", &Args { a: 7, b: 8 }).await?;
    println!("7 * 8 = {product}");

    let (q1, q2) = tokio::join!(
        client.call::<Quotient>("Arith.Divide", &Args { a: 17, b: 5 }),
        client.call::<Quotient>("Arith.Divide", &Args { a: 100, b: 7 }),
    );
    let (q1, q2) = (q1?, q2?);
    println!("17 / 5 = {} rem {}", q1.quo, q1.rem);
    println!("100 / 7 = {} rem {}", q2.quo, q2.rem);

    match client.call::<i32>("Arith.Modulo", &Args { a: 1, b: 1 }).await {
        Ok(_) => println!("Arith.Modulo unexpectedly succeeded"),
        Err(e) => println!("Arith.Modulo: {e}"),
    }

    // Closing stops our reader; dropping the client then hangs up.
    client.codec.close().await?;
    drop(client);
    if let Some(peer) = closed_rx.recv().await {
        println!("Server saw {peer} disconnect");
    }
    Ok(())
}
