//! TCP plumbing for the RPC codecs.
//!
//! - [`RpcTcpListener`] accepts connections and wraps each one in a
//!   [`ServerCodec`], optionally spawning a task per connection.
//! - [`connect`] dials a server and wraps the socket in a [`ClientCodec`].
//! - [`peek_rpc_call`] sniffs a fresh connection without consuming it.

use std::future::Future;
use std::io;
use std::net::{IpAddr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use tokio::net::{TcpListener, TcpStream, ToSocketAddrs};
use tokio::sync::mpsc;
use tracing::{debug, info};

use crate::protocol::rpc::sniff::{self, MIN_CALL_LEN};
use crate::protocol::rpc::{ClientCodec, ProcedureRegistry, RecordConfig, ServerCodec};

/// Accepts RPC connections on a TCP port.
#[derive(Debug)]
pub struct RpcTcpListener {
    listener: TcpListener,
    registry: Arc<ProcedureRegistry>,
    config: RecordConfig,
    /// Receives the peer address of each connection when its codec closes
    close_signal: Option<mpsc::UnboundedSender<String>>,
}

/// Generates a local loopback IP address from a 16-bit host number
/// Used for creating multiple local test addresses in the 127.88.x.y range
pub fn generate_host_ip(hostnum: u16) -> String {
    format!("127.88.{}.{}", (hostnum >> 8) as u8, hostnum as u8)
}

impl RpcTcpListener {
    /// Binds to `ipstr`, given as `"IP:PORT"`.
    ///
    /// `"auto:PORT"` tries loopback addresses in 127.88.0.0/16 until one
    /// binds. Port 0 lets the OS choose; see [`Self::get_listen_port`].
    pub async fn bind(ipstr: &str, registry: Arc<ProcedureRegistry>) -> io::Result<Self> {
        let (ip, port) = ipstr.rsplit_once(':').ok_or_else(|| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "IP Address must be of form ip:port")
        })?;
        let port = port.parse::<u16>().map_err(|_| {
            io::Error::new(io::ErrorKind::AddrNotAvailable, "Port not in range 0..=65535")
        })?;

        if ip != "auto" {
            return Self::bind_internal(ip, port, registry).await;
        }

        const NUM_TRIES: u16 = 32;
        for try_ip in 1..=NUM_TRIES {
            let ip = generate_host_ip(try_ip);
            if let Ok(listener) = Self::bind_internal(&ip, port, registry.clone()).await {
                return Ok(listener);
            }
        }

        Err(io::Error::other("Can't bind automatically"))
    }

    async fn bind_internal(
        ip: &str,
        port: u16,
        registry: Arc<ProcedureRegistry>,
    ) -> io::Result<Self> {
        let ipstr = format!("{ip}:{port}");
        let listener = TcpListener::bind(&ipstr).await?;
        info!("Listening on {:?}", &ipstr);
        Ok(Self { listener, registry, config: RecordConfig::default(), close_signal: None })
    }

    pub fn with_record_config(mut self, config: RecordConfig) -> Self {
        self.config = config;
        self
    }

    /// Registers a channel told the peer address of every connection whose
    /// codec is closed.
    pub fn set_close_listener(&mut self, signal: mpsc::UnboundedSender<String>) {
        self.close_signal = Some(signal);
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Port actually bound, useful after binding port 0.
    pub fn get_listen_port(&self) -> io::Result<u16> {
        Ok(self.local_addr()?.port())
    }

    pub fn get_listen_ip(&self) -> io::Result<IpAddr> {
        Ok(self.local_addr()?.ip())
    }

    /// Waits for the next connection and wraps it in a server codec.
    pub async fn accept(&self) -> io::Result<(ServerCodec<TcpStream>, SocketAddr)> {
        let (socket, peer) = self.listener.accept().await?;
        let _ = socket.set_nodelay(true);
        info!("Accepting connection from {}", peer);

        let mut codec =
            ServerCodec::new(socket, self.registry.clone()).with_record_config(self.config);
        if let Some(signal) = &self.close_signal {
            codec = codec.with_close_signal(signal.clone(), peer.to_string());
        }
        Ok((codec, peer))
    }

    /// Accepts connections forever, running `handler` on its own task for
    /// each one. Returns only if accepting fails.
    pub async fn handle_forever<F, Fut>(&self, handler: F) -> io::Result<()>
    where
        F: Fn(ServerCodec<TcpStream>) -> Fut,
        Fut: Future<Output = ()> + Send + 'static,
    {
        loop {
            let (codec, peer) = self.accept().await?;
            debug!("Spawning handler for {}", peer);
            tokio::spawn(handler(codec));
        }
    }
}

/// Connects to `addr` and wraps the socket in a client codec.
pub async fn connect(
    addr: impl ToSocketAddrs,
    registry: Arc<ProcedureRegistry>,
) -> io::Result<ClientCodec<TcpStream>> {
    let socket = TcpStream::connect(addr).await?;
    let _ = socket.set_nodelay(true);
    debug!("Connected to {:?}", socket.peer_addr());
    ClientCodec::new(socket, registry)
}

/// Whether the data waiting on `socket` starts like an RPC call record.
///
/// Uses `peek`, so nothing is consumed. Polls until the first call header
/// has arrived, the peer closes, or the attempts run out.
pub async fn peek_rpc_call(socket: &TcpStream) -> io::Result<bool> {
    const PEEK_LEN: usize = 4 + MIN_CALL_LEN + 2 * 400;
    const PEEK_ATTEMPTS: usize = 20;
    const PEEK_INTERVAL: Duration = Duration::from_millis(5);

    let mut buf = vec![0_u8; PEEK_LEN];
    for _ in 0..PEEK_ATTEMPTS {
        let n = socket.peek(&mut buf).await?;
        if n == 0 {
            return Ok(false);
        }
        match sniff::sniff_call(&buf[..n]) {
            Some(verdict) => return Ok(verdict),
            None if n == PEEK_LEN => return Ok(false),
            None => tokio::time::sleep(PEEK_INTERVAL).await,
        }
    }
    Ok(false)
}
