//! Byte-stream transports the codecs can run over.
//!
//! The client codec reads replies on one task while other tasks write calls,
//! so it needs the connection as two independently owned halves. A transport
//! that can shut its read direction from outside the reader hands out a
//! [`ReadCloser`], which lets a close interrupt a blocked read without
//! taking the reader's lock.

use std::io;

use tokio::io::{AsyncRead, AsyncWrite, DuplexStream, ReadHalf, WriteHalf};
use tokio::net::tcp::{OwnedReadHalf, OwnedWriteHalf};
use tokio::net::TcpStream;

/// Stops the read direction of a connection.
pub type ReadCloser = Box<dyn Fn() -> io::Result<()> + Send + Sync>;

/// A connection split into halves.
pub struct SplitTransport<R, W> {
    pub reader: R,
    pub writer: W,
    /// `None` if the transport has no half-close.
    pub read_closer: Option<ReadCloser>,
}

/// Reliable, ordered, bidirectional byte stream.
pub trait Transport: Send + 'static {
    type Reader: AsyncRead + Unpin + Send + 'static;
    type Writer: AsyncWrite + Unpin + Send + 'static;

    fn into_split(self) -> io::Result<SplitTransport<Self::Reader, Self::Writer>>;
}

impl Transport for TcpStream {
    type Reader = OwnedReadHalf;
    type Writer = OwnedWriteHalf;

    fn into_split(self) -> io::Result<SplitTransport<OwnedReadHalf, OwnedWriteHalf>> {
        let read_closer = read_closer(&self)?;
        let (reader, writer) = TcpStream::into_split(self);
        Ok(SplitTransport { reader, writer, read_closer })
    }
}

/// In-memory pipe; used for loopback connections in tests.
impl Transport for DuplexStream {
    type Reader = ReadHalf<DuplexStream>;
    type Writer = WriteHalf<DuplexStream>;

    fn into_split(self) -> io::Result<SplitTransport<Self::Reader, Self::Writer>> {
        let (reader, writer) = tokio::io::split(self);
        Ok(SplitTransport { reader, writer, read_closer: None })
    }
}

/// `shutdown(2)` acts on the socket, not the descriptor, so shutting down a
/// duplicate handle half-closes the connection tokio is polling.
#[cfg(unix)]
fn read_closer(stream: &TcpStream) -> io::Result<Option<ReadCloser>> {
    use std::os::fd::AsFd;

    let handle = std::net::TcpStream::from(stream.as_fd().try_clone_to_owned()?);
    Ok(Some(Box::new(move || handle.shutdown(std::net::Shutdown::Read))))
}

#[cfg(windows)]
fn read_closer(stream: &TcpStream) -> io::Result<Option<ReadCloser>> {
    use std::os::windows::io::AsSocket;

    let handle = std::net::TcpStream::from(stream.as_socket().try_clone_to_owned()?);
    Ok(Some(Box::new(move || handle.shutdown(std::net::Shutdown::Read))))
}

#[cfg(not(any(unix, windows)))]
fn read_closer(_stream: &TcpStream) -> io::Result<Option<ReadCloser>> {
    Ok(None)
}
