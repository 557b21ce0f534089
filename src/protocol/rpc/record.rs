//! Record Marking Standard (RFC 5531 section 11).
//!
//! A record is sent as one or more fragments. Each fragment is a four-byte
//! big-endian header followed by that many bytes of data. The highest bit of
//! the header marks the last fragment of the record; the low 31 bits carry
//! the fragment length. Fragment boundaries have no meaning above this layer:
//! a record is exactly the concatenation of its fragment payloads.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};
use tracing::trace;

use super::error::{Result, RpcError};

/// Largest fragment payload the header can describe, 2^31 - 1 bytes.
pub const MAX_FRAGMENT_SIZE: u32 = (1 << 31) - 1;
/// Default cap on a reassembled record.
pub const DEFAULT_MAX_RECORD_LENGTH: usize = 64 * 1024 * 1024;

const LAST_FRAGMENT_BIT: u32 = 1 << 31;
const FRAGMENT_HEADER_LEN: usize = 4;

/// Limits applied when framing records on a connection.
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct RecordConfig {
    /// Split size for outgoing records and the largest incoming fragment
    /// accepted. Never above [`MAX_FRAGMENT_SIZE`].
    pub max_fragment_size: u32,
    /// Largest reassembled record accepted from the peer.
    pub max_record_length: usize,
}

impl Default for RecordConfig {
    fn default() -> Self {
        Self { max_fragment_size: MAX_FRAGMENT_SIZE, max_record_length: DEFAULT_MAX_RECORD_LENGTH }
    }
}

impl RecordConfig {
    /// Sets the fragment size limit, clamped to `1..=MAX_FRAGMENT_SIZE`.
    pub fn with_max_fragment_size(mut self, size: u32) -> Self {
        self.max_fragment_size = size.clamp(1, MAX_FRAGMENT_SIZE);
        self
    }

    pub fn with_max_record_length(mut self, length: usize) -> Self {
        self.max_record_length = length;
        self
    }
}

pub fn fragment_header(size: u32, is_last: bool) -> u32 {
    let size = size & !LAST_FRAGMENT_BIT;
    if is_last {
        size | LAST_FRAGMENT_BIT
    } else {
        size
    }
}

pub fn fragment_size(header: u32) -> u32 {
    header & !LAST_FRAGMENT_BIT
}

pub fn is_last_fragment(header: u32) -> bool {
    header & LAST_FRAGMENT_BIT != 0
}

/// Writes `payload` as one record and returns the number of payload bytes
/// written, headers excluded.
///
/// Each fragment header is written together with its body in a single
/// buffer so that the two are never handed to the transport separately.
/// An empty payload is sent as a single empty last fragment.
///
/// If a write fails part way the stream is left mid-record and must be
/// closed.
pub async fn write_record<W>(dest: &mut W, payload: &[u8], config: &RecordConfig) -> Result<usize>
where
    W: AsyncWrite + Unpin,
{
    let chunk_size = config.max_fragment_size.clamp(1, MAX_FRAGMENT_SIZE) as usize;
    let mut fragments = payload.chunks(chunk_size).peekable();
    let mut frame = Vec::with_capacity(FRAGMENT_HEADER_LEN + payload.len().min(chunk_size));
    let mut written = 0;

    if fragments.peek().is_none() {
        trace!("Writing fragment length:0, last:true");
        dest.write_all(&fragment_header(0, true).to_be_bytes()).await?;
    }
    while let Some(fragment) = fragments.next() {
        let is_last = fragments.peek().is_none();
        trace!("Writing fragment length:{}, last:{}", fragment.len(), is_last);

        frame.clear();
        // chunk_size <= MAX_FRAGMENT_SIZE so the length always fits.
        frame.extend_from_slice(&fragment_header(fragment.len() as u32, is_last).to_be_bytes());
        frame.extend_from_slice(fragment);
        dest.write_all(&frame).await?;
        written += fragment.len();
    }
    dest.flush().await?;

    Ok(written)
}

/// Reads fragments until the last one and returns the reassembled record.
///
/// End of stream before the first header byte of a record yields
/// [`RpcError::ConnectionClosed`]; anywhere else it is an I/O error.
pub async fn read_record<R>(src: &mut R, config: &RecordConfig) -> Result<Vec<u8>>
where
    R: AsyncRead + Unpin,
{
    let mut record = Vec::new();
    let mut first = true;
    loop {
        let header = match read_fragment_header(src).await? {
            Some(header) => header,
            None if first => return Err(RpcError::ConnectionClosed),
            None => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
        };
        first = false;

        let length = fragment_size(header);
        let is_last = is_last_fragment(header);
        trace!("Reading fragment length:{}, last:{}", length, is_last);
        if length > MAX_FRAGMENT_SIZE || length > config.max_fragment_size {
            return Err(RpcError::InvalidFragmentSize(length));
        }
        let length = length as usize;
        if record.len().saturating_add(length) > config.max_record_length {
            return Err(RpcError::RecordTooLarge {
                size: record.len().saturating_add(length),
                max: config.max_record_length,
            });
        }

        let start = record.len();
        record.resize(start + length, 0);
        src.read_exact(&mut record[start..]).await?;

        if is_last {
            return Ok(record);
        }
    }
}

/// Reads a fragment header, or `None` if the stream ended before its first byte.
async fn read_fragment_header<R>(src: &mut R) -> Result<Option<u32>>
where
    R: AsyncRead + Unpin,
{
    let mut header_buf = [0_u8; FRAGMENT_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAGMENT_HEADER_LEN {
        match src.read(&mut header_buf[filled..]).await? {
            0 if filled == 0 => return Ok(None),
            0 => return Err(std::io::Error::from(std::io::ErrorKind::UnexpectedEof).into()),
            n => filled += n,
        }
    }
    Ok(Some(u32::from_be_bytes(header_buf)))
}
