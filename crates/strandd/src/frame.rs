//! Wire framing for the control socket.
//!
//! Every message is an 8-byte header (magic + payload length) followed
//! by a JSON body.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// `b"STRD"` little-endian.
pub const FRAME_MAGIC: u32 = 0x4452_5453;

/// Frame header preceding every message.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameHeader {
    pub magic: u32,
    pub length: u32,
}

impl FrameHeader {
    pub const SIZE: usize = 8;
    /// Upper bound on a single message body.
    pub const MAX_LENGTH: usize = 16 * 1024 * 1024;

    pub fn new(length: u32) -> Self {
        Self {
            magic: FRAME_MAGIC,
            length,
        }
    }

    pub fn to_bytes(self) -> [u8; Self::SIZE] {
        let mut buf = [0u8; Self::SIZE];
        buf[..4].copy_from_slice(&self.magic.to_le_bytes());
        buf[4..].copy_from_slice(&self.length.to_le_bytes());
        buf
    }

    pub fn from_bytes(buf: &[u8; Self::SIZE]) -> Self {
        Self {
            magic: u32::from_le_bytes([buf[0], buf[1], buf[2], buf[3]]),
            length: u32::from_le_bytes([buf[4], buf[5], buf[6], buf[7]]),
        }
    }

    pub fn is_valid(&self) -> bool {
        self.magic == FRAME_MAGIC && (self.length as usize) <= Self::MAX_LENGTH
    }
}

/// Write one framed JSON message.
pub async fn write_message<W, T>(writer: &mut W, message: &T) -> anyhow::Result<()>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let body = serde_json::to_vec(message)?;
    let header = FrameHeader::new(body.len() as u32);
    writer.write_all(&header.to_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one framed JSON message; `Ok(None)` on clean EOF at a frame
/// boundary.
pub async fn read_message<R, T>(reader: &mut R) -> anyhow::Result<Option<T>>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut header_buf = [0u8; FrameHeader::SIZE];
    match reader.read_exact(&mut header_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(e) => return Err(e.into()),
    }
    let header = FrameHeader::from_bytes(&header_buf);
    if !header.is_valid() {
        anyhow::bail!("invalid frame header: magic {:08x}", header.magic);
    }
    let mut body = vec![0u8; header.length as usize];
    reader.read_exact(&mut body).await?;
    Ok(Some(serde_json::from_slice(&body)?))
}
