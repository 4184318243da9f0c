//! Async frame I/O.

use crate::error::ServerResult;
use shoaldb_protocol::{check_len, decode_header, encode_frame, ProtocolError, FRAME_HEADER_LEN};
use std::io;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// One inbound frame.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum Inbound {
    /// A request payload.
    Request(Vec<u8>),
    /// A frame over the size limit whose payload was discarded.
    Oversized(usize),
}

/// Reads one request frame.
///
/// Returns `Ok(None)` when the peer closes between frames. An oversized
/// payload is drained from the stream so the next frame stays aligned.
pub(crate) async fn read_request<R>(reader: &mut R, max: usize) -> ServerResult<Option<Inbound>>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(ProtocolError::Truncated.into());
        }
        filled += n;
    }

    let len = decode_header(header);
    if check_len(len, max).is_err() {
        let drained =
            tokio::io::copy(&mut (&mut *reader).take(len as u64), &mut tokio::io::sink()).await?;
        if drained < len as u64 {
            return Err(ProtocolError::Truncated.into());
        }
        return Ok(Some(Inbound::Oversized(len)));
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Some(Inbound::Request(payload)))
}

/// Writes one response frame and flushes.
pub(crate) async fn write_response<W>(writer: &mut W, payload: &[u8]) -> ServerResult<()>
where
    W: AsyncWrite + Unpin,
{
    let frame = encode_frame(payload, u32::MAX as usize)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}
