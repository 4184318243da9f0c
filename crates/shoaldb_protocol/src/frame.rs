//! Length-prefixed framing for the TCP transport.
//!
//! A frame is a 4-byte unsigned big-endian payload length followed by that
//! many bytes of UTF-8 JSON.

use crate::error::{ProtocolError, ProtocolResult};
use bytes::{BufMut, Bytes, BytesMut};
use std::io::{self, Read, Write};

/// Size of the length prefix.
pub const FRAME_HEADER_LEN: usize = 4;

/// Default maximum payload size (16 MiB).
pub const DEFAULT_MAX_FRAME_SIZE: usize = 16 * 1024 * 1024;

/// Checks a payload length against `max`.
pub fn check_len(len: usize, max: usize) -> ProtocolResult<()> {
    if len > max || len > u32::MAX as usize {
        return Err(ProtocolError::FrameTooLarge { len, max });
    }
    Ok(())
}

/// Encodes one frame into a contiguous buffer.
pub fn encode_frame(payload: &[u8], max: usize) -> ProtocolResult<Bytes> {
    check_len(payload.len(), max)?;
    let mut buf = BytesMut::with_capacity(FRAME_HEADER_LEN + payload.len());
    buf.put_u32(payload.len() as u32);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decodes a length prefix.
pub fn decode_header(header: [u8; FRAME_HEADER_LEN]) -> usize {
    u32::from_be_bytes(header) as usize
}

/// Writes one frame and flushes the writer.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8], max: usize) -> ProtocolResult<()> {
    let frame = encode_frame(payload, max)?;
    writer.write_all(&frame)?;
    writer.flush()?;
    Ok(())
}

/// Reads one frame.
///
/// Returns `Ok(None)` on a clean end of stream before the first header
/// byte. A stream that ends mid-frame yields [`ProtocolError::Truncated`].
/// An oversized frame is rejected before its payload is read.
pub fn read_frame<R: Read>(reader: &mut R, max: usize) -> ProtocolResult<Option<Vec<u8>>> {
    let mut header = [0u8; FRAME_HEADER_LEN];
    let mut filled = 0;
    while filled < FRAME_HEADER_LEN {
        match reader.read(&mut header[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::Truncated),
            Ok(n) => filled += n,
            Err(e) if e.kind() == io::ErrorKind::Interrupted => continue,
            Err(e) => return Err(e.into()),
        }
    }

    let len = decode_header(header);
    check_len(len, max)?;

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).map_err(|e| {
        if e.kind() == io::ErrorKind::UnexpectedEof {
            ProtocolError::Truncated
        } else {
            ProtocolError::Io(e)
        }
    })?;
    Ok(Some(payload))
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use std::io::Cursor;

    #[test]
    fn header_is_big_endian() {
        let frame = encode_frame(b"{}", DEFAULT_MAX_FRAME_SIZE).unwrap();
        assert_eq!(&frame[..], &[0, 0, 0, 2, b'{', b'}']);
    }

    #[test]
    fn clean_eof_is_none() {
        let mut empty = Cursor::new(Vec::<u8>::new());
        assert!(read_frame(&mut empty, 16).unwrap().is_none());
    }

    #[test]
    fn truncated_header_and_payload() {
        let mut short_header = Cursor::new(vec![0u8, 0]);
        assert!(matches!(
            read_frame(&mut short_header, 16),
            Err(ProtocolError::Truncated)
        ));

        let mut short_payload = Cursor::new(vec![0u8, 0, 0, 5, b'a']);
        assert!(matches!(
            read_frame(&mut short_payload, 16),
            Err(ProtocolError::Truncated)
        ));
    }

    #[test]
    fn oversized_frames_are_rejected() {
        assert!(matches!(
            encode_frame(&[0u8; 9], 8),
            Err(ProtocolError::FrameTooLarge { len: 9, max: 8 })
        ));

        let mut reader = Cursor::new(vec![0u8, 0, 1, 0]);
        assert!(matches!(
            read_frame(&mut reader, 255),
            Err(ProtocolError::FrameTooLarge { len: 256, max: 255 })
        ));
    }

    #[test]
    fn consecutive_frames() {
        let mut wire = Vec::new();
        write_frame(&mut wire, br#"{"op":"ping"}"#, 64).unwrap();
        write_frame(&mut wire, b"", 64).unwrap();
        let mut reader = Cursor::new(wire);
        assert_eq!(
            read_frame(&mut reader, 64).unwrap().unwrap(),
            br#"{"op":"ping"}"#
        );
        assert_eq!(read_frame(&mut reader, 64).unwrap().unwrap(), b"");
        assert!(read_frame(&mut reader, 64).unwrap().is_none());
    }

    proptest! {
        #[test]
        fn any_payload_within_limit_survives(payload in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut wire = Vec::new();
            write_frame(&mut wire, &payload, 512).unwrap();
            prop_assert_eq!(wire.len(), FRAME_HEADER_LEN + payload.len());
            let mut reader = Cursor::new(wire);
            let read = read_frame(&mut reader, 512).unwrap().unwrap();
            prop_assert_eq!(read, payload);
        }

        #[test]
        fn any_cut_of_a_frame_is_truncated(payload in proptest::collection::vec(any::<u8>(), 1..64), cut in 1usize..68) {
            let frame = encode_frame(&payload, 64).unwrap();
            let cut = cut.min(frame.len() - 1);
            let mut reader = Cursor::new(frame[..cut].to_vec());
            prop_assert!(matches!(read_frame(&mut reader, 64), Err(ProtocolError::Truncated)));
        }
    }
}
