//! Multi-record response of a file attribute download.
//!
//! Each record is an 8-byte attribute id, a 4-byte little-endian length and
//! that many bytes of encrypted data. Records are packed back to back.

use crate::base64::base64url_encode;
use crate::error::{MegaError, Result};

const ID_LEN: usize = 8;
const HEADER_LEN: usize = ID_LEN + 4;

/// One record of an attribute download.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    /// MEGA base64 attribute id
    pub id: String,
    /// Encrypted attribute bytes
    pub data: Vec<u8>,
}

/// Iterator over at most `count` frames of a buffer.
///
/// A record cut short by the end of the buffer yields
/// [`MegaError::InvalidResponse`] and ends the iteration.
#[derive(Debug)]
pub struct AttributeFrames<'a> {
    buffer: &'a [u8],
    offset: usize,
    remaining: usize,
}

impl<'a> AttributeFrames<'a> {
    pub fn new(buffer: &'a [u8], count: usize) -> Self {
        Self {
            buffer,
            offset: 0,
            remaining: count,
        }
    }

    fn parse_next(&mut self) -> Result<Frame> {
        let rest = &self.buffer[self.offset.min(self.buffer.len())..];
        if rest.len() < HEADER_LEN {
            return Err(MegaError::InvalidResponse);
        }

        let (id, length) = rest[..HEADER_LEN].split_at(ID_LEN);
        let length = u32::from_le_bytes([length[0], length[1], length[2], length[3]]) as usize;
        let end = HEADER_LEN
            .checked_add(length)
            .ok_or(MegaError::InvalidResponse)?;
        let data = rest.get(HEADER_LEN..end).ok_or(MegaError::InvalidResponse)?;

        self.offset += end;
        Ok(Frame {
            id: base64url_encode(id),
            data: data.to_vec(),
        })
    }
}

impl Iterator for AttributeFrames<'_> {
    type Item = Result<Frame>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.remaining == 0 {
            return None;
        }
        match self.parse_next() {
            Ok(frame) => {
                self.remaining -= 1;
                Some(Ok(frame))
            }
            Err(error) => {
                self.remaining = 0;
                Some(Err(error))
            }
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;

    /// Build a response from `(id bytes, data)` records.
    pub(crate) fn encode_frames(records: &[([u8; 8], &[u8])]) -> Vec<u8> {
        let mut buffer = Vec::new();
        for (id, data) in records {
            buffer.extend_from_slice(id);
            buffer.extend_from_slice(&(data.len() as u32).to_le_bytes());
            buffer.extend_from_slice(data);
        }
        buffer
    }

    #[test]
    fn test_frames_in_order() {
        let first = [1u8, 2, 3, 4, 5, 6, 7, 8];
        let second = [0xB2u8, 0xA6, 0xE9, 0x59, 0x26, 0xE8, 0x9C, 0x25];
        let buffer = encode_frames(&[
            (first, &b"thumbnail"[..]),
            (second, &[][..]),
            (first, &[0u8; 48][..]),
        ]);

        let frames: Vec<Frame> = AttributeFrames::new(&buffer, 3)
            .collect::<Result<_>>()
            .unwrap();
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].id, base64url_encode(&first));
        assert_eq!(frames[0].data, b"thumbnail");
        assert_eq!(frames[1].id, "sqbpWSbonCU");
        assert!(frames[1].data.is_empty());
        assert_eq!(frames[2].data, vec![0u8; 48]);
    }

    #[test]
    fn test_count_limits_records() {
        let buffer = encode_frames(&[([1; 8], &b"a"[..]), ([2; 8], &b"b"[..])]);
        assert_eq!(AttributeFrames::new(&buffer, 1).count(), 1);
        assert_eq!(AttributeFrames::new(&buffer, 0).count(), 0);
    }

    #[test]
    fn test_truncated_data() {
        let mut buffer = encode_frames(&[([1; 8], &b"complete"[..]), ([2; 8], &b"cut short"[..])]);
        buffer.truncate(buffer.len() - 3);

        let mut frames = AttributeFrames::new(&buffer, 2);
        assert!(frames.next().unwrap().is_ok());
        assert!(matches!(frames.next(), Some(Err(MegaError::InvalidResponse))));
        assert!(frames.next().is_none());
    }

    #[test]
    fn test_truncated_header() {
        let buffer = encode_frames(&[([1; 8], &b"x"[..])]);
        let mut frames = AttributeFrames::new(&buffer, 2);
        assert!(frames.next().unwrap().is_ok());
        assert!(matches!(frames.next(), Some(Err(MegaError::InvalidResponse))));
    }

    #[test]
    fn test_oversized_length() {
        let mut buffer = vec![1u8; 8];
        buffer.extend_from_slice(&u32::MAX.to_le_bytes());
        buffer.extend_from_slice(b"tiny");

        let mut frames = AttributeFrames::new(&buffer, 1);
        assert!(matches!(frames.next(), Some(Err(MegaError::InvalidResponse))));
        assert!(frames.next().is_none());
    }
}
