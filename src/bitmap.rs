//! Classification bitmap: per-packet interface routing (C3 input, §3 "Classification bitmap",
//! A3 loader).
//!
//! The in-memory `Bitmap` is what C3 (`dispatch.rs`) actually consults; this module also loads the
//! concrete on-disk container this crate reads, since §6 declares the wire format out of scope for
//! the core and somebody still has to pick one. Bit 0 routes to interface A, bit 1 to B, packed
//! little-endian within each byte, exactly as §3 specifies.

use crate::error::ReplayError;

const MAGIC: &[u8; 4] = b"PRPB";

/// A parsed classification bitmap bound to a single source, with its own read cursor
/// (`cache_byte`/`cache_bit` in the spec's terms).
#[derive(Debug, Clone)]
pub struct Bitmap {
    bits: Vec<u8>,
    packet_count: usize,
    comment: String,
    cache_byte: usize,
    cache_bit: u8,
}

impl Bitmap {
    /// Build a bitmap directly from packed bytes, e.g. for tests or programmatic construction.
    pub fn from_packed(bits: Vec<u8>, packet_count: usize, comment: impl Into<String>) -> Self {
        Bitmap {
            bits,
            packet_count,
            comment: comment.into(),
            cache_byte: 0,
            cache_bit: 0,
        }
    }

    /// Parse this crate's tcpprep-style container: 4-byte magic, a little-endian comment length,
    /// the comment bytes, a little-endian packet count, then the packed bits.
    pub fn parse(data: &[u8]) -> Result<Self, ReplayError> {
        if data.len() < 4 || &data[0..4] != MAGIC {
            return Err(ReplayError::config("bitmap: bad magic"));
        }
        let mut pos = 4;
        let comment_len = read_u32(data, &mut pos)? as usize;
        if pos + comment_len > data.len() {
            return Err(ReplayError::config("bitmap: truncated comment"));
        }
        let comment = String::from_utf8_lossy(&data[pos..pos + comment_len]).into_owned();
        pos += comment_len;
        let packet_count = read_u32(data, &mut pos)? as usize;
        let expected_bytes = packet_count.div_ceil(8);
        if data.len() - pos < expected_bytes {
            return Err(ReplayError::config("bitmap: truncated bit data"));
        }
        let bits = data[pos..pos + expected_bytes].to_vec();
        Ok(Bitmap {
            bits,
            packet_count,
            comment,
            cache_byte: 0,
            cache_bit: 0,
        })
    }

    /// Serialize back into this crate's on-disk container (used by tests, and by the A3 tool's
    /// counterpart if one ever needs to write a bitmap this crate can read).
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(4 + 4 + self.comment.len() + 4 + self.bits.len());
        out.extend_from_slice(MAGIC);
        out.extend_from_slice(&(self.comment.len() as u32).to_le_bytes());
        out.extend_from_slice(self.comment.as_bytes());
        out.extend_from_slice(&(self.packet_count as u32).to_le_bytes());
        out.extend_from_slice(&self.bits);
        out
    }

    pub fn comment(&self) -> &str {
        &self.comment
    }

    pub fn packet_count(&self) -> usize {
        self.packet_count
    }

    /// Reset the read cursor. Called between sources and between loops (§3, §4.6).
    pub fn reset_cursor(&mut self) {
        self.cache_byte = 0;
        self.cache_bit = 0;
    }

    /// Consume and return the next bit, advancing the cursor. `None` once every packet this
    /// bitmap covers has been consulted.
    pub fn next_bit(&mut self) -> Option<bool> {
        if self.cache_byte >= self.bits.len() {
            return None;
        }
        let bit = (self.bits[self.cache_byte] >> self.cache_bit) & 1 == 1;
        self.cache_bit += 1;
        if self.cache_bit == 8 {
            self.cache_bit = 0;
            self.cache_byte += 1;
        }
        Some(bit)
    }
}

fn read_u32(data: &[u8], pos: &mut usize) -> Result<u32, ReplayError> {
    if data.len() - *pos < 4 {
        return Err(ReplayError::config("bitmap: truncated length field"));
    }
    let bytes: [u8; 4] = data[*pos..*pos + 4].try_into().unwrap();
    *pos += 4;
    Ok(u32::from_le_bytes(bytes))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bit_order_is_lsb_first_little_endian_bytes() {
        // 0b1010 LSB-first means bit0=0, bit1=1, bit2=0, bit3=1.
        let mut bmp = Bitmap::from_packed(vec![0b0000_1010], 4, "");
        assert_eq!(bmp.next_bit(), Some(false));
        assert_eq!(bmp.next_bit(), Some(true));
        assert_eq!(bmp.next_bit(), Some(false));
        assert_eq!(bmp.next_bit(), Some(true));
        assert_eq!(bmp.next_bit(), None);
    }

    #[test]
    fn reset_cursor_rewinds() {
        let mut bmp = Bitmap::from_packed(vec![0b0000_0001], 1, "");
        assert_eq!(bmp.next_bit(), Some(true));
        assert_eq!(bmp.next_bit(), None);
        bmp.reset_cursor();
        assert_eq!(bmp.next_bit(), Some(true));
    }

    #[test]
    fn parse_round_trips_to_bytes() {
        let original = Bitmap::from_packed(vec![0b1100_0101, 0b0000_0011], 10, "demo bitmap");
        let bytes = original.to_bytes();
        let mut parsed = Bitmap::parse(&bytes).unwrap();
        assert_eq!(parsed.comment(), "demo bitmap");
        assert_eq!(parsed.packet_count(), 10);
        for _ in 0..10 {
            assert!(parsed.next_bit().is_some());
        }
    }

    #[test]
    fn parse_rejects_bad_magic() {
        assert!(Bitmap::parse(b"xxxx").is_err());
    }

    #[test]
    fn parse_rejects_truncated_bits() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(MAGIC);
        bytes.extend_from_slice(&0u32.to_le_bytes());
        bytes.extend_from_slice(&100u32.to_le_bytes()); // claims 100 packets
        // but no bit data follows
        assert!(Bitmap::parse(&bytes).is_err());
    }
}
