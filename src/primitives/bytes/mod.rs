#![forbid(unsafe_code)]
//! Encoding, varint, and buffer utilities shared by the segment codecs.

pub mod ord {
    //! Fixed-width big-endian keys; byte order equals numeric order.

    /// Encodes a triple-shaped key so that byte comparison matches tuple order.
    pub fn key3(v1: u32, v2: u32, v3: u32) -> [u8; 12] {
        let mut out = [0u8; 12];
        for (chunk, v) in out.chunks_exact_mut(4).zip([v1, v2, v3]) {
            chunk.copy_from_slice(&v.to_be_bytes());
        }
        out
    }
}

pub mod var {
    //! Unsigned varints and ZigZag signed integers.

    use crate::types::{Result, TristoreError};

    /// Encodes a u64 as an unsigned LEB128 varint.
    pub fn encode_u64(mut v: u64, out: &mut Vec<u8>) {
        loop {
            let byte = (v & 0x7f) as u8;
            v >>= 7;
            if v == 0 {
                out.push(byte);
                break;
            }
            out.push(byte | 0x80);
        }
    }

    /// Decodes a varint starting at `*off`, advancing the offset.
    pub fn decode_u64(src: &[u8], off: &mut usize) -> Result<u64> {
        let mut result = 0u64;
        let mut shift = 0u32;
        for i in 0..10 {
            let byte = *src
                .get(*off)
                .ok_or(TristoreError::Corruption("varint decode truncated"))?;
            *off += 1;
            let payload = (byte & 0x7f) as u64;
            if i == 9 && payload > 1 {
                return Err(TristoreError::Corruption("varint overflow"));
            }
            result |= payload << shift;
            if byte & 0x80 == 0 {
                return Ok(result);
            }
            shift += 7;
        }
        Err(TristoreError::Corruption("varint too long"))
    }

    /// Encodes an i64 as a ZigZag varint.
    pub fn encode_i64(v: i64, out: &mut Vec<u8>) {
        encode_u64(((v << 1) ^ (v >> 63)) as u64, out);
    }

    /// Decodes a ZigZag varint.
    pub fn decode_i64(src: &[u8], off: &mut usize) -> Result<i64> {
        let zigzag = decode_u64(src, off)?;
        Ok(((zigzag >> 1) as i64) ^ (-((zigzag & 1) as i64)))
    }
}

pub mod pack {
    //! Zero-suppressed big-endian integers of one to four bytes.
    //!
    //! A value occupies the minimum number of bytes needed to hold it, and zero
    //! takes no bytes at all. The byte count is carried out of band by the
    //! caller (typically folded into an opcode byte).

    use crate::types::{Result, TristoreError};

    /// Bytes needed to store `v` with zero suppression (0..=4).
    pub fn bytes0(v: u32) -> usize {
        if v >= 1 << 24 {
            4
        } else if v >= 1 << 16 {
            3
        } else if v >= 1 << 8 {
            2
        } else if v > 0 {
            1
        } else {
            0
        }
    }

    /// Appends `v` using exactly [`bytes0`]`(v)` bytes.
    pub fn write_delta0(out: &mut Vec<u8>, v: u32) {
        let len = bytes0(v);
        let be = v.to_be_bytes();
        out.extend_from_slice(&be[4 - len..]);
    }

    /// Reads a `len` byte big-endian value at `*off`, advancing the offset.
    pub fn read_delta(src: &[u8], off: &mut usize, len: usize) -> Result<u32> {
        if len > 4 {
            return Err(TristoreError::Corruption("packed integer wider than 4 bytes"));
        }
        let end = *off + len;
        let bytes = src
            .get(*off..end)
            .ok_or(TristoreError::Corruption("packed integer truncated"))?;
        *off = end;
        Ok(bytes.iter().fold(0u32, |acc, &b| (acc << 8) | b as u32))
    }
}

pub mod buf {
    //! A slice-backed cursor that reports truncation as corruption.

    use core::fmt;

    use crate::types::{Result, TristoreError};

    use super::var;

    /// Reads bytes from a slice with offset tracking.
    pub struct Cursor<'a> {
        /// The underlying byte slice.
        pub buf: &'a [u8],
        /// Current read offset.
        pub off: usize,
    }

    impl<'a> Cursor<'a> {
        /// Creates a new cursor starting at offset 0.
        pub fn new(buf: &'a [u8]) -> Self {
            Self { buf, off: 0 }
        }

        /// Takes the next `n` bytes.
        pub fn take(&mut self, n: usize) -> Result<&'a [u8]> {
            let end = self
                .off
                .checked_add(n)
                .ok_or(TristoreError::Corruption("cursor offset overflow"))?;
            let slice = self
                .buf
                .get(self.off..end)
                .ok_or(TristoreError::Corruption("cursor take beyond buffer"))?;
            self.off = end;
            Ok(slice)
        }

        /// Reads one byte.
        pub fn u8(&mut self) -> Result<u8> {
            Ok(self.take(1)?[0])
        }

        /// Reads a big-endian u32.
        pub fn u32_be(&mut self) -> Result<u32> {
            let mut raw = [0u8; 4];
            raw.copy_from_slice(self.take(4)?);
            Ok(u32::from_be_bytes(raw))
        }

        /// Reads an unsigned varint.
        pub fn varint(&mut self) -> Result<u64> {
            var::decode_u64(self.buf, &mut self.off)
        }

        /// Reads a varint that must fit into a u32.
        pub fn varint_u32(&mut self) -> Result<u32> {
            u32::try_from(self.varint()?)
                .map_err(|_| TristoreError::Corruption("varint exceeds u32"))
        }

        /// Returns the number of bytes remaining.
        pub fn remaining(&self) -> usize {
            self.buf.len().saturating_sub(self.off)
        }
    }

    impl<'a> fmt::Debug for Cursor<'a> {
        fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
            f.debug_struct("Cursor")
                .field("off", &self.off)
                .field("remaining", &self.remaining())
                .finish()
        }
    }
}
