#![forbid(unsafe_code)]
//! Identifiers, the crate error type, and the shared on-disk page header.

use std::fmt;

/// Page number inside a partition.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PageId(pub u64);
/// Log sequence number stamped on modified pages.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, Default)]
pub struct Lsn(pub u64);
/// Identifier of a partition registered with the buffer manager.
#[derive(Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug)]
pub struct PartitionId(pub u32);

/// Identifier of a query variable assigned by semantic analysis.
#[derive(
    Copy, Clone, Eq, PartialEq, Ord, PartialOrd, Hash, Debug, serde::Serialize, serde::Deserialize,
)]
#[serde(transparent)]
pub struct VarId(pub u32);

/// One position of a triple pattern: a dictionary id or a free variable.
#[derive(Copy, Clone, Eq, PartialEq, Hash, Debug, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Slot {
    /// Bound to a dictionary id.
    Const(u32),
    /// A free variable.
    Var(VarId),
}

impl Slot {
    /// Returns the constant, if bound.
    pub fn constant(self) -> Option<u32> {
        match self {
            Slot::Const(id) => Some(id),
            Slot::Var(_) => None,
        }
    }

    /// Returns the variable, if free.
    pub fn var(self) -> Option<VarId> {
        match self {
            Slot::Var(id) => Some(id),
            Slot::Const(_) => None,
        }
    }

    /// True when the slot is a constant.
    pub fn is_const(self) -> bool {
        matches!(self, Slot::Const(_))
    }
}

/// Errors surfaced by storage, buffer management and planning.
#[derive(thiserror::Error, Debug)]
pub enum TristoreError {
    /// Underlying I/O failure.
    #[error("IO: {0}")]
    Io(#[from] std::io::Error),
    /// On-disk data failed validation.
    #[error("corruption: {0}")]
    Corruption(&'static str),
    /// Caller supplied an invalid argument.
    #[error("invalid argument: {0}")]
    Invalid(&'static str),
    /// Invalid argument with a dynamic message.
    #[error("invalid argument: {0}")]
    InvalidOwned(String),
    /// Configuration could not be loaded.
    #[error("config: {0}")]
    Config(String),
    /// A requested item does not exist.
    #[error("not found")]
    NotFound,
}

/// Crate-wide result alias.
pub type Result<T> = std::result::Result<T, TristoreError>;

impl fmt::Display for PageId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for PartitionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl fmt::Display for VarId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "?{}", self.0)
    }
}

/// CRC32 of a page image, seeded with its page number so that a page
/// written to the wrong slot fails verification.
pub fn page_crc32(page_no: u64, payload: &[u8]) -> u32 {
    let mut hasher = crc32fast::Hasher::new();
    hasher.update(&page_no.to_be_bytes());
    hasher.update(payload);
    hasher.finalize()
}

impl From<u64> for PageId {
    fn from(value: u64) -> Self {
        PageId(value)
    }
}

pub mod page {
    //! Shared on-disk page metadata used by every segment.

    use core::convert::{TryFrom, TryInto};

    use super::{Lsn, PageId, Result, TristoreError};

    /// Magic bytes opening every formatted page.
    pub const PAGE_MAGIC: [u8; 4] = *b"TRI3";
    /// Current page format version.
    pub const PAGE_FORMAT_VERSION: u16 = 1;
    /// Default page size in bytes.
    pub const DEFAULT_PAGE_SIZE: u32 = 16384;
    /// Length of the fixed page header.
    pub const PAGE_HDR_LEN: usize = 32;

    pub mod header {
        //! Byte offsets for fixed header fields.
        use core::ops::Range;

        /// Magic bytes.
        pub const MAGIC: Range<usize> = 0..4;
        /// Format version.
        pub const FORMAT_VERSION: Range<usize> = 4..6;
        /// Page kind tag.
        pub const PAGE_KIND: usize = 6;
        /// Reserved, always zero.
        pub const RESERVED: usize = 7;
        /// Page size.
        pub const PAGE_SIZE: Range<usize> = 8..12;
        /// Page number.
        pub const PAGE_NO: Range<usize> = 12..20;
        /// Page LSN.
        pub const LSN: Range<usize> = 20..28;
        /// CRC32 of the page with this field zeroed.
        pub const CRC32: Range<usize> = 28..32;
    }

    /// Kind tag stored in the page header.
    #[repr(u8)]
    #[derive(Copy, Clone, Debug, Eq, PartialEq)]
    pub enum PageKind {
        /// Segment catalog.
        Meta = 1,
        /// B-tree leaf.
        BTreeLeaf = 2,
        /// B-tree inner node.
        BTreeInner = 3,
        /// Opaque blob chunk.
        Blob = 4,
    }

    impl PageKind {
        /// Returns the on-disk tag.
        pub const fn as_u8(self) -> u8 {
            self as u8
        }
    }

    impl TryFrom<u8> for PageKind {
        type Error = TristoreError;

        fn try_from(value: u8) -> Result<Self> {
            match value {
                1 => Ok(PageKind::Meta),
                2 => Ok(PageKind::BTreeLeaf),
                3 => Ok(PageKind::BTreeInner),
                4 => Ok(PageKind::Blob),
                _ => Err(TristoreError::Corruption("unknown page kind")),
            }
        }
    }

    /// Decoded fixed page header.
    #[derive(Clone, Debug, Eq, PartialEq)]
    pub struct PageHeader {
        /// Format version.
        pub format_version: u16,
        /// Page kind.
        pub kind: PageKind,
        /// Page size in bytes.
        pub page_size: u32,
        /// Page number.
        pub page_no: PageId,
        /// LSN of the last modification.
        pub lsn: Lsn,
        /// Stored checksum.
        pub crc32: u32,
    }

    impl PageHeader {
        /// Creates a header for a fresh page.
        pub fn new(page_no: PageId, kind: PageKind, page_size: u32) -> Result<Self> {
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(TristoreError::Invalid("page size smaller than header"));
            }
            Ok(Self {
                format_version: PAGE_FORMAT_VERSION,
                kind,
                page_size,
                page_no,
                lsn: Lsn(0),
                crc32: 0,
            })
        }

        /// Sets the LSN.
        pub fn with_lsn(mut self, lsn: Lsn) -> Self {
            self.lsn = lsn;
            self
        }

        /// Encodes the header into the first [`PAGE_HDR_LEN`] bytes of `dst`.
        pub fn encode(&self, dst: &mut [u8]) -> Result<()> {
            if dst.len() < PAGE_HDR_LEN {
                return Err(TristoreError::Invalid("page header buffer too small"));
            }
            let hdr = &mut dst[..PAGE_HDR_LEN];
            hdr[header::MAGIC].copy_from_slice(&PAGE_MAGIC);
            hdr[header::FORMAT_VERSION].copy_from_slice(&self.format_version.to_be_bytes());
            hdr[header::PAGE_KIND] = self.kind.as_u8();
            hdr[header::RESERVED] = 0;
            hdr[header::PAGE_SIZE].copy_from_slice(&self.page_size.to_be_bytes());
            hdr[header::PAGE_NO].copy_from_slice(&self.page_no.0.to_be_bytes());
            hdr[header::LSN].copy_from_slice(&self.lsn.0.to_be_bytes());
            hdr[header::CRC32].copy_from_slice(&self.crc32.to_be_bytes());
            Ok(())
        }

        /// Decodes and validates a header.
        pub fn decode(src: &[u8]) -> Result<Self> {
            if src.len() < PAGE_HDR_LEN {
                return Err(TristoreError::Corruption("page header truncated"));
            }
            let hdr = &src[..PAGE_HDR_LEN];
            if hdr[header::MAGIC] != PAGE_MAGIC {
                return Err(TristoreError::Corruption("invalid page magic"));
            }
            let format_version = u16::from_be_bytes(field(hdr, header::FORMAT_VERSION)?);
            if format_version != PAGE_FORMAT_VERSION {
                return Err(TristoreError::Corruption("unsupported page format version"));
            }
            if hdr[header::RESERVED] != 0 {
                return Err(TristoreError::Corruption(
                    "page header reserved byte not zero",
                ));
            }
            let kind = PageKind::try_from(hdr[header::PAGE_KIND])?;
            let page_size = u32::from_be_bytes(field(hdr, header::PAGE_SIZE)?);
            if (page_size as usize) < PAGE_HDR_LEN {
                return Err(TristoreError::Corruption("page size smaller than header"));
            }
            let page_no = PageId(u64::from_be_bytes(field(hdr, header::PAGE_NO)?));
            let lsn = Lsn(u64::from_be_bytes(field(hdr, header::LSN)?));
            let crc32 = u32::from_be_bytes(field(hdr, header::CRC32)?);
            Ok(Self {
                format_version,
                kind,
                page_size,
                page_no,
                lsn,
                crc32,
            })
        }
    }

    fn field<const N: usize>(hdr: &[u8], range: core::ops::Range<usize>) -> Result<[u8; N]> {
        hdr[range]
            .try_into()
            .map_err(|_| TristoreError::Corruption("page header field width"))
    }

    /// Zeroes the checksum field.
    pub fn clear_crc32(buf: &mut [u8]) -> Result<()> {
        if buf.len() < header::CRC32.end {
            return Err(TristoreError::Invalid("page header buffer too small"));
        }
        buf[header::CRC32].fill(0);
        Ok(())
    }

    /// Computes and stores the checksum of a fully formatted page.
    pub fn seal(buf: &mut [u8], page_no: PageId) -> Result<()> {
        clear_crc32(buf)?;
        let crc = super::page_crc32(page_no.0, buf);
        buf[header::CRC32].copy_from_slice(&crc.to_be_bytes());
        Ok(())
    }

    /// Decodes the header and checks the stored checksum against the page bytes.
    pub fn verify(buf: &[u8], expected: PageId) -> Result<PageHeader> {
        let header = PageHeader::decode(buf)?;
        if header.page_no != expected {
            return Err(TristoreError::Corruption("page number mismatch"));
        }
        let mut scratch = buf.to_vec();
        clear_crc32(&mut scratch)?;
        if super::page_crc32(expected.0, &scratch) != header.crc32 {
            return Err(TristoreError::Corruption("page checksum mismatch"));
        }
        Ok(header)
    }
}

#[cfg(test)]
mod tests {
    use super::{page, page::PageHeader, page::PageKind, Lsn, PageId};
    use std::convert::TryFrom;

    #[test]
    fn page_header_roundtrip() {
        let mut buf = [0u8; page::PAGE_HDR_LEN];
        let header = PageHeader::new(PageId(42), PageKind::BTreeLeaf, page::DEFAULT_PAGE_SIZE)
            .unwrap()
            .with_lsn(Lsn(9));
        header.encode(&mut buf).unwrap();
        let decoded = PageHeader::decode(&buf).unwrap();
        assert_eq!(decoded, header);
    }

    #[test]
    fn sealed_page_verifies_and_detects_flips() {
        let mut buf = vec![0u8; 256];
        PageHeader::new(PageId(3), PageKind::Blob, 256)
            .unwrap()
            .encode(&mut buf)
            .unwrap();
        buf[100] = 7;
        page::seal(&mut buf, PageId(3)).unwrap();
        assert!(page::verify(&buf, PageId(3)).is_ok());
        assert!(page::verify(&buf, PageId(4)).is_err());
        buf[101] ^= 0xFF;
        assert!(page::verify(&buf, PageId(3)).is_err());
    }

    #[test]
    fn page_kind_from_u8_rejects_unknown() {
        assert!(PageKind::try_from(0).is_err());
        assert!(PageKind::try_from(9).is_err());
    }
}
