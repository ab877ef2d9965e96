//! Fragment file footer.
//!
//! The footer occupies the fixed trailing bytes of every fragment file so the
//! page directory can be located in O(1) without scanning page data:
//!
//! ```text
//! directory_offset: u64 | row_count: u64 | format_version: u32 |
//! schema_digest: u32   | magic: "STRA"
//! ```
//!
//! All integers little-endian.

use common_error::{StrataError, StrataResult};

/// Magic bytes closing every fragment file.
pub const MAGIC: [u8; 4] = *b"STRA";

/// Current fragment format version.
pub const FORMAT_VERSION: u32 = 1;

/// Size of the encoded footer in bytes.
pub const FOOTER_SIZE: usize = 28;

/// Decoded fragment footer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Footer {
    /// Byte offset of the page directory within the file.
    pub directory_offset: u64,
    /// Total logical rows in the fragment.
    pub row_count: u64,
    /// Format version the fragment was written with.
    pub format_version: u32,
    /// CRC32 digest of the canonical schema string.
    pub schema_digest: u32,
}

impl Footer {
    /// Encode into the fixed trailing byte layout.
    pub fn encode(&self) -> [u8; FOOTER_SIZE] {
        let mut buf = [0u8; FOOTER_SIZE];
        buf[0..8].copy_from_slice(&self.directory_offset.to_le_bytes());
        buf[8..16].copy_from_slice(&self.row_count.to_le_bytes());
        buf[16..20].copy_from_slice(&self.format_version.to_le_bytes());
        buf[20..24].copy_from_slice(&self.schema_digest.to_le_bytes());
        buf[24..28].copy_from_slice(&MAGIC);
        buf
    }

    /// Decode from the trailing `FOOTER_SIZE` bytes of a fragment file.
    pub fn decode(bytes: &[u8]) -> StrataResult<Self> {
        if bytes.len() != FOOTER_SIZE {
            return Err(StrataError::corrupt_page(format!(
                "footer must be {FOOTER_SIZE} bytes, got {}",
                bytes.len()
            )));
        }
        if bytes[24..28] != MAGIC {
            return Err(StrataError::corrupt_page(format!(
                "bad magic {:?}, expected {:?}",
                &bytes[24..28],
                MAGIC
            )));
        }

        let mut u64_buf = [0u8; 8];
        let mut u32_buf = [0u8; 4];

        u64_buf.copy_from_slice(&bytes[0..8]);
        let directory_offset = u64::from_le_bytes(u64_buf);
        u64_buf.copy_from_slice(&bytes[8..16]);
        let row_count = u64::from_le_bytes(u64_buf);
        u32_buf.copy_from_slice(&bytes[16..20]);
        let format_version = u32::from_le_bytes(u32_buf);
        u32_buf.copy_from_slice(&bytes[20..24]);
        let schema_digest = u32::from_le_bytes(u32_buf);

        if format_version != FORMAT_VERSION {
            return Err(StrataError::corrupt_page(format!(
                "unsupported format version {format_version}, expected {FORMAT_VERSION}"
            )));
        }

        Ok(Self {
            directory_offset,
            row_count,
            format_version,
            schema_digest,
        })
    }
}
