//! Page directory structures.
//!
//! The page directory is serialized as JSON between the page data region and
//! the footer, making every fragment file self-describing and independently
//! openable.

use serde::{Deserialize, Serialize};

use common_error::{StrataError, StrataResult};

/// Location and shape of one encoded page within a fragment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageInfo {
    /// Byte offset of the page within the file.
    pub offset: u64,
    /// Encoded byte length of the page.
    pub length: u64,
    /// Logical rows held by the page.
    pub rows: u32,
}

/// All pages of a single column, in row order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnPages {
    /// Column name, matching the dataset schema.
    pub name: String,
    /// Pages in ascending row order.
    pub pages: Vec<PageInfo>,
}

impl ColumnPages {
    /// Total logical rows across all pages of this column.
    pub fn row_count(&self) -> usize {
        self.pages.iter().map(|p| p.rows as usize).sum()
    }

    /// Map a global row range onto per-page local ranges.
    ///
    /// Returns `(page_index, local_start, local_len)` for every page that
    /// overlaps `[start, start + len)`, in row order. Pages outside the range
    /// are never touched, which is what makes partial-range decode possible.
    pub fn pages_for_range(&self, start: usize, len: usize) -> Vec<(usize, usize, usize)> {
        let mut out = Vec::new();
        let end = start + len;
        let mut page_start = 0usize;
        for (idx, page) in self.pages.iter().enumerate() {
            let page_end = page_start + page.rows as usize;
            if page_end > start && page_start < end {
                let local_start = start.saturating_sub(page_start);
                let local_end = end.min(page_end) - page_start;
                out.push((idx, local_start, local_end - local_start));
            }
            if page_end >= end {
                break;
            }
            page_start = page_end;
        }
        out
    }
}

/// Per-column page listing for a whole fragment, in schema order.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PageDirectory {
    /// One entry per column of the fragment schema.
    pub columns: Vec<ColumnPages>,
}

impl PageDirectory {
    /// Look up the page listing for a column by name.
    pub fn column(&self, name: &str) -> Option<&ColumnPages> {
        self.columns.iter().find(|c| c.name == name)
    }

    /// Serialize to the on-disk JSON encoding.
    pub fn to_bytes(&self) -> StrataResult<Vec<u8>> {
        Ok(serde_json::to_vec(self)?)
    }

    /// Parse from on-disk bytes. Parse failures are corruption, not caller
    /// errors, so they surface as `CorruptPage`.
    pub fn from_bytes(bytes: &[u8]) -> StrataResult<Self> {
        serde_json::from_slice(bytes)
            .map_err(|e| StrataError::corrupt_page(format!("unreadable page directory: {e}")))
    }
}
