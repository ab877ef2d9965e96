//! Strata fragment file format.
//!
//! A fragment is one immutable file holding a contiguous run of rows for a
//! full schema, laid out column-first:
//!
//! ```text
//! [page data region][page directory (JSON)][footer (28 bytes)]
//! ```
//!
//! The trailing footer locates the page directory in O(1); the directory
//! lists `(offset, length, rows)` per page per column, so a reader can open
//! a fragment without touching any page data and later decode only the
//! columns and row ranges a scan actually needs.
//!
//! - [`codec`]: per-page encode/decode with partial-range support
//! - [`FragmentWriter`]: buffers Arrow batches, chunks columns into pages
//! - [`FragmentReader`]: footer/directory open, projected range reads

pub mod codec;
mod footer;
mod page;
mod reader;
mod schema;
mod writer;

pub use footer::{Footer, FOOTER_SIZE, FORMAT_VERSION, MAGIC};
pub use page::{ColumnPages, PageDirectory, PageInfo};
pub use reader::FragmentReader;
pub use schema::{check_schema_match, schema_digest};
pub use writer::{FragmentDescriptor, FragmentWriter, WriteParams};
