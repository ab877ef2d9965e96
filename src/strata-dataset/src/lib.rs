//! Dataset layer over the Strata columnar format.
//!
//! A dataset is a directory of immutable fragment files plus a JSON manifest
//! that names the schema, the primary-key column, and the live fragments.
//! This crate provides:
//!
//! - [`Dataset`] / [`open_dataset`] / [`write_table`]: open, create, and
//!   write with primary-key enforcement and atomic commits.
//! - [`ScannerBuilder`] / [`Scanner`]: scans with projection, filter, limit,
//!   and offset pushdown.
//! - [`expr`]: the predicate expression tree ([`col`], [`lit`]) evaluated
//!   with three-valued logic.
//! - [`FileFormat`]: the storage abstraction the dataset layer drives.

pub mod dataset;
pub mod eval;
pub mod expr;
pub mod format;
pub mod layout;
pub mod manifest;
pub mod scanner;

pub use dataset::{open_dataset, write_table, Dataset, KeyValue, WriteMode};
pub use eval::ExprEvaluator;
pub use expr::{col, lit, BinaryOp, Expr, UnaryOp, Value};
pub use format::{FileFormat, StrataFormat};
pub use layout::DatasetLayout;
pub use manifest::{ColumnSpec, FragmentId, FragmentRef, Manifest};
pub use scanner::{FragmentSource, Scanner, ScannerBuilder};
