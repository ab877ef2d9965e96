//! Error types and result aliases for Strata.

mod error;

pub use error::{GenericError, StrataError, StrataResult};
