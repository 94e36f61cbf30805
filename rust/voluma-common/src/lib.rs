//! Core definitions (error type and result alias), relied upon by all voluma-* crates.

pub mod error;
pub mod result;

pub use result::Result;
