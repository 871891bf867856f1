//! Boxrun Shared - code common to the runtime library and the CLI
//!
//! This crate contains the error taxonomy and the constants that both
//! the orchestration library (boxrun) and the command-line front end agree on.

pub mod constants;
pub mod errors;

pub use errors::{BoxrunError, BoxrunResult};
