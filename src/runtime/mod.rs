//! # Runtime Module
//!
//! Process setup and failure handling for the one-shot job.

pub mod error_policy;
pub mod initialization;

pub use error_policy::*;
pub use initialization::*;
