//! # Controller
//!
//! Namespace resolution, rule rendering and the reconcile driver.

pub mod namespace;
pub mod reconciler;
pub mod rules;
