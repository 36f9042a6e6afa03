//! # Consul Provider
//!
//! Native REST implementation of [`ControlPlane`](crate::provider::ControlPlane) and
//! [`AclApi`](crate::provider::AclApi) using reqwest with rustls.

mod client;
pub mod types;

pub use client::{ConsulConnection, ConsulREST};
