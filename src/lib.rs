//! # server-acl-init
//!
//! Bootstraps and reconciles the ACL system of a Consul cluster running on Kubernetes.
//!
//! ## Overview
//!
//! A run waits for the Consul servers, obtains the root ACL token (minting it once and
//! storing it in a Kubernetes Secret), then converges:
//!
//! - one policy per enabled capability, plus component tokens stored in Secrets
//! - one `kubernetes` auth method so pods can log in with their service account JWT
//! - one binding rule mapping service accounts onto Consul services
//!
//! Every step is idempotent. Running again with the same flags makes no writes; running
//! with changed flags updates or moves objects in place.
//!
//! ## Namespaces
//!
//! With Consul Enterprise namespaces enabled, connect-inject and catalog sync each resolve
//! to one of three modes: a single destination namespace, or mirroring Kubernetes
//! namespaces with an optional prefix. See [`controller::namespace`].

pub mod cli;
pub mod config;
pub mod constants;
pub mod controller;
pub mod observability;
pub mod provider;
pub mod runtime;

pub use controller::reconciler::{ReconcilePhase, ReconcileReport, Reconciler, ReconcilerError};
