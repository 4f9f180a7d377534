//! Skiff API service library.
//!
//! Exposed as a library so integration tests can assemble the router and
//! drive the HTTP surface directly; the binary in `main.rs` is a thin shell.

pub mod api_doc;
pub mod auth;
pub mod error;
pub mod handlers;
pub mod http_range;
pub mod naming;
pub mod passwords;
pub mod reaper;
pub mod setup;
pub mod state;
