//! flux: a terminal AI coding assistant.
//!
//! The library half holds the provider adapters, the registry that builds them from
//! configuration, and [`session::Session`], which turns a provider's event stream into
//! conversation state for an interactive loop.

pub mod config;
pub mod paths;
pub mod provider;
pub mod session;
