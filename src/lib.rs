//! Sandboxed execution engine for user-submitted tools.
//!
//! `sandlot` takes a bundle of source files, classifies it, scores it
//! against a static security rule table, picks a runtime engine, and
//! runs the tool as a confined child process with resource limits,
//! bounded log capture, and idle expiry. Session state lives in memory;
//! all mutation goes through [`manager::SessionManager`].

pub mod classify;
pub mod config;
pub mod engine;
pub mod error;
pub mod events;
pub mod manager;
mod monitor;
mod process;
mod reaper;
pub mod security;
pub mod session;
pub mod submission;
mod supervisor;
pub mod workspace;

pub use error::{Result, SandlotError};
pub use manager::{SessionManager, SessionTicket, StartOutcome};
