//! Core of the Ramen live-link.
//!
//! This crate provides:
//! - The host boundary: [`ScriptEngine`], [`HostScheduler`] and a ready-made
//!   cooperative host queue
//! - The pending-execution bridge that moves a script onto the host thread
//!   and its result back, with a deadline
//! - The wire protocol and a blocking client
//! - An external-interpreter engine for running without the host application
//! - The node introspection dump schema

pub mod bridge;
pub mod client;
pub mod dump;
pub mod engine;
pub mod error;
pub mod host;
pub mod protocol;

pub use bridge::{CancelHandle, ExecutionOutcome, PendingExecution, submit};
pub use client::LiveLinkClient;
pub use dump::{Category, NodeDump, SocketTypeSummary};
pub use engine::CommandEngine;
pub use error::{Error, Result};
pub use host::{HostHandle, HostJob, HostLoop, HostScheduler, ScriptEngine, ScriptFailure, cooperative};
pub use protocol::Response;
