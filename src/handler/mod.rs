//! Handler module - notification classification and deferred handling.
//!
//! Provides:
//! - [`HandlerRegistry`] - maps command ids to notification handlers
//! - [`NotificationDispatcher`] - classifies frames and starts jobs
//! - [`JobQueue`] - bounded executor that keeps handlers off the receive path
//! - [`handle_error_indication`] - built-in job for error indications
//!
//! # Example
//!
//! ```
//! use altcom_rpc::handler::{
//!     handle_error_indication, HandlerRegistry, JobQueue, NotificationDispatcher,
//! };
//! use altcom_rpc::protocol::command;
//!
//! let mut registry = HandlerRegistry::new();
//! registry.register(command::ERROR_INDICATION, "error_indication", handle_error_indication);
//!
//! let dispatcher = NotificationDispatcher::new(registry, JobQueue::new(8));
//! assert!(dispatcher.registry().contains(command::ERROR_INDICATION));
//! ```

mod dispatcher;
mod errind;
mod jobs;
mod registry;

pub use dispatcher::{DispatchOutcome, NotificationDispatcher};
pub use errind::{handle_error_indication, ErrorIndication};
pub use jobs::{Job, JobQueue, DEFAULT_MAX_CONCURRENT_JOBS};
pub use registry::{BoxFuture, HandlerEntry, HandlerRegistry, NotificationHandler};
