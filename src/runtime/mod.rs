//! # Runtime Module
//!
//! Startup, work queues, dispatchers, error policy and the watch loop.

pub mod dispatcher;
pub mod error_policy;
pub mod initialization;
pub mod queue;
pub mod watch_loop;

pub use dispatcher::Dispatcher;
pub use initialization::{initialize, InitializationResult};
pub use queue::WorkQueue;
pub use watch_loop::run_watch_loop;
