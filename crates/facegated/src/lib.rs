//! facegated — school attendance daemon library.
//!
//! Wires the recognition pipeline (facegate-core) to the storage
//! abstraction (facegate-store) and the notification fan-out. The
//! daemon binary and the CLI both build an [`engine::Engine`] from
//! [`config::Config`].

pub mod config;
pub mod engine;
pub mod fanout;

pub use config::Config;
pub use engine::{CheckinOutcome, Engine, EngineConfig, EngineError};
pub use fanout::{CheckinEvent, LogNotifier, Notifier, NotifyError};
