//! # Contracts
//!
//! Frozen interface contracts shared by every crate in the workspace.
//! Business crates depend on this crate only; reverse dependencies are prohibited.
//!
//! ## Ordering Model
//! - `sequence` is assigned once by the normalizer and never reused
//! - Events sharing a `ResourcePath` are delivered in `sequence` order
//! - Across paths only explicit dependencies are honored: a MOVE's register
//!   waits for its unregister (`ChangeEvent::after`)

mod broker;
mod config;
mod error;
mod event;
mod outcome;
mod resource_path;

pub use broker::*;
pub use config::*;
pub use error::*;
pub use event::*;
pub use outcome::*;
pub use resource_path::ResourcePath;
