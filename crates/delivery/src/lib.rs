//! # Delivery
//!
//! Broker clients implementing `contracts::JobBroker`.
//!
//! - `GearmanClient`: Gearman binary protocol over pooled TCP connections
//! - `MockBroker`: in-memory broker with scripted failures, for tests and dry runs
//!
//! Every submit is a background job (`SUBMIT_JOB_BG`): success means the job
//! server queued it, nothing more.

mod client;
mod mock_broker;
mod pool;
pub mod protocol;

pub use client::{GearmanClient, GearmanConfig};
pub use contracts::{DeliveryError, JobBroker, JobHandle};
pub use mock_broker::{MockBroker, Submission};
pub use pool::{ConnectionPool, PooledConnection};
pub use protocol::{Packet, PacketType, ProtocolError};
