pub mod availability;
pub mod compactor;
pub mod config;
pub mod error;
pub mod limits;
pub mod model;
pub mod notify;
pub mod observability;
pub mod provider;
pub mod queue;
pub mod visit;
pub mod wal;
