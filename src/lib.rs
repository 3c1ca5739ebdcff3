pub mod api;
pub mod audit;
pub mod cluster;
pub mod config;
pub mod coordinator;
pub mod error;
pub mod job;
pub mod node;
pub mod shutdown;
pub mod store;

pub use error::{PolarisError, Result};
