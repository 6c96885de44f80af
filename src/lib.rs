//! Hand-off engine between the mobile-money platform and its fleet of CallBox
//! SIM gateways: worker registration and liveness, a pending-work queue with
//! exclusive claims, bounded retries, and a periodic upstream sync.

pub mod auth;
pub mod client;
pub mod config;
pub mod error;
pub mod history;
pub mod liveness;
pub mod models;
pub mod queue;
pub mod registry;
pub mod routes;
pub mod scheduler;
pub mod store;
pub mod upstream;
pub mod worker_processing;
