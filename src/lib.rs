pub mod config;
pub mod context;
pub mod cycle;
pub mod error;
pub mod gang;
pub mod jobdb;
pub mod nodedb;
pub mod queue;
pub mod resources;
pub mod telemetry;
pub mod testkit;
