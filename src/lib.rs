pub mod clock;
pub mod config;
pub mod coordinator;
pub mod engine;
pub mod limits;
pub mod link;
pub mod model;
pub mod observability;
pub mod profile;
pub mod schedule;
pub mod sweeper;
pub mod wal;
