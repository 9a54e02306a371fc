pub mod config;
pub mod error;
pub mod health;
pub mod metrics_consts;
pub mod registry;
pub mod retry;
pub mod rules;
pub mod server;
pub mod signals;
pub mod supervisor;
pub mod worker;
