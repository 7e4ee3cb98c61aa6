pub mod anchor;
pub mod audit;
pub mod chain;
pub mod config;
pub mod error;
pub mod policy;
pub mod server;
pub mod state;
