pub mod cli;
pub mod config;
pub mod database;
pub mod error;
pub mod hierarchy;
pub mod idp;
pub mod services;
pub mod types;
