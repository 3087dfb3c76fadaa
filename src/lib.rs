pub mod access;
pub mod auth;
pub mod cli;
pub mod config;
pub mod directory;
pub mod history;
pub mod notify;
pub mod reports;
pub mod scheduler;
pub mod service_requests;
pub mod settings;
pub mod shared;
pub mod stats;
pub mod tasks;
pub mod tickets;
