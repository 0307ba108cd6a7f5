pub mod api;
pub mod config;
pub mod humanize;
pub mod notify;
pub mod observability;
pub mod session;
pub mod upload;
