//! Vacation: mail autoresponder engine.

pub mod cli;
pub mod config;
pub mod error;
pub mod pipeline;
pub mod reply;
pub mod store;
