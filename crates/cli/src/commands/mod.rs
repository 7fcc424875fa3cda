//! CLI Commands

pub mod config;
pub mod deploy;
pub mod probe;
