//! Ambient infrastructure shared by the chat client crates: command line and
//! environment configuration, and console logging.

pub mod config;
pub mod logging;
