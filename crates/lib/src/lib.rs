//! chatlink core library: the realtime connection client, config, error log,
//! file descriptors, and the conversation store boundary used by the CLI.

pub mod client;
pub mod config;
pub mod conversation;
pub mod error_log;
pub mod files;
pub mod init;
pub mod message;
