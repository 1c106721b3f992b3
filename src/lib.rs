//! DNS Rewrite Server Library
//!
//! This library answers DNS queries for configured domain names with locally
//! defined IPv4 addresses and relays every other query to an upstream resolver.

pub mod config;
pub mod dns;
pub mod errors;
pub mod handlers;
pub mod rewrite;

// Re-export commonly used items
pub use config::ServerConfig;
pub use dns::{Dispatcher, UdpUpstream, Upstream};
pub use errors::DnsError;
pub use rewrite::RewriteTable;
