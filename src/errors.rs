//! Error types for the DNS server.
//!
//! This module defines the error types used throughout the DNS server implementation.

use std::net::SocketAddr;

use thiserror::Error;

/// Represents errors that can occur in the DNS server.
#[derive(Error, Debug)]
pub enum DnsError {
    /// I/O errors from the standard library.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Errors from encoding or decoding DNS wire messages.
    #[error("Invalid DNS packet: {0}")]
    Protocol(#[from] hickory_proto::error::ProtoError),

    /// Upstream replied with something that is not an answer to our query.
    #[error("Malformed upstream reply: {0}")]
    UpstreamReply(String),

    /// The upstream resolver did not answer in time.
    #[error("Upstream {0} timed out")]
    Timeout(SocketAddr),

    /// A rewrite entry could not be turned into a resource record.
    #[error("Cannot build record for {domain}: {reason}")]
    Record { domain: String, reason: String },

    /// Configuration errors.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Configuration file is not valid JSON.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}
