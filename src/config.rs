//! Configuration for the DNS server.
//!
//! This module defines the configuration structure and loads it from the JSON
//! file named by the `DNS_CONFIG` environment variable.

use std::{
    env, fmt, fs,
    net::{IpAddr, SocketAddr, ToSocketAddrs},
    path::Path,
    sync::Arc,
    time::Duration,
};

use log::info;
use serde::{
    de::{MapAccess, Visitor},
    Deserialize, Deserializer,
};

use crate::errors::DnsError;
use crate::rewrite::RewriteTable;

/// Default TTL for synthesized records in seconds.
pub const DEFAULT_TTL: u32 = 3600;

/// Maximum size of DNS packets in bytes.
pub const MAX_PACKET_SIZE: usize = 4096;

/// Config file used when `DNS_CONFIG` is not set.
pub const DEFAULT_CONFIG_PATH: &str = "config.json";

const DEFAULT_LISTEN: &str = "0.0.0.0:53";
const DEFAULT_UPSTREAM_TIMEOUT_MS: u64 = 2000;
const DNS_PORT: u16 = 53;

/// Server configuration, read-only once loaded.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the DNS server to.
    pub listen_addr: SocketAddr,

    /// Resolver that receives every query without a rewrite entry.
    pub upstream_addr: SocketAddr,

    /// How long to wait for the upstream to answer.
    pub upstream_timeout: Duration,

    /// Maximum size of DNS packets.
    pub max_packet_size: usize,

    /// Rewrite rules shared by all query handlers.
    pub rewrite_table: Arc<RewriteTable>,
}

/// On-disk layout of the config file.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default, deserialize_with = "ordered_entries")]
    rewrite_entries: Vec<(String, String)>,

    #[serde(default = "default_listen")]
    listen_address: String,

    #[serde(default)]
    upstream_dns: String,

    #[serde(default = "default_upstream_timeout_ms")]
    upstream_timeout_ms: u64,
}

fn default_listen() -> String {
    DEFAULT_LISTEN.to_string()
}

fn default_upstream_timeout_ms() -> u64 {
    DEFAULT_UPSTREAM_TIMEOUT_MS
}

/// Reads a JSON object as a list of pairs in document order, duplicates included.
fn ordered_entries<'de, D>(deserializer: D) -> Result<Vec<(String, String)>, D::Error>
where
    D: Deserializer<'de>,
{
    struct EntriesVisitor;

    impl<'de> Visitor<'de> for EntriesVisitor {
        type Value = Vec<(String, String)>;

        fn expecting(&self, f: &mut fmt::Formatter) -> fmt::Result {
            f.write_str("an object mapping domain names to IPv4 addresses")
        }

        fn visit_map<A>(self, mut map: A) -> Result<Self::Value, A::Error>
        where
            A: MapAccess<'de>,
        {
            let mut entries = Vec::with_capacity(map.size_hint().unwrap_or(0));
            while let Some((domain, address)) = map.next_entry::<String, String>()? {
                entries.push((domain, address));
            }
            Ok(entries)
        }
    }

    deserializer.deserialize_map(EntriesVisitor)
}

impl ServerConfig {
    /// Load configuration from the file named by `DNS_CONFIG`.
    ///
    /// # Returns
    /// A `Result` containing either the loaded `ServerConfig` or a `DnsError`.
    pub fn from_env() -> Result<Self, DnsError> {
        let path = env::var("DNS_CONFIG").unwrap_or_else(|_| DEFAULT_CONFIG_PATH.into());
        Self::load(path)
    }

    /// Load configuration from a JSON file.
    pub fn load(path: impl AsRef<Path>) -> Result<Self, DnsError> {
        let path = path.as_ref();
        let raw = fs::read_to_string(path).map_err(|e| {
            DnsError::Config(format!("could not read config file {}: {}", path.display(), e))
        })?;
        let config = Self::from_json(&raw)?;
        info!("Loaded {} rewrite entries from {}", config.rewrite_table.len(), path.display());
        Ok(config)
    }

    /// Parse configuration from JSON text.
    pub fn from_json(raw: &str) -> Result<Self, DnsError> {
        let file: ConfigFile = serde_json::from_str(raw)?;

        let listen_addr = parse_listen_address(&file.listen_address)?;
        let upstream_addr = parse_upstream_address(&file.upstream_dns)?;
        if file.upstream_timeout_ms == 0 {
            return Err(DnsError::Config("upstream_timeout_ms must be positive".into()));
        }

        Ok(Self {
            listen_addr,
            upstream_addr,
            upstream_timeout: Duration::from_millis(file.upstream_timeout_ms),
            max_packet_size: MAX_PACKET_SIZE,
            rewrite_table: Arc::new(RewriteTable::from_entries(file.rewrite_entries)),
        })
    }
}

/// Parse the listen address: `host:port`, `:port`, or `udp://host:port`.
pub fn parse_listen_address(raw: &str) -> Result<SocketAddr, DnsError> {
    let trimmed = raw.trim();
    let addr = match trimmed.split_once("://") {
        Some(("udp", rest)) => rest,
        Some((scheme, _)) => {
            return Err(DnsError::Config(format!("Unsupported listen transport: {}", scheme)))
        }
        None => trimmed,
    };

    let addr = if addr.starts_with(':') {
        format!("0.0.0.0{}", addr)
    } else {
        addr.to_string()
    };

    addr.parse()
        .map_err(|_| DnsError::Config(format!("Invalid listen_address: {}", raw)))
}

/// Parse the upstream resolver address: `ip:port`, bare `ip`, `host:port` or bare `host`.
///
/// Port 53 is implied when none is given. Host names are resolved once,
/// synchronously, while the configuration is loaded.
pub fn parse_upstream_address(raw: &str) -> Result<SocketAddr, DnsError> {
    let raw = raw.trim();
    if raw.is_empty() {
        return Err(DnsError::Config("upstream_dns must be set".into()));
    }

    if let Ok(addr) = raw.parse::<SocketAddr>() {
        return Ok(addr);
    }
    if let Ok(ip) = raw.parse::<IpAddr>() {
        return Ok(SocketAddr::new(ip, DNS_PORT));
    }

    let host_port = if raw.contains(':') {
        raw.to_string()
    } else {
        format!("{}:{}", raw, DNS_PORT)
    };
    host_port
        .to_socket_addrs()
        .ok()
        .and_then(|mut addrs| addrs.next())
        .ok_or_else(|| DnsError::Config(format!("Invalid upstream_dns: {}", raw)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_from_json_full() {
        let config = ServerConfig::from_json(
            r#"{
                "rewrite_entries": {"Internal.Example": "10.0.0.5"},
                "listen_address": "127.0.0.1:5353",
                "upstream_dns": "8.8.8.8:53",
                "upstream_timeout_ms": 500
            }"#,
        )
        .unwrap();

        assert_eq!(config.listen_addr, "127.0.0.1:5353".parse().unwrap());
        assert_eq!(config.upstream_addr, "8.8.8.8:53".parse().unwrap());
        assert_eq!(config.upstream_timeout, Duration::from_millis(500));
        assert_eq!(config.max_packet_size, MAX_PACKET_SIZE);
        assert_eq!(config.rewrite_table.lookup("internal.example."), Some("10.0.0.5"));
    }

    #[test]
    fn test_from_json_defaults() {
        let config = ServerConfig::from_json(r#"{"upstream_dns": "1.1.1.1"}"#).unwrap();

        assert_eq!(config.listen_addr, "0.0.0.0:53".parse().unwrap());
        assert_eq!(config.upstream_addr, "1.1.1.1:53".parse().unwrap());
        assert_eq!(config.upstream_timeout, Duration::from_millis(DEFAULT_UPSTREAM_TIMEOUT_MS));
        assert!(config.rewrite_table.is_empty());
    }

    #[test]
    fn test_duplicate_keys_resolve_in_document_order() {
        let config = ServerConfig::from_json(
            r#"{
                "rewrite_entries": {
                    "example.com": "10.0.0.1",
                    "EXAMPLE.COM": "10.0.0.2",
                    "other.example": "10.0.0.9",
                    "Example.com": "10.0.0.3"
                },
                "upstream_dns": "8.8.8.8:53"
            }"#,
        )
        .unwrap();

        assert_eq!(config.rewrite_table.len(), 2);
        assert_eq!(config.rewrite_table.lookup("example.com."), Some("10.0.0.3"));
    }

    #[test]
    fn test_missing_upstream_is_config_error() {
        let err = ServerConfig::from_json(r#"{"rewrite_entries": {}}"#).unwrap_err();
        assert!(matches!(err, DnsError::Config(_)));

        let err = ServerConfig::from_json(r#"{"upstream_dns": "  "}"#).unwrap_err();
        assert!(matches!(err, DnsError::Config(_)));
    }

    #[test]
    fn test_invalid_json_is_rejected() {
        let err = ServerConfig::from_json("{not json").unwrap_err();
        assert!(matches!(err, DnsError::Json(_)));

        let err = ServerConfig::from_json(r#"{"rewrite_entries": {"a.example": 1}, "upstream_dns": "8.8.8.8"}"#)
            .unwrap_err();
        assert!(matches!(err, DnsError::Json(_)));
    }

    #[test]
    fn test_zero_timeout_is_rejected() {
        let err = ServerConfig::from_json(r#"{"upstream_dns": "8.8.8.8", "upstream_timeout_ms": 0}"#)
            .unwrap_err();
        assert!(matches!(err, DnsError::Config(_)));
    }

    #[test]
    fn test_parse_listen_address_forms() {
        assert_eq!(parse_listen_address(":53").unwrap(), "0.0.0.0:53".parse().unwrap());
        assert_eq!(
            parse_listen_address("udp://127.0.0.1:8053").unwrap(),
            "127.0.0.1:8053".parse().unwrap()
        );
        assert_eq!(parse_listen_address("[::1]:53").unwrap(), "[::1]:53".parse().unwrap());
        assert!(matches!(parse_listen_address("tcp://0.0.0.0:53"), Err(DnsError::Config(_))));
        assert!(matches!(parse_listen_address("nowhere"), Err(DnsError::Config(_))));
    }

    #[test]
    fn test_parse_upstream_address_forms() {
        assert_eq!(parse_upstream_address("9.9.9.9:5353").unwrap(), "9.9.9.9:5353".parse().unwrap());
        assert_eq!(parse_upstream_address("2606:4700::1111").unwrap().port(), 53);
        assert!(parse_upstream_address("").is_err());
    }

    #[test]
    fn test_parse_upstream_hostname_defaults_to_port_53() {
        let addr = parse_upstream_address("localhost").unwrap();
        assert!(addr.ip().is_loopback());
        assert_eq!(addr.port(), 53);

        let addr = parse_upstream_address("localhost:5353").unwrap();
        assert_eq!(addr.port(), 5353);
    }

    #[test]
    fn test_load_from_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"rewrite_entries": {{"printer.lan": "192.168.1.10"}}, "upstream_dns": "8.8.8.8:53"}}"#
        )
        .unwrap();

        let config = ServerConfig::load(file.path()).unwrap();
        assert_eq!(config.rewrite_table.lookup("printer.lan."), Some("192.168.1.10"));
    }

    #[test]
    fn test_load_missing_file_is_config_error() {
        let dir = tempfile::tempdir().unwrap();
        let err = ServerConfig::load(dir.path().join("absent.json")).unwrap_err();
        assert!(matches!(err, DnsError::Config(_)));
    }
}
