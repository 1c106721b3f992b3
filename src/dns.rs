//! DNS query processing.
//!
//! This module decides, per question, whether a query is answered from the
//! rewrite table or relayed to the upstream resolver, and assembles the reply.

use std::net::{Ipv4Addr, Ipv6Addr, SocketAddr};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use hickory_proto::op::{Message, MessageType, ResponseCode};
use hickory_proto::rr::{rdata::A, Name, RData, Record, RecordType};
use log::{debug, error, info, warn};
use tokio::net::UdpSocket;

use crate::config::{ServerConfig, DEFAULT_TTL};
use crate::errors::DnsError;
use crate::rewrite::{normalize_name, RewriteTable};

/// Exchange with an upstream resolver.
#[async_trait]
pub trait Upstream: Send + Sync {
    /// Send `request` upstream and return its reply.
    async fn exchange(&self, request: &Message) -> Result<Message, DnsError>;
}

/// Upstream resolver reached over UDP, one socket per exchange.
#[derive(Debug, Clone)]
pub struct UdpUpstream {
    addr: SocketAddr,
    timeout: Duration,
    max_packet_size: usize,
}

impl UdpUpstream {
    pub fn new(addr: SocketAddr, timeout: Duration, max_packet_size: usize) -> Self {
        Self {
            addr,
            timeout,
            max_packet_size,
        }
    }

    pub fn from_config(config: &ServerConfig) -> Self {
        Self::new(config.upstream_addr, config.upstream_timeout, config.max_packet_size)
    }

    pub fn addr(&self) -> SocketAddr {
        self.addr
    }
}

#[async_trait]
impl Upstream for UdpUpstream {
    async fn exchange(&self, request: &Message) -> Result<Message, DnsError> {
        let query = request.to_vec()?;
        let response =
            forward_request_udp(self.addr, &query, self.timeout, self.max_packet_size).await?;

        let reply = Message::from_vec(&response)?;
        if reply.id() != request.id() {
            return Err(DnsError::UpstreamReply(format!(
                "id {} does not match query id {}",
                reply.id(),
                request.id()
            )));
        }
        if reply.message_type() != MessageType::Response {
            return Err(DnsError::UpstreamReply("reply is not a response".into()));
        }
        Ok(reply)
    }
}

/// Forward a DNS query to an upstream resolver using UDP.
///
/// # Arguments
/// * `forwarder` - The upstream resolver to forward to.
/// * `query` - The DNS query to forward.
/// * `timeout` - How long to wait for the reply.
/// * `max_packet_size` - Size of the receive buffer.
///
/// # Returns
/// A `Result` containing the raw response or an error.
pub async fn forward_request_udp(
    forwarder: SocketAddr,
    query: &[u8],
    timeout: Duration,
    max_packet_size: usize,
) -> Result<Vec<u8>, DnsError> {
    let local = if forwarder.is_ipv4() {
        SocketAddr::new(Ipv4Addr::UNSPECIFIED.into(), 0)
    } else {
        SocketAddr::new(Ipv6Addr::UNSPECIFIED.into(), 0)
    };
    let socket = UdpSocket::bind(local).await?;
    socket.connect(forwarder).await?;
    socket.send(query).await?;

    let mut buf = vec![0u8; max_packet_size];
    let size = tokio::time::timeout(timeout, socket.recv(&mut buf))
        .await
        .map_err(|_| DnsError::Timeout(forwarder))??;
    buf.truncate(size);
    debug!("Received {} bytes from resolver {}", size, forwarder);
    Ok(buf)
}

/// Build the A record served for a rewritten name.
pub fn build_rewrite_record(domain: &str, address: &str) -> Result<Record, DnsError> {
    let ip: Ipv4Addr = address.parse().map_err(|_| DnsError::Record {
        domain: domain.to_string(),
        reason: format!("invalid IPv4 address {:?}", address),
    })?;
    let name = Name::from_ascii(domain).map_err(|e| DnsError::Record {
        domain: domain.to_string(),
        reason: e.to_string(),
    })?;
    Ok(Record::from_rdata(name, DEFAULT_TTL, RData::A(A(ip))))
}

/// Start a reply to `request`: same id, op code and RD/CD bits, first question echoed.
fn reply_to(request: &Message) -> Message {
    let mut reply = Message::new();
    reply
        .set_id(request.id())
        .set_message_type(MessageType::Response)
        .set_op_code(request.op_code())
        .set_recursion_desired(request.recursion_desired())
        .set_checking_disabled(request.checking_disabled());
    if let Some(question) = request.queries().first() {
        reply.add_query(question.clone());
    }
    reply
}

/// Build a NotImp reply for a message whose op code is not a standard query.
pub fn build_not_implemented_response(request: &Message) -> Message {
    let mut reply = reply_to(request);
    reply.set_response_code(ResponseCode::NotImp);
    reply
}

/// Answers queries from the rewrite table, relaying misses upstream.
#[derive(Clone)]
pub struct Dispatcher {
    table: Arc<RewriteTable>,
    upstream: Arc<dyn Upstream>,
}

impl Dispatcher {
    pub fn new(table: Arc<RewriteTable>, upstream: Arc<dyn Upstream>) -> Self {
        Self { table, upstream }
    }

    /// Produce the reply for one inbound query.
    ///
    /// Questions are processed in order. Answers accumulate across questions,
    /// while the authoritative bit, recursion-available bit and response code
    /// are message-wide and end up reflecting the last question processed.
    /// A failed rewrite record or upstream exchange only affects its own
    /// question and is not subject to the AAAA override. Otherwise an AAAA
    /// question sets NXDOMAIN after its answers have been added. The rewrite
    /// path never touches the response code, so a later rewrite keeps the
    /// code left by an earlier question.
    pub async fn handle(&self, request: &Message) -> Message {
        let mut reply = reply_to(request);
        reply.set_authoritative(true);

        for question in request.queries() {
            let domain = normalize_name(&question.name().to_ascii());

            if let Some(address) = self.table.lookup(&domain) {
                info!("Rewriting DNS for {} to {}", domain, address);
                match build_rewrite_record(&domain, address) {
                    Ok(record) => {
                        reply.add_answer(record);
                        reply.set_authoritative(true);
                    }
                    Err(e) => {
                        error!("Failed to create record: {}", e);
                        continue;
                    }
                }
            } else {
                match self.upstream.exchange(request).await {
                    Ok(upstream_reply) => {
                        debug!(
                            "Upstream answered {} with {} records ({:?})",
                            domain,
                            upstream_reply.answers().len(),
                            upstream_reply.response_code()
                        );
                        reply
                            .add_answers(upstream_reply.answers().iter().cloned())
                            .set_authoritative(upstream_reply.authoritative())
                            .set_recursion_available(upstream_reply.recursion_available())
                            .set_response_code(upstream_reply.response_code());
                    }
                    Err(e) => {
                        warn!("Failed to forward query for {}: {}", domain, e);
                        reply.set_response_code(ResponseCode::ServFail);
                        continue;
                    }
                }
            }

            if question.query_type() == RecordType::AAAA {
                reply.set_response_code(ResponseCode::NXDomain);
            }
        }

        reply
    }
}
