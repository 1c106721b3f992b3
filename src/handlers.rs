//! Request handlers for the DNS server.
//!
//! This module runs the UDP listener and hands each datagram to its own task.

use std::net::SocketAddr;
use std::sync::Arc;

use hickory_proto::op::{Message, MessageType, OpCode};
use log::{debug, error, info, warn};
use tokio::{net::UdpSocket, task};

use crate::config::ServerConfig;
use crate::dns::{build_not_implemented_response, Dispatcher};
use crate::errors::DnsError;

/// Run the UDP DNS server.
///
/// # Arguments
/// * `config` - The server configuration.
/// * `dispatcher` - Shared query dispatcher.
///
/// # Returns
/// A `Result` that is only ever an error: binding failed.
pub async fn run_udp_server(
    config: &ServerConfig,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), DnsError> {
    let socket = UdpSocket::bind(config.listen_addr).await?;
    info!("UDP DNS server listening on {}", config.listen_addr);
    serve_udp(socket, dispatcher, config.max_packet_size).await
}

/// Serve queries on an already bound UDP socket.
pub async fn serve_udp(
    socket: UdpSocket,
    dispatcher: Arc<Dispatcher>,
    max_packet_size: usize,
) -> Result<(), DnsError> {
    let socket = Arc::new(socket);
    let mut buf = vec![0u8; max_packet_size];

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((amt, src)) => {
                let query = buf[..amt].to_vec();
                let socket = socket.clone();
                let dispatcher = dispatcher.clone();
                task::spawn(async move {
                    if let Err(e) = handle_udp_query(query, src, socket, dispatcher).await {
                        warn!("UDP query error: {}", e);
                    }
                });
            }
            Err(e) => error!("UDP receive error: {}", e),
        }
    }
}

/// Handle a UDP DNS query.
///
/// # Arguments
/// * `query` - The raw DNS query.
/// * `src` - The source address of the query.
/// * `socket` - The UDP socket to send the response on.
/// * `dispatcher` - Decides how the query is answered.
///
/// # Returns
/// A `Result` indicating success or failure.
pub async fn handle_udp_query(
    query: Vec<u8>,
    src: SocketAddr,
    socket: Arc<UdpSocket>,
    dispatcher: Arc<Dispatcher>,
) -> Result<(), DnsError> {
    let request = match Message::from_vec(&query) {
        Ok(request) => request,
        Err(e) => {
            debug!("Received malformed query from {}: {}", src, e);
            return Ok(());
        }
    };

    if request.message_type() != MessageType::Query {
        debug!("Ignoring non-query message from {}", src);
        return Ok(());
    }

    if request.op_code() != OpCode::Query {
        debug!("Unsupported op code {:?} from {}", request.op_code(), src);
        let reply = build_not_implemented_response(&request);
        socket.send_to(&reply.to_vec()?, src).await?;
        return Ok(());
    }

    if let Some(question) = request.queries().first() {
        debug!("UDP query for {} {} from {}", question.name(), question.query_type(), src);
    }

    let reply = dispatcher.handle(&request).await;
    socket.send_to(&reply.to_vec()?, src).await?;
    Ok(())
}
