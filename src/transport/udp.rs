//! UDP transport for DNS queries.
//!
//! One loop reads datagrams from the bound socket and hands each to its own
//! task, so a slow upstream race never holds up the next query.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Instant;

use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::error::{Error, Result};
use crate::resolver::{QueryAction, Resolver};

use super::{MAX_DNS_PACKET_SIZE, elapsed_ms};

/// UDP transport for the resolver.
pub struct UdpTransport {
    socket: Arc<UdpSocket>,
}

impl UdpTransport {
    /// Bind the listening socket.
    pub async fn bind(addr: SocketAddr) -> Result<Self> {
        let socket = UdpSocket::bind(addr).await.map_err(|source| Error::Bind {
            addr: addr.to_string(),
            source,
        })?;

        Ok(Self {
            socket: Arc::new(socket),
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.socket.local_addr()
    }

    /// Serve queries until `shutdown` is cancelled.
    pub async fn run(self, resolver: Arc<Resolver>, shutdown: CancellationToken) {
        let mut buf = [0u8; MAX_DNS_PACKET_SIZE];

        loop {
            let (len, src) = tokio::select! {
                _ = shutdown.cancelled() => {
                    info!("UDP transport stopping");
                    return;
                }
                result = self.socket.recv_from(&mut buf) => match result {
                    Ok(r) => r,
                    Err(e) => {
                        warn!(error = %e, "UDP recv error");
                        continue;
                    }
                },
            };

            tokio::spawn(handle_query(
                Arc::clone(&self.socket),
                Arc::clone(&resolver),
                buf[..len].to_vec(),
                src,
                shutdown.clone(),
            ));
        }
    }
}

/// Answer one datagram: blocked, cached or forwarded. Malformed queries,
/// failed races and cancelled work get no reply.
async fn handle_query(
    socket: Arc<UdpSocket>,
    resolver: Arc<Resolver>,
    query: Vec<u8>,
    src: SocketAddr,
    shutdown: CancellationToken,
) {
    if shutdown.is_cancelled() {
        return;
    }

    let start_time = Instant::now();

    let action = match resolver.process_query(&query) {
        Ok(action) => action,
        Err(e) => {
            resolver.stats().record_malformed();
            debug!(client = %src, error = %e, "dropping malformed query");
            return;
        }
    };

    match action {
        QueryAction::Blocked { response, domain } => {
            send(&socket, &response, src).await;
            let elapsed = elapsed_ms(start_time);
            resolver.stats().record_blocked(elapsed);
            debug!(%domain, elapsed_ms = elapsed, "BLOCKED");
        }
        QueryAction::Cached {
            response,
            query: parsed,
            needs_refresh,
        } => {
            send(&socket, &response, src).await;
            let elapsed = elapsed_ms(start_time);
            resolver.stats().record_cached(elapsed);
            debug!(domain = %parsed.domain, elapsed_ms = elapsed, needs_refresh, "CACHE HIT");

            if needs_refresh {
                resolver.spawn_refresh(parsed, query, shutdown);
            }
        }
        QueryAction::Forward { query: parsed } => {
            debug!(domain = %parsed.domain, "CACHE MISS - querying upstream");

            match resolver.forward(&parsed, &query, &shutdown).await {
                Ok(response) => {
                    if shutdown.is_cancelled() {
                        return;
                    }
                    send(&socket, &response, src).await;
                    let elapsed = elapsed_ms(start_time);
                    resolver.stats().record_forwarded(elapsed);
                    debug!(domain = %parsed.domain, elapsed_ms = elapsed, "FORWARDED");
                }
                Err(Error::Cancelled) => {}
                Err(e) => {
                    resolver.stats().record_failed();
                    error!(domain = %parsed.domain, error = %e, "failed to resolve");
                }
            }
        }
    }
}

async fn send(socket: &UdpSocket, response: &[u8], dest: SocketAddr) {
    if let Err(e) = socket.send_to(response, dest).await {
        warn!(client = %dest, error = %e, "UDP response error");
    }
}
