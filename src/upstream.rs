//! Upstream resolution by racing every configured server.
//!
//! The same query goes to all upstreams at once over fresh UDP sockets; the
//! first valid reply wins and the remaining attempts are dropped.

use std::io;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use futures::StreamExt;
use futures::stream::FuturesUnordered;
use tokio::net::UdpSocket;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::dns::{self, HEADER_LEN};
use crate::error::{Error, Result};
use crate::transport::MAX_DNS_PACKET_SIZE;

/// Port appended to upstreams that do not name one.
pub const UPSTREAM_PORT: u16 = 53;

pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Races a query across a fixed set of upstream servers.
#[derive(Debug, Clone)]
pub struct UpstreamResolver {
    addrs: Vec<String>,
    timeout: Duration,
}

impl UpstreamResolver {
    /// Build a resolver from a comma-separated list of hosts, e.g.
    /// `"1.1.1.1, 8.8.8.8"`. Each host gets port 53 unless it already names
    /// one, as in `127.0.0.1:5353` or `dns.example:5353`.
    pub fn new(upstreams: &str) -> Self {
        let addrs = upstreams
            .split(',')
            .map(str::trim)
            .filter(|host| !host.is_empty())
            .map(|host| {
                if host.parse::<SocketAddr>().is_ok() || has_port(host) {
                    return host.to_string();
                }
                match host.parse::<IpAddr>() {
                    Ok(IpAddr::V6(ip)) => format!("[{ip}]:{UPSTREAM_PORT}"),
                    _ => format!("{host}:{UPSTREAM_PORT}"),
                }
            })
            .collect();

        Self::from_addrs(addrs, DEFAULT_TIMEOUT)
    }

    /// Build a resolver from full `host:port` addresses.
    pub fn from_addrs(addrs: Vec<String>, timeout: Duration) -> Self {
        Self { addrs, timeout }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub fn addrs(&self) -> &[String] {
        &self.addrs
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Send `query` to every upstream and return the first valid reply.
    ///
    /// Failed attempts are logged and dropped. The call fails with
    /// [`Error::AllUpstreamsFailed`] once every attempt has failed or the
    /// timeout runs out, and with [`Error::Cancelled`] if `cancel` fires first.
    pub async fn resolve(&self, cancel: &CancellationToken, query: &[u8]) -> Result<Vec<u8>> {
        if cancel.is_cancelled() {
            return Err(Error::Cancelled);
        }

        let expected_id = dns::transaction_id(query);
        let mut attempts: FuturesUnordered<_> = self
            .addrs
            .iter()
            .map(|addr| exchange(addr, query, self.timeout, expected_id))
            .collect();

        let race = async {
            while let Some(result) = attempts.next().await {
                match result {
                    Ok(response) => return Some(response),
                    Err(e) => warn!(error = %e, "upstream attempt failed"),
                }
            }
            None
        };

        tokio::select! {
            _ = cancel.cancelled() => Err(Error::Cancelled),
            result = tokio::time::timeout(self.timeout, race) => match result {
                Ok(Some(response)) => Ok(response),
                Ok(None) | Err(_) => Err(Error::AllUpstreamsFailed),
            },
        }
    }
}

/// `host:port` with a single colon and a numeric port.
fn has_port(host: &str) -> bool {
    match host.split_once(':') {
        Some((name, port)) => {
            !name.is_empty() && !port.contains(':') && port.parse::<u16>().is_ok()
        }
        None => false,
    }
}

/// One attempt: fresh socket, send, wait for a single reply.
async fn exchange(
    addr: &str,
    query: &[u8],
    timeout: Duration,
    expected_id: Option<u16>,
) -> Result<Vec<u8>> {
    let attempt_failed = |source: io::Error| Error::UpstreamAttemptFailed {
        addr: addr.to_string(),
        source,
    };

    let exchange = async {
        let target = tokio::net::lookup_host(addr)
            .await?
            .next()
            .ok_or_else(|| io::Error::new(io::ErrorKind::NotFound, "no address resolved"))?;
        let socket = UdpSocket::bind(unspecified_for(target)).await?;
        socket.connect(target).await?;
        socket.send(query).await?;

        let mut buf = vec![0u8; MAX_DNS_PACKET_SIZE];
        let len = socket.recv(&mut buf).await?;
        buf.truncate(len);
        Ok::<_, io::Error>(buf)
    };

    let response = tokio::time::timeout(timeout, exchange)
        .await
        .map_err(|_| attempt_failed(io::Error::new(io::ErrorKind::TimedOut, "no reply")))?
        .map_err(attempt_failed)?;

    if response.len() < HEADER_LEN {
        return Err(attempt_failed(io::Error::new(
            io::ErrorKind::InvalidData,
            "reply shorter than header",
        )));
    }
    if expected_id.is_some() && dns::transaction_id(&response) != expected_id {
        return Err(attempt_failed(io::Error::new(
            io::ErrorKind::InvalidData,
            "transaction id mismatch",
        )));
    }

    debug!(upstream = addr, len = response.len(), "upstream replied");
    Ok(response)
}

fn unspecified_for(target: SocketAddr) -> SocketAddr {
    match target {
        SocketAddr::V4(_) => SocketAddr::from(([0, 0, 0, 0], 0)),
        SocketAddr::V6(_) => SocketAddr::from(([0u16; 8], 0)),
    }
}
