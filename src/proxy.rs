//! DNS server orchestration.
//!
//! Binds the transport, wires filter, cache and upstreams into a
//! [`Resolver`] and runs until the shutdown token is cancelled.

use std::io;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{info, warn};

use crate::cache::{CacheConfig, DnsCache};
use crate::error::Result;
use crate::filter::{Blocklist, FilterMode};
use crate::resolver::Resolver;
use crate::transport::udp::UdpTransport;
use crate::upstream::{self, UpstreamResolver};

/// Configuration for the DNS server.
#[derive(Debug, Clone)]
pub struct ProxyConfig {
    /// Local address to bind (e.g., 0.0.0.0:53)
    pub bind_addr: SocketAddr,
    /// Comma-separated upstream servers (races all, uses first response)
    pub upstreams: String,
    /// How blocked domains are answered
    pub filter_mode: FilterMode,
    /// Optional adblock-style list of domains to block
    pub filter_file: Option<PathBuf>,
    pub upstream_timeout: Duration,
    pub cache: CacheConfig,
    pub cleanup_interval: Duration,
    pub stats_interval: Duration,
}

impl Default for ProxyConfig {
    fn default() -> Self {
        Self {
            bind_addr: SocketAddr::from(([0, 0, 0, 0], 53)),
            upstreams: "1.1.1.1".to_string(),
            filter_mode: FilterMode::default(),
            filter_file: None,
            upstream_timeout: upstream::DEFAULT_TIMEOUT,
            cache: CacheConfig::default(),
            cleanup_interval: Duration::from_secs(30),
            stats_interval: Duration::from_secs(5 * 60),
        }
    }
}

/// A bound, not yet running server.
pub struct Proxy {
    transport: UdpTransport,
    resolver: Arc<Resolver>,
    config: ProxyConfig,
}

impl Proxy {
    /// Load the filter list and bind the socket. Only binding can fail.
    pub async fn bind(config: ProxyConfig) -> Result<Self> {
        let blocklist = load_blocklist(config.filter_file.as_deref());
        let upstreams =
            UpstreamResolver::new(&config.upstreams).with_timeout(config.upstream_timeout);
        if upstreams.addrs().is_empty() {
            warn!("no upstream servers configured, every cache miss will fail");
        }

        let resolver = Arc::new(Resolver::new(
            blocklist,
            config.filter_mode,
            DnsCache::with_config(config.cache.clone()),
            upstreams,
        ));
        let transport = UdpTransport::bind(config.bind_addr).await?;

        Ok(Self {
            transport,
            resolver,
            config,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.transport.local_addr()
    }

    pub fn resolver(&self) -> &Arc<Resolver> {
        &self.resolver
    }

    /// Serve until `shutdown` is cancelled, then log final statistics.
    pub async fn run(self, shutdown: CancellationToken) -> Result<()> {
        let resolver = self.resolver;

        info!(
            bind = %self.transport.local_addr()?,
            upstreams = %resolver.upstreams().addrs().join(", "),
            filter_mode = ?self.config.filter_mode,
            blocked_domains = resolver.blocked_count(),
            "DNS server listening"
        );

        let cleanup = tokio::spawn(run_cache_cleanup(
            Arc::clone(&resolver),
            self.config.cleanup_interval,
            shutdown.clone(),
        ));
        let reporter = tokio::spawn(run_stats_reporter(
            Arc::clone(&resolver),
            self.config.stats_interval,
            shutdown.clone(),
        ));

        self.transport.run(Arc::clone(&resolver), shutdown).await;

        let _ = cleanup.await;
        let _ = reporter.await;
        info!("server shutdown complete");
        Ok(())
    }
}

/// Bind and run the DNS server with the given configuration.
pub async fn run(config: ProxyConfig, shutdown: CancellationToken) -> Result<()> {
    Proxy::bind(config).await?.run(shutdown).await
}

fn load_blocklist(path: Option<&Path>) -> Blocklist {
    let blocklist = Blocklist::new();
    if let Some(path) = path {
        if let Err(e) = blocklist.load_from_file(path) {
            warn!(path = %path.display(), error = %e, "failed to load filter list");
        }
    }
    blocklist
}

async fn run_cache_cleanup(resolver: Arc<Resolver>, period: Duration, shutdown: CancellationToken) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await; // Skip first immediate tick

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                info!("cache cleanup stopped");
                return;
            }
            _ = interval.tick() => {
                let removed = resolver.clean_cache();
                if removed > 0 {
                    info!(removed, cache = resolver.cache_len(), "cache cleanup");
                }
            }
        }
    }
}

async fn run_stats_reporter(
    resolver: Arc<Resolver>,
    period: Duration,
    shutdown: CancellationToken,
) {
    let mut interval = tokio::time::interval(period);
    interval.tick().await;

    loop {
        tokio::select! {
            _ = shutdown.cancelled() => {
                resolver.stats().snapshot_and_reset().log(resolver.cache_len());
                return;
            }
            _ = interval.tick() => {
                resolver.stats().snapshot_and_reset().log(resolver.cache_len());
            }
        }
    }
}
