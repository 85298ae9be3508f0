use clap::Parser;
use std::net::{IpAddr, SocketAddr};
use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use dnsgate::cache::CacheConfig;
use dnsgate::filter::FilterMode;
use dnsgate::proxy::{self, ProxyConfig};
use tokio_util::sync::CancellationToken;
use tracing::{error, info};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command(name = "dnsgate")]
#[command(about = "Caching, filtering DNS resolver", long_about = None)]
struct Args {
    /// Bind address
    #[arg(short = 'a', long, default_value = "0.0.0.0")]
    bind: IpAddr,

    /// Local port to listen on
    #[arg(short, long, default_value_t = 53)]
    port: u16,

    /// Upstream DNS servers, comma separated (port 53 unless given)
    #[arg(short = 'd', long, default_value = "1.1.1.1")]
    upstream: String,

    /// Path to a `||domain^` filter list
    #[arg(short = 'f', long)]
    filter_file: Option<PathBuf>,

    /// Reply sent for blocked domains
    #[arg(short = 'm', long, value_enum, default_value_t = FilterMode::Nxdomain)]
    filter_mode: FilterMode,

    /// Maximum number of cached responses
    #[arg(long, default_value_t = 1024)]
    cache_size: usize,

    /// Upstream timeout in milliseconds
    #[arg(long, default_value_t = 5000)]
    timeout_ms: u64,

    /// Enable verbose logging (per-query outcomes and timing)
    #[arg(short, long)]
    verbose: bool,
}

fn init_tracing(verbose: bool) {
    let level = if verbose { "debug" } else { "info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();
}

fn main() -> ExitCode {
    let args = Args::parse();
    init_tracing(args.verbose);

    let config = ProxyConfig {
        bind_addr: SocketAddr::new(args.bind, args.port),
        upstreams: args.upstream,
        filter_mode: args.filter_mode,
        filter_file: args.filter_file,
        upstream_timeout: Duration::from_millis(args.timeout_ms),
        cache: CacheConfig {
            max_size: args.cache_size,
            ..CacheConfig::default()
        },
        ..ProxyConfig::default()
    };

    let rt = match tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
    {
        Ok(rt) => rt,
        Err(e) => {
            error!(error = %e, "failed to start runtime");
            return ExitCode::FAILURE;
        }
    };

    let shutdown = CancellationToken::new();
    let signal_token = shutdown.clone();
    rt.spawn(async move {
        match tokio::signal::ctrl_c().await {
            Ok(()) => {
                info!("received interrupt, shutting down");
                signal_token.cancel();
            }
            Err(e) => error!(error = %e, "failed to listen for interrupt"),
        }
    });

    match rt.block_on(proxy::run(config, shutdown)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!(error = %e, "server failed, is the port free and are you allowed to bind it?");
            ExitCode::FAILURE
        }
    }
}
