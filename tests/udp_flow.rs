use std::io::Write;
use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use dnsgate::filter::FilterMode;
use dnsgate::proxy::{Proxy, ProxyConfig};
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

fn build_query(id: u16, domain: &str, qtype: u16) -> Vec<u8> {
    let mut packet = Vec::with_capacity(512);
    packet.extend_from_slice(&id.to_be_bytes());
    packet.extend_from_slice(&[0x01, 0x00, 0x00, 0x01, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00]);
    for label in domain.split('.') {
        packet.push(label.len() as u8);
        packet.extend_from_slice(label.as_bytes());
    }
    packet.push(0x00);
    packet.extend_from_slice(&qtype.to_be_bytes());
    packet.extend_from_slice(&[0x00, 0x01]);
    packet
}

/// Echo the question back with one `A 192.0.2.1` answer of TTL 300.
fn answer(query: &[u8]) -> Vec<u8> {
    let mut reply = query.to_vec();
    reply[2..4].copy_from_slice(&[0x81, 0x80]);
    reply[6..8].copy_from_slice(&[0x00, 0x01]);
    reply.extend_from_slice(&[0xC0, 0x0C, 0x00, 0x01, 0x00, 0x01]);
    reply.extend_from_slice(&300u32.to_be_bytes());
    reply.extend_from_slice(&[0x00, 0x04, 192, 0, 2, 1]);
    reply
}

async fn mock_upstream() -> (SocketAddr, Arc<AtomicUsize>) {
    let socket = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let addr = socket.local_addr().unwrap();
    let count = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&count);

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            seen.fetch_add(1, Ordering::SeqCst);
            let _ = socket.send_to(&answer(&buf[..len]), peer).await;
        }
    });

    (addr, count)
}

/// Upstream that answers every query after `delay`.
async fn slow_upstream(delay: Duration) -> SocketAddr {
    let socket = Arc::new(UdpSocket::bind("127.0.0.1:0").await.unwrap());
    let addr = socket.local_addr().unwrap();

    tokio::spawn(async move {
        let mut buf = [0u8; 512];
        while let Ok((len, peer)) = socket.recv_from(&mut buf).await {
            let reply = answer(&buf[..len]);
            let socket = Arc::clone(&socket);
            tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                let _ = socket.send_to(&reply, peer).await;
            });
        }
    });

    addr
}

struct Harness {
    server: SocketAddr,
    client: UdpSocket,
    shutdown: CancellationToken,
    handle: JoinHandle<dnsgate::Result<()>>,
    _filter: tempfile::NamedTempFile,
}

impl Harness {
    async fn start(upstreams: String, filter_mode: FilterMode) -> Self {
        Self::start_with_timeout(upstreams, filter_mode, Duration::from_millis(500)).await
    }

    async fn start_with_timeout(
        upstreams: String,
        filter_mode: FilterMode,
        upstream_timeout: Duration,
    ) -> Self {
        let mut filter = tempfile::NamedTempFile::new().unwrap();
        writeln!(filter, "! test list\n||ads.test^\n@@||ok.test^").unwrap();

        let config = ProxyConfig {
            bind_addr: "127.0.0.1:0".parse().unwrap(),
            upstreams,
            filter_mode,
            filter_file: Some(filter.path().to_path_buf()),
            upstream_timeout,
            ..ProxyConfig::default()
        };
        let proxy = Proxy::bind(config).await.unwrap();
        let server = proxy.local_addr().unwrap();
        assert_eq!(proxy.resolver().blocked_count(), 1);

        let shutdown = CancellationToken::new();
        let handle = tokio::spawn(proxy.run(shutdown.clone()));
        let client = UdpSocket::bind("127.0.0.1:0").await.unwrap();

        Self {
            server,
            client,
            shutdown,
            handle,
            _filter: filter,
        }
    }

    async fn ask(&self, query: &[u8]) -> Option<Vec<u8>> {
        self.client.send_to(query, self.server).await.unwrap();
        let mut buf = [0u8; 1024];
        match tokio::time::timeout(Duration::from_secs(2), self.client.recv_from(&mut buf)).await {
            Ok(Ok((len, _))) => Some(buf[..len].to_vec()),
            _ => None,
        }
    }

    async fn stop(self) {
        self.shutdown.cancel();
        let result = tokio::time::timeout(Duration::from_secs(2), self.handle)
            .await
            .expect("server did not stop");
        assert!(result.unwrap().is_ok());
    }
}

#[tokio::test]
async fn blocked_domain_gets_nxdomain() {
    let (upstream, count) = mock_upstream().await;
    let harness = Harness::start(upstream.to_string(), FilterMode::Nxdomain).await;

    let query = build_query(0x1111, "tracker.ads.test", 1);
    let response = harness.ask(&query).await.unwrap();

    assert_eq!(&response[..2], &[0x11, 0x11]);
    assert_eq!(&response[2..4], &[0x81, 0x83]);
    assert_eq!(response.len(), query.len());
    assert_eq!(count.load(Ordering::SeqCst), 0);

    harness.stop().await;
}

#[tokio::test]
async fn blocked_domain_gets_null_answer() {
    let (upstream, _) = mock_upstream().await;
    let harness = Harness::start(upstream.to_string(), FilterMode::Null).await;

    let query = build_query(0x2222, "ads.test", 1);
    let response = harness.ask(&query).await.unwrap();

    assert_eq!(response.len(), query.len() + 16);
    assert_eq!(&response[2..4], &[0x81, 0x80]);
    assert_eq!(&response[response.len() - 4..], &[0, 0, 0, 0]);

    harness.stop().await;
}

#[tokio::test]
async fn miss_is_forwarded_then_served_from_cache() {
    let (upstream, count) = mock_upstream().await;
    let harness = Harness::start(upstream.to_string(), FilterMode::Nxdomain).await;

    let first = harness.ask(&build_query(0x0101, "example.com", 1)).await.unwrap();
    let second = harness.ask(&build_query(0x0202, "example.com", 1)).await.unwrap();

    assert_eq!(&first[..2], &[0x01, 0x01]);
    assert_eq!(&second[..2], &[0x02, 0x02]);
    assert_eq!(&first[2..], &second[2..]);
    assert_eq!(count.load(Ordering::SeqCst), 1);

    // A different record type is a different cache key.
    harness.ask(&build_query(0x0303, "example.com", 28)).await.unwrap();
    assert_eq!(count.load(Ordering::SeqCst), 2);

    harness.stop().await;
}

#[tokio::test]
async fn malformed_query_gets_no_reply() {
    let (upstream, count) = mock_upstream().await;
    let harness = Harness::start(upstream.to_string(), FilterMode::Nxdomain).await;

    harness.client.send_to(&[0u8; 10], harness.server).await.unwrap();
    let mut buf = [0u8; 512];
    let reply =
        tokio::time::timeout(Duration::from_millis(300), harness.client.recv_from(&mut buf)).await;

    assert!(reply.is_err());
    assert_eq!(count.load(Ordering::SeqCst), 0);

    harness.stop().await;
}

#[tokio::test]
async fn failed_upstream_gets_no_reply() {
    let silent = UdpSocket::bind("127.0.0.1:0").await.unwrap();
    let harness =
        Harness::start(silent.local_addr().unwrap().to_string(), FilterMode::Nxdomain).await;

    assert_eq!(harness.ask(&build_query(7, "example.com", 1)).await, None);

    harness.stop().await;
}

#[tokio::test]
async fn shutdown_abandons_in_flight_query() {
    let upstream = slow_upstream(Duration::from_millis(400)).await;
    let harness = Harness::start_with_timeout(
        upstream.to_string(),
        FilterMode::Nxdomain,
        Duration::from_secs(3),
    )
    .await;

    harness
        .client
        .send_to(&build_query(9, "example.com", 1), harness.server)
        .await
        .unwrap();
    tokio::time::sleep(Duration::from_millis(100)).await;
    harness.shutdown.cancel();

    let mut buf = [0u8; 512];
    let reply =
        tokio::time::timeout(Duration::from_secs(1), harness.client.recv_from(&mut buf)).await;
    assert!(reply.is_err());

    harness.stop().await;
}
