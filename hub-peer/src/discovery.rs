//! mDNS-based LAN peer discovery: service advertisement plus a polling
//! discovery loop feeding the persisted [`PeerCache`].
use std::net::IpAddr;
use std::time::Duration;

use chrono::Utc;
use mdns_sd::{ServiceDaemon, ServiceInfo};

use crate::cache::Peer;
use crate::error::Result;

pub const SERVICE_TYPE: &str = "_lleme._tcp.local.";
const DISCOVERY_WINDOW: Duration = Duration::from_secs(3);
const DISCOVERY_INTERVAL: Duration = Duration::from_secs(120);
const CLEANUP_EVERY_N_CYCLES: u32 = 10;

/// Registers this instance's peer server under `_lleme._tcp.local.` so other
/// instances on the LAN can discover it.
pub fn advertise(daemon: &ServiceDaemon, port: u16, version: &str) -> Result<()> {
    let host = hostname::get()
        .map(|h| h.to_string_lossy().into_owned())
        .unwrap_or_else(|_| "unknown-host".to_string());
    let local_ip = local_ipv4().unwrap_or_else(|| "0.0.0.0".parse().unwrap());

    let mut properties = std::collections::HashMap::new();
    properties.insert("version".to_string(), version.to_string());

    let service = ServiceInfo::new(
        SERVICE_TYPE,
        &host,
        &format!("{host}.local."),
        local_ip,
        port,
        Some(properties),
    )
    .map_err(crate::error::PeerError::from)?;

    daemon.register(service).map_err(crate::error::PeerError::from)?;
    tracing::info!(host, port, version, "advertising peer service");
    Ok(())
}

/// Runs one discovery pass: browse for `DISCOVERY_WINDOW`, collecting
/// responders that advertise a `version=` TXT record and are not this
/// instance (matched by local IP + port).
pub async fn discover_once(
    daemon: &ServiceDaemon,
    self_port: u16,
    self_ip: Option<IpAddr>,
) -> Result<Vec<Peer>> {
    let receiver = daemon.browse(SERVICE_TYPE).map_err(crate::error::PeerError::from)?;
    let mut found = Vec::new();
    let deadline = tokio::time::Instant::now() + DISCOVERY_WINDOW;

    loop {
        let remaining = deadline.saturating_duration_since(tokio::time::Instant::now());
        if remaining.is_zero() {
            break;
        }
        let event = match tokio::time::timeout(remaining, async { receiver.recv_async().await }).await {
            Ok(Ok(event)) => event,
            _ => break,
        };
        if let mdns_sd::ServiceEvent::ServiceResolved(info) = event {
            let Some(version) = info.get_property_val_str("version") else { continue };
            // IPv6 disabled (§4.10): only a resolved IPv4 address is usable —
            // downloader.rs builds bare `host:port` URLs with no bracket
            // handling for IPv6 literals.
            let Some(addr) = info.get_addresses().iter().find_map(|a| match a {
                IpAddr::V4(v4) => Some(*v4),
                IpAddr::V6(_) => None,
            }) else {
                continue;
            };
            let addr = IpAddr::V4(addr);
            let port = info.get_port();
            let is_self = self_ip.map(|ip| ip == addr).unwrap_or(false) && port == self_port;
            if is_self {
                continue;
            }
            found.push(Peer {
                name: info.get_fullname().to_string(),
                host: addr.to_string(),
                port,
                version: version.to_string(),
                last_seen: Utc::now(),
            });
        }
    }

    let _ = daemon.stop_browse(SERVICE_TYPE);
    Ok(found)
}

/// Synchronous-feeling wrapper that retries discovery up to three times,
/// 200ms apart, to tolerate mDNS flakiness on a single pass.
pub async fn discover_peers_retrying(
    daemon: &ServiceDaemon,
    self_port: u16,
    self_ip: Option<IpAddr>,
) -> Result<Vec<Peer>> {
    let mut last_err = None;
    for attempt in 0..3 {
        if attempt > 0 {
            tokio::time::sleep(Duration::from_millis(200)).await;
        }
        match discover_once(daemon, self_port, self_ip).await {
            Ok(peers) if !peers.is_empty() => return Ok(peers),
            Ok(peers) => last_err = Some(Ok(peers)),
            Err(e) => last_err = Some(Err(e)),
        }
    }
    match last_err {
        Some(Ok(peers)) => Ok(peers),
        Some(Err(e)) => Err(e),
        None => Ok(Vec::new()),
    }
}

/// Background task: discovers peers every [`DISCOVERY_INTERVAL`], merging
/// results into `cache_path`'s persisted `PeerCache`. Every tenth cycle also
/// evicts stale entries and persists them away even if nothing fresh arrived.
pub async fn run_discovery_loop(
    daemon: ServiceDaemon,
    self_port: u16,
    self_ip: Option<IpAddr>,
    cache_path: std::path::PathBuf,
    cancel: tokio_util::sync::CancellationToken,
) {
    let mut cycle: u32 = 0;
    loop {
        if cancel.is_cancelled() {
            break;
        }
        let discovered = discover_once(&daemon, self_port, self_ip).await.unwrap_or_default();
        tracing::debug!(found = discovered.len(), cycle, "discovery cycle complete");
        let should_persist = !discovered.is_empty() || cycle % CLEANUP_EVERY_N_CYCLES == 0;
        if should_persist {
            let mut cache = crate::cache::PeerCache::load(&cache_path).unwrap_or_default();
            cache.merge_fresh(discovered, Utc::now());
            let _ = cache.save(&cache_path);
        }
        cycle = cycle.wrapping_add(1);

        tokio::select! {
            _ = tokio::time::sleep(DISCOVERY_INTERVAL) => {}
            _ = cancel.cancelled() => break,
        }
    }
}

fn local_ipv4() -> Option<IpAddr> {
    use std::net::UdpSocket;
    let socket = UdpSocket::bind("0.0.0.0:0").ok()?;
    socket.connect("8.8.8.8:80").ok()?;
    socket.local_addr().ok().map(|a| a.ip())
}

fn is_local_or_loopback(addr: &std::net::SocketAddr, self_port: u16, self_ip: Option<IpAddr>) -> bool {
    if addr.ip().is_loopback() {
        return true;
    }
    self_ip.map(|ip| ip == addr.ip()).unwrap_or(false) && addr.port() == self_port
}

/// Probes a statically configured peer (from external config, not mDNS) by
/// HEAD-ing a health endpoint; used to seed [`Peer`] entries in environments
/// where mDNS is blocked or disabled.
pub async fn probe_static_peer(
    client: &reqwest::Client,
    addr: std::net::SocketAddr,
    self_port: u16,
    self_ip: Option<IpAddr>,
) -> Option<Peer> {
    if is_local_or_loopback(&addr, self_port, self_ip) {
        return None;
    }
    let url = format!("http://{addr}/api/peer/health");
    let resp = client.head(&url).send().await.ok()?;
    if !resp.status().is_success() {
        return None;
    }
    Some(Peer {
        name: addr.to_string(),
        host: addr.ip().to_string(),
        port: addr.port(),
        version: "unknown".to_string(),
        last_seen: Utc::now(),
    })
}

/// Probes every statically configured peer in parallel and returns those
/// that responded successfully.
pub async fn probe_static_peers(
    client: &reqwest::Client,
    addrs: &[std::net::SocketAddr],
    self_port: u16,
    self_ip: Option<IpAddr>,
) -> Vec<Peer> {
    let probes = addrs
        .iter()
        .map(|addr| probe_static_peer(client, *addr, self_port, self_ip));
    futures::future::join_all(probes)
        .await
        .into_iter()
        .flatten()
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn peer_key_combines_host_and_port() {
        let p = Peer {
            name: "n".into(),
            host: "10.0.0.5".into(),
            port: 9090,
            version: "1.0".into(),
            last_seen: Utc::now(),
        };
        assert_eq!(p.key(), "10.0.0.5:9090");
    }

    #[test]
    fn loopback_addr_is_skipped() {
        let addr: std::net::SocketAddr = "127.0.0.1:9000".parse().unwrap();
        assert!(is_local_or_loopback(&addr, 9090, None));
    }

    #[test]
    fn self_addr_is_skipped() {
        let self_ip: IpAddr = "10.0.0.9".parse().unwrap();
        let addr: std::net::SocketAddr = "10.0.0.9:9000".parse().unwrap();
        assert!(is_local_or_loopback(&addr, 9000, Some(self_ip)));
    }

    #[test]
    fn distinct_peer_addr_is_not_skipped() {
        let self_ip: IpAddr = "10.0.0.9".parse().unwrap();
        let addr: std::net::SocketAddr = "10.0.0.5:9000".parse().unwrap();
        assert!(!is_local_or_loopback(&addr, 9000, Some(self_ip)));
    }

    #[tokio::test]
    async fn probe_skips_own_advertised_address() {
        let client = reqwest::Client::new();
        let self_ip: IpAddr = "10.0.0.9".parse().unwrap();
        let addr: std::net::SocketAddr = "10.0.0.9:9000".parse().unwrap();
        let result = probe_static_peer(&client, addr, 9000, Some(self_ip)).await;
        assert!(result.is_none());
    }
}
