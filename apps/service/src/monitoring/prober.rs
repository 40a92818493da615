use std::net::IpAddr;
use std::time::{Duration, Instant};

use anyhow::{Result, anyhow};
use surge_ping::{PingIdentifier, PingSequence};
use tokio::time::timeout;

/// Kind of reachability probe to issue for an address.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeKind {
    Icmp,
    Tcp,
}

/// Pick the probe kind from the address shape: `host:port` gets a TCP
/// connect probe, a bare host or IP gets an ICMP echo. A bare IPv6
/// address is full of colons and must be checked first.
pub fn probe_kind(address: &str) -> ProbeKind {
    if address.parse::<IpAddr>().is_ok() {
        return ProbeKind::Icmp;
    }
    match address.rsplit_once(':') {
        Some((host, port)) if !host.is_empty() && port.parse::<u16>().is_ok() => ProbeKind::Tcp,
        _ => ProbeKind::Icmp,
    }
}

/// Prober trait for the different reachability checks
#[async_trait::async_trait]
pub trait Prober: Send + Sync {
    /// Perform the probe and return latency in milliseconds
    async fn probe(&self, address: &str) -> Result<u64>;
}

/// ICMP echo prober. Requires a raw/dgram ICMP socket, so the process
/// needs CAP_NET_RAW (or the unprivileged-ping sysctl) in production.
pub struct IcmpProber {
    client: surge_ping::Client,
    timeout_duration: Duration,
}

impl IcmpProber {
    pub fn new(timeout_duration: Duration) -> Result<Self> {
        let client = surge_ping::Client::new(&surge_ping::Config::default())
            .map_err(|e| anyhow!("failed to create ICMP socket: {}", e))?;
        Ok(Self { client, timeout_duration })
    }

    async fn resolve(address: &str) -> Result<IpAddr> {
        if let Ok(ip) = address.parse::<IpAddr>() {
            return Ok(ip);
        }
        let mut addrs = tokio::net::lookup_host((address, 0u16))
            .await
            .map_err(|e| anyhow!("DNS resolution failed for {}: {}", address, e))?;
        addrs
            .next()
            .map(|a| a.ip())
            .ok_or_else(|| anyhow!("DNS resolution returned no addresses for {}", address))
    }
}

#[async_trait::async_trait]
impl Prober for IcmpProber {
    async fn probe(&self, address: &str) -> Result<u64> {
        let ip = Self::resolve(address).await?;

        let mut pinger = self.client.pinger(ip, PingIdentifier(rand::random())).await;
        pinger.timeout(self.timeout_duration);

        match pinger.ping(PingSequence(0), &[]).await {
            Ok((_reply, duration)) => Ok(duration.as_millis() as u64),
            Err(e) => Err(anyhow!("ICMP echo failed: {}", e)),
        }
    }
}

/// TCP connect prober for equipment reachable on a known port
pub struct TcpProber {
    timeout_duration: Duration,
}

impl TcpProber {
    pub fn new(timeout_duration: Duration) -> Self {
        Self { timeout_duration }
    }
}

#[async_trait::async_trait]
impl Prober for TcpProber {
    async fn probe(&self, address: &str) -> Result<u64> {
        let start = Instant::now();

        let connect = tokio::net::TcpStream::connect(address);

        timeout(self.timeout_duration, connect)
            .await
            .map_err(|_| anyhow!("TCP connection timeout"))?
            .map_err(|e| anyhow!("TCP connection failed: {}", e))?;

        Ok(start.elapsed().as_millis() as u64)
    }
}
