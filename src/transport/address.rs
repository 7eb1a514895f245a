//! Resolves a host/port pair to a list of candidate socket addresses, and tracks which of them
//! have recently failed so a reconnect prefers addresses it hasn't just given up on.

use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::{Duration, Instant};

use tokio::net::lookup_host;

use crate::error::{Error, Result};

/// The addresses a host/port pair resolved to, with cooldown tracking for ones that recently
/// failed to connect.
#[derive(Debug)]
pub struct AddressCandidates {
    host: String,
    port: u16,
    candidates: Vec<SocketAddr>,
    failed_at: HashMap<SocketAddr, Instant>,
    cooldown: Duration,
}

impl AddressCandidates {
    /// Resolve `host:port` via the system resolver.
    pub async fn resolve(host: &str, port: u16, cooldown: Duration) -> Result<AddressCandidates> {
        let candidates: Vec<SocketAddr> = lookup_host((host, port))
            .await
            .map_err(Error::ConnectionLost)?
            .collect();
        if candidates.is_empty() {
            return Err(Error::TransportUnavailable {
                host: host.to_owned(),
                port,
            });
        }
        Ok(AddressCandidates {
            host: host.to_owned(),
            port,
            candidates,
            failed_at: HashMap::new(),
            cooldown,
        })
    }

    /// Build directly from a known address list, for tests that don't want to touch DNS.
    pub fn from_addrs(host: &str, port: u16, candidates: Vec<SocketAddr>, cooldown: Duration) -> Self {
        AddressCandidates {
            host: host.to_owned(),
            port,
            candidates,
            failed_at: HashMap::new(),
            cooldown,
        }
    }

    pub fn host(&self) -> &str {
        &self.host
    }

    pub fn port(&self) -> u16 {
        self.port
    }

    /// Iterate candidates in connect order: untried addresses first, then addresses whose
    /// cooldown has elapsed, ordered by how long ago they failed. If every candidate is on
    /// cooldown, falls back to offering all of them anyway, oldest failure first, rather than
    /// reporting no addresses at all.
    pub fn ordered(&self) -> Vec<SocketAddr> {
        let now = Instant::now();
        let (untried, failed): (Vec<_>, Vec<_>) = self
            .candidates
            .iter()
            .copied()
            .partition(|addr| !self.failed_at.contains_key(addr));

        let mut ready: Vec<SocketAddr> = failed
            .iter()
            .copied()
            .filter(|addr| now.duration_since(self.failed_at[addr]) >= self.cooldown)
            .collect();

        if untried.is_empty() && ready.is_empty() {
            ready = failed;
        }
        ready.sort_by_key(|addr| self.failed_at.get(addr).copied());

        let mut result = untried;
        result.extend(ready);
        result
    }

    /// Record that `addr` just failed to connect, starting its cooldown.
    pub fn mark_failed(&mut self, addr: SocketAddr) {
        self.failed_at.insert(addr, Instant::now());
    }

    /// Clear failure tracking for an address that connected successfully.
    pub fn mark_succeeded(&mut self, addr: SocketAddr) {
        self.failed_at.remove(&addr);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn addr(port: u16) -> SocketAddr {
        format!("127.0.0.1:{}", port).parse().unwrap()
    }

    #[test]
    fn untried_addresses_come_first() {
        let mut candidates = AddressCandidates::from_addrs(
            "example.test",
            80,
            vec![addr(1), addr(2), addr(3)],
            Duration::from_secs(60),
        );
        candidates.mark_failed(addr(1));
        let ordered = candidates.ordered();
        assert_eq!(ordered[0], addr(2));
        assert_eq!(ordered[1], addr(3));
        assert_eq!(ordered[2], addr(1));
    }

    #[test]
    fn failed_address_is_excluded_during_cooldown() {
        let mut candidates = AddressCandidates::from_addrs(
            "example.test",
            80,
            vec![addr(1), addr(2)],
            Duration::from_secs(3600),
        );
        candidates.mark_failed(addr(1));
        candidates.mark_failed(addr(2));
        let ordered = candidates.ordered();
        // Both are on cooldown with no untried left, so both remain available as the last resort.
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn succeeded_address_clears_cooldown() {
        let mut candidates =
            AddressCandidates::from_addrs("example.test", 80, vec![addr(1)], Duration::from_secs(3600));
        candidates.mark_failed(addr(1));
        candidates.mark_succeeded(addr(1));
        assert_eq!(candidates.ordered(), vec![addr(1)]);
    }
}
