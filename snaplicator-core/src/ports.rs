//! Host port allocation for clone containers.
//!
//! Allocation is a hint, not a reservation: the port is checked against a
//! live listener scan and only claimed when the container binds it. The
//! launcher retries with a fresh port when that bind loses a race.

use crate::error::{Result, SnapError};
use crate::exec::Executor;
use async_trait::async_trait;
use std::collections::HashSet;
use std::sync::Arc;
use tracing::{debug, instrument};

/// Default number of consecutive ports probed before giving up.
pub const DEFAULT_PROBE_ATTEMPTS: u32 = 100;

/// Source of the set of TCP ports with a bound listener.
#[async_trait]
pub trait ListenerProbe: Send + Sync {
    /// Ports with a TCP listener in any address family.
    async fn listening_ports(&self) -> Result<HashSet<u16>>;
}

/// Listener scan backed by `ss -H -ltn`.
#[derive(Debug, Clone)]
pub struct SsProbe {
    exec: Executor,
}

impl SsProbe {
    pub fn new(exec: Executor) -> Self {
        Self { exec: exec.unprivileged() }
    }
}

/// Extract listening ports from `ss -H -ltn` output.
///
/// Local addresses look like `0.0.0.0:5432`, `[::]:5432`, `*:5432` or
/// `127.0.0.53%lo:53`.
pub fn parse_ss_listeners(stdout: &str) -> HashSet<u16> {
    stdout
        .lines()
        .filter_map(|line| {
            let local = line.split_whitespace().nth(3)?;
            let (_, port) = local.rsplit_once(':')?;
            port.parse().ok()
        })
        .collect()
}

#[async_trait]
impl ListenerProbe for SsProbe {
    async fn listening_ports(&self) -> Result<HashSet<u16>> {
        let out = self.exec.run_checked("ss", &["-H", "-ltn"]).await?;
        Ok(parse_ss_listeners(&out.stdout))
    }
}

/// Finds unused host ports.
#[derive(Clone)]
pub struct PortAllocator {
    probe: Arc<dyn ListenerProbe>,
}

impl PortAllocator {
    pub fn new(probe: Arc<dyn ListenerProbe>) -> Self {
        Self { probe }
    }

    /// Return the first port at or above `start` with no listener.
    ///
    /// # Errors
    /// `ResourceExhausted` after `max_attempts` consecutive busy ports (or
    /// when the port range ends first).
    #[instrument(skip(self))]
    pub async fn find_free_port(&self, start: u16, max_attempts: u32) -> Result<u16> {
        let busy = self.probe.listening_ports().await?;

        let mut port = start;
        for _ in 0..max_attempts {
            if port == 0 {
                // 0 means "any" to the kernel; never hand it out.
            } else if !busy.contains(&port) {
                debug!(port, "Found free port");
                return Ok(port);
            }
            port = match port.checked_add(1) {
                Some(next) => next,
                None => break,
            };
        }

        Err(SnapError::ResourceExhausted {
            reason: format!("No free port in {} attempts starting at {}", max_attempts, start),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct StaticProbe(HashSet<u16>);

    #[async_trait]
    impl ListenerProbe for StaticProbe {
        async fn listening_ports(&self) -> Result<HashSet<u16>> {
            Ok(self.0.clone())
        }
    }

    fn allocator(busy: &[u16]) -> PortAllocator {
        PortAllocator::new(Arc::new(StaticProbe(busy.iter().copied().collect())))
    }

    #[tokio::test]
    async fn test_skips_occupied_ports() {
        let port = allocator(&[5432, 5433]).find_free_port(5432, 10).await.unwrap();
        assert_eq!(port, 5434);
    }

    #[tokio::test]
    async fn test_returns_start_when_free() {
        assert_eq!(allocator(&[]).find_free_port(6000, 1).await.unwrap(), 6000);
    }

    #[tokio::test]
    async fn test_exhausted() {
        let err = allocator(&[5432, 5433, 5434]).find_free_port(5432, 3).await.unwrap_err();
        assert!(matches!(err, SnapError::ResourceExhausted { .. }));
    }

    #[tokio::test]
    async fn test_stops_at_end_of_range() {
        let err = allocator(&[65535]).find_free_port(65535, 10).await.unwrap_err();
        assert!(matches!(err, SnapError::ResourceExhausted { .. }));
    }

    #[test]
    fn test_parse_ss_listeners() {
        let out = "\
LISTEN 0      4096         0.0.0.0:5432      0.0.0.0:*
LISTEN 0      4096            [::]:5433         [::]:*
LISTEN 0      128                *:8080             *:*
LISTEN 0      4096   127.0.0.53%lo:53        0.0.0.0:*
";
        let ports = parse_ss_listeners(out);
        assert_eq!(ports, [5432, 5433, 8080, 53].into_iter().collect());
    }
}
