//! Per-host politeness gate: bounded concurrency plus minimum spacing
//! between request starts.

use std::sync::Arc;
use std::time::Duration;

use dashmap::DashMap;
use thiserror::Error;
use tokio::sync::{Mutex, OwnedSemaphorePermit, Semaphore};
use tokio::time::{sleep_until, Instant};

use crate::settings::ThrottleSettings;

#[derive(Debug, Error)]
#[error("throttle for host {0} is closed")]
pub struct ThrottleError(pub String);

struct HostGate {
    slots: Arc<Semaphore>,
    // earliest instant the next permit for this host may start
    next_start: Mutex<Option<Instant>>,
}

/// Shared across every fetch in a run. Cheap to clone behind an `Arc`.
pub struct Throttle {
    max_concurrent: usize,
    min_interval: Duration,
    hosts: DashMap<String, Arc<HostGate>>,
}

/// Held for the duration of one request; dropping it frees the slot.
#[derive(Debug)]
pub struct Permit {
    host: String,
    _slot: OwnedSemaphorePermit,
}

impl Permit {
    pub fn host(&self) -> &str {
        &self.host
    }
}

impl Throttle {
    pub fn new(max_concurrent: usize, min_interval: Duration) -> Self {
        Self {
            max_concurrent: max_concurrent.max(1),
            min_interval,
            hosts: DashMap::new(),
        }
    }

    pub fn from_settings(settings: &ThrottleSettings) -> Self {
        Self::new(settings.max_concurrent, settings.min_interval())
    }

    pub fn max_concurrent(&self) -> usize {
        self.max_concurrent
    }

    /// Wait until `host` has a free slot and the spacing since the previous
    /// grant has elapsed. Waiters are served in FIFO order.
    pub async fn acquire(&self, host: &str) -> Result<Permit, ThrottleError> {
        let gate = self.gate(host);

        let slot = Arc::clone(&gate.slots)
            .acquire_owned()
            .await
            .map_err(|_| ThrottleError(host.to_string()))?;

        let start = {
            let mut next = gate.next_start.lock().await;
            let now = Instant::now();
            let start = match *next {
                Some(at) if at > now => at,
                _ => now,
            };
            *next = Some(start + self.min_interval);
            start
        };
        sleep_until(start).await;

        Ok(Permit {
            host: host.to_string(),
            _slot: slot,
        })
    }

    /// Permits currently held for `host`.
    pub fn in_flight(&self, host: &str) -> usize {
        self.hosts
            .get(host)
            .map(|g| self.max_concurrent - g.slots.available_permits())
            .unwrap_or(0)
    }

    pub fn tracked_hosts(&self) -> usize {
        self.hosts.len()
    }

    fn gate(&self, host: &str) -> Arc<HostGate> {
        let entry = self.hosts.entry(host.to_string()).or_insert_with(|| {
            Arc::new(HostGate {
                slots: Arc::new(Semaphore::new(self.max_concurrent)),
                next_start: Mutex::new(None),
            })
        });
        Arc::clone(entry.value())
    }
}
