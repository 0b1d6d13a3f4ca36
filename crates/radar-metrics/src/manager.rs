use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::ring::RingBuffer;

// ── Points ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricPoint {
    pub timestamp: DateTime<Utc>,
    /// Round-trip latency in nanoseconds.
    pub response_time_ns: i64,
    pub service_name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub agent_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub partition: Option<String>,
}

// ── Config ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    /// Points retained per poller (the ring size).
    #[serde(default = "default_retention")]
    pub retention: usize,
    /// Maximum number of pollers tracked before LRU eviction.
    #[serde(default = "default_max_pollers")]
    pub max_pollers: usize,
}

fn default_retention() -> usize {
    100
}
fn default_max_pollers() -> usize {
    10_000
}

impl Default for MetricsConfig {
    fn default() -> Self {
        MetricsConfig {
            enabled: true,
            retention: default_retention(),
            max_pollers: default_max_pollers(),
        }
    }
}

// ── Manager ───────────────────────────────────────────────────────────────────

struct Inner {
    buffers: HashMap<String, Arc<Mutex<RingBuffer<MetricPoint>>>>,
    /// LRU order: front = least recently used, back = most recently used.
    order: VecDeque<String>,
}

/// Bounded per-poller ring buffers of live latency points, with LRU eviction
/// over pollers and stale cleanup.
///
/// One RwLock guards the LRU bookkeeping; per-buffer writes serialise on a
/// per-poller mutex so pollers do not contend with each other.
pub struct MetricsManager {
    config: MetricsConfig,
    inner: RwLock<Inner>,
    active_pollers: AtomicUsize,
    total_points: AtomicU64,
}

impl MetricsManager {
    pub fn new(config: MetricsConfig) -> Self {
        MetricsManager {
            config,
            inner: RwLock::new(Inner { buffers: HashMap::new(), order: VecDeque::new() }),
            active_pollers: AtomicUsize::new(0),
            total_points: AtomicU64::new(0),
        }
    }

    pub fn is_enabled(&self) -> bool {
        self.config.enabled
    }

    pub fn active_pollers(&self) -> usize {
        self.active_pollers.load(Ordering::Relaxed)
    }

    pub fn total_points(&self) -> u64 {
        self.total_points.load(Ordering::Relaxed)
    }

    /// Record one point for `poller_id`. Moves the poller to the MRU end;
    /// when the poller is new and the table is at capacity, the LRU poller
    /// and its buffer are dropped.
    pub fn add_metric(&self, poller_id: &str, point: MetricPoint) {
        if !self.config.enabled {
            return;
        }

        let buffer = {
            let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

            if let Some(pos) = inner.order.iter().position(|id| id == poller_id) {
                inner.order.remove(pos);
            } else if inner.buffers.len() >= self.config.max_pollers {
                if let Some(evicted) = inner.order.pop_front() {
                    inner.buffers.remove(&evicted);
                    self.active_pollers.fetch_sub(1, Ordering::Relaxed);
                    debug!(poller = %evicted, "evicted LRU poller buffer");
                }
            }
            inner.order.push_back(poller_id.to_string());

            match inner.buffers.get(poller_id) {
                Some(buffer) => buffer.clone(),
                None => {
                    let buffer =
                        Arc::new(Mutex::new(RingBuffer::new(self.config.retention)));
                    inner.buffers.insert(poller_id.to_string(), buffer.clone());
                    self.active_pollers.fetch_add(1, Ordering::Relaxed);
                    buffer
                }
            }
        };

        buffer.lock().unwrap_or_else(|e| e.into_inner()).push(point);
        self.total_points.fetch_add(1, Ordering::Relaxed);
    }

    /// All retained points for a poller, oldest first.
    pub fn get_metrics(&self, poller_id: &str) -> Option<Vec<MetricPoint>> {
        let inner = self.inner.read().unwrap_or_else(|e| e.into_inner());
        inner
            .buffers
            .get(poller_id)
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()).snapshot())
    }

    /// Drop every poller whose newest point is older than `now - max_age`.
    /// Returns the number of pollers evicted.
    pub fn cleanup_stale_pollers(&self, max_age: Duration) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut inner = self.inner.write().unwrap_or_else(|e| e.into_inner());

        let stale: Vec<String> = inner
            .buffers
            .iter()
            .filter(|(_, buffer)| {
                buffer
                    .lock()
                    .unwrap_or_else(|e| e.into_inner())
                    .last()
                    .map_or(true, |p| p.timestamp < cutoff)
            })
            .map(|(id, _)| id.clone())
            .collect();

        for id in &stale {
            inner.buffers.remove(id);
            if let Some(pos) = inner.order.iter().position(|o| o == id) {
                inner.order.remove(pos);
            }
            self.active_pollers.fetch_sub(1, Ordering::Relaxed);
        }
        if !stale.is_empty() {
            debug!(evicted = stale.len(), "stale poller cleanup");
        }
        stale.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn point(ts: DateTime<Utc>) -> MetricPoint {
        MetricPoint {
            timestamp: ts,
            response_time_ns: 1_000_000,
            service_name: "icmp".to_string(),
            device_id: None,
            agent_id: None,
            partition: None,
        }
    }

    fn manager(retention: usize, max_pollers: usize) -> MetricsManager {
        MetricsManager::new(MetricsConfig { enabled: true, retention, max_pollers })
    }

    #[test]
    fn disabled_manager_records_nothing() {
        let m = MetricsManager::new(MetricsConfig {
            enabled: false,
            ..Default::default()
        });
        m.add_metric("p1", point(Utc::now()));
        assert!(m.get_metrics("p1").is_none());
        assert_eq!(m.total_points(), 0);
    }

    #[test]
    fn ring_overwrites_oldest_at_retention() {
        let m = manager(3, 10);
        let base = Utc::now();
        for i in 0..5 {
            let mut p = point(base);
            p.response_time_ns = i;
            m.add_metric("p1", p);
        }
        let points = m.get_metrics("p1").unwrap();
        let times: Vec<i64> = points.iter().map(|p| p.response_time_ns).collect();
        assert_eq!(times, vec![2, 3, 4]);
    }

    #[test]
    fn lru_eviction_drops_least_recent_poller() {
        let m = manager(4, 2);
        m.add_metric("a", point(Utc::now()));
        m.add_metric("b", point(Utc::now()));
        // Touch "a" so "b" is now least recently used.
        m.add_metric("a", point(Utc::now()));
        // A third poller evicts "b".
        m.add_metric("c", point(Utc::now()));

        assert!(m.get_metrics("a").is_some());
        assert!(m.get_metrics("b").is_none());
        assert!(m.get_metrics("c").is_some());
        assert_eq!(m.active_pollers(), 2);
    }

    #[test]
    fn stale_cleanup_evicts_idle_pollers() {
        let m = manager(4, 10);
        let old = Utc::now() - chrono::Duration::hours(2);
        m.add_metric("idle", point(old));
        m.add_metric("live", point(Utc::now()));

        let evicted = m.cleanup_stale_pollers(Duration::from_secs(3600));
        assert_eq!(evicted, 1);
        assert!(m.get_metrics("idle").is_none());
        assert!(m.get_metrics("live").is_some());
        assert_eq!(m.active_pollers(), 1);
    }

    #[test]
    fn counters_track_pollers_and_points() {
        let m = manager(4, 10);
        m.add_metric("a", point(Utc::now()));
        m.add_metric("a", point(Utc::now()));
        m.add_metric("b", point(Utc::now()));
        assert_eq!(m.active_pollers(), 2);
        assert_eq!(m.total_points(), 3);
    }
}
