//! Typed sample stores layered over the same bounded ring discipline as the
//! poller latency buffers: sysmon host snapshots, rperf throughput samples,
//! and SNMP interface counters.

use std::collections::HashMap;
use std::sync::{Mutex, RwLock};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::ring::RingBuffer;

// ── Sysmon ────────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CpuUsage {
    pub core_id: i32,
    pub usage_percent: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryUsage {
    pub used_bytes: u64,
    pub total_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DiskUsage {
    pub mount_point: String,
    pub used_bytes: u64,
    pub total_bytes: u64,
}

/// One host-health snapshot as reported by a sysmon checker.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SysmonSnapshot {
    pub timestamp: DateTime<Utc>,
    pub host_id: String,
    pub cpus: Vec<CpuUsage>,
    pub memory: MemoryUsage,
    pub disks: Vec<DiskUsage>,
}

// ── Rperf ─────────────────────────────────────────────────────────────────────

/// One throughput measurement against a reflector target.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RperfSample {
    pub timestamp: DateTime<Utc>,
    pub target: String,
    pub bits_per_second: f64,
    pub jitter_ms: Option<f64>,
    pub loss_percent: f64,
}

// ── SNMP ──────────────────────────────────────────────────────────────────────

/// Interface counter deltas from an SNMP poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SnmpCounterSample {
    pub timestamp: DateTime<Utc>,
    pub device_id: String,
    pub if_index: i32,
    pub in_octets: u64,
    pub out_octets: u64,
    pub speed_bps: u64,
}

// ── Generic bounded store ─────────────────────────────────────────────────────

/// Bounded per-source sample buffers, keyed by host, target, or device;
/// samples beyond `retention` overwrite the oldest.
pub struct SampleStore<T> {
    retention: usize,
    buffers: RwLock<HashMap<String, Mutex<RingBuffer<T>>>>,
}

impl<T: Clone> SampleStore<T> {
    pub fn new(retention: usize) -> Self {
        SampleStore { retention, buffers: RwLock::new(HashMap::new()) }
    }

    pub fn add(&self, source: &str, sample: T) {
        {
            let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
            if let Some(buffer) = buffers.get(source) {
                buffer.lock().unwrap_or_else(|e| e.into_inner()).push(sample);
                return;
            }
        }
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        buffers
            .entry(source.to_string())
            .or_insert_with(|| Mutex::new(RingBuffer::new(self.retention)))
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(sample);
    }

    pub fn get(&self, source: &str) -> Option<Vec<T>> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers
            .get(source)
            .map(|b| b.lock().unwrap_or_else(|e| e.into_inner()).snapshot())
    }

    pub fn sources(&self) -> Vec<String> {
        let buffers = self.buffers.read().unwrap_or_else(|e| e.into_inner());
        buffers.keys().cloned().collect()
    }

    /// Evict sources whose newest sample is older than `now - max_age`,
    /// judged by `timestamp_of`.
    pub fn cleanup_stale(
        &self,
        max_age: Duration,
        timestamp_of: impl Fn(&T) -> DateTime<Utc>,
    ) -> usize {
        let cutoff = Utc::now()
            - chrono::Duration::from_std(max_age).unwrap_or(chrono::Duration::zero());
        let mut buffers = self.buffers.write().unwrap_or_else(|e| e.into_inner());
        let before = buffers.len();
        buffers.retain(|_, buffer| {
            buffer
                .lock()
                .unwrap_or_else(|e| e.into_inner())
                .last()
                .map_or(false, |sample| timestamp_of(sample) >= cutoff)
        });
        before - buffers.len()
    }
}

/// Per-host sysmon snapshot history.
pub type SysmonStore = SampleStore<SysmonSnapshot>;
/// Per-target rperf sample history.
pub type RperfStore = SampleStore<RperfSample>;
/// Per-device SNMP counter history.
pub type SnmpStore = SampleStore<SnmpCounterSample>;
