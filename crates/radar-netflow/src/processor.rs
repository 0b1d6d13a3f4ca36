use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::json;
use tracing::warn;

use radar_consumer::{InboundMessage, MessageHandler};

use crate::decode::{decode_flow, format_addr, validate_addresses};
use crate::error::FlowError;
use crate::flow::FlowMessage;

// ── Persisted row ─────────────────────────────────────────────────────────────

/// One row of the `netflow_metrics` timeseries: the principal 5-tuple and
/// counters as columns, everything else folded into a JSON metadata blob.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct NetflowMetric {
    pub timestamp: DateTime<Utc>,
    pub src_addr: String,
    pub dst_addr: String,
    pub src_port: u16,
    pub dst_port: u16,
    pub protocol: u32,
    pub bytes: u64,
    pub packets: u64,
    pub sampler_address: String,
    /// JSON-encoded remainder of the flow record.
    pub metadata: String,
}

/// Write side of the external columnar store.
#[async_trait]
pub trait FlowWriter: Send + Sync + 'static {
    async fn write(&self, rows: &[NetflowMetric]) -> Result<(), FlowError>;
}

// ── Processor ─────────────────────────────────────────────────────────────────

/// Decodes binary flow records, validates address fields, and persists
/// enriched rows.
pub struct NetflowProcessor {
    writer: Arc<dyn FlowWriter>,
}

impl NetflowProcessor {
    pub fn new(writer: Arc<dyn FlowWriter>) -> Self {
        NetflowProcessor { writer }
    }

    /// Decode one message body and persist the resulting row.
    pub async fn process(&self, body: &[u8]) -> Result<NetflowMetric, FlowError> {
        let flow = decode_flow(body)?;
        validate_addresses(&flow)?;
        let metric = assemble_metric(&flow);
        self.writer.write(std::slice::from_ref(&metric)).await?;
        Ok(metric)
    }
}

#[async_trait]
impl MessageHandler for NetflowProcessor {
    async fn handle(&self, message: &InboundMessage) -> anyhow::Result<()> {
        self.process(&message.payload).await?;
        Ok(())
    }
}

/// Assemble the persisted row. Timestamp falls back to `now` when the record
/// carries none (or one that overflows int64 nanoseconds).
pub fn assemble_metric(flow: &FlowMessage) -> NetflowMetric {
    let timestamp = match i64::try_from(flow.time_received_ns) {
        Ok(ns) if ns > 0 => DateTime::from_timestamp_nanos(ns),
        _ => Utc::now(),
    };

    NetflowMetric {
        timestamp,
        src_addr: format_addr(&flow.src_addr).unwrap_or_default(),
        dst_addr: format_addr(&flow.dst_addr).unwrap_or_default(),
        src_port: flow.src_port as u16,
        dst_port: flow.dst_port as u16,
        protocol: flow.proto,
        bytes: flow.bytes,
        packets: flow.packets,
        sampler_address: format_addr(&flow.sampler_address).unwrap_or_default(),
        metadata: marshal_metadata(flow),
    }
}

/// The metadata blob carries every flow field that does not get its own
/// column. Marshalling is infallible in practice; a failure logs and yields
/// an empty object rather than dropping the row.
fn marshal_metadata(flow: &FlowMessage) -> String {
    let next_hop = format_addr(&flow.next_hop);
    let bgp_next_hop = format_addr(&flow.bgp_next_hop);
    let ipv6_routing: Vec<String> = flow
        .ipv6_routing_header_addresses
        .iter()
        .filter_map(|addr| format_addr(addr))
        .collect();

    let value = json!({
        "etype": flow.etype,
        "sequence_num": flow.sequence_num,
        "sampling_rate": flow.sampling_rate,
        "in_if": flow.in_if,
        "out_if": flow.out_if,
        "src_vlan": flow.src_vlan,
        "dst_vlan": flow.dst_vlan,
        "tcp_flags": flow.tcp_flags,
        "next_hop": next_hop,
        "bgp_next_hop": bgp_next_hop,
        "src_as": flow.src_as,
        "dst_as": flow.dst_as,
        "as_path": flow.as_path,
        "mpls_labels": flow.mpls_labels,
        "ipv6_routing_header_addresses": ipv6_routing,
        "observation_domain_id": flow.observation_domain_id,
        "observation_point_id": flow.observation_point_id,
        "forwarding_status": flow.forwarding_status,
        "ip_tos": flow.ip_tos,
        "ip_ttl": flow.ip_ttl,
        "fragment_id": flow.fragment_id,
        "fragment_offset": flow.fragment_offset,
        "icmp_type": flow.icmp_type,
        "icmp_code": flow.icmp_code,
        "time_flow_start_ns": flow.time_flow_start_ns,
        "time_flow_end_ns": flow.time_flow_end_ns,
    });
    serde_json::to_string(&value).unwrap_or_else(|err| {
        warn!(error = %err, "flow metadata marshal failed");
        "{}".to_string()
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use prost::Message;
    use std::sync::Mutex;

    #[derive(Default)]
    struct RecordingWriter {
        rows: Mutex<Vec<NetflowMetric>>,
        fail: bool,
    }

    #[async_trait]
    impl FlowWriter for RecordingWriter {
        async fn write(&self, rows: &[NetflowMetric]) -> Result<(), FlowError> {
            if self.fail {
                return Err(FlowError::Store("writer down".to_string()));
            }
            self.rows.lock().unwrap().extend_from_slice(rows);
            Ok(())
        }
    }

    fn flow_fixture() -> FlowMessage {
        FlowMessage {
            time_received_ns: 1_700_000_000_000_000_000,
            sampling_rate: 1000,
            sampler_address: vec![10, 0, 0, 254],
            bytes: 1500,
            packets: 2,
            src_addr: vec![192, 168, 1, 10],
            dst_addr: vec![10, 0, 0, 1],
            etype: 0x0800,
            proto: 6,
            src_port: 443,
            dst_port: 52000,
            tcp_flags: 0x18,
            src_vlan: 120,
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn processes_framed_record_end_to_end() {
        let writer = Arc::new(RecordingWriter::default());
        let proc = NetflowProcessor::new(writer.clone());

        let mut body = vec![0x1F]; // one byte of transport framing
        flow_fixture().encode(&mut body).unwrap();

        let metric = proc.process(&body).await.unwrap();
        assert_eq!(metric.src_addr, "192.168.1.10");
        assert_eq!(metric.dst_addr, "10.0.0.1");
        assert_eq!(metric.src_port, 443);
        assert_eq!(metric.protocol, 6);
        assert_eq!(writer.rows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn invalid_address_blocks_persistence() {
        let writer = Arc::new(RecordingWriter::default());
        let proc = NetflowProcessor::new(writer.clone());

        let mut flow = flow_fixture();
        flow.src_addr = vec![0; 17];
        let mut body = Vec::new();
        flow.encode(&mut body).unwrap();

        assert!(matches!(
            proc.process(&body).await,
            Err(FlowError::InvalidIpLength { field: "src_addr", .. })
        ));
        assert!(writer.rows.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn store_failure_surfaces() {
        let writer = Arc::new(RecordingWriter { fail: true, ..Default::default() });
        let proc = NetflowProcessor::new(writer);
        let mut body = Vec::new();
        flow_fixture().encode(&mut body).unwrap();
        assert!(matches!(proc.process(&body).await, Err(FlowError::Store(_))));
    }

    #[test]
    fn timestamp_uses_record_nanos_when_positive() {
        let flow = flow_fixture();
        let metric = assemble_metric(&flow);
        assert_eq!(
            metric.timestamp,
            DateTime::from_timestamp_nanos(1_700_000_000_000_000_000)
        );
    }

    #[test]
    fn zero_or_overflowing_timestamp_falls_back_to_now() {
        let mut flow = flow_fixture();
        flow.time_received_ns = 0;
        let before = Utc::now();
        let metric = assemble_metric(&flow);
        assert!(metric.timestamp >= before);

        flow.time_received_ns = u64::MAX;
        let metric = assemble_metric(&flow);
        assert!(metric.timestamp >= before);
    }

    #[test]
    fn metadata_blob_carries_the_remaining_fields() {
        let metric = assemble_metric(&flow_fixture());
        let value: serde_json::Value = serde_json::from_str(&metric.metadata).unwrap();
        assert_eq!(value["tcp_flags"], 0x18);
        assert_eq!(value["src_vlan"], 120);
        assert_eq!(value["sampling_rate"], 1000);
        assert!(value["next_hop"].is_null());
    }
}
