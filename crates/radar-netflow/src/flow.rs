//! Wire model of a flow record as emitted by the upstream collector.
//! Hand-written prost message: the schema is stable and small enough that a
//! build-time codegen step buys nothing.

/// One sampled flow. Address fields are raw 4- or 16-byte strings; validation
/// happens in [`crate::decode::validate_addresses`].
#[derive(Clone, PartialEq, ::prost::Message)]
pub struct FlowMessage {
    /// Receive timestamp in nanoseconds since the epoch. 0 means unknown.
    #[prost(uint64, tag = "1")]
    pub time_received_ns: u64,
    #[prost(uint32, tag = "2")]
    pub sequence_num: u32,
    #[prost(uint64, tag = "3")]
    pub sampling_rate: u64,
    #[prost(bytes = "vec", tag = "4")]
    pub sampler_address: Vec<u8>,
    #[prost(uint64, tag = "5")]
    pub time_flow_start_ns: u64,
    #[prost(uint64, tag = "6")]
    pub time_flow_end_ns: u64,
    #[prost(uint64, tag = "7")]
    pub bytes: u64,
    #[prost(uint64, tag = "8")]
    pub packets: u64,
    #[prost(bytes = "vec", tag = "9")]
    pub src_addr: Vec<u8>,
    #[prost(bytes = "vec", tag = "10")]
    pub dst_addr: Vec<u8>,
    /// Ethernet type of the inner packet (0x0800 IPv4, 0x86DD IPv6).
    #[prost(uint32, tag = "11")]
    pub etype: u32,
    #[prost(uint32, tag = "12")]
    pub proto: u32,
    #[prost(uint32, tag = "13")]
    pub src_port: u32,
    #[prost(uint32, tag = "14")]
    pub dst_port: u32,
    #[prost(uint32, tag = "15")]
    pub in_if: u32,
    #[prost(uint32, tag = "16")]
    pub out_if: u32,
    #[prost(uint32, tag = "17")]
    pub src_vlan: u32,
    #[prost(uint32, tag = "18")]
    pub dst_vlan: u32,
    #[prost(uint32, tag = "19")]
    pub tcp_flags: u32,
    /// May be absent (empty) when the exporter does not report routing.
    #[prost(bytes = "vec", tag = "20")]
    pub next_hop: Vec<u8>,
    /// May be absent (empty).
    #[prost(bytes = "vec", tag = "21")]
    pub bgp_next_hop: Vec<u8>,
    #[prost(uint32, tag = "22")]
    pub src_as: u32,
    #[prost(uint32, tag = "23")]
    pub dst_as: u32,
    #[prost(uint32, repeated, tag = "24")]
    pub as_path: Vec<u32>,
    #[prost(uint32, repeated, tag = "25")]
    pub mpls_labels: Vec<u32>,
    /// Segment addresses from an IPv6 routing header, if present.
    #[prost(bytes = "vec", repeated, tag = "26")]
    pub ipv6_routing_header_addresses: Vec<Vec<u8>>,
    #[prost(uint32, tag = "27")]
    pub observation_domain_id: u32,
    #[prost(uint32, tag = "28")]
    pub observation_point_id: u32,
    #[prost(uint32, tag = "29")]
    pub forwarding_status: u32,
    #[prost(uint32, tag = "30")]
    pub ip_tos: u32,
    #[prost(uint32, tag = "31")]
    pub ip_ttl: u32,
    #[prost(uint32, tag = "32")]
    pub fragment_id: u32,
    #[prost(uint32, tag = "33")]
    pub fragment_offset: u32,
    #[prost(uint32, tag = "34")]
    pub icmp_type: u32,
    #[prost(uint32, tag = "35")]
    pub icmp_code: u32,
}
