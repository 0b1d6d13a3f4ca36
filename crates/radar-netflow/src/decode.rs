use prost::Message;

use crate::error::FlowError;
use crate::flow::FlowMessage;

/// The upstream transport may prepend up to this many framing bytes.
pub const MAX_FRAMING_SKIP: usize = 4;

/// Decode a flow record, recovering from 0..=4 leading transport bytes.
/// Tries the direct decode first, then each skip offset in order.
pub fn decode_flow(body: &[u8]) -> Result<FlowMessage, FlowError> {
    for skip in 0..=MAX_FRAMING_SKIP {
        if skip > body.len() {
            break;
        }
        if let Ok(flow) = FlowMessage::decode(&body[skip..]) {
            return Ok(flow);
        }
    }
    Err(FlowError::UnmarshalFlow)
}

/// Each principal address must be 4 (IPv4) or 16 (IPv6) bytes. The next-hop
/// fields may additionally be absent.
pub fn validate_addresses(flow: &FlowMessage) -> Result<(), FlowError> {
    check_addr("src_addr", &flow.src_addr, false)?;
    check_addr("dst_addr", &flow.dst_addr, false)?;
    check_addr("sampler_address", &flow.sampler_address, false)?;
    check_addr("next_hop", &flow.next_hop, true)?;
    check_addr("bgp_next_hop", &flow.bgp_next_hop, true)?;
    Ok(())
}

fn check_addr(field: &'static str, addr: &[u8], may_be_absent: bool) -> Result<(), FlowError> {
    match addr.len() {
        4 | 16 => Ok(()),
        0 if may_be_absent => Ok(()),
        len => Err(FlowError::InvalidIpLength { field, len }),
    }
}

/// Render a raw address as its canonical textual form.
pub(crate) fn format_addr(addr: &[u8]) -> Option<String> {
    match addr.len() {
        4 => {
            let octets: [u8; 4] = addr.try_into().ok()?;
            Some(std::net::Ipv4Addr::from(octets).to_string())
        }
        16 => {
            let octets: [u8; 16] = addr.try_into().ok()?;
            Some(std::net::Ipv6Addr::from(octets).to_string())
        }
        _ => None,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    pub(crate) fn flow_fixture() -> FlowMessage {
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
            ..Default::default()
        }
    }

    #[test]
    fn direct_decode_round_trips() {
        let flow = flow_fixture();
        let mut buf = Vec::new();
        flow.encode(&mut buf).unwrap();
        let decoded = decode_flow(&buf).unwrap();
        assert_eq!(decoded, flow);
    }

    #[test]
    fn recovers_from_one_leading_byte() {
        let flow = flow_fixture();
        let mut buf = vec![0xAB];
        flow.encode(&mut buf).unwrap();
        let decoded = decode_flow(&buf).unwrap();
        assert_eq!(decoded.src_port, 443);
    }

    #[test]
    fn recovers_from_up_to_four_leading_bytes() {
        let flow = flow_fixture();
        let mut buf = vec![0x00, 0x00, 0x00, 0x04];
        flow.encode(&mut buf).unwrap();
        assert!(decode_flow(&buf).is_ok());
    }

    #[test]
    fn five_leading_bytes_is_unrecoverable() {
        let flow = flow_fixture();
        let mut buf = vec![0x01, 0x02, 0x03, 0x04, 0x05];
        flow.encode(&mut buf).unwrap();
        // Only 0..=4 bytes of framing are tolerated.
        assert!(matches!(decode_flow(&buf), Err(FlowError::UnmarshalFlow)));
    }

    #[test]
    fn garbage_is_unmarshal_error() {
        assert!(matches!(
            decode_flow(&[0xFF; 64]),
            Err(FlowError::UnmarshalFlow)
        ));
    }

    #[test]
    fn seventeen_byte_src_addr_is_rejected_by_field_name() {
        let mut flow = flow_fixture();
        flow.src_addr = vec![0; 17];
        match validate_addresses(&flow) {
            Err(FlowError::InvalidIpLength { field, len }) => {
                assert_eq!(field, "src_addr");
                assert_eq!(len, 17);
            }
            other => panic!("expected InvalidIpLength, got {other:?}"),
        }
    }

    #[test]
    fn next_hop_may_be_absent_but_not_malformed() {
        let mut flow = flow_fixture();
        flow.next_hop = vec![];
        assert!(validate_addresses(&flow).is_ok());
        flow.next_hop = vec![1, 2, 3];
        assert!(validate_addresses(&flow).is_err());
    }

    #[test]
    fn absent_sampler_address_is_invalid() {
        let mut flow = flow_fixture();
        flow.sampler_address = vec![];
        match validate_addresses(&flow) {
            Err(FlowError::InvalidIpLength { field, .. }) => {
                assert_eq!(field, "sampler_address")
            }
            other => panic!("expected InvalidIpLength, got {other:?}"),
        }
    }

    #[test]
    fn formats_v4_and_v6() {
        assert_eq!(format_addr(&[192, 168, 1, 1]).unwrap(), "192.168.1.1");
        let v6 = [0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 0, 1];
        assert_eq!(format_addr(&v6).unwrap(), "::1");
    }
}
