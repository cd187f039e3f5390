//! PPPoE discovery wire format - RFC 2516
//!
//! Header view and TLV tag codec for PPPoE Active Discovery packets, plus
//! the DSL-Forum vendor sub-TLVs (RFC 4679) carrying Agent-Circuit-ID and
//! Agent-Remote-ID. Tag lengths come off the wire untrusted; the walker
//! never reads past the declared payload end nor past the received bytes.

use super::{ethernet, MacAddr};
use crate::{Error, Result};
use tracing::debug;

/// PPPoE Discovery EtherType
pub const DISCOVERY_ETHERTYPE: u16 = 0x8863;

/// PPPoE Session EtherType
pub const SESSION_ETHERTYPE: u16 = 0x8864;

/// PPPoE header size (ver/type + code + session_id + length)
pub const HEADER_SIZE: usize = 6;

/// Ethernet header plus PPPoE header
pub const FULL_HEADER_SIZE: usize = ethernet::HEADER_SIZE + HEADER_SIZE;

/// Version 1, type 1
pub const VERTYPE: u8 = 0x11;

/// PPPoE Discovery codes
pub mod codes {
    /// Active Discovery Initiation (broadcast from client)
    pub const PADI: u8 = 0x09;
    /// Active Discovery Offer (unicast from server)
    pub const PADO: u8 = 0x07;
    /// Active Discovery Request (unicast to server)
    pub const PADR: u8 = 0x19;
    /// Active Discovery Session-confirmation (assigns session_id)
    pub const PADS: u8 = 0x65;
    /// Active Discovery Terminate
    pub const PADT: u8 = 0xa7;
}

/// PPPoE tag types
pub mod tags {
    /// End of list
    pub const EOL: u16 = 0x0000;
    /// Service name (empty = any service)
    pub const SERVICE_NAME: u16 = 0x0101;
    /// Access Concentrator name
    pub const AC_NAME: u16 = 0x0102;
    /// Host unique identifier (used to match responses)
    pub const HOST_UNIQ: u16 = 0x0103;
    /// AC cookie (must be echoed back)
    pub const AC_COOKIE: u16 = 0x0104;
    /// Vendor specific
    pub const VENDOR: u16 = 0x0105;
    /// Relay session ID
    pub const RELAY_SESSION_ID: u16 = 0x0110;
    /// PPP-Max-Payload (RFC 4638)
    pub const MAX_PAYLOAD: u16 = 0x0120;
    /// Service name error
    pub const SERVICE_NAME_ERROR: u16 = 0x0201;
    /// AC system error
    pub const AC_SYSTEM_ERROR: u16 = 0x0202;
    /// Generic error
    pub const GENERIC_ERROR: u16 = 0x0203;

    // RFC 4937 credit-flow and PAD-message extensions.
    pub const CREDITS: u16 = 0x0106;
    pub const METRICS: u16 = 0x0107;
    pub const SEQUENCE_NUMBER: u16 = 0x0108;
    pub const HURL: u16 = 0x0111;
    pub const MOTM: u16 = 0x0112;
    pub const IP_ROUTE_ADD: u16 = 0x0121;
}

/// DSL-Forum vendor id carried in Vendor-Specific tags (RFC 4679).
pub const DSLFORUM_VENDOR_ID: u32 = 0x0000_0DE9;

/// A tag within a discovery packet
#[derive(Debug, Clone)]
pub struct Tag<'a> {
    pub tag_type: u16,
    pub data: &'a [u8],
}

/// Full discovery packet: Ethernet header, PPPoE header, tag stream
/// (zero-copy reference).
#[derive(Debug)]
pub struct DiscoveryFrame<'a> {
    eth: ethernet::Frame<'a>,
}

impl<'a> DiscoveryFrame<'a> {
    /// Parse a discovery packet from a raw Ethernet frame.
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < FULL_HEADER_SIZE {
            return Err(Error::Parse("truncated PPPoE discovery packet".into()));
        }
        Ok(Self {
            eth: ethernet::Frame::parse(buffer)?,
        })
    }

    pub fn src_mac(&self) -> MacAddr {
        self.eth.src_mac()
    }

    pub fn dst_mac(&self) -> MacAddr {
        self.eth.dst_mac()
    }

    pub fn ethertype(&self) -> u16 {
        self.eth.ethertype()
    }

    pub fn code(&self) -> u8 {
        self.eth.payload()[1]
    }

    pub fn session_id(&self) -> u16 {
        let p = self.eth.payload();
        u16::from_be_bytes([p[2], p[3]])
    }

    /// Declared payload length from the PPPoE header.
    pub fn length(&self) -> u16 {
        let p = self.eth.payload();
        u16::from_be_bytes([p[4], p[5]])
    }

    /// Tag area: exactly the declared length, clamped to the bytes that
    /// were actually received.
    pub fn tag_area(&self) -> &'a [u8] {
        let p = &self.eth.payload()[HEADER_SIZE..];
        let declared = self.length() as usize;
        &p[..declared.min(p.len())]
    }

    pub fn tags(&self) -> TagIter<'a> {
        TagIter {
            area: self.tag_area(),
            offset: 0,
        }
    }

    /// First in-order tag of the given type, if the walk reaches one.
    pub fn find_tag(&self, tag_type: u16) -> Option<Tag<'a>> {
        self.tags().find(|t| t.tag_type == tag_type)
    }

    /// First Vendor-Specific tag carrying the given vendor id
    /// (network order) in its leading four value bytes.
    pub fn find_vendor_tag(&self, vendor_id: u32) -> Option<Tag<'a>> {
        self.tags().find(|t| {
            t.tag_type == tags::VENDOR
                && t.data.len() >= 4
                && t.data[..4] == vendor_id.to_be_bytes()
        })
    }
}

/// Iterator over the tag stream.
///
/// A tag is yielded only if its header and its declared value both fit
/// within the tag area; any violation ends the walk.
pub struct TagIter<'a> {
    area: &'a [u8],
    offset: usize,
}

impl<'a> Iterator for TagIter<'a> {
    type Item = Tag<'a>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.offset + 4 > self.area.len() {
            return None;
        }
        let tag_type = u16::from_be_bytes([self.area[self.offset], self.area[self.offset + 1]]);
        let tag_len =
            u16::from_be_bytes([self.area[self.offset + 2], self.area[self.offset + 3]]) as usize;

        let start = self.offset + 4;
        let end = start + tag_len;
        if end > self.area.len() {
            return None;
        }

        self.offset = end;
        Some(Tag {
            tag_type,
            data: &self.area[start..end],
        })
    }
}

/// TLV emitter: appends tags in order, lengths in network byte order.
#[derive(Debug, Default)]
pub struct TagList {
    buf: Vec<u8>,
}

impl TagList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, tag_type: u16, value: &[u8]) -> Result<()> {
        if value.len() > u16::MAX as usize {
            return Err(Error::Parse("tag value too long".into()));
        }
        self.buf.extend_from_slice(&tag_type.to_be_bytes());
        self.buf.extend_from_slice(&(value.len() as u16).to_be_bytes());
        self.buf.extend_from_slice(value);
        Ok(())
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.buf
    }

    pub fn into_vec(self) -> Vec<u8> {
        self.buf
    }
}

/// Longest Agent-Circuit-ID / Agent-Remote-ID kept from a request.
pub const AGENT_ID_MAX: usize = 63;

/// Access-loop identification from the DSL-Forum vendor tag.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AgentInfo {
    pub circuit_id: String,
    pub remote_id: String,
}

impl AgentInfo {
    /// Parse the sub-TLV stream following the 4-byte vendor id.
    ///
    /// Sub-TLVs are (type:u8, len:u8, value); type 1 is the circuit id,
    /// type 2 the remote id. A length overrunning the stream stops the
    /// walk; values are capped at [`AGENT_ID_MAX`] bytes.
    pub fn parse(b: &[u8]) -> Self {
        let mut info = AgentInfo::default();
        let mut pos = 0;
        while pos + 2 <= b.len() {
            let sub_type = b[pos];
            let sub_len = b[pos + 1] as usize;
            if sub_len > b.len() - pos - 2 {
                break;
            }
            let value = &b[pos + 2..pos + 2 + sub_len];
            match sub_type {
                1 => info.circuit_id = bounded_string(value, AGENT_ID_MAX),
                2 => info.remote_id = bounded_string(value, AGENT_ID_MAX),
                _ => {}
            }
            pos += 2 + sub_len;
        }
        info
    }

    /// Encode as a Vendor-Specific tag value (vendor id first).
    pub fn encode(&self) -> Vec<u8> {
        let mut out = DSLFORUM_VENDOR_ID.to_be_bytes().to_vec();
        for (sub_type, value) in [(1u8, &self.circuit_id), (2u8, &self.remote_id)] {
            if !value.is_empty() {
                out.push(sub_type);
                out.push(value.len() as u8);
                out.extend_from_slice(value.as_bytes());
            }
        }
        out
    }
}

/// Copy at most `max` bytes of a wire string.
pub fn bounded_string(bytes: &[u8], max: usize) -> String {
    String::from_utf8_lossy(&bytes[..bytes.len().min(max)]).into_owned()
}

fn tag_name(tag_type: u16) -> &'static str {
    match tag_type {
        tags::EOL => "End-Of-List",
        tags::SERVICE_NAME => "Service-Name",
        tags::AC_NAME => "AC-Name",
        tags::HOST_UNIQ => "Host-Uniq",
        tags::AC_COOKIE => "AC-Cookie",
        tags::VENDOR => "Vendor-Specific",
        tags::RELAY_SESSION_ID => "Relay-Session-Id",
        tags::MAX_PAYLOAD => "PPP-Max-Payload",
        tags::SERVICE_NAME_ERROR => "Service-Name-Error",
        tags::AC_SYSTEM_ERROR => "AC-System-Error",
        tags::GENERIC_ERROR => "Generic-Error",
        tags::CREDITS => "Credits",
        tags::METRICS => "Metrics",
        tags::SEQUENCE_NUMBER => "Sequence Number",
        tags::HURL => "HURL",
        tags::MOTM => "MOTM",
        tags::IP_ROUTE_ADD => "IP_Route_Add",
        _ => "UNKNOWN",
    }
}

fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02x}", b)).collect()
}

/// Diagnostic dump of every tag in a discovery packet.
pub fn log_tags(frame: &DiscoveryFrame<'_>) {
    for tag in frame.tags() {
        let value = match tag.tag_type {
            tags::EOL => {
                if tag.data.is_empty() {
                    String::new()
                } else {
                    "TAG_LENGTH is not zero!".into()
                }
            }
            tags::SERVICE_NAME => {
                if tag.data.is_empty() {
                    "Any service is acceptable".into()
                } else {
                    bounded_string(tag.data, 1023)
                }
            }
            tags::AC_NAME | tags::AC_SYSTEM_ERROR | tags::GENERIC_ERROR => {
                bounded_string(tag.data, 1023)
            }
            tags::SERVICE_NAME_ERROR => {
                if tag.data.is_empty() {
                    String::new()
                } else {
                    bounded_string(tag.data, 1023)
                }
            }
            tags::HOST_UNIQ | tags::AC_COOKIE | tags::RELAY_SESSION_ID => {
                format!("0x{}", hex(tag.data))
            }
            tags::VENDOR => {
                if tag.data.len() < 4 {
                    "TAG_LENGTH must be >= 4 !".into()
                } else if tag.data[0] != 0 {
                    format!("First byte of VENDOR is not zero! 0x{}", hex(tag.data))
                } else {
                    format!("0x{} 0x{}", hex(&tag.data[..4]), hex(&tag.data[4..]))
                }
            }
            tags::MAX_PAYLOAD => {
                if tag.data.len() != 2 {
                    "TAG_LENGTH is not 2!".into()
                } else {
                    u16::from_be_bytes([tag.data[0], tag.data[1]]).to_string()
                }
            }
            tags::CREDITS
            | tags::METRICS
            | tags::SEQUENCE_NUMBER
            | tags::HURL
            | tags::MOTM
            | tags::IP_ROUTE_ADD => "Not implemented".into(),
            other => format!("0x{:04x}", other),
        };
        debug!("TAG: {}, Value: {}", tag_name(tag.tag_type), value);
    }
}
