//! Ethernet header view
//!
//! Discovery packets picked up from the data socket carry their full
//! Ethernet header; only the header fields are ever inspected here, the
//! frame itself is replayed back to the kernel byte for byte.

use super::MacAddr;
use crate::{Error, Result};

/// Ethernet header length (no FCS, no VLAN).
pub const HEADER_SIZE: usize = 14;

/// Maximum Ethernet frame size, header + payload + FCS.
pub const ETHER_MAX_LEN: usize = 1518;

/// Parsed Ethernet header (zero-copy reference)
#[derive(Debug)]
pub struct Frame<'a> {
    buffer: &'a [u8],
}

impl<'a> Frame<'a> {
    pub fn parse(buffer: &'a [u8]) -> Result<Self> {
        if buffer.len() < HEADER_SIZE {
            return Err(Error::Parse("ethernet frame too short".into()));
        }
        Ok(Self { buffer })
    }

    pub fn dst_mac(&self) -> MacAddr {
        MacAddr(self.buffer[0..6].try_into().unwrap())
    }

    pub fn src_mac(&self) -> MacAddr {
        MacAddr(self.buffer[6..12].try_into().unwrap())
    }

    pub fn ethertype(&self) -> u16 {
        u16::from_be_bytes([self.buffer[12], self.buffer[13]])
    }

    pub fn payload(&self) -> &'a [u8] {
        &self.buffer[HEADER_SIZE..]
    }
}
