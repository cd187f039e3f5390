//! Per-link state and configuration.

use crate::netgraph::NODE_PATH_MAX;
use crate::protocol::{MacAddr, MacFormat};
use std::fmt;
use std::time::Instant;

/// Room for PPPoE overhead below the Ethernet MTU.
pub const PPPOE_MTU: u16 = 1492;
pub const PPPOE_MRU: u16 = 1492;

/// Longest session (service) name kept in configuration.
pub const SESSION_NAME_MAX: usize = 63;

/// Longest advertised AC name.
pub const AC_NAME_MAX: usize = 63;

/// Physical-layer state of one link.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum PhysState {
    #[default]
    Down,
    Connecting,
    Ready,
    Up,
}

impl fmt::Display for PhysState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            PhysState::Down => "DOWN",
            PhysState::Connecting => "CONNECTING",
            PhysState::Ready => "READY",
            PhysState::Up => "UP",
        })
    }
}

/// Per-link configurable parameters.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LinkConfig {
    /// Parent Ethernet interface name.
    pub iface: String,
    /// Netgraph path of the parent's Ethernet node, derived from `iface`.
    pub path: String,
    /// Ethernet-node hook to attach the PPPoE node on.
    pub hook: String,
    /// Service name; "*" matches any service.
    pub service: String,
    /// AC name advertised in server offers; empty selects the host name.
    pub acname: String,
    /// PPP-Max-Payload request value; 0 leaves the tag unset.
    pub max_payload: u16,
    /// Peer MAC rendering for calling/called-number output.
    pub mac_format: MacFormat,
    /// Accept incoming calls for `service` on this link.
    pub incoming: bool,
    /// Link-configured MTU/MRU, reported when a configured query asks.
    pub mtu: u16,
    pub mru: u16,
}

impl Default for LinkConfig {
    fn default() -> Self {
        Self {
            iface: "undefined".into(),
            path: "undefined:".into(),
            hook: "undefined".into(),
            service: "*".into(),
            acname: String::new(),
            max_payload: 0,
            mac_format: MacFormat::default(),
            incoming: false,
            mtu: PPPOE_MTU,
            mru: PPPOE_MRU,
        }
    }
}

/// Derive the netgraph node path from an interface name: '.' and ':' are
/// not valid in a path and become '_', and a trailing ':' addresses the
/// node. Paths are capped at the kernel's 64-byte limit, so an interface
/// name longer than 62 bytes is silently truncated.
pub fn derive_node_path(iface: &str) -> String {
    let mut path: String = iface
        .chars()
        .map(|c| if c == '.' || c == ':' { '_' } else { c })
        .collect();
    path.truncate(NODE_PATH_MAX - 2);
    path.push(':');
    path
}

/// One link of the daemon's link table.
#[derive(Debug)]
pub(crate) struct Link {
    pub name: String,
    pub conf: LinkConfig,
    pub state: PhysState,
    /// Configured links may be templates, cloned per accepted call.
    pub template: bool,
    /// Persistent links survive a failed incoming attempt; instances are
    /// shut down.
    pub persistent: bool,
    /// Call direction of the current session.
    pub incoming: bool,
    /// The upper layer has opened this link.
    pub opened: bool,
    pub peer_addr: MacAddr,
    /// Service name actually requested by the peer.
    pub real_session: String,
    pub agent_cid: String,
    pub agent_rid: String,
    /// Server acknowledged our PPP-Max-Payload value.
    pub mp_reply: bool,
    /// Slot of the parent interface this link is bound to.
    pub parent: Option<usize>,
    /// Service this link holds a listen reference for.
    pub listen: Option<String>,
    /// Armed exactly while the link is CONNECTING.
    pub connect_deadline: Option<Instant>,
}

impl Link {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            conf: LinkConfig::default(),
            state: PhysState::Down,
            template: false,
            persistent: false,
            incoming: false,
            opened: false,
            peer_addr: MacAddr::ZERO,
            real_session: "*".into(),
            agent_cid: String::new(),
            agent_rid: String::new(),
            mp_reply: false,
            parent: None,
            listen: None,
            connect_deadline: None,
        }
    }

    /// Forget everything tied to the current session.
    pub fn reset_session(&mut self) {
        self.incoming = false;
        self.peer_addr = MacAddr::ZERO;
        self.real_session.clear();
        self.agent_cid.clear();
        self.agent_rid.clear();
        self.mp_reply = false;
    }
}
