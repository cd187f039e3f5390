//! Kernel-graph transport contract
//!
//! The driver manipulates the kernel's node graph through the [`Graph`]
//! trait: one control socket for typed messages and one data socket for
//! raw frames per parent Ethernet interface. Message bodies mirror the
//! kernel's PPPoE control structures; integer fields inside them are
//! kernel-native order, the SESSIONID payload is network order.

use crate::{Error, Result};

#[cfg(test)]
pub(crate) mod mock;

/// Hook names are limited to 31 characters plus NUL.
pub const HOOK_NAME_MAX: usize = 32;

/// Node paths are limited to 63 characters plus NUL.
pub const NODE_PATH_MAX: usize = 64;

/// Kernel node type names.
pub mod nodes {
    pub const ETHER: &str = "ether";
    pub const PPPOE: &str = "pppoe";
    pub const TEE: &str = "tee";
    /// Loadable module implementing the Ethernet node type.
    pub const ETHER_MODULE: &str = "ng_ether";
}

/// Well-known hook names.
pub mod hooks {
    /// Ethernet-node hook receiving frames no one else claimed.
    pub const ORPHAN: &str = "orphans";
    /// Ethernet-node hook diverting all inbound frames.
    pub const DIVERT: &str = "divert";
    /// PPPoE-node hook facing the Ethernet node.
    pub const ETHERNET: &str = "ethernet";
    /// Tee-node hooks.
    pub const LEFT: &str = "left";
    pub const RIGHT: &str = "right";
    pub const LEFT2RIGHT: &str = "left2right";
}

/// Control-message type cookie of the PPPoE node.
pub const PPPOE_COOKIE: u32 = 1089893072;

/// PPPoE node commands.
pub mod cmd {
    pub const SET_FLAG: u32 = 1;
    pub const CONNECT: u32 = 2;
    pub const LISTEN: u32 = 3;
    pub const OFFER: u32 = 4;
    pub const SUCCESS: u32 = 5;
    pub const FAIL: u32 = 6;
    pub const CLOSE: u32 = 7;
    pub const GET_STATUS: u32 = 8;
    pub const ACNAME: u32 = 9;
    pub const GETMODE: u32 = 10;
    pub const SETMODE: u32 = 11;
    pub const SERVICE: u32 = 12;
    pub const SESSIONID: u32 = 13;
    pub const SETENADDR: u32 = 14;
    pub const SETMAXP: u32 = 15;
    pub const HURL: u32 = 16;
    pub const MOTM: u32 = 17;
}

/// Control-socket descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CtrlSock(pub i32);

/// Data-socket descriptor.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DataSock(pub i32);

/// A received control message.
#[derive(Debug, Clone)]
pub struct ControlMsg {
    /// Path of the originating node.
    pub path: String,
    pub cookie: u32,
    pub cmd: u32,
    pub data: Vec<u8>,
}

impl ControlMsg {
    /// Hook name from a status-style body (SUCCESS/FAIL/CLOSE/ACNAME and
    /// the leading field of SETMAXP replies).
    pub fn status_hook(&self) -> Option<String> {
        if self.data.is_empty() {
            return None;
        }
        Some(nul_string(&self.data[..self.data.len().min(HOOK_NAME_MAX)]))
    }

    /// Value of a SETMAXP reply (follows the hook field, native order).
    pub fn maxp_value(&self) -> Option<u16> {
        let b = self.data.get(HOOK_NAME_MAX..HOOK_NAME_MAX + 2)?;
        Some(u16::from_ne_bytes([b[0], b[1]]))
    }

    /// Session id from a SESSIONID message (network order).
    pub fn session_id(&self) -> Option<u16> {
        let b = self.data.get(..2)?;
        Some(u16::from_be_bytes([b[0], b[1]]))
    }

    /// Message text of a PADM (HURL/MOTM) body.
    pub fn padm_text(&self) -> String {
        nul_string(&self.data)
    }
}

fn nul_string(bytes: &[u8]) -> String {
    let end = bytes.iter().position(|&b| b == 0).unwrap_or(bytes.len());
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

/// Body of CONNECT/LISTEN/OFFER/SERVICE requests: a session hook name and
/// a selector string (service name or AC name).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InitData {
    pub hook: String,
    pub data: String,
}

impl InitData {
    pub fn new(hook: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            hook: hook.into(),
            data: data.into(),
        }
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut out = vec![0u8; HOOK_NAME_MAX];
        let hook = self.hook.as_bytes();
        let n = hook.len().min(HOOK_NAME_MAX - 1);
        out[..n].copy_from_slice(&hook[..n]);
        out.extend_from_slice(&(self.data.len() as u16).to_ne_bytes());
        out.extend_from_slice(self.data.as_bytes());
        out
    }

    pub fn decode(body: &[u8]) -> Result<Self> {
        if body.len() < HOOK_NAME_MAX + 2 {
            return Err(Error::Parse("short init data".into()));
        }
        let hook = nul_string(&body[..HOOK_NAME_MAX]);
        let len = u16::from_ne_bytes([body[HOOK_NAME_MAX], body[HOOK_NAME_MAX + 1]]) as usize;
        let rest = &body[HOOK_NAME_MAX + 2..];
        if len > rest.len() {
            return Err(Error::Parse("init data length overruns body".into()));
        }
        Ok(Self {
            hook,
            data: String::from_utf8_lossy(&rest[..len]).into_owned(),
        })
    }
}

/// Hook attached to a node, with its peer's identity.
#[derive(Debug, Clone)]
pub struct HookInfo {
    pub ourhook: String,
    pub peerhook: String,
    pub peer_type: String,
    pub peer_id: u32,
}

/// Response to a hook listing.
#[derive(Debug, Clone)]
pub struct NodeInfo {
    pub node_type: String,
    pub id: u32,
    pub hooks: Vec<HookInfo>,
}

/// Capability for talking to the kernel graph.
///
/// Every operation is one synchronous kernel round trip at most, and every
/// failure is reported. Socket pairs are created close-on-exec by the
/// implementation.
pub trait Graph {
    /// Create the control/data socket pair for one parent interface.
    fn socket_pair(&mut self) -> Result<(CtrlSock, DataSock)>;

    fn close_socket_pair(&mut self, csock: CtrlSock, dsock: DataSock);

    /// Send a typed control message to the node at `path`.
    fn send_msg(
        &mut self,
        csock: CtrlSock,
        path: &str,
        cookie: u32,
        command: u32,
        body: &[u8],
    ) -> Result<()>;

    /// Receive one queued control message.
    fn recv_msg(&mut self, csock: CtrlSock) -> Result<ControlMsg>;

    /// Write a raw frame out of the named hook of the socket node.
    fn send_data(&mut self, dsock: DataSock, hook: &str, frame: &[u8]) -> Result<()>;

    /// Receive one datagram along with the hook it arrived on.
    fn recv_data(&mut self, dsock: DataSock) -> Result<(String, Vec<u8>)>;

    /// Create a new peer node of `node_type` attached to the node at
    /// `path` via `ourhook`/`peerhook`.
    fn mkpeer(
        &mut self,
        csock: CtrlSock,
        path: &str,
        node_type: &str,
        ourhook: &str,
        peerhook: &str,
    ) -> Result<()>;

    /// Connect `ourhook` of the node at `path` to `peerhook` of the node
    /// at `peer_path`.
    fn connect(
        &mut self,
        csock: CtrlSock,
        path: &str,
        ourhook: &str,
        peer_path: &str,
        peerhook: &str,
    ) -> Result<()>;

    /// Break the named hook of the node at `path`.
    fn disconnect(&mut self, csock: CtrlSock, path: &str, hook: &str) -> Result<()>;

    fn shutdown_node(&mut self, csock: CtrlSock, path: &str) -> Result<()>;

    /// Node types currently known to the kernel.
    fn list_types(&mut self, csock: CtrlSock) -> Result<Vec<String>>;

    fn list_hooks(&mut self, csock: CtrlSock, path: &str) -> Result<NodeInfo>;

    fn node_id(&mut self, csock: CtrlSock, path: &str) -> Result<u32>;

    /// Bring a network interface administratively up.
    fn iface_up(&mut self, iface: &str) -> Result<()>;

    /// Load a kernel module by name.
    fn load_module(&mut self, name: &str) -> Result<()>;
}
