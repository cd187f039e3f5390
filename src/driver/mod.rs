//! PPPoE link driver
//!
//! Per-link phys-layer state machines (DOWN -> CONNECTING -> READY -> UP)
//! multiplexed over shared parent-interface plumbing. The upper PPP layer
//! drives links through [`Driver`] and is notified back through
//! [`PhysHandler`]; socket readability is delivered by the daemon's event
//! loop, registered through [`Dispatcher`].
//!
//! State invariants:
//!
//! - DOWN: no per-session hook on the PPPoE node, no upper connection,
//!   connect timer not armed.
//! - CONNECTING: session hook plumbed, CONNECT (or server OFFER) issued,
//!   connect timer armed.
//! - READY: server handshake finished, waiting for the upper layer to open.
//! - UP: connect timer stopped, upper layer notified.

pub mod link;
mod parent;
mod router;

#[cfg(test)]
pub(crate) mod testutil;

pub use link::{derive_node_path, LinkConfig, PhysState, PPPOE_MRU, PPPOE_MTU};

use crate::netgraph::{self, cmd, CtrlSock, DataSock, Graph, InitData};
use crate::protocol::MacFormat;
use crate::telemetry::Metrics;
use crate::{Error, Result};
use link::{Link, AC_NAME_MAX, SESSION_NAME_MAX};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

pub type LinkId = usize;
pub type ParentId = usize;

/// Give up on a pending connection after this long.
pub const CONNECT_TIMEOUT: Duration = Duration::from_secs(9);

/// Why a link went down.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DownCause {
    /// Peer signaled failure.
    ConnectionFailed,
    /// Connect timer expired.
    ConnectionTimeout,
    /// Established session was closed by the peer.
    Dropped,
    /// Administrative close.
    Manual,
    /// Local plumbing error.
    Error,
}

impl std::fmt::Display for DownCause {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            DownCause::ConnectionFailed => "connection failed",
            DownCause::ConnectionTimeout => "connection timeout",
            DownCause::Dropped => "dropped",
            DownCause::Manual => "manually disconnected",
            DownCause::Error => "error",
        })
    }
}

/// Call direction of the current session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Originate {
    Local,
    Remote,
}

/// Upper PPP layer, as seen from the driver.
pub trait PhysHandler {
    /// The link reached UP.
    fn up(&mut self, link: LinkId);

    /// The link fell back to DOWN.
    fn down(&mut self, link: LinkId, cause: DownCause);

    /// A server-side session was accepted on the link.
    fn incoming(&mut self, link: LinkId);

    /// Node path and hook of the link's upper PPP pipeline.
    fn upper_hook(&mut self, link: LinkId) -> Result<(String, String)>;

    /// Whether an upper-layer session already claims the link.
    fn is_busy(&self, link: LinkId) -> bool;

    /// Daemon-wide load shedding; incoming requests are dropped while set.
    fn overloaded(&self) -> bool {
        false
    }
}

/// Opaque token for a registered readable-event watch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WatchHandle(pub u64);

/// The daemon's event loop, as seen from the driver.
///
/// A registered watch delivers [`Driver::on_ctrl_ready`] /
/// [`Driver::on_data_ready`] calls for the given parent until unwatched.
pub trait Dispatcher {
    fn watch_ctrl(&mut self, parent: ParentId, sock: CtrlSock) -> WatchHandle;
    fn watch_data(&mut self, parent: ParentId, sock: DataSock) -> WatchHandle;
    fn unwatch(&mut self, handle: WatchHandle);
}

/// The PPPoE device layer: link table, parent registry, and the glue
/// between kernel events and per-link state machines.
pub struct Driver<G, H, D> {
    ng: G,
    upper: H,
    events: D,
    links: Vec<Option<Link>>,
    parents: parent::ParentTable,
    pid: u32,
    hostname: String,
    shutting_down: bool,
    /// The kernel Ethernet node type is verified once per process.
    ether_checked: bool,
    metrics: Arc<Metrics>,
}

impl<G: Graph, H: PhysHandler, D: Dispatcher> Driver<G, H, D> {
    pub fn new(ng: G, upper: H, events: D, metrics: Arc<Metrics>) -> Self {
        let hostname = nix::unistd::gethostname()
            .ok()
            .and_then(|h| h.into_string().ok())
            .unwrap_or_default();
        Self {
            ng,
            upper,
            events,
            links: Vec::new(),
            parents: parent::ParentTable::new(),
            pid: std::process::id(),
            hostname,
            shutting_down: false,
            ether_checked: false,
            metrics,
        }
    }

    /// Create a configured (persistent) link with default settings.
    pub fn create_link(&mut self, name: impl Into<String>) -> LinkId {
        let mut link = Link::new(name);
        link.persistent = true;
        self.insert_link(link)
    }

    fn insert_link(&mut self, link: Link) -> LinkId {
        match self.links.iter().position(Option::is_none) {
            Some(id) => {
                self.links[id] = Some(link);
                id
            }
            None => {
                self.links.push(Some(link));
                self.links.len() - 1
            }
        }
    }

    /// Clone a template link for an accepted incoming call. The clone
    /// shares the template's parent binding and listen registration, so
    /// both refcounts grow with it.
    pub fn instantiate(&mut self, template: LinkId) -> Result<LinkId> {
        let tmpl = self.link(template)?;
        let mut clone = Link::new(String::new());
        clone.conf = tmpl.conf.clone();
        clone.parent = tmpl.parent;
        clone.listen = tmpl.listen.clone();
        let tmpl_name = tmpl.name.clone();

        if let Some(p) = clone.parent {
            self.parents.get_mut(p).refs += 1;
        }
        if let (Some(p), Some(service)) = (clone.parent, clone.listen.clone()) {
            if let Some(entry) = self.parents.get_mut(p).find_listen_mut(&service) {
                entry.refs += 1;
            }
        }

        let id = self.insert_link(clone);
        let name = format!("{}-{}", tmpl_name, id);
        self.links[id].as_mut().unwrap().name = name;
        Ok(id)
    }

    /// Open the link: start an outgoing connection, or finish the upper
    /// plumbing of an accepted incoming call.
    ///
    /// Per-link failures are reported through [`PhysHandler::down`]; the
    /// only `Err` is the fatal missing-Ethernet-node-type condition.
    pub fn open(&mut self, id: LinkId) -> Result<()> {
        let session_hook = self.session_hook(id);
        let link = self.link_mut(id)?;
        link.opened = true;

        if link.incoming {
            return self.open_incoming(id, &session_hook);
        }

        if link.state != PhysState::Down {
            warn!("[{}] PPPoE already active", self.link(id)?.name);
            return Ok(());
        }

        match self.acquire_parent(id) {
            Err(e @ Error::NodeTypeUnavailable(_)) => return Err(e),
            Err(e) => warn!("[{}] PPPoE: {}", self.link(id)?.name, e),
            Ok(()) => {}
        }

        let link = self.link(id)?;
        let name = link.name.clone();
        let Some(p) = link.parent else {
            tracing::error!("[{}] PPPoE node for link is not initialized", name);
            self.upper.down(id, DownCause::Error);
            return Ok(());
        };
        let service = link.conf.service.clone();
        let max_payload = link.conf.max_payload;
        let parent = self.parents.get(p);
        let path = parent.node_path();
        let csock = parent.csock;

        let (upath, uhook) = match self.upper.upper_hook(id) {
            Ok(v) => v,
            Err(_) => {
                warn!("[{}] PPPoE: can't get upper hook", name);
                return self.abort_open(id, csock, &path, &session_hook);
            }
        };

        // Connect our session hook on the PPPoE node to the upper
        // pipeline.
        if let Err(e) = self.ng.connect(csock, &path, &session_hook, &upath, &uhook) {
            warn!(
                "[{}] PPPoE: can't connect \"{}\"->\"{}\" and \"{}\"->\"{}\": {}",
                name, path, session_hook, upath, uhook, e
            );
            return self.abort_open(id, csock, &path, &session_hook);
        }

        // Tell the PPPoE node our PPP-Max-Payload value, when one is set.
        if max_payload > 0 {
            info!("[{}] PPPoE: set PPP-Max-Payload to '{}'", name, max_payload);
            if let Err(e) = self.ng.send_msg(
                csock,
                &path,
                netgraph::PPPOE_COOKIE,
                cmd::SETMAXP,
                &max_payload.to_ne_bytes(),
            ) {
                warn!("[{}] PPPoE: can't set PPP-Max-Payload value: {}", name, e);
                return self.abort_open(id, csock, &path, &session_hook);
            }
        }

        info!("[{}] PPPoE: connecting to '{}'", name, service);
        let body = InitData::new(session_hook.clone(), service.clone()).encode();
        if let Err(e) = self
            .ng
            .send_msg(csock, &path, netgraph::PPPOE_COOKIE, cmd::CONNECT, &body)
        {
            warn!("[{}] PPPoE: can't request connection to server: {}", name, e);
            return self.abort_open(id, csock, &path, &session_hook);
        }

        let link = self.link_mut(id)?;
        link.connect_deadline = Some(Instant::now() + CONNECT_TIMEOUT);
        link.state = PhysState::Connecting;
        link.real_session = link.conf.service.clone();
        link.agent_cid.clear();
        link.agent_rid.clear();
        link.mp_reply = false;
        Ok(())
    }

    /// Finish an incoming call: bridge the tee node to the upper pipeline
    /// and collapse the tee so only the straight path remains.
    fn open_incoming(&mut self, id: LinkId, session_hook: &str) -> Result<()> {
        let link = self.link(id)?;
        let name = link.name.clone();
        debug!("[{}] PPPoE open on incoming call", name);

        let Some(p) = link.parent else {
            tracing::error!("[{}] PPPoE node for link is not initialized", name);
            self.upper.down(id, DownCause::Error);
            return Ok(());
        };
        let parent = self.parents.get(p);
        let csock = parent.csock;
        let node_path = parent.node_path();
        let tee_path = format!("{}{}", node_path, session_hook);

        let (upath, uhook) = match self.upper.upper_hook(id) {
            Ok(v) => v,
            Err(_) => {
                warn!("[{}] PPPoE: can't get upper hook", name);
                return self.abort_open(id, csock, &node_path, session_hook);
            }
        };

        if let Err(e) = self
            .ng
            .connect(csock, &tee_path, netgraph::hooks::RIGHT, &upath, &uhook)
        {
            warn!(
                "[{}] PPPoE: can't connect \"{}\"->\"{}\" and \"{}\"->\"{}\": {}",
                name,
                tee_path,
                netgraph::hooks::RIGHT,
                upath,
                uhook,
                e
            );
            return self.abort_open(id, csock, &node_path, session_hook);
        }

        // The tee only buffered the handshake; shutting it down splices
        // the session hook straight to the upper pipeline.
        if let Err(e) = self.ng.shutdown_node(csock, &tee_path) {
            warn!("[{}] PPPoE: shutdown tee node {} error: {}", name, tee_path, e);
        }

        let link = self.link_mut(id)?;
        if link.state == PhysState::Ready {
            link.connect_deadline = None;
            link.state = PhysState::Up;
            self.upper.up(id);
        }
        Ok(())
    }

    /// Unwind a failed open: take down whatever hook this attempt created
    /// and report a generic error upward.
    fn abort_open(
        &mut self,
        id: LinkId,
        csock: CtrlSock,
        path: &str,
        session_hook: &str,
    ) -> Result<()> {
        if let Err(e) = self.ng.disconnect(csock, path, session_hook) {
            debug!("PPPoE: can't remove hook {} from {}: {}", session_hook, path, e);
        }
        self.upper.down(id, DownCause::Error);
        Ok(())
    }

    /// Administrative close.
    pub fn close(&mut self, id: LinkId) -> Result<()> {
        let link = self.link_mut(id)?;
        link.opened = false;
        if link.state == PhysState::Down {
            return Ok(());
        }
        self.do_close(id);
        self.upper.down(id, DownCause::Manual);
        Ok(())
    }

    /// Tear the link down completely and remove it from the table.
    pub fn shutdown_link(&mut self, id: LinkId) -> Result<()> {
        self.link(id)?;
        self.do_close(id);
        self.unlisten(id);
        self.release_parent(id);
        self.links[id] = None;
        Ok(())
    }

    /// Stop the whole driver: every link down, every parent released.
    pub fn shutdown(&mut self) {
        self.shutting_down = true;
        for id in 0..self.links.len() {
            if self.links[id].is_some() {
                let _ = self.shutdown_link(id);
            }
        }
    }

    /// Begin refusing new incoming sessions.
    pub fn set_shutting_down(&mut self, value: bool) {
        self.shutting_down = value;
    }

    /// Drop the session state and return to DOWN.
    pub(crate) fn do_close(&mut self, id: LinkId) {
        let Ok(link) = self.link(id) else { return };
        if link.state == PhysState::Down {
            return;
        }
        let session_hook = self.session_hook(id);
        if let Some(p) = self.links[id].as_ref().unwrap().parent {
            let parent = self.parents.get(p);
            let (csock, path) = (parent.csock, parent.node_path());
            if let Err(e) = self.ng.disconnect(csock, &path, &session_hook) {
                debug!(
                    "PPPoE: can't remove hook {} from {}: {}",
                    session_hook, path, e
                );
            }
        }
        let link = self.links[id].as_mut().unwrap();
        link.connect_deadline = None;
        link.state = PhysState::Down;
        link.reset_session();
    }

    /// Expire connect timers. Call once per event-loop turn.
    pub fn tick(&mut self) {
        let now = Instant::now();
        let expired: Vec<LinkId> = self
            .links
            .iter()
            .enumerate()
            .filter_map(|(id, slot)| {
                let link = slot.as_ref()?;
                (link.connect_deadline? <= now).then_some(id)
            })
            .collect();
        for id in expired {
            warn!(
                "[{}] PPPoE connection timeout after {} seconds",
                self.links[id].as_ref().unwrap().name,
                CONNECT_TIMEOUT.as_secs()
            );
            self.metrics.connect_timeouts.inc();
            self.do_close(id);
            self.upper.down(id, DownCause::ConnectionTimeout);
        }
    }

    // ------------------------------------------------------------------
    // Configuration surface
    // ------------------------------------------------------------------

    /// Set the parent Ethernet interface and optionally the attach hook.
    /// Re-plumbs the listen registration if one is active.
    pub fn set_iface(&mut self, id: LinkId, iface: &str, hook: Option<&str>) -> Result<()> {
        let link = self.link_mut(id)?;
        link.conf.iface = iface.to_string();
        link.conf.path = derive_node_path(iface);
        link.conf.hook = hook.unwrap_or(netgraph::hooks::ORPHAN).to_string();
        if self.link(id)?.listen.is_some() {
            self.unlisten(id);
            self.release_parent(id);
            self.acquire_parent(id)?;
            self.listen(id);
        }
        Ok(())
    }

    /// Set the service name ("*" matches any).
    pub fn set_service(&mut self, id: LinkId, service: &str) -> Result<()> {
        let mut service = service.to_string();
        service.truncate(SESSION_NAME_MAX);
        self.link_mut(id)?.conf.service = service;
        if self.link(id)?.listen.is_some() {
            self.unlisten(id);
            self.listen(id);
        }
        Ok(())
    }

    /// Set the AC name advertised in server offers.
    pub fn set_acname(&mut self, id: LinkId, acname: &str) -> Result<()> {
        let mut acname = acname.to_string();
        acname.truncate(AC_NAME_MAX);
        self.link_mut(id)?.conf.acname = acname;
        Ok(())
    }

    /// Set the PPP-Max-Payload request value.
    pub fn set_max_payload(&mut self, id: LinkId, value: u16) -> Result<()> {
        if value < PPPOE_MRU || value as usize > crate::protocol::ethernet::ETHER_MAX_LEN - 8 {
            return Err(Error::Config(format!(
                "PPP-Max-Payload value \"{}\" out of range",
                value
            )));
        }
        self.link_mut(id)?.conf.max_payload = value;
        Ok(())
    }

    pub fn set_mac_format(&mut self, id: LinkId, format: MacFormat) -> Result<()> {
        self.link_mut(id)?.conf.mac_format = format;
        Ok(())
    }

    /// Enable or disable incoming calls and reconcile the listen state.
    pub fn set_incoming(&mut self, id: LinkId, enabled: bool) -> Result<()> {
        self.link_mut(id)?.conf.incoming = enabled;
        self.update(id)
    }

    pub fn set_template(&mut self, id: LinkId, template: bool) -> Result<()> {
        self.link_mut(id)?.template = template;
        Ok(())
    }

    // ------------------------------------------------------------------
    // Accessors (upstream contract)
    // ------------------------------------------------------------------

    pub fn state(&self, id: LinkId) -> Result<PhysState> {
        Ok(self.link(id)?.state)
    }

    pub fn link_name(&self, id: LinkId) -> Result<&str> {
        Ok(&self.link(id)?.name)
    }

    pub fn link_config(&self, id: LinkId) -> Result<&LinkConfig> {
        Ok(&self.link(id)?.conf)
    }

    pub fn parent_of(&self, id: LinkId) -> Option<ParentId> {
        self.links.get(id).and_then(|l| l.as_ref()).and_then(|l| l.parent)
    }

    /// Peer MAC in canonical colon notation.
    pub fn peer_mac_addr(&self, id: LinkId) -> Result<String> {
        Ok(self.link(id)?.peer_addr.to_string())
    }

    pub fn peer_iface(&self, id: LinkId) -> Result<String> {
        Ok(self.link(id)?.conf.iface.clone())
    }

    /// Calling number: the peer MAC (in the configured format) for
    /// incoming calls, the requested session otherwise.
    pub fn calling_num(&self, id: LinkId) -> Result<String> {
        let link = self.link(id)?;
        Ok(if link.incoming {
            link.peer_addr.render(link.conf.mac_format)
        } else {
            link.real_session.clone()
        })
    }

    /// Called number: the mirror of [`Self::calling_num`].
    pub fn called_num(&self, id: LinkId) -> Result<String> {
        let link = self.link(id)?;
        Ok(if !link.incoming {
            link.peer_addr.render(link.conf.mac_format)
        } else {
            link.real_session.clone()
        })
    }

    /// Agent-Circuit-ID from the discovery request.
    pub fn self_name(&self, id: LinkId) -> Result<String> {
        Ok(self.link(id)?.agent_cid.clone())
    }

    /// Agent-Remote-ID from the discovery request.
    pub fn peer_name(&self, id: LinkId) -> Result<String> {
        Ok(self.link(id)?.agent_rid.clone())
    }

    /// Effective MTU: the negotiated PPP-Max-Payload when the server
    /// acknowledged ours, else the phys default or the link-configured
    /// value depending on the query mode.
    pub fn mtu(&self, id: LinkId, configured: bool) -> Result<u16> {
        let link = self.link(id)?;
        Ok(if link.conf.max_payload > 0 && link.mp_reply {
            link.conf.max_payload
        } else if configured {
            link.conf.mtu
        } else {
            PPPOE_MTU
        })
    }

    pub fn mru(&self, id: LinkId, configured: bool) -> Result<u16> {
        let link = self.link(id)?;
        Ok(if link.conf.max_payload > 0 && link.mp_reply {
            link.conf.max_payload
        } else if configured {
            link.conf.mru
        } else {
            PPPOE_MRU
        })
    }

    pub fn originated(&self, id: LinkId) -> Result<Originate> {
        Ok(if self.link(id)?.incoming {
            Originate::Remote
        } else {
            Originate::Local
        })
    }

    /// PPPoE links are always synchronous.
    pub fn is_sync(&self, _id: LinkId) -> bool {
        true
    }

    /// Render configuration and session status for the CLI.
    pub fn stat(&self, id: LinkId) -> Result<String> {
        let link = self.link(id)?;
        let mut out = String::new();
        let _ = writeln!(out, "PPPoE configuration:");
        let _ = writeln!(out, "\tIface Name   : {}", link.conf.iface);
        let _ = writeln!(out, "\tIface Node   : {}", link.conf.path);
        let _ = writeln!(out, "\tIface Hook   : {}", link.conf.hook);
        let _ = writeln!(out, "\tSession      : {}", link.conf.service);
        let _ = writeln!(out, "\tMax-Payload  : {}", link.conf.max_payload);
        let _ = writeln!(out, "\tMAC format   : {}", link.conf.mac_format);
        let _ = writeln!(out, "PPPoE status:");
        let _ = writeln!(out, "\tState        : {}", link.state);
        if link.state != PhysState::Down {
            let _ = writeln!(out, "\tOpened       : {}", yesno(link.opened));
            let _ = writeln!(out, "\tIncoming     : {}", yesno(link.incoming));
            let _ = writeln!(out, "\tCurrent peer : {}", link.peer_addr);
            let _ = writeln!(out, "\tSession      : {}", link.real_session);
            let _ = writeln!(out, "\tMax-Payload  : {}", yesno(link.mp_reply));
            let _ = writeln!(out, "\tCircuit-ID   : {}", link.agent_cid);
            let _ = writeln!(out, "\tRemote-ID    : {}", link.agent_rid);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Internals
    // ------------------------------------------------------------------

    fn link(&self, id: LinkId) -> Result<&Link> {
        self.links
            .get(id)
            .and_then(|l| l.as_ref())
            .ok_or(Error::LinkNotFound(id))
    }

    fn link_mut(&mut self, id: LinkId) -> Result<&mut Link> {
        self.links
            .get_mut(id)
            .and_then(|l| l.as_mut())
            .ok_or(Error::LinkNotFound(id))
    }

    /// Name of this link's session hook on the shared PPPoE node.
    pub(crate) fn session_hook(&self, id: LinkId) -> String {
        format!("mpd{}-{}", self.pid, id)
    }

    fn hook_prefix(&self) -> String {
        format!("mpd{}-", self.pid)
    }
}

fn yesno(v: bool) -> &'static str {
    if v {
        "YES"
    } else {
        "NO"
    }
}
