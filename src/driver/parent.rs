//! Parent-interface registry
//!
//! Every link bound to the same Ethernet interface shares one PPPoE node
//! and one control/data socket pair, tracked here per canonical node
//! path. Entries are refcounted by the links bound to them; the listen
//! set mirrors the kernel's `listen-<service>` hooks the same way.

use super::link::PhysState;
use super::{Dispatcher, Driver, LinkId, ParentId, PhysHandler, WatchHandle};
use crate::netgraph::{
    cmd, hooks, nodes, CtrlSock, DataSock, Graph, InitData, PPPOE_COOKIE,
};
use crate::{Error, Result};
use tracing::{info, warn};

/// Capacity of the parent-interface table.
pub(crate) const MAX_PARENT_IFS: usize = if cfg!(feature = "small-system") {
    32
} else {
    4096
};

/// One `listen-<service>` registration on a parent.
#[derive(Debug)]
pub(crate) struct ListenEntry {
    pub service: String,
    pub refs: usize,
}

/// One shared parent-Ethernet binding. A slot with an empty path is free.
#[derive(Debug)]
pub(crate) struct ParentIf {
    pub path: String,
    pub node_id: u32,
    pub refs: usize,
    pub csock: CtrlSock,
    pub dsock: DataSock,
    pub ctrl_watch: Option<WatchHandle>,
    pub data_watch: Option<WatchHandle>,
    pub listens: Vec<ListenEntry>,
}

impl ParentIf {
    fn free() -> Self {
        Self {
            path: String::new(),
            node_id: 0,
            refs: 0,
            csock: CtrlSock(-1),
            dsock: DataSock(-1),
            ctrl_watch: None,
            data_watch: None,
            listens: Vec::new(),
        }
    }

    pub fn is_free(&self) -> bool {
        self.path.is_empty()
    }

    /// Address of the shared PPPoE node.
    pub fn node_path(&self) -> String {
        format!("[{:x}]:", self.node_id)
    }

    pub fn find_listen_mut(&mut self, service: &str) -> Option<&mut ListenEntry> {
        self.listens.iter_mut().find(|e| e.service == service)
    }
}

/// Fixed-capacity slot table keyed by node path.
#[derive(Debug, Default)]
pub(crate) struct ParentTable {
    slots: Vec<ParentIf>,
}

impl ParentTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn find(&self, path: &str) -> Option<ParentId> {
        self.slots
            .iter()
            .position(|s| !s.is_free() && s.path == path)
    }

    /// First free slot, growing the table up to its capacity.
    pub fn alloc(&mut self) -> Option<ParentId> {
        if let Some(i) = self.slots.iter().position(ParentIf::is_free) {
            return Some(i);
        }
        if self.slots.len() < MAX_PARENT_IFS {
            self.slots.push(ParentIf::free());
            return Some(self.slots.len() - 1);
        }
        None
    }

    pub fn get(&self, id: ParentId) -> &ParentIf {
        &self.slots[id]
    }

    pub fn get_mut(&mut self, id: ParentId) -> &mut ParentIf {
        &mut self.slots[id]
    }

    /// Number of bound entries.
    pub fn active(&self) -> usize {
        self.slots.iter().filter(|s| !s.is_free()).count()
    }
}

impl<G: Graph, H: PhysHandler, D: Dispatcher> Driver<G, H, D> {
    /// Bind the link to its parent interface, creating the shared PPPoE
    /// node and socket pair on first use.
    ///
    /// A link with an undefined interface is skipped (it simply stays
    /// unbound); a full table or failed kernel plumbing is an `Err`, of
    /// which only the missing-Ethernet-node-type case is fatal to the
    /// process.
    pub(crate) fn acquire_parent(&mut self, id: LinkId) -> Result<()> {
        let link = self.link(id)?;
        if link.parent.is_some() {
            return Ok(());
        }
        if link.conf.path == "undefined:" {
            warn!("[{}] PPPoE: skipping link with undefined interface", link.name);
            return Ok(());
        }
        let name = link.name.clone();
        let iface = link.conf.iface.clone();
        let path = link.conf.path.clone();
        let hook = link.conf.hook.clone();

        if let Some(p) = self.parents.find(&path) {
            self.parents.get_mut(p).refs += 1;
            self.link_mut(id)?.parent = Some(p);
            return Ok(());
        }

        let Some(slot) = self.parents.alloc() else {
            tracing::error!("[{}] PPPoE: too many different parent interfaces", name);
            return Err(Error::ParentTableFull);
        };

        match self.create_parent_node(&iface, &path, &hook) {
            Ok((csock, dsock, node_id)) => {
                let ctrl_watch = self.events.watch_ctrl(slot, csock);
                let data_watch = self.events.watch_data(slot, dsock);
                let pif = self.parents.get_mut(slot);
                pif.path = path;
                pif.node_id = node_id;
                pif.refs = 1;
                pif.csock = csock;
                pif.dsock = dsock;
                pif.ctrl_watch = Some(ctrl_watch);
                pif.data_watch = Some(data_watch);
                self.link_mut(id)?.parent = Some(slot);
                Ok(())
            }
            Err(e) => {
                tracing::error!(
                    "[{}] PPPoE: error creating pppoe node on {}: {}",
                    name, path, e
                );
                Err(e)
            }
        }
    }

    /// Bring the interface up, open the socket pair, and attach or adopt
    /// the PPPoE node on the Ethernet node's orphan hook.
    fn create_parent_node(
        &mut self,
        iface: &str,
        path: &str,
        hook: &str,
    ) -> Result<(CtrlSock, DataSock, u32)> {
        self.ng.iface_up(iface).map_err(|e| {
            warn!("[{}] PPPoE: can't bring up interface: {}", iface, e);
            e
        })?;
        let (csock, dsock) = self.ng.socket_pair()?;
        match self.attach_pppoe_node(csock, path, hook) {
            Ok(node_id) => Ok((csock, dsock, node_id)),
            Err(e) => {
                self.ng.close_socket_pair(csock, dsock);
                Err(e)
            }
        }
    }

    fn attach_pppoe_node(&mut self, csock: CtrlSock, path: &str, hook: &str) -> Result<u32> {
        // The Ethernet node type is verified once per process.
        if !self.ether_checked {
            let types = self.ng.list_types(csock)?;
            if !types.iter().any(|t| t == nodes::ETHER) {
                if let Err(e) = self.ng.load_module(nodes::ETHER_MODULE) {
                    tracing::error!("PPPoE: cannot load {}: {}", nodes::ETHER_MODULE, e);
                    return Err(Error::NodeTypeUnavailable(nodes::ETHER.into()));
                }
            }
            self.ether_checked = true;
        }

        let info = self.ng.list_hooks(csock, path)?;
        if info.node_type != nodes::ETHER {
            return Err(Error::Netgraph(format!(
                "unexpected node type \"{}\" (wanted \"{}\") on {}",
                info.node_type,
                nodes::ETHER,
                path
            )));
        }

        // Something may already claim the orphan hook. A PPPoE peer is
        // adopted; anything else owns the interface and we back off.
        for h in &info.hooks {
            if h.ourhook != hooks::ORPHAN && h.ourhook != hooks::DIVERT {
                continue;
            }
            if h.peer_type != nodes::PPPOE {
                return Err(Error::Netgraph(format!(
                    "{} node type \"{}\" is currently using orphan hook",
                    path, h.peer_type
                )));
            }
            return Ok(h.peer_id);
        }

        self.ng
            .mkpeer(csock, path, nodes::PPPOE, hook, hooks::ETHERNET)?;
        self.ng.node_id(csock, &format!("{}{}", path, hook))
    }

    /// Drop the link's parent reference; the last one out closes the
    /// sockets, cancels the event watches, and frees the slot.
    pub(crate) fn release_parent(&mut self, id: LinkId) {
        let Ok(link) = self.link_mut(id) else { return };
        let Some(p) = link.parent.take() else { return };
        let pif = self.parents.get_mut(p);
        pif.refs -= 1;
        if pif.refs > 0 {
            return;
        }
        let (csock, dsock) = (pif.csock, pif.dsock);
        let ctrl_watch = pif.ctrl_watch.take();
        let data_watch = pif.data_watch.take();
        pif.path.clear();
        pif.node_id = 0;
        pif.csock = CtrlSock(-1);
        pif.dsock = DataSock(-1);
        if let Some(w) = ctrl_watch {
            self.events.unwatch(w);
        }
        if let Some(w) = data_watch {
            self.events.unwatch(w);
        }
        self.ng.close_socket_pair(csock, dsock);
    }

    /// Register the link's service on its parent. The first reference to
    /// a service plumbs the kernel listen hook; later ones only count.
    pub(crate) fn listen(&mut self, id: LinkId) {
        let Ok(link) = self.link(id) else { return };
        if link.listen.is_some() {
            return;
        }
        let Some(p) = link.parent else { return };
        let service = link.conf.service.clone();

        // Bookkeeping first, so refcounts stay consistent even if the
        // kernel refuses the plumbing below.
        let pif = self.parents.get_mut(p);
        let existed = match pif.find_listen_mut(&service) {
            Some(entry) => {
                entry.refs += 1;
                true
            }
            None => {
                pif.listens.push(ListenEntry {
                    service: service.clone(),
                    refs: 1,
                });
                false
            }
        };
        self.link_mut(id).unwrap().listen = Some(service.clone());
        if existed {
            return;
        }

        let pif = self.parents.get(p);
        let (csock, node_path, ifpath) = (pif.csock, pif.node_path(), pif.path.clone());
        let listen_hook = format!("listen-{}", service);

        // Connect our socket node's listen hook to the PPPoE node.
        if let Err(e) = self
            .ng
            .connect(csock, ".:", &listen_hook, &node_path, &listen_hook)
        {
            warn!(
                "PPPoE: can't connect \"{}\" hook \"{}\": {}",
                node_path, listen_hook, e
            );
            return;
        }

        // Tell the PPPoE node to be a server for this service.
        let body = InitData::new(listen_hook.clone(), service.clone()).encode();
        if let Err(e) = self
            .ng
            .send_msg(csock, &node_path, PPPOE_COOKIE, cmd::LISTEN, &body)
        {
            warn!(
                "PPPoE: can't send listen request to {} hook \"{}\": {}",
                node_path, listen_hook, e
            );
            return;
        }

        info!(
            "PPPoE: waiting for connection on {}, service \"{}\"",
            ifpath, service
        );
    }

    /// Give back the link's listen reference; the last one disconnects
    /// the kernel hook.
    pub(crate) fn unlisten(&mut self, id: LinkId) {
        let Ok(link) = self.link_mut(id) else { return };
        let Some(service) = link.listen.take() else { return };
        let Some(p) = link.parent else { return };

        let pif = self.parents.get_mut(p);
        let Some(idx) = pif.listens.iter().position(|e| e.service == service) else {
            return;
        };
        pif.listens[idx].refs -= 1;
        if pif.listens[idx].refs > 0 {
            return;
        }
        pif.listens.remove(idx);
        let (csock, node_path, ifpath) = (pif.csock, pif.node_path(), pif.path.clone());

        let listen_hook = format!("listen-{}", service);
        if let Err(e) = self.ng.disconnect(csock, &node_path, &listen_hook) {
            warn!(
                "PPPoE: can't remove hook \"{}\" from {}: {}",
                listen_hook, node_path, e
            );
        }
        info!(
            "PPPoE: stop waiting for connection on {}, service \"{}\"",
            ifpath, service
        );
    }

    /// Reconcile the listen registration with the link's incoming
    /// setting.
    pub fn update(&mut self, id: LinkId) -> Result<()> {
        let link = self.link(id)?;
        let has_listen = link.listen.is_some();
        let incoming = link.conf.incoming;
        let state = link.state;

        if !has_listen {
            if incoming {
                if let Err(e) = self.acquire_parent(id) {
                    if matches!(e, Error::NodeTypeUnavailable(_)) {
                        return Err(e);
                    }
                    warn!("[{}] PPPoE: {}", self.link(id)?.name, e);
                }
                self.listen(id);
            }
        } else if !incoming {
            self.unlisten(id);
            if state == PhysState::Down {
                self.release_parent(id);
            }
        }
        Ok(())
    }
}
