//! Shared fixtures for the driver test suite.

use super::*;
use crate::netgraph::mock::MockGraph;
use crate::protocol::pppoe::{codes, tags, AgentInfo, TagList, DISCOVERY_ETHERTYPE, VERTYPE};
use crate::protocol::MacAddr;
use crate::telemetry::Metrics;
use std::collections::HashSet;

pub type TestDriver = Driver<MockGraph, MockUpper, MockDispatcher>;

/// Upper layer that records every notification.
#[derive(Default)]
pub struct MockUpper {
    pub ups: Vec<LinkId>,
    pub downs: Vec<(LinkId, DownCause)>,
    pub incomings: Vec<LinkId>,
    pub busy: HashSet<LinkId>,
    pub overloaded: bool,
    pub fail_upper_hook: bool,
}

impl PhysHandler for MockUpper {
    fn up(&mut self, link: LinkId) {
        self.ups.push(link);
    }

    fn down(&mut self, link: LinkId, cause: DownCause) {
        self.downs.push((link, cause));
    }

    fn incoming(&mut self, link: LinkId) {
        self.incomings.push(link);
    }

    fn upper_hook(&mut self, link: LinkId) -> crate::Result<(String, String)> {
        if self.fail_upper_hook {
            return Err(crate::Error::Netgraph("no upper hook".into()));
        }
        Ok(("[f0]:".to_string(), format!("upper{}", link)))
    }

    fn is_busy(&self, link: LinkId) -> bool {
        self.busy.contains(&link)
    }

    fn overloaded(&self) -> bool {
        self.overloaded
    }
}

/// Event loop that only tracks which watches are active.
#[derive(Default)]
pub struct MockDispatcher {
    next: u64,
    pub active: HashSet<u64>,
}

impl Dispatcher for MockDispatcher {
    fn watch_ctrl(&mut self, _parent: ParentId, _sock: CtrlSock) -> WatchHandle {
        self.next += 1;
        self.active.insert(self.next);
        WatchHandle(self.next)
    }

    fn watch_data(&mut self, _parent: ParentId, _sock: DataSock) -> WatchHandle {
        self.next += 1;
        self.active.insert(self.next);
        WatchHandle(self.next)
    }

    fn unwatch(&mut self, handle: WatchHandle) {
        self.active.remove(&handle.0);
    }
}

pub fn new_driver() -> TestDriver {
    Driver::new(
        MockGraph::new(),
        MockUpper::default(),
        MockDispatcher::default(),
        Arc::new(Metrics::new()),
    )
}

/// Create a link on `iface` for `service` and open it outgoing.
pub fn open_outgoing(d: &mut TestDriver, iface: &str, service: &str) -> LinkId {
    let id = d.create_link(format!("L{}", d.links.len()));
    d.set_iface(id, iface, None).unwrap();
    d.set_service(id, service).unwrap();
    d.open(id).unwrap();
    id
}

/// A PADI-style discovery request with a Service-Name tag and an optional
/// DSL-Forum vendor tag.
pub fn discovery_request(src: MacAddr, service: &str, agent: Option<&AgentInfo>) -> Vec<u8> {
    let mut list = TagList::new();
    list.push(tags::SERVICE_NAME, service.as_bytes()).unwrap();
    if let Some(agent) = agent {
        list.push(tags::VENDOR, &agent.encode()).unwrap();
    }
    raw_discovery_packet(src, list.as_bytes())
}

/// Raw discovery packet bytes around an arbitrary tag area.
pub fn raw_discovery_packet(src: MacAddr, tag_bytes: &[u8]) -> Vec<u8> {
    let mut pkt = vec![0xffu8; 6];
    pkt.extend_from_slice(&src.0);
    pkt.extend_from_slice(&DISCOVERY_ETHERTYPE.to_be_bytes());
    pkt.push(VERTYPE);
    pkt.push(codes::PADI);
    pkt.extend_from_slice(&0u16.to_be_bytes());
    pkt.extend_from_slice(&(tag_bytes.len() as u16).to_be_bytes());
    pkt.extend_from_slice(tag_bytes);
    pkt
}
