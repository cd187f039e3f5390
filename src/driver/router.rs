//! Discovery event routing
//!
//! Control messages from a parent's PPPoE node are dispatched to the
//! owning link by decoding the session hook name; raw discovery packets
//! from the data socket are matched against the listen set and answered
//! with a server offer on a freshly plumbed session hook.

use super::link::{PhysState, SESSION_NAME_MAX};
use super::{Dispatcher, DownCause, Driver, LinkId, ParentId, PhysHandler, CONNECT_TIMEOUT};
use crate::netgraph::{cmd, hooks, nodes, CtrlSock, Graph, InitData, PPPOE_COOKIE};
use crate::protocol::pppoe::{self, bounded_string, AgentInfo, DiscoveryFrame, DSLFORUM_VENDOR_ID};
use std::time::Instant;
use tracing::{debug, error, info, warn};

impl<G: Graph, H: PhysHandler, D: Dispatcher> Driver<G, H, D> {
    /// Handle one readable control socket: receive a message and advance
    /// the owning link's state machine.
    pub fn on_ctrl_ready(&mut self, parent: ParentId) {
        let csock = self.parents.get(parent).csock;
        let msg = match self.ng.recv_msg(csock) {
            Ok(msg) => msg,
            Err(e) => {
                error!("PPPoE: error reading control message: {}", e);
                return;
            }
        };
        if msg.cookie != PPPOE_COOKIE {
            error!("PPPoE: rec'd cookie {} from \"{}\"", msg.cookie, msg.path);
            self.metrics.ctrl_drops.inc();
            return;
        }

        // Session status messages carry the hook they concern; everything
        // else is informational.
        let target = match msg.cmd {
            cmd::SUCCESS | cmd::FAIL | cmd::CLOSE | cmd::SETMAXP => {
                match self.route_status_hook(parent, msg.cmd, msg.status_hook()) {
                    Routed::Link(id) => Some(id),
                    Routed::Ignore => return,
                }
            }
            _ => None,
        };

        match msg.cmd {
            cmd::SESSIONID => {
                debug!(
                    "PPPoE: rec'd SESSIONID {} from \"{}\"",
                    msg.session_id().unwrap_or(0),
                    msg.path
                );
            }
            cmd::SUCCESS => {
                let id = target.unwrap();
                info!("[{}] PPPoE: connection successful", self.link_name_or(id));
                let link = self.links[id].as_mut().unwrap();
                if link.opened {
                    link.connect_deadline = None;
                    link.state = PhysState::Up;
                    self.upper.up(id);
                } else {
                    link.state = PhysState::Ready;
                }
            }
            cmd::FAIL => {
                let id = target.unwrap();
                info!("[{}] PPPoE: connection failed", self.link_name_or(id));
                self.do_close(id);
                self.upper.down(id, DownCause::ConnectionFailed);
            }
            cmd::CLOSE => {
                let id = target.unwrap();
                info!("[{}] PPPoE: connection closed", self.link_name_or(id));
                self.do_close(id);
                self.upper.down(id, DownCause::Dropped);
            }
            cmd::SETMAXP => {
                self.handle_maxp_reply(target.unwrap(), msg.maxp_value().unwrap_or(0));
            }
            cmd::ACNAME => {
                info!(
                    "PPPoE: rec'd ACNAME \"{}\"",
                    msg.status_hook().unwrap_or_default()
                );
            }
            cmd::HURL => info!("PPPoE: rec'd HURL \"{}\"", msg.padm_text()),
            cmd::MOTM => info!("PPPoE: rec'd MOTM \"{}\"", msg.padm_text()),
            other => {
                debug!("PPPoE: rec'd command {} from \"{}\"", other, msg.path);
            }
        }
    }

    /// Map a status-message hook name to its link, dropping anything
    /// misaddressed or stale.
    fn route_status_hook(&mut self, parent: ParentId, command: u32, hook: Option<String>) -> Routed {
        let Some(hook) = hook else {
            warn!("PPPoE: message {} without a hook", command);
            return Routed::Ignore;
        };
        // Listen hooks report their own lifecycle; nothing to do.
        if hook.starts_with("listen-") {
            return Routed::Ignore;
        }
        let prefix = self.hook_prefix();
        let id = hook
            .strip_prefix(&prefix)
            .and_then(|rest| rest.parse::<LinkId>().ok());
        let Some(id) = id else {
            error!("PPPoE: message {} from unknown hook \"{}\"", command, hook);
            self.metrics.ctrl_drops.inc();
            return Routed::Ignore;
        };

        let known = self
            .links
            .get(id)
            .and_then(|slot| slot.as_ref())
            .is_some_and(|l| l.parent == Some(parent));
        if !known {
            if command == cmd::SUCCESS {
                error!("PPPoE: message {} from nonexistent link \"{}\"", command, hook);
            } else {
                debug!("PPPoE: message {} from nonexistent link \"{}\"", command, hook);
            }
            self.metrics.ctrl_drops.inc();
            return Routed::Ignore;
        }

        // A late answer for a torn-down session is discarded.
        if self.links[id].as_ref().unwrap().state == PhysState::Down {
            if command != cmd::CLOSE {
                debug!(
                    "[{}] PPPoE: message {} in DOWN state",
                    self.link_name_or(id),
                    command
                );
            }
            return Routed::Ignore;
        }
        Routed::Link(id)
    }

    fn handle_maxp_reply(&mut self, id: LinkId, value: u16) {
        let link = self.links[id].as_mut().unwrap();
        info!("[{}] PPPoE: rec'd PPP-Max-Payload '{}'", link.name, value);
        if link.conf.max_payload > 0 {
            if link.conf.max_payload == value {
                link.mp_reply = true;
            } else {
                info!(
                    "[{}] PPPoE: sent and returned values are not equal",
                    link.name
                );
            }
        } else {
            info!(
                "[{}] PPPoE: server sent PPP-Max-Payload without request from the client",
                link.name
            );
        }
    }

    /// Handle one readable data socket: a discovery request arrived on a
    /// listen hook. Find (or instantiate) an eligible link and plumb the
    /// server-side answer.
    pub fn on_data_ready(&mut self, parent: ParentId) {
        let dsock = self.parents.get(parent).dsock;
        let (rhook, frame) = match self.ng.recv_data(dsock) {
            Ok(v) => v,
            Err(e) => {
                error!("PPPoE: data receive error: {}", e);
                return;
            }
        };
        let Some(service) = rhook.strip_prefix("listen-").map(str::to_string) else {
            error!("PPPoE: data from unknown hook \"{}\"", rhook);
            return;
        };
        let ifpath = self.parents.get(parent).path.clone();

        if frame.len() < pppoe::FULL_HEADER_SIZE {
            info!(
                "incoming truncated PPPoE connection request via {} for service \"{}\"",
                ifpath, service
            );
            return;
        }
        let Ok(pkt) = DiscoveryFrame::parse(&frame) else {
            info!(
                "incoming truncated PPPoE connection request via {} for service \"{}\"",
                ifpath, service
            );
            return;
        };

        // The Service-Name tag carries the session the peer actually
        // asked for; the matched listen service is the fallback.
        let real_session = pkt
            .find_tag(pppoe::tags::SERVICE_NAME)
            .map(|t| bounded_string(t.data, SESSION_NAME_MAX))
            .unwrap_or_else(|| service.clone());
        let agent = pkt
            .find_vendor_tag(DSLFORUM_VENDOR_ID)
            .map(|t| AgentInfo::parse(&t.data[4..]))
            .unwrap_or_default();
        let peer = pkt.src_mac();

        self.metrics.incoming_requests.inc();
        info!(
            "incoming PPPoE connection request via {} for service \"{}\" from {}",
            ifpath, real_session, peer
        );
        pppoe::log_tags(&pkt);

        if self.shutting_down {
            info!("shutdown sequence in progress, ignoring request");
            self.metrics.incoming_dropped.inc();
            return;
        }
        if self.upper.overloaded() {
            info!("daemon overloaded, ignoring request");
            self.metrics.incoming_dropped.inc();
            return;
        }

        // First idle incoming-enabled link on this parent configured for
        // the matched service.
        let mut target = None;
        for (k, slot) in self.links.iter().enumerate() {
            let Some(l) = slot.as_ref() else { continue };
            if l.state == PhysState::Down
                && !self.upper.is_busy(k)
                && l.parent == Some(parent)
                && l.conf.service == service
                && l.conf.incoming
            {
                target = Some(k);
                break;
            }
        }
        let Some(mut target) = target else {
            info!("no free PPPoE link with requested parameters was found");
            self.metrics.incoming_dropped.inc();
            return;
        };

        if self.links[target].as_ref().unwrap().template {
            match self.instantiate(target) {
                Ok(instance) => target = instance,
                Err(e) => {
                    error!("PPPoE: can't instantiate link: {}", e);
                    self.metrics.incoming_dropped.inc();
                    return;
                }
            }
        }

        let name = self.links[target].as_ref().unwrap().name.clone();
        info!("[{}] accepting PPPoE connection", name);

        let pif = self.parents.get(parent);
        let (csock, node_path) = (pif.csock, pif.node_path());
        let session_hook = self.session_hook(target);
        let tee_path = format!("{}{}", node_path, session_hook);

        // Buffer the handshake behind a tee until the upper pipeline
        // attaches.
        if let Err(e) = self
            .ng
            .mkpeer(csock, &node_path, nodes::TEE, &session_hook, hooks::LEFT)
        {
            warn!(
                "[{}] PPPoE: can't create {} peer to {},{}: {}",
                name,
                nodes::TEE,
                node_path,
                hooks::LEFT,
                e
            );
            return self.reject_incoming(target, csock, None);
        }

        // Temporary socket hook, named after the link, for replaying the
        // original request through the tee.
        if let Err(e) = self
            .ng
            .connect(csock, ".:", &name, &tee_path, hooks::LEFT2RIGHT)
        {
            warn!(
                "[{}] PPPoE: can't connect \"{}\"->\"{}\" and \"{}\"->\"{}\": {}",
                name,
                ".:",
                name,
                tee_path,
                hooks::LEFT2RIGHT,
                e
            );
            return self.reject_incoming(target, csock, Some(&tee_path));
        }

        // Put the PPPoE node into OFFER mode, advertising our AC name or
        // the host name.
        let link = self.links[target].as_ref().unwrap();
        let acname = if !link.conf.acname.is_empty() {
            link.conf.acname.clone()
        } else if !self.hostname.is_empty() {
            self.hostname.clone()
        } else {
            "NONAME".to_string()
        };
        let conf_service = link.conf.service.clone();

        let body = InitData::new(session_hook.clone(), acname).encode();
        if let Err(e) = self
            .ng
            .send_msg(csock, &node_path, PPPOE_COOKIE, cmd::OFFER, &body)
        {
            warn!("[{}] PPPoE: can't send offer to {}: {}", name, node_path, e);
            return self.reject_incoming(target, csock, Some(&tee_path));
        }

        let body = InitData::new(session_hook.clone(), conf_service).encode();
        if let Err(e) = self
            .ng
            .send_msg(csock, &node_path, PPPOE_COOKIE, cmd::SERVICE, &body)
        {
            warn!(
                "[{}] PPPoE: can't send service name to {}: {}",
                name, node_path, e
            );
            return self.reject_incoming(target, csock, Some(&tee_path));
        }

        // Replay the original request so the PPPoE node processes it on
        // the new session hook.
        if let Err(e) = self.ng.send_data(dsock, &name, &frame) {
            warn!("[{}] PPPoE: cannot send original request: {}", name, e);
            return self.reject_incoming(target, csock, Some(&tee_path));
        }

        // The temporary hook has served its purpose.
        if let Err(e) = self.ng.disconnect(csock, ".:", &name) {
            warn!("[{}] PPPoE: can't remove hook {}: {}", name, name, e);
            return self.reject_incoming(target, csock, Some(&tee_path));
        }

        let link = self.links[target].as_mut().unwrap();
        link.state = PhysState::Connecting;
        link.incoming = true;
        link.peer_addr = peer;
        link.real_session = real_session;
        link.agent_cid = agent.circuit_id;
        link.agent_rid = agent.remote_id;
        link.connect_deadline = Some(Instant::now() + CONNECT_TIMEOUT);
        debug!("[{}] PPPoE response sent", name);

        self.metrics.incoming_accepted.inc();
        self.upper.incoming(target);
    }

    /// Failed server plumb: drop the half-built tee and throw away the
    /// link instance unless it is a configured (persistent) one.
    fn reject_incoming(&mut self, id: LinkId, csock: CtrlSock, tee_path: Option<&str>) {
        let name = self.link_name_or(id);
        if let Some(tee_path) = tee_path {
            if let Err(e) = self.ng.shutdown_node(csock, tee_path) {
                warn!("[{}] shutdown tee node {} error: {}", name, tee_path, e);
            }
        }
        info!("[{}] PPPoE connection not accepted due to error", name);
        self.metrics.incoming_dropped.inc();
        if !self.links[id].as_ref().map_or(true, |l| l.persistent) {
            let _ = self.shutdown_link(id);
        }
    }

    fn link_name_or(&self, id: LinkId) -> String {
        self.links
            .get(id)
            .and_then(|slot| slot.as_ref())
            .map(|l| l.name.clone())
            .unwrap_or_else(|| format!("link-{}", id))
    }
}

enum Routed {
    Link(LinkId),
    Ignore,
}

#[cfg(test)]
mod tests {
    use super::super::testutil::*;
    use super::*;
    use crate::netgraph::mock::{self, Op};
    use crate::protocol::MacAddr;

    fn listening_template(d: &mut TestDriver, iface: &str, service: &str) -> LinkId {
        let id = d.create_link("T");
        d.set_iface(id, iface, None).unwrap();
        d.set_service(id, service).unwrap();
        d.set_template(id, true).unwrap();
        d.set_incoming(id, true).unwrap();
        id
    }

    #[test]
    fn test_incoming_match_plumbs_server_answer() {
        let mut d = new_driver();
        let tmpl = listening_template(&mut d, "eth1", "biz");
        d.set_acname(tmpl, "ac1").unwrap();
        let p = d.parent_of(tmpl).unwrap();

        let peer = MacAddr([0x02, 0xaa, 0xbb, 0xcc, 0xdd, 0xee]);
        let agent = AgentInfo {
            circuit_id: "Eth0/0:100".into(),
            remote_id: "abc123".into(),
        };
        let request = discovery_request(peer, "biz", Some(&agent));
        d.ng.push_data("listen-biz", request.clone());
        d.ng.ops.clear();

        d.on_data_ready(p);

        // A fresh instance was cloned off the template.
        assert_eq!(d.upper.incomings.len(), 1);
        let inst = d.upper.incomings[0];
        assert_ne!(inst, tmpl);
        let link = d.links[inst].as_ref().unwrap();
        assert_eq!(link.state, PhysState::Connecting);
        assert!(link.incoming);
        assert_eq!(link.peer_addr, peer);
        assert_eq!(link.real_session, "biz");
        assert_eq!(link.agent_cid, "Eth0/0:100");
        assert_eq!(link.agent_rid, "abc123");
        assert!(link.connect_deadline.is_some());

        // Template untouched.
        let t = d.links[tmpl].as_ref().unwrap();
        assert_eq!(t.state, PhysState::Down);
        assert!(!t.incoming);

        // Tee plumbed at the instance's session hook, request replayed,
        // temporary hook detached.
        let hook = d.session_hook(inst);
        let inst_name = link.name.clone();
        assert!(d.ng.ops.iter().any(|op| matches!(
            op,
            Op::Mkpeer { node_type, ourhook, peerhook, .. }
                if node_type == "tee" && *ourhook == hook && peerhook == "left"
        )));
        assert!(d.ng.ops.iter().any(|op| matches!(
            op,
            Op::Connect { path, ourhook, peerhook, .. }
                if path == ".:" && *ourhook == inst_name && peerhook == "left2right"
        )));
        assert!(d.ng.ops.iter().any(|op| matches!(
            op,
            Op::SendData { hook: h, frame } if *h == inst_name && *frame == request
        )));
        assert!(d.ng.ops.iter().any(|op| matches!(
            op,
            Op::Disconnect { path, hook: h } if path == ".:" && *h == inst_name
        )));

        // OFFER carries the AC name, SERVICE the configured service.
        let offers = d.ng.sent_init_data(cmd::OFFER);
        assert_eq!(offers.len(), 1);
        assert_eq!(offers[0].hook, hook);
        assert_eq!(offers[0].data, "ac1");
        let services = d.ng.sent_init_data(cmd::SERVICE);
        assert_eq!(services[0].data, "biz");

        assert_eq!(d.metrics.incoming_accepted.get(), 1);
    }

    #[test]
    fn test_incoming_offer_falls_back_to_hostname() {
        let mut d = new_driver();
        d.hostname = "gw1".into();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();
        d.ng.push_data(
            "listen-biz",
            discovery_request(MacAddr([2, 0, 0, 0, 0, 1]), "biz", None),
        );
        d.on_data_ready(p);
        assert_eq!(d.ng.sent_init_data(cmd::OFFER)[0].data, "gw1");

        // And to a fixed literal when even the host name is unknown.
        d.hostname.clear();
        d.ng.push_data(
            "listen-biz",
            discovery_request(MacAddr([2, 0, 0, 0, 0, 2]), "biz", None),
        );
        d.on_data_ready(p);
        assert_eq!(d.ng.sent_init_data(cmd::OFFER)[1].data, "NONAME");
    }

    #[test]
    fn test_truncated_service_tag_falls_back_to_listen_suffix() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();

        // Valid headers, but the Service-Name tag claims more bytes than
        // the declared payload holds.
        let mut tag_bytes = pppoe::tags::SERVICE_NAME.to_be_bytes().to_vec();
        tag_bytes.extend_from_slice(&100u16.to_be_bytes());
        tag_bytes.extend_from_slice(&[0u8; 10]);
        let request = raw_discovery_packet(MacAddr([2, 0, 0, 0, 0, 3]), &tag_bytes);
        d.ng.push_data("listen-biz", request);

        d.on_data_ready(p);

        let inst = *d.upper.incomings.first().expect("call accepted");
        let link = d.links[inst].as_ref().unwrap();
        assert_eq!(link.real_session, "biz");
        assert!(link.agent_cid.is_empty());
        assert!(link.agent_rid.is_empty());
    }

    #[test]
    fn test_overrunning_agent_subtlv_leaves_ids_empty() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();

        let mut vendor = DSLFORUM_VENDOR_ID.to_be_bytes().to_vec();
        vendor.extend_from_slice(&[1, 250, b'x', b'y']);
        let mut tags = pppoe::TagList::new();
        tags.push(pppoe::tags::SERVICE_NAME, b"biz").unwrap();
        tags.push(pppoe::tags::VENDOR, &vendor).unwrap();
        let request = raw_discovery_packet(MacAddr([2, 0, 0, 0, 0, 4]), tags.as_bytes());
        d.ng.push_data("listen-biz", request);

        d.on_data_ready(p);

        let inst = *d.upper.incomings.first().unwrap();
        let link = d.links[inst].as_ref().unwrap();
        assert!(link.agent_cid.is_empty());
        assert!(link.agent_rid.is_empty());
    }

    #[test]
    fn test_data_from_unknown_hook_dropped() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();
        d.ng.push_data("weird", discovery_request(MacAddr::ZERO, "biz", None));
        d.on_data_ready(p);
        assert!(d.upper.incomings.is_empty());
    }

    #[test]
    fn test_short_datagram_dropped() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();
        d.ng.push_data("listen-biz", vec![0u8; pppoe::FULL_HEADER_SIZE - 1]);
        d.on_data_ready(p);
        assert!(d.upper.incomings.is_empty());
    }

    #[test]
    fn test_request_dropped_while_shutting_down() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();
        d.set_shutting_down(true);
        d.ng.push_data("listen-biz", discovery_request(MacAddr::ZERO, "biz", None));
        d.on_data_ready(p);
        assert!(d.upper.incomings.is_empty());
        assert_eq!(d.metrics.incoming_dropped.get(), 1);
    }

    #[test]
    fn test_request_dropped_when_overloaded() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();
        d.upper.overloaded = true;
        d.ng.push_data("listen-biz", discovery_request(MacAddr::ZERO, "biz", None));
        d.on_data_ready(p);
        assert!(d.upper.incomings.is_empty());
    }

    #[test]
    fn test_busy_links_are_skipped() {
        let mut d = new_driver();
        let l1 = d.create_link("A");
        d.set_iface(l1, "eth1", None).unwrap();
        d.set_service(l1, "biz").unwrap();
        d.set_incoming(l1, true).unwrap();
        let l2 = d.create_link("B");
        d.set_iface(l2, "eth1", None).unwrap();
        d.set_service(l2, "biz").unwrap();
        d.set_incoming(l2, true).unwrap();

        d.upper.busy.insert(l1);
        let p = d.parent_of(l1).unwrap();
        d.ng.push_data("listen-biz", discovery_request(MacAddr::ZERO, "biz", None));
        d.on_data_ready(p);

        assert_eq!(d.upper.incomings, vec![l2]);
    }

    #[test]
    fn test_no_eligible_link_drops_request() {
        let mut d = new_driver();
        let t = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(t).unwrap();
        // Nothing listens for this service.
        d.ng.push_data("listen-other", discovery_request(MacAddr::ZERO, "other", None));
        d.on_data_ready(p);
        assert!(d.upper.incomings.is_empty());
        assert_eq!(d.metrics.incoming_dropped.get(), 1);
    }

    #[test]
    fn test_failed_plumb_destroys_instance_only() {
        let mut d = new_driver();
        let tmpl = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(tmpl).unwrap();
        d.ng.fail_cmds.push(cmd::OFFER);
        d.ng.push_data("listen-biz", discovery_request(MacAddr::ZERO, "biz", None));

        d.on_data_ready(p);

        assert!(d.upper.incomings.is_empty());
        // The clone was shut down again; the template survives.
        let live: Vec<_> = d
            .links
            .iter()
            .enumerate()
            .filter(|(_, s)| s.is_some())
            .map(|(i, _)| i)
            .collect();
        assert_eq!(live, vec![tmpl]);
        // The half-built tee was torn down.
        assert!(d
            .ng
            .ops
            .iter()
            .any(|op| matches!(op, Op::ShutdownNode { .. })));
        // Parent and listen references returned to the template's alone.
        assert_eq!(d.parents.get(p).refs, 1);
        assert_eq!(d.parents.get(p).listens[0].refs, 1);
    }

    #[test]
    fn test_foreign_cookie_dropped() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        let mut msg = mock::status_msg(cmd::SUCCESS, &d.session_hook(l1));
        msg.cookie = 12345;
        d.ng.push_ctrl(msg);
        d.on_ctrl_ready(p);
        assert_eq!(d.state(l1).unwrap(), PhysState::Connecting);
        assert_eq!(d.metrics.ctrl_drops.get(), 1);
    }

    #[test]
    fn test_listen_hook_status_ignored() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        d.ng.push_ctrl(mock::status_msg(cmd::CLOSE, "listen-isp"));
        d.on_ctrl_ready(p);
        assert_eq!(d.state(l1).unwrap(), PhysState::Connecting);
    }

    #[test]
    fn test_unknown_hook_status_dropped() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        d.ng.push_ctrl(mock::status_msg(cmd::SUCCESS, "ppp0-7"));
        d.ng.push_ctrl(mock::status_msg(cmd::SUCCESS, &format!("{}nonsense", d.hook_prefix())));
        d.ng.push_ctrl(mock::status_msg(cmd::SUCCESS, &format!("{}99", d.hook_prefix())));
        for _ in 0..3 {
            d.on_ctrl_ready(p);
        }
        assert_eq!(d.state(l1).unwrap(), PhysState::Connecting);
        assert!(d.upper.ups.is_empty());
    }

    #[test]
    fn test_late_message_for_down_link_dropped() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        d.close(l1).unwrap();
        d.upper.downs.clear();

        d.ng.push_ctrl(mock::status_msg(cmd::FAIL, &d.session_hook(l1)));
        d.on_ctrl_ready(p);

        assert_eq!(d.state(l1).unwrap(), PhysState::Down);
        assert!(d.upper.downs.is_empty());
    }

    #[test]
    fn test_fail_and_close_causes() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        d.ng.push_ctrl(mock::status_msg(cmd::FAIL, &d.session_hook(l1)));
        d.on_ctrl_ready(p);
        assert_eq!(d.upper.downs, vec![(l1, DownCause::ConnectionFailed)]);
        assert_eq!(d.state(l1).unwrap(), PhysState::Down);

        let l2 = open_outgoing(&mut d, "eth0", "isp");
        let p2 = d.parent_of(l2).unwrap();
        d.ng.push_ctrl(mock::status_msg(cmd::SUCCESS, &d.session_hook(l2)));
        d.on_ctrl_ready(p2);
        assert_eq!(d.state(l2).unwrap(), PhysState::Up);
        d.ng.push_ctrl(mock::status_msg(cmd::CLOSE, &d.session_hook(l2)));
        d.on_ctrl_ready(p2);
        assert_eq!(d.upper.downs.last(), Some(&(l2, DownCause::Dropped)));
    }

    #[test]
    fn test_incoming_success_before_open_reaches_ready() {
        let mut d = new_driver();
        let tmpl = listening_template(&mut d, "eth1", "biz");
        let p = d.parent_of(tmpl).unwrap();
        d.ng.push_data("listen-biz", discovery_request(MacAddr([2, 0, 0, 0, 0, 9]), "biz", None));
        d.on_data_ready(p);
        let inst = d.upper.incomings[0];

        // Server handshake finishes before the upper layer opens.
        d.ng.push_ctrl(mock::status_msg(cmd::SUCCESS, &d.session_hook(inst)));
        d.on_ctrl_ready(p);
        assert_eq!(d.state(inst).unwrap(), PhysState::Ready);
        assert!(d.upper.ups.is_empty());

        // Opening bridges the tee to the upper hook and collapses it.
        d.ng.ops.clear();
        d.open(inst).unwrap();
        assert_eq!(d.state(inst).unwrap(), PhysState::Up);
        assert_eq!(d.upper.ups, vec![inst]);
        let hook = d.session_hook(inst);
        let tee_path = format!("{}{}", d.parents.get(p).node_path(), hook);
        assert!(d.ng.ops.iter().any(|op| matches!(
            op,
            Op::Connect { path, ourhook, .. } if *path == tee_path && ourhook == "right"
        )));
        assert!(d.ng.ops.iter().any(|op| matches!(
            op,
            Op::ShutdownNode { path } if *path == tee_path
        )));
        assert!(d.links[inst].as_ref().unwrap().connect_deadline.is_none());
    }

    #[test]
    fn test_setmaxp_reply_matching() {
        let mut d = new_driver();
        let l1 = d.create_link("L1");
        d.set_iface(l1, "eth0", None).unwrap();
        d.set_max_payload(l1, 1500).unwrap();
        d.open(l1).unwrap();
        let p = d.parent_of(l1).unwrap();

        d.ng.push_ctrl(mock::maxp_msg(&d.session_hook(l1), 1500));
        d.on_ctrl_ready(p);
        assert!(d.links[l1].as_ref().unwrap().mp_reply);
        assert_eq!(d.mtu(l1, false).unwrap(), 1500);
    }

    #[test]
    fn test_setmaxp_reply_mismatch_not_recorded() {
        let mut d = new_driver();
        let l1 = d.create_link("L1");
        d.set_iface(l1, "eth0", None).unwrap();
        d.set_max_payload(l1, 1500).unwrap();
        d.open(l1).unwrap();
        let p = d.parent_of(l1).unwrap();

        d.ng.push_ctrl(mock::maxp_msg(&d.session_hook(l1), 1508));
        d.on_ctrl_ready(p);
        assert!(!d.links[l1].as_ref().unwrap().mp_reply);
    }

    #[test]
    fn test_unsolicited_setmaxp_reply_ignored() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        d.ng.push_ctrl(mock::maxp_msg(&d.session_hook(l1), 1500));
        d.on_ctrl_ready(p);
        assert!(!d.links[l1].as_ref().unwrap().mp_reply);
    }

    #[test]
    fn test_informational_messages_do_not_touch_links() {
        let mut d = new_driver();
        let l1 = open_outgoing(&mut d, "eth0", "isp");
        let p = d.parent_of(l1).unwrap();
        d.ng.push_ctrl(mock::status_msg(cmd::ACNAME, "some-ac"));
        d.ng.push_ctrl(mock::padm_msg(cmd::HURL, "http://example.test/"));
        d.ng.push_ctrl(mock::padm_msg(cmd::MOTM, "maintenance tonight"));
        let mut sid = mock::status_msg(cmd::SESSIONID, "");
        sid.data = vec![0x12, 0x34];
        d.ng.push_ctrl(sid);
        for _ in 0..4 {
            d.on_ctrl_ready(p);
        }
        assert_eq!(d.state(l1).unwrap(), PhysState::Connecting);
    }
}
