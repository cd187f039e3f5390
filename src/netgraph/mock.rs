//! Recording transport used by the driver test suite.
//!
//! Records every kernel operation in order, answers listings from
//! scriptable tables, and feeds queued control messages and datagrams
//! back to the event handlers.

use super::*;
use std::collections::{HashMap, VecDeque};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Op {
    IfaceUp(String),
    SocketPair,
    CloseSocketPair,
    ListTypes,
    LoadModule(String),
    ListHooks {
        path: String,
    },
    Mkpeer {
        path: String,
        node_type: String,
        ourhook: String,
        peerhook: String,
    },
    Connect {
        path: String,
        ourhook: String,
        peer_path: String,
        peerhook: String,
    },
    Disconnect {
        path: String,
        hook: String,
    },
    ShutdownNode {
        path: String,
    },
    SendMsg {
        path: String,
        cookie: u32,
        cmd: u32,
        body: Vec<u8>,
    },
    SendData {
        hook: String,
        frame: Vec<u8>,
    },
}

#[derive(Default)]
pub struct MockGraph {
    pub ops: Vec<Op>,
    /// Node types the fake kernel reports; filled by `new`.
    pub types: Vec<String>,
    /// Hook listings by node path; unknown paths report a bare Ethernet
    /// node with no hooks attached.
    pub hook_lists: HashMap<String, NodeInfo>,
    node_ids: HashMap<String, u32>,
    next_node_id: u32,
    pub ctrl_queue: VecDeque<ControlMsg>,
    pub data_queue: VecDeque<(String, Vec<u8>)>,
    pub open_pairs: usize,
    next_sock: i32,
    /// Commands whose send should fail, for unwind tests.
    pub fail_cmds: Vec<u32>,
    pub fail_mkpeer: bool,
    pub fail_connect: bool,
    pub fail_load_module: bool,
}

impl MockGraph {
    pub fn new() -> Self {
        Self {
            types: vec![
                nodes::ETHER.to_string(),
                nodes::PPPOE.to_string(),
                nodes::TEE.to_string(),
            ],
            next_node_id: 0x100,
            ..Self::default()
        }
    }

    /// A fake kernel that has no Ethernet node type loaded.
    pub fn without_ether() -> Self {
        let mut g = Self::new();
        g.types.retain(|t| t != nodes::ETHER);
        g
    }

    pub fn push_ctrl(&mut self, msg: ControlMsg) {
        self.ctrl_queue.push_back(msg);
    }

    pub fn push_data(&mut self, hook: &str, frame: Vec<u8>) {
        self.data_queue.push_back((hook.to_string(), frame));
    }

    /// Sent messages of one command, decoded as init data.
    pub fn sent_init_data(&self, cmd: u32) -> Vec<InitData> {
        self.ops
            .iter()
            .filter_map(|op| match op {
                Op::SendMsg {
                    cmd: c, body, ..
                } if *c == cmd => InitData::decode(body).ok(),
                _ => None,
            })
            .collect()
    }
}

impl Graph for MockGraph {
    fn socket_pair(&mut self) -> Result<(CtrlSock, DataSock)> {
        self.ops.push(Op::SocketPair);
        self.open_pairs += 1;
        let c = self.next_sock;
        self.next_sock += 2;
        Ok((CtrlSock(c), DataSock(c + 1)))
    }

    fn close_socket_pair(&mut self, _csock: CtrlSock, _dsock: DataSock) {
        self.ops.push(Op::CloseSocketPair);
        self.open_pairs -= 1;
    }

    fn send_msg(
        &mut self,
        _csock: CtrlSock,
        path: &str,
        cookie: u32,
        command: u32,
        body: &[u8],
    ) -> Result<()> {
        self.ops.push(Op::SendMsg {
            path: path.to_string(),
            cookie,
            cmd: command,
            body: body.to_vec(),
        });
        if self.fail_cmds.contains(&command) {
            return Err(Error::Netgraph(format!("send of command {} refused", command)));
        }
        Ok(())
    }

    fn recv_msg(&mut self, _csock: CtrlSock) -> Result<ControlMsg> {
        self.ctrl_queue
            .pop_front()
            .ok_or_else(|| Error::Netgraph("no control message queued".into()))
    }

    fn send_data(&mut self, _dsock: DataSock, hook: &str, frame: &[u8]) -> Result<()> {
        self.ops.push(Op::SendData {
            hook: hook.to_string(),
            frame: frame.to_vec(),
        });
        Ok(())
    }

    fn recv_data(&mut self, _dsock: DataSock) -> Result<(String, Vec<u8>)> {
        self.data_queue
            .pop_front()
            .ok_or_else(|| Error::Netgraph("no datagram queued".into()))
    }

    fn mkpeer(
        &mut self,
        _csock: CtrlSock,
        path: &str,
        node_type: &str,
        ourhook: &str,
        peerhook: &str,
    ) -> Result<()> {
        self.ops.push(Op::Mkpeer {
            path: path.to_string(),
            node_type: node_type.to_string(),
            ourhook: ourhook.to_string(),
            peerhook: peerhook.to_string(),
        });
        if self.fail_mkpeer {
            return Err(Error::Netgraph("mkpeer refused".into()));
        }
        Ok(())
    }

    fn connect(
        &mut self,
        _csock: CtrlSock,
        path: &str,
        ourhook: &str,
        peer_path: &str,
        peerhook: &str,
    ) -> Result<()> {
        self.ops.push(Op::Connect {
            path: path.to_string(),
            ourhook: ourhook.to_string(),
            peer_path: peer_path.to_string(),
            peerhook: peerhook.to_string(),
        });
        if self.fail_connect {
            return Err(Error::Netgraph("connect refused".into()));
        }
        Ok(())
    }

    fn disconnect(&mut self, _csock: CtrlSock, path: &str, hook: &str) -> Result<()> {
        self.ops.push(Op::Disconnect {
            path: path.to_string(),
            hook: hook.to_string(),
        });
        Ok(())
    }

    fn shutdown_node(&mut self, _csock: CtrlSock, path: &str) -> Result<()> {
        self.ops.push(Op::ShutdownNode {
            path: path.to_string(),
        });
        Ok(())
    }

    fn list_types(&mut self, _csock: CtrlSock) -> Result<Vec<String>> {
        self.ops.push(Op::ListTypes);
        Ok(self.types.clone())
    }

    fn list_hooks(&mut self, _csock: CtrlSock, path: &str) -> Result<NodeInfo> {
        self.ops.push(Op::ListHooks {
            path: path.to_string(),
        });
        Ok(self
            .hook_lists
            .get(path)
            .cloned()
            .unwrap_or_else(|| NodeInfo {
                node_type: nodes::ETHER.to_string(),
                id: 1,
                hooks: vec![],
            }))
    }

    fn node_id(&mut self, _csock: CtrlSock, path: &str) -> Result<u32> {
        if let Some(id) = self.node_ids.get(path) {
            return Ok(*id);
        }
        let id = self.next_node_id;
        self.next_node_id += 1;
        self.node_ids.insert(path.to_string(), id);
        Ok(id)
    }

    fn iface_up(&mut self, iface: &str) -> Result<()> {
        self.ops.push(Op::IfaceUp(iface.to_string()));
        Ok(())
    }

    fn load_module(&mut self, name: &str) -> Result<()> {
        self.ops.push(Op::LoadModule(name.to_string()));
        if self.fail_load_module {
            return Err(Error::Netgraph("module load refused".into()));
        }
        if name == nodes::ETHER_MODULE && !self.types.iter().any(|t| t == nodes::ETHER) {
            self.types.push(nodes::ETHER.to_string());
        }
        Ok(())
    }
}

/// Build a status-style control message (SUCCESS/FAIL/CLOSE/ACNAME).
pub fn status_msg(command: u32, hook: &str) -> ControlMsg {
    let mut data = vec![0u8; HOOK_NAME_MAX];
    let h = hook.as_bytes();
    let n = h.len().min(HOOK_NAME_MAX - 1);
    data[..n].copy_from_slice(&h[..n]);
    ControlMsg {
        path: String::new(),
        cookie: PPPOE_COOKIE,
        cmd: command,
        data,
    }
}

/// Build a SETMAXP reply.
pub fn maxp_msg(hook: &str, value: u16) -> ControlMsg {
    let mut msg = status_msg(cmd::SETMAXP, hook);
    msg.data.extend_from_slice(&value.to_ne_bytes());
    msg
}

/// Build a PADM (HURL/MOTM) message.
pub fn padm_msg(command: u32, text: &str) -> ControlMsg {
    let mut data = text.as_bytes().to_vec();
    data.push(0);
    ControlMsg {
        path: String::new(),
        cookie: PPPOE_COOKIE,
        cmd: command,
        data,
    }
}
