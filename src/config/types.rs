//! Configuration types

use crate::driver::{derive_node_path, LinkConfig, PPPOE_MRU, PPPOE_MTU};
use crate::netgraph::hooks;
use crate::protocol::MacFormat;
use crate::Result;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// User-defined configuration (config.toml)
#[derive(Debug, Clone, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub log: Option<LogSection>,
    #[serde(default)]
    pub links: HashMap<String, LinkSection>,
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct LogSection {
    pub level: Option<String>,
    pub format: Option<String>,
}

/// One `[links.<name>]` block.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct LinkSection {
    /// Parent Ethernet interface.
    pub iface: Option<String>,
    /// Ethernet-node hook to attach on; defaults to "orphans".
    pub hook: Option<String>,
    /// Service name; "*" matches any.
    pub service: Option<String>,
    /// AC name advertised in server offers.
    pub acname: Option<String>,
    /// PPP-Max-Payload request value.
    pub max_payload: Option<u16>,
    /// unformatted, unix-like, cisco-like, ietf
    pub mac_format: Option<String>,
    #[serde(default)]
    pub incoming: bool,
    #[serde(default)]
    pub template: bool,
    pub mtu: Option<u16>,
    pub mru: Option<u16>,
}

// ============================================================================
// Lock file types (generated, includes all defaults)
// ============================================================================

/// Generated lock file with all defaults filled in.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConfigLock {
    pub source_hash: String,
    pub log: LogLock,
    pub links: HashMap<String, LinkLock>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogLock {
    pub level: String,
    pub format: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LinkLock {
    pub iface: String,
    pub hook: String,
    /// Netgraph node path derived from the interface name.
    pub node_path: String,
    pub service: String,
    pub acname: String,
    pub max_payload: u16,
    pub mac_format: String,
    pub incoming: bool,
    pub template: bool,
    pub mtu: u16,
    pub mru: u16,
}

impl ConfigLock {
    pub fn from_config(config: &Config, source_hash: String) -> Self {
        let log = config.log.clone().unwrap_or_default();
        let links = config
            .links
            .iter()
            .map(|(name, link)| {
                let iface = link.iface.clone().unwrap_or_default();
                (
                    name.clone(),
                    LinkLock {
                        node_path: derive_node_path(&iface),
                        iface,
                        hook: link.hook.clone().unwrap_or_else(|| hooks::ORPHAN.into()),
                        service: link.service.clone().unwrap_or_else(|| "*".into()),
                        acname: link.acname.clone().unwrap_or_default(),
                        max_payload: link.max_payload.unwrap_or(0),
                        mac_format: link
                            .mac_format
                            .clone()
                            .unwrap_or_else(|| MacFormat::default().as_str().into()),
                        incoming: link.incoming,
                        template: link.template,
                        mtu: link.mtu.unwrap_or(PPPOE_MTU),
                        mru: link.mru.unwrap_or(PPPOE_MRU),
                    },
                )
            })
            .collect();
        Self {
            source_hash,
            log: LogLock {
                level: log.level.unwrap_or_else(|| "info".into()),
                format: log.format.unwrap_or_else(|| "pretty".into()),
            },
            links,
        }
    }
}

impl LinkLock {
    /// Effective driver configuration for this link.
    pub fn to_link_config(&self) -> Result<LinkConfig> {
        Ok(LinkConfig {
            iface: self.iface.clone(),
            path: self.node_path.clone(),
            hook: self.hook.clone(),
            service: self.service.clone(),
            acname: self.acname.clone(),
            max_payload: self.max_payload,
            mac_format: self.mac_format.parse()?,
            incoming: self.incoming,
            mtu: self.mtu,
            mru: self.mru,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_str: &str) -> Config {
        toml::from_str(toml_str).unwrap()
    }

    #[test]
    fn test_lock_fills_defaults() {
        let config = parse(
            r#"
            [links.pppoe0]
            iface = "eth0"
            incoming = true
            "#,
        );
        let lock = ConfigLock::from_config(&config, "hash".into());
        let link = &lock.links["pppoe0"];
        assert_eq!(link.hook, "orphans");
        assert_eq!(link.service, "*");
        assert_eq!(link.node_path, "eth0:");
        assert_eq!(link.max_payload, 0);
        assert_eq!(link.mac_format, "unformatted");
        assert_eq!(link.mtu, PPPOE_MTU);
        assert!(link.incoming);
        assert!(!link.template);
    }

    #[test]
    fn test_lock_derives_node_path() {
        let config = parse(
            r#"
            [links.uplink]
            iface = "vlan0.35"
            "#,
        );
        let lock = ConfigLock::from_config(&config, String::new());
        assert_eq!(lock.links["uplink"].node_path, "vlan0_35:");
    }

    #[test]
    fn test_to_link_config() {
        let config = parse(
            r#"
            [links.pppoe0]
            iface = "eth0"
            service = "isp"
            max_payload = 1500
            mac_format = "ietf"
            "#,
        );
        let lock = ConfigLock::from_config(&config, String::new());
        let conf = lock.links["pppoe0"].to_link_config().unwrap();
        assert_eq!(conf.service, "isp");
        assert_eq!(conf.max_payload, 1500);
        assert_eq!(conf.mac_format, MacFormat::Ietf);
        assert_eq!(conf.path, "eth0:");
    }

    #[test]
    fn test_to_link_config_rejects_bad_mac_format() {
        let config = parse(
            r#"
            [links.pppoe0]
            iface = "eth0"
            mac_format = "colonless"
            "#,
        );
        let lock = ConfigLock::from_config(&config, String::new());
        assert!(lock.links["pppoe0"].to_link_config().is_err());
    }

    #[test]
    fn test_lock_roundtrips_through_toml() {
        let config = parse(
            r#"
            [links.pppoe0]
            iface = "eth0"
            service = "isp"
            "#,
        );
        let lock = ConfigLock::from_config(&config, "h".into());
        let text = toml::to_string_pretty(&lock).unwrap();
        let reparsed: ConfigLock = toml::from_str(&text).unwrap();
        assert_eq!(reparsed.links["pppoe0"].service, "isp");
        assert_eq!(reparsed.source_hash, "h");
    }
}
