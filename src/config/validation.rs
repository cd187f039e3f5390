//! Configuration validation

use super::Config;
use crate::driver::link::{AC_NAME_MAX, SESSION_NAME_MAX};
use crate::driver::PPPOE_MRU;
use crate::protocol::ethernet::ETHER_MAX_LEN;
use crate::protocol::MacFormat;

#[derive(Debug, Clone, Default)]
pub struct ValidationResult {
    pub warnings: Vec<String>,
    pub errors: Vec<String>,
}

impl ValidationResult {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn warn(&mut self, msg: impl Into<String>) {
        self.warnings.push(msg.into());
    }

    pub fn error(&mut self, msg: impl Into<String>) {
        self.errors.push(msg.into());
    }

    pub fn has_errors(&self) -> bool {
        !self.errors.is_empty()
    }

    pub fn print_diagnostics(&self) {
        for warning in &self.warnings {
            eprintln!("[WARN] {}", warning);
        }
        for error in &self.errors {
            eprintln!("[ERROR] {}", error);
        }
    }
}

/// Validate configuration and return warnings/errors.
pub fn validate(config: &Config) -> ValidationResult {
    let mut result = ValidationResult::new();
    validate_log(config, &mut result);
    validate_links(config, &mut result);
    result
}

fn validate_log(config: &Config, result: &mut ValidationResult) {
    if let Some(log) = &config.log {
        if let Some(level) = &log.level {
            if !["error", "warn", "info", "debug", "trace"]
                .contains(&level.to_lowercase().as_str())
            {
                result.warn(format!("log: unknown level {:?}, using \"info\"", level));
            }
        }
        if let Some(format) = &log.format {
            if !["pretty", "compact", "json"].contains(&format.as_str()) {
                result.warn(format!("log: unknown format {:?}, using \"pretty\"", format));
            }
        }
    }
}

fn validate_links(config: &Config, result: &mut ValidationResult) {
    for (name, link) in &config.links {
        match &link.iface {
            None => result.error(format!("links.{}: iface is required", name)),
            Some(iface) if iface.is_empty() => {
                result.error(format!("links.{}: iface must not be empty", name))
            }
            Some(_) => {}
        }

        if let Some(service) = &link.service {
            if service.len() > SESSION_NAME_MAX {
                result.error(format!(
                    "links.{}: service longer than {} bytes",
                    name, SESSION_NAME_MAX
                ));
            }
        }

        if let Some(acname) = &link.acname {
            if acname.len() > AC_NAME_MAX {
                result.error(format!(
                    "links.{}: acname longer than {} bytes",
                    name, AC_NAME_MAX
                ));
            }
        }

        if let Some(max_payload) = link.max_payload {
            let ceiling = (ETHER_MAX_LEN - 8) as u16;
            if max_payload < PPPOE_MRU || max_payload > ceiling {
                result.error(format!(
                    "links.{}: max_payload {} outside [{}, {}]",
                    name, max_payload, PPPOE_MRU, ceiling
                ));
            }
        }

        if let Some(mac_format) = &link.mac_format {
            if mac_format.parse::<MacFormat>().is_err() {
                result.error(format!(
                    "links.{}: incorrect mac_format {:?}",
                    name, mac_format
                ));
            }
        }

        if link.template && !link.incoming {
            result.warn(format!(
                "links.{}: template link without incoming never instantiates",
                name
            ));
        }
    }
}
