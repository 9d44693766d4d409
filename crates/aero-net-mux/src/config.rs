//! Redirect configuration consumed by NAT sessions at open time.
//!
//! The textual rule form is `proto:[host_port]:guest_port[:guest_addr]`, e.g. `tcp:2222:22`,
//! `udp::53` or `tcp:8080:80:10.0.2.20`. An empty (or zero) host port requests a self-redirect
//! where the guest port is also exposed on the host.

use core::net::Ipv4Addr;
use core::str::FromStr;
use std::env;

use serde::{Deserialize, Serialize};

use crate::error::ConfigError;
use crate::redirect::Transport;

/// Capacity of the redirect table.
pub const MAX_REDIRECTS: usize = 32;

/// Environment variable read by [`NetConfig::from_env`].
pub const REDIRECTS_ENV: &str = "AERO_NET_REDIRECTS";

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum RedirectProtocol {
    /// Empty table slot.
    #[default]
    None,
    Tcp,
    Udp,
}

impl RedirectProtocol {
    pub fn transport(self) -> Option<Transport> {
        match self {
            Self::None => None,
            Self::Tcp => Some(Transport::Tcp),
            Self::Udp => Some(Transport::Udp),
        }
    }
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
struct RedirectRuleFields {
    protocol: RedirectProtocol,
    #[serde(default)]
    host_port: u16,
    guest_port: u16,
    #[serde(default)]
    guest_addr: Option<Ipv4Addr>,
}

/// One configured host → guest forwarding rule.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "RedirectRuleRepr", into = "RedirectRuleFields")]
pub struct RedirectRule {
    pub protocol: RedirectProtocol,
    /// Host-visible port; `0` means "same as `guest_port`".
    pub host_port: u16,
    pub guest_port: u16,
    /// Guest address to forward to; `None` uses the NAT engine's virtual guest address.
    pub guest_addr: Option<Ipv4Addr>,
}

impl RedirectRule {
    pub fn tcp(host_port: u16, guest_port: u16) -> Self {
        Self {
            protocol: RedirectProtocol::Tcp,
            host_port,
            guest_port,
            guest_addr: None,
        }
    }

    pub fn udp(host_port: u16, guest_port: u16) -> Self {
        Self {
            protocol: RedirectProtocol::Udp,
            host_port,
            guest_port,
            guest_addr: None,
        }
    }

    pub fn with_guest_addr(mut self, addr: Ipv4Addr) -> Self {
        self.guest_addr = Some(addr);
        self
    }

    pub fn is_empty(&self) -> bool {
        self.protocol == RedirectProtocol::None
    }

    /// Host port the rule will occupy once registered.
    pub fn effective_host_port(&self) -> u16 {
        if self.host_port == 0 {
            self.guest_port
        } else {
            self.host_port
        }
    }
}

impl From<RedirectRule> for RedirectRuleFields {
    fn from(rule: RedirectRule) -> Self {
        Self {
            protocol: rule.protocol,
            host_port: rule.host_port,
            guest_port: rule.guest_port,
            guest_addr: rule.guest_addr,
        }
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RedirectRuleRepr {
    Text(String),
    Fields(RedirectRuleFields),
}

impl TryFrom<RedirectRuleRepr> for RedirectRule {
    type Error = ConfigError;

    fn try_from(repr: RedirectRuleRepr) -> Result<Self, Self::Error> {
        match repr {
            RedirectRuleRepr::Text(text) => text.parse(),
            RedirectRuleRepr::Fields(f) => {
                let rule = RedirectRule {
                    protocol: f.protocol,
                    host_port: f.host_port,
                    guest_port: f.guest_port,
                    guest_addr: f.guest_addr,
                };
                validate(&rule, || format!("{f:?}"))?;
                Ok(rule)
            }
        }
    }
}

fn validate(rule: &RedirectRule, describe: impl FnOnce() -> String) -> Result<(), ConfigError> {
    if !rule.is_empty() && rule.guest_port == 0 {
        return Err(ConfigError::InvalidRedirect {
            rule: describe(),
            reason: "guest port must be non-zero",
        });
    }
    Ok(())
}

impl FromStr for RedirectRule {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = |reason| ConfigError::InvalidRedirect {
            rule: s.to_string(),
            reason,
        };

        let mut parts = s.trim().split(':');
        let protocol = match parts.next().map(|p| p.trim().to_ascii_lowercase()) {
            Some(p) if p == "tcp" => RedirectProtocol::Tcp,
            Some(p) if p == "udp" => RedirectProtocol::Udp,
            _ => return Err(invalid("protocol must be `tcp` or `udp`")),
        };
        let host_port = match parts.next().map(str::trim) {
            Some("") => 0,
            Some(p) => p.parse().map_err(|_| invalid("host port is not a valid port"))?,
            None => return Err(invalid("missing guest port")),
        };
        let guest_port = parts
            .next()
            .map(str::trim)
            .ok_or_else(|| invalid("missing guest port"))?
            .parse()
            .map_err(|_| invalid("guest port is not a valid port"))?;
        let guest_addr = match parts.next().map(str::trim) {
            None | Some("") => None,
            Some(a) => Some(a.parse().map_err(|_| invalid("guest address is not IPv4"))?),
        };
        if parts.next().is_some() {
            return Err(invalid("trailing fields"));
        }

        let rule = RedirectRule {
            protocol,
            host_port,
            guest_port,
            guest_addr,
        };
        validate(&rule, || s.to_string())?;
        Ok(rule)
    }
}

/// Ordered, fixed-capacity redirect table.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "Vec<RedirectRule>", into = "Vec<RedirectRule>")]
pub struct RedirectTable {
    rules: Vec<RedirectRule>,
}

impl RedirectTable {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn try_push(&mut self, rule: RedirectRule) -> Result<(), ConfigError> {
        if self.rules.len() >= MAX_REDIRECTS {
            return Err(ConfigError::TooManyRedirects {
                got: self.rules.len() + 1,
                max: MAX_REDIRECTS,
            });
        }
        self.rules.push(rule);
        Ok(())
    }

    pub fn rules(&self) -> &[RedirectRule] {
        &self.rules
    }

    pub fn len(&self) -> usize {
        self.rules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rules.is_empty()
    }

    /// Parses a comma-separated list of textual rules. Blank entries are skipped.
    pub fn parse_list(list: &str) -> Result<Self, ConfigError> {
        let mut table = Self::new();
        for item in list.split(',').map(str::trim).filter(|s| !s.is_empty()) {
            table.try_push(item.parse()?)?;
        }
        Ok(table)
    }
}

impl TryFrom<Vec<RedirectRule>> for RedirectTable {
    type Error = ConfigError;

    fn try_from(rules: Vec<RedirectRule>) -> Result<Self, Self::Error> {
        if rules.len() > MAX_REDIRECTS {
            return Err(ConfigError::TooManyRedirects {
                got: rules.len(),
                max: MAX_REDIRECTS,
            });
        }
        Ok(Self { rules })
    }
}

impl From<RedirectTable> for Vec<RedirectRule> {
    fn from(table: RedirectTable) -> Self {
        table.rules
    }
}

/// Network configuration read by [`crate::EthernetMux`] whenever a NAT session is opened.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct NetConfig {
    pub redirects: RedirectTable,
}

impl NetConfig {
    pub fn from_json_str(json: &str) -> Result<Self, ConfigError> {
        Ok(serde_json::from_str(json)?)
    }

    /// Builds a config from [`REDIRECTS_ENV`]. An unset variable yields an empty table.
    pub fn from_env() -> Result<Self, ConfigError> {
        match env::var(REDIRECTS_ENV) {
            Ok(list) => Ok(Self {
                redirects: RedirectTable::parse_list(&list)?,
            }),
            Err(env::VarError::NotPresent) => Ok(Self::default()),
            Err(env::VarError::NotUnicode(_)) => Err(ConfigError::Env { var: REDIRECTS_ENV }),
        }
    }
}
