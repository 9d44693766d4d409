//! Translation of configured redirect rules into NAT engine registrations.

use core::net::Ipv4Addr;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::config::RedirectRule;
use crate::descriptor::BackendKind;
use crate::engine::NatEngine;

/// Ports forwarded to the guest by default when the inbound NAT variant is selected.
pub const WELL_KNOWN_INBOUND_PORTS: [u16; 4] = [21, 22, 23, 80];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Transport {
    Tcp,
    Udp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RedirectOrigin {
    /// Came from the configured redirect table.
    Configured,
    /// Implicit default for one of [`WELL_KNOWN_INBOUND_PORTS`].
    WellKnown,
}

/// A concrete registration against the NAT engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub struct Redirect {
    pub transport: Transport,
    pub host_port: u16,
    pub guest_addr: Ipv4Addr,
    pub guest_port: u16,
    pub origin: RedirectOrigin,
}

/// Computes, in registration order, the redirects a NAT session of `kind` installs.
///
/// Configured rules come first and always win: a well-known port that any configured rule
/// mentions (as its effective host port or its guest port) gets no implicit default.
pub fn plan_redirects(
    rules: &[RedirectRule],
    kind: BackendKind,
    guest_addr: Ipv4Addr,
) -> Vec<Redirect> {
    let mut plan = Vec::new();

    for rule in rules {
        let Some(transport) = rule.protocol.transport() else {
            continue;
        };
        // Self-redirects keep the rule's protocol, so `udp::53` exposes UDP 53.
        let redirect = if rule.host_port == 0 {
            Redirect {
                transport,
                host_port: rule.guest_port,
                guest_addr,
                guest_port: rule.guest_port,
                origin: RedirectOrigin::Configured,
            }
        } else {
            Redirect {
                transport,
                host_port: rule.host_port,
                guest_addr: rule.guest_addr.unwrap_or(guest_addr),
                guest_port: rule.guest_port,
                origin: RedirectOrigin::Configured,
            }
        };
        plan.push(redirect);
    }

    if kind.opens_well_known_ports() {
        for port in WELL_KNOWN_INBOUND_PORTS {
            let claimed = rules.iter().any(|rule| {
                !rule.is_empty() && (rule.effective_host_port() == port || rule.guest_port == port)
            });
            if claimed {
                continue;
            }
            plan.push(Redirect {
                transport: Transport::Tcp,
                host_port: port,
                guest_addr,
                guest_port: port,
                origin: RedirectOrigin::WellKnown,
            });
        }
    }

    plan
}

/// Registers `plan` with `engine`, returning the redirects the engine accepted.
///
/// A rejected redirect (typically a host port already in use) does not fail the session.
pub(crate) fn register_redirects(engine: &mut dyn NatEngine, plan: &[Redirect]) -> Vec<Redirect> {
    let mut registered = Vec::with_capacity(plan.len());
    for redirect in plan {
        match engine.redirect(
            redirect.transport,
            redirect.host_port,
            redirect.guest_addr,
            redirect.guest_port,
        ) {
            Ok(()) => {
                debug!(
                    transport = ?redirect.transport,
                    host_port = redirect.host_port,
                    guest = %redirect.guest_addr,
                    guest_port = redirect.guest_port,
                    origin = ?redirect.origin,
                    "registered redirect"
                );
                registered.push(*redirect);
            }
            Err(err) => {
                warn!(
                    host_port = redirect.host_port,
                    guest_port = redirect.guest_port,
                    "redirect not registered: {err}"
                );
            }
        }
    }
    registered
}

#[cfg(test)]
mod tests {
    use super::*;

    const GUEST: Ipv4Addr = Ipv4Addr::new(10, 0, 2, 15);

    fn host_ports(plan: &[Redirect]) -> Vec<u16> {
        plan.iter().map(|r| r.host_port).collect()
    }

    #[test]
    fn outbound_nat_has_no_implicit_redirects() {
        assert!(plan_redirects(&[], BackendKind::NatOutbound, GUEST).is_empty());
    }

    #[test]
    fn inbound_nat_opens_well_known_ports() {
        let plan = plan_redirects(&[], BackendKind::NatInboundAndOutbound, GUEST);
        assert_eq!(host_ports(&plan), vec![21, 22, 23, 80]);
        for r in &plan {
            assert_eq!(r.transport, Transport::Tcp);
            assert_eq!(r.guest_port, r.host_port);
            assert_eq!(r.guest_addr, GUEST);
            assert_eq!(r.origin, RedirectOrigin::WellKnown);
        }
    }

    #[test]
    fn configured_rule_suppresses_matching_default() {
        let rules = [RedirectRule::tcp(0, 80)];
        let plan = plan_redirects(&rules, BackendKind::NatInboundAndOutbound, GUEST);
        assert_eq!(host_ports(&plan), vec![80, 21, 22, 23]);
        assert_eq!(plan.iter().filter(|r| r.host_port == 80).count(), 1);
        assert_eq!(plan[0].origin, RedirectOrigin::Configured);
    }

    #[test]
    fn rule_mentioning_port_as_guest_port_also_claims_it() {
        let rules = [RedirectRule::tcp(2222, 22)];
        let plan = plan_redirects(&rules, BackendKind::NatInboundAndOutbound, GUEST);
        assert_eq!(host_ports(&plan), vec![2222, 21, 23, 80]);
    }

    #[test]
    fn self_redirect_targets_virtual_guest_address() {
        let rules = [RedirectRule::tcp(0, 2222).with_guest_addr(Ipv4Addr::new(10, 0, 2, 99))];
        let plan = plan_redirects(&rules, BackendKind::NatOutbound, GUEST);
        assert_eq!(
            plan,
            vec![Redirect {
                transport: Transport::Tcp,
                host_port: 2222,
                guest_addr: GUEST,
                guest_port: 2222,
                origin: RedirectOrigin::Configured,
            }]
        );
    }

    #[test]
    fn udp_self_redirect_stays_udp() {
        let rules: Vec<RedirectRule> = vec!["udp::53".parse().unwrap()];
        let plan = plan_redirects(&rules, BackendKind::NatInboundAndOutbound, GUEST);
        assert_eq!(plan[0].transport, Transport::Udp);
        assert_eq!((plan[0].host_port, plan[0].guest_port), (53, 53));
        assert_eq!(host_ports(&plan[1..]), vec![21, 22, 23, 80]);
    }

    #[test]
    fn explicit_rule_keeps_protocol_and_address() {
        let other = Ipv4Addr::new(10, 0, 2, 20);
        let rules = [
            RedirectRule::udp(5353, 53).with_guest_addr(other),
            RedirectRule::tcp(8080, 8000),
        ];
        let plan = plan_redirects(&rules, BackendKind::NatOutbound, GUEST);
        assert_eq!(plan[0].transport, Transport::Udp);
        assert_eq!((plan[0].host_port, plan[0].guest_addr, plan[0].guest_port), (5353, other, 53));
        assert_eq!(plan[1].guest_addr, GUEST);
    }

    #[test]
    fn empty_slots_are_skipped_and_do_not_claim_ports() {
        let rules = [RedirectRule {
            guest_port: 80,
            ..RedirectRule::default()
        }];
        let plan = plan_redirects(&rules, BackendKind::NatInboundAndOutbound, GUEST);
        assert_eq!(host_ports(&plan), vec![21, 22, 23, 80]);
    }
}
