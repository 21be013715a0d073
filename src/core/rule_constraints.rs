//! Render-time constraints for firewall rules
//!
//! The validator accepts combinations such as ports on an ICMP rule. These
//! functions decide which stored attributes actually make it into a compiled
//! statement. Keeping them apart from [`crate::validators`] lets the store
//! stay tolerant while the renderer stays strict.
//!
//! # Examples
//!
//! ```
//! use netfence::core::firewall::Protocol;
//! use netfence::core::rule_constraints::*;
//!
//! assert!(protocol_supports_ports(Protocol::Tcp));
//! assert!(!protocol_supports_ports(Protocol::Icmp));
//! assert_eq!(prefix_family("2001:db8::/32"), "ip6");
//! ```

use super::firewall::{Protocol, Rule};
use ipnetwork::IpNetwork;

/// Returns `true` if the protocol supports port filtering.
///
/// Only TCP and UDP carry ports. `all` and ICMP do not.
#[inline]
pub fn protocol_supports_ports(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Tcp | Protocol::Udp)
}

/// Returns `true` if the protocol is ICMP.
#[inline]
pub fn protocol_is_icmp(protocol: Protocol) -> bool {
    matches!(protocol, Protocol::Icmp)
}

/// Returns `true` if a port-match clause is rendered for this rule.
pub fn renders_port_clause(rule: &Rule) -> bool {
    !rule.ports.is_empty() && protocol_supports_ports(rule.protocol)
}

/// Returns `true` if an ICMP-type clause is rendered for this rule.
pub fn renders_icmp_clause(rule: &Rule) -> bool {
    !rule.icmp_types.is_empty() && protocol_is_icmp(rule.protocol)
}

/// Address family keyword for a stored prefix: `ip` or `ip6`.
///
/// Text that does not parse as a prefix falls back to `ip`; the renderer
/// never fails on stored data.
pub fn prefix_family(prefix: &str) -> &'static str {
    match prefix.parse::<IpNetwork>() {
        Ok(IpNetwork::V6(_)) => "ip6",
        _ => "ip",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::rule;

    #[test]
    fn test_protocol_supports_ports() {
        assert!(protocol_supports_ports(Protocol::Tcp));
        assert!(protocol_supports_ports(Protocol::Udp));
        assert!(!protocol_supports_ports(Protocol::All));
        assert!(!protocol_supports_ports(Protocol::Icmp));
    }

    #[test]
    fn test_protocol_is_icmp() {
        assert!(protocol_is_icmp(Protocol::Icmp));
        assert!(!protocol_is_icmp(Protocol::Tcp));
        assert!(!protocol_is_icmp(Protocol::All));
    }

    #[test]
    fn test_port_clause_needs_ports_and_transport_protocol() {
        let mut r = rule(Protocol::Tcp);
        assert!(!renders_port_clause(&r));
        r.ports = vec![443];
        assert!(renders_port_clause(&r));
        r.protocol = Protocol::Icmp;
        assert!(!renders_port_clause(&r));
        r.protocol = Protocol::All;
        assert!(!renders_port_clause(&r));
    }

    #[test]
    fn test_icmp_clause_needs_types_and_icmp() {
        let mut r = rule(Protocol::Icmp);
        assert!(!renders_icmp_clause(&r));
        r.icmp_types = vec![8];
        assert!(renders_icmp_clause(&r));
        r.protocol = Protocol::Udp;
        assert!(!renders_icmp_clause(&r));
    }

    #[test]
    fn test_prefix_family() {
        assert_eq!(prefix_family("10.0.0.0/8"), "ip");
        assert_eq!(prefix_family("fd00::/8"), "ip6");
        assert_eq!(prefix_family("garbage"), "ip");
    }
}
