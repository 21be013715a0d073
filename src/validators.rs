//! Input validation for rules and default policies
//!
//! Validation is a pure check over a draft's fields: no I/O, no store access.
//! The first violated constraint wins, in this order:
//!
//! 1. chain, 2. protocol, 3. action, 4. ports, 5. source prefixes,
//! 6. destination prefixes, 7. ICMP types, 8. interfaces.
//!
//! Combinations that make no sense together (ports on an ICMP rule, ICMP
//! types on a TCP rule) are accepted here. The renderer drops them, see
//! [`crate::core::rule_constraints`].

use crate::core::error::{Error, Result};
use crate::core::firewall::{
    Action, Chain, Defaults, DefaultsDraft, Protocol, Rule, RuleDraft, UNASSIGNED_ID,
};
use ipnetwork::IpNetwork;
use std::str::FromStr;

/// Maximum length of a default-policy log prefix
pub const MAX_LOG_PREFIX_LEN: usize = 64;

/// Validates a draft and produces the typed rule it describes.
///
/// The returned rule carries [`UNASSIGNED_ID`]; the store assigns the real
/// identifier on creation.
///
/// # Errors
///
/// Returns [`Error::Validation`] naming the first offending field.
///
/// # Examples
///
/// ```
/// use netfence::core::firewall::RuleDraft;
/// use netfence::validators::validate_rule;
///
/// let draft = RuleDraft { chain: "lan".to_string(), ..RuleDraft::default() };
/// let err = validate_rule(&draft).unwrap_err();
/// assert_eq!(err.field(), Some("chain"));
/// ```
pub fn validate_rule(draft: &RuleDraft) -> Result<Rule> {
    let chain = Chain::from_str(&draft.chain)
        .map_err(|_| Error::invalid("chain", format!("unknown chain '{}'", draft.chain)))?;
    let protocol = Protocol::from_str(&draft.protocol).map_err(|_| {
        Error::invalid(
            "protocol",
            format!("unknown protocol '{}'", draft.protocol),
        )
    })?;
    let action = Action::from_str(&draft.action)
        .map_err(|_| Error::invalid("action", format!("unknown action '{}'", draft.action)))?;

    let ports = draft
        .ports
        .iter()
        .map(|&p| validate_port(p))
        .collect::<Result<Vec<_>>>()?;
    for prefix in &draft.sources {
        validate_prefix("sources", prefix)?;
    }
    for prefix in &draft.destinations {
        validate_prefix("destinations", prefix)?;
    }
    let icmp_types = draft
        .icmp_types
        .iter()
        .map(|&t| validate_icmp_type(t))
        .collect::<Result<Vec<_>>>()?;

    let in_iface = draft
        .in_iface
        .as_deref()
        .map(|name| validate_interface("in_iface", name))
        .transpose()?;
    let out_iface = draft
        .out_iface
        .as_deref()
        .map(|name| validate_interface("out_iface", name))
        .transpose()?;

    Ok(Rule {
        id: UNASSIGNED_ID,
        chain,
        protocol,
        action,
        in_iface,
        out_iface,
        ports,
        sources: draft.sources.clone(),
        destinations: draft.destinations.clone(),
        icmp_types,
        comment: draft.comment.clone(),
        enabled: draft.enabled,
    })
}

/// Validates default policies.
///
/// Policy names are matched case-insensitively and stored lowercase.
///
/// # Errors
///
/// Returns [`Error::Validation`] for the first policy that is neither
/// `accept` nor `drop`, or for an unusable log prefix.
pub fn validate_defaults(draft: &DefaultsDraft) -> Result<Defaults> {
    Ok(Defaults {
        input_policy: validate_policy("input_policy", &draft.input_policy)?,
        forward_policy: validate_policy("forward_policy", &draft.forward_policy)?,
        output_policy: validate_policy("output_policy", &draft.output_policy)?,
        log_prefix: validate_log_prefix(&draft.log_prefix)?,
    })
}

fn validate_policy(field: &'static str, value: &str) -> Result<Action> {
    Action::from_str(&value.to_ascii_lowercase())
        .map_err(|_| Error::invalid(field, format!("policy must be accept or drop, got '{value}'")))
}

/// Validates a single port number.
///
/// # Errors
///
/// Returns `Err` unless the port is within 1..=65535.
pub fn validate_port(port: i64) -> Result<u16> {
    match u16::try_from(port) {
        Ok(p) if p != 0 => Ok(p),
        _ => Err(Error::invalid(
            "ports",
            format!("port {port} is outside 1-65535"),
        )),
    }
}

/// Validates an ICMP type number.
///
/// # Errors
///
/// Returns `Err` unless the type is within 0..=255.
pub fn validate_icmp_type(icmp_type: i64) -> Result<u8> {
    u8::try_from(icmp_type).map_err(|_| {
        Error::invalid(
            "icmp_types",
            format!("ICMP type {icmp_type} is outside 0-255"),
        )
    })
}

/// Validates an address prefix such as `192.168.0.0/16` or `2001:db8::/32`.
///
/// The prefix length is mandatory; a bare address is rejected.
///
/// # Errors
///
/// Returns `Err` naming `field` if the text is not a network with prefix length.
pub fn validate_prefix(field: &'static str, prefix: &str) -> Result<IpNetwork> {
    if !prefix.contains('/') {
        return Err(Error::invalid(
            field,
            format!("'{prefix}' has no prefix length"),
        ));
    }
    prefix
        .parse::<IpNetwork>()
        .map_err(|e| Error::invalid(field, format!("'{prefix}' is not a valid prefix: {e}")))
}

/// Validates a network interface name.
///
/// The name must be non-empty once surrounding whitespace is trimmed, and
/// then follow the Linux kernel interface name rules:
/// - Max 15 characters (IFNAMSIZ - 1)
/// - Alphanumeric, dot, dash, underscore only
/// - Cannot be "." or ".."
///
/// # Errors
///
/// Returns `Err` naming `field` if the interface name violates these constraints.
pub fn validate_interface(field: &'static str, name: &str) -> Result<String> {
    if name.trim().is_empty() {
        return Err(Error::invalid(field, "interface name is empty"));
    }

    if name.len() > 15 {
        return Err(Error::invalid(
            field,
            "interface name too long (max 15 characters)",
        ));
    }

    if name == "." || name == ".." {
        return Err(Error::invalid(field, "invalid interface name"));
    }

    // Check for valid characters (ASCII alphanumeric only, plus dot, dash, underscore)
    if !name
        .chars()
        .all(|c| c.is_ascii_alphanumeric() || matches!(c, '.' | '-' | '_'))
    {
        return Err(Error::invalid(
            field,
            "interface name contains invalid characters",
        ));
    }

    Ok(name.to_string())
}

/// Validates a log prefix. An empty prefix is allowed.
///
/// # Errors
///
/// Returns `Err` if the prefix is too long or contains quotes or control characters.
pub fn validate_log_prefix(prefix: &str) -> Result<String> {
    if prefix.len() > MAX_LOG_PREFIX_LEN {
        return Err(Error::invalid(
            "log_prefix",
            format!("log prefix too long (max {MAX_LOG_PREFIX_LEN} characters)"),
        ));
    }
    if prefix.chars().any(|c| c.is_control() || c == '"') {
        return Err(Error::invalid(
            "log_prefix",
            "log prefix contains quotes or control characters",
        ));
    }
    Ok(prefix.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::test_helpers::draft;

    #[test]
    fn test_rejects_unknown_chain() {
        let mut d = draft();
        d.chain = "lan".to_string();
        let err = validate_rule(&d).unwrap_err();
        assert_eq!(err.field(), Some("chain"));
    }

    #[test]
    fn test_accepts_forward_chain() {
        let mut d = draft();
        d.chain = "forward".to_string();
        let rule = validate_rule(&d).unwrap();
        assert_eq!(rule.chain, Chain::Forward);
        assert_eq!(rule.id, UNASSIGNED_ID);
    }

    #[test]
    fn test_chain_checked_before_everything_else() {
        let d = RuleDraft {
            chain: "lan".to_string(),
            protocol: "sctp".to_string(),
            action: "reject".to_string(),
            ports: vec![0],
            sources: vec!["nope".to_string()],
            in_iface: Some("  ".to_string()),
            ..RuleDraft::default()
        };
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("chain"));
    }

    #[test]
    fn test_priority_order_of_checks() {
        let mut d = draft();
        d.protocol = "sctp".to_string();
        d.action = "reject".to_string();
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("protocol"));

        let mut d = draft();
        d.action = "reject".to_string();
        d.ports = vec![70000];
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("action"));

        let mut d = draft();
        d.ports = vec![0];
        d.sources = vec!["bogus".to_string()];
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("ports"));

        let mut d = draft();
        d.sources = vec!["bogus".to_string()];
        d.destinations = vec!["bogus".to_string()];
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("sources"));

        let mut d = draft();
        d.destinations = vec!["10.0.0.1".to_string()];
        d.icmp_types = vec![256];
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("destinations"));

        let mut d = draft();
        d.icmp_types = vec![-1];
        d.in_iface = Some(String::new());
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("icmp_types"));

        let mut d = draft();
        d.in_iface = Some(" ".to_string());
        d.out_iface = Some(" ".to_string());
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("in_iface"));

        let mut d = draft();
        d.out_iface = Some("\t".to_string());
        assert_eq!(validate_rule(&d).unwrap_err().field(), Some("out_iface"));
    }

    #[test]
    fn test_cross_field_combinations_are_accepted() {
        let mut d = draft();
        d.protocol = "icmp".to_string();
        d.ports = vec![22, 80];
        let rule = validate_rule(&d).unwrap();
        assert_eq!(rule.ports, vec![22, 80]);

        let mut d = draft();
        d.protocol = "tcp".to_string();
        d.icmp_types = vec![8];
        assert_eq!(validate_rule(&d).unwrap().icmp_types, vec![8]);
    }

    #[test]
    fn test_port_bounds() {
        assert!(validate_port(0).is_err());
        assert_eq!(validate_port(1).unwrap(), 1);
        assert_eq!(validate_port(65535).unwrap(), 65535);
        assert!(validate_port(65536).is_err());
        assert!(validate_port(-22).is_err());
    }

    #[test]
    fn test_icmp_type_bounds() {
        assert_eq!(validate_icmp_type(0).unwrap(), 0);
        assert_eq!(validate_icmp_type(255).unwrap(), 255);
        assert!(validate_icmp_type(256).is_err());
        assert!(validate_icmp_type(-1).is_err());
    }

    #[test]
    fn test_prefix_requires_length() {
        assert!(validate_prefix("sources", "192.168.1.0/24").is_ok());
        assert!(validate_prefix("sources", "2001:db8::/32").is_ok());
        assert!(validate_prefix("sources", "0.0.0.0/0").is_ok());
        assert!(validate_prefix("sources", "192.168.1.1").is_err());
        assert!(validate_prefix("sources", "192.168.1.0/33").is_err());
        assert!(validate_prefix("sources", "not-an-ip/8").is_err());
    }

    #[test]
    fn test_validate_interface_valid() {
        assert_eq!(validate_interface("in_iface", "eth0").unwrap(), "eth0");
        assert_eq!(validate_interface("in_iface", "wlan0").unwrap(), "wlan0");
        assert_eq!(validate_interface("in_iface", "br-lan").unwrap(), "br-lan");
        assert_eq!(validate_interface("in_iface", "veth_1.2").unwrap(), "veth_1.2");
    }

    #[test]
    fn test_validate_interface_invalid() {
        assert!(validate_interface("in_iface", "").is_err());
        assert!(validate_interface("in_iface", "   ").is_err());
        assert!(validate_interface("in_iface", "verylonginterfacename").is_err());
        assert!(validate_interface("in_iface", "..").is_err());
        assert!(validate_interface("in_iface", "eth\"0").is_err());
        assert!(validate_interface("in_iface", "eth 0").is_err());
    }

    #[test]
    fn test_validate_defaults_policies() {
        let draft = DefaultsDraft {
            input_policy: "DROP".to_string(),
            forward_policy: "drop".to_string(),
            output_policy: "Accept".to_string(),
            log_prefix: String::new(),
        };
        let defaults = validate_defaults(&draft).unwrap();
        assert_eq!(defaults.input_policy, Action::Drop);
        assert_eq!(defaults.output_policy, Action::Accept);

        let mut bad = draft.clone();
        bad.forward_policy = "reject".to_string();
        assert_eq!(
            validate_defaults(&bad).unwrap_err().field(),
            Some("forward_policy")
        );

        let mut bad = draft;
        bad.output_policy = String::new();
        assert_eq!(
            validate_defaults(&bad).unwrap_err().field(),
            Some("output_policy")
        );
    }

    #[test]
    fn test_validate_log_prefix() {
        assert_eq!(validate_log_prefix("").unwrap(), "");
        assert_eq!(validate_log_prefix("[netfence] ").unwrap(), "[netfence] ");
        assert!(validate_log_prefix(&"a".repeat(65)).is_err());
        assert!(validate_log_prefix("bad\"quote").is_err());
        assert!(validate_log_prefix("line\nbreak").is_err());
    }
}
