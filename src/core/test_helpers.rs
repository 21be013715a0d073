//! Shared test utilities for core module tests
//!
//! Provides common fixtures to avoid duplication across test suites.
//! This module is only compiled in test mode.

use crate::core::firewall::{Action, Chain, Defaults, Protocol, Rule, RuleDraft};

/// A minimal valid draft: input chain, any protocol, accept.
pub fn draft() -> RuleDraft {
    RuleDraft::default()
}

/// A stored-looking rule with the given protocol and no attributes.
pub fn rule(protocol: Protocol) -> Rule {
    Rule {
        id: 1,
        chain: Chain::Input,
        protocol,
        action: Action::Accept,
        in_iface: None,
        out_iface: None,
        ports: Vec::new(),
        sources: Vec::new(),
        destinations: Vec::new(),
        icmp_types: Vec::new(),
        comment: None,
        enabled: true,
    }
}

/// The canonical SSH rule: input, tcp, port 22, accept.
pub fn ssh_rule() -> Rule {
    Rule {
        ports: vec![22],
        comment: Some("ssh".to_string()),
        ..rule(Protocol::Tcp)
    }
}

/// Drop inbound and forwarded traffic, accept outbound, no log prefix.
pub fn server_defaults() -> Defaults {
    Defaults {
        input_policy: Action::Drop,
        forward_policy: Action::Drop,
        output_policy: Action::Accept,
        log_prefix: String::new(),
    }
}
