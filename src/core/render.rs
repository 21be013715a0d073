//! nftables script generation
//!
//! [`render`] turns the defaults and the stored rules into a complete script
//! for `nft -f`. It is pure and deterministic: the same inputs always give
//! byte-identical output.
//!
//! # Script Layout
//!
//! ```text
//! flush ruleset
//!
//! table inet netfence {
//!     chain input {
//!         type filter hook input priority 0; policy drop;
//!         ct state established,related accept
//!         <one line per enabled input rule, ascending id>
//!     }
//!
//!     chain forward { ... }
//!
//!     chain output { ... }
//! }
//! ```
//!
//! # Clause Order
//!
//! Each rule compiles to clauses in a fixed order, joined by single spaces:
//! inbound interface, outbound interface, protocol, ports, one clause per
//! source prefix, one clause per destination prefix, ICMP types, action.
//!
//! Several source (or destination) prefixes on one rule each become their
//! own clause. nft ANDs them, so a rule with two different source prefixes
//! can never match. That is the stored policy's meaning and is kept as is.

use super::firewall::{Chain, Defaults, Protocol, Rule};
use super::rule_constraints::{prefix_family, renders_icmp_clause, renders_port_clause};
use std::fmt::Write;
use strum::IntoEnumIterator;

/// Name of the nftables table the script owns
pub const TABLE_NAME: &str = "netfence";

/// First statement of every chain
pub const ESTABLISHED_ACCEPT: &str = "ct state established,related accept";

/// Renders the full script. Disabled rules are skipped; the rest are emitted
/// by ascending id whatever order they are passed in.
pub fn render(defaults: &Defaults, rules: &[Rule]) -> String {
    let mut enabled: Vec<&Rule> = rules.iter().filter(|r| r.enabled).collect();
    enabled.sort_by_key(|r| r.id);

    let mut out = String::new();

    let _ = writeln!(out, "flush ruleset\n");
    let _ = writeln!(out, "table inet {TABLE_NAME} {{");

    for (index, chain) in Chain::iter().enumerate() {
        if index > 0 {
            let _ = writeln!(out);
        }
        write_chain(&mut out, chain, defaults, &enabled);
    }

    let _ = writeln!(out, "}}");
    out
}

fn write_chain(out: &mut String, chain: Chain, defaults: &Defaults, rules: &[&Rule]) {
    let name = chain.as_str();
    let _ = writeln!(out, "    chain {name} {{");
    let _ = writeln!(
        out,
        "        type filter hook {name} priority 0; policy {};",
        defaults.policy(chain)
    );
    let _ = writeln!(out, "        {ESTABLISHED_ACCEPT}");

    for rule in rules.iter().filter(|r| r.chain == chain) {
        let _ = writeln!(out, "        {}", render_rule(rule));
    }

    let _ = writeln!(out, "    }}");
}

/// Compiles one rule into a single statement line (without indentation).
pub fn render_rule(rule: &Rule) -> String {
    rule_clauses(rule).join(" ")
}

/// Ordered clauses of one rule. The action is always last.
pub fn rule_clauses(rule: &Rule) -> Vec<String> {
    let mut clauses = Vec::with_capacity(6 + rule.sources.len() + rule.destinations.len());

    if let Some(ref iface) = rule.in_iface {
        clauses.push(format!("iifname \"{iface}\""));
    }
    if let Some(ref iface) = rule.out_iface {
        clauses.push(format!("oifname \"{iface}\""));
    }
    if rule.protocol != Protocol::All {
        clauses.push(format!("meta l4proto {}", rule.protocol));
    }
    if renders_port_clause(rule) {
        clauses.push(format!(
            "{} dport {{ {} }}",
            rule.protocol,
            join_numbers(&rule.ports)
        ));
    }
    for prefix in &rule.sources {
        clauses.push(format!("{} saddr {prefix}", prefix_family(prefix)));
    }
    for prefix in &rule.destinations {
        clauses.push(format!("{} daddr {prefix}", prefix_family(prefix)));
    }
    if renders_icmp_clause(rule) {
        clauses.push(format!("icmp type {{ {} }}", join_numbers(&rule.icmp_types)));
    }

    clauses.push(rule.action.to_string());
    clauses
}

fn join_numbers<T: ToString>(values: &[T]) -> String {
    values
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(", ")
}
