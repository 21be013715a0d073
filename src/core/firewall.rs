//! Firewall policy data structures
//!
//! This module defines the stored shape of the policy: the [`Defaults`]
//! singleton with one policy per chain, and the ordered collection of
//! [`Rule`]s with their multi-valued attributes.
//!
//! Values arrive from callers and snapshot documents as drafts
//! ([`RuleDraft`], [`DefaultsDraft`]) holding raw strings and wide integers.
//! [`crate::validators`] turns a draft into its typed counterpart; nothing
//! else constructs stored values from caller input.
//!
//! # Example
//!
//! ```
//! use netfence::core::firewall::{Action, Chain, Protocol, RuleDraft};
//! use netfence::validators::validate_rule;
//!
//! let draft = RuleDraft {
//!     chain: "input".to_string(),
//!     protocol: "tcp".to_string(),
//!     action: "accept".to_string(),
//!     ports: vec![22],
//!     ..RuleDraft::default()
//! };
//! let rule = validate_rule(&draft).unwrap();
//! assert_eq!(rule.chain, Chain::Input);
//! assert_eq!(rule.protocol, Protocol::Tcp);
//! assert_eq!(rule.action, Action::Accept);
//! ```

use serde::{Deserialize, Serialize};

/// Fixed identity of the defaults row
pub const DEFAULTS_ID: i64 = 1;

/// Identifier carried by a rule that has not been stored yet
pub const UNASSIGNED_ID: i64 = 0;

/// Traffic direction a rule belongs to
///
/// Chains render in declaration order: input, forward, output.
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Hash,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Chain {
    /// Packets addressed to this host
    #[default]
    #[strum(serialize = "input")]
    Input,
    /// Packets routed through this host
    #[strum(serialize = "forward")]
    Forward,
    /// Packets originating from this host
    #[strum(serialize = "output")]
    Output,
}

impl Chain {
    pub const fn as_str(self) -> &'static str {
        match self {
            Chain::Input => "input",
            Chain::Forward => "forward",
            Chain::Output => "output",
        }
    }
}

/// Network protocol type for firewall rules
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Protocol {
    /// Match every protocol
    #[default]
    #[strum(serialize = "all")]
    All,
    /// Transmission Control Protocol
    #[strum(serialize = "tcp")]
    Tcp,
    /// User Datagram Protocol
    #[strum(serialize = "udp")]
    Udp,
    /// Internet Control Message Protocol (IPv4)
    #[strum(serialize = "icmp")]
    Icmp,
}

impl Protocol {
    pub const fn as_str(self) -> &'static str {
        match self {
            Protocol::All => "all",
            Protocol::Tcp => "tcp",
            Protocol::Udp => "udp",
            Protocol::Icmp => "icmp",
        }
    }
}

/// Verdict applied to a packet, used both for rule actions and chain policies
#[derive(
    Debug,
    Clone,
    Copy,
    Serialize,
    Deserialize,
    PartialEq,
    Eq,
    Default,
    strum::Display,
    strum::EnumString,
    strum::EnumIter,
    strum::AsRefStr,
)]
#[serde(rename_all = "lowercase")]
pub enum Action {
    /// Let the packet through
    #[default]
    #[strum(serialize = "accept")]
    Accept,
    /// Discard the packet silently
    #[strum(serialize = "drop")]
    Drop,
}

impl Action {
    pub const fn as_str(self) -> &'static str {
        match self {
            Action::Accept => "accept",
            Action::Drop => "drop",
        }
    }
}

/// A validated filtering rule
///
/// `ports`, `sources`, `destinations` and `icmp_types` keep the order they
/// were supplied in. Ports on a non-TCP/UDP rule and ICMP types on a non-ICMP
/// rule are kept as stored and skipped when rendering.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Rule {
    /// Store-assigned identifier, [`UNASSIGNED_ID`] until created
    pub id: i64,
    pub chain: Chain,
    pub protocol: Protocol,
    pub action: Action,
    #[serde(default)]
    pub in_iface: Option<String>,
    #[serde(default)]
    pub out_iface: Option<String>,
    #[serde(default)]
    pub ports: Vec<u16>,
    /// Source prefixes, text as given (e.g. `10.0.0.0/8`)
    #[serde(default)]
    pub sources: Vec<String>,
    /// Destination prefixes, text as given
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default)]
    pub icmp_types: Vec<u8>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Rule {
    /// Returns a copy of this rule carrying `id`.
    pub fn with_id(mut self, id: i64) -> Self {
        self.id = id;
        self
    }

    /// Converts back into the raw form, e.g. for re-validation after edits.
    pub fn to_draft(&self) -> RuleDraft {
        RuleDraft {
            chain: self.chain.as_str().to_string(),
            protocol: self.protocol.as_str().to_string(),
            action: self.action.as_str().to_string(),
            in_iface: self.in_iface.clone(),
            out_iface: self.out_iface.clone(),
            ports: self.ports.iter().map(|&p| i64::from(p)).collect(),
            sources: self.sources.clone(),
            destinations: self.destinations.clone(),
            icmp_types: self.icmp_types.iter().map(|&t| i64::from(t)).collect(),
            comment: self.comment.clone(),
            enabled: self.enabled,
        }
    }
}

/// Unvalidated rule as supplied by a caller or a snapshot document
///
/// Unknown fields (such as the `id` of an exported rule) are ignored.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RuleDraft {
    pub chain: String,
    #[serde(alias = "proto")]
    pub protocol: String,
    pub action: String,
    #[serde(default)]
    pub in_iface: Option<String>,
    #[serde(default)]
    pub out_iface: Option<String>,
    #[serde(default)]
    pub ports: Vec<i64>,
    #[serde(default)]
    pub sources: Vec<String>,
    #[serde(default)]
    pub destinations: Vec<String>,
    #[serde(default)]
    pub icmp_types: Vec<i64>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl Default for RuleDraft {
    fn default() -> Self {
        Self {
            chain: Chain::default().as_str().to_string(),
            protocol: Protocol::default().as_str().to_string(),
            action: Action::default().as_str().to_string(),
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
}

fn default_true() -> bool {
    true
}

/// Default chain policies, stored as a singleton row
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Defaults {
    pub input_policy: Action,
    pub forward_policy: Action,
    pub output_policy: Action,
    #[serde(default)]
    pub log_prefix: String,
}

impl Default for Defaults {
    /// Policy set written when the store is first initialized:
    /// drop inbound and forwarded traffic, accept outbound.
    fn default() -> Self {
        Self {
            input_policy: Action::Drop,
            forward_policy: Action::Drop,
            output_policy: Action::Accept,
            log_prefix: String::new(),
        }
    }
}

impl Defaults {
    /// Policy configured for `chain`.
    pub const fn policy(&self, chain: Chain) -> Action {
        match chain {
            Chain::Input => self.input_policy,
            Chain::Forward => self.forward_policy,
            Chain::Output => self.output_policy,
        }
    }

    pub fn to_draft(&self) -> DefaultsDraft {
        DefaultsDraft {
            input_policy: self.input_policy.as_str().to_string(),
            forward_policy: self.forward_policy.as_str().to_string(),
            output_policy: self.output_policy.as_str().to_string(),
            log_prefix: self.log_prefix.clone(),
        }
    }
}

/// Unvalidated defaults as supplied by a caller or a snapshot document
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct DefaultsDraft {
    pub input_policy: String,
    pub forward_policy: String,
    pub output_policy: String,
    #[serde(default)]
    pub log_prefix: String,
}

/// Exported policy document: the defaults and every rule in id order
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct Snapshot {
    pub defaults: Defaults,
    pub rules: Vec<Rule>,
}

/// Policy document as read back for import
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SnapshotDraft {
    pub defaults: DefaultsDraft,
    #[serde(default)]
    pub rules: Vec<RuleDraft>,
}

impl From<&Snapshot> for SnapshotDraft {
    fn from(snapshot: &Snapshot) -> Self {
        Self {
            defaults: snapshot.defaults.to_draft(),
            rules: snapshot.rules.iter().map(Rule::to_draft).collect(),
        }
    }
}
