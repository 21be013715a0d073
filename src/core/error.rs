use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Core error types for netfence
#[derive(Debug, Error)]
pub enum Error {
    /// I/O operation failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization failed
    #[error("JSON error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// A rule or defaults field violates a domain constraint
    #[error("Validation error in {field}: {message}")]
    Validation {
        field: &'static str,
        message: String,
    },

    /// The underlying store failed; the transaction was rolled back
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// The transaction ran past its deadline and was rolled back
    #[error("Database deadline of {budget:?} exceeded, transaction rolled back")]
    DeadlineExceeded { budget: Duration },

    /// A schema migration could not be applied
    #[error("Migration {version} failed: {source}")]
    Migration {
        version: u32,
        #[source]
        source: rusqlite::Error,
    },

    /// The change lock could not be acquired or released
    #[error("Lock error on {}: {message}", path.display())]
    Lock { path: PathBuf, message: String },

    /// The change lock stayed busy for the whole configured wait
    #[error("Timed out after {waited:?} waiting for lock {}", path.display())]
    LockTimeout { path: PathBuf, waited: Duration },

    /// The acting user lacks the role required for an operation
    #[error("Permission denied: {actor} may not {action}")]
    Unauthorized { actor: String, action: &'static str },

    /// nftables command execution failed
    #[error("nftables error: {message}")]
    Nftables {
        message: String,
        stderr: Option<String>,
        exit_code: Option<i32>,
    },

    /// Internal logic error
    #[error("Internal error: {0}")]
    Internal(String),
}

impl Error {
    /// Builds a validation error for `field`.
    pub fn invalid(field: &'static str, message: impl Into<String>) -> Self {
        Self::Validation {
            field,
            message: message.into(),
        }
    }

    /// Name of the offending field for validation errors.
    pub fn field(&self) -> Option<&'static str> {
        match self {
            Self::Validation { field, .. } => Some(*field),
            _ => None,
        }
    }

    /// `true` for failures raised by the change lock.
    pub fn is_lock_error(&self) -> bool {
        matches!(self, Self::Lock { .. } | Self::LockTimeout { .. })
    }
}

/// Operator-facing explanation of an nft failure
#[derive(Debug, Clone)]
pub struct ErrorTranslation {
    pub user_message: String,
    pub suggestions: Vec<String>,
}

/// One known nft failure: any needle in the lowercased message selects it
struct Hint {
    needles: &'static [&'static str],
    message: &'static str,
    suggestions: &'static [&'static str],
}

/// Checked in order; the first match wins
const HINTS: &[Hint] = &[
    Hint {
        needles: &["operation not permitted", "permission denied"],
        message: "nft lacks the privileges to load a ruleset",
        suggestions: &[
            "Run apply as root, or set nft_command to \"sudo nft\"",
            "Loading rules needs CAP_NET_ADMIN",
        ],
    },
    Hint {
        needles: &["could not process rule", "syntax error", "unexpected"],
        message: "nft rejected the generated script",
        suggestions: &[
            "Inspect the script with: netfence render",
            "A rule naming an interface that is absent on this host cannot load",
            "Rules with several source or destination prefixes never match",
        ],
    },
    Hint {
        needles: &["command not found", "no such file"],
        message: "The nft program could not be found",
        suggestions: &[
            "Install the nftables package for your distribution",
            "Or point NETFENCE_NFT_COMMAND at the nft binary",
            "Check the configured command with: netfence check",
        ],
    },
    Hint {
        needles: &["netlink", "nf_tables"],
        message: "The kernel's nf_tables interface did not respond",
        suggestions: &[
            "Make sure the module is loaded: modprobe nf_tables",
            "Containers may need --cap-add NET_ADMIN",
        ],
    },
    Hint {
        needles: &["resource busy"],
        message: "Another program is changing the ruleset",
        suggestions: &["Stop other firewall managers (firewalld, ufw) before applying"],
    },
];

/// Turns nft stderr into hints for the operator
pub struct NftablesErrorPattern;

impl NftablesErrorPattern {
    /// Looks `msg` up among the known failures. Unknown messages are echoed
    /// back with generic advice.
    pub fn match_error(msg: &str) -> ErrorTranslation {
        let lower = msg.to_lowercase();
        let hint = HINTS
            .iter()
            .find(|hint| hint.needles.iter().any(|needle| lower.contains(needle)));

        match hint {
            Some(hint) => ErrorTranslation {
                user_message: hint.message.to_string(),
                suggestions: hint.suggestions.iter().map(ToString::to_string).collect(),
            },
            None => ErrorTranslation {
                user_message: format!("nft failed: {msg}"),
                suggestions: vec![
                    "Run with -v for the full nft output".to_string(),
                    "Check that nft works at all: nft list ruleset".to_string(),
                ],
            },
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
