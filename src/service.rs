//! Policy operations as seen by a caller
//!
//! [`PolicyService`] ties the pieces together: it checks the acting user's
//! role, validates drafts, takes the change lock for every mutation, writes
//! through the [`Store`], and records an audit event for each committed
//! change. Reads go straight to the store without locking.
//!
//! # Roles
//!
//! | Operation                         | Required role |
//! |-----------------------------------|---------------|
//! | list, defaults, export, render    | none          |
//! | add rule, delete rule, apply      | operator      |
//! | set defaults, import              | admin         |

use crate::audit::{AuditEvent, DEFAULTS_OBJECT, EventType, RULESET_OBJECT, rule_object};
use crate::config::AppConfig;
use crate::coordinator::ChangeCoordinator;
use crate::core::error::{Error, Result};
use crate::core::firewall::{Defaults, DefaultsDraft, Rule, RuleDraft, Snapshot, SnapshotDraft};
use crate::core::nft::NftCommand;
use crate::core::render::render;
use crate::store::Store;
use crate::utils::{ensure_parent_dir, interface_exists};
use crate::validators::{validate_defaults, validate_rule};
use std::str::FromStr;
use tracing::{info, warn};

/// Access level of a user, ordered from least to most privileged
#[derive(
    Debug,
    Clone,
    Copy,
    PartialEq,
    Eq,
    PartialOrd,
    Ord,
    strum::Display,
    strum::EnumString,
    strum::AsRefStr,
)]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    Viewer,
    Operator,
    Admin,
}

/// Behavior switches for a [`PolicyService`]
#[derive(Debug, Clone)]
pub struct ServiceOptions {
    /// Reject rules naming interfaces that do not exist on this host
    pub check_interfaces: bool,
    /// How to reach nft for `check` and `apply`
    pub nft: NftCommand,
}

impl Default for ServiceOptions {
    fn default() -> Self {
        Self {
            check_interfaces: true,
            nft: NftCommand::default(),
        }
    }
}

/// Outcome of a successful apply
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ApplyReport {
    /// Rules rendered into the loaded script
    pub rules: usize,
    /// Size of the loaded script in bytes
    pub script_bytes: usize,
}

pub struct PolicyService {
    store: Store,
    coordinator: ChangeCoordinator,
    actor: String,
    options: ServiceOptions,
}

impl PolicyService {
    pub fn new(
        store: Store,
        coordinator: ChangeCoordinator,
        actor: impl Into<String>,
        options: ServiceOptions,
    ) -> Self {
        Self {
            store,
            coordinator,
            actor: actor.into(),
            options,
        }
    }

    /// Opens the configured store and lock, creating their directories.
    ///
    /// # Errors
    ///
    /// Returns `Err` if a directory cannot be created or the store cannot be
    /// opened and migrated.
    pub fn from_config(config: &AppConfig, actor: impl Into<String>) -> Result<Self> {
        ensure_parent_dir(&config.db_path)?;
        ensure_parent_dir(&config.lock_path)?;

        let store = Store::open(&config.db_path, config.tx_timeout())?;
        let mut coordinator = ChangeCoordinator::new(&config.lock_path);
        if let Some(timeout) = config.lock_timeout() {
            coordinator = coordinator.with_timeout(timeout);
        }
        let options = ServiceOptions {
            check_interfaces: config.check_interfaces,
            nft: NftCommand::parse(&config.nft_command),
        };

        Ok(Self::new(store, coordinator, actor, options))
    }

    pub fn actor(&self) -> &str {
        &self.actor
    }

    pub fn store(&self) -> &Store {
        &self.store
    }

    /// Role of the acting user.
    ///
    /// # Errors
    ///
    /// `Error::Unauthorized` for users not present in the store.
    pub fn role(&self) -> Result<Role> {
        let name = self
            .store
            .role_of(&self.actor)?
            .ok_or_else(|| self.unauthorized("act on the firewall policy"))?;
        Role::from_str(&name)
            .map_err(|_| Error::Internal(format!("user {} has unknown role '{name}'", self.actor)))
    }

    fn authorize(&self, required: Role, action: &'static str) -> Result<()> {
        let role = self.role().map_err(|e| match e {
            Error::Unauthorized { .. } => self.unauthorized(action),
            other => other,
        })?;
        if role < required {
            return Err(self.unauthorized(action));
        }
        Ok(())
    }

    fn unauthorized(&self, action: &'static str) -> Error {
        Error::Unauthorized {
            actor: self.actor.clone(),
            action,
        }
    }

    fn check_interfaces(&self, rule: &Rule) -> Result<()> {
        if !self.options.check_interfaces {
            return Ok(());
        }
        for (field, name) in [("in_iface", &rule.in_iface), ("out_iface", &rule.out_iface)] {
            if let Some(name) = name
                && !interface_exists(name)?
            {
                return Err(Error::invalid(
                    field,
                    format!("interface '{name}' does not exist"),
                ));
            }
        }
        Ok(())
    }

    /// Validates and stores a new rule, returning its id.
    ///
    /// # Errors
    ///
    /// `Error::Unauthorized`, `Error::Validation`, a lock error, or a store
    /// error. Nothing is stored on any of them.
    pub fn add_rule(&mut self, draft: &RuleDraft) -> Result<i64> {
        self.authorize(Role::Operator, "add rules")?;
        let rule = validate_rule(draft)?;
        self.check_interfaces(&rule)?;

        let id = self.coordinator.run(|| {
            let id = self.store.create(&rule)?;
            let details = serde_json::to_value(rule.clone().with_id(id)).unwrap_or_default();
            record(
                &mut self.store,
                &AuditEvent::new(&self.actor, EventType::AddRule, rule_object(id), details),
            );
            Ok(id)
        })?;

        info!(id, actor = %self.actor, "Added rule");
        Ok(id)
    }

    /// Deletes a rule. Returns `false` if no rule had `id`.
    pub fn delete_rule(&mut self, id: i64) -> Result<bool> {
        self.authorize(Role::Operator, "delete rules")?;

        let removed = self.coordinator.run(|| {
            let removed = self.store.delete(id)?;
            if removed {
                record(
                    &mut self.store,
                    &AuditEvent::new(
                        &self.actor,
                        EventType::DeleteRule,
                        rule_object(id),
                        serde_json::json!({}),
                    ),
                );
            }
            Ok(removed)
        })?;

        if removed {
            info!(id, actor = %self.actor, "Deleted rule");
        }
        Ok(removed)
    }

    /// Validates and stores new default policies.
    pub fn set_defaults(&mut self, draft: &DefaultsDraft) -> Result<Defaults> {
        self.authorize(Role::Admin, "change default policies")?;
        let defaults = validate_defaults(draft)?;

        self.coordinator.run(|| {
            self.store.set_defaults(&defaults)?;
            let details = serde_json::to_value(&defaults).unwrap_or_default();
            record(
                &mut self.store,
                &AuditEvent::new(&self.actor, EventType::SetDefaults, DEFAULTS_OBJECT, details),
            );
            Ok(())
        })?;

        info!(actor = %self.actor, "Updated default policies");
        Ok(defaults)
    }

    /// Replaces the whole policy with a snapshot document.
    ///
    /// Every rule and the defaults are validated before anything is written;
    /// the replacement itself is a single transaction. Returns the number of
    /// rules imported.
    ///
    /// # Errors
    ///
    /// A validation error names the field and, in its message, the 1-based
    /// position of the offending rule in the document.
    pub fn import(&mut self, snapshot: &SnapshotDraft) -> Result<usize> {
        self.authorize(Role::Admin, "import snapshots")?;

        let defaults = validate_defaults(&snapshot.defaults)?;
        let mut rules = Vec::with_capacity(snapshot.rules.len());
        for (index, draft) in snapshot.rules.iter().enumerate() {
            let rule = validate_rule(draft)
                .and_then(|rule| self.check_interfaces(&rule).map(|()| rule))
                .map_err(|e| match e {
                    Error::Validation { field, message } => Error::Validation {
                        field,
                        message: format!("rule {}: {message}", index + 1),
                    },
                    other => other,
                })?;
            rules.push(rule);
        }

        let ids = self.coordinator.run(|| {
            let ids = self.store.replace_all(&defaults, &rules)?;
            record(
                &mut self.store,
                &AuditEvent::new(
                    &self.actor,
                    EventType::ImportSnapshot,
                    RULESET_OBJECT,
                    serde_json::json!({ "rules": ids.len() }),
                ),
            );
            Ok(ids)
        })?;

        info!(rules = ids.len(), actor = %self.actor, "Imported snapshot");
        Ok(ids.len())
    }

    /// Renders the stored policy and loads it with nft.
    ///
    /// Runs under the change lock so the loaded script matches a single
    /// committed state.
    pub fn apply(&mut self) -> Result<ApplyReport> {
        self.authorize(Role::Operator, "apply the ruleset")?;

        let report = self.coordinator.run(|| {
            let defaults = self.store.defaults()?;
            let rules = self.store.list(true)?;
            let script = render(&defaults, &rules);

            self.options.nft.apply(&script)?;

            let report = ApplyReport {
                rules: rules.len(),
                script_bytes: script.len(),
            };
            record(
                &mut self.store,
                &AuditEvent::new(
                    &self.actor,
                    EventType::ApplyRules,
                    RULESET_OBJECT,
                    serde_json::json!({ "rules": report.rules, "bytes": report.script_bytes }),
                ),
            );
            Ok(report)
        })?;

        info!(rules = report.rules, actor = %self.actor, "Applied ruleset");
        Ok(report)
    }

    pub fn rules(&self, only_enabled: bool) -> Result<Vec<Rule>> {
        self.store.list(only_enabled)
    }

    pub fn defaults(&self) -> Result<Defaults> {
        self.store.defaults()
    }

    /// The whole policy as an exportable document.
    pub fn export(&self) -> Result<Snapshot> {
        Ok(Snapshot {
            defaults: self.store.defaults()?,
            rules: self.store.list(false)?,
        })
    }

    /// Script for the current defaults and enabled rules.
    pub fn render(&self) -> Result<String> {
        let defaults = self.store.defaults()?;
        let rules = self.store.list(true)?;
        Ok(render(&defaults, &rules))
    }

    /// Lets nft parse the current script without loading it.
    pub fn check(&self) -> Result<()> {
        let script = self.render()?;
        self.options.nft.check(&script)
    }

    /// Most recent audit entries, newest first.
    pub fn audit_trail(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        self.store.recent_audit(limit)
    }
}

/// Writes an audit event; failures are logged and otherwise ignored.
fn record(store: &mut Store, event: &AuditEvent) {
    if let Err(e) = store.append_audit(event) {
        warn!("Failed to write audit log: {e}");
    }
}
