//! Relational persistence for the policy (SQLite)
//!
//! The store owns two entities: the [`Defaults`] singleton (row id
//! [`DEFAULTS_ID`]) and the rules, whose ports, source prefixes, destination
//! prefixes and ICMP types live in four child tables keyed by rule id.
//!
//! # Guarantees
//!
//! - A rule and all of its child rows are written in one transaction; a
//!   failure at any point leaves nothing behind and returns no id.
//! - Rules are listed by ascending id. Child values come back in insertion
//!   order.
//! - Deleting a rule removes its child rows in the same transaction.
//! - Every transaction runs under a [`Deadline`]; running out of time rolls
//!   it back and yields `Error::DeadlineExceeded`.
//!
//! The store does not validate; callers pass values that went through
//! [`crate::validators`]. It also takes no cross-process lock of its own.
//! Writers are serialized by [`crate::coordinator::ChangeCoordinator`].

mod deadline;
pub mod migrations;

pub use deadline::Deadline;

use crate::audit::{AuditEvent, EventType};
use crate::core::error::Result;
use crate::core::firewall::{Action, Chain, DEFAULTS_ID, Defaults, Protocol, Rule};
use deadline::Armed;
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSqlOutput, Type, ValueRef};
use rusqlite::{
    Connection, OpenFlags, OptionalExtension, Params, Row, ToSql, Transaction,
    TransactionBehavior, params,
};
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::Duration;
use tracing::{debug, warn};

/// Child tables holding a rule's multi-valued attributes
const CHILD_TABLES: [&str; 4] = ["rule_port", "rule_src_cidr", "rule_dst_cidr", "rule_icmp_type"];

const SELECT_RULES: &str =
    "SELECT id, chain, proto, action, in_if, out_if, comment, enabled FROM rules";

/// Enums stored as their lowercase names
macro_rules! text_column {
    ($($ty:ty),+) => {$(
        impl ToSql for $ty {
            fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
                Ok(ToSqlOutput::from(self.as_str()))
            }
        }

        impl FromSql for $ty {
            fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
                let text = value.as_str()?;
                <$ty>::from_str(text).map_err(|e| FromSqlError::Other(Box::new(e)))
            }
        }
    )+};
}

text_column!(Chain, Protocol, Action);

/// Handle on the policy database
pub struct Store {
    conn: Connection,
    timeout: Duration,
    path: Option<PathBuf>,
}

impl Store {
    /// Opens (creating if needed) the database at `path` and applies pending
    /// migrations. `timeout` is the budget of every later transaction.
    ///
    /// # Errors
    ///
    /// Returns `Error::Database` if the file cannot be opened and
    /// `Error::Migration` if the schema cannot be brought up to date.
    pub fn open(path: impl AsRef<Path>, timeout: Duration) -> Result<Self> {
        let path = path.as_ref();
        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE
                | OpenFlags::SQLITE_OPEN_CREATE
                | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        conn.execute_batch("PRAGMA journal_mode = WAL; PRAGMA synchronous = NORMAL;")?;

        debug!(path = %path.display(), "Opened policy database");
        Self::initialize(conn, timeout, Some(path.to_path_buf()))
    }

    /// Creates an in-memory store for testing.
    ///
    /// # Errors
    ///
    /// Returns an error if the schema cannot be created.
    pub fn open_in_memory(timeout: Duration) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::initialize(conn, timeout, None)
    }

    fn initialize(mut conn: Connection, timeout: Duration, path: Option<PathBuf>) -> Result<Self> {
        conn.busy_timeout(timeout.min(Duration::from_secs(60)))?;
        migrations::apply_all(&mut conn)?;
        Ok(Self {
            conn,
            timeout,
            path,
        })
    }

    /// Database file, `None` for in-memory stores.
    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn set_timeout(&mut self, timeout: Duration) {
        self.timeout = timeout;
    }

    fn begin(&self, behavior: TransactionBehavior) -> Result<Tx<'_>> {
        let deadline = Deadline::after(self.timeout);
        deadline.check()?;
        let armed = Armed::new(&self.conn, &deadline)?;
        let tx = Transaction::new_unchecked(&self.conn, behavior)
            .map_err(|e| deadline.classify(e))?;
        Ok(Tx {
            _armed: armed,
            tx,
            deadline,
        })
    }

    /// Stores a validated rule and returns its new id.
    ///
    /// The parent row and every child value are inserted one statement at a
    /// time inside a single transaction.
    ///
    /// # Errors
    ///
    /// `Error::Database` (e.g. a value failing a column check) or
    /// `Error::DeadlineExceeded`; in both cases nothing is stored.
    pub fn create(&mut self, rule: &Rule) -> Result<i64> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        let id = tx.insert_rule(rule)?;
        tx.commit()?;
        debug!(id, chain = %rule.chain, "Stored rule");
        Ok(id)
    }

    /// All rules (or only enabled ones) in ascending id order.
    ///
    /// Runs in one read transaction so every hydration query sees the same
    /// committed state.
    pub fn list(&self, only_enabled: bool) -> Result<Vec<Rule>> {
        let tx = self.begin(TransactionBehavior::Deferred)?;
        let rules = tx.load_rules(only_enabled)?;
        tx.commit()?;
        Ok(rules)
    }

    /// Removes a rule and its child rows. Returns `false` if no rule had `id`.
    pub fn delete(&mut self, id: i64) -> Result<bool> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        for table in CHILD_TABLES {
            tx.execute(&format!("DELETE FROM {table} WHERE rule_id = ?1"), [id])?;
        }
        let removed = tx.execute("DELETE FROM rules WHERE id = ?1", [id])? > 0;
        tx.commit()?;
        debug!(id, removed, "Deleted rule");
        Ok(removed)
    }

    /// The defaults singleton. A missing row is re-seeded with
    /// [`Defaults::default`].
    ///
    /// The re-seed runs in its own immediate transaction so it waits for
    /// other writers instead of upgrading a read snapshot.
    pub fn defaults(&self) -> Result<Defaults> {
        let tx = self.begin(TransactionBehavior::Deferred)?;
        let loaded = tx.load_defaults()?;
        tx.commit()?;
        if let Some(defaults) = loaded {
            return Ok(defaults);
        }

        let tx = self.begin(TransactionBehavior::Immediate)?;
        let defaults = if let Some(defaults) = tx.load_defaults()? {
            defaults
        } else {
            warn!("Defaults row missing, re-seeding");
            let seeded = Defaults::default();
            tx.write_defaults(&seeded)?;
            seeded
        };
        tx.commit()?;
        Ok(defaults)
    }

    /// Overwrites the four fields of the defaults singleton in place.
    pub fn set_defaults(&mut self, defaults: &Defaults) -> Result<()> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        tx.write_defaults(defaults)?;
        tx.commit()
    }

    /// Replaces the defaults and every rule in one transaction and returns
    /// the new ids in document order.
    ///
    /// Readers see either the old policy or the new one, never a mix.
    pub fn replace_all(&mut self, defaults: &Defaults, rules: &[Rule]) -> Result<Vec<i64>> {
        let tx = self.begin(TransactionBehavior::Immediate)?;
        tx.write_defaults(defaults)?;
        for table in CHILD_TABLES {
            tx.execute(&format!("DELETE FROM {table}"), [])?;
        }
        let dropped = tx.execute("DELETE FROM rules", [])?;

        let mut ids = Vec::with_capacity(rules.len());
        for rule in rules {
            ids.push(tx.insert_rule(rule)?);
        }
        tx.commit()?;

        debug!(dropped, created = ids.len(), "Replaced policy");
        Ok(ids)
    }

    /// Role name recorded for `actor`, `None` for unknown users.
    pub fn role_of(&self, actor: &str) -> Result<Option<String>> {
        let tx = self.begin(TransactionBehavior::Deferred)?;
        tx.deadline.check()?;
        let role = tx
            .tx
            .query_row("SELECT role FROM users WHERE name = ?1", [actor], |row| {
                row.get(0)
            })
            .optional()
            .map_err(|e| tx.deadline.classify(e))?;
        tx.commit()?;
        Ok(role)
    }

    /// Appends one entry to the audit trail.
    pub fn append_audit(&mut self, event: &AuditEvent) -> Result<()> {
        let details = serde_json::to_string(&event.details)?;
        let tx = self.begin(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO audit_log (ts, actor, action, object, details) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![
                event.timestamp.to_rfc3339(),
                event.actor,
                event.event_type.as_ref(),
                event.object,
                details,
            ],
        )?;
        tx.commit()
    }

    /// Most recent audit entries, newest first.
    pub fn recent_audit(&self, limit: usize) -> Result<Vec<AuditEvent>> {
        let tx = self.begin(TransactionBehavior::Deferred)?;
        tx.deadline.check()?;
        let events = {
            let mut stmt = tx
                .tx
                .prepare(
                    "SELECT ts, actor, action, object, details FROM audit_log ORDER BY id DESC LIMIT ?1",
                )
                .map_err(|e| tx.deadline.classify(e))?;
            let rows = stmt
                .query_map([i64::try_from(limit).unwrap_or(i64::MAX)], audit_from_row)
                .map_err(|e| tx.deadline.classify(e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| tx.deadline.classify(e))?
        };
        tx.commit()?;
        Ok(events)
    }
}

/// An open transaction plus the deadline it runs under
///
/// Dropping it without [`Tx::commit`] rolls the transaction back. The
/// interrupt handler is removed first so the rollback itself is never cut
/// short.
struct Tx<'c> {
    _armed: Armed<'c>,
    tx: Transaction<'c>,
    deadline: Deadline,
}

impl Tx<'_> {
    fn execute(&self, sql: &str, params: impl Params) -> Result<usize> {
        self.deadline.check()?;
        self.tx
            .execute(sql, params)
            .map_err(|e| self.deadline.classify(e))
    }

    fn commit(self) -> Result<()> {
        let Tx {
            _armed,
            tx,
            deadline,
        } = self;
        deadline.check()?;
        tx.commit().map_err(|e| deadline.classify(e))
    }

    fn insert_rule(&self, rule: &Rule) -> Result<i64> {
        self.execute(
            "INSERT INTO rules (chain, proto, action, in_if, out_if, comment, enabled)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            params![
                rule.chain,
                rule.protocol,
                rule.action,
                rule.in_iface,
                rule.out_iface,
                rule.comment,
                rule.enabled,
            ],
        )?;
        let id = self.tx.last_insert_rowid();

        for port in &rule.ports {
            self.execute(
                "INSERT INTO rule_port (rule_id, port) VALUES (?1, ?2)",
                params![id, port],
            )?;
        }
        for cidr in &rule.sources {
            self.execute(
                "INSERT INTO rule_src_cidr (rule_id, cidr) VALUES (?1, ?2)",
                params![id, cidr],
            )?;
        }
        for cidr in &rule.destinations {
            self.execute(
                "INSERT INTO rule_dst_cidr (rule_id, cidr) VALUES (?1, ?2)",
                params![id, cidr],
            )?;
        }
        for itype in &rule.icmp_types {
            self.execute(
                "INSERT INTO rule_icmp_type (rule_id, itype) VALUES (?1, ?2)",
                params![id, itype],
            )?;
        }

        Ok(id)
    }

    fn load_rules(&self, only_enabled: bool) -> Result<Vec<Rule>> {
        let sql = if only_enabled {
            format!("{SELECT_RULES} WHERE enabled = 1 ORDER BY id")
        } else {
            format!("{SELECT_RULES} ORDER BY id")
        };

        self.deadline.check()?;
        let mut rules = {
            let mut stmt = self.tx.prepare(&sql).map_err(|e| self.deadline.classify(e))?;
            let rows = stmt
                .query_map([], rule_from_row)
                .map_err(|e| self.deadline.classify(e))?;
            rows.collect::<rusqlite::Result<Vec<_>>>()
                .map_err(|e| self.deadline.classify(e))?
        };

        for rule in &mut rules {
            rule.ports = self.child_values("SELECT port FROM rule_port", rule.id)?;
            rule.sources = self.child_values("SELECT cidr FROM rule_src_cidr", rule.id)?;
            rule.destinations = self.child_values("SELECT cidr FROM rule_dst_cidr", rule.id)?;
            rule.icmp_types = self.child_values("SELECT itype FROM rule_icmp_type", rule.id)?;
        }

        Ok(rules)
    }

    /// Values of one child collection in insertion order.
    fn child_values<T: FromSql>(&self, select: &str, rule_id: i64) -> Result<Vec<T>> {
        self.deadline.check()?;
        let sql = format!("{select} WHERE rule_id = ?1 ORDER BY rowid");
        let mut stmt = self
            .tx
            .prepare_cached(&sql)
            .map_err(|e| self.deadline.classify(e))?;
        let rows = stmt
            .query_map([rule_id], |row| row.get(0))
            .map_err(|e| self.deadline.classify(e))?;
        let values = rows
            .collect::<rusqlite::Result<Vec<T>>>()
            .map_err(|e| self.deadline.classify(e))?;
        Ok(values)
    }

    fn load_defaults(&self) -> Result<Option<Defaults>> {
        self.deadline.check()?;
        self.tx
            .query_row(
                "SELECT input_policy, forward_policy, output_policy, log_prefix
                 FROM defaults WHERE id = ?1",
                [DEFAULTS_ID],
                |row| {
                    Ok(Defaults {
                        input_policy: row.get(0)?,
                        forward_policy: row.get(1)?,
                        output_policy: row.get(2)?,
                        log_prefix: row.get(3)?,
                    })
                },
            )
            .optional()
            .map_err(|e| self.deadline.classify(e))
    }

    /// Updates the singleton, inserting it if it went missing.
    fn write_defaults(&self, defaults: &Defaults) -> Result<()> {
        self.execute(
            "INSERT INTO defaults (id, input_policy, forward_policy, output_policy, log_prefix)
             VALUES (?1, ?2, ?3, ?4, ?5)
             ON CONFLICT (id) DO UPDATE SET
                 input_policy = excluded.input_policy,
                 forward_policy = excluded.forward_policy,
                 output_policy = excluded.output_policy,
                 log_prefix = excluded.log_prefix",
            params![
                DEFAULTS_ID,
                defaults.input_policy,
                defaults.forward_policy,
                defaults.output_policy,
                defaults.log_prefix,
            ],
        )?;
        Ok(())
    }
}

fn rule_from_row(row: &Row<'_>) -> rusqlite::Result<Rule> {
    Ok(Rule {
        id: row.get(0)?,
        chain: row.get(1)?,
        protocol: row.get(2)?,
        action: row.get(3)?,
        in_iface: row.get(4)?,
        out_iface: row.get(5)?,
        comment: row.get(6)?,
        enabled: row.get(7)?,
        ports: Vec::new(),
        sources: Vec::new(),
        destinations: Vec::new(),
        icmp_types: Vec::new(),
    })
}

fn audit_from_row(row: &Row<'_>) -> rusqlite::Result<AuditEvent> {
    let ts: String = row.get(0)?;
    let action: String = row.get(2)?;
    let details: String = row.get(4)?;

    Ok(AuditEvent {
        timestamp: chrono::DateTime::parse_from_rfc3339(&ts)
            .map_err(|e| conversion_error(0, e))?
            .with_timezone(&chrono::Utc),
        actor: row.get(1)?,
        event_type: EventType::from_str(&action).map_err(|e| conversion_error(2, e))?,
        object: row.get(3)?,
        details: serde_json::from_str(&details).map_err(|e| conversion_error(4, e))?,
    })
}

fn conversion_error<E>(idx: usize, err: E) -> rusqlite::Error
where
    E: std::error::Error + Send + Sync + 'static,
{
    rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(err))
}
