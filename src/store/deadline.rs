//! Time budget for a single store transaction
//!
//! A [`Deadline`] bounds a transaction three ways: SQLite's busy handler
//! stops waiting for other writers once the budget is spent, a progress
//! handler interrupts a statement that runs past it, and the store checks it
//! before every statement and before commit.

use crate::core::error::Error;
use rusqlite::{Connection, ErrorCode};
use std::time::{Duration, Instant};

/// Virtual machine steps between progress handler calls
const PROGRESS_OPS: i32 = 1000;

/// Longest busy wait SQLite accepts (milliseconds must fit an `i32`)
const MAX_BUSY_WAIT: Duration = Duration::from_millis(0x7fff_ffff);

#[derive(Debug, Clone, Copy)]
pub struct Deadline {
    budget: Duration,
    /// `None` when the budget is too large to represent as an instant
    expires_at: Option<Instant>,
}

impl Deadline {
    /// A deadline `budget` from now.
    pub fn after(budget: Duration) -> Self {
        Self {
            budget,
            expires_at: Instant::now().checked_add(budget),
        }
    }

    pub fn budget(&self) -> Duration {
        self.budget
    }

    pub fn expired(&self) -> bool {
        self.expires_at.is_some_and(|at| Instant::now() >= at)
    }

    /// Time left before expiry, zero once expired.
    pub fn remaining(&self) -> Duration {
        self.expires_at
            .map_or(Duration::MAX, |at| at.saturating_duration_since(Instant::now()))
    }

    /// Fails with `Error::DeadlineExceeded` once the budget is spent.
    pub fn check(&self) -> Result<(), Error> {
        if self.expired() {
            Err(self.exceeded())
        } else {
            Ok(())
        }
    }

    pub fn exceeded(&self) -> Error {
        Error::DeadlineExceeded {
            budget: self.budget,
        }
    }

    /// Maps a SQLite failure, reporting interrupts and late failures as
    /// deadline expiry.
    pub fn classify(&self, err: rusqlite::Error) -> Error {
        let interrupted = err.sqlite_error_code() == Some(ErrorCode::OperationInterrupted);
        if interrupted || self.expired() {
            self.exceeded()
        } else {
            Error::Database(err)
        }
    }

    /// Installs the busy timeout and interrupt handler for this deadline.
    pub(super) fn arm(&self, conn: &Connection) -> Result<(), Error> {
        conn.busy_timeout(self.remaining().min(MAX_BUSY_WAIT))?;
        if let Some(expires_at) = self.expires_at {
            conn.progress_handler(PROGRESS_OPS, Some(move || Instant::now() >= expires_at));
        }
        Ok(())
    }
}

/// Removes the interrupt handler when dropped.
pub(super) struct Armed<'c> {
    conn: &'c Connection,
}

impl<'c> Armed<'c> {
    pub(super) fn new(conn: &'c Connection, deadline: &Deadline) -> Result<Self, Error> {
        deadline.arm(conn)?;
        Ok(Self { conn })
    }
}

impl Drop for Armed<'_> {
    fn drop(&mut self) {
        self.conn.progress_handler(0, None::<fn() -> bool>);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_zero_budget_is_expired() {
        let deadline = Deadline::after(Duration::ZERO);
        assert!(deadline.expired());
        assert_eq!(deadline.remaining(), Duration::ZERO);
        assert!(matches!(
            deadline.check(),
            Err(Error::DeadlineExceeded { budget }) if budget == Duration::ZERO
        ));
    }

    #[test]
    fn test_generous_budget_is_live() {
        let deadline = Deadline::after(Duration::from_secs(60));
        assert!(deadline.check().is_ok());
        assert!(deadline.remaining() > Duration::from_secs(50));
    }

    #[test]
    fn test_huge_budget_never_expires() {
        let deadline = Deadline::after(Duration::MAX);
        assert!(!deadline.expired());
        assert_eq!(deadline.remaining(), Duration::MAX);
    }

    #[test]
    fn test_classify_keeps_ordinary_errors() {
        let deadline = Deadline::after(Duration::from_secs(60));
        let err = deadline.classify(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, Error::Database(_)));

        let expired = Deadline::after(Duration::ZERO);
        let err = expired.classify(rusqlite::Error::QueryReturnedNoRows);
        assert!(matches!(err, Error::DeadlineExceeded { .. }));
    }
}
