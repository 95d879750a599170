//! Embedded transactional row store with versioned migrations.
//!
//! Wraps a single [`sled::Db`] and exposes typed [`Tree`] handles plus a
//! busy-retry helper for composing multi-step changes. Every other crate in
//! the workspace reaches the database only through this crate; nothing
//! downstream imports `sled` directly.

pub mod error;
pub mod migrations;
pub mod tree;

pub use error::{Error, Result};
pub use migrations::Migration;
pub use tree::Tree;

use serde::{de::DeserializeOwned, Serialize};
use std::path::Path;
use std::time::Duration;

/// The opaque transactional row store.
///
/// Opens (or creates) a sled database at a path, runs the base schema
/// migrations plus any caller-supplied ones, and hands out typed [`Tree`]
/// views keyed by tree name.
#[derive(Clone)]
pub struct Store {
    db: sled::Db,
}

impl Store {
    /// Open a database on disk, applying the base migrations plus `extra`.
    pub fn open(path: impl AsRef<Path>, extra: &[Migration]) -> Result<Self> {
        let db = sled::open(path)?;
        Self::from_db(db, extra)
    }

    /// Open a purely in-memory database, for tests and the bootstrap loop's
    /// dry-run paths.
    pub fn temporary(extra: &[Migration]) -> Result<Self> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db, extra)
    }

    fn from_db(db: sled::Db, extra: &[Migration]) -> Result<Self> {
        let mut all = migrations::base_migrations();
        all.extend(extra.iter().map(|m| Migration {
            version: m.version,
            description: m.description,
            apply: m.apply,
        }));
        migrations::run_migrations(&db, &all)?;
        Ok(Self { db })
    }

    /// Open a typed tree by name. Creating the tree is idempotent; callers
    /// should only name trees a migration has already opened.
    pub fn tree<T>(&self, name: &str) -> Result<Tree<T>>
    where
        T: Serialize + DeserializeOwned,
    {
        Ok(Tree::new(self.db.open_tree(name)?))
    }

    /// Access the raw database, for composing cross-tree transactions.
    pub fn raw(&self) -> &sled::Db {
        &self.db
    }

    /// Run `body` under a bounded retry loop, retrying only on sled's busy
    /// condition (lock contention / concurrent transaction conflict), with
    /// linear backoff. Callers compose multi-step changes through this
    /// helper rather than catching busy errors themselves.
    pub fn retry_busy<T>(&self, attempts: u32, mut body: impl FnMut() -> Result<T>) -> Result<T> {
        let mut last_err = None;
        for attempt in 0..attempts.max(1) {
            match body() {
                Ok(v) => return Ok(v),
                Err(Error::Busy(reason)) => {
                    last_err = Some(Error::Busy(reason));
                    std::thread::sleep(Duration::from_millis(20 * (attempt as u64 + 1)));
                }
                Err(other) => return Err(other),
            }
        }
        Err(last_err.unwrap_or_else(|| Error::Busy("retry budget exhausted".into())))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Serialize, Deserialize, PartialEq)]
    struct Row {
        value: u32,
    }

    #[test]
    fn open_runs_base_migrations() {
        let store = Store::temporary(&[]).unwrap();
        assert!(store.raw().tree_names().iter().any(|n| n == b"deployments"));
    }

    #[test]
    fn tree_roundtrips_typed_rows() {
        let store = Store::temporary(&[]).unwrap();
        let t: Tree<Row> = store.tree("deployments").unwrap();
        t.put("k", &Row { value: 7 }).unwrap();
        assert_eq!(t.get("k").unwrap(), Some(Row { value: 7 }));
    }

    #[test]
    fn retry_busy_gives_up_after_budget() {
        let store = Store::temporary(&[]).unwrap();
        let mut calls = 0;
        let result: Result<()> = store.retry_busy(3, || {
            calls += 1;
            Err(Error::Busy("locked".into()))
        });
        assert!(result.is_err());
        assert_eq!(calls, 3);
    }

    #[test]
    fn retry_busy_succeeds_after_transient_failure() {
        let store = Store::temporary(&[]).unwrap();
        let mut calls = 0;
        let result = store.retry_busy(5, || {
            calls += 1;
            if calls < 3 {
                Err(Error::Busy("locked".into()))
            } else {
                Ok(42)
            }
        });
        assert_eq!(result.unwrap(), 42);
        assert_eq!(calls, 3);
    }
}
