//! Versioned, ordered schema migrations applied once at startup.

use tracing::info;

use crate::error::{Error, Result};

const META_TREE: &str = "_meta";
const VERSION_KEY: &[u8] = b"schema_version";

/// A single ordered migration step.
///
/// `version` is the schema version this migration produces; migrations run
/// in ascending `version` order starting just above whatever is currently
/// stored, so they stay idempotent across process restarts.
pub struct Migration {
    /// Schema version this migration brings the database to.
    pub version: u32,
    /// Short description, surfaced in logs only.
    pub description: &'static str,
    /// The migration body. Receives the raw database to open/alter trees.
    pub apply: fn(&sled::Db) -> std::result::Result<(), String>,
}

/// Read the current schema version, defaulting to 0 for a fresh database.
pub fn current_version(db: &sled::Db) -> Result<u32> {
    let meta = db.open_tree(META_TREE)?;
    match meta.get(VERSION_KEY)? {
        Some(bytes) => {
            let arr: [u8; 4] = bytes
                .as_ref()
                .try_into()
                .map_err(|_| Error::Migration {
                    version: 0,
                    reason: "corrupt schema_version key".into(),
                })?;
            Ok(u32::from_be_bytes(arr))
        }
        None => Ok(0),
    }
}

fn set_version(db: &sled::Db, version: u32) -> Result<()> {
    let meta = db.open_tree(META_TREE)?;
    meta.insert(VERSION_KEY, &version.to_be_bytes())?;
    meta.flush()?;
    Ok(())
}

/// Apply every migration whose `version` exceeds the database's current
/// version, in ascending order, persisting the new version after each step.
pub fn run_migrations(db: &sled::Db, migrations: &[Migration]) -> Result<()> {
    let mut version = current_version(db)?;
    let mut sorted: Vec<&Migration> = migrations.iter().collect();
    sorted.sort_by_key(|m| m.version);

    for migration in sorted {
        if migration.version <= version {
            continue;
        }
        info!(
            version = migration.version,
            description = migration.description,
            "applying migration"
        );
        (migration.apply)(db).map_err(|reason| Error::Migration {
            version: migration.version,
            reason,
        })?;
        set_version(db, migration.version)?;
        version = migration.version;
    }
    Ok(())
}

/// The migrations shipped by this crate's own schema (tree bootstrap only;
/// downstream crates append their own via [`run_migrations`]).
pub fn base_migrations() -> Vec<Migration> {
    vec![Migration {
        version: 1,
        description: "bootstrap core trees",
        apply: |db| {
            for tree in [
                "servers",
                "manifests",
                "deployments",
                "services",
                "proxy_routes",
                "service_routes",
                "secrets",
                "agent_tokens",
                "users",
            ] {
                db.open_tree(tree).map_err(|e| e.to_string())?;
            }
            Ok(())
        },
    }]
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fresh_database_starts_at_version_zero() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        assert_eq!(current_version(&db).unwrap(), 0);
    }

    #[test]
    fn migrations_apply_in_order_and_persist() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        run_migrations(&db, &base_migrations()).unwrap();
        assert_eq!(current_version(&db).unwrap(), 1);
        assert!(db.tree_names().iter().any(|n| n == b"servers"));

        // Re-running is a no-op: no migration with version > 1 exists yet.
        run_migrations(&db, &base_migrations()).unwrap();
        assert_eq!(current_version(&db).unwrap(), 1);
    }

    #[test]
    fn later_migration_only_runs_once() {
        let db = sled::Config::new().temporary(true).open().unwrap();
        let counter_tree = "counter";
        let extra = Migration {
            version: 2,
            description: "bump counter",
            apply: |db| {
                let t = db.open_tree("counter").map_err(|e| e.to_string())?;
                let n = t
                    .get(b"n")
                    .map_err(|e| e.to_string())?
                    .map(|v| u32::from_be_bytes(v.as_ref().try_into().unwrap()))
                    .unwrap_or(0);
                t.insert(b"n", &(n + 1).to_be_bytes())
                    .map_err(|e| e.to_string())?;
                Ok(())
            },
        };
        let mut migrations = base_migrations();
        migrations.push(extra);

        run_migrations(&db, &migrations).unwrap();
        run_migrations(&db, &migrations).unwrap();

        let t = db.open_tree(counter_tree).unwrap();
        let n = u32::from_be_bytes(t.get(b"n").unwrap().unwrap().as_ref().try_into().unwrap());
        assert_eq!(n, 1);
    }
}
