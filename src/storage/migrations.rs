//! Versioned schema migrations.
//!
//! The numbered SQL files under `migrations/` are the source of truth;
//! this module only pins them to version numbers. Revisions are linear
//! and each runs inside its own transaction. The local backend tracks
//! the applied head in `PRAGMA user_version`, the remote backend in a
//! `schema_version` table.

/// A single schema revision.
#[derive(Debug, Clone, Copy)]
pub struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub up: &'static str,
}

/// Local (SQLite) revisions, oldest first.
pub const LOCAL_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema",
        up: include_str!("../../migrations/0001_initial.sql"),
    },
    Migration {
        version: 2,
        description: "sync log with per-table breakdown",
        up: include_str!("../../migrations/0002_sync_log.sql"),
    },
];

/// Remote (PostgreSQL) revisions, mirroring the local set with the
/// user_id partition column.
pub const REMOTE_MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "initial schema",
        up: include_str!("../../migrations/remote/0001_initial.sql"),
    },
    Migration {
        version: 2,
        description: "sync log with per-table breakdown",
        up: include_str!("../../migrations/remote/0002_sync_log.sql"),
    },
];

/// Head version of a revision list.
pub fn head_version(migrations: &[Migration]) -> u32 {
    migrations.last().map(|m| m.version).unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn revisions_are_linear() {
        for (i, m) in LOCAL_MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as u32 + 1);
        }
        for (i, m) in REMOTE_MIGRATIONS.iter().enumerate() {
            assert_eq!(m.version, i as u32 + 1);
        }
        assert_eq!(
            head_version(LOCAL_MIGRATIONS),
            head_version(REMOTE_MIGRATIONS)
        );
    }
}
