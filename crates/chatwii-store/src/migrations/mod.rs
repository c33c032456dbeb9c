//! Schema migrations, applied in order when a [`Database`](crate::Database)
//! opens. SQLite's `user_version` pragma records the last one applied.

pub mod v001_initial;
pub mod v002_moderation;

use rusqlite::Connection;
use tracing::{debug, info};

use crate::error::{Result, StoreError};

type Migration = fn(&Connection) -> rusqlite::Result<()>;

const MIGRATIONS: &[(&str, Migration)] = &[
    ("v001_initial", v001_initial::up),
    ("v002_moderation", v002_moderation::up),
];

pub const CURRENT_VERSION: u32 = MIGRATIONS.len() as u32;

pub fn run_migrations(conn: &Connection) -> Result<()> {
    let applied: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    if applied >= CURRENT_VERSION {
        debug!(version = applied, "Schema up to date");
        return Ok(());
    }

    for (version, (name, up)) in (1u32..).zip(MIGRATIONS).skip(applied as usize) {
        info!(version, name, "Applying schema migration");
        up(conn).map_err(|e| StoreError::Migration {
            version,
            reason: e.to_string(),
        })?;
        conn.pragma_update(None, "user_version", version)?;
    }
    Ok(())
}
