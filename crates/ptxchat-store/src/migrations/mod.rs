//! Schema migrations, applied in version order when a [`crate::Database`]
//! is opened. `PRAGMA user_version` records the last applied step.

pub mod v001_initial;

use rusqlite::Connection;

use crate::error::{Result, StoreError};

type Step = fn(&Connection) -> rusqlite::Result<()>;

/// Every schema step, oldest first. Index + 1 is the version it produces.
const STEPS: &[(&str, Step)] = &[("v001_initial", v001_initial::up)];

pub fn schema_version() -> u32 {
    STEPS.len() as u32
}

/// Bring `conn` up to [`schema_version`]. Each step runs in its own
/// transaction together with the version bump.
pub fn run_migrations(conn: &mut Connection) -> Result<()> {
    let found: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    let target = schema_version();

    if found > target {
        return Err(StoreError::Migration(format!(
            "database is at schema v{found}, this build knows v{target}"
        )));
    }
    tracing::debug!(found, target, "Checking schema");

    for (version, (name, step)) in (1u32..).zip(STEPS.iter()).skip(found as usize) {
        tracing::info!(migration = name, version, "Applying migration");
        let tx = conn.transaction()?;
        step(&tx).map_err(|e| StoreError::Migration(format!("{name}: {e}")))?;
        tx.pragma_update(None, "user_version", version)?;
        tx.commit()?;
    }

    Ok(())
}
