use anyhow::Result;
use rusqlite::Connection;

/// Runs all schema creation for the orchestration database.
pub fn run_all(conn: &Connection) -> Result<()> {
    create_tables(conn)?;
    Ok(())
}

fn create_tables(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS orchestration_instances (
            instance_id TEXT PRIMARY KEY,
            certificate_name TEXT NOT NULL,
            dns_names TEXT NOT NULL,
            status TEXT NOT NULL,
            resume_at TEXT,
            failure_reason TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_orchestration_instances_status
            ON orchestration_instances (status);

        CREATE TABLE IF NOT EXISTS history_events (
            instance_id TEXT NOT NULL
                REFERENCES orchestration_instances (instance_id) ON DELETE CASCADE,
            sequence INTEGER NOT NULL,
            event_type TEXT NOT NULL,
            event_json TEXT NOT NULL,
            recorded_at TEXT NOT NULL,
            PRIMARY KEY (instance_id, sequence)
        );
        "#,
    )?;
    Ok(())
}
