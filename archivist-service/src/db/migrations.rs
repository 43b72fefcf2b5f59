//! Database schema migrations.

use rusqlite::Connection;

use crate::error::{DatabaseError, ServiceResult};

/// Run all database migrations.
///
/// Called during database initialization; every statement is idempotent.
pub(super) fn run_migrations(conn: &Connection) -> ServiceResult<()> {
    conn.execute_batch(
        r#"
        CREATE TABLE IF NOT EXISTS documents (
            id TEXT PRIMARY KEY,
            workspace_id TEXT NOT NULL,
            conversation_id TEXT,
            user_id TEXT,
            file_name TEXT NOT NULL,
            file_type TEXT NOT NULL,
            source_uri TEXT,
            status TEXT NOT NULL DEFAULT 'PENDING',
            chunk_count INTEGER NOT NULL DEFAULT 0,
            attempts INTEGER NOT NULL DEFAULT 0,
            error TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_documents_workspace ON documents(workspace_id);
        CREATE INDEX IF NOT EXISTS idx_documents_conversation ON documents(conversation_id);
        CREATE INDEX IF NOT EXISTS idx_documents_status ON documents(status);
        "#,
    )
    .map_err(|e| DatabaseError::Migration {
        message: e.to_string(),
    })?;

    Ok(())
}
