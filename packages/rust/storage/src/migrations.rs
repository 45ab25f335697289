//! SQL migration definitions for the SpecWeaver chunk index.
//!
//! Migrations are applied in order on database open. Each migration has a
//! version number and a batch of SQL statements.

/// A database migration with a version and SQL statements.
pub(crate) struct Migration {
    pub version: u32,
    pub description: &'static str,
    pub sql: &'static str,
}

/// All migrations, in ascending version order.
pub(crate) fn all_migrations() -> Vec<Migration> {
    vec![
        Migration {
            version: 1,
            description: "Initial schema: chunks with embeddings",
            sql: r#"
CREATE TABLE IF NOT EXISTS schema_migrations (
    version    INTEGER PRIMARY KEY,
    applied_at TEXT NOT NULL DEFAULT (datetime('now'))
);

-- One row per indexed chunk; embedding is little-endian f32
CREATE TABLE IF NOT EXISTS chunks (
    id             INTEGER PRIMARY KEY,
    document_name  TEXT NOT NULL,
    position_index INTEGER NOT NULL,
    text           TEXT NOT NULL,
    embedding      BLOB NOT NULL,
    created_at     TEXT NOT NULL,
    UNIQUE(document_name, position_index)
);

CREATE INDEX IF NOT EXISTS idx_chunks_document ON chunks(document_name);

INSERT INTO schema_migrations (version) VALUES (1);
"#,
        },
        Migration {
            version: 2,
            description: "Document registry",
            sql: r#"
CREATE TABLE IF NOT EXISTS documents (
    name        TEXT PRIMARY KEY,
    page_count  INTEGER NOT NULL,
    chunk_count INTEGER NOT NULL,
    indexed_at  TEXT NOT NULL
);

INSERT INTO schema_migrations (version) VALUES (2);
"#,
        },
    ]
}
