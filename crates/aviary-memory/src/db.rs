use rusqlite::{Connection, Result};

/// Initialise tenant store tables. Safe to call on every startup (idempotent).
pub fn init_db(conn: &Connection) -> Result<()> {
    conn.pragma_update(None, "journal_mode", "WAL")?;
    create_memories_table(conn)?;
    create_fts_index(conn)?;
    create_embeddings_table(conn)?;
    create_conversations_table(conn)?;
    Ok(())
}

fn create_memories_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS memories (
            id          TEXT PRIMARY KEY,
            content     TEXT NOT NULL,
            importance  REAL NOT NULL DEFAULT 0.5,
            server_id   TEXT NOT NULL,
            user_id     TEXT,
            channel_id  TEXT,
            created_at  TEXT NOT NULL,
            updated_at  TEXT NOT NULL,
            forgotten   INTEGER NOT NULL DEFAULT 0
        );
        CREATE INDEX IF NOT EXISTS idx_memories_server
            ON memories(server_id);
        CREATE INDEX IF NOT EXISTS idx_memories_server_user
            ON memories(server_id, user_id);",
    )
}

/// FTS5 virtual table over memory content. A plain content-storing table
/// (no `content=`/`content_rowid=` option), so `id` is retrievable by
/// SELECT and rows can be removed with a normal `DELETE ... WHERE id = ?`
/// rather than the external-content `'delete'` command.
fn create_fts_index(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE VIRTUAL TABLE IF NOT EXISTS memories_fts
            USING fts5(id UNINDEXED, content);",
    )
}

fn create_embeddings_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS embeddings (
            memory_id TEXT PRIMARY KEY REFERENCES memories(id) ON DELETE CASCADE,
            vector    BLOB NOT NULL
        );",
    )
}

fn create_conversations_table(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS conversations (
            id              INTEGER PRIMARY KEY AUTOINCREMENT,
            channel_id      TEXT NOT NULL,
            user_msg        TEXT NOT NULL,
            tool_calls_json TEXT NOT NULL DEFAULT '[]',
            response        TEXT NOT NULL,
            created_at      TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_conversations_channel
            ON conversations(channel_id, created_at);",
    )
}

/// Whether this connection's FTS5 virtual table is usable. Probed once at
/// startup so `Recall` can fall back to substring search transparently.
pub fn fts_available(conn: &Connection) -> bool {
    conn.execute("INSERT INTO memories_fts(id, content) VALUES ('__probe__', 'x')", [])
        .and_then(|_| {
            conn.execute(
                "DELETE FROM memories_fts WHERE id = '__probe__'",
                [],
            )
        })
        .is_ok()
}
