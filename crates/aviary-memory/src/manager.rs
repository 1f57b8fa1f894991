use std::sync::Mutex;

use rand::RngCore;
use rusqlite::{params, Connection, OptionalExtension};
use tracing::{debug, warn};

use crate::error::MemoryError;
use crate::rrf;
use crate::types::{ConversationLog, Memory, SaveOutcome, SaveStatus};
use crate::vector::{blob_to_vector, cosine_similarity, vector_to_blob};

/// Per-tenant durable store: facts, embeddings, and the conversation log.
///
/// Single-writer discipline via `Mutex<Connection>`, matching the WAL
/// journaling mode set at init so recalls never block a concurrent save.
pub struct MemoryStore {
    db: Mutex<Connection>,
    fts_available: bool,
}

impl MemoryStore {
    pub fn new(conn: Connection) -> Result<Self, MemoryError> {
        crate::db::init_db(&conn)?;
        let fts_available = crate::db::fts_available(&conn);
        if !fts_available {
            warn!("memory store: FTS5 unavailable, falling back to substring search");
        }
        Ok(Self {
            db: Mutex::new(conn),
            fts_available,
        })
    }

    /// Save a fact. `embedding` is `None` when the embedding service failed
    /// or was skipped — the memory is still stored and remains keyword
    /// findable.
    pub fn save(
        &self,
        content: &str,
        server_id: &str,
        user_id: Option<&str>,
        channel_id: Option<&str>,
        importance: f32,
        dedup_threshold: f32,
        embedding: Option<&[f32]>,
    ) -> Result<SaveOutcome, MemoryError> {
        let db = self.db.lock().unwrap();

        if dedup_threshold > 0.0 {
            if let Some(new_vec) = embedding {
                if let Some((best_id, best_sim, best_len)) =
                    best_match(&db, server_id, new_vec)?
                {
                    if best_sim >= dedup_threshold as f64 {
                        if content.len() > best_len {
                            update_row(&db, &best_id, server_id, content, importance, embedding)?;
                            return Ok(SaveOutcome {
                                id: best_id,
                                status: SaveStatus::Updated,
                            });
                        }
                        return Ok(SaveOutcome {
                            id: best_id,
                            status: SaveStatus::Exists,
                        });
                    }
                }
            }
        }

        let id = new_memory_id();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO memories (id, content, importance, server_id, user_id, channel_id, created_at, updated_at, forgotten)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7, 0)",
            params![id, content, importance, server_id, user_id, channel_id, now],
        )?;
        self.upsert_fts(&db, &id, content);
        if let Some(v) = embedding {
            db.execute(
                "INSERT INTO embeddings (memory_id, vector) VALUES (?1, ?2)",
                params![id, vector_to_blob(v)],
            )?;
        }
        Ok(SaveOutcome {
            id,
            status: SaveStatus::Saved,
        })
    }

    /// Soft-delete: sets `forgotten=1` and removes the FTS row. Not-found
    /// includes cross-tenant id collisions — a mismatched `server_id` looks
    /// identical to a missing row.
    pub fn forget(&self, server_id: &str, id: &str) -> Result<(), MemoryError> {
        let db = self.db.lock().unwrap();
        let updated = db.execute(
            "UPDATE memories SET forgotten = 1 WHERE id = ?1 AND server_id = ?2 AND forgotten = 0",
            params![id, server_id],
        )?;
        if updated == 0 {
            return Err(MemoryError::NotFound(id.to_string()));
        }
        db.execute("DELETE FROM memories_fts WHERE id = ?1", params![id]).ok();
        Ok(())
    }

    /// Re-embed and replace content in one transaction. Same not-found
    /// semantics as `forget`.
    pub fn update_content(
        &self,
        id: &str,
        server_id: &str,
        content: &str,
        embedding: Option<&[f32]>,
    ) -> Result<(), MemoryError> {
        let db = self.db.lock().unwrap();
        let importance: Option<f32> = db
            .query_row(
                "SELECT importance FROM memories WHERE id = ?1 AND server_id = ?2 AND forgotten = 0",
                params![id, server_id],
                |row| row.get(0),
            )
            .optional()?;
        let Some(importance) = importance else {
            return Err(MemoryError::NotFound(id.to_string()));
        };
        update_row(&db, id, server_id, content, importance, embedding)?;
        Ok(())
    }

    /// Hybrid recall: dense cosine pass + keyword pass, merged with
    /// Reciprocal Rank Fusion, truncated to `top_n`.
    pub fn recall(
        &self,
        query: &str,
        server_id: &str,
        top_n: usize,
        sim_threshold: f32,
        query_embedding: Option<&[f32]>,
    ) -> Result<Vec<Memory>, MemoryError> {
        let db = self.db.lock().unwrap();

        let dense_ids = match query_embedding {
            Some(qv) => dense_rank(&db, server_id, qv, sim_threshold as f64)?,
            None => Vec::new(),
        };
        let keyword_ids = if self.fts_available {
            fts_rank(&db, server_id, query)?
        } else {
            like_rank(&db, server_id, query)?
        };

        let fused = rrf::fuse(&[dense_ids, keyword_ids]);
        let mut out = Vec::with_capacity(top_n);
        for (id, _score) in fused {
            if out.len() >= top_n {
                break;
            }
            if let Some(mem) = fetch_memory(&db, server_id, &id)? {
                out.push(mem);
            }
        }
        Ok(out)
    }

    /// User-biased recall: importance DESC, then updated_at DESC.
    pub fn recall_by_user(
        &self,
        server_id: &str,
        user_id: &str,
        limit: usize,
    ) -> Result<Vec<Memory>, MemoryError> {
        let db = self.db.lock().unwrap();
        let mut stmt = db.prepare(
            "SELECT id, content, importance, server_id, user_id, channel_id, created_at, updated_at, forgotten
             FROM memories
             WHERE server_id = ?1 AND user_id = ?2 AND forgotten = 0
             ORDER BY importance DESC, updated_at DESC
             LIMIT ?3",
        )?;
        let rows = stmt.query_map(params![server_id, user_id, limit as i64], row_to_memory)?;
        Ok(rows.filter_map(|r| r.ok()).collect())
    }

    /// Append a conversation row. On roughly 1-in-500 inserts, best-effort
    /// prune down to the most recent `CONVERSATION_LOG_CAP` rows.
    pub fn log_conversation(
        &self,
        channel_id: &str,
        user_msg: &str,
        tool_calls_json: &str,
        response: &str,
    ) -> Result<(), MemoryError> {
        let db = self.db.lock().unwrap();
        let now = chrono::Utc::now().to_rfc3339();
        db.execute(
            "INSERT INTO conversations (channel_id, user_msg, tool_calls_json, response, created_at)
             VALUES (?1, ?2, ?3, ?4, ?5)",
            params![channel_id, user_msg, tool_calls_json, response, now],
        )?;

        if rand::thread_rng().next_u32() % aviary_core::config::CONVERSATION_PRUNE_CHANCE_DENOM == 0 {
            let cap = aviary_core::config::CONVERSATION_LOG_CAP;
            let pruned = db.execute(
                "DELETE FROM conversations WHERE id IN (
                    SELECT id FROM conversations ORDER BY created_at DESC, id DESC
                    LIMIT -1 OFFSET ?1
                )",
                params![cap],
            );
            if let Err(e) = pruned {
                warn!(error = %e, "conversation log prune failed (best-effort)");
            }
        }
        Ok(())
    }

    /// Fetch a single memory by id, scoped to `server_id`. Used for
    /// round-trip tests and tool responses.
    pub fn fetch(&self, server_id: &str, id: &str) -> Result<Option<Memory>, MemoryError> {
        let db = self.db.lock().unwrap();
        fetch_memory(&db, server_id, id)
    }

    fn upsert_fts(&self, db: &Connection, id: &str, content: &str) {
        if !self.fts_available {
            return;
        }
        let _ = db.execute("DELETE FROM memories_fts WHERE id = ?1", params![id]);
        if let Err(e) = db.execute(
            "INSERT INTO memories_fts (id, content) VALUES (?1, ?2)",
            params![id, content],
        ) {
            debug!(error = %e, "fts upsert failed, continuing keyword-search-degraded");
        }
    }
}

fn update_row(
    db: &Connection,
    id: &str,
    server_id: &str,
    content: &str,
    importance: f32,
    embedding: Option<&[f32]>,
) -> Result<(), MemoryError> {
    let now = chrono::Utc::now().to_rfc3339();
    db.execute(
        "UPDATE memories SET content = ?1, importance = ?2, updated_at = ?3
         WHERE id = ?4 AND server_id = ?5",
        params![content, importance, now, id, server_id],
    )?;
    let _ = db.execute("DELETE FROM memories_fts WHERE id = ?1", params![id]);
    let _ = db.execute(
        "INSERT INTO memories_fts (id, content) VALUES (?1, ?2)",
        params![id, content],
    );
    if let Some(v) = embedding {
        db.execute(
            "INSERT INTO embeddings (memory_id, vector) VALUES (?1, ?2)
             ON CONFLICT(memory_id) DO UPDATE SET vector = excluded.vector",
            params![id, vector_to_blob(v)],
        )?;
    } else {
        db.execute("DELETE FROM embeddings WHERE memory_id = ?1", params![id])?;
    }
    Ok(())
}

/// Scan every stored embedding for this tenant and return the single best
/// cosine match above zero, along with the matched row's content length.
fn best_match(
    db: &Connection,
    server_id: &str,
    query: &[f32],
) -> Result<Option<(String, f64, usize)>, MemoryError> {
    let mut stmt = db.prepare(
        "SELECT e.memory_id, e.vector, m.content FROM embeddings e
         JOIN memories m ON m.id = e.memory_id
         WHERE m.server_id = ?1 AND m.forgotten = 0",
    )?;
    let rows = stmt.query_map(params![server_id], |row| {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        let content: String = row.get(2)?;
        Ok((id, blob, content))
    })?;

    let mut best: Option<(String, f64, usize)> = None;
    for row in rows.flatten() {
        let (id, blob, content) = row;
        let Some(v) = blob_to_vector(&blob) else {
            continue;
        };
        let Some(sim) = cosine_similarity(&v, query) else {
            continue;
        };
        if best.as_ref().map(|(_, s, _)| sim > *s).unwrap_or(true) {
            best = Some((id, sim, content.len()));
        }
    }
    Ok(best)
}

/// Dense pass: cosine against every stored embedding, filtered by
/// `sim_threshold` (when > 0), sorted descending.
fn dense_rank(
    db: &Connection,
    server_id: &str,
    query: &[f32],
    sim_threshold: f64,
) -> Result<Vec<String>, MemoryError> {
    let mut stmt = db.prepare(
        "SELECT e.memory_id, e.vector FROM embeddings e
         JOIN memories m ON m.id = e.memory_id
         WHERE m.server_id = ?1 AND m.forgotten = 0",
    )?;
    let rows = stmt.query_map(params![server_id], |row| {
        let id: String = row.get(0)?;
        let blob: Vec<u8> = row.get(1)?;
        Ok((id, blob))
    })?;

    let mut scored: Vec<(String, f64)> = Vec::new();
    for row in rows.flatten() {
        let (id, blob) = row;
        let Some(v) = blob_to_vector(&blob) else {
            continue;
        };
        let Some(sim) = cosine_similarity(&v, query) else {
            continue;
        };
        if sim_threshold > 0.0 && sim < sim_threshold {
            continue;
        }
        scored.push((id, sim));
    }
    scored.sort_by(|a, b| b.1.partial_cmp(&a.1).unwrap_or(std::cmp::Ordering::Equal));
    Ok(scored.into_iter().map(|(id, _)| id).collect())
}

/// Keyword pass using FTS5 MATCH, query wrapped as a quoted phrase (embedded
/// quotes doubled so the phrase stays well-formed).
fn fts_rank(db: &Connection, server_id: &str, query: &str) -> Result<Vec<String>, MemoryError> {
    let phrase = format!("\"{}\"", query.replace('"', "\"\""));
    let mut stmt = db.prepare(
        "SELECT f.id FROM memories_fts f
         JOIN memories m ON m.id = f.id
         WHERE m.server_id = ?1 AND m.forgotten = 0 AND memories_fts MATCH ?2
         ORDER BY rank",
    )?;
    let rows = stmt.query_map(params![server_id, phrase], |row| row.get::<_, String>(0));
    match rows {
        Ok(rows) => Ok(rows.filter_map(|r| r.ok()).collect()),
        Err(_) => like_rank(db, server_id, query),
    }
}

/// Fallback substring search with LIKE metacharacters (`%`, `_`, `\`) escaped
/// so the literal character is matched rather than the wildcard.
fn like_rank(db: &Connection, server_id: &str, query: &str) -> Result<Vec<String>, MemoryError> {
    let escaped = query.replace('\\', "\\\\").replace('%', "\\%").replace('_', "\\_");
    let pattern = format!("%{escaped}%");
    let mut stmt = db.prepare(
        "SELECT id FROM memories
         WHERE server_id = ?1 AND forgotten = 0 AND content LIKE ?2 ESCAPE '\\'
         ORDER BY updated_at DESC",
    )?;
    let rows = stmt.query_map(params![server_id, pattern], |row| row.get::<_, String>(0))?;
    Ok(rows.filter_map(|r| r.ok()).collect())
}

fn fetch_memory(db: &Connection, server_id: &str, id: &str) -> Result<Option<Memory>, MemoryError> {
    db.query_row(
        "SELECT id, content, importance, server_id, user_id, channel_id, created_at, updated_at, forgotten
         FROM memories WHERE id = ?1 AND server_id = ?2 AND forgotten = 0",
        params![id, server_id],
        row_to_memory,
    )
    .optional()
    .map_err(MemoryError::from)
}

fn row_to_memory(row: &rusqlite::Row<'_>) -> rusqlite::Result<Memory> {
    Ok(Memory {
        id: row.get(0)?,
        content: row.get(1)?,
        importance: row.get(2)?,
        server_id: row.get(3)?,
        user_id: row.get(4)?,
        channel_id: row.get(5)?,
        created_at: row.get(6)?,
        updated_at: row.get(7)?,
        forgotten: row.get::<_, i64>(8)? != 0,
    })
}

/// 16 random bytes rendered as 32 lowercase hex characters.
fn new_memory_id() -> String {
    let mut bytes = [0u8; 16];
    rand::thread_rng().fill_bytes(&mut bytes);
    hex::encode(bytes)
}

pub fn row_to_conversation_log(row: &rusqlite::Row<'_>) -> rusqlite::Result<ConversationLog> {
    Ok(ConversationLog {
        id: row.get(0)?,
        channel_id: row.get(1)?,
        user_msg: row.get(2)?,
        tool_calls_json: row.get(3)?,
        response: row.get(4)?,
        created_at: row.get(5)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn store() -> MemoryStore {
        MemoryStore::new(Connection::open_in_memory().unwrap()).unwrap()
    }

    #[test]
    fn save_then_fetch_round_trips_content() {
        let s = store();
        let out = s.save("Tomas likes coffee", "srv1", Some("u1"), None, 0.5, 0.85, None).unwrap();
        assert_eq!(out.status, SaveStatus::Saved);
        let fetched = s.fetch("srv1", &out.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Tomas likes coffee");
    }

    #[test]
    fn dedup_zero_threshold_never_updates() {
        let s = store();
        let v = vec![1.0f32, 0.0, 0.0];
        let a = s.save("A", "srv1", None, None, 0.5, 0.0, Some(&v)).unwrap();
        let b = s.save("A", "srv1", None, None, 0.5, 0.0, Some(&v)).unwrap();
        assert_eq!(a.status, SaveStatus::Saved);
        assert_eq!(b.status, SaveStatus::Saved);
        assert_ne!(a.id, b.id);
    }

    #[test]
    fn dedup_identical_embedding_above_threshold_is_exists() {
        let s = store();
        let v = vec![1.0f32, 0.0, 0.0];
        let a = s.save("Tomas likes coffee", "srv1", Some("u1"), None, 0.5, 0.85, Some(&v)).unwrap();
        let b = s.save("Tomas likes coffee", "srv1", Some("u1"), None, 0.5, 0.85, Some(&v)).unwrap();
        assert_eq!(b.status, SaveStatus::Exists);
        assert_eq!(b.id, a.id);
    }

    #[test]
    fn dedup_with_longer_elaboration_updates() {
        let s = store();
        let v = vec![1.0f32, 0.0, 0.0];
        let a = s
            .save("Tomas likes coffee", "srv1", Some("u1"), None, 0.5, 0.85, Some(&v))
            .unwrap();
        let b = s
            .save(
                "Tomas likes dark roast coffee, especially Ethiopian",
                "srv1",
                Some("u1"),
                None,
                0.7,
                0.85,
                Some(&v),
            )
            .unwrap();
        assert_eq!(b.status, SaveStatus::Updated);
        assert_eq!(b.id, a.id);
        let fetched = s.fetch("srv1", &a.id).unwrap().unwrap();
        assert_eq!(fetched.content, "Tomas likes dark roast coffee, especially Ethiopian");
        assert!((fetched.importance - 0.7).abs() < 1e-6);
    }

    #[test]
    fn forget_makes_memory_invisible_to_recall() {
        let s = store();
        let out = s.save("secret plan", "srv1", None, None, 0.5, 0.0, None).unwrap();
        s.forget("srv1", &out.id).unwrap();
        let hits = s.recall("secret plan", "srv1", 10, 0.0, None).unwrap();
        assert!(hits.iter().all(|m| m.id != out.id));
    }

    #[test]
    fn forget_unknown_id_is_not_found() {
        let s = store();
        let err = s.forget("srv1", "deadbeef").unwrap_err();
        assert!(matches!(err, MemoryError::NotFound(_)));
    }

    #[test]
    fn cross_tenant_recall_is_isolated() {
        let s = store();
        s.save("srv1 secret", "srv1", None, None, 0.5, 0.0, None).unwrap();
        let hits = s.recall("srv1 secret", "srv2", 10, 0.0, None).unwrap();
        assert!(hits.is_empty());
    }

    #[test]
    fn recall_skips_mismatched_embedding_dimension() {
        let s = store();
        let v3 = vec![1.0f32, 0.0, 0.0];
        s.save("three dims", "srv1", None, None, 0.5, 0.0, Some(&v3)).unwrap();
        let v2 = vec![1.0f32, 0.0];
        // mismatched-length query embedding should not error, dense pass just yields nothing for it
        let hits = s.recall("three dims", "srv1", 10, 0.0, Some(&v2)).unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn like_escaping_matches_literal_percent() {
        let s = store();
        s.save("50% done", "srv1", None, None, 0.5, 0.0, None).unwrap();
        s.save("500 done", "srv1", None, None, 0.5, 0.0, None).unwrap();
        let hits = like_rank(&s.db.lock().unwrap(), "srv1", "50%").unwrap();
        assert_eq!(hits.len(), 1);
    }

    #[test]
    fn recall_by_user_orders_by_importance_then_recency() {
        let s = store();
        let low = s.save("low", "srv1", Some("u1"), None, 0.2, 0.0, None).unwrap();
        let high = s.save("high", "srv1", Some("u1"), None, 0.9, 0.0, None).unwrap();
        let hits = s.recall_by_user("srv1", "u1", 10).unwrap();
        assert_eq!(hits[0].id, high.id);
        assert_eq!(hits[1].id, low.id);
    }
}
