//! SQLite persistence for the concept graph and learned patterns.
//!
//! Separate reader/writer connections behind mutexes so the store is
//! `Send + Sync` and can be shared as `Arc<GraphStore>`. All multi-statement
//! updates run in transactions; the schema is managed by versioned
//! migrations.

use crate::error::{CoreError, CoreResult};
use crate::patterns::{PatternTemplate, RenamePattern};
use crate::types::{Concept, ConceptKind, Range, Relationship, RelationshipKind, SymbolRepresentation};
use rusqlite::{params, Connection, OptionalExtension};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use std::sync::Mutex;
use tracing::debug;

// ---------------------------------------------------------------------------
// Migrations
// ---------------------------------------------------------------------------

struct Migration {
    version: u32,
    up: &'static str,
}

const MIGRATIONS: &[Migration] = &[Migration {
    version: 1,
    up: r#"
CREATE TABLE IF NOT EXISTS concepts (
    id TEXT PRIMARY KEY,
    canonical_name TEXT NOT NULL CHECK (canonical_name <> ''),
    kind TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    metadata TEXT NOT NULL DEFAULT '{}',
    updated_at TEXT NOT NULL
);
CREATE INDEX IF NOT EXISTS idx_concepts_name ON concepts(canonical_name);
CREATE INDEX IF NOT EXISTS idx_concepts_name_lower ON concepts(LOWER(canonical_name));

CREATE TABLE IF NOT EXISTS symbol_representations (
    concept_id TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
    name TEXT NOT NULL,
    uri TEXT NOT NULL,
    start_line INTEGER NOT NULL,
    start_col INTEGER NOT NULL,
    end_line INTEGER NOT NULL,
    end_col INTEGER NOT NULL,
    occurrences INTEGER NOT NULL DEFAULT 1 CHECK (occurrences >= 1),
    context TEXT NOT NULL DEFAULT '',
    stale INTEGER NOT NULL DEFAULT 0,
    UNIQUE (concept_id, uri, start_line, start_col, end_line, end_col)
);
CREATE INDEX IF NOT EXISTS idx_reprs_uri ON symbol_representations(uri);
CREATE INDEX IF NOT EXISTS idx_reprs_concept ON symbol_representations(concept_id);

CREATE TABLE IF NOT EXISTS relationships (
    source TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
    target TEXT NOT NULL REFERENCES concepts(id) ON DELETE CASCADE,
    kind TEXT NOT NULL,
    confidence REAL NOT NULL DEFAULT 0.5,
    metadata TEXT NOT NULL DEFAULT '{}',
    UNIQUE (source, target, kind)
);
CREATE INDEX IF NOT EXISTS idx_rels_source ON relationships(source);
CREATE INDEX IF NOT EXISTS idx_rels_target ON relationships(target);

CREATE TABLE IF NOT EXISTS patterns (
    id TEXT PRIMARY KEY,
    name TEXT NOT NULL,
    template_kind TEXT NOT NULL,
    template_from TEXT NOT NULL,
    template_to TEXT NOT NULL,
    category TEXT NOT NULL,
    occurrences INTEGER NOT NULL DEFAULT 1,
    confidence REAL NOT NULL DEFAULT 0.5,
    last_used TEXT NOT NULL,
    decay_rate REAL NOT NULL DEFAULT 0.02,
    active INTEGER NOT NULL DEFAULT 0
);
"#,
}];

fn apply_migrations(conn: &Connection) -> CoreResult<()> {
    conn.execute(
        "CREATE TABLE IF NOT EXISTS schema_migrations (version INTEGER PRIMARY KEY)",
        [],
    )?;
    let current: u32 = conn
        .query_row("SELECT COALESCE(MAX(version), 0) FROM schema_migrations", [], |r| r.get(0))
        .unwrap_or(0);
    for migration in MIGRATIONS.iter().filter(|m| m.version > current) {
        let tx = conn.unchecked_transaction()?;
        tx.execute_batch(migration.up)?;
        tx.execute("INSERT INTO schema_migrations (version) VALUES (?1)", [migration.version])?;
        tx.commit()?;
        debug!(version = migration.version, "schema migration applied");
    }
    Ok(())
}

fn configure_connection(conn: &Connection) -> CoreResult<()> {
    conn.execute_batch(
        "PRAGMA journal_mode = WAL;
         PRAGMA synchronous = NORMAL;
         PRAGMA foreign_keys = ON;
         PRAGMA busy_timeout = 5000;
         PRAGMA temp_store = MEMORY;",
    )?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Export shape
// ---------------------------------------------------------------------------

/// Serializable dump of the observable graph, for export/import round-trips.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GraphExport {
    pub concepts: Vec<Concept>,
    pub representations: Vec<SymbolRepresentation>,
    pub relationships: Vec<Relationship>,
}

// ---------------------------------------------------------------------------
// Store
// ---------------------------------------------------------------------------

/// Shared persistent store. Single writer, concurrent readers.
pub struct GraphStore {
    writer: Mutex<Connection>,
    reader: Mutex<Connection>,
}

impl GraphStore {
    /// Open (or create) the database at `path`, applying migrations.
    pub fn open(path: &Path) -> CoreResult<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let writer = Connection::open(path)?;
        configure_connection(&writer)?;
        apply_migrations(&writer)?;
        let reader = Connection::open(path)?;
        configure_connection(&reader)?;
        Ok(Self { writer: Mutex::new(writer), reader: Mutex::new(reader) })
    }

    /// In-memory store for tests and ephemeral sessions. Uses a uniquely
    /// named shared-cache database so the reader and writer connections see
    /// the same data.
    pub fn open_in_memory() -> CoreResult<Self> {
        use rusqlite::OpenFlags;
        static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
        let n = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let uri = format!("file:ontoscope_mem_{n}?mode=memory&cache=shared");
        let flags = OpenFlags::SQLITE_OPEN_READ_WRITE
            | OpenFlags::SQLITE_OPEN_CREATE
            | OpenFlags::SQLITE_OPEN_URI
            | OpenFlags::SQLITE_OPEN_NO_MUTEX;
        let writer = Connection::open_with_flags(&uri, flags)?;
        writer.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        apply_migrations(&writer)?;
        let reader = Connection::open_with_flags(&uri, flags)?;
        reader.execute_batch("PRAGMA foreign_keys = ON; PRAGMA busy_timeout = 5000;")?;
        Ok(Self { writer: Mutex::new(writer), reader: Mutex::new(reader) })
    }

    fn write(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.writer.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn read(&self) -> std::sync::MutexGuard<'_, Connection> {
        self.reader.lock().unwrap_or_else(|e| e.into_inner())
    }

    // -- concepts -----------------------------------------------------------

    pub fn upsert_concept(&self, concept: &Concept) -> CoreResult<()> {
        if concept.canonical_name.is_empty() {
            return Err(CoreError::InvalidRequest("concept canonicalName must be non-empty".into()));
        }
        let metadata = serde_json::to_string(&concept.metadata)
            .map_err(|e| CoreError::Internal(e.to_string()))?;
        self.write().execute(
            "INSERT INTO concepts (id, canonical_name, kind, confidence, metadata, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6)
             ON CONFLICT(id) DO UPDATE SET
                canonical_name = excluded.canonical_name,
                kind = excluded.kind,
                confidence = excluded.confidence,
                metadata = excluded.metadata,
                updated_at = excluded.updated_at",
            params![
                concept.id,
                concept.canonical_name,
                concept.kind.label(),
                concept.confidence,
                metadata,
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    pub fn get_concept(&self, id: &str) -> CoreResult<Option<Concept>> {
        let conn = self.read();
        let row = conn
            .query_row(
                "SELECT id, canonical_name, kind, confidence, metadata FROM concepts WHERE id = ?1",
                [id],
                row_to_concept,
            )
            .optional()?;
        Ok(row)
    }

    /// Concepts whose canonical name matches exactly or case-insensitively,
    /// with the age in days of their last update.
    pub fn concepts_by_name(&self, name: &str) -> CoreResult<Vec<(Concept, f64)>> {
        let conn = self.read();
        let mut stmt = conn.prepare_cached(
            "SELECT id, canonical_name, kind, confidence, metadata, updated_at
             FROM concepts WHERE LOWER(canonical_name) = LOWER(?1)",
        )?;
        let rows = stmt.query_map([name], |row| {
            let concept = row_to_concept(row)?;
            let updated: String = row.get(5)?;
            Ok((concept, updated))
        })?;
        let now = chrono::Utc::now();
        let mut out = Vec::new();
        for row in rows {
            let (concept, updated) = row?;
            let age_days = chrono::DateTime::parse_from_rfc3339(&updated)
                .map(|t| (now - t.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86_400.0)
                .unwrap_or(0.0);
            out.push((concept, age_days));
        }
        Ok(out)
    }

    /// All `(id, canonical_name, confidence, age_days)` tuples, bounded, for
    /// fuzzy scans.
    pub fn concept_names(&self, limit: usize) -> CoreResult<Vec<(String, String, f64, f64)>> {
        let conn = self.read();
        let mut stmt = conn.prepare_cached(
            "SELECT id, canonical_name, confidence, updated_at FROM concepts
             ORDER BY updated_at DESC LIMIT ?1",
        )?;
        let now = chrono::Utc::now();
        let rows = stmt.query_map([limit as i64], |row| {
            Ok((
                row.get::<_, String>(0)?,
                row.get::<_, String>(1)?,
                row.get::<_, f64>(2)?,
                row.get::<_, String>(3)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (id, name, confidence, updated) = row?;
            let age_days = chrono::DateTime::parse_from_rfc3339(&updated)
                .map(|t| (now - t.with_timezone(&chrono::Utc)).num_seconds() as f64 / 86_400.0)
                .unwrap_or(0.0);
            out.push((id, name, confidence, age_days));
        }
        Ok(out)
    }

    // -- representations ----------------------------------------------------

    pub fn upsert_representation(&self, rep: &SymbolRepresentation) -> CoreResult<()> {
        if self.get_concept(&rep.concept_id)?.is_none() {
            return Err(CoreError::NotFound(format!("concept {}", rep.concept_id)));
        }
        self.write().execute(
            "INSERT INTO symbol_representations
                (concept_id, name, uri, start_line, start_col, end_line, end_col, occurrences, context)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
             ON CONFLICT(concept_id, uri, start_line, start_col, end_line, end_col)
             DO UPDATE SET occurrences = excluded.occurrences, context = excluded.context, stale = 0",
            params![
                rep.concept_id,
                rep.name,
                rep.location.uri(),
                rep.location.start.line,
                rep.location.start.col,
                rep.location.end.line,
                rep.location.end.col,
                rep.occurrences.max(1),
                rep.context,
            ],
        )?;
        Ok(())
    }

    /// Atomically replace every representation of `concept_id` within `uri`:
    /// stale rows for that pair are deleted in the same transaction.
    pub fn replace_representations(
        &self,
        concept_id: &str,
        uri: &str,
        reps: &[SymbolRepresentation],
    ) -> CoreResult<()> {
        let conn = self.write();
        let tx = conn.unchecked_transaction()?;
        tx.execute(
            "DELETE FROM symbol_representations WHERE concept_id = ?1 AND uri = ?2",
            params![concept_id, uri],
        )?;
        for rep in reps {
            tx.execute(
                "INSERT INTO symbol_representations
                    (concept_id, name, uri, start_line, start_col, end_line, end_col, occurrences, context)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                params![
                    concept_id,
                    rep.name,
                    uri,
                    rep.location.start.line,
                    rep.location.start.col,
                    rep.location.end.line,
                    rep.location.end.col,
                    rep.occurrences.max(1),
                    rep.context,
                ],
            )?;
        }
        tx.commit()?;
        Ok(())
    }

    pub fn representations_of(&self, concept_id: &str) -> CoreResult<Vec<SymbolRepresentation>> {
        let conn = self.read();
        let mut stmt = conn.prepare_cached(
            "SELECT concept_id, name, uri, start_line, start_col, end_line, end_col, occurrences, context
             FROM symbol_representations WHERE concept_id = ?1 AND stale = 0",
        )?;
        let rows = stmt.query_map([concept_id], row_to_representation)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Mark every representation in `uri` stale (file changed; pending reparse).
    pub fn mark_stale(&self, uri: &str) -> CoreResult<usize> {
        let n = self
            .write()
            .execute("UPDATE symbol_representations SET stale = 1 WHERE uri = ?1", [uri])?;
        Ok(n)
    }

    pub fn delete_representations_for_uri(&self, uri: &str) -> CoreResult<usize> {
        let n = self
            .write()
            .execute("DELETE FROM symbol_representations WHERE uri = ?1", [uri])?;
        Ok(n)
    }

    /// Concepts with a representation within `window` lines of the location.
    pub fn concepts_near(&self, uri: &str, line: u32, window: u32) -> CoreResult<Vec<Concept>> {
        let lo = line.saturating_sub(window);
        let hi = line + window;
        let conn = self.read();
        let mut stmt = conn.prepare_cached(
            "SELECT DISTINCT c.id, c.canonical_name, c.kind, c.confidence, c.metadata
             FROM concepts c
             JOIN symbol_representations r ON r.concept_id = c.id
             WHERE r.uri = ?1 AND r.stale = 0 AND r.start_line BETWEEN ?2 AND ?3",
        )?;
        let rows = stmt.query_map(params![uri, lo, hi], row_to_concept)?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    // -- relationships ------------------------------------------------------

    /// Create or update an edge. Self-loops are rejected except `contains`.
    pub fn link(
        &self,
        source: &str,
        target: &str,
        kind: RelationshipKind,
        confidence: f64,
    ) -> CoreResult<()> {
        if source == target && kind != RelationshipKind::Contains {
            return Err(CoreError::InvalidRequest(format!(
                "self-loop {source} -> {target} only valid for contains"
            )));
        }
        self.write().execute(
            "INSERT INTO relationships (source, target, kind, confidence)
             VALUES (?1, ?2, ?3, ?4)
             ON CONFLICT(source, target, kind) DO UPDATE SET confidence = excluded.confidence",
            params![source, target, kind.label(), confidence],
        )?;
        Ok(())
    }

    /// Outgoing and incoming edges of a concept, optionally filtered by kind.
    pub fn edges_of(
        &self,
        concept_id: &str,
        kind: Option<RelationshipKind>,
    ) -> CoreResult<Vec<Relationship>> {
        let conn = self.read();
        let mut stmt = conn.prepare_cached(
            "SELECT source, target, kind, confidence, metadata FROM relationships
             WHERE source = ?1 OR target = ?1",
        )?;
        let rows = stmt.query_map([concept_id], row_to_relationship)?;
        let mut out = Vec::new();
        for row in rows {
            let rel = row?;
            if kind.map(|k| rel.kind == k).unwrap_or(true) {
                out.push(rel);
            }
        }
        Ok(out)
    }

    // -- patterns -----------------------------------------------------------

    pub fn save_pattern(&self, pattern: &RenamePattern) -> CoreResult<()> {
        let (kind, from, to) = pattern.template.parts();
        self.write().execute(
            "INSERT INTO patterns
                (id, name, template_kind, template_from, template_to, category,
                 occurrences, confidence, last_used, decay_rate, active)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)
             ON CONFLICT(id) DO UPDATE SET
                occurrences = excluded.occurrences,
                confidence = excluded.confidence,
                last_used = excluded.last_used,
                active = excluded.active",
            params![
                pattern.id,
                pattern.name,
                kind,
                from,
                to,
                pattern.category,
                pattern.occurrences,
                pattern.confidence,
                pattern.last_used.to_rfc3339(),
                pattern.decay_rate,
                pattern.active as i64,
            ],
        )?;
        Ok(())
    }

    pub fn load_patterns(&self) -> CoreResult<Vec<RenamePattern>> {
        let conn = self.read();
        let mut stmt = conn.prepare_cached(
            "SELECT id, name, template_kind, template_from, template_to, category,
                    occurrences, confidence, last_used, decay_rate, active
             FROM patterns ORDER BY confidence DESC",
        )?;
        let rows = stmt.query_map([], |row| {
            let kind: String = row.get(2)?;
            let from: String = row.get(3)?;
            let to: String = row.get(4)?;
            let last_used: String = row.get(8)?;
            Ok(RenamePattern {
                id: row.get(0)?,
                name: row.get(1)?,
                template: PatternTemplate::from_parts(&kind, &from, &to),
                category: row.get(5)?,
                occurrences: row.get(6)?,
                confidence: row.get(7)?,
                last_used: chrono::DateTime::parse_from_rfc3339(&last_used)
                    .map(|t| t.with_timezone(&chrono::Utc))
                    .unwrap_or_else(|_| chrono::Utc::now()),
                decay_rate: row.get(9)?,
                active: row.get::<_, i64>(10)? != 0,
            })
        })?;
        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    pub fn delete_pattern(&self, id: &str) -> CoreResult<()> {
        self.write().execute("DELETE FROM patterns WHERE id = ?1", [id])?;
        Ok(())
    }

    // -- export / import ----------------------------------------------------

    pub fn export_graph(&self) -> CoreResult<GraphExport> {
        let conn = self.read();
        let mut out = GraphExport::default();

        let mut stmt = conn.prepare_cached(
            "SELECT id, canonical_name, kind, confidence, metadata FROM concepts ORDER BY id",
        )?;
        let rows = stmt.query_map([], row_to_concept)?;
        for row in rows {
            out.concepts.push(row?);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT concept_id, name, uri, start_line, start_col, end_line, end_col, occurrences, context
             FROM symbol_representations ORDER BY concept_id, uri, start_line",
        )?;
        let rows = stmt.query_map([], row_to_representation)?;
        for row in rows {
            out.representations.push(row?);
        }

        let mut stmt = conn.prepare_cached(
            "SELECT source, target, kind, confidence, metadata FROM relationships
             ORDER BY source, target, kind",
        )?;
        let rows = stmt.query_map([], row_to_relationship)?;
        for row in rows {
            out.relationships.push(row?);
        }
        Ok(out)
    }

    /// Import a previously exported graph. Importing an export of the same
    /// store is a no-op on the observable set.
    pub fn import_graph(&self, export: &GraphExport) -> CoreResult<()> {
        for concept in &export.concepts {
            self.upsert_concept(concept)?;
        }
        for rep in &export.representations {
            self.upsert_representation(rep)?;
        }
        for rel in &export.relationships {
            self.link(&rel.source, &rel.target, rel.kind, rel.confidence)?;
        }
        Ok(())
    }

    pub fn counts(&self) -> CoreResult<(usize, usize, usize)> {
        let conn = self.read();
        let concepts: i64 = conn.query_row("SELECT COUNT(*) FROM concepts", [], |r| r.get(0))?;
        let reps: i64 =
            conn.query_row("SELECT COUNT(*) FROM symbol_representations", [], |r| r.get(0))?;
        let rels: i64 = conn.query_row("SELECT COUNT(*) FROM relationships", [], |r| r.get(0))?;
        Ok((concepts as usize, reps as usize, rels as usize))
    }
}

// ---------------------------------------------------------------------------
// Row mappers
// ---------------------------------------------------------------------------

fn row_to_concept(row: &rusqlite::Row<'_>) -> rusqlite::Result<Concept> {
    let kind: String = row.get(2)?;
    let metadata: String = row.get(4)?;
    Ok(Concept {
        id: row.get(0)?,
        canonical_name: row.get(1)?,
        kind: ConceptKind::parse(&kind).unwrap_or(ConceptKind::Variable),
        confidence: row.get(3)?,
        metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata).unwrap_or_default(),
    })
}

fn row_to_representation(row: &rusqlite::Row<'_>) -> rusqlite::Result<SymbolRepresentation> {
    let uri: String = row.get(2)?;
    let start_line: u32 = row.get(3)?;
    let start_col: u32 = row.get(4)?;
    let end_line: u32 = row.get(5)?;
    let end_col: u32 = row.get(6)?;
    Ok(SymbolRepresentation {
        concept_id: row.get(0)?,
        name: row.get(1)?,
        location: Range {
            start: crate::types::Location::new(uri.clone(), start_line, start_col),
            end: crate::types::Location::new(uri, end_line, end_col),
        },
        occurrences: row.get(7)?,
        context: row.get(8)?,
    })
}

fn row_to_relationship(row: &rusqlite::Row<'_>) -> rusqlite::Result<Relationship> {
    let kind: String = row.get(2)?;
    let metadata: String = row.get(4)?;
    Ok(Relationship {
        source: row.get(0)?,
        target: row.get(1)?,
        kind: RelationshipKind::parse(&kind).unwrap_or(RelationshipKind::Uses),
        confidence: row.get(3)?,
        metadata: serde_json::from_str::<BTreeMap<String, String>>(&metadata).unwrap_or_default(),
    })
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
