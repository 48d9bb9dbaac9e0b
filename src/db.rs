//! SQLite storage with Diesel ORM
//!
//! One row per phone in `conversations` is the critical shared resource:
//! every read-modify-write of conversation state runs inside an immediate
//! transaction so overlapping deliveries for the same phone serialize
//! instead of racing. `message_events` and `handoff_events` are append-only.

use std::path::Path;

use diesel::connection::SimpleConnection;
use diesel::prelude::*;
use diesel::r2d2::{ConnectionManager, CustomizeConnection, Pool, PooledConnection};
use diesel::sqlite::SqliteConnection;
use uuid::Uuid;

use crate::error::{Error, Result};
use crate::schema::*;
use crate::tree::{self, Intent};

/// Current schema version for segue
pub const CURRENT_SCHEMA: RoutingSchema = RoutingSchema {
    major: 1,
    minor: 0,
    patch: 0,
    name: "conversation-routing",
    features: &[
        "conversations",
        "message_events",
        "handoff_events",
        "card_assignments",
        "cards",
    ],
};

/// Describes the version and capabilities of the schema
#[derive(Debug, Clone)]
pub struct RoutingSchema {
    pub major: u32,
    pub minor: u32,
    pub patch: u32,
    pub name: &'static str,
    pub features: &'static [&'static str],
}

impl RoutingSchema {
    pub fn version_string(&self) -> String {
        format!("{}.{}.{}", self.major, self.minor, self.patch)
    }

    pub fn is_compatible_with(&self, other: &RoutingSchema) -> bool {
        self.major == other.major
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(&feature)
    }
}

impl std::fmt::Display for RoutingSchema {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "v{} ({})", self.version_string(), self.name)
    }
}

/// RFC 3339 UTC timestamp for TEXT columns.
pub(crate) fn now_utc() -> String {
    chrono::Utc::now().to_rfc3339()
}

// ============================================================================
// Diesel Models
// ============================================================================

/// Insertable schema version
#[derive(Insertable)]
#[diesel(table_name = schema_versions)]
pub struct NewSchemaVersion<'a> {
    pub version: &'a str,
    pub name: &'a str,
    pub features: &'a str,
    pub introduced_at: &'a str,
}

/// Queryable schema version
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = schema_versions)]
pub struct StoredSchema {
    pub id: i32,
    pub version: String,
    pub name: String,
    pub features: String,
    pub introduced_at: String,
}

/// Insertable card
#[derive(Insertable)]
#[diesel(table_name = cards)]
pub struct NewCard<'a> {
    pub id: &'a str,
    pub card_data: &'a str,
    pub created_at: &'a str,
}

/// Queryable card: an opaque contact/entity record. Segue only reads the
/// JSON blob for campaign-inference signals; field semantics live elsewhere.
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = cards)]
pub struct Card {
    pub id: String,
    pub card_data: String,
    pub created_at: String,
}

impl Card {
    /// Parsed card data blob; empty object when the stored JSON is corrupt.
    pub fn data(&self) -> serde_json::Value {
        serde_json::from_str(&self.card_data).unwrap_or_else(|_| serde_json::json!({}))
    }
}

/// Insertable conversation record
#[derive(Insertable)]
#[diesel(table_name = conversations)]
pub struct NewConversation<'a> {
    pub phone: &'a str,
    pub card_id: Option<&'a str>,
    pub state: &'a str,
    pub rep_user_id: Option<&'a str>,
    pub environment_id: Option<&'a str>,
    pub history: &'a str,
    pub last_outbound_at: Option<&'a str>,
    pub last_inbound_at: Option<&'a str>,
    pub created_at: &'a str,
    pub updated_at: &'a str,
}

/// Queryable conversation record: the single active conversation for a
/// phone number. `rep_user_id` NULL means the platform owner holds it.
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = conversations)]
pub struct Conversation {
    pub id: i32,
    pub phone: String,
    pub card_id: Option<String>,
    pub state: String,
    pub rep_user_id: Option<String>,
    pub environment_id: Option<String>,
    pub history: String,
    pub last_outbound_at: Option<String>,
    pub last_inbound_at: Option<String>,
    pub created_at: String,
    pub updated_at: String,
}

impl Conversation {
    /// Ordered message history; empty when the stored JSON is corrupt.
    pub fn messages(&self) -> Vec<String> {
        serde_json::from_str(&self.history).unwrap_or_default()
    }
}

/// Insertable transport event
#[derive(Insertable)]
#[diesel(table_name = message_events)]
pub struct NewMessageEvent<'a> {
    pub phone: &'a str,
    pub environment_id: &'a str,
    pub rep_id: Option<&'a str>,
    pub campaign_id: Option<&'a str>,
    pub direction: &'a str,
    pub confirmation_id: Option<&'a str>,
    pub state: Option<&'a str>,
    pub body: &'a str,
    pub sent_at: &'a str,
}

/// Queryable transport event. Only outbound rows with a non-null
/// `confirmation_id` count as confirmed sends for routing purposes.
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = message_events)]
pub struct MessageEvent {
    pub id: i32,
    pub phone: String,
    pub environment_id: String,
    pub rep_id: Option<String>,
    pub campaign_id: Option<String>,
    pub direction: String,
    pub confirmation_id: Option<String>,
    pub state: Option<String>,
    pub body: String,
    pub sent_at: String,
}

/// Insertable handoff audit row
#[derive(Insertable)]
#[diesel(table_name = handoff_events)]
pub struct NewHandoffEvent<'a> {
    pub card_id: &'a str,
    pub from_rep: Option<&'a str>,
    pub to_rep: Option<&'a str>,
    pub reason: &'a str,
    pub state_before: Option<&'a str>,
    pub state_after: Option<&'a str>,
    pub assigned_by: &'a str,
    pub created_at: &'a str,
}

/// Queryable handoff audit row. Immutable once written; `to_rep` NULL
/// signals deletion, not "no owner".
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = handoff_events)]
pub struct HandoffEvent {
    pub id: i32,
    pub card_id: String,
    pub from_rep: Option<String>,
    pub to_rep: Option<String>,
    pub reason: String,
    pub state_before: Option<String>,
    pub state_after: Option<String>,
    pub assigned_by: String,
    pub created_at: String,
}

/// Queryable card assignment row
#[derive(Queryable, Selectable, Debug, Clone, serde::Serialize)]
#[diesel(table_name = card_assignments)]
pub struct CardAssignment {
    pub id: i32,
    pub card_id: String,
    pub user_id: String,
    pub status: String,
    pub assigned_by: String,
    pub assigned_at: String,
    pub notes: Option<String>,
}

/// Outcome of an atomic conversation transition.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TransitionOutcome {
    pub conversation_id: i32,
    pub previous_state: String,
    pub next_state: String,
}

// ============================================================================
// Database Connection
// ============================================================================

type DbPool = Pool<ConnectionManager<SqliteConnection>>;
pub(crate) type DbConn = PooledConnection<ConnectionManager<SqliteConnection>>;

/// Per-connection pragmas: WAL for concurrent readers, enforced foreign
/// keys for the card -> conversation cascade, and a busy timeout so
/// concurrent writers queue instead of failing fast.
#[derive(Debug)]
struct ConnectionPragmas;

impl CustomizeConnection<SqliteConnection, diesel::r2d2::Error> for ConnectionPragmas {
    fn on_acquire(&self, conn: &mut SqliteConnection) -> std::result::Result<(), diesel::r2d2::Error> {
        conn.batch_execute(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .map_err(diesel::r2d2::Error::QueryError)
    }
}

/// Database connection wrapper with connection pool
pub struct Database {
    pool: DbPool,
}

impl Database {
    /// Create a new database at a custom path
    pub fn new(path: &str) -> Result<Self> {
        Self::open_at(path)
    }

    /// Open database at the path from the environment (`SEGUE_DB_PATH`),
    /// falling back to `./segue.db`.
    pub fn open() -> Result<Self> {
        let path = std::env::var("SEGUE_DB_PATH").unwrap_or_else(|_| "segue.db".to_string());
        Self::open_at(&path)
    }

    /// Open database at the path a [`Config`](crate::config::Config)
    /// resolves to.
    pub fn open_with_config(config: &crate::config::Config) -> Result<Self> {
        Self::open_at(config.db_path())
    }

    /// Open database at specified path
    pub fn open_at<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() && !parent.exists() {
                std::fs::create_dir_all(parent).ok();
            }
        }
        Self::build(&path_str, 5)
    }

    /// In-memory database for tests. Pool size 1: each in-memory
    /// connection would otherwise be its own separate database.
    pub fn open_in_memory() -> Result<Self> {
        Self::build(":memory:", 1)
    }

    fn build(database_url: &str, max_size: u32) -> Result<Self> {
        let manager = ConnectionManager::<SqliteConnection>::new(database_url);
        let pool = Pool::builder()
            .max_size(max_size)
            .connection_customizer(Box::new(ConnectionPragmas))
            .build(manager)
            .map_err(|e| Error::Connection(e.to_string()))?;

        let db = Self { pool };
        db.init_schema()?;
        Ok(db)
    }

    pub(crate) fn get_conn(&self) -> Result<DbConn> {
        self.pool
            .get()
            .map_err(|e| Error::Connection(e.to_string()))
    }

    fn init_schema(&self) -> Result<()> {
        let mut conn = self.get_conn()?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS schema_versions (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                version TEXT NOT NULL UNIQUE,
                name TEXT NOT NULL,
                features TEXT NOT NULL,
                introduced_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS cards (
                id TEXT PRIMARY KEY NOT NULL,
                card_data TEXT NOT NULL DEFAULT '{}',
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS conversations (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                phone TEXT NOT NULL UNIQUE,
                card_id TEXT,
                state TEXT NOT NULL DEFAULT 'initial_outreach',
                rep_user_id TEXT,
                environment_id TEXT,
                history TEXT NOT NULL DEFAULT '[]',
                last_outbound_at TEXT,
                last_inbound_at TEXT,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                FOREIGN KEY (card_id) REFERENCES cards(id) ON DELETE CASCADE
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS message_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                phone TEXT NOT NULL,
                environment_id TEXT NOT NULL,
                rep_id TEXT,
                campaign_id TEXT,
                direction TEXT NOT NULL,
                confirmation_id TEXT,
                state TEXT,
                body TEXT NOT NULL DEFAULT '',
                sent_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS handoff_events (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                card_id TEXT NOT NULL,
                from_rep TEXT,
                to_rep TEXT,
                reason TEXT NOT NULL,
                state_before TEXT,
                state_after TEXT,
                assigned_by TEXT NOT NULL,
                created_at TEXT NOT NULL
            )
        "#,
        )
        .execute(&mut conn)?;

        diesel::sql_query(
            r#"
            CREATE TABLE IF NOT EXISTS card_assignments (
                id INTEGER PRIMARY KEY AUTOINCREMENT NOT NULL,
                card_id TEXT NOT NULL,
                user_id TEXT NOT NULL,
                status TEXT NOT NULL DEFAULT 'assigned',
                assigned_by TEXT NOT NULL,
                assigned_at TEXT NOT NULL,
                notes TEXT,
                FOREIGN KEY (card_id) REFERENCES cards(id),
                UNIQUE(card_id, user_id)
            )
        "#,
        )
        .execute(&mut conn)?;

        // Create indexes
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_conversations_card ON conversations(card_id)")
            .execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_events_phone_sent ON message_events(phone, sent_at)")
            .execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_events_direction ON message_events(direction)")
            .execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_handoffs_card ON handoff_events(card_id)")
            .execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assignments_card ON card_assignments(card_id)")
            .execute(&mut conn)?;
        diesel::sql_query("CREATE INDEX IF NOT EXISTS idx_assignments_user ON card_assignments(user_id)")
            .execute(&mut conn)?;

        // Register current schema on the connection already held; the
        // in-memory pool has exactly one, so checking out a second here
        // would deadlock.
        Self::register_schema(&mut conn, &CURRENT_SCHEMA)?;
        Ok(())
    }

    fn register_schema(conn: &mut SqliteConnection, schema: &RoutingSchema) -> Result<()> {
        let now = now_utc();
        let version = schema.version_string();
        let features_json = serde_json::to_string(&schema.features)?;

        let new_schema = NewSchemaVersion {
            version: &version,
            name: schema.name,
            features: &features_json,
            introduced_at: &now,
        };

        diesel::insert_or_ignore_into(schema_versions::table)
            .values(&new_schema)
            .execute(conn)?;

        Ok(())
    }

    // ========================================================================
    // Card Operations
    // ========================================================================

    /// Store a new card with a generated id. The blob is opaque to this
    /// crate apart from campaign-inference signals.
    pub fn create_card(&self, card_data: &serde_json::Value) -> Result<String> {
        let id = Uuid::new_v4().to_string();
        self.create_card_with_id(&id, card_data)?;
        Ok(id)
    }

    /// Store a new card under a caller-chosen id.
    pub fn create_card_with_id(&self, id: &str, card_data: &serde_json::Value) -> Result<()> {
        let mut conn = self.get_conn()?;
        let now = now_utc();
        let blob = serde_json::to_string(card_data)?;

        let new_card = NewCard {
            id,
            card_data: &blob,
            created_at: &now,
        };

        diesel::insert_into(cards::table)
            .values(&new_card)
            .execute(&mut conn)?;
        Ok(())
    }

    /// Fetch a card by id.
    pub fn get_card(&self, card_id: &str) -> Result<Option<Card>> {
        let mut conn = self.get_conn()?;
        get_card_in(&mut conn, card_id)
    }

    // ========================================================================
    // Conversation Operations
    // ========================================================================

    /// The active conversation for a phone, if one exists.
    pub fn conversation_for_phone(&self, phone: &str) -> Result<Option<Conversation>> {
        let mut conn = self.get_conn()?;
        conversation_for_phone_in(&mut conn, phone)
    }

    /// All conversations linked to a card.
    pub fn conversations_for_card(&self, card_id: &str) -> Result<Vec<Conversation>> {
        let mut conn = self.get_conn()?;
        let rows = conversations::table
            .filter(conversations::card_id.eq(card_id))
            .order(conversations::updated_at.desc())
            .load::<Conversation>(&mut conn)?;
        Ok(rows)
    }

    /// Create the conversation row for a phone if none exists, stamping the
    /// supplied routing context. An existing row is returned untouched
    /// except that missing environment/owner fields are backfilled;
    /// an established environment is never overridden.
    pub fn ensure_conversation(
        &self,
        phone: &str,
        environment_id: Option<&str>,
        rep_id: Option<&str>,
        card_id: Option<&str>,
    ) -> Result<Conversation> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction(|conn| {
            ensure_conversation_in(conn, phone, environment_id, rep_id, card_id)
        })
    }

    /// Atomic per-phone state transition: read the stored state, normalize,
    /// run the transition rules, and persist the result plus message history
    /// in one immediate transaction. Concurrent deliveries for the same
    /// phone serialize on the SQLite write lock.
    pub fn apply_transition(
        &self,
        phone: &str,
        intent: &Intent,
        inbound_text: Option<&str>,
    ) -> Result<TransitionOutcome> {
        let mut conn = self.get_conn()?;
        conn.immediate_transaction(|conn| apply_transition_in(conn, phone, intent, inbound_text))
    }

    // ========================================================================
    // Transport Event Operations
    // ========================================================================

    /// Append a transport event. Append-only: rows are never updated.
    pub fn record_message_event(&self, event: &NewMessageEvent<'_>) -> Result<i32> {
        let mut conn = self.get_conn()?;
        record_message_event_in(&mut conn, event)
    }

    /// Transport events for a phone, oldest first.
    pub fn message_events_for_phone(&self, phone: &str) -> Result<Vec<MessageEvent>> {
        let mut conn = self.get_conn()?;
        let rows = message_events::table
            .filter(message_events::phone.eq(phone))
            .order(message_events::sent_at.asc())
            .load::<MessageEvent>(&mut conn)?;
        Ok(rows)
    }
}

// ============================================================================
// In-transaction helpers
//
// Free functions over a borrowed connection so the handoff and pipeline
// modules can compose them inside a single immediate transaction.
// ============================================================================

pub(crate) fn get_card_in(conn: &mut SqliteConnection, card_id: &str) -> Result<Option<Card>> {
    let row = cards::table
        .filter(cards::id.eq(card_id))
        .first::<Card>(conn)
        .optional()?;
    Ok(row)
}

pub(crate) fn conversation_for_phone_in(
    conn: &mut SqliteConnection,
    phone: &str,
) -> Result<Option<Conversation>> {
    let row = conversations::table
        .filter(conversations::phone.eq(phone))
        .first::<Conversation>(conn)
        .optional()?;
    Ok(row)
}

pub(crate) fn ensure_conversation_in(
    conn: &mut SqliteConnection,
    phone: &str,
    environment_id: Option<&str>,
    rep_id: Option<&str>,
    card_id: Option<&str>,
) -> Result<Conversation> {
    if let Some(existing) = conversation_for_phone_in(conn, phone)? {
        // Backfill only what is missing; never override an established
        // environment or owner.
        let fill_env = existing.environment_id.is_none() && environment_id.is_some();
        let fill_rep = existing.rep_user_id.is_none() && rep_id.is_some();
        let fill_card = existing.card_id.is_none() && card_id.is_some();
        if fill_env || fill_rep || fill_card {
            let now = now_utc();
            diesel::update(conversations::table.filter(conversations::id.eq(existing.id)))
                .set((
                    conversations::environment_id
                        .eq(existing.environment_id.as_deref().or(environment_id)),
                    conversations::rep_user_id.eq(existing.rep_user_id.as_deref().or(rep_id)),
                    conversations::card_id.eq(existing.card_id.as_deref().or(card_id)),
                    conversations::updated_at.eq(&now),
                ))
                .execute(conn)?;
            return conversation_for_phone_in(conn, phone)?
                .ok_or_else(|| Error::Validation {
                    field: "phone",
                    value: phone.to_string(),
                });
        }
        return Ok(existing);
    }

    let now = now_utc();
    let new_row = NewConversation {
        phone,
        card_id,
        state: tree::ROOT_STATE,
        rep_user_id: rep_id,
        environment_id,
        history: "[]",
        last_outbound_at: None,
        last_inbound_at: None,
        created_at: &now,
        updated_at: &now,
    };
    diesel::insert_into(conversations::table)
        .values(&new_row)
        .execute(conn)?;

    conversation_for_phone_in(conn, phone)?.ok_or_else(|| Error::Validation {
        field: "phone",
        value: phone.to_string(),
    })
}

pub(crate) fn apply_transition_in(
    conn: &mut SqliteConnection,
    phone: &str,
    intent: &Intent,
    inbound_text: Option<&str>,
) -> Result<TransitionOutcome> {
    let convo = ensure_conversation_in(conn, phone, None, None, None)?;

    let previous_state = tree::normalize(Some(&convo.state)).to_string();
    let next_state = tree::transition(&previous_state, intent);

    let now = now_utc();
    let mut messages = convo.messages();
    if let Some(text) = inbound_text {
        messages.push(text.to_string());
    }
    let history = serde_json::to_string(&messages)?;

    let last_inbound = if inbound_text.is_some() {
        Some(now.as_str())
    } else {
        convo.last_inbound_at.as_deref()
    };

    diesel::update(conversations::table.filter(conversations::id.eq(convo.id)))
        .set((
            conversations::state.eq(&next_state),
            conversations::history.eq(&history),
            conversations::last_inbound_at.eq(last_inbound),
            conversations::updated_at.eq(&now),
        ))
        .execute(conn)?;

    Ok(TransitionOutcome {
        conversation_id: convo.id,
        previous_state,
        next_state,
    })
}

pub(crate) fn record_message_event_in(
    conn: &mut SqliteConnection,
    event: &NewMessageEvent<'_>,
) -> Result<i32> {
    diesel::insert_into(message_events::table)
        .values(event)
        .execute(conn)?;

    let id: i32 =
        diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(conn)?;
    Ok(id)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn test_db() -> Database {
        Database::open_in_memory().expect("in-memory db")
    }

    #[test]
    fn schema_registers_once() {
        let db = test_db();
        // Re-running init is idempotent
        db.init_schema().expect("re-init");
        assert!(CURRENT_SCHEMA.has_feature("handoff_events"));
        assert!(CURRENT_SCHEMA.is_compatible_with(&CURRENT_SCHEMA));
    }

    #[test]
    fn in_memory_open_registers_schema_on_its_single_connection() {
        // The in-memory pool holds exactly one connection; opening must
        // complete schema init and registration without checking out a
        // second one.
        let db = test_db();
        let mut conn = db.get_conn().unwrap();
        let stored = schema_versions::table
            .load::<StoredSchema>(&mut conn)
            .unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].version, CURRENT_SCHEMA.version_string());
    }

    #[test]
    fn conversation_is_unique_per_phone() {
        let db = test_db();
        let a = db.ensure_conversation("5551230001", None, None, None).unwrap();
        let b = db.ensure_conversation("5551230001", None, None, None).unwrap();
        assert_eq!(a.id, b.id);
        assert_eq!(a.state, tree::ROOT_STATE);
    }

    #[test]
    fn ensure_backfills_but_never_overrides() {
        let db = test_db();
        db.ensure_conversation("5551230002", Some("env_a"), Some("rep1"), None)
            .unwrap();
        let convo = db
            .ensure_conversation("5551230002", Some("env_b"), Some("rep2"), None)
            .unwrap();
        assert_eq!(convo.environment_id.as_deref(), Some("env_a"));
        assert_eq!(convo.rep_user_id.as_deref(), Some("rep1"));
    }

    #[test]
    fn transition_normalizes_corrupt_state() {
        let db = test_db();
        let convo = db.ensure_conversation("5551230003", None, None, None).unwrap();
        {
            let mut conn = db.get_conn().unwrap();
            diesel::update(conversations::table.filter(conversations::id.eq(convo.id)))
                .set(conversations::state.eq("garbage_state"))
                .execute(&mut conn)
                .unwrap();
        }
        let outcome = db
            .apply_transition("5551230003", &Intent::category("interest"), Some("hi"))
            .unwrap();
        assert_eq!(outcome.previous_state, tree::ROOT_STATE);
        assert_eq!(outcome.next_state, "interest");
    }

    #[test]
    fn transition_appends_history_and_stamps_inbound() {
        let db = test_db();
        db.ensure_conversation("5551230004", None, None, None).unwrap();
        db.apply_transition("5551230004", &Intent::default(), Some("first"))
            .unwrap();
        db.apply_transition("5551230004", &Intent::default(), Some("second"))
            .unwrap();

        let convo = db.conversation_for_phone("5551230004").unwrap().unwrap();
        assert_eq!(convo.messages(), vec!["first", "second"]);
        assert!(convo.last_inbound_at.is_some());
        assert!(convo.last_outbound_at.is_none());
    }

    #[test]
    fn card_blob_round_trips() {
        let db = test_db();
        let id = db
            .create_card(&serde_json::json!({"fraternity": "SAE", "chapter": "MD-Beta"}))
            .unwrap();
        let card = db.get_card(&id).unwrap().unwrap();
        assert_eq!(card.data()["fraternity"], "SAE");
        assert!(db.get_card("missing").unwrap().is_none());
    }
}
