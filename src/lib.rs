//! Segue - Conversation routing core for multi-tenant SMS outreach
//!
//! Deterministic state tracking, environment routing, and ownership
//! handoffs for one shared phone number serving many reps.
//!
//! # Overview
//!
//! Segue keeps every SMS conversation on a walk through a fixed state
//! tree, routes each inbound message back to the (rep, campaign)
//! environment that last verifiably wrote to that phone, and records
//! every change of card ownership as an immutable audit event.
//!
//! # Pieces
//!
//! | Module | Purpose |
//! |--------|---------|
//! | `tree` | State tree and the ordered transition rules |
//! | `environment` | Phone -> environment resolution, "last confirmed writer wins" |
//! | `assignments` | Card -> rep ownership registry with sticky terminal statuses |
//! | `handoffs` | Reassignment, claim, reconcile, and deletion protocols |
//! | `pipeline` | Inbound classify-and-transition, outbound send recording |
//! | `db` | SQLite storage, pooling, atomic transition units |
//!
//! # Quick Start
//!
//! ```no_run
//! use segue::{pipeline, tree::Intent, Database};
//!
//! let db = Database::new("segue.db").unwrap();
//!
//! // Record the carrier-confirmed outbound that opens the conversation
//! pipeline::record_outbound(
//!     &db, "+15551234567", "hey, quick question", Some("rep_42"),
//!     Some("greek"), None, Some("SM123"),
//! ).unwrap();
//!
//! // An inbound reply routes to rep_42's environment and transitions state
//! let classifier = |_text: &str, _history: &[String]| -> segue::Result<Intent> {
//!     Ok(Intent::category("interest"))
//! };
//! let out = pipeline::process_inbound(&db, "+15551234567", "sure, what's up", &classifier).unwrap();
//! println!("{} -> {}", out.previous_state, out.next_state);
//! ```

pub mod assignments;
pub mod config;
pub mod db;
pub mod environment;
pub mod error;
pub mod handoffs;
pub mod pipeline;
pub mod schema;
pub mod tree;

pub use assignments::AssignmentStatus;
pub use config::Config;
pub use db::{
    Card, CardAssignment, Conversation, Database, HandoffEvent, MessageEvent, NewMessageEvent,
    TransitionOutcome, CURRENT_SCHEMA,
};
pub use environment::{environment_id, normalize_phone, RoutedEnvironment};
pub use error::{Error, Result};
pub use handoffs::HandoffReason;
pub use pipeline::{Classifier, InboundOutcome, OutboundRecord};
pub use tree::{Intent, DEAD_STATE, ROOT_STATE};
