//! Card handoff protocols
//!
//! A handoff is any event that changes (or destroys) who works a card:
//! reassignment between reps, a rep claiming an unworked blast card,
//! reconciling a runtime owner that drifted from the registry, and card
//! deletion. Every protocol runs as one immediate transaction and appends
//! an immutable `handoff_events` audit row; the table deliberately has no
//! foreign key on `card_id` so history survives the card it describes.

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use tracing::{info, warn};

use crate::assignments;
use crate::db::{self, now_utc, Database, HandoffEvent, NewHandoffEvent};
use crate::environment;
use crate::error::{Error, Result};
use crate::schema::{card_assignments, cards, conversations, handoff_events};
use crate::tree;

/// Why a handoff happened. Stored as its snake_case string in the audit
/// row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandoffReason {
    /// Ownership moved from one rep to another.
    RepReassign,
    /// The card was deleted; `to_rep` is NULL on the audit row.
    CardDeleted,
    /// A rep claimed a card that had been cold-blasted with no owner.
    BlastClaim,
    /// The conversation's runtime owner disagreed with the assignment
    /// registry and was forced back to it.
    RuntimeMismatch,
}

impl HandoffReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandoffReason::RepReassign => "rep_reassign",
            HandoffReason::CardDeleted => "card_deleted",
            HandoffReason::BlastClaim => "blast_claim",
            HandoffReason::RuntimeMismatch => "runtime_mismatch",
        }
    }
}

impl fmt::Display for HandoffReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for HandoffReason {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "rep_reassign" => Ok(HandoffReason::RepReassign),
            "card_deleted" => Ok(HandoffReason::CardDeleted),
            "blast_claim" => Ok(HandoffReason::BlastClaim),
            "runtime_mismatch" => Ok(HandoffReason::RuntimeMismatch),
            other => Err(Error::Validation {
                field: "reason",
                value: other.to_string(),
            }),
        }
    }
}

/// The rep currently responsible for a card, per the assignment registry.
/// The registry is the single source of truth here; conversation rows are
/// runtime state and may lag behind.
pub fn resolve_current_rep(db: &Database, card_id: &str) -> Result<Option<String>> {
    let mut conn = db.get_conn()?;
    resolve_current_rep_in(&mut conn, card_id)
}

pub(crate) fn resolve_current_rep_in(
    conn: &mut SqliteConnection,
    card_id: &str,
) -> Result<Option<String>> {
    Ok(assignments::get_card_assignment_in(conn, card_id)?.map(|a| a.user_id))
}

/// Reset a card's conversations to the root state and stamp the new
/// runtime owner, writing an audit row for the reset.
///
/// State-idempotent but audit-cumulative: calling this twice leaves the
/// same conversation state while appending two handoff rows. Only updates
/// existing conversation rows; never creates or deletes them.
pub fn reset_markov_for_card(
    db: &Database,
    card_id: &str,
    new_rep: Option<&str>,
    reason: HandoffReason,
    actor: &str,
) -> Result<usize> {
    let mut conn = db.get_conn()?;
    conn.immediate_transaction(|conn| {
        let from_rep = resolve_current_rep_in(conn, card_id)?;
        let state_before = conversation_state_for_card_in(conn, card_id)?;
        let reset = reset_conversations_in(conn, card_id, new_rep, reason, actor)?;
        log_handoff_in(
            conn,
            card_id,
            from_rep.as_deref(),
            new_rep,
            reason,
            state_before.as_deref(),
            Some(tree::ROOT_STATE),
            actor,
        )?;
        Ok(reset)
    })
}

/// The conversation-row reset itself, without the audit append. Protocols
/// that write their own handoff row compose this directly.
pub(crate) fn reset_conversations_in(
    conn: &mut SqliteConnection,
    card_id: &str,
    new_rep: Option<&str>,
    reason: HandoffReason,
    actor: &str,
) -> Result<usize> {
    let now = now_utc();
    let reset = diesel::update(conversations::table.filter(conversations::card_id.eq(card_id)))
        .set((
            conversations::state.eq(tree::ROOT_STATE),
            conversations::rep_user_id.eq(new_rep),
            conversations::updated_at.eq(&now),
        ))
        .execute(conn)?;

    info!(
        card_id,
        new_rep,
        reason = %reason,
        actor,
        conversations_reset = reset,
        "conversation state reset to root"
    );
    Ok(reset)
}

/// Append an immutable handoff audit row.
pub fn log_handoff(
    db: &Database,
    card_id: &str,
    from_rep: Option<&str>,
    to_rep: Option<&str>,
    reason: HandoffReason,
    state_before: Option<&str>,
    state_after: Option<&str>,
    assigned_by: &str,
) -> Result<i32> {
    let mut conn = db.get_conn()?;
    log_handoff_in(
        &mut conn,
        card_id,
        from_rep,
        to_rep,
        reason,
        state_before,
        state_after,
        assigned_by,
    )
}

pub(crate) fn log_handoff_in(
    conn: &mut SqliteConnection,
    card_id: &str,
    from_rep: Option<&str>,
    to_rep: Option<&str>,
    reason: HandoffReason,
    state_before: Option<&str>,
    state_after: Option<&str>,
    assigned_by: &str,
) -> Result<i32> {
    let now = now_utc();
    let row = NewHandoffEvent {
        card_id,
        from_rep,
        to_rep,
        reason: reason.as_str(),
        state_before,
        state_after,
        assigned_by,
        created_at: &now,
    };
    diesel::insert_into(handoff_events::table)
        .values(&row)
        .execute(conn)?;

    let id: i32 =
        diesel::select(diesel::dsl::sql::<diesel::sql_types::Integer>("last_insert_rowid()"))
            .first(conn)?;

    info!(card_id, from_rep, to_rep, reason = %reason, assigned_by, "handoff recorded");
    Ok(id)
}

/// Handoff audit trail for a card, newest first.
pub fn handoff_history(db: &Database, card_id: &str, limit: i64) -> Result<Vec<HandoffEvent>> {
    let mut conn = db.get_conn()?;
    let rows = handoff_events::table
        .filter(handoff_events::card_id.eq(card_id))
        .order(handoff_events::created_at.desc())
        .then_order_by(handoff_events::id.desc())
        .limit(limit)
        .load::<HandoffEvent>(&mut conn)?;
    Ok(rows)
}

/// Current conversation state for a card, if any conversation is linked.
pub fn conversation_state_for_card(db: &Database, card_id: &str) -> Result<Option<String>> {
    let mut conn = db.get_conn()?;
    conversation_state_for_card_in(&mut conn, card_id)
}

pub(crate) fn conversation_state_for_card_in(
    conn: &mut SqliteConnection,
    card_id: &str,
) -> Result<Option<String>> {
    let state = conversations::table
        .filter(conversations::card_id.eq(card_id))
        .order(conversations::updated_at.desc())
        .select(conversations::state)
        .first::<String>(conn)
        .optional()?;
    Ok(state)
}

/// Delete a card and everything hanging off it, atomically.
///
/// Order matters: capture the owner and conversation state for the audit
/// row, drop the assignment rows, then the card itself (conversations go
/// with it via the cascade). The audit row lands last, with `to_rep` and
/// `state_after` NULL to mark destruction. A missing card rolls the whole
/// transaction back with [`Error::CardNotFound`].
pub fn delete_card(db: &Database, card_id: &str, deleted_by: &str) -> Result<()> {
    let mut conn = db.get_conn()?;
    conn.immediate_transaction(|conn| {
        let from_rep = resolve_current_rep_in(conn, card_id)?;
        let state_before = conversation_state_for_card_in(conn, card_id)?;

        diesel::delete(card_assignments::table.filter(card_assignments::card_id.eq(card_id)))
            .execute(conn)?;

        let deleted = diesel::delete(cards::table.filter(cards::id.eq(card_id))).execute(conn)?;
        if deleted == 0 {
            return Err(Error::CardNotFound(card_id.to_string()));
        }

        log_handoff_in(
            conn,
            card_id,
            from_rep.as_deref(),
            None,
            HandoffReason::CardDeleted,
            state_before.as_deref(),
            None,
            deleted_by,
        )?;

        info!(card_id, deleted_by, "card deleted");
        Ok(())
    })
}

/// A rep claims an unworked blast card: upsert the assignment, reset the
/// conversation to root under the claiming rep, and audit the claim. One
/// transaction, so two reps racing for the same card serialize and the
/// second claim reads the first as `from_rep`.
pub fn claim_card_for_rep(db: &Database, card_id: &str, user_id: &str) -> Result<()> {
    let mut conn = db.get_conn()?;
    conn.immediate_transaction(|conn| {
        if db::get_card_in(conn, card_id)?.is_none() {
            return Err(Error::CardNotFound(card_id.to_string()));
        }

        let from_rep = resolve_current_rep_in(conn, card_id)?;
        let state_before = conversation_state_for_card_in(conn, card_id)?;

        assignments::upsert_assignment_in(conn, card_id, user_id, user_id, None)?;
        reset_conversations_in(conn, card_id, Some(user_id), HandoffReason::BlastClaim, user_id)?;
        log_handoff_in(
            conn,
            card_id,
            from_rep.as_deref(),
            Some(user_id),
            HandoffReason::BlastClaim,
            state_before.as_deref(),
            Some(tree::ROOT_STATE),
            user_id,
        )?;
        Ok(())
    })
}

/// [`reconcile_runtime_owner`] with the actor label taken from
/// configuration. Scheduled sweeps use this so every repair row carries
/// the same configured system actor.
pub fn reconcile_runtime_owner_with_config(
    db: &Database,
    config: &crate::config::Config,
    phone: &str,
) -> Result<bool> {
    reconcile_runtime_owner(db, phone, &config.routing.reconcile_actor)
}

/// Detect and repair drift between the conversation's runtime owner (what
/// inbound routing would pick) and the assignment registry. The registry
/// wins: on mismatch the conversation resets to root under the registry
/// owner and a `runtime_mismatch` handoff is recorded. Returns whether a
/// repair happened.
pub fn reconcile_runtime_owner(db: &Database, phone: &str, actor: &str) -> Result<bool> {
    let mut conn = db.get_conn()?;
    conn.immediate_transaction(|conn| {
        let convo = match db::conversation_for_phone_in(conn, phone)? {
            Some(c) => c,
            None => return Ok(false),
        };
        let card_id = match convo.card_id.as_deref() {
            Some(id) => id,
            None => return Ok(false),
        };

        let registry_rep = resolve_current_rep_in(conn, card_id)?;
        let routed = environment::route_inbound_in(conn, phone)?;
        if routed.rep_id == registry_rep {
            return Ok(false);
        }

        warn!(
            phone,
            card_id,
            runtime_rep = routed.rep_id.as_deref(),
            registry_rep = registry_rep.as_deref(),
            "runtime owner disagrees with assignment registry; repairing"
        );

        reset_conversations_in(
            conn,
            card_id,
            registry_rep.as_deref(),
            HandoffReason::RuntimeMismatch,
            actor,
        )?;
        log_handoff_in(
            conn,
            card_id,
            routed.rep_id.as_deref(),
            registry_rep.as_deref(),
            HandoffReason::RuntimeMismatch,
            Some(&convo.state),
            Some(tree::ROOT_STATE),
            actor,
        )?;
        Ok(true)
    })
}
