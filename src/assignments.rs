//! Card assignment registry
//!
//! `card_assignments` is the authoritative card -> rep ownership record.
//! Status lifecycle: `assigned` -> `active` -> {`closed`, `lost`}. The two
//! terminal statuses are sticky: a later assignment upsert for the same
//! (card, user) pair keeps them instead of resetting to `assigned`. The
//! guard is applied at write time inside the upsert itself, so callers
//! never pre-check.

use std::fmt;
use std::str::FromStr;

use diesel::prelude::*;
use diesel::sql_types::{Nullable, Text};
use diesel::sqlite::SqliteConnection;
use tracing::info;

use crate::db::{now_utc, Card, CardAssignment, Database};
use crate::error::{Error, Result};
use crate::handoffs::{self, HandoffReason};
use crate::schema::{card_assignments, cards};
use crate::tree;

/// Assignment lifecycle status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AssignmentStatus {
    Assigned,
    Active,
    Closed,
    Lost,
}

impl AssignmentStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            AssignmentStatus::Assigned => "assigned",
            AssignmentStatus::Active => "active",
            AssignmentStatus::Closed => "closed",
            AssignmentStatus::Lost => "lost",
        }
    }

    /// Terminal for the (card, user) pair: never silently downgraded.
    pub fn is_terminal(&self) -> bool {
        matches!(self, AssignmentStatus::Closed | AssignmentStatus::Lost)
    }
}

impl fmt::Display for AssignmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AssignmentStatus {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "assigned" => Ok(AssignmentStatus::Assigned),
            "active" => Ok(AssignmentStatus::Active),
            "closed" => Ok(AssignmentStatus::Closed),
            "lost" => Ok(AssignmentStatus::Lost),
            other => Err(Error::Validation {
                field: "status",
                value: other.to_string(),
            }),
        }
    }
}

/// Assign a card to a rep.
///
/// Upserts on (card_id, user_id) with the sticky-terminal-status guard.
/// When this changes which rep owns the card, the linked conversation is
/// reset to root and a `rep_reassign` handoff row is written, all in one
/// transaction, so an interrupted reassignment leaves no partial transfer.
pub fn assign_card_to_rep(
    db: &Database,
    card_id: &str,
    user_id: &str,
    assigned_by: &str,
    notes: Option<&str>,
) -> Result<()> {
    let mut conn = db.get_conn()?;
    conn.immediate_transaction(|conn| {
        assign_card_to_rep_in(conn, card_id, user_id, assigned_by, notes)
    })
}

pub(crate) fn assign_card_to_rep_in(
    conn: &mut SqliteConnection,
    card_id: &str,
    user_id: &str,
    assigned_by: &str,
    notes: Option<&str>,
) -> Result<()> {
    let current = get_card_assignment_in(conn, card_id)?;
    let from_rep = current.map(|a| a.user_id);
    let state_before = handoffs::conversation_state_for_card_in(conn, card_id)?;

    upsert_assignment_in(conn, card_id, user_id, assigned_by, notes)?;

    // Ownership changed: reset conversation state and leave an audit trail
    if let Some(prev) = from_rep.as_deref() {
        if prev != user_id {
            handoffs::reset_conversations_in(
                conn,
                card_id,
                Some(user_id),
                HandoffReason::RepReassign,
                assigned_by,
            )?;
            handoffs::log_handoff_in(
                conn,
                card_id,
                Some(prev),
                Some(user_id),
                HandoffReason::RepReassign,
                state_before.as_deref(),
                Some(tree::ROOT_STATE),
                assigned_by,
            )?;
        }
    }

    info!(card_id, user_id, assigned_by, "card assigned");
    Ok(())
}

/// Raw upsert with the write-time status guard. `excluded.*` carries the
/// incoming row; the CASE keeps closed/lost sticky.
pub(crate) fn upsert_assignment_in(
    conn: &mut SqliteConnection,
    card_id: &str,
    user_id: &str,
    assigned_by: &str,
    notes: Option<&str>,
) -> Result<()> {
    let now = now_utc();
    diesel::sql_query(
        "INSERT INTO card_assignments (card_id, user_id, status, assigned_by, assigned_at, notes)
         VALUES (?, ?, 'assigned', ?, ?, ?)
         ON CONFLICT(card_id, user_id) DO UPDATE SET
             assigned_by = excluded.assigned_by,
             assigned_at = excluded.assigned_at,
             notes = COALESCE(excluded.notes, card_assignments.notes),
             status = CASE
                 WHEN card_assignments.status IN ('closed', 'lost') THEN card_assignments.status
                 ELSE 'assigned'
             END",
    )
    .bind::<Text, _>(card_id)
    .bind::<Text, _>(user_id)
    .bind::<Text, _>(assigned_by)
    .bind::<Text, _>(&now)
    .bind::<Nullable<Text>, _>(notes)
    .execute(conn)?;
    Ok(())
}

/// Explicit status lifecycle move for an existing assignment. Returns
/// whether a row was updated.
pub fn update_assignment_status(
    db: &Database,
    card_id: &str,
    user_id: &str,
    status: AssignmentStatus,
    notes: Option<&str>,
) -> Result<bool> {
    let mut conn = db.get_conn()?;

    let target = card_assignments::table
        .filter(card_assignments::card_id.eq(card_id))
        .filter(card_assignments::user_id.eq(user_id));

    let updated = if let Some(n) = notes {
        diesel::update(target)
            .set((
                card_assignments::status.eq(status.as_str()),
                card_assignments::notes.eq(n),
            ))
            .execute(&mut conn)?
    } else {
        diesel::update(target)
            .set(card_assignments::status.eq(status.as_str()))
            .execute(&mut conn)?
    };

    Ok(updated > 0)
}

/// The authoritative current owner: the single most-recently-assigned row.
/// A card accumulates assignment history across reps; the newest wins.
pub fn get_card_assignment(db: &Database, card_id: &str) -> Result<Option<CardAssignment>> {
    let mut conn = db.get_conn()?;
    get_card_assignment_in(&mut conn, card_id)
}

pub(crate) fn get_card_assignment_in(
    conn: &mut SqliteConnection,
    card_id: &str,
) -> Result<Option<CardAssignment>> {
    let row = card_assignments::table
        .filter(card_assignments::card_id.eq(card_id))
        .order(card_assignments::assigned_at.desc())
        .first::<CardAssignment>(conn)
        .optional()?;
    Ok(row)
}

/// Remove a single (card, user) assignment pair. Returns whether a row
/// was deleted.
pub fn unassign_card(db: &Database, card_id: &str, user_id: &str) -> Result<bool> {
    let mut conn = db.get_conn()?;
    let deleted = diesel::delete(
        card_assignments::table
            .filter(card_assignments::card_id.eq(card_id))
            .filter(card_assignments::user_id.eq(user_id)),
    )
    .execute(&mut conn)?;
    Ok(deleted > 0)
}

/// List assignments, optionally filtered by user and/or status, newest
/// first.
pub fn list_assignments(
    db: &Database,
    user_id: Option<&str>,
    status: Option<AssignmentStatus>,
) -> Result<Vec<CardAssignment>> {
    let mut conn = db.get_conn()?;

    let mut query = card_assignments::table.into_boxed();
    if let Some(user) = user_id {
        query = query.filter(card_assignments::user_id.eq(user.to_string()));
    }
    if let Some(s) = status {
        query = query.filter(card_assignments::status.eq(s.as_str()));
    }

    let rows = query
        .order(card_assignments::assigned_at.desc())
        .load::<CardAssignment>(&mut conn)?;
    Ok(rows)
}

/// Cards assigned to a rep, with their assignment rows, newest first.
/// Inner join: a card with no assignment row is never returned.
pub fn rep_assigned_cards(
    db: &Database,
    user_id: &str,
    status: Option<AssignmentStatus>,
) -> Result<Vec<(Card, CardAssignment)>> {
    let mut conn = db.get_conn()?;

    let mut query = card_assignments::table
        .inner_join(cards::table.on(cards::id.eq(card_assignments::card_id)))
        .select((Card::as_select(), CardAssignment::as_select()))
        .into_boxed();
    if let Some(s) = status {
        query = query.filter(card_assignments::status.eq(s.as_str()));
    }

    let rows = query
        .filter(card_assignments::user_id.eq(user_id))
        .order(card_assignments::assigned_at.desc())
        .load::<(Card, CardAssignment)>(&mut conn)?;
    Ok(rows)
}
