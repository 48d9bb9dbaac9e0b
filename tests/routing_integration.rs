//! Integration tests for the conversation routing core
//!
//! These tests exercise full workflows against a real SQLite file in a
//! temporary directory. No mocking: outbound sends, inbound processing,
//! handoffs, and deletion run through the same code paths production uses.

use tempfile::TempDir;

use segue::tree::Intent;
use segue::{assignments, environment, handoffs, pipeline, tree, AssignmentStatus, Database};

fn open_db(dir: &TempDir) -> Database {
    Database::open_at(dir.path().join("routing.db")).expect("open db")
}

fn classify_as(category: &str) -> impl Fn(&str, &[String]) -> segue::Result<Intent> {
    let category = category.to_string();
    move |_: &str, _: &[String]| Ok(Intent::category(&category))
}

// =============================================================================
// Outbound -> Inbound Round Trips
// =============================================================================

#[test]
fn full_outreach_flow_routes_and_transitions() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let card = db
        .create_card(&serde_json::json!({"fraternity": "Sigma Chi", "school": "Ohio State"}))
        .unwrap();
    assignments::assign_card_to_rep(&db, &card, "rep_42", "admin", None).unwrap();

    // Confirmed outbound establishes the environment for this phone
    let sent = pipeline::record_outbound(
        &db,
        "+1 (614) 555-0100",
        "hey, got a sec?",
        Some("rep_42"),
        Some("greek"),
        Some(&card),
        Some("SM001"),
    )
    .unwrap();
    assert_eq!(
        sent.environment_id,
        environment::environment_id(Some("rep_42"), Some("greek"))
    );

    // The prospect replies; the message routes back to rep_42's environment
    let out =
        pipeline::process_inbound(&db, "16145550100", "yeah what's up", &classify_as("interest"))
            .unwrap();
    assert_eq!(out.phone, "6145550100");
    assert_eq!(out.environment_id, sent.environment_id);
    assert_eq!(out.rep_id.as_deref(), Some("rep_42"));
    assert_eq!(out.previous_state, tree::ROOT_STATE);
    assert_eq!(out.next_state, "interest");

    // Deeper classification descends within the subtree
    let out = pipeline::process_inbound(
        &db,
        "6145550100",
        "how much is it",
        &|_: &str, _: &[String]| Ok(Intent::classified("interest", "want_numbers")),
    )
    .unwrap();
    assert_eq!(out.previous_state, "interest");
    assert_eq!(out.next_state, "want_numbers");

    // History accumulated in order
    let convo = db.conversation_for_phone("6145550100").unwrap().unwrap();
    assert_eq!(
        convo.messages(),
        vec!["yeah what's up".to_string(), "how much is it".to_string()]
    );
    assert!(convo.last_inbound_at.is_some());
}

#[test]
fn rep_change_mid_thread_rewires_routing() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    pipeline::record_outbound(&db, "5550200", "intro", Some("rep_a"), None, None, Some("SM1"))
        .unwrap();
    pipeline::record_outbound(&db, "5550200", "following up", Some("rep_b"), None, None, Some("SM2"))
        .unwrap();

    // Newest confirmed writer wins
    let out = pipeline::process_inbound(&db, "5550200", "ok", &classify_as("interest")).unwrap();
    assert_eq!(out.rep_id.as_deref(), Some("rep_b"));
    assert_eq!(
        out.environment_id,
        environment::environment_id(Some("rep_b"), None)
    );
}

#[test]
fn unconfirmed_sends_never_steal_routing() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    pipeline::record_outbound(&db, "5550300", "intro", Some("rep_a"), None, None, Some("SM1"))
        .unwrap();
    // Carrier rejected rep_b's attempt: logged, but no confirmation id
    pipeline::record_outbound(&db, "5550300", "poach", Some("rep_b"), None, None, None).unwrap();

    let out = pipeline::process_inbound(&db, "5550300", "hi", &classify_as("question")).unwrap();
    assert_eq!(out.rep_id.as_deref(), Some("rep_a"));

    // Both attempts are still in the event log
    let events = db.message_events_for_phone("5550300").unwrap();
    let outbound: Vec<_> = events.iter().filter(|e| e.direction == "outbound").collect();
    assert_eq!(outbound.len(), 2);
}

// =============================================================================
// Handoff Protocols End to End
// =============================================================================

#[test]
fn reassignment_resets_thread_and_keeps_terminal_status_sticky() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let card = db.create_card(&serde_json::json!({})).unwrap();
    assignments::assign_card_to_rep(&db, &card, "rep_a", "admin", None).unwrap();
    pipeline::record_outbound(&db, "5550400", "intro", Some("rep_a"), None, Some(&card), Some("SM1"))
        .unwrap();
    pipeline::process_inbound(&db, "5550400", "interested", &classify_as("interest")).unwrap();

    // Hand the card to rep_b: conversation drops back to root
    assignments::assign_card_to_rep(&db, &card, "rep_b", "manager", None).unwrap();
    let convo = db.conversation_for_phone("5550400").unwrap().unwrap();
    assert_eq!(convo.state, tree::ROOT_STATE);
    assert_eq!(convo.rep_user_id.as_deref(), Some("rep_b"));

    let audit = handoffs::handoff_history(&db, &card, 10).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].reason, "rep_reassign");
    assert_eq!(audit[0].state_before.as_deref(), Some("interest"));

    // rep_b closes the deal; a later blanket re-assign can't reopen it
    assignments::update_assignment_status(&db, &card, "rep_b", AssignmentStatus::Closed, None)
        .unwrap();
    assignments::assign_card_to_rep(&db, &card, "rep_b", "admin", None).unwrap();
    let a = assignments::get_card_assignment(&db, &card).unwrap().unwrap();
    assert_eq!(a.status, "closed");
}

#[test]
fn reconcile_forces_registry_owner_after_drift() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let card = db.create_card(&serde_json::json!({})).unwrap();
    assignments::assign_card_to_rep(&db, &card, "rep_owner", "admin", None).unwrap();

    // Runtime evidence points at a different rep than the registry
    pipeline::record_outbound(
        &db,
        "5550500",
        "hello",
        Some("rep_rogue"),
        None,
        Some(&card),
        Some("SM1"),
    )
    .unwrap();

    assert!(handoffs::reconcile_runtime_owner(&db, "5550500", "system").unwrap());
    let convo = db.conversation_for_phone("5550500").unwrap().unwrap();
    assert_eq!(convo.rep_user_id.as_deref(), Some("rep_owner"));
    assert_eq!(convo.state, tree::ROOT_STATE);

    // Second pass finds nothing to repair on the conversation side
    let audit = handoffs::handoff_history(&db, &card, 10).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].reason, "runtime_mismatch");
}

#[test]
fn delete_card_end_to_end_leaves_only_the_audit_trail() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    let card = db.create_card(&serde_json::json!({"school": "Penn State"})).unwrap();
    assignments::assign_card_to_rep(&db, &card, "rep_a", "admin", None).unwrap();
    pipeline::record_outbound(&db, "5550600", "intro", Some("rep_a"), None, Some(&card), Some("SM1"))
        .unwrap();

    handoffs::delete_card(&db, &card, "admin").unwrap();

    assert!(db.get_card(&card).unwrap().is_none());
    assert!(db.conversations_for_card(&card).unwrap().is_empty());
    assert!(assignments::get_card_assignment(&db, &card).unwrap().is_none());

    let audit = handoffs::handoff_history(&db, &card, 10).unwrap();
    assert_eq!(audit.len(), 1);
    assert_eq!(audit[0].reason, "card_deleted");
    assert!(audit[0].to_rep.is_none());
}

// =============================================================================
// State Machine Properties Over Storage
// =============================================================================

#[test]
fn dead_conversations_absorb_everything() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.ensure_conversation("5550700", None, None, None).unwrap();
    db.apply_transition("5550700", &Intent::category("dead"), Some("stop texting me"))
        .unwrap();

    for category in ["interest", "question", "pricing", "purchase"] {
        let out = pipeline::process_inbound(&db, "5550700", "jk", &classify_as(category)).unwrap();
        assert_eq!(out.next_state, tree::DEAD_STATE);
    }
}

#[test]
fn followup_states_reengage_through_the_root() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.ensure_conversation("5550800", None, None, None).unwrap();
    db.apply_transition("5550800", &Intent::category("followup_24hr"), None)
        .unwrap();

    let out = pipeline::process_inbound(&db, "5550800", "still there?", &classify_as("interest"))
        .unwrap();
    assert_eq!(out.previous_state, "followup_24hr");
    assert_eq!(out.next_state, "interest");
}

#[test]
fn classified_intent_descends_two_levels_in_one_hop() {
    let dir = TempDir::new().unwrap();
    let db = open_db(&dir);

    db.ensure_conversation("5550900", None, None, None).unwrap();
    let out = db
        .apply_transition(
            "5550900",
            &Intent::classified("question", "pricing_question"),
            Some("price?"),
        )
        .unwrap();
    assert_eq!(out.next_state, "pricing_question");

    // From a leaf, any root-level branch is still reachable
    let out = db
        .apply_transition("5550900", &Intent::classified("objection", "no_time"), None)
        .unwrap();
    assert_eq!(out.previous_state, "pricing_question");
    assert_eq!(out.next_state, "no_time");
}
