//! Message pipeline
//!
//! Ties the routing pieces together: an inbound SMS is normalized, routed
//! to its environment, classified, transitioned, and logged; an outbound
//! send is logged and, when the carrier confirmed it, stamped onto the
//! conversation as fresh routing evidence.
//!
//! Classification happens outside the write transaction. Classifiers are
//! typically remote model calls measured in seconds; holding the SQLite
//! write lock across one would serialize every other phone behind it.

use diesel::prelude::*;
use tracing::info;

use crate::db::{
    self, now_utc, Database, NewMessageEvent, TransitionOutcome,
};
use crate::environment;
use crate::error::Result;
use crate::schema::conversations;
use crate::tree::Intent;

/// Classifies an inbound message body into an [`Intent`], given the
/// conversation history so far (oldest first).
pub trait Classifier {
    fn classify(&self, text: &str, history: &[String]) -> Result<Intent>;
}

impl<F> Classifier for F
where
    F: Fn(&str, &[String]) -> Result<Intent>,
{
    fn classify(&self, text: &str, history: &[String]) -> Result<Intent> {
        self(text, history)
    }
}

/// Everything a caller needs after an inbound message is processed.
#[derive(Debug, Clone, serde::Serialize)]
pub struct InboundOutcome {
    pub phone: String,
    pub environment_id: String,
    pub rep_id: Option<String>,
    pub intent: Intent,
    pub previous_state: String,
    pub next_state: String,
    pub conversation_id: i32,
    pub event_id: i32,
}

/// Process one inbound message end to end.
///
/// Routing and history are read first, the classifier runs on its own,
/// and then the transition plus the inbound event row commit in a single
/// immediate transaction. The event row is stamped with the post-transition
/// state, so replaying the event log reconstructs the state sequence.
pub fn process_inbound<C: Classifier>(
    db: &Database,
    raw_phone: &str,
    text: &str,
    classifier: &C,
) -> Result<InboundOutcome> {
    let phone = environment::normalize_phone(raw_phone);
    let mut conn = db.get_conn()?;

    let routed = environment::route_inbound_in(&mut conn, &phone)?;
    let history = db::conversation_for_phone_in(&mut conn, &phone)?
        .map(|c| c.messages())
        .unwrap_or_default();

    let intent = classifier.classify(text, &history)?;

    let (env, rep_id, outcome, event_id) = conn.immediate_transaction(|conn| {
        let env = match routed.environment_id.clone() {
            Some(e) => e,
            None => environment::get_or_create_environment_in(conn, &phone, None, None, None)?,
        };
        let rep_id = routed.rep_id.clone();

        db::ensure_conversation_in(conn, &phone, Some(&env), rep_id.as_deref(), None)?;
        let outcome: TransitionOutcome = db::apply_transition_in(conn, &phone, &intent, Some(text))?;

        let now = now_utc();
        let event_id = db::record_message_event_in(
            conn,
            &NewMessageEvent {
                phone: &phone,
                environment_id: &env,
                rep_id: rep_id.as_deref(),
                campaign_id: routed.campaign_id.as_deref(),
                direction: "inbound",
                confirmation_id: None,
                state: Some(&outcome.next_state),
                body: text,
                sent_at: &now,
            },
        )?;
        Ok::<_, crate::error::Error>((env, rep_id, outcome, event_id))
    })?;

    info!(
        phone = %phone,
        environment_id = %env,
        category = intent.category.as_deref(),
        previous_state = %outcome.previous_state,
        next_state = %outcome.next_state,
        "inbound processed"
    );

    Ok(InboundOutcome {
        phone,
        environment_id: env,
        rep_id,
        intent,
        previous_state: outcome.previous_state,
        next_state: outcome.next_state,
        conversation_id: outcome.conversation_id,
        event_id,
    })
}

/// Outcome of recording an outbound send.
#[derive(Debug, Clone, serde::Serialize)]
pub struct OutboundRecord {
    pub phone: String,
    pub environment_id: String,
    pub event_id: i32,
    pub confirmed: bool,
}

/// [`record_outbound`] with the campaign taken from configuration. For
/// callers that send under one configured campaign rather than passing it
/// per message.
pub fn record_outbound_with_config(
    db: &Database,
    config: &crate::config::Config,
    raw_phone: &str,
    body: &str,
    rep_id: Option<&str>,
    card_id: Option<&str>,
    confirmation_id: Option<&str>,
) -> Result<OutboundRecord> {
    record_outbound(
        db,
        raw_phone,
        body,
        rep_id,
        Some(&config.routing.default_campaign),
        card_id,
        confirmation_id,
    )
}

/// Record an outbound send attempt.
///
/// Every attempt gets an event row. Only a confirmed send (one the carrier
/// accepted, `confirmation_id` present) creates or refreshes the
/// conversation: it establishes the environment, stamps the owning rep,
/// and bumps `last_outbound_at`. Failed sends leave routing state alone so
/// a bad attempt can't steal a conversation from its real owner.
#[allow(clippy::too_many_arguments)]
pub fn record_outbound(
    db: &Database,
    raw_phone: &str,
    body: &str,
    rep_id: Option<&str>,
    campaign_id: Option<&str>,
    card_id: Option<&str>,
    confirmation_id: Option<&str>,
) -> Result<OutboundRecord> {
    let phone = environment::normalize_phone(raw_phone);
    let mut conn = db.get_conn()?;

    let confirmed = confirmation_id.is_some();
    let (env, event_id) = conn.immediate_transaction(|conn| {
        // A confirmed send is new routing evidence: the environment comes
        // from the sender's own context, so a different rep's confirmed
        // outbound takes the phone over. Unconfirmed attempts are logged
        // under whatever environment already owns the phone.
        let env = if confirmed {
            environment::synthesize_environment_in(conn, rep_id, campaign_id, card_id)?
        } else {
            environment::get_or_create_environment_in(conn, &phone, rep_id, campaign_id, card_id)?
        };
        let now = now_utc();

        let state = if confirmed {
            let convo = db::ensure_conversation_in(conn, &phone, Some(&env), rep_id, card_id)?;
            diesel::update(conversations::table.filter(conversations::id.eq(convo.id)))
                .set((
                    conversations::last_outbound_at.eq(&now),
                    conversations::updated_at.eq(&now),
                ))
                .execute(conn)?;
            Some(convo.state)
        } else {
            db::conversation_for_phone_in(conn, &phone)?.map(|c| c.state)
        };

        let event_id = db::record_message_event_in(
            conn,
            &NewMessageEvent {
                phone: &phone,
                environment_id: &env,
                rep_id,
                campaign_id,
                direction: "outbound",
                confirmation_id,
                state: state.as_deref(),
                body,
                sent_at: &now,
            },
        )?;
        Ok::<_, crate::error::Error>((env, event_id))
    })?;

    info!(
        phone = %phone,
        environment_id = %env,
        rep_id,
        confirmed,
        "outbound recorded"
    );

    Ok(OutboundRecord {
        phone,
        environment_id: env,
        event_id,
        confirmed,
    })
}
