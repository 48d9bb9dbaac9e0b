//! Environment resolution layer
//!
//! One conversation per (phone x rep x campaign). The key invariant:
//! inbound messages route to the environment that last sent a *confirmed*
//! outbound message: last confirmed writer wins, and an unconfirmed
//! outbound (no confirmation id) is never routing evidence.

use diesel::prelude::*;
use diesel::sqlite::SqliteConnection;
use sha2::{Digest, Sha256};
use tracing::{debug, warn};

use crate::db::{self, Database};
use crate::error::Result;
use crate::schema::{conversations, message_events};

/// Rep key used when no rep id is supplied (platform-owned conversation).
pub const OWNER_REP_KEY: &str = "owner";

/// Campaign key used when no campaign id is supplied.
pub const DEFAULT_CAMPAIGN_KEY: &str = "default";

/// Resolved routing context for a phone number. All-None means no routing
/// evidence exists yet; callers create a new environment, it is not an
/// error.
#[derive(Debug, Clone, Default, PartialEq, serde::Serialize)]
pub struct RoutedEnvironment {
    pub environment_id: Option<String>,
    pub rep_id: Option<String>,
    pub campaign_id: Option<String>,
}

impl RoutedEnvironment {
    pub fn is_resolved(&self) -> bool {
        self.environment_id.is_some()
    }
}

/// Deterministic environment id for a (rep, campaign) pairing. Same inputs
/// always yield the same id; no lookups involved.
pub fn environment_id(rep_id: Option<&str>, campaign_id: Option<&str>) -> String {
    let rep_key = rep_id.filter(|r| !r.is_empty()).unwrap_or(OWNER_REP_KEY);
    let campaign_key = campaign_id
        .filter(|c| !c.is_empty())
        .unwrap_or(DEFAULT_CAMPAIGN_KEY);

    let mut hasher = Sha256::new();
    hasher.update(format!("{}_{}", rep_key, campaign_key).as_bytes());
    let digest = hasher.finalize();

    let mut hex = String::with_capacity(2 + digest.len() * 2);
    hex.push_str("env_");
    for byte in digest {
        hex.push_str(&format!("{:02x}", byte));
    }
    hex
}

/// Normalize a phone number to its last 10 digits.
pub fn normalize_phone(phone: &str) -> String {
    let digits: String = phone.chars().filter(|c| c.is_ascii_digit()).collect();
    if digits.len() > 10 {
        digits[digits.len() - 10..].to_string()
    } else {
        digits
    }
}

/// Route an inbound message to the owning environment: the most recent
/// outbound transport event for this phone carrying a confirmation id.
///
/// Falls back to the conversation row's stored environment fields for
/// deployments predating the event log; total absence of evidence yields
/// an unresolved result.
pub fn route_inbound(db: &Database, phone: &str) -> Result<RoutedEnvironment> {
    let mut conn = db.get_conn()?;
    route_inbound_in(&mut conn, phone)
}

pub(crate) fn route_inbound_in(
    conn: &mut SqliteConnection,
    phone: &str,
) -> Result<RoutedEnvironment> {
    let last_confirmed = message_events::table
        .filter(message_events::phone.eq(phone))
        .filter(message_events::direction.eq("outbound"))
        .filter(message_events::confirmation_id.is_not_null())
        .order(message_events::sent_at.desc())
        .then_order_by(message_events::id.desc())
        .first::<db::MessageEvent>(conn)
        .optional()?;

    if let Some(event) = last_confirmed {
        debug!(
            phone,
            environment_id = %event.environment_id,
            rep_id = event.rep_id.as_deref(),
            campaign_id = event.campaign_id.as_deref(),
            "routed to last confirmed outbound environment"
        );
        return Ok(RoutedEnvironment {
            environment_id: Some(event.environment_id),
            rep_id: event.rep_id,
            campaign_id: event.campaign_id,
        });
    }

    fallback_route_from_conversation(conn, phone)
}

/// Fallback routing from the conversations table, for databases created
/// before the transport event log existed. Campaign is unknowable here;
/// it gets set on the next confirmed outbound.
fn fallback_route_from_conversation(
    conn: &mut SqliteConnection,
    phone: &str,
) -> Result<RoutedEnvironment> {
    let row = conversations::table
        .filter(conversations::phone.eq(phone))
        .filter(conversations::environment_id.is_not_null())
        .order(conversations::last_outbound_at.desc())
        .first::<db::Conversation>(conn)
        .optional()?;

    if let Some(convo) = row {
        warn!(
            phone,
            environment_id = convo.environment_id.as_deref(),
            "no confirmed outbound on record; using conversation fallback routing"
        );
        return Ok(RoutedEnvironment {
            environment_id: convo.environment_id,
            rep_id: convo.rep_user_id,
            campaign_id: None,
        });
    }

    debug!(phone, "no prior outbound evidence; environment unresolved");
    Ok(RoutedEnvironment::default())
}

/// Resolve the environment for a phone, creating one when no routing
/// evidence exists. An established environment always wins over the
/// caller-supplied rep/campaign hints. When synthesizing a new id without
/// a caller-supplied campaign, card signals are consulted.
pub fn get_or_create_environment(
    db: &Database,
    phone: &str,
    rep_id: Option<&str>,
    campaign_id: Option<&str>,
    card_id: Option<&str>,
) -> Result<String> {
    let mut conn = db.get_conn()?;
    get_or_create_environment_in(&mut conn, phone, rep_id, campaign_id, card_id)
}

pub(crate) fn get_or_create_environment_in(
    conn: &mut SqliteConnection,
    phone: &str,
    rep_id: Option<&str>,
    campaign_id: Option<&str>,
    card_id: Option<&str>,
) -> Result<String> {
    let routed = route_inbound_in(conn, phone)?;
    if let Some(existing) = routed.environment_id {
        debug!(phone, environment_id = %existing, "using established environment");
        return Ok(existing);
    }

    let env = synthesize_environment_in(conn, rep_id, campaign_id, card_id)?;
    debug!(phone, environment_id = %env, rep_id, "created new environment");
    Ok(env)
}

/// Derive an environment id straight from the caller's context, ignoring
/// any established routing for the phone. This is what a confirmed
/// outbound uses: the send itself is new routing evidence, so the sender's
/// (rep, campaign) wins even when a different environment owned the phone
/// before. Campaign falls back to card signals when not supplied.
pub(crate) fn synthesize_environment_in(
    conn: &mut SqliteConnection,
    rep_id: Option<&str>,
    campaign_id: Option<&str>,
    card_id: Option<&str>,
) -> Result<String> {
    let campaign = match campaign_id {
        Some(c) => Some(c.to_string()),
        None => match card_id {
            Some(id) => infer_campaign_from_card(conn, id)?,
            None => None,
        },
    };
    Ok(environment_id(rep_id, campaign.as_deref()))
}

/// Infer a campaign segment from signals on the linked card. Returns None
/// when the card is absent or carries no recognizable segment marker.
fn infer_campaign_from_card(
    conn: &mut SqliteConnection,
    card_id: &str,
) -> Result<Option<String>> {
    let card = match db::get_card_in(conn, card_id)? {
        Some(c) => c,
        None => return Ok(None),
    };

    let data = card.data();
    let truthy = |key: &str| {
        data.get(key)
            .map(|v| match v {
                serde_json::Value::String(s) => !s.is_empty(),
                serde_json::Value::Bool(b) => *b,
                serde_json::Value::Null => false,
                _ => true,
            })
            .unwrap_or(false)
    };

    if truthy("fraternity") {
        return Ok(Some("greek".to_string()));
    }
    if truthy("faith_group") {
        return Ok(Some("faith".to_string()));
    }
    if data.get("role").and_then(|v| v.as_str()) == Some("Office") {
        return Ok(Some("faith".to_string()));
    }
    Ok(None)
}
