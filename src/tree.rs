//! Conversation state tree and transition engine
//!
//! The tree is static data: a root (`initial_outreach`) branching into
//! top-level categories, each branching into leaf subcategories. It organizes
//! states for display and grouping but does not strictly gate transitions:
//! the classifier's output can override tree structure (see [`transition`]).

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

/// Root of the conversation tree. Every conversation starts here, and
/// corrupt or legacy state values normalize back to it.
pub const ROOT_STATE: &str = "initial_outreach";

/// The sole absorbing terminal state. No transitions leave it.
pub const DEAD_STATE: &str = "dead";

/// Dormant-but-reengageable leaves. A classified inbound from one of these
/// jumps straight into any branch, bypassing the child-of-current check.
pub const REENGAGEMENT_STATES: &[&str] = &["followup_24hr", "followup_10day"];

/// Legacy state name written by older deployments; maps to root.
const LEGACY_INITIAL_ALIAS: &str = "initial_message_sent";

lazy_static::lazy_static! {
    /// Full conversation state tree: node name -> child node names.
    /// Leaves, `dead`, and the followup states have no children.
    static ref CONVERSATION_TREE: HashMap<&'static str, Vec<&'static str>> = {
        let mut tree = HashMap::new();
        tree.insert(ROOT_STATE, vec![
            "interest",
            "question",
            "pricing",
            "objection",
            "demo",
            "link_click",
            "purchase",
            "followup_24hr",
            "followup_10day",
            "dead",
        ]);
        tree.insert("interest", vec![
            "light_interest",
            "strong_interest",
            "confused_interest",
            "want_proof",
            "want_numbers",
        ]);
        tree.insert("question", vec![
            "pricing_question",
            "deliverable_question",
            "timeline_question",
            "data_source_question",
            "accuracy_question",
            "volume_question",
            "refund_question",
            "custom_request_question",
        ]);
        tree.insert("pricing", vec![
            "asks_for_price",
            "negotiates_price",
            "bulk_price_question",
            "confused_about_tiers",
        ]);
        tree.insert("objection", vec![
            "price_too_high",
            "no_time",
            "not_interested",
            "already_have_list",
            "send_info_only",
            "who_are_you",
            "sketchy_vibes",
            "long_delay",
        ]);
        tree.insert("demo", vec![
            "asks_for_example_list",
            "asks_for_specific_name",
            "wants_chapter_preview",
            "asks_for_pdf",
        ]);
        tree.insert("link_click", vec![
            "clicked_purchase_link",
            "clicked_example_link",
            "clicked_site",
        ]);
        tree.insert("purchase", vec![
            "confirmed_payment",
            "sent_venmo",
            "waiting_on_exec_board",
            "wants_invoice",
        ]);
        tree.insert("followup_24hr", vec![]);
        tree.insert("followup_10day", vec![]);
        tree.insert(DEAD_STATE, vec![]);
        tree
    };
}

/// Classified intent for an inbound message, produced by the external
/// classifier. Category and subcategory may name nodes that are not
/// structural children of the current state; the transition rules
/// tolerate that. Confidence is informational only.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Intent {
    pub category: Option<String>,
    pub subcategory: Option<String>,
    pub confidence: Option<f32>,
}

impl Intent {
    /// Intent carrying only a category.
    pub fn category(category: &str) -> Self {
        Intent {
            category: Some(category.to_string()),
            subcategory: None,
            confidence: None,
        }
    }

    /// Intent carrying a category and subcategory.
    pub fn classified(category: &str, subcategory: &str) -> Self {
        Intent {
            category: Some(category.to_string()),
            subcategory: Some(subcategory.to_string()),
            confidence: None,
        }
    }
}

/// Whether `state` is any node in the tree, branch or leaf.
pub fn is_known_state(state: &str) -> bool {
    CONVERSATION_TREE.contains_key(state)
        || CONVERSATION_TREE.values().any(|c| c.contains(&state))
}

/// Whether `state` is the absorbing terminal.
pub fn is_terminal(state: &str) -> bool {
    state == DEAD_STATE
}

/// Whether `state` is a dormant re-engagement leaf.
pub fn is_reengagement(state: &str) -> bool {
    REENGAGEMENT_STATES.contains(&state)
}

/// Children of a node, empty for leaves and unknown names.
pub fn children(state: &str) -> &'static [&'static str] {
    CONVERSATION_TREE
        .get(state)
        .map(|v| v.as_slice())
        .unwrap_or(&[])
}

/// All node names in the tree, branches and leaves.
pub fn states() -> impl Iterator<Item = &'static str> {
    CONVERSATION_TREE
        .keys()
        .copied()
        .chain(CONVERSATION_TREE.values().flatten().copied())
}

/// Normalize a stored state value. None, empty, unrecognized, and legacy
/// alias values map to [`ROOT_STATE`]; valid states pass through unchanged.
/// Never errors: corrupt state is a routing condition, not a failure.
pub fn normalize(state: Option<&str>) -> &str {
    match state {
        None | Some("") => ROOT_STATE,
        Some(LEGACY_INITIAL_ALIAS) => ROOT_STATE,
        Some(s) if is_known_state(s) => s,
        Some(_) => ROOT_STATE,
    }
}

/// Compute the next state from the current state and a classified intent.
///
/// Ordered rule evaluation, first match wins. The ordering is load-bearing:
/// the later raw-override rules keep conversations from stalling when the
/// classifier's nearest match does not nest under the current node.
///
/// 1. `dead` is absorbing.
/// 2. Re-engagement: from a followup leaf, any categorized intent jumps
///    straight to its subcategory (or category), whatever branch it is in.
/// 3. Category is a child of the current node: descend, preferring the
///    subcategory when it is a child of that category.
/// 4. Category is a child of root: same descend rule, since any top-level branch
///    is reachable from anywhere.
/// 5. Raw subcategory override: return it even when it is not a structural
///    child of anything reached so far.
/// 6. Raw category override.
/// 7. No signal: stay put.
pub fn transition(current: &str, intent: &Intent) -> String {
    let category = intent.category.as_deref().filter(|c| !c.is_empty());
    let sub = intent.subcategory.as_deref().filter(|s| !s.is_empty());

    if current == DEAD_STATE {
        return DEAD_STATE.to_string();
    }

    // Re-engagement: treat followups like root
    if is_reengagement(current) {
        if let Some(cat) = category {
            return sub.unwrap_or(cat).to_string();
        }
    }

    if let Some(cat) = category {
        // In-tree descent from the current node
        if children(current).contains(&cat) {
            if let Some(s) = sub {
                if children(cat).contains(&s) {
                    return s.to_string();
                }
            }
            return cat.to_string();
        }

        // Jump to any root-level branch from anywhere
        if children(ROOT_STATE).contains(&cat) {
            if let Some(s) = sub {
                if children(cat).contains(&s) {
                    return s.to_string();
                }
            }
            return cat.to_string();
        }
    }

    // Classifier override: prefer sub, then category, then stay
    if let Some(s) = sub {
        return s.to_string();
    }
    if let Some(cat) = category {
        return cat.to_string();
    }

    current.to_string()
}
