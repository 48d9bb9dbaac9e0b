//! Property tests for the state tree transition rules
//!
//! The transition function is total and pure, which makes it a good
//! target for generated inputs: any current state paired with any
//! classifier output must produce a defined next state without panicking.

use proptest::prelude::*;

use segue::tree::{self, Intent};

fn known_state() -> impl Strategy<Value = String> {
    let states: Vec<String> = tree::states().map(str::to_string).collect();
    proptest::sample::select(states)
}

fn arbitrary_intent() -> impl Strategy<Value = Intent> {
    let label = prop_oneof![
        Just(None::<String>),
        Just(Some(String::new())),
        known_state().prop_map(Some),
        "[a-z_]{1,24}".prop_map(Some),
    ];
    (label.clone(), label, proptest::option::of(0.0f32..=1.0)).prop_map(
        |(category, subcategory, confidence)| Intent {
            category,
            subcategory,
            confidence,
        },
    )
}

proptest! {
    #[test]
    fn transition_is_total(current in known_state(), intent in arbitrary_intent()) {
        let next = tree::transition(&current, &intent);
        prop_assert!(!next.is_empty());
    }

    #[test]
    fn dead_absorbs_every_intent(intent in arbitrary_intent()) {
        prop_assert_eq!(tree::transition(tree::DEAD_STATE, &intent), tree::DEAD_STATE);
    }

    #[test]
    fn empty_intent_never_moves(current in known_state()) {
        let noop = Intent::default();
        prop_assert_eq!(tree::transition(&current, &noop), current.clone());

        let blank = Intent {
            category: Some(String::new()),
            subcategory: Some(String::new()),
            confidence: None,
        };
        prop_assert_eq!(tree::transition(&current, &blank), current);
    }

    #[test]
    fn in_tree_intents_land_on_known_states(
        current in known_state(),
        category in known_state(),
        subcategory in proptest::option::of(known_state()),
    ) {
        let intent = Intent {
            category: Some(category),
            subcategory,
            confidence: None,
        };
        let next = tree::transition(&current, &intent);
        prop_assert!(tree::is_known_state(&next), "landed on unknown state {next}");
    }

    #[test]
    fn followup_states_never_trap_a_categorized_reply(category in known_state()) {
        for followup in ["followup_24hr", "followup_10day"] {
            // The classifier naming the followup itself is the one case
            // where staying put is correct
            if category == followup {
                continue;
            }
            let next = tree::transition(followup, &Intent::category(&category));
            prop_assert_ne!(next, followup);
        }
    }

    #[test]
    fn normalize_is_total(raw in proptest::option::of("[a-z_]{0,30}")) {
        let state = tree::normalize(raw.as_deref());
        prop_assert!(tree::is_known_state(state));
    }
}
