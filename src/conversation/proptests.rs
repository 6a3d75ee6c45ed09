//! Property-based tests for transition selection
//!
//! For any layout of matching and non-matching transitions, the winner is
//! the first match in "state transitions, then fallbacks" order, exactly
//! one action runs, and unclaimed events never touch the store.

use super::*;
use crate::testing::RecordingStore;
use proptest::prelude::*;
use std::sync::Mutex;

/// Which action ran, as (`is_fallback`, index)
type Log = Arc<Mutex<Vec<(bool, usize)>>>;

fn build(state_matches: &[bool], fallback_matches: &[bool], log: &Log) -> ConversationHandler {
    let transition = |fallback: bool, index: usize, matches: bool| {
        let log = log.clone();
        let predicate = if matches {
            Predicate::any()
        } else {
            !Predicate::any()
        };
        Transition::new(predicate, move |_, ctx| {
            log.lock().unwrap().push((fallback, index));
            ctx.set_state(format!("after-{fallback}-{index}"));
            Ok(())
        })
    };

    let mut builder = ConversationHandler::builder("prop", RecordingStore::new()).state(
        "",
        state_matches
            .iter()
            .enumerate()
            .map(|(i, m)| transition(false, i, *m))
            .collect::<Vec<_>>(),
    );
    for (i, m) in fallback_matches.iter().enumerate() {
        builder = builder.fallback(transition(true, i, *m));
    }
    builder.build()
}

fn expected_winner(state_matches: &[bool], fallback_matches: &[bool]) -> Option<(bool, usize)> {
    state_matches
        .iter()
        .position(|m| *m)
        .map(|i| (false, i))
        .or_else(|| fallback_matches.iter().position(|m| *m).map(|i| (true, i)))
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #[test]
    fn prop_first_match_wins(
        state_matches in proptest::collection::vec(any::<bool>(), 0..6),
        fallback_matches in proptest::collection::vec(any::<bool>(), 0..6),
    ) {
        let log: Log = Arc::new(Mutex::new(Vec::new()));
        let handler = build(&state_matches, &fallback_matches, &log);

        let outcome = runtime().block_on(handler.handle(&Event::text(1, "x"))).unwrap();

        let ran = log.lock().unwrap().clone();
        match expected_winner(&state_matches, &fallback_matches) {
            Some(winner) => {
                prop_assert_eq!(outcome, Outcome::Claimed);
                prop_assert_eq!(ran, vec![winner]);
            }
            None => {
                prop_assert_eq!(outcome, Outcome::Unclaimed);
                prop_assert!(ran.is_empty());
            }
        }
    }

    #[test]
    fn prop_unclaimed_never_commits(
        fallback_count in 0usize..4,
        state in "[a-z_]{0,12}",
    ) {
        let store = RecordingStore::new();
        let key = ConversationKey::for_chat(1);
        let rt = runtime();
        rt.block_on(store.seed(&key, &ConversationRecord::new(state.clone(), Default::default())));

        let mut builder = ConversationHandler::builder("prop", store.clone())
            .state(state.clone(), [Transition::new(!Predicate::any(), |_, _| Ok(()))]);
        for _ in 0..fallback_count {
            builder = builder.fallback(Transition::new(Predicate::has_photo(), |_, _| Ok(())));
        }
        let handler = builder.build();

        let outcome = rt.block_on(handler.handle(&Event::text(1, "not a photo"))).unwrap();
        prop_assert_eq!(outcome, Outcome::Unclaimed);
        prop_assert_eq!(store.commit_count(), 0);

        let record = rt.block_on(store.load(&key)).unwrap();
        prop_assert_eq!(record.state, state);
    }
}
