use std::collections::HashSet;

use proptest::prelude::*;

use tui_comments_app::internal::feed::FeedSync;
use tui_comments_app::internal::models::{CommentPayload, FeedPayload, SortKey};
use tui_comments_app::internal::push::PushEvent;

const PAGE_SIZE: usize = 5;

fn payload(id: u8) -> CommentPayload {
    serde_json::from_str(&format!(
        r#"{{"id": "c{id}", "text": "t", "created": "2024-01-01T00:00:00Z"}}"#
    ))
    .expect("payload should parse")
}

proptest! {
    /// No sequence of push events may ever introduce a duplicate id into
    /// the visible page or grow it past the page cap, and every event
    /// increments the total exactly once.
    #[test]
    fn push_merge_is_duplicate_free_and_capped(event_ids in proptest::collection::vec(0u8..8, 0..48)) {
        let mut feed = FeedSync::new(PAGE_SIZE, false);
        feed.begin_load();
        feed.page_loaded(1, SortKey::default(), FeedPayload {
            results: vec![payload(0), payload(1)],
            count: 2,
        });

        let mut expected_total = 2u64;
        for id in event_ids {
            feed.apply_push(&PushEvent::CommentCreated(payload(id)));
            expected_total += 1;

            let mut seen = HashSet::new();
            for comment in feed.comments() {
                prop_assert!(seen.insert(comment.id.clone()), "duplicate id {}", comment.id);
            }
            prop_assert!(feed.comments().len() <= PAGE_SIZE);
        }
        prop_assert_eq!(feed.total(), expected_total);
    }
}
