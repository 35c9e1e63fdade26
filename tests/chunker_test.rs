//! Property tests for the smart-chunk splitter

use proptest::prelude::*;

use mnemo::chunker::{split_text, split_with, CHUNK_SIZE};

/// Journal-like text: CJK sentences, line breaks, some ASCII.
fn journal_text() -> impl Strategy<Value = String> {
    let sentence = prop_oneof![
        Just("今天去了公司，开了一个很长的会。"),
        Just("和朋友吃饭，聊了最近的生活。"),
        Just("心情一般，晚上散步了半小时。"),
        Just("meeting went fine, nothing special "),
        Just("下雨了，在家看书。\n"),
        Just("\n\n"),
        Just("记了一笔开销；买了咖啡豆。"),
    ];
    proptest::collection::vec(sentence, 0..120).prop_map(|parts| parts.concat())
}

proptest! {
    /// Every window respects the size limit.
    #[test]
    fn prop_windows_within_size(text in journal_text()) {
        for window in split_text(&text) {
            prop_assert!(window.chars().count() <= CHUNK_SIZE);
        }
    }

    /// Short inputs pass through as a single unchanged window.
    #[test]
    fn prop_short_input_unchanged(text in journal_text()) {
        prop_assume!(!text.is_empty() && text.chars().count() <= CHUNK_SIZE);
        prop_assert_eq!(split_text(&text), vec![text]);
    }

    /// No window invents or loses text: every window is a substring of the
    /// input, the first is a prefix, the last is a suffix, and together
    /// they carry at least every char of the input.
    #[test]
    fn prop_windows_cover_input(text in journal_text()) {
        prop_assume!(!text.is_empty());
        let windows = split_text(&text);
        prop_assert!(!windows.is_empty());

        prop_assert!(text.starts_with(&windows[0]));
        prop_assert!(text.ends_with(windows.last().unwrap()));
        for window in &windows {
            prop_assert!(text.contains(window.as_str()));
        }
        let window_chars: usize = windows.iter().map(|w| w.chars().count()).sum();
        prop_assert!(window_chars >= text.chars().count());
    }

    /// Splitting is deterministic.
    #[test]
    fn prop_deterministic(text in journal_text()) {
        prop_assert_eq!(split_text(&text), split_text(&text));
    }

    /// Small explicit sizes terminate and respect the limit even on
    /// pathological unbreakable input.
    #[test]
    fn prop_small_sizes_terminate(len in 1usize..500, size in 2usize..30) {
        let overlap = size / 3;
        let text: String = std::iter::repeat('词').take(len).collect();
        let windows = split_with(&text, size, overlap);
        prop_assert!(!windows.is_empty());
        for w in windows {
            prop_assert!(w.chars().count() <= size);
        }
    }
}
