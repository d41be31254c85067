//! Unread reconciliation: given a freshly fetched history window and the last
//! marker an agent has seen, compute the unread suffix. Pure functions only,
//! no backend involved.

use crate::ChatMessage;
use serde::{Deserialize, Serialize};

/// Messages whose text starts with this (case-insensitive) flag the whole
/// batch as urgent.
pub const URGENT_PREFIX: &str = "!urgent";

/// Unread subset of `messages`, which must be ordered oldest-to-newest.
///
/// With a marker, the unread part is the suffix strictly after the message
/// whose id equals the marker. A marker that is absent, or that scrolled out
/// of the fetched window, makes the entire window unread: over-notifying is
/// preferred to silently missing messages.
pub fn unread_slice<'a>(
    messages: &'a [ChatMessage],
    last_marker: Option<&str>,
) -> &'a [ChatMessage] {
    let Some(marker) = last_marker else {
        return messages;
    };
    match messages
        .iter()
        .position(|msg| msg.event_id.as_deref() == Some(marker))
    {
        Some(index) => &messages[index + 1..],
        None => messages,
    }
}

pub fn is_urgent(messages: &[ChatMessage]) -> bool {
    messages.iter().any(|msg| {
        // Byte-wise comparison: the flag is pure ASCII, and slicing the text
        // by byte index would panic on multibyte characters.
        msg.text
            .as_bytes()
            .get(..URGENT_PREFIX.len())
            .is_some_and(|prefix| prefix.eq_ignore_ascii_case(URGENT_PREFIX.as_bytes()))
    })
}

/// Per-conversation unread signal produced by a notify sweep.
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize, PartialEq, Eq)]
pub struct UnreadSummary {
    pub count: usize,
    pub urgent: bool,
}

/// Reconcile one fetched window against a stored marker.
///
/// Returns the summary plus the newest fetched marker, which the caller should
/// persist whenever any messages were fetched, unread or not, so freshness
/// tracking keeps advancing.
pub fn reconcile(
    messages: &[ChatMessage],
    last_marker: Option<&str>,
) -> (UnreadSummary, Option<String>) {
    let unread = unread_slice(messages, last_marker);
    let summary = UnreadSummary {
        count: unread.len(),
        urgent: is_urgent(unread),
    };
    let newest = messages.last().and_then(|msg| msg.event_id.clone());
    (summary, newest)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn msg(id: &str, text: &str) -> ChatMessage {
        ChatMessage {
            sender: "@peer:test".to_string(),
            text: text.to_string(),
            event_id: Some(id.to_string()),
            timestamp_ms: None,
        }
    }

    fn window(ids: &[&str]) -> Vec<ChatMessage> {
        ids.iter().map(|id| msg(id, "hello")).collect()
    }

    #[test]
    fn marker_at_index_k_yields_suffix_after_k() {
        let messages = window(&["m1", "m2", "m3", "m4", "m5"]);
        for (k, message) in messages.iter().enumerate() {
            let unread = unread_slice(&messages, message.event_id.as_deref());
            assert_eq!(unread, &messages[k + 1..]);
        }
    }

    #[test]
    fn marker_m5_against_m3_to_m7_leaves_m6_m7() {
        let messages = window(&["m3", "m4", "m5", "m6", "m7"]);
        let unread = unread_slice(&messages, Some("m5"));
        let ids: Vec<_> = unread.iter().filter_map(|m| m.event_id.as_deref()).collect();
        assert_eq!(ids, vec!["m6", "m7"]);
    }

    #[test]
    fn absent_marker_returns_whole_window_in_order() {
        let messages = window(&["m1", "m2", "m3"]);
        assert_eq!(unread_slice(&messages, None), &messages[..]);
    }

    #[test]
    fn marker_not_in_window_returns_whole_window() {
        let messages = window(&["m4", "m5", "m6"]);
        assert_eq!(unread_slice(&messages, Some("m1")), &messages[..]);
    }

    #[test]
    fn empty_window_is_empty_regardless_of_marker() {
        assert!(unread_slice(&[], Some("m1")).is_empty());
        assert!(unread_slice(&[], None).is_empty());
    }

    #[test]
    fn urgency_is_case_insensitive_prefix_match() {
        assert!(is_urgent(&[msg("m1", "!URGENT ping")]));
        assert!(is_urgent(&[msg("m1", "!urgent build broken")]));
        assert!(!is_urgent(&[msg("m1", "urgent but no bang")]));
        assert!(!is_urgent(&[msg("m1", "we can mention !urgent mid-text")]));
        assert!(!is_urgent(&[]));
    }

    #[test]
    fn urgency_requires_the_flag_at_the_very_start() {
        assert!(!is_urgent(&[msg("m1", "  !urgent indented")]));
        assert!(!is_urgent(&[msg("m1", "\t!urgent tabbed")]));
    }

    #[test]
    fn urgency_check_handles_multibyte_text() {
        assert!(!is_urgent(&[msg("m1", "ééééé")]));
        assert!(!is_urgent(&[msg("m1", "日本語のメッセージです")]));
        assert!(!is_urgent(&[msg("m1", "é")]));
        assert!(is_urgent(&[msg("m1", "!urgent déploiement cassé")]));
    }

    #[test]
    fn reconcile_reports_count_urgency_and_newest_marker() {
        let messages = vec![
            msg("m1", "old news"),
            msg("m2", "!urgent fire"),
            msg("m3", "fine again"),
        ];
        let (summary, newest) = reconcile(&messages, Some("m1"));
        assert_eq!(summary, UnreadSummary { count: 2, urgent: true });
        assert_eq!(newest.as_deref(), Some("m3"));

        // Urgency only considers the unread suffix.
        let (summary, _) = reconcile(&messages, Some("m2"));
        assert_eq!(summary, UnreadSummary { count: 1, urgent: false });
    }

    #[test]
    fn reconcile_of_empty_window_has_no_marker_to_advance() {
        let (summary, newest) = reconcile(&[], Some("m1"));
        assert_eq!(summary, UnreadSummary::default());
        assert!(newest.is_none());
    }
}
