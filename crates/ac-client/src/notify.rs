//! Unread sweep across every subscribed channel and known direct peer.

use crate::{BackendError, ChatBackend};
use ac_core::reconcile::{reconcile, UnreadSummary};
use ac_core::Target;
use ac_state::{StateError, StateStore};
use std::collections::BTreeMap;
use tracing::warn;

/// How many recent messages each sweep fetches per conversation.
pub const HISTORY_WINDOW: usize = 20;

/// Fetch a bounded window for each conversation, reconcile it against the
/// stored marker, and advance the marker to the newest fetched message.
///
/// Fetches run concurrently. A failing conversation is logged and contributes
/// a zero summary so one broken room never hides the others; only state-file
/// errors abort the sweep.
pub async fn check_unread(
    backend: &dyn ChatBackend,
    store: &StateStore,
) -> Result<BTreeMap<String, UnreadSummary>, StateError> {
    let state = store.load()?;

    let mut targets: Vec<Target> = Vec::new();
    for channel in &state.subscribed_channels {
        targets.push(Target::Channel(channel.clone()));
    }
    for peer in state.last_seen.direct.keys() {
        targets.push(Target::Direct(peer.clone()));
    }

    let fetches = targets
        .iter()
        .map(|target| backend.fetch_history(target, HISTORY_WINDOW));
    let windows: Vec<Result<_, BackendError>> = futures::future::join_all(fetches).await;

    let mut results = BTreeMap::new();
    for (target, window) in targets.iter().zip(windows) {
        let summary = match window {
            Ok(messages) => {
                let marker = match target {
                    Target::Channel(name) => state.channel_entry(name),
                    Target::Direct(name) => state.direct_entry(name),
                }
                .and_then(|entry| entry.marker.as_deref());

                let (summary, newest) = reconcile(&messages, marker);
                // Advance freshness whenever anything was fetched, even with
                // zero unread.
                if let Some(newest) = newest {
                    match target {
                        Target::Channel(name) => store.touch_channel(name, Some(&newest))?,
                        Target::Direct(name) => store.touch_direct(name, Some(&newest))?,
                    };
                }
                summary
            }
            Err(err) => {
                warn!(target = %target, "unread check failed: {err}");
                UnreadSummary::default()
            }
        };
        results.insert(target.to_string(), summary);
    }

    Ok(results)
}
