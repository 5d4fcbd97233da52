//! Per-session conversation history with bounded visual payloads.
//!
//! Histories are keyed by session id, created lazily on first append and kept
//! for the life of the process. Only the most recent turn may carry a visual
//! snapshot; older snapshots are replaced with a placeholder so replayed
//! context stops growing with every screenshot taken.

use std::collections::HashMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Marker substituted for a superseded visual payload.
pub const VISUAL_PLACEHOLDER: &str = "[visual snapshot omitted]";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Turn {
    pub role: Role,
    pub text: String,
    pub visual: Option<String>,
    pub timestamp: DateTime<Utc>,
}

impl Turn {
    pub fn user(text: impl Into<String>) -> Self {
        Self {
            role: Role::User,
            text: text.into(),
            visual: None,
            timestamp: Utc::now(),
        }
    }

    pub fn assistant(text: impl Into<String>) -> Self {
        Self {
            role: Role::Assistant,
            text: text.into(),
            visual: None,
            timestamp: Utc::now(),
        }
    }

    pub fn with_visual(mut self, visual: impl Into<String>) -> Self {
        self.visual = Some(visual.into());
        self
    }

    /// Replace a carried visual payload with the placeholder. Idempotent.
    pub fn prune_visual(&mut self) {
        if self.visual.is_some() {
            self.visual = Some(VISUAL_PLACEHOLDER.to_string());
        }
    }
}

#[derive(Debug, Default)]
pub struct SessionHistories {
    sessions: HashMap<String, Vec<Turn>>,
}

impl SessionHistories {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a turn, pruning visual payloads the new turn supersedes.
    pub fn append(&mut self, session_id: &str, turn: Turn) {
        let turns = self.sessions.entry(session_id.to_string()).or_default();
        for prior in turns.iter_mut() {
            prior.prune_visual();
        }
        turns.push(turn);
    }

    pub fn get(&self, session_id: &str) -> &[Turn] {
        self.sessions
            .get(session_id)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    /// The turns to replay to the model: every turn except the most recent
    /// has its visual payload pruned.
    pub fn replay(&self, session_id: &str) -> Vec<Turn> {
        let mut turns = self.get(session_id).to_vec();
        let last = turns.len().saturating_sub(1);
        for turn in turns.iter_mut().take(last) {
            turn.prune_visual();
        }
        turns
    }

    pub fn session_count(&self) -> usize {
        self.sessions.len()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn histories_are_created_lazily() {
        let mut histories = SessionHistories::new();
        assert!(histories.get("s1").is_empty());
        assert_eq!(histories.session_count(), 0);

        histories.append("s1", Turn::user("hello"));
        assert_eq!(histories.session_count(), 1);
        assert_eq!(histories.get("s1").len(), 1);
    }

    #[test]
    fn turns_keep_append_order() {
        let mut histories = SessionHistories::new();
        histories.append("s1", Turn::user("first"));
        histories.append("s1", Turn::assistant("second"));
        histories.append("s1", Turn::user("third"));

        let texts: Vec<&str> = histories.get("s1").iter().map(|t| t.text.as_str()).collect();
        assert_eq!(texts, vec!["first", "second", "third"]);
    }

    #[test]
    fn superseded_visuals_are_replaced_with_placeholder() {
        let mut histories = SessionHistories::new();
        histories.append("s1", Turn::user("look").with_visual("data:image/webp;base64,AAAA"));
        histories.append("s1", Turn::user("next").with_visual("data:image/webp;base64,BBBB"));

        let turns = histories.get("s1");
        assert_eq!(turns[0].visual.as_deref(), Some(VISUAL_PLACEHOLDER));
        assert_eq!(
            turns[1].visual.as_deref(),
            Some("data:image/webp;base64,BBBB")
        );
    }

    #[test]
    fn pruning_is_idempotent() {
        let mut turn = Turn::user("look").with_visual("data:image/webp;base64,AAAA");
        turn.prune_visual();
        let once = turn.clone();
        turn.prune_visual();
        assert_eq!(turn, once);

        let mut without_visual = Turn::user("plain");
        without_visual.prune_visual();
        assert_eq!(without_visual.visual, None);
    }

    #[test]
    fn replay_prunes_all_but_most_recent() {
        let mut histories = SessionHistories::new();
        histories.append("s1", Turn::user("a").with_visual("shot-1"));
        histories.append("s1", Turn::assistant("b"));
        histories.append("s1", Turn::user("c").with_visual("shot-3"));

        let replayed = histories.replay("s1");
        assert_eq!(replayed[0].visual.as_deref(), Some(VISUAL_PLACEHOLDER));
        assert_eq!(replayed[1].visual, None);
        assert_eq!(replayed[2].visual.as_deref(), Some("shot-3"));
    }

    #[test]
    fn sessions_are_isolated() {
        let mut histories = SessionHistories::new();
        histories.append("s1", Turn::user("one"));
        histories.append("s2", Turn::user("two"));
        assert_eq!(histories.get("s1").len(), 1);
        assert_eq!(histories.get("s2").len(), 1);
        assert_eq!(histories.get("s1")[0].text, "one");
    }
}
