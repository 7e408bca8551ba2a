use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};

/// The four reaction kinds every post carries a counter for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReactionKind {
    ThumbsUp,
    Heart,
    Laugh,
    Angry,
}

impl ReactionKind {
    pub const ALL: [ReactionKind; 4] = [Self::ThumbsUp, Self::Heart, Self::Laugh, Self::Angry];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ThumbsUp => "thumbs_up",
            Self::Heart => "heart",
            Self::Laugh => "laugh",
            Self::Angry => "angry",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|k| k.as_str() == s)
    }
}

impl fmt::Display for ReactionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Per-post reaction counters.
///
/// The canonical kinds are named fields so they are always present on the
/// wire, even for rows stored before the first reaction. Any other label a
/// client sends is kept in `extra` and serialised alongside them.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Reactions {
    #[serde(default)]
    pub thumbs_up: u32,
    #[serde(default)]
    pub heart: u32,
    #[serde(default)]
    pub laugh: u32,
    #[serde(default)]
    pub angry: u32,
    #[serde(flatten)]
    pub extra: BTreeMap<String, u32>,
}

impl Reactions {
    pub fn get(&self, kind: &str) -> u32 {
        match ReactionKind::parse(kind) {
            Some(k) => *self.canonical(k),
            None => self.extra.get(kind).copied().unwrap_or(0),
        }
    }

    fn canonical(&self, kind: ReactionKind) -> &u32 {
        match kind {
            ReactionKind::ThumbsUp => &self.thumbs_up,
            ReactionKind::Heart => &self.heart,
            ReactionKind::Laugh => &self.laugh,
            ReactionKind::Angry => &self.angry,
        }
    }

    fn slot_mut(&mut self, kind: &str) -> &mut u32 {
        match ReactionKind::parse(kind) {
            Some(ReactionKind::ThumbsUp) => &mut self.thumbs_up,
            Some(ReactionKind::Heart) => &mut self.heart,
            Some(ReactionKind::Laugh) => &mut self.laugh,
            Some(ReactionKind::Angry) => &mut self.angry,
            None => self.extra.entry(kind.to_string()).or_insert(0),
        }
    }

    /// Flip the counter for `kind` between 0 and 1 and return the new value.
    ///
    /// There is no per-caller ledger: the slot is shared by everyone, so two
    /// callers reacting in a row cancel each other out.
    pub fn toggle(&mut self, kind: &str) -> u32 {
        let slot = self.slot_mut(kind);
        *slot = if *slot == 0 { 1 } else { 0 };
        *slot
    }
}

/// Apply a toggle to possibly-absent stored reactions, initialising the
/// canonical counters first.
pub fn apply_toggle(stored: Option<Reactions>, kind: &str) -> Reactions {
    let mut reactions = stored.unwrap_or_default();
    reactions.toggle(kind);
    reactions
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn absent_reactions_initialise_all_kinds() {
        let r = apply_toggle(None, "laugh");
        assert_eq!(r.thumbs_up, 0);
        assert_eq!(r.heart, 0);
        assert_eq!(r.laugh, 1);
        assert_eq!(r.angry, 0);
        assert!(r.extra.is_empty());
    }

    #[test]
    fn toggle_alternates() {
        let mut r = Reactions::default();
        let seq: Vec<u32> = (0..4).map(|_| r.toggle("heart")).collect();
        assert_eq!(seq, vec![1, 0, 1, 0]);
    }

    #[test]
    fn toggle_resets_counts_above_one() {
        let mut r = Reactions { angry: 7, ..Default::default() };
        assert_eq!(r.toggle("angry"), 0);
    }

    #[test]
    fn unknown_kind_goes_to_extra() {
        let mut r = Reactions::default();
        assert_eq!(r.toggle("fire"), 1);
        assert_eq!(r.get("fire"), 1);
        let v = serde_json::to_value(&r).unwrap();
        assert_eq!(v["fire"], 1);
        assert_eq!(v["thumbs_up"], 0);
    }

    #[test]
    fn partial_json_fills_missing_canonical_keys() {
        let r: Reactions = serde_json::from_str(r#"{"heart":3,"wow":2}"#).unwrap();
        assert_eq!(r.heart, 3);
        assert_eq!(r.thumbs_up, 0);
        assert_eq!(r.extra.get("wow"), Some(&2));
        let v = serde_json::to_value(&r).unwrap();
        for kind in ReactionKind::ALL {
            assert!(v.get(kind.as_str()).is_some(), "missing {kind}");
        }
    }
}
