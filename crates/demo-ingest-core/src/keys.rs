use std::fmt::{Debug, Display, Formatter};
use std::hash::Hash;

use serde::{Deserialize, Serialize};

/// Selects the key types a fact record carries for its round and player references.
///
/// Facts are staged as `Fact<Provisional>` and only become `Fact<Resolved>` through the
/// resolver, so a provisional key can never reach the store.
pub trait KeySpace: Copy + Debug + Eq + 'static {
    type Round: Copy + Debug + Display + Eq + Hash;
    type Player: Copy + Debug + Display + Eq + Hash;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Provisional;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Resolved;

impl KeySpace for Provisional {
    type Round = RoundNumber;
    type Player = PlayerSlot;
}

impl KeySpace for Resolved {
    type Round = RoundId;
    type Player = PlayerId;
}

/// Display round number; unique and increasing within one run.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RoundNumber(pub u32);

/// Entity slot of a player within one replay.
#[derive(
    Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default,
)]
#[serde(transparent)]
pub struct PlayerSlot(pub u32);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct RoundId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct PlayerId(pub i64);

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(transparent)]
pub struct MatchId(pub i64);

impl Display for RoundNumber {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "round#{}", self.0)
    }
}

impl Display for PlayerSlot {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot#{}", self.0)
    }
}

impl Display for RoundId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for PlayerId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl Display for MatchId {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// A provisional key that failed to resolve, as reported in warnings.
#[derive(Debug, Clone, Copy, Eq, PartialEq, Hash)]
pub enum ProvisionalKey {
    Round(RoundNumber),
    Player(PlayerSlot),
}

impl Display for ProvisionalKey {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Round(number) => Display::fmt(number, f),
            Self::Player(slot) => Display::fmt(slot, f),
        }
    }
}
