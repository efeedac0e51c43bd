use std::fmt::{Display, Formatter};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use time::OffsetDateTime;
use ulid::Ulid;

use crate::keys::{PlayerSlot, RoundNumber};

/// Warmup and knife rounds recorded by offset sources before the first live round.
pub const ROUND_OFFSET: u32 = 2;

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash, Default)]
pub enum Team {
    #[serde(rename = "t")]
    Terrorist,
    #[serde(rename = "ct")]
    CounterTerrorist,
    #[serde(rename = "spectator")]
    Spectator,
    #[default]
    #[serde(rename = "unassigned")]
    Unassigned,
}

impl Team {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Terrorist => "t",
            Self::CounterTerrorist => "ct",
            Self::Spectator => "spectator",
            Self::Unassigned => "unassigned",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value.to_ascii_lowercase().as_str() {
            "t" | "terrorist" => Some(Self::Terrorist),
            "ct" | "counterterrorist" | "counter_terrorist" => Some(Self::CounterTerrorist),
            "spectator" => Some(Self::Spectator),
            "unassigned" => Some(Self::Unassigned),
            _ => None,
        }
    }
}

/// Platform the replay was recorded on.
///
/// Offset sources record two extra rounds before the first live one, which are
/// hidden from the display numbering.
#[derive(Debug, Clone, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(from = "String", into = "String")]
pub enum DemoSource {
    Esea,
    Faceit,
    Other(String),
}

impl DemoSource {
    #[must_use]
    pub fn parse(value: &str) -> Self {
        let normalized = value.trim().to_ascii_lowercase();
        match normalized.as_str() {
            "esea" => Self::Esea,
            "faceit" => Self::Faceit,
            _ => Self::Other(normalized),
        }
    }

    #[must_use]
    pub fn as_str(&self) -> &str {
        match self {
            Self::Esea => "esea",
            Self::Faceit => "faceit",
            Self::Other(tag) => tag.as_str(),
        }
    }

    #[must_use]
    pub fn applies_round_offset(&self) -> bool {
        matches!(self, Self::Esea | Self::Faceit)
    }

    /// Maps the raw round counter to the number shown to users.
    ///
    /// Returns `None` for rounds that must be skipped entirely.
    #[must_use]
    pub fn display_round_number(&self, raw: u32) -> Option<RoundNumber> {
        if !self.applies_round_offset() {
            return Some(RoundNumber(raw));
        }
        if raw <= ROUND_OFFSET {
            return None;
        }
        Some(RoundNumber(raw - ROUND_OFFSET))
    }
}

impl Default for DemoSource {
    fn default() -> Self {
        Self::Other("matchmaking".to_string())
    }
}

impl From<String> for DemoSource {
    fn from(value: String) -> Self {
        Self::parse(&value)
    }
}

impl From<DemoSource> for String {
    fn from(value: DemoSource) -> Self {
        value.as_str().to_string()
    }
}

impl Display for DemoSource {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Vector3 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
}

impl Vector3 {
    #[must_use]
    pub fn distance(self, other: Self) -> f32 {
        let dx = self.x - other.x;
        let dy = self.y - other.y;
        let dz = self.z - other.z;
        (dx * dx + dy * dy + dz * dz).sqrt()
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct ViewAngles {
    pub pitch: f32,
    pub yaw: f32,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RoundEndReason {
    TargetBombed,
    BombDefused,
    TerroristsWin,
    CtsWin,
    TargetSaved,
    HostagesRescued,
    TerroristsSurrender,
    CtsSurrender,
    Draw,
    Unknown,
}

impl RoundEndReason {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::TargetBombed => "target_bombed",
            Self::BombDefused => "bomb_defused",
            Self::TerroristsWin => "terrorists_win",
            Self::CtsWin => "cts_win",
            Self::TargetSaved => "target_saved",
            Self::HostagesRescued => "hostages_rescued",
            Self::TerroristsSurrender => "terrorists_surrender",
            Self::CtsSurrender => "cts_surrender",
            Self::Draw => "draw",
            Self::Unknown => "unknown",
        }
    }

    #[must_use]
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "target_bombed" => Some(Self::TargetBombed),
            "bomb_defused" => Some(Self::BombDefused),
            "terrorists_win" => Some(Self::TerroristsWin),
            "cts_win" => Some(Self::CtsWin),
            "target_saved" => Some(Self::TargetSaved),
            "hostages_rescued" => Some(Self::HostagesRescued),
            "terrorists_surrender" => Some(Self::TerroristsSurrender),
            "cts_surrender" => Some(Self::CtsSurrender),
            "draw" => Some(Self::Draw),
            "unknown" => Some(Self::Unknown),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum GrenadeKind {
    HeGrenade,
    Flashbang,
    Smoke,
    Decoy,
    Molotov,
    Incendiary,
}

impl GrenadeKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::HeGrenade => "he_grenade",
            Self::Flashbang => "flashbang",
            Self::Smoke => "smoke",
            Self::Decoy => "decoy",
            Self::Molotov => "molotov",
            Self::Incendiary => "incendiary",
        }
    }

    #[must_use]
    pub fn starts_fire(self) -> bool {
        matches!(self, Self::Molotov | Self::Incendiary)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum BombAction {
    BeginPlant,
    AbortPlant,
    Planted,
    BeginDefuse,
    AbortDefuse,
    Defused,
    Exploded,
    Dropped,
    PickedUp,
}

impl BombAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BeginPlant => "begin_plant",
            Self::AbortPlant => "abort_plant",
            Self::Planted => "planted",
            Self::BeginDefuse => "begin_defuse",
            Self::AbortDefuse => "abort_defuse",
            Self::Defused => "defused",
            Self::Exploded => "exploded",
            Self::Dropped => "dropped",
            Self::PickedUp => "picked_up",
        }
    }

    /// Actions that end up in the game-event log as highlights.
    #[must_use]
    pub fn is_important(self) -> bool {
        matches!(self, Self::Planted | Self::Defused | Self::Exploded)
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ZoneKind {
    BombZone,
    BuyZone,
}

impl ZoneKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::BombZone => "bomb_zone",
            Self::BuyZone => "buy_zone",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum ZoneAction {
    Enter,
    Exit,
}

impl ZoneAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Enter => "enter",
            Self::Exit => "exit",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EconomyAction {
    Purchase,
    Pickup,
    Equip,
}

impl EconomyAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Purchase => "purchase",
            Self::Pickup => "pickup",
            Self::Equip => "equip",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum EquipmentAction {
    Pickup,
    Equip,
    Drop,
}

impl EquipmentAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pickup => "pickup",
            Self::Equip => "equip",
            Self::Drop => "drop",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum InfernoAction {
    Start,
    Expire,
    Extinguish,
    MolotovDetonate,
}

impl InfernoAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Start => "start",
            Self::Expire => "expire",
            Self::Extinguish => "extinguish",
            Self::MolotovDetonate => "molotov_detonate",
        }
    }
}

/// What happened to a hostage. Only a call for help has no acting player.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum HostageAction {
    Follows,
    Hurt,
    Killed,
    Rescued,
    StopsFollowing,
    CallForHelp,
}

impl HostageAction {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Follows => "follows",
            Self::Hurt => "hurt",
            Self::Killed => "killed",
            Self::Rescued => "rescued",
            Self::StopsFollowing => "stops_following",
            Self::CallForHelp => "call_for_help",
        }
    }
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Hash)]
#[serde(rename_all = "snake_case")]
pub enum AssistKind {
    Flash,
    Damage,
}

impl AssistKind {
    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Flash => "flash",
            Self::Damage => "damage",
        }
    }
}

/// Mutable attributes of a player; refreshed on connect and team changes.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct PlayerProfile {
    pub steam_id: u64,
    pub name: String,
    pub team: Team,
    pub is_bot: bool,
    pub is_hltv: bool,
}

/// A player registered for one ingestion run. The slot never changes once created.
#[derive(Debug)]
pub struct Player {
    slot: PlayerSlot,
    profile: RwLock<PlayerProfile>,
}

impl Player {
    #[must_use]
    pub fn new(slot: PlayerSlot, profile: PlayerProfile) -> Self {
        Self {
            slot,
            profile: RwLock::new(profile),
        }
    }

    #[must_use]
    pub fn slot(&self) -> PlayerSlot {
        self.slot
    }

    #[must_use]
    pub fn profile(&self) -> PlayerProfile {
        self.profile.read().clone()
    }

    pub fn update(&self, apply: impl FnOnce(&mut PlayerProfile)) {
        apply(&mut self.profile.write());
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Round {
    pub number: RoundNumber,
    pub raw_number: u32,
    pub start_tick: u32,
    pub start_time: f32,
    pub end_tick: Option<u32>,
    pub end_time: Option<f32>,
    pub t_score_start: u32,
    pub ct_score_start: u32,
    pub t_score_end: Option<u32>,
    pub ct_score_end: Option<u32>,
    pub winner: Option<Team>,
    pub end_reason: Option<RoundEndReason>,
}

impl Round {
    #[must_use]
    pub fn is_closed(&self) -> bool {
        self.end_tick.is_some()
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct MatchRecord {
    pub map_name: String,
    pub started_at: OffsetDateTime,
    pub ended_at: Option<OffsetDateTime>,
    pub finished: bool,
    pub total_rounds: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemoFileInfo {
    pub run_id: Ulid,
    pub file_name: String,
    pub file_size: u64,
    pub source: DemoSource,
    pub parsed_at: OffsetDateTime,
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    #[test]
    fn offset_sources_shift_display_round() {
        assert_eq!(DemoSource::Faceit.display_round_number(3), Some(RoundNumber(1)));
        assert_eq!(DemoSource::Esea.display_round_number(17), Some(RoundNumber(15)));
    }

    #[test]
    fn offset_sources_skip_warmup_rounds() {
        for raw in 0..=ROUND_OFFSET {
            assert_eq!(DemoSource::Faceit.display_round_number(raw), None);
            assert_eq!(DemoSource::Esea.display_round_number(raw), None);
        }
    }

    #[test]
    fn other_sources_keep_raw_round() {
        let matchmaking = DemoSource::parse("matchmaking");
        assert_eq!(matchmaking, DemoSource::Other("matchmaking".to_string()));
        for raw in 1..5 {
            assert_eq!(matchmaking.display_round_number(raw), Some(RoundNumber(raw)));
        }
    }

    #[test]
    fn source_parse_is_case_insensitive() {
        assert_eq!(DemoSource::parse(" FACEIT "), DemoSource::Faceit);
        assert_eq!(DemoSource::parse("Esea").as_str(), "esea");
    }

    #[test]
    fn team_parse_accepts_short_and_long_forms() {
        assert_eq!(Team::parse("CT"), Some(Team::CounterTerrorist));
        assert_eq!(Team::parse("terrorist"), Some(Team::Terrorist));
        assert_eq!(Team::parse("blue"), None);
    }

    #[test]
    fn round_end_reason_round_trips_through_str() {
        for reason in [
            RoundEndReason::TargetBombed,
            RoundEndReason::BombDefused,
            RoundEndReason::CtsWin,
            RoundEndReason::Draw,
        ] {
            assert_eq!(RoundEndReason::parse(reason.as_str()), Some(reason));
        }
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(64))]

        #[test]
        fn prop_offset_keeps_live_rounds_contiguous(raw in 0u32..400) {
            match DemoSource::Faceit.display_round_number(raw) {
                Some(RoundNumber(display)) => {
                    prop_assert!(raw > ROUND_OFFSET);
                    prop_assert_eq!(display + ROUND_OFFSET, raw);
                    prop_assert!(display >= 1);
                }
                None => prop_assert!(raw <= ROUND_OFFSET),
            }
            prop_assert_eq!(
                DemoSource::Other("wingman".to_string()).display_round_number(raw),
                Some(RoundNumber(raw))
            );
        }
    }
}
