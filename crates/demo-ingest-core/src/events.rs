use std::collections::VecDeque;

use serde::{Deserialize, Serialize};

use crate::keys::PlayerSlot;
use crate::model::{
    BombAction, GrenadeKind, HostageAction, InfernoAction, PlayerProfile, RoundEndReason, Team,
    Vector3, ViewAngles, ZoneAction, ZoneKind,
};
use crate::IngestError;

/// Replay metadata available before the first event.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct DemoHeader {
    pub map_name: String,
    #[serde(default)]
    pub file_name: String,
    #[serde(default)]
    pub file_size: u64,
}

/// Snapshot of a player entity as seen by the decoder at event time.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
#[serde(default)]
pub struct PlayerRef {
    pub slot: PlayerSlot,
    pub steam_id: u64,
    pub name: String,
    pub team: Team,
    pub is_bot: bool,
    pub is_hltv: bool,
    pub position: Vector3,
    pub view: ViewAngles,
    pub health: u32,
    pub armor: u32,
    pub money: u32,
    pub has_helmet: bool,
    pub has_defuser: bool,
    pub is_alive: bool,
    pub is_scoped: bool,
}

impl PlayerRef {
    /// Another player on the same playing side. Spectators have no teammates.
    #[must_use]
    pub fn is_teammate_of(&self, other: &PlayerRef) -> bool {
        self.slot != other.slot
            && self.team == other.team
            && matches!(self.team, Team::Terrorist | Team::CounterTerrorist)
    }

    #[must_use]
    pub fn profile(&self) -> PlayerProfile {
        PlayerProfile {
            steam_id: self.steam_id,
            name: self.name.clone(),
            team: self.team,
            is_bot: self.is_bot,
            is_hltv: self.is_hltv,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct DemoEvent {
    pub tick: u32,
    /// Seconds of game time, monotonic within a round.
    pub game_time: f32,
    #[serde(flatten)]
    pub kind: EventKind,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EventKind {
    RoundStart {
        #[serde(default)]
        t_score: u32,
        #[serde(default)]
        ct_score: u32,
        #[serde(default)]
        roster: Vec<PlayerRef>,
    },
    RoundEnd {
        winner: Option<Team>,
        #[serde(default)]
        reason: Option<RoundEndReason>,
        #[serde(default)]
        t_score: u32,
        #[serde(default)]
        ct_score: u32,
        #[serde(default)]
        roster: Vec<PlayerRef>,
    },
    PlayerConnect {
        player: PlayerRef,
    },
    PlayerDisconnect {
        player: PlayerRef,
        #[serde(default)]
        reason: String,
    },
    PlayerTeam {
        player: PlayerRef,
        team: Team,
    },
    PlayerChangeName {
        player: PlayerRef,
        new_name: String,
    },
    PlayerDeath {
        victim: PlayerRef,
        #[serde(default)]
        attacker: Option<PlayerRef>,
        #[serde(default)]
        assister: Option<PlayerRef>,
        #[serde(default)]
        weapon: String,
        #[serde(default)]
        headshot: bool,
        #[serde(default)]
        penetrated: u32,
        #[serde(default)]
        noscope: bool,
        #[serde(default)]
        thrusmoke: bool,
        #[serde(default)]
        attacker_blind: bool,
        #[serde(default)]
        assisted_flash: bool,
    },
    PlayerHurt {
        victim: PlayerRef,
        #[serde(default)]
        attacker: Option<PlayerRef>,
        #[serde(default)]
        weapon: String,
        dmg_health: u32,
        #[serde(default)]
        dmg_armor: u32,
        #[serde(default)]
        hitgroup: u32,
    },
    WeaponFire {
        player: PlayerRef,
        weapon: String,
        #[serde(default)]
        silenced: bool,
    },
    GrenadeDetonate {
        player: PlayerRef,
        grenade: GrenadeKind,
        position: Vector3,
        #[serde(default)]
        entity_id: u32,
    },
    Bomb {
        player: PlayerRef,
        action: BombAction,
        #[serde(default)]
        site: Option<u32>,
    },
    Zone {
        player: PlayerRef,
        zone: ZoneKind,
        action: ZoneAction,
    },
    ItemPurchase {
        player: PlayerRef,
        item: String,
        #[serde(default)]
        cost: u32,
    },
    ItemPickup {
        player: PlayerRef,
        item: String,
    },
    ItemEquip {
        player: PlayerRef,
        item: String,
    },
    ItemDrop {
        player: PlayerRef,
        item: String,
    },
    Inferno {
        action: InfernoAction,
        #[serde(default)]
        thrower: Option<PlayerRef>,
        #[serde(default)]
        entity_id: u32,
        #[serde(default)]
        position: Vector3,
    },
    PlayerBlind {
        player: PlayerRef,
        #[serde(default)]
        attacker: Option<PlayerRef>,
        /// Seconds of blindness.
        duration: f32,
    },
    Hostage {
        action: HostageAction,
        #[serde(default)]
        player: Option<PlayerRef>,
        #[serde(default)]
        hostage: u32,
    },
    Chat {
        player: PlayerRef,
        message: String,
        #[serde(default)]
        team_only: bool,
    },
    PositionSample {
        roster: Vec<PlayerRef>,
    },
}

impl EventKind {
    #[must_use]
    pub fn name(&self) -> &'static str {
        match self {
            Self::RoundStart { .. } => "round_start",
            Self::RoundEnd { .. } => "round_end",
            Self::PlayerConnect { .. } => "player_connect",
            Self::PlayerDisconnect { .. } => "player_disconnect",
            Self::PlayerTeam { .. } => "player_team",
            Self::PlayerChangeName { .. } => "player_change_name",
            Self::PlayerDeath { .. } => "player_death",
            Self::PlayerHurt { .. } => "player_hurt",
            Self::WeaponFire { .. } => "weapon_fire",
            Self::GrenadeDetonate { .. } => "grenade_detonate",
            Self::Bomb { .. } => "bomb",
            Self::Zone { .. } => "zone",
            Self::ItemPurchase { .. } => "item_purchase",
            Self::ItemPickup { .. } => "item_pickup",
            Self::ItemEquip { .. } => "item_equip",
            Self::ItemDrop { .. } => "item_drop",
            Self::Inferno { .. } => "inferno",
            Self::PlayerBlind { .. } => "player_blind",
            Self::Hostage { .. } => "hostage",
            Self::Chat { .. } => "chat",
            Self::PositionSample { .. } => "position_sample",
        }
    }
}

/// Source of replay events.
///
/// Implementations open their input when constructed, so a replay that cannot be
/// opened never produces a decoder and nothing is staged.
pub trait DemoDecoder {
    fn header(&self) -> &DemoHeader;

    /// Pulls the next event. `Ok(None)` marks the end of the stream.
    ///
    /// # Errors
    /// Returns [`IngestError::Decode`] when the underlying stream cannot be read.
    fn next_event(&mut self) -> Result<Option<DemoEvent>, IngestError>;
}

/// Decoder over events already held in memory.
#[derive(Debug, Clone, Default)]
pub struct VecDecoder {
    header: DemoHeader,
    events: VecDeque<DemoEvent>,
}

impl VecDecoder {
    #[must_use]
    pub fn new(header: DemoHeader, events: Vec<DemoEvent>) -> Self {
        Self {
            header,
            events: events.into(),
        }
    }
}

impl DemoDecoder for VecDecoder {
    fn header(&self) -> &DemoHeader {
        &self.header
    }

    fn next_event(&mut self) -> Result<Option<DemoEvent>, IngestError> {
        Ok(self.events.pop_front())
    }
}
