use serde::{Deserialize, Serialize};

use crate::keys::KeySpace;
use crate::model::{
    AssistKind, BombAction, EconomyAction, EquipmentAction, GrenadeKind, HostageAction,
    InfernoAction, Team, Vector3, ViewAngles, ZoneAction, ZoneKind,
};

/// When a fact happened.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Default)]
pub struct Stamp {
    pub tick: u32,
    pub game_time: f32,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Kill<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub victim: K::Player,
    pub killer: Option<K::Player>,
    pub assister: Option<K::Player>,
    pub weapon: String,
    pub headshot: bool,
    pub penetrated: u32,
    pub noscope: bool,
    pub thrusmoke: bool,
    pub attacker_blind: bool,
    /// Killer and victim were on the same side.
    pub team_kill: bool,
    pub assist: Option<AssistKind>,
    pub victim_position: Vector3,
    pub killer_position: Option<Vector3>,
    pub killer_view: Option<ViewAngles>,
    pub distance: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Damage<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub victim: K::Player,
    pub attacker: Option<K::Player>,
    pub weapon: String,
    pub dmg_health: u32,
    pub dmg_armor: u32,
    pub health_after: u32,
    pub armor_after: u32,
    pub hitgroup: u32,
    pub team_damage: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct WeaponFire<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: K::Player,
    pub weapon: String,
    pub scoped: bool,
    pub silenced: bool,
    pub position: Vector3,
    pub view: ViewAngles,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Grenade<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub thrower: K::Player,
    pub grenade: GrenadeKind,
    pub entity_id: u32,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Bomb<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: K::Player,
    pub action: BombAction,
    pub site: Option<u32>,
    pub has_kit: bool,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ZoneEvent<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: K::Player,
    pub zone: ZoneKind,
    pub action: ZoneAction,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct EconomyEvent<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: K::Player,
    pub action: EconomyAction,
    pub item: String,
    /// Only set for purchases.
    pub item_cost: Option<u32>,
    pub money_before: u32,
    pub money_after: u32,
}

impl<K: KeySpace> EconomyEvent<K> {
    #[must_use]
    pub fn money_change(&self) -> i64 {
        i64::from(self.money_after) - i64::from(self.money_before)
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Equipment<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: K::Player,
    pub action: EquipmentAction,
    pub item: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct InfernoEvent<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub thrower: Option<K::Player>,
    pub action: InfernoAction,
    pub entity_id: u32,
    pub position: Vector3,
}

/// A player blinded by a flashbang; the flasher is unknown for world flashes.
#[derive(Debug, Clone, PartialEq)]
pub struct FlashEvent<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub flashed: K::Player,
    pub flasher: Option<K::Player>,
    /// Seconds of blindness.
    pub duration: f32,
    pub flashed_team: Team,
    pub flasher_team: Option<Team>,
    pub team_flash: bool,
    pub self_flash: bool,
    pub flashed_position: Vector3,
    pub distance: Option<f32>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct HostageEvent<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: Option<K::Player>,
    pub player_team: Option<Team>,
    pub action: HostageAction,
    pub hostage_entity: u32,
    pub position: Vector3,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatMessage<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub sender: K::Player,
    pub message: String,
    pub team_only: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct PlayerPosition<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: K::Player,
    pub position: Vector3,
    pub view: ViewAngles,
    pub health: u32,
    pub armor: u32,
    pub is_alive: bool,
}

#[derive(Debug, Clone, PartialEq)]
pub struct GameEvent<K: KeySpace> {
    pub round: K::Round,
    pub at: Stamp,
    pub player: Option<K::Player>,
    pub name: String,
    pub description: String,
    pub important: bool,
}

/// Per-player round line, opened at round start and patched at round end.
#[derive(Debug, Clone, PartialEq)]
pub struct PlayerRoundStats<K: KeySpace> {
    pub round: K::Round,
    pub player: K::Player,
    pub team: Team,
    pub start_money: u32,
    pub end_money: Option<u32>,
    pub start_health: u32,
    pub end_health: Option<u32>,
    pub start_armor: u32,
    pub end_armor: Option<u32>,
    pub has_helmet: bool,
    pub has_defuser: bool,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub damage: u32,
    pub shots_fired: u32,
    pub survived: Option<bool>,
}

#[derive(Debug, Clone, Copy, Serialize, Deserialize, Eq, PartialEq, Ord, PartialOrd, Hash)]
#[serde(rename_all = "snake_case")]
pub enum RecordKind {
    Kill,
    Damage,
    WeaponFire,
    Grenade,
    Bomb,
    ZoneEvent,
    EconomyEvent,
    Equipment,
    InfernoEvent,
    FlashEvent,
    HostageEvent,
    ChatMessage,
    PlayerPosition,
    GameEvent,
    PlayerRoundStats,
}

impl RecordKind {
    pub const COUNT: usize = 15;

    /// Write order used by the batch writer.
    pub const ALL: [Self; Self::COUNT] = [
        Self::Kill,
        Self::Damage,
        Self::WeaponFire,
        Self::Grenade,
        Self::Bomb,
        Self::ZoneEvent,
        Self::EconomyEvent,
        Self::Equipment,
        Self::InfernoEvent,
        Self::FlashEvent,
        Self::HostageEvent,
        Self::ChatMessage,
        Self::PlayerPosition,
        Self::GameEvent,
        Self::PlayerRoundStats,
    ];

    #[must_use]
    pub fn index(self) -> usize {
        self as usize
    }

    #[must_use]
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Kill => "kill",
            Self::Damage => "damage",
            Self::WeaponFire => "weapon_fire",
            Self::Grenade => "grenade",
            Self::Bomb => "bomb",
            Self::ZoneEvent => "zone_event",
            Self::EconomyEvent => "economy_event",
            Self::Equipment => "equipment",
            Self::InfernoEvent => "inferno_event",
            Self::FlashEvent => "flash_event",
            Self::HostageEvent => "hostage_event",
            Self::ChatMessage => "chat_message",
            Self::PlayerPosition => "player_position",
            Self::GameEvent => "game_event",
            Self::PlayerRoundStats => "player_round_stats",
        }
    }
}

/// A staged or resolved fact record, tagged by kind.
#[derive(Debug, Clone, PartialEq)]
pub enum Fact<K: KeySpace> {
    Kill(Kill<K>),
    Damage(Damage<K>),
    WeaponFire(WeaponFire<K>),
    Grenade(Grenade<K>),
    Bomb(Bomb<K>),
    ZoneEvent(ZoneEvent<K>),
    EconomyEvent(EconomyEvent<K>),
    Equipment(Equipment<K>),
    InfernoEvent(InfernoEvent<K>),
    FlashEvent(FlashEvent<K>),
    HostageEvent(HostageEvent<K>),
    ChatMessage(ChatMessage<K>),
    PlayerPosition(PlayerPosition<K>),
    GameEvent(GameEvent<K>),
    PlayerRoundStats(PlayerRoundStats<K>),
}

impl<K: KeySpace> Fact<K> {
    #[must_use]
    pub fn kind(&self) -> RecordKind {
        match self {
            Self::Kill(_) => RecordKind::Kill,
            Self::Damage(_) => RecordKind::Damage,
            Self::WeaponFire(_) => RecordKind::WeaponFire,
            Self::Grenade(_) => RecordKind::Grenade,
            Self::Bomb(_) => RecordKind::Bomb,
            Self::ZoneEvent(_) => RecordKind::ZoneEvent,
            Self::EconomyEvent(_) => RecordKind::EconomyEvent,
            Self::Equipment(_) => RecordKind::Equipment,
            Self::InfernoEvent(_) => RecordKind::InfernoEvent,
            Self::FlashEvent(_) => RecordKind::FlashEvent,
            Self::HostageEvent(_) => RecordKind::HostageEvent,
            Self::ChatMessage(_) => RecordKind::ChatMessage,
            Self::PlayerPosition(_) => RecordKind::PlayerPosition,
            Self::GameEvent(_) => RecordKind::GameEvent,
            Self::PlayerRoundStats(_) => RecordKind::PlayerRoundStats,
        }
    }

    #[must_use]
    pub fn round(&self) -> K::Round {
        match self {
            Self::Kill(fact) => fact.round,
            Self::Damage(fact) => fact.round,
            Self::WeaponFire(fact) => fact.round,
            Self::Grenade(fact) => fact.round,
            Self::Bomb(fact) => fact.round,
            Self::ZoneEvent(fact) => fact.round,
            Self::EconomyEvent(fact) => fact.round,
            Self::Equipment(fact) => fact.round,
            Self::InfernoEvent(fact) => fact.round,
            Self::FlashEvent(fact) => fact.round,
            Self::HostageEvent(fact) => fact.round,
            Self::ChatMessage(fact) => fact.round,
            Self::PlayerPosition(fact) => fact.round,
            Self::GameEvent(fact) => fact.round,
            Self::PlayerRoundStats(fact) => fact.round,
        }
    }

    /// Every player reference the fact carries, mandatory roles first.
    #[must_use]
    pub fn players(&self) -> Vec<K::Player> {
        match self {
            Self::Kill(fact) => std::iter::once(fact.victim)
                .chain(fact.killer)
                .chain(fact.assister)
                .collect(),
            Self::Damage(fact) => std::iter::once(fact.victim).chain(fact.attacker).collect(),
            Self::WeaponFire(fact) => vec![fact.player],
            Self::Grenade(fact) => vec![fact.thrower],
            Self::Bomb(fact) => vec![fact.player],
            Self::ZoneEvent(fact) => vec![fact.player],
            Self::EconomyEvent(fact) => vec![fact.player],
            Self::Equipment(fact) => vec![fact.player],
            Self::InfernoEvent(fact) => fact.thrower.into_iter().collect(),
            Self::FlashEvent(fact) => std::iter::once(fact.flashed).chain(fact.flasher).collect(),
            Self::HostageEvent(fact) => fact.player.into_iter().collect(),
            Self::ChatMessage(fact) => vec![fact.sender],
            Self::PlayerPosition(fact) => vec![fact.player],
            Self::GameEvent(fact) => fact.player.into_iter().collect(),
            Self::PlayerRoundStats(fact) => vec![fact.player],
        }
    }
}

/// Facts grouped by kind, one bucket per [`RecordKind`].
#[derive(Debug, Clone, PartialEq)]
pub struct RecordSet<K: KeySpace> {
    buckets: Vec<Vec<Fact<K>>>,
}

impl<K: KeySpace> Default for RecordSet<K> {
    fn default() -> Self {
        Self::new()
    }
}

impl<K: KeySpace> RecordSet<K> {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: (0..RecordKind::COUNT).map(|_| Vec::new()).collect(),
        }
    }

    pub fn push(&mut self, fact: Fact<K>) {
        self.buckets[fact.kind().index()].push(fact);
    }

    pub fn extend_kind(&mut self, kind: RecordKind, facts: Vec<Fact<K>>) {
        let bucket = &mut self.buckets[kind.index()];
        if bucket.is_empty() {
            *bucket = facts;
        } else {
            bucket.extend(facts);
        }
    }

    #[must_use]
    pub fn get(&self, kind: RecordKind) -> &[Fact<K>] {
        &self.buckets[kind.index()]
    }

    pub fn take(&mut self, kind: RecordKind) -> Vec<Fact<K>> {
        std::mem::take(&mut self.buckets[kind.index()])
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.buckets.iter().map(Vec::len).sum()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.buckets.iter().all(Vec::is_empty)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Fact<K>> {
        self.buckets.iter().flatten()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::keys::{PlayerSlot, Provisional, RoundNumber};

    fn staged_kill(victim: u32, killer: Option<u32>, assister: Option<u32>) -> Fact<Provisional> {
        Fact::Kill(Kill {
            round: RoundNumber(1),
            at: Stamp::default(),
            victim: PlayerSlot(victim),
            killer: killer.map(PlayerSlot),
            assister: assister.map(PlayerSlot),
            weapon: "awp".to_string(),
            headshot: false,
            penetrated: 0,
            noscope: false,
            thrusmoke: false,
            attacker_blind: false,
            team_kill: false,
            assist: None,
            victim_position: Vector3::default(),
            killer_position: None,
            killer_view: None,
            distance: None,
        })
    }

    #[test]
    fn kind_indexes_match_write_order() {
        for (position, kind) in RecordKind::ALL.iter().enumerate() {
            assert_eq!(kind.index(), position);
        }
    }

    #[test]
    fn kill_lists_victim_before_optional_roles() {
        let fact = staged_kill(4, Some(2), None);
        assert_eq!(fact.players(), vec![PlayerSlot(4), PlayerSlot(2)]);
        assert_eq!(fact.round(), RoundNumber(1));
    }

    #[test]
    fn record_set_groups_by_kind() {
        let mut set = RecordSet::<Provisional>::new();
        set.push(staged_kill(0, None, None));
        set.push(staged_kill(1, Some(0), Some(2)));
        set.push(Fact::ChatMessage(ChatMessage {
            round: RoundNumber(1),
            at: Stamp::default(),
            sender: PlayerSlot(0),
            message: "gl hf".to_string(),
            team_only: false,
        }));

        assert_eq!(set.len(), 3);
        assert_eq!(set.get(RecordKind::Kill).len(), 2);
        assert_eq!(set.get(RecordKind::ChatMessage).len(), 1);
        assert!(set.get(RecordKind::Damage).is_empty());

        let kills = set.take(RecordKind::Kill);
        assert_eq!(kills.len(), 2);
        assert_eq!(set.len(), 1);
    }

    #[test]
    fn economy_change_can_be_negative() {
        let event = EconomyEvent::<Provisional> {
            round: RoundNumber(2),
            at: Stamp::default(),
            player: PlayerSlot(3),
            action: EconomyAction::Purchase,
            item: "ak47".to_string(),
            item_cost: Some(2700),
            money_before: 4000,
            money_after: 1300,
        };
        assert_eq!(event.money_change(), -2700);
    }
}
