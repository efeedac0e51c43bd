use std::collections::hash_map::Entry;
use std::collections::HashMap;
use std::fmt::{Display, Formatter};

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::facts::{
    Bomb, ChatMessage, Damage, EconomyEvent, Equipment, Fact, FlashEvent, GameEvent, Grenade,
    HostageEvent, InfernoEvent, Kill, PlayerPosition, PlayerRoundStats, RecordKind, RecordSet,
    WeaponFire, ZoneEvent,
};
use crate::keys::{
    PlayerId, PlayerSlot, Provisional, ProvisionalKey, Resolved, RoundId, RoundNumber,
};

/// Provisional key to persisted id, for players and rounds of one run.
///
/// When the store reports the same provisional key twice, the first id wins and the
/// collision is counted so it can be surfaced in the run report.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct IdentityMap {
    players: HashMap<PlayerSlot, PlayerId>,
    rounds: HashMap<RoundNumber, RoundId>,
    duplicate_players: usize,
    duplicate_rounds: usize,
}

impl IdentityMap {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn from_persisted(
        players: &[(PlayerSlot, PlayerId)],
        rounds: &[(RoundNumber, RoundId)],
    ) -> Self {
        let mut map = Self::new();
        for (slot, id) in players {
            map.insert_player(*slot, *id);
        }
        for (number, id) in rounds {
            map.insert_round(*number, *id);
        }
        map
    }

    /// Returns `false` when `slot` was already mapped; the earlier id is kept.
    pub fn insert_player(&mut self, slot: PlayerSlot, id: PlayerId) -> bool {
        match self.players.entry(slot) {
            Entry::Vacant(entry) => {
                entry.insert(id);
                true
            }
            Entry::Occupied(entry) => {
                warn!(
                    key = %slot,
                    kept = %entry.get(),
                    ignored = %id,
                    "duplicate player key, keeping first persisted row"
                );
                self.duplicate_players += 1;
                false
            }
        }
    }

    /// Returns `false` when `number` was already mapped; the earlier id is kept.
    pub fn insert_round(&mut self, number: RoundNumber, id: RoundId) -> bool {
        match self.rounds.entry(number) {
            Entry::Vacant(entry) => {
                entry.insert(id);
                true
            }
            Entry::Occupied(entry) => {
                warn!(
                    key = %number,
                    kept = %entry.get(),
                    ignored = %id,
                    "duplicate round key, keeping first persisted row"
                );
                self.duplicate_rounds += 1;
                false
            }
        }
    }

    #[must_use]
    pub fn player(&self, slot: PlayerSlot) -> Option<PlayerId> {
        self.players.get(&slot).copied()
    }

    #[must_use]
    pub fn round(&self, number: RoundNumber) -> Option<RoundId> {
        self.rounds.get(&number).copied()
    }

    #[must_use]
    pub fn duplicate_players(&self) -> usize {
        self.duplicate_players
    }

    #[must_use]
    pub fn duplicate_rounds(&self) -> usize {
        self.duplicate_rounds
    }
}

/// A staged fact whose mandatory key had no persisted counterpart.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Unresolved {
    pub kind: RecordKind,
    pub key: ProvisionalKey,
}

impl Display for Unresolved {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} references unknown {}", self.kind.as_str(), self.key)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindResolution {
    pub kind: RecordKind,
    pub staged: usize,
    pub resolved: usize,
    pub dropped: usize,
    pub cleared_roles: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ResolutionReport {
    pub kinds: Vec<KindResolution>,
    pub duplicate_round_keys: usize,
    pub duplicate_player_keys: usize,
}

impl ResolutionReport {
    #[must_use]
    pub fn resolved(&self) -> usize {
        self.kinds.iter().map(|kind| kind.resolved).sum()
    }

    #[must_use]
    pub fn dropped(&self) -> usize {
        self.kinds.iter().map(|kind| kind.dropped).sum()
    }

    #[must_use]
    pub fn kind(&self, kind: RecordKind) -> Option<&KindResolution> {
        self.kinds.iter().find(|entry| entry.kind == kind)
    }
}

/// Rewrites every staged fact to persisted ids.
///
/// Facts with an unknown round or mandatory player are dropped with a warning.
/// Unknown optional players are cleared and the fact is kept.
#[must_use]
pub fn resolve_staged(
    mut staged: RecordSet<Provisional>,
    map: &IdentityMap,
) -> (RecordSet<Resolved>, ResolutionReport) {
    let mut resolved = RecordSet::new();
    let mut report = ResolutionReport {
        kinds: Vec::with_capacity(RecordKind::COUNT),
        duplicate_round_keys: map.duplicate_rounds(),
        duplicate_player_keys: map.duplicate_players(),
    };

    for kind in RecordKind::ALL {
        let facts = staged.take(kind);
        let mut resolver = FactResolver {
            map,
            kind,
            cleared: 0,
        };
        let mut entry = KindResolution {
            kind,
            staged: facts.len(),
            resolved: 0,
            dropped: 0,
            cleared_roles: 0,
        };

        let mut kept = Vec::with_capacity(facts.len());
        for fact in facts {
            match resolver.resolve(fact) {
                Ok(fact) => kept.push(fact),
                Err(unresolved) => {
                    warn!(
                        kind = kind.as_str(),
                        key = %unresolved.key,
                        "dropping record with unresolved key"
                    );
                    entry.dropped += 1;
                }
            }
        }

        entry.resolved = kept.len();
        entry.cleared_roles = resolver.cleared;
        if entry.staged > 0 {
            debug!(
                kind = kind.as_str(),
                staged = entry.staged,
                resolved = entry.resolved,
                dropped = entry.dropped,
                cleared_roles = entry.cleared_roles,
                "resolved kind"
            );
        }
        resolved.extend_kind(kind, kept);
        report.kinds.push(entry);
    }

    (resolved, report)
}

struct FactResolver<'a> {
    map: &'a IdentityMap,
    kind: RecordKind,
    cleared: usize,
}

impl FactResolver<'_> {
    fn round(&self, number: RoundNumber) -> Result<RoundId, Unresolved> {
        self.map.round(number).ok_or(Unresolved {
            kind: self.kind,
            key: ProvisionalKey::Round(number),
        })
    }

    fn player(&self, slot: PlayerSlot) -> Result<PlayerId, Unresolved> {
        self.map.player(slot).ok_or(Unresolved {
            kind: self.kind,
            key: ProvisionalKey::Player(slot),
        })
    }

    fn optional_player(&mut self, slot: Option<PlayerSlot>) -> Option<PlayerId> {
        let slot = slot?;
        let resolved = self.map.player(slot);
        if resolved.is_none() {
            debug!(
                kind = self.kind.as_str(),
                key = %slot,
                "clearing unresolved optional player"
            );
            self.cleared += 1;
        }
        resolved
    }

    /// Mandatory keys are resolved before optional roles so a dropped record never
    /// counts as a cleared role.
    fn resolve(&mut self, fact: Fact<Provisional>) -> Result<Fact<Resolved>, Unresolved> {
        let resolved = match fact {
            Fact::Kill(kill) => {
                let round = self.round(kill.round)?;
                let victim = self.player(kill.victim)?;
                Fact::Kill(Kill {
                    round,
                    at: kill.at,
                    victim,
                    killer: self.optional_player(kill.killer),
                    assister: self.optional_player(kill.assister),
                    weapon: kill.weapon,
                    headshot: kill.headshot,
                    penetrated: kill.penetrated,
                    noscope: kill.noscope,
                    thrusmoke: kill.thrusmoke,
                    attacker_blind: kill.attacker_blind,
                    team_kill: kill.team_kill,
                    assist: kill.assist,
                    victim_position: kill.victim_position,
                    killer_position: kill.killer_position,
                    killer_view: kill.killer_view,
                    distance: kill.distance,
                })
            }
            Fact::Damage(damage) => {
                let round = self.round(damage.round)?;
                let victim = self.player(damage.victim)?;
                Fact::Damage(Damage {
                    round,
                    at: damage.at,
                    victim,
                    attacker: self.optional_player(damage.attacker),
                    weapon: damage.weapon,
                    dmg_health: damage.dmg_health,
                    dmg_armor: damage.dmg_armor,
                    health_after: damage.health_after,
                    armor_after: damage.armor_after,
                    hitgroup: damage.hitgroup,
                    team_damage: damage.team_damage,
                })
            }
            Fact::WeaponFire(fire) => Fact::WeaponFire(WeaponFire {
                round: self.round(fire.round)?,
                at: fire.at,
                player: self.player(fire.player)?,
                weapon: fire.weapon,
                scoped: fire.scoped,
                silenced: fire.silenced,
                position: fire.position,
                view: fire.view,
            }),
            Fact::Grenade(grenade) => Fact::Grenade(Grenade {
                round: self.round(grenade.round)?,
                at: grenade.at,
                thrower: self.player(grenade.thrower)?,
                grenade: grenade.grenade,
                entity_id: grenade.entity_id,
                position: grenade.position,
            }),
            Fact::Bomb(bomb) => Fact::Bomb(Bomb {
                round: self.round(bomb.round)?,
                at: bomb.at,
                player: self.player(bomb.player)?,
                action: bomb.action,
                site: bomb.site,
                has_kit: bomb.has_kit,
                position: bomb.position,
            }),
            Fact::ZoneEvent(zone) => Fact::ZoneEvent(ZoneEvent {
                round: self.round(zone.round)?,
                at: zone.at,
                player: self.player(zone.player)?,
                zone: zone.zone,
                action: zone.action,
                position: zone.position,
            }),
            Fact::EconomyEvent(economy) => Fact::EconomyEvent(EconomyEvent {
                round: self.round(economy.round)?,
                at: economy.at,
                player: self.player(economy.player)?,
                action: economy.action,
                item: economy.item,
                item_cost: economy.item_cost,
                money_before: economy.money_before,
                money_after: economy.money_after,
            }),
            Fact::Equipment(equipment) => Fact::Equipment(Equipment {
                round: self.round(equipment.round)?,
                at: equipment.at,
                player: self.player(equipment.player)?,
                action: equipment.action,
                item: equipment.item,
            }),
            Fact::InfernoEvent(inferno) => {
                let round = self.round(inferno.round)?;
                Fact::InfernoEvent(InfernoEvent {
                    round,
                    at: inferno.at,
                    thrower: self.optional_player(inferno.thrower),
                    action: inferno.action,
                    entity_id: inferno.entity_id,
                    position: inferno.position,
                })
            }
            Fact::FlashEvent(flash) => {
                let round = self.round(flash.round)?;
                let flashed = self.player(flash.flashed)?;
                Fact::FlashEvent(FlashEvent {
                    round,
                    at: flash.at,
                    flashed,
                    flasher: self.optional_player(flash.flasher),
                    duration: flash.duration,
                    flashed_team: flash.flashed_team,
                    flasher_team: flash.flasher_team,
                    team_flash: flash.team_flash,
                    self_flash: flash.self_flash,
                    flashed_position: flash.flashed_position,
                    distance: flash.distance,
                })
            }
            Fact::HostageEvent(hostage) => {
                let round = self.round(hostage.round)?;
                Fact::HostageEvent(HostageEvent {
                    round,
                    at: hostage.at,
                    player: self.optional_player(hostage.player),
                    player_team: hostage.player_team,
                    action: hostage.action,
                    hostage_entity: hostage.hostage_entity,
                    position: hostage.position,
                })
            }
            Fact::ChatMessage(chat) => Fact::ChatMessage(ChatMessage {
                round: self.round(chat.round)?,
                at: chat.at,
                sender: self.player(chat.sender)?,
                message: chat.message,
                team_only: chat.team_only,
            }),
            Fact::PlayerPosition(sample) => Fact::PlayerPosition(PlayerPosition {
                round: self.round(sample.round)?,
                at: sample.at,
                player: self.player(sample.player)?,
                position: sample.position,
                view: sample.view,
                health: sample.health,
                armor: sample.armor,
                is_alive: sample.is_alive,
            }),
            Fact::GameEvent(event) => {
                let round = self.round(event.round)?;
                Fact::GameEvent(GameEvent {
                    round,
                    at: event.at,
                    player: self.optional_player(event.player),
                    name: event.name,
                    description: event.description,
                    important: event.important,
                })
            }
            Fact::PlayerRoundStats(line) => Fact::PlayerRoundStats(PlayerRoundStats {
                round: self.round(line.round)?,
                player: self.player(line.player)?,
                team: line.team,
                start_money: line.start_money,
                end_money: line.end_money,
                start_health: line.start_health,
                end_health: line.end_health,
                start_armor: line.start_armor,
                end_armor: line.end_armor,
                has_helmet: line.has_helmet,
                has_defuser: line.has_defuser,
                kills: line.kills,
                deaths: line.deaths,
                assists: line.assists,
                damage: line.damage,
                shots_fired: line.shots_fired,
                survived: line.survived,
            }),
        };
        Ok(resolved)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::Stamp;
    use crate::model::Vector3;

    fn kill(round: u32, victim: u32, killer: Option<u32>, assister: Option<u32>) -> Fact<Provisional> {
        Fact::Kill(Kill {
            round: RoundNumber(round),
            at: Stamp::default(),
            victim: PlayerSlot(victim),
            killer: killer.map(PlayerSlot),
            assister: assister.map(PlayerSlot),
            weapon: "m4a1".to_string(),
            headshot: true,
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

    fn flash(flashed: u32, flasher: Option<u32>) -> Fact<Provisional> {
        Fact::FlashEvent(FlashEvent {
            round: RoundNumber(1),
            at: Stamp::default(),
            flashed: PlayerSlot(flashed),
            flasher: flasher.map(PlayerSlot),
            duration: 1.8,
            flashed_team: crate::model::Team::Terrorist,
            flasher_team: flasher.map(|_| crate::model::Team::CounterTerrorist),
            team_flash: false,
            self_flash: false,
            flashed_position: Vector3::default(),
            distance: None,
        })
    }

    fn identity_map() -> IdentityMap {
        IdentityMap::from_persisted(
            &[(PlayerSlot(0), PlayerId(10)), (PlayerSlot(1), PlayerId(11))],
            &[(RoundNumber(1), RoundId(100))],
        )
    }

    #[test]
    fn resolves_every_role_to_persisted_ids() {
        let mut staged = RecordSet::new();
        staged.push(kill(1, 0, Some(1), None));

        let (resolved, report) = resolve_staged(staged, &identity_map());
        let kills = resolved.get(RecordKind::Kill);
        assert_eq!(kills.len(), 1);
        let Fact::Kill(kill) = &kills[0] else {
            panic!("expected kill fact");
        };
        assert_eq!(kill.round, RoundId(100));
        assert_eq!(kill.victim, PlayerId(10));
        assert_eq!(kill.killer, Some(PlayerId(11)));
        assert_eq!(report.resolved(), 1);
        assert_eq!(report.dropped(), 0);
    }

    #[test]
    fn unknown_round_drops_record_without_failing() {
        let mut staged = RecordSet::new();
        staged.push(kill(7, 0, Some(1), None));
        staged.push(kill(1, 0, None, None));

        let (resolved, report) = resolve_staged(staged, &identity_map());
        assert_eq!(resolved.get(RecordKind::Kill).len(), 1);
        let entry = match report.kind(RecordKind::Kill) {
            Some(value) => value,
            None => panic!("missing kill resolution entry"),
        };
        assert_eq!(entry.staged, 2);
        assert_eq!(entry.dropped, 1);
        assert_eq!(entry.cleared_roles, 0);
    }

    #[test]
    fn unknown_mandatory_player_drops_record() {
        let mut staged = RecordSet::new();
        staged.push(kill(1, 9, Some(1), None));
        let (resolved, report) = resolve_staged(staged, &identity_map());
        assert!(resolved.is_empty());
        assert_eq!(report.dropped(), 1);
    }

    #[test]
    fn unknown_optional_role_is_cleared_and_kept() {
        let mut staged = RecordSet::new();
        staged.push(kill(1, 0, Some(1), Some(42)));
        staged.push(Fact::InfernoEvent(InfernoEvent {
            round: RoundNumber(1),
            at: Stamp::default(),
            thrower: Some(PlayerSlot(55)),
            action: crate::model::InfernoAction::Start,
            entity_id: 3,
            position: Vector3::default(),
        }));

        let (resolved, report) = resolve_staged(staged, &identity_map());
        let Fact::Kill(kill) = &resolved.get(RecordKind::Kill)[0] else {
            panic!("expected kill fact");
        };
        assert_eq!(kill.killer, Some(PlayerId(11)));
        assert_eq!(kill.assister, None);

        let Fact::InfernoEvent(inferno) = &resolved.get(RecordKind::InfernoEvent)[0] else {
            panic!("expected inferno fact");
        };
        assert_eq!(inferno.thrower, None);
        assert_eq!(report.dropped(), 0);
        assert_eq!(
            report.kind(RecordKind::Kill).map(|entry| entry.cleared_roles),
            Some(1)
        );
    }

    #[test]
    fn duplicate_keys_keep_first_and_are_counted() {
        let map = IdentityMap::from_persisted(
            &[(PlayerSlot(0), PlayerId(10)), (PlayerSlot(0), PlayerId(20))],
            &[(RoundNumber(1), RoundId(100)), (RoundNumber(1), RoundId(200))],
        );
        assert_eq!(map.player(PlayerSlot(0)), Some(PlayerId(10)));
        assert_eq!(map.round(RoundNumber(1)), Some(RoundId(100)));

        let (_, report) = resolve_staged(RecordSet::new(), &map);
        assert_eq!(report.duplicate_player_keys, 1);
        assert_eq!(report.duplicate_round_keys, 1);
    }

    #[test]
    fn report_lists_every_kind() {
        let (_, report) = resolve_staged(RecordSet::new(), &identity_map());
        assert_eq!(report.kinds.len(), RecordKind::COUNT);
        assert_eq!(
            Unresolved {
                kind: RecordKind::Bomb,
                key: ProvisionalKey::Round(RoundNumber(4)),
            }
            .to_string(),
            "bomb references unknown round#4"
        );
    }

    #[test]
    fn flash_keeps_blinded_player_and_clears_unknown_flasher() {
        let mut staged = RecordSet::new();
        staged.push(flash(0, Some(77)));
        staged.push(flash(1, Some(0)));

        let (resolved, report) = resolve_staged(staged, &identity_map());
        let flashes = resolved.get(RecordKind::FlashEvent);
        assert_eq!(flashes.len(), 2);
        let Fact::FlashEvent(cleared) = &flashes[0] else {
            panic!("expected flash fact");
        };
        assert_eq!(cleared.flashed, PlayerId(10));
        assert_eq!(cleared.flasher, None);
        let Fact::FlashEvent(kept) = &flashes[1] else {
            panic!("expected flash fact");
        };
        assert_eq!(kept.flasher, Some(PlayerId(10)));
        assert_eq!(
            report
                .kind(RecordKind::FlashEvent)
                .map(|entry| (entry.cleared_roles, entry.dropped)),
            Some((1, 0))
        );
    }

    #[test]
    fn flash_on_unknown_player_is_dropped() {
        let mut staged = RecordSet::new();
        staged.push(flash(63, Some(1)));

        let (resolved, report) = resolve_staged(staged, &identity_map());
        assert!(resolved.get(RecordKind::FlashEvent).is_empty());
        assert_eq!(report.dropped(), 1);
        assert_eq!(
            report.kind(RecordKind::FlashEvent).map(|entry| entry.cleared_roles),
            Some(0)
        );
    }

    #[test]
    fn hostage_event_survives_without_player() {
        let mut staged = RecordSet::new();
        staged.push(Fact::HostageEvent(HostageEvent {
            round: RoundNumber(1),
            at: Stamp::default(),
            player: None,
            player_team: None,
            action: crate::model::HostageAction::CallForHelp,
            hostage_entity: 212,
            position: Vector3::default(),
        }));
        staged.push(Fact::HostageEvent(HostageEvent {
            round: RoundNumber(2),
            at: Stamp::default(),
            player: Some(PlayerSlot(1)),
            player_team: None,
            action: crate::model::HostageAction::Follows,
            hostage_entity: 212,
            position: Vector3::default(),
        }));

        let (resolved, report) = resolve_staged(staged, &identity_map());
        let hostages = resolved.get(RecordKind::HostageEvent);
        assert_eq!(hostages.len(), 1);
        assert!(matches!(
            &hostages[0],
            Fact::HostageEvent(event) if event.round == RoundId(100) && event.player.is_none()
        ));
        assert_eq!(report.dropped(), 1);
    }
}
