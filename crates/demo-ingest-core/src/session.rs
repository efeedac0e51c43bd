use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tracing::{debug, trace, warn};

use crate::config::IngestConfig;
use crate::events::{DemoEvent, DemoHeader, EventKind, PlayerRef};
use crate::facts::{
    Bomb, ChatMessage, Damage, EconomyEvent, Equipment, Fact, FlashEvent, GameEvent, Grenade,
    HostageEvent, InfernoEvent, Kill, PlayerPosition, RecordSet, Stamp, WeaponFire, ZoneEvent,
};
use crate::keys::{PlayerSlot, Provisional, RoundNumber};
use crate::model::{
    AssistKind, BombAction, EconomyAction, EquipmentAction, GrenadeKind, HostageAction,
    InfernoAction, MatchRecord, Player, PlayerProfile, Round, RoundEndReason, Team, Vector3, ZoneAction,
    ZoneKind,
};
use crate::registry::{RoundClosing, RoundOpening, RoundPlayerRegistry};
use crate::staging::{RoundAccumulators, StagingStore};
use crate::now_utc;

#[derive(Debug, Default)]
struct RoundClock {
    raw_round: u32,
    match_record: Option<MatchRecord>,
}

/// Everything one run staged, handed to resolution once the stream has ended.
#[derive(Debug)]
pub struct StagedRun {
    pub header: DemoHeader,
    pub match_record: Option<MatchRecord>,
    pub players: Vec<(PlayerSlot, PlayerProfile)>,
    pub rounds: Vec<Round>,
    pub facts: RecordSet<Provisional>,
    pub events_seen: u64,
    pub events_ignored: u64,
}

/// Subscriber state for one ingestion run.
///
/// Every handler takes `&self` and may be called from several decoder threads. Handlers
/// never touch persistence; they stage provisionally keyed facts and return whether the
/// event was accepted. Events arriving without their required context (no current round,
/// no match yet) are ignored.
#[derive(Debug)]
pub struct IngestSession {
    config: IngestConfig,
    header: DemoHeader,
    registry: RoundPlayerRegistry,
    staging: StagingStore,
    accumulators: Mutex<RoundAccumulators>,
    clock: Mutex<RoundClock>,
    events_seen: AtomicU64,
    events_ignored: AtomicU64,
}

impl IngestSession {
    #[must_use]
    pub fn new(config: IngestConfig, header: DemoHeader) -> Self {
        Self {
            config,
            header,
            registry: RoundPlayerRegistry::new(),
            staging: StagingStore::new(),
            accumulators: Mutex::new(RoundAccumulators::new()),
            clock: Mutex::new(RoundClock::default()),
            events_seen: AtomicU64::new(0),
            events_ignored: AtomicU64::new(0),
        }
    }

    #[must_use]
    pub fn registry(&self) -> &RoundPlayerRegistry {
        &self.registry
    }

    #[must_use]
    pub fn staging(&self) -> &StagingStore {
        &self.staging
    }

    /// Single point of player creation for this run.
    pub fn get_or_create_player(&self, player: &PlayerRef) -> Arc<Player> {
        self.registry
            .get_or_create_player(player.slot, || player.profile())
    }

    /// Routes a decoder event to its handler.
    pub fn dispatch(&self, event: &DemoEvent) -> bool {
        self.events_seen.fetch_add(1, Ordering::Relaxed);
        let at = Stamp {
            tick: event.tick,
            game_time: event.game_time,
        };

        let accepted = match &event.kind {
            EventKind::RoundStart {
                t_score,
                ct_score,
                roster,
            } => self.on_round_start(at, *t_score, *ct_score, roster),
            EventKind::RoundEnd {
                winner,
                reason,
                t_score,
                ct_score,
                roster,
            } => self.on_round_end(
                at,
                RoundClosing {
                    end_tick: at.tick,
                    end_time: at.game_time,
                    winner: *winner,
                    reason: *reason,
                    t_score: *t_score,
                    ct_score: *ct_score,
                },
                roster,
            ),
            EventKind::PlayerConnect { player } => self.on_player_connect(at, player),
            EventKind::PlayerDisconnect { player, reason } => {
                self.on_player_disconnect(at, player, reason)
            }
            EventKind::PlayerTeam { player, team } => self.on_player_team(at, player, *team),
            EventKind::PlayerChangeName { player, new_name } => {
                self.on_player_change_name(at, player, new_name)
            }
            EventKind::PlayerDeath {
                victim,
                attacker,
                assister,
                weapon,
                headshot,
                penetrated,
                noscope,
                thrusmoke,
                attacker_blind,
                assisted_flash,
            } => self.on_player_death(
                at,
                &DeathDetails {
                    victim,
                    attacker: attacker.as_ref(),
                    assister: assister.as_ref(),
                    weapon,
                    headshot: *headshot,
                    penetrated: *penetrated,
                    noscope: *noscope,
                    thrusmoke: *thrusmoke,
                    attacker_blind: *attacker_blind,
                    assisted_flash: *assisted_flash,
                },
            ),
            EventKind::PlayerHurt {
                victim,
                attacker,
                weapon,
                dmg_health,
                dmg_armor,
                hitgroup,
            } => self.on_player_hurt(
                at,
                victim,
                attacker.as_ref(),
                weapon,
                (*dmg_health, *dmg_armor),
                *hitgroup,
            ),
            EventKind::WeaponFire {
                player,
                weapon,
                silenced,
            } => self.on_weapon_fire(at, player, weapon, *silenced),
            EventKind::GrenadeDetonate {
                player,
                grenade,
                position,
                entity_id,
            } => self.on_grenade_detonate(at, player, *grenade, *position, *entity_id),
            EventKind::Bomb {
                player,
                action,
                site,
            } => self.on_bomb(at, player, *action, *site),
            EventKind::Zone {
                player,
                zone,
                action,
            } => self.on_zone(at, player, *zone, *action),
            EventKind::ItemPurchase { player, item, cost } => {
                self.on_item_purchase(at, player, item, *cost)
            }
            EventKind::ItemPickup { player, item } => {
                self.on_item_change(at, player, item, EquipmentAction::Pickup)
            }
            EventKind::ItemEquip { player, item } => {
                self.on_item_change(at, player, item, EquipmentAction::Equip)
            }
            EventKind::ItemDrop { player, item } => {
                self.on_item_change(at, player, item, EquipmentAction::Drop)
            }
            EventKind::Inferno {
                action,
                thrower,
                entity_id,
                position,
            } => self.on_inferno(at, *action, thrower.as_ref(), *entity_id, *position),
            EventKind::PlayerBlind {
                player,
                attacker,
                duration,
            } => self.on_player_blind(at, player, attacker.as_ref(), *duration),
            EventKind::Hostage {
                action,
                player,
                hostage,
            } => self.on_hostage(at, *action, player.as_ref(), *hostage),
            EventKind::Chat {
                player,
                message,
                team_only,
            } => self.on_chat(at, player, message, *team_only),
            EventKind::PositionSample { roster } => self.on_position_sample(at, roster),
        };

        if !accepted {
            self.events_ignored.fetch_add(1, Ordering::Relaxed);
            trace!(
                event = event.kind.name(),
                tick = event.tick,
                "event ignored without context"
            );
        }
        accepted
    }

    /// Advances the raw round counter and opens the display round, if any.
    pub fn on_round_start(
        &self,
        at: Stamp,
        t_score: u32,
        ct_score: u32,
        roster: &[PlayerRef],
    ) -> bool {
        let number = {
            let mut clock = self.clock.lock();
            clock.raw_round += 1;
            let raw = clock.raw_round;

            let Some(number) = self.config.source.display_round_number(raw) else {
                debug!(raw, source = %self.config.source, "skipping pre-match round");
                return false;
            };

            let opening = RoundOpening {
                raw_number: raw,
                start_tick: at.tick,
                start_time: at.game_time,
                t_score,
                ct_score,
            };
            if let Err(err) = self.registry.begin_round(number, opening) {
                warn!(raw, round = number.0, error = %err, "rejecting round start");
                self.registry.clear_current();
                return false;
            }

            if clock.match_record.is_none() {
                clock.match_record = Some(MatchRecord {
                    map_name: self.header.map_name.clone(),
                    started_at: now_utc(),
                    ended_at: None,
                    finished: false,
                    total_rounds: 0,
                });
            }
            number
        };

        {
            let mut accumulators = self.accumulators.lock();
            for player in roster {
                let _ = self.get_or_create_player(player);
                accumulators.open_line(number, player);
                accumulators.track_money(player.slot, player.money);
            }
        }

        self.stage_game_event(
            number,
            at,
            None,
            "round_start",
            format!("Round {} started", number.0),
            true,
        );
        if self.config.parse_positions {
            self.stage_positions(number, at, roster);
        }
        true
    }

    pub fn on_round_end(&self, at: Stamp, closing: RoundClosing, roster: &[PlayerRef]) -> bool {
        if !self.has_match() {
            return false;
        }
        let Some(round) = self.registry.end_round(closing) else {
            return false;
        };

        {
            let mut accumulators = self.accumulators.lock();
            for player in roster {
                accumulators.close_line(round.number, player);
                accumulators.track_money(player.slot, player.money);
            }
        }

        let winner = closing.winner.map_or("none", Team::as_str);
        let reason = closing
            .reason
            .unwrap_or(RoundEndReason::Unknown)
            .as_str();
        self.stage_game_event(
            round.number,
            at,
            None,
            "round_end",
            format!(
                "Round {} ended - winner: {winner}, reason: {reason}",
                round.number.0
            ),
            true,
        );
        true
    }

    /// Registers the player even before any round exists.
    pub fn on_player_connect(&self, at: Stamp, player: &PlayerRef) -> bool {
        let registered = self.get_or_create_player(player);
        registered.update(|profile| *profile = player.profile());

        if let Some(round) = self.current_round() {
            self.stage_game_event(
                round,
                at,
                Some(player.slot),
                "player_connect",
                format!("{} connected", player.name),
                false,
            );
        }
        true
    }

    pub fn on_player_disconnect(&self, at: Stamp, player: &PlayerRef, reason: &str) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let _ = self.get_or_create_player(player);
        self.stage_game_event(
            round,
            at,
            Some(player.slot),
            "player_disconnect",
            format!("{} disconnected: {reason}", player.name),
            false,
        );
        true
    }

    pub fn on_player_team(&self, at: Stamp, player: &PlayerRef, team: Team) -> bool {
        let registered = self.get_or_create_player(player);
        registered.update(|profile| profile.team = team);

        if let Some(round) = self.current_round() {
            self.stage_game_event(
                round,
                at,
                Some(player.slot),
                "player_team",
                format!("{} joined {}", player.name, team.as_str()),
                false,
            );
        }
        true
    }

    /// Renames the registered player. Accepted with or without a current round.
    pub fn on_player_change_name(&self, at: Stamp, player: &PlayerRef, new_name: &str) -> bool {
        let registered = self.get_or_create_player(player);
        let old_name = registered.profile().name;
        registered.update(|profile| profile.name = new_name.to_string());
        debug!(slot = player.slot.0, %old_name, %new_name, "player renamed");

        if let Some(round) = self.current_round() {
            self.stage_game_event(
                round,
                at,
                Some(player.slot),
                "player_change_name",
                format!("{old_name} changed name to {new_name}"),
                false,
            );
        }
        true
    }

    /// Stages the kill and credits the round lines of every role present.
    pub fn on_player_death(&self, at: Stamp, death: &DeathDetails<'_>) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let victim = self.get_or_create_player(death.victim).slot();
        let killer = death
            .attacker
            .map(|attacker| self.get_or_create_player(attacker).slot());
        let assister = death
            .assister
            .map(|assister| self.get_or_create_player(assister).slot());

        let team_kill = death
            .attacker
            .is_some_and(|attacker| attacker.is_teammate_of(death.victim));
        let assist = assister.map(|_| {
            if death.assisted_flash {
                AssistKind::Flash
            } else {
                AssistKind::Damage
            }
        });

        self.staging.push(Fact::Kill(Kill {
            round,
            at,
            victim,
            killer,
            assister,
            weapon: death.weapon.to_string(),
            headshot: death.headshot,
            penetrated: death.penetrated,
            noscope: death.noscope,
            thrusmoke: death.thrusmoke,
            attacker_blind: death.attacker_blind,
            team_kill,
            assist,
            victim_position: death.victim.position,
            killer_position: death.attacker.map(|attacker| attacker.position),
            killer_view: death.attacker.map(|attacker| attacker.view),
            distance: death
                .attacker
                .map(|attacker| attacker.position.distance(death.victim.position)),
        }));

        self.accumulators
            .lock()
            .record_kill(round, death.victim, death.attacker, death.assister);
        true
    }

    pub fn on_player_hurt(
        &self,
        at: Stamp,
        victim: &PlayerRef,
        attacker: Option<&PlayerRef>,
        weapon: &str,
        (dmg_health, dmg_armor): (u32, u32),
        hitgroup: u32,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let victim_slot = self.get_or_create_player(victim).slot();
        let attacker_slot = attacker.map(|attacker| self.get_or_create_player(attacker).slot());
        let team_damage = attacker.is_some_and(|attacker| attacker.is_teammate_of(victim));

        self.staging.push(Fact::Damage(Damage {
            round,
            at,
            victim: victim_slot,
            attacker: attacker_slot,
            weapon: weapon.to_string(),
            dmg_health,
            dmg_armor,
            health_after: victim.health,
            armor_after: victim.armor,
            hitgroup,
            team_damage,
        }));

        if let Some(attacker) = attacker.filter(|attacker| attacker.slot != victim.slot) {
            if !team_damage {
                self.accumulators
                    .lock()
                    .record_damage(round, attacker, dmg_health);
            }
        }
        true
    }

    pub fn on_weapon_fire(
        &self,
        at: Stamp,
        player: &PlayerRef,
        weapon: &str,
        silenced: bool,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let shooter = self.get_or_create_player(player).slot();
        self.staging.push(Fact::WeaponFire(WeaponFire {
            round,
            at,
            player: shooter,
            weapon: weapon.to_string(),
            scoped: player.is_scoped,
            silenced,
            position: player.position,
            view: player.view,
        }));
        self.accumulators.lock().record_shot(round, player);
        true
    }

    /// Stages the detonation; fire grenades also open an inferno record.
    pub fn on_grenade_detonate(
        &self,
        at: Stamp,
        player: &PlayerRef,
        grenade: GrenadeKind,
        position: Vector3,
        entity_id: u32,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let thrower = self.get_or_create_player(player).slot();
        self.staging.push(Fact::Grenade(Grenade {
            round,
            at,
            thrower,
            grenade,
            entity_id,
            position,
        }));
        if grenade.starts_fire() {
            self.staging.push(Fact::InfernoEvent(InfernoEvent {
                round,
                at,
                thrower: Some(thrower),
                action: InfernoAction::MolotovDetonate,
                entity_id,
                position,
            }));
        }
        true
    }

    pub fn on_bomb(
        &self,
        at: Stamp,
        player: &PlayerRef,
        action: BombAction,
        site: Option<u32>,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let slot = self.get_or_create_player(player).slot();
        self.staging.push(Fact::Bomb(Bomb {
            round,
            at,
            player: slot,
            action,
            site,
            has_kit: player.has_defuser,
            position: player.position,
        }));
        if action.is_important() {
            self.stage_game_event(
                round,
                at,
                Some(slot),
                &format!("bomb_{}", action.as_str()),
                format!("Bomb {} by {}", action.as_str(), player.name),
                true,
            );
        }
        true
    }

    pub fn on_zone(
        &self,
        at: Stamp,
        player: &PlayerRef,
        zone: ZoneKind,
        action: ZoneAction,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let slot = self.get_or_create_player(player).slot();
        self.staging.push(Fact::ZoneEvent(ZoneEvent {
            round,
            at,
            player: slot,
            zone,
            action,
            position: player.position,
        }));
        true
    }

    pub fn on_item_purchase(&self, at: Stamp, player: &PlayerRef, item: &str, cost: u32) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let slot = self.get_or_create_player(player).slot();
        let money_before = {
            let mut accumulators = self.accumulators.lock();
            let tracked = accumulators.money(player.slot);
            accumulators.track_money(player.slot, player.money);
            tracked.unwrap_or_else(|| player.money.saturating_add(cost))
        };
        self.staging.push(Fact::EconomyEvent(EconomyEvent {
            round,
            at,
            player: slot,
            action: EconomyAction::Purchase,
            item: item.to_string(),
            item_cost: Some(cost),
            money_before,
            money_after: player.money,
        }));
        true
    }

    /// Pickups and equips stage an economy record and an equipment record; drops only
    /// the latter.
    pub fn on_item_change(
        &self,
        at: Stamp,
        player: &PlayerRef,
        item: &str,
        action: EquipmentAction,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let slot = self.get_or_create_player(player).slot();

        let economy = match action {
            EquipmentAction::Pickup => Some(EconomyAction::Pickup),
            EquipmentAction::Equip => Some(EconomyAction::Equip),
            EquipmentAction::Drop => None,
        };
        if let Some(economy) = economy {
            let money_before = self.accumulators.lock().swap_money(player.slot, player.money);
            self.staging.push(Fact::EconomyEvent(EconomyEvent {
                round,
                at,
                player: slot,
                action: economy,
                item: item.to_string(),
                item_cost: None,
                money_before,
                money_after: player.money,
            }));
        }

        self.staging.push(Fact::Equipment(Equipment {
            round,
            at,
            player: slot,
            action,
            item: item.to_string(),
        }));
        true
    }

    pub fn on_inferno(
        &self,
        at: Stamp,
        action: InfernoAction,
        thrower: Option<&PlayerRef>,
        entity_id: u32,
        position: Vector3,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let thrower = thrower.map(|thrower| self.get_or_create_player(thrower).slot());
        self.staging.push(Fact::InfernoEvent(InfernoEvent {
            round,
            at,
            thrower,
            action,
            entity_id,
            position,
        }));
        true
    }

    pub fn on_player_blind(
        &self,
        at: Stamp,
        player: &PlayerRef,
        attacker: Option<&PlayerRef>,
        duration: f32,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let flashed = self.get_or_create_player(player).slot();
        let flasher = attacker.map(|attacker| self.get_or_create_player(attacker).slot());

        self.staging.push(Fact::FlashEvent(FlashEvent {
            round,
            at,
            flashed,
            flasher,
            duration,
            flashed_team: player.team,
            flasher_team: attacker.map(|attacker| attacker.team),
            team_flash: attacker.is_some_and(|attacker| attacker.is_teammate_of(player)),
            self_flash: attacker.is_some_and(|attacker| attacker.slot == player.slot),
            flashed_position: player.position,
            distance: attacker.map(|attacker| attacker.position.distance(player.position)),
        }));

        let by = attacker.map_or("unknown", |attacker| attacker.name.as_str());
        self.stage_game_event(
            round,
            at,
            Some(flashed),
            "player_blind",
            format!("{} flashed by {by} for {duration:.2}s", player.name),
            false,
        );
        true
    }

    /// Stages a hostage interaction; only calls for help come without a player.
    pub fn on_hostage(
        &self,
        at: Stamp,
        action: HostageAction,
        player: Option<&PlayerRef>,
        hostage: u32,
    ) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let slot = player.map(|player| self.get_or_create_player(player).slot());

        self.staging.push(Fact::HostageEvent(HostageEvent {
            round,
            at,
            player: slot,
            player_team: player.map(|player| player.team),
            action,
            hostage_entity: hostage,
            position: player.map(|player| player.position).unwrap_or_default(),
        }));

        let who = player.map_or("unknown", |player| player.name.as_str());
        self.stage_game_event(
            round,
            at,
            slot,
            &format!("hostage_{}", action.as_str()),
            format!("{who} {} hostage {hostage}", action.as_str().replace('_', " ")),
            matches!(action, HostageAction::Rescued | HostageAction::Killed),
        );
        true
    }

    pub fn on_chat(&self, at: Stamp, player: &PlayerRef, message: &str, team_only: bool) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        let sender = self.get_or_create_player(player).slot();
        self.staging.push(Fact::ChatMessage(ChatMessage {
            round,
            at,
            sender,
            message: message.to_string(),
            team_only,
        }));
        true
    }

    /// Samples every roster entry on ticks that fall on the configured interval.
    ///
    /// Samples skipped by configuration are still accepted; only a missing round
    /// makes the event ignorable.
    pub fn on_position_sample(&self, at: Stamp, roster: &[PlayerRef]) -> bool {
        let Some(round) = self.current_round() else {
            return false;
        };
        if self.config.samples_positions_at(at.tick) {
            self.stage_positions(round, at, roster);
        } else {
            trace!(tick = at.tick, "position sample outside interval");
        }
        true
    }

    /// Closes the session and hands over everything staged.
    #[must_use]
    pub fn finish(self) -> StagedRun {
        let rounds = self.registry.rounds();
        let players = self
            .registry
            .players()
            .iter()
            .map(|player| (player.slot(), player.profile()))
            .collect();

        let mut facts = self.staging.drain();
        for fact in self.accumulators.into_inner().into_facts() {
            facts.push(fact);
        }

        let match_record = self.clock.into_inner().match_record.map(|mut record| {
            record.total_rounds = u32::try_from(rounds.len()).unwrap_or(u32::MAX);
            record.ended_at = Some(now_utc());
            record.finished = true;
            record
        });

        StagedRun {
            header: self.header,
            match_record,
            players,
            rounds,
            facts,
            events_seen: self.events_seen.into_inner(),
            events_ignored: self.events_ignored.into_inner(),
        }
    }

    fn has_match(&self) -> bool {
        self.clock.lock().match_record.is_some()
    }

    fn current_round(&self) -> Option<RoundNumber> {
        if !self.has_match() {
            return None;
        }
        self.registry.current_round().map(|round| round.number)
    }

    fn stage_positions(&self, round: RoundNumber, at: Stamp, roster: &[PlayerRef]) {
        for player in roster {
            let slot = self.get_or_create_player(player).slot();
            self.staging.push(Fact::PlayerPosition(PlayerPosition {
                round,
                at,
                player: slot,
                position: player.position,
                view: player.view,
                health: player.health,
                armor: player.armor,
                is_alive: player.is_alive,
            }));
        }
    }

    fn stage_game_event(
        &self,
        round: RoundNumber,
        at: Stamp,
        player: Option<PlayerSlot>,
        name: &str,
        description: String,
        important: bool,
    ) {
        self.staging.push(Fact::GameEvent(GameEvent {
            round,
            at,
            player,
            name: name.to_string(),
            description,
            important,
        }));
    }
}

/// Borrowed payload of a player death.
#[derive(Debug, Clone, Copy)]
pub struct DeathDetails<'a> {
    pub victim: &'a PlayerRef,
    pub attacker: Option<&'a PlayerRef>,
    pub assister: Option<&'a PlayerRef>,
    pub weapon: &'a str,
    pub headshot: bool,
    pub penetrated: u32,
    pub noscope: bool,
    pub thrusmoke: bool,
    pub attacker_blind: bool,
    pub assisted_flash: bool,
}
