use std::collections::HashMap;

use parking_lot::Mutex;

use crate::events::PlayerRef;
use crate::facts::{Fact, PlayerRoundStats, RecordKind, RecordSet};
use crate::keys::{PlayerSlot, Provisional, RoundNumber};

/// Append-only staging area, one container per record kind.
///
/// Appends from different threads never contend across kinds and no ordering between
/// kinds is kept.
#[derive(Debug)]
pub struct StagingStore {
    buckets: [Mutex<Vec<Fact<Provisional>>>; RecordKind::COUNT],
}

impl Default for StagingStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StagingStore {
    #[must_use]
    pub fn new() -> Self {
        Self {
            buckets: std::array::from_fn(|_| Mutex::new(Vec::new())),
        }
    }

    pub fn push(&self, fact: Fact<Provisional>) {
        self.buckets[fact.kind().index()].lock().push(fact);
    }

    #[must_use]
    pub fn len(&self, kind: RecordKind) -> usize {
        self.buckets[kind.index()].lock().len()
    }

    #[must_use]
    pub fn total(&self) -> usize {
        self.buckets.iter().map(|bucket| bucket.lock().len()).sum()
    }

    /// Moves everything staged so far into a [`RecordSet`], leaving the store empty.
    #[must_use]
    pub fn drain(&self) -> RecordSet<Provisional> {
        let mut set = RecordSet::new();
        for kind in RecordKind::ALL {
            let facts = std::mem::take(&mut *self.buckets[kind.index()].lock());
            set.extend_kind(kind, facts);
        }
        set
    }
}

/// In-flight aggregates keyed by provisional round number.
///
/// Access is read-modify-write, so the owner of the current round must hold this
/// behind its own lock.
#[derive(Debug, Default)]
pub struct RoundAccumulators {
    money: HashMap<PlayerSlot, u32>,
    rounds: HashMap<RoundNumber, HashMap<PlayerSlot, PlayerRoundStats<Provisional>>>,
}

impl RoundAccumulators {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn money(&self, slot: PlayerSlot) -> Option<u32> {
        self.money.get(&slot).copied()
    }

    pub fn track_money(&mut self, slot: PlayerSlot, amount: u32) {
        self.money.insert(slot, amount);
    }

    /// Records `current` as the new balance and returns the previous one.
    ///
    /// A player seen for the first time is assumed to have had `current` all along.
    pub fn swap_money(&mut self, slot: PlayerSlot, current: u32) -> u32 {
        self.money.insert(slot, current).unwrap_or(current)
    }

    /// Writes the opening line for `player` in `round`. Later calls keep the first line.
    pub fn open_line(&mut self, round: RoundNumber, player: &PlayerRef) {
        self.rounds
            .entry(round)
            .or_default()
            .entry(player.slot)
            .or_insert_with(|| opening_line(round, player));
    }

    /// Patches the closing values for `player`; players without an opening line are skipped.
    pub fn close_line(&mut self, round: RoundNumber, player: &PlayerRef) {
        let Some(line) = self
            .rounds
            .get_mut(&round)
            .and_then(|lines| lines.get_mut(&player.slot))
        else {
            return;
        };
        line.end_money = Some(player.money);
        line.end_health = Some(player.health);
        line.end_armor = Some(player.armor);
        line.survived = Some(player.is_alive);
    }

    pub fn record_kill(
        &mut self,
        round: RoundNumber,
        victim: &PlayerRef,
        killer: Option<&PlayerRef>,
        assister: Option<&PlayerRef>,
    ) {
        self.line(round, victim).deaths += 1;
        if let Some(killer) =
            killer.filter(|killer| killer.slot != victim.slot && !killer.is_teammate_of(victim))
        {
            self.line(round, killer).kills += 1;
        }
        if let Some(assister) = assister {
            self.line(round, assister).assists += 1;
        }
    }

    pub fn record_damage(&mut self, round: RoundNumber, attacker: &PlayerRef, amount: u32) {
        let line = self.line(round, attacker);
        line.damage = line.damage.saturating_add(amount);
    }

    pub fn record_shot(&mut self, round: RoundNumber, shooter: &PlayerRef) {
        self.line(round, shooter).shots_fired += 1;
    }

    /// Flushes every line as a staged fact, ordered by round then slot.
    #[must_use]
    pub fn into_facts(self) -> Vec<Fact<Provisional>> {
        let mut lines: Vec<PlayerRoundStats<Provisional>> = self
            .rounds
            .into_values()
            .flat_map(HashMap::into_values)
            .collect();
        lines.sort_by_key(|line| (line.round, line.player));
        lines.into_iter().map(Fact::PlayerRoundStats).collect()
    }

    fn line(
        &mut self,
        round: RoundNumber,
        player: &PlayerRef,
    ) -> &mut PlayerRoundStats<Provisional> {
        self.rounds
            .entry(round)
            .or_default()
            .entry(player.slot)
            .or_insert_with(|| opening_line(round, player))
    }
}

fn opening_line(round: RoundNumber, player: &PlayerRef) -> PlayerRoundStats<Provisional> {
    PlayerRoundStats {
        round,
        player: player.slot,
        team: player.team,
        start_money: player.money,
        end_money: None,
        start_health: player.health,
        end_health: None,
        start_armor: player.armor,
        end_armor: None,
        has_helmet: player.has_helmet,
        has_defuser: player.has_defuser,
        kills: 0,
        deaths: 0,
        assists: 0,
        damage: 0,
        shots_fired: 0,
        survived: None,
    }
}
