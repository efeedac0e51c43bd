use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::{Mutex, RwLock};

use crate::keys::{PlayerSlot, RoundNumber};
use crate::model::{Player, PlayerProfile, Round, RoundEndReason, Team};
use crate::IngestError;

/// Scores and timing observed when a round opens.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct RoundOpening {
    pub raw_number: u32,
    pub start_tick: u32,
    pub start_time: f32,
    pub t_score: u32,
    pub ct_score: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RoundClosing {
    pub end_tick: u32,
    pub end_time: f32,
    pub winner: Option<Team>,
    pub reason: Option<RoundEndReason>,
    pub t_score: u32,
    pub ct_score: u32,
}

#[derive(Debug, Default)]
struct RoundBook {
    rounds: Vec<Round>,
    index: HashMap<RoundNumber, usize>,
    current: Option<usize>,
}

/// Owns the provisional keys for one run: players by slot, rounds by number.
#[derive(Debug, Default)]
pub struct RoundPlayerRegistry {
    players: RwLock<HashMap<PlayerSlot, Arc<Player>>>,
    rounds: Mutex<RoundBook>,
}

impl RoundPlayerRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns the player registered for `slot`, creating it from `seed` when absent.
    ///
    /// The seed is only consulted on first sight; concurrent callers for the same slot
    /// all receive the same instance.
    pub fn get_or_create_player(
        &self,
        slot: PlayerSlot,
        seed: impl FnOnce() -> PlayerProfile,
    ) -> Arc<Player> {
        if let Some(existing) = self.players.read().get(&slot) {
            return Arc::clone(existing);
        }

        let mut players = self.players.write();
        Arc::clone(
            players
                .entry(slot)
                .or_insert_with(|| Arc::new(Player::new(slot, seed()))),
        )
    }

    #[must_use]
    pub fn player(&self, slot: PlayerSlot) -> Option<Arc<Player>> {
        self.players.read().get(&slot).cloned()
    }

    /// All registered players ordered by slot.
    #[must_use]
    pub fn players(&self) -> Vec<Arc<Player>> {
        let mut players: Vec<Arc<Player>> = self.players.read().values().cloned().collect();
        players.sort_by_key(|player| player.slot());
        players
    }

    /// The round events are currently attributed to.
    ///
    /// A closed round stays current until the next round opens.
    #[must_use]
    pub fn current_round(&self) -> Option<Round> {
        let book = self.rounds.lock();
        book.current.map(|position| book.rounds[position].clone())
    }

    /// Opens round `number` and makes it current.
    ///
    /// # Errors
    /// Returns [`IngestError::Validation`] when `number` does not increase on the last
    /// opened round.
    pub fn begin_round(
        &self,
        number: RoundNumber,
        opening: RoundOpening,
    ) -> Result<Round, IngestError> {
        let mut book = self.rounds.lock();
        if let Some(last) = book.rounds.last() {
            if number <= last.number {
                return Err(IngestError::Validation(format!(
                    "round {} does not follow round {}",
                    number.0, last.number.0
                )));
            }
        }

        let round = Round {
            number,
            raw_number: opening.raw_number,
            start_tick: opening.start_tick,
            start_time: opening.start_time,
            end_tick: None,
            end_time: None,
            t_score_start: opening.t_score,
            ct_score_start: opening.ct_score,
            t_score_end: None,
            ct_score_end: None,
            winner: None,
            end_reason: None,
        };
        let position = book.rounds.len();
        book.rounds.push(round.clone());
        book.index.insert(number, position);
        book.current = Some(position);
        Ok(round)
    }

    /// Closes the current round. Returns `None` when no round is open.
    pub fn end_round(&self, closing: RoundClosing) -> Option<Round> {
        let mut book = self.rounds.lock();
        let position = book.current?;
        let round = &mut book.rounds[position];
        if round.is_closed() {
            return None;
        }
        round.end_tick = Some(closing.end_tick);
        round.end_time = Some(closing.end_time);
        round.winner = closing.winner;
        round.end_reason = closing.reason;
        round.t_score_end = Some(closing.t_score);
        round.ct_score_end = Some(closing.ct_score);
        Some(round.clone())
    }

    /// Drops the current-round pointer so subsequent events are ignored.
    pub fn clear_current(&self) {
        self.rounds.lock().current = None;
    }

    #[must_use]
    pub fn round(&self, number: RoundNumber) -> Option<Round> {
        let book = self.rounds.lock();
        book.index
            .get(&number)
            .map(|position| book.rounds[*position].clone())
    }

    /// All opened rounds in opening order.
    #[must_use]
    pub fn rounds(&self) -> Vec<Round> {
        self.rounds.lock().rounds.clone()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    fn must_ok<T>(result: Result<T, IngestError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    fn named(name: &str) -> impl FnOnce() -> PlayerProfile + '_ {
        move || PlayerProfile {
            name: name.to_string(),
            ..PlayerProfile::default()
        }
    }

    fn closing(winner: Team) -> RoundClosing {
        RoundClosing {
            end_tick: 900,
            end_time: 40.0,
            winner: Some(winner),
            reason: Some(RoundEndReason::CtsWin),
            t_score: 0,
            ct_score: 1,
        }
    }

    #[test]
    fn get_or_create_player_returns_same_instance() {
        let registry = RoundPlayerRegistry::new();
        let first = registry.get_or_create_player(PlayerSlot(3), named("Alice"));
        let second = registry.get_or_create_player(PlayerSlot(3), named("Mallory"));

        assert!(Arc::ptr_eq(&first, &second));
        assert_eq!(second.profile().name, "Alice");
        assert_eq!(registry.players().len(), 1);
    }

    #[test]
    fn get_or_create_player_is_stable_across_threads() {
        let registry = Arc::new(RoundPlayerRegistry::new());
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let registry = Arc::clone(&registry);
                thread::spawn(move || {
                    (0..16)
                        .map(|slot| registry.get_or_create_player(PlayerSlot(slot), named("p")))
                        .collect::<Vec<_>>()
                })
            })
            .collect();

        let mut results = Vec::new();
        for handle in handles {
            match handle.join() {
                Ok(players) => results.push(players),
                Err(_) => panic!("registry worker panicked"),
            }
        }

        assert_eq!(registry.players().len(), 16);
        for players in &results {
            for (slot, player) in players.iter().enumerate() {
                assert!(Arc::ptr_eq(player, &results[0][slot]));
            }
        }
    }

    #[test]
    fn begin_round_requires_increasing_numbers() {
        let registry = RoundPlayerRegistry::new();
        let _ = must_ok(registry.begin_round(RoundNumber(1), RoundOpening::default()));
        let _ = must_ok(registry.begin_round(RoundNumber(2), RoundOpening::default()));
        assert!(registry
            .begin_round(RoundNumber(2), RoundOpening::default())
            .is_err());
        assert_eq!(registry.rounds().len(), 2);
    }

    #[test]
    fn closed_round_stays_current_until_next_begin() {
        let registry = RoundPlayerRegistry::new();
        assert!(registry.current_round().is_none());
        assert!(registry.end_round(closing(Team::CounterTerrorist)).is_none());

        let _ = must_ok(registry.begin_round(RoundNumber(1), RoundOpening::default()));
        let closed = registry.end_round(closing(Team::CounterTerrorist));
        assert_eq!(
            closed.and_then(|round| round.winner),
            Some(Team::CounterTerrorist)
        );
        assert!(registry.end_round(closing(Team::Terrorist)).is_none());

        let current = registry.current_round();
        assert_eq!(current.map(|round| round.number), Some(RoundNumber(1)));

        let _ = must_ok(registry.begin_round(RoundNumber(2), RoundOpening::default()));
        assert_eq!(
            registry.current_round().map(|round| round.number),
            Some(RoundNumber(2))
        );
        assert!(registry
            .round(RoundNumber(1))
            .is_some_and(|round| round.is_closed()));
    }
}
