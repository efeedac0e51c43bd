use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::facts::{Fact, RecordKind, RecordSet};
use crate::keys::{PlayerId, Resolved};

/// Match totals for one player, derived from resolved kills and damage.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerMatchStats {
    pub player: PlayerId,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub headshot_kills: u32,
    pub wallbang_kills: u32,
    pub damage_dealt: u32,
    pub rounds_played: u32,
    pub headshot_pct: f64,
    pub kd_ratio: f64,
    pub adr: f64,
}

impl PlayerMatchStats {
    fn empty(player: PlayerId, rounds_played: u32) -> Self {
        Self {
            player,
            kills: 0,
            deaths: 0,
            assists: 0,
            headshot_kills: 0,
            wallbang_kills: 0,
            damage_dealt: 0,
            rounds_played,
            headshot_pct: 0.0,
            kd_ratio: 0.0,
            adr: 0.0,
        }
    }

    fn finalize(&mut self) {
        let kills = f64::from(self.kills);
        self.headshot_pct = if self.kills > 0 {
            f64::from(self.headshot_kills) / kills * 100.0
        } else {
            0.0
        };
        self.kd_ratio = if self.deaths > 0 {
            kills / f64::from(self.deaths)
        } else {
            kills
        };
        self.adr = if self.rounds_played > 0 {
            f64::from(self.damage_dealt) / f64::from(self.rounds_played)
        } else {
            0.0
        };
    }
}

/// Computes per-player totals over the resolved set.
///
/// Every player in `players` gets a row even without activity. Team damage, team
/// kills and self-kills are not credited; the victim still records the death.
#[must_use]
pub fn compute_match_stats(
    facts: &RecordSet<Resolved>,
    players: &[PlayerId],
    rounds_played: u32,
) -> Vec<PlayerMatchStats> {
    let mut totals: BTreeMap<PlayerId, PlayerMatchStats> = players
        .iter()
        .map(|player| (*player, PlayerMatchStats::empty(*player, rounds_played)))
        .collect();

    for fact in facts.get(RecordKind::Kill) {
        let Fact::Kill(kill) = fact else {
            continue;
        };
        if let Some(victim) = totals.get_mut(&kill.victim) {
            victim.deaths += 1;
        }
        if let Some(killer) = kill
            .killer
            .filter(|killer| *killer != kill.victim && !kill.team_kill)
        {
            if let Some(entry) = totals.get_mut(&killer) {
                entry.kills += 1;
                if kill.headshot {
                    entry.headshot_kills += 1;
                }
                if kill.penetrated > 0 {
                    entry.wallbang_kills += 1;
                }
            }
        }
        if let Some(entry) = kill.assister.and_then(|assister| totals.get_mut(&assister)) {
            entry.assists += 1;
        }
    }

    for fact in facts.get(RecordKind::Damage) {
        let Fact::Damage(damage) = fact else {
            continue;
        };
        if damage.team_damage {
            continue;
        }
        if let Some(attacker) = damage.attacker.filter(|attacker| *attacker != damage.victim) {
            if let Some(entry) = totals.get_mut(&attacker) {
                entry.damage_dealt = entry.damage_dealt.saturating_add(damage.dmg_health);
            }
        }
    }

    totals
        .into_values()
        .map(|mut entry| {
            entry.finalize();
            entry
        })
        .collect()
}

#[cfg(test)]
mod tests {
    #![allow(clippy::float_cmp)]

    use super::*;
    use crate::facts::{Damage, Kill, Stamp};
    use crate::keys::RoundId;
    use crate::model::Vector3;

    fn kill(victim: i64, killer: Option<i64>, headshot: bool, penetrated: u32) -> Fact<Resolved> {
        team_kill(victim, killer, headshot, penetrated, false)
    }

    fn team_kill(
        victim: i64,
        killer: Option<i64>,
        headshot: bool,
        penetrated: u32,
        team_kill: bool,
    ) -> Fact<Resolved> {
        Fact::Kill(Kill {
            round: RoundId(1),
            at: Stamp::default(),
            victim: PlayerId(victim),
            killer: killer.map(PlayerId),
            assister: None,
            weapon: "ak47".to_string(),
            headshot,
            penetrated,
            noscope: false,
            thrusmoke: false,
            attacker_blind: false,
            team_kill,
            assist: None,
            victim_position: Vector3::default(),
            killer_position: None,
            killer_view: None,
            distance: None,
        })
    }

    fn damage(victim: i64, attacker: i64, amount: u32, team_damage: bool) -> Fact<Resolved> {
        Fact::Damage(Damage {
            round: RoundId(1),
            at: Stamp::default(),
            victim: PlayerId(victim),
            attacker: Some(PlayerId(attacker)),
            weapon: "ak47".to_string(),
            dmg_health: amount,
            dmg_armor: 0,
            health_after: 0,
            armor_after: 0,
            hitgroup: 1,
            team_damage,
        })
    }

    #[test]
    fn ratios_follow_totals() {
        let mut facts = RecordSet::new();
        facts.push(kill(2, Some(1), true, 0));
        facts.push(kill(3, Some(1), false, 1));
        facts.push(kill(1, Some(2), false, 0));
        facts.push(damage(2, 1, 100, false));
        facts.push(damage(3, 1, 100, false));
        facts.push(damage(4, 1, 50, true));

        let stats = compute_match_stats(&facts, &[PlayerId(1), PlayerId(2)], 4);
        assert_eq!(stats.len(), 2);
        let first = &stats[0];
        assert_eq!(first.player, PlayerId(1));
        assert_eq!(first.kills, 2);
        assert_eq!(first.deaths, 1);
        assert_eq!(first.headshot_kills, 1);
        assert_eq!(first.wallbang_kills, 1);
        assert_eq!(first.damage_dealt, 200);
        assert_eq!(first.headshot_pct, 50.0);
        assert_eq!(first.kd_ratio, 2.0);
        assert_eq!(first.adr, 50.0);
    }

    #[test]
    fn deathless_player_kd_equals_kills() {
        let mut facts = RecordSet::new();
        facts.push(kill(2, Some(1), false, 0));
        facts.push(kill(3, Some(1), false, 0));
        facts.push(kill(4, Some(1), false, 0));
        let stats = compute_match_stats(&facts, &[PlayerId(1)], 0);
        assert_eq!(stats[0].kd_ratio, 3.0);
        assert_eq!(stats[0].adr, 0.0);
    }

    #[test]
    fn suicide_is_a_death_not_a_kill() {
        let mut facts = RecordSet::new();
        facts.push(kill(1, Some(1), false, 0));
        let stats = compute_match_stats(&facts, &[PlayerId(1)], 1);
        assert_eq!(stats[0].kills, 0);
        assert_eq!(stats[0].deaths, 1);
    }

    #[test]
    fn team_kill_counts_the_death_but_not_the_kill() {
        let mut facts = RecordSet::new();
        facts.push(team_kill(2, Some(1), true, 0, true));
        facts.push(kill(3, Some(1), false, 0));
        let stats = compute_match_stats(&facts, &[PlayerId(1), PlayerId(2)], 1);
        assert_eq!(stats[0].kills, 1);
        assert_eq!(stats[0].headshot_kills, 0);
        assert_eq!(stats[1].deaths, 1);
    }
}
