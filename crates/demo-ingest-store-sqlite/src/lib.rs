#![allow(clippy::missing_errors_doc)]
#![allow(clippy::uninlined_format_args)]

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use demo_ingest_core::{
    format_rfc3339, now_utc, DemoFileInfo, Fact, IngestError, MatchId, MatchRecord, MatchStore,
    PlayerId, PlayerMatchStats, PlayerProfile, PlayerSlot, RecordKind, Resolved, Round, RoundId,
    RoundNumber,
};
use rusqlite::{params, Connection, Transaction};
use serde::{Deserialize, Serialize};
use tracing::debug;

const MATCH_MIGRATION_VERSION: i64 = 1;

const SCHEMA_MATCH_V1: &str = r"
CREATE TABLE IF NOT EXISTS demo_files (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  run_id TEXT NOT NULL UNIQUE,
  file_name TEXT NOT NULL,
  file_size INTEGER NOT NULL CHECK (file_size >= 0),
  source TEXT NOT NULL,
  parsed_at TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS players (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  demo_file_id INTEGER NOT NULL,
  slot INTEGER NOT NULL,
  steam_id TEXT NOT NULL,
  name TEXT NOT NULL,
  team TEXT NOT NULL CHECK (team IN ('t', 'ct', 'spectator', 'unassigned')),
  is_bot INTEGER NOT NULL CHECK (is_bot IN (0, 1)),
  is_hltv INTEGER NOT NULL CHECK (is_hltv IN (0, 1)),
  UNIQUE (demo_file_id, slot),
  FOREIGN KEY (demo_file_id) REFERENCES demo_files(id)
);

CREATE TABLE IF NOT EXISTS matches (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  demo_file_id INTEGER NOT NULL,
  map_name TEXT NOT NULL,
  started_at TEXT NOT NULL,
  ended_at TEXT,
  finished INTEGER NOT NULL CHECK (finished IN (0, 1)),
  total_rounds INTEGER NOT NULL CHECK (total_rounds >= 0),
  FOREIGN KEY (demo_file_id) REFERENCES demo_files(id)
);

CREATE TABLE IF NOT EXISTS rounds (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  match_id INTEGER NOT NULL,
  number INTEGER NOT NULL CHECK (number >= 1),
  raw_number INTEGER NOT NULL,
  start_tick INTEGER NOT NULL,
  start_time REAL NOT NULL,
  end_tick INTEGER,
  end_time REAL,
  t_score_start INTEGER NOT NULL,
  ct_score_start INTEGER NOT NULL,
  t_score_end INTEGER,
  ct_score_end INTEGER,
  winner TEXT,
  end_reason TEXT,
  UNIQUE (match_id, number),
  FOREIGN KEY (match_id) REFERENCES matches(id)
);

CREATE TABLE IF NOT EXISTS kills (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  victim_id INTEGER NOT NULL REFERENCES players(id),
  killer_id INTEGER REFERENCES players(id),
  assister_id INTEGER REFERENCES players(id),
  weapon TEXT NOT NULL,
  headshot INTEGER NOT NULL CHECK (headshot IN (0, 1)),
  penetrated INTEGER NOT NULL,
  noscope INTEGER NOT NULL CHECK (noscope IN (0, 1)),
  thrusmoke INTEGER NOT NULL CHECK (thrusmoke IN (0, 1)),
  attacker_blind INTEGER NOT NULL CHECK (attacker_blind IN (0, 1)),
  team_kill INTEGER NOT NULL CHECK (team_kill IN (0, 1)),
  assist_kind TEXT CHECK (assist_kind IN ('flash', 'damage') OR assist_kind IS NULL),
  victim_x REAL NOT NULL,
  victim_y REAL NOT NULL,
  victim_z REAL NOT NULL,
  killer_x REAL,
  killer_y REAL,
  killer_z REAL,
  killer_pitch REAL,
  killer_yaw REAL,
  distance REAL
);

CREATE TABLE IF NOT EXISTS damages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  victim_id INTEGER NOT NULL REFERENCES players(id),
  attacker_id INTEGER REFERENCES players(id),
  weapon TEXT NOT NULL,
  dmg_health INTEGER NOT NULL,
  dmg_armor INTEGER NOT NULL,
  health_after INTEGER NOT NULL,
  armor_after INTEGER NOT NULL,
  hitgroup INTEGER NOT NULL,
  team_damage INTEGER NOT NULL CHECK (team_damage IN (0, 1))
);

CREATE TABLE IF NOT EXISTS weapon_fires (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER NOT NULL REFERENCES players(id),
  weapon TEXT NOT NULL,
  scoped INTEGER NOT NULL CHECK (scoped IN (0, 1)),
  silenced INTEGER NOT NULL CHECK (silenced IN (0, 1)),
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL,
  pitch REAL NOT NULL,
  yaw REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS grenades (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  thrower_id INTEGER NOT NULL REFERENCES players(id),
  grenade_type TEXT NOT NULL,
  entity_id INTEGER NOT NULL,
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS bomb_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER NOT NULL REFERENCES players(id),
  action TEXT NOT NULL,
  site INTEGER,
  has_kit INTEGER NOT NULL CHECK (has_kit IN (0, 1)),
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS zone_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER NOT NULL REFERENCES players(id),
  zone TEXT NOT NULL,
  action TEXT NOT NULL CHECK (action IN ('enter', 'exit')),
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS economy_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER NOT NULL REFERENCES players(id),
  action TEXT NOT NULL,
  item TEXT NOT NULL,
  item_cost INTEGER,
  money_before INTEGER NOT NULL,
  money_after INTEGER NOT NULL,
  money_change INTEGER NOT NULL
);

CREATE TABLE IF NOT EXISTS equipment_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER NOT NULL REFERENCES players(id),
  action TEXT NOT NULL CHECK (action IN ('pickup', 'equip', 'drop')),
  item TEXT NOT NULL
);

CREATE TABLE IF NOT EXISTS inferno_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  thrower_id INTEGER REFERENCES players(id),
  action TEXT NOT NULL,
  entity_id INTEGER NOT NULL,
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS flash_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  flashed_id INTEGER NOT NULL REFERENCES players(id),
  flasher_id INTEGER REFERENCES players(id),
  duration REAL NOT NULL,
  flashed_team TEXT NOT NULL,
  flasher_team TEXT,
  team_flash INTEGER NOT NULL CHECK (team_flash IN (0, 1)),
  self_flash INTEGER NOT NULL CHECK (self_flash IN (0, 1)),
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL,
  distance REAL
);

CREATE TABLE IF NOT EXISTS hostage_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER REFERENCES players(id),
  player_team TEXT,
  action TEXT NOT NULL CHECK (
    action IN ('follows', 'hurt', 'killed', 'rescued', 'stops_following', 'call_for_help')
  ),
  hostage_entity INTEGER NOT NULL,
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL
);

CREATE TABLE IF NOT EXISTS chat_messages (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  sender_id INTEGER NOT NULL REFERENCES players(id),
  message TEXT NOT NULL,
  team_only INTEGER NOT NULL CHECK (team_only IN (0, 1))
);

CREATE TABLE IF NOT EXISTS player_positions (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER NOT NULL REFERENCES players(id),
  x REAL NOT NULL,
  y REAL NOT NULL,
  z REAL NOT NULL,
  pitch REAL NOT NULL,
  yaw REAL NOT NULL,
  health INTEGER NOT NULL,
  armor INTEGER NOT NULL,
  is_alive INTEGER NOT NULL CHECK (is_alive IN (0, 1))
);

CREATE TABLE IF NOT EXISTS game_events (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  tick INTEGER NOT NULL,
  game_time REAL NOT NULL,
  player_id INTEGER REFERENCES players(id),
  name TEXT NOT NULL,
  description TEXT NOT NULL,
  important INTEGER NOT NULL CHECK (important IN (0, 1))
);

CREATE TABLE IF NOT EXISTS player_round_stats (
  id INTEGER PRIMARY KEY AUTOINCREMENT,
  round_id INTEGER NOT NULL REFERENCES rounds(id),
  player_id INTEGER NOT NULL REFERENCES players(id),
  team TEXT NOT NULL,
  start_money INTEGER NOT NULL,
  end_money INTEGER,
  start_health INTEGER NOT NULL,
  end_health INTEGER,
  start_armor INTEGER NOT NULL,
  end_armor INTEGER,
  has_helmet INTEGER NOT NULL CHECK (has_helmet IN (0, 1)),
  has_defuser INTEGER NOT NULL CHECK (has_defuser IN (0, 1)),
  kills INTEGER NOT NULL,
  deaths INTEGER NOT NULL,
  assists INTEGER NOT NULL,
  damage INTEGER NOT NULL,
  shots_fired INTEGER NOT NULL,
  survived INTEGER CHECK (survived IN (0, 1) OR survived IS NULL),
  UNIQUE (round_id, player_id)
);

CREATE TABLE IF NOT EXISTS player_match_stats (
  match_id INTEGER NOT NULL REFERENCES matches(id),
  player_id INTEGER NOT NULL REFERENCES players(id),
  kills INTEGER NOT NULL,
  deaths INTEGER NOT NULL,
  assists INTEGER NOT NULL,
  headshot_kills INTEGER NOT NULL,
  wallbang_kills INTEGER NOT NULL,
  damage_dealt INTEGER NOT NULL,
  rounds_played INTEGER NOT NULL,
  headshot_pct REAL NOT NULL,
  kd_ratio REAL NOT NULL,
  adr REAL NOT NULL,
  PRIMARY KEY (match_id, player_id)
);

CREATE INDEX IF NOT EXISTS idx_rounds_match_number ON rounds(match_id, number);
CREATE INDEX IF NOT EXISTS idx_kills_round ON kills(round_id);
CREATE INDEX IF NOT EXISTS idx_damages_round ON damages(round_id);
CREATE INDEX IF NOT EXISTS idx_player_positions_round_tick ON player_positions(round_id, tick);
";

/// Every table the schema owns, in dependency order.
const TABLES: [&str; 20] = [
    "demo_files",
    "players",
    "matches",
    "rounds",
    "kills",
    "damages",
    "weapon_fires",
    "grenades",
    "bomb_events",
    "zone_events",
    "economy_events",
    "equipment_events",
    "inferno_events",
    "flash_events",
    "hostage_events",
    "chat_messages",
    "player_positions",
    "game_events",
    "player_round_stats",
    "player_match_stats",
];

pub struct SqliteMatchStore {
    conn: Connection,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TableCount {
    pub table: String,
    pub rows: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct RoundSummary {
    pub round_id: i64,
    pub number: u32,
    pub start_tick: u32,
    pub end_tick: Option<u32>,
    pub winner: Option<String>,
    pub end_reason: Option<String>,
    pub t_score: Option<u32>,
    pub ct_score: Option<u32>,
    pub kills: u32,
    pub damage_events: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct PlayerStatsRow {
    pub player_id: i64,
    pub name: String,
    pub steam_id: String,
    pub team: String,
    pub kills: u32,
    pub deaths: u32,
    pub assists: u32,
    pub headshot_kills: u32,
    pub damage_dealt: u32,
    pub rounds_played: u32,
    pub headshot_pct: f64,
    pub kd_ratio: f64,
    pub adr: f64,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct PlayerRow {
    pub player_id: i64,
    pub slot: u32,
    pub steam_id: String,
    pub name: String,
    pub team: String,
    pub is_bot: bool,
    pub is_hltv: bool,
}

impl SqliteMatchStore {
    pub fn open(path: &Path) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("failed to open sqlite database at {}", path.display()))?;

        conn.execute_batch(
            "PRAGMA journal_mode = WAL;
             PRAGMA foreign_keys = ON;
             PRAGMA busy_timeout = 5000;",
        )
        .context("failed to configure sqlite pragmas")?;

        Ok(Self { conn })
    }

    pub fn migrate(&self) -> Result<()> {
        self.conn
            .execute_batch(
                "CREATE TABLE IF NOT EXISTS schema_migrations (
                    version INTEGER PRIMARY KEY,
                    applied_at TEXT NOT NULL
                );",
            )
            .context("failed to ensure schema_migrations exists")?;

        self.conn
            .execute_batch(SCHEMA_MATCH_V1)
            .context("failed to apply match schema")?;

        let now = format_rfc3339(now_utc()).map_err(|err| anyhow!(err.to_string()))?;
        self.conn
            .execute(
                "INSERT OR IGNORE INTO schema_migrations(version, applied_at) VALUES (?1, ?2)",
                params![MATCH_MIGRATION_VERSION, now],
            )
            .context("failed to register match schema migration")?;

        Ok(())
    }

    pub fn insert_demo(&self, demo: &DemoFileInfo) -> Result<i64> {
        let file_size = i64::try_from(demo.file_size)
            .with_context(|| format!("file size out of range: {}", demo.file_size))?;
        self.conn
            .execute(
                "INSERT INTO demo_files(run_id, file_name, file_size, source, parsed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
                params![
                    demo.run_id.to_string(),
                    demo.file_name,
                    file_size,
                    demo.source.as_str(),
                    format_rfc3339(demo.parsed_at).map_err(|err| anyhow!(err.to_string()))?,
                ],
            )
            .context("failed to insert demo file")?;
        Ok(self.conn.last_insert_rowid())
    }

    pub fn insert_players(
        &mut self,
        demo_file_id: i64,
        players: &[(PlayerSlot, PlayerProfile)],
    ) -> Result<Vec<(PlayerSlot, PlayerId)>> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start players transaction")?;
        let mut ids = Vec::with_capacity(players.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO players(demo_file_id, slot, steam_id, name, team, is_bot, is_hltv)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?;
            for (slot, profile) in players {
                stmt.execute(params![
                    demo_file_id,
                    slot.0,
                    profile.steam_id.to_string(),
                    profile.name,
                    profile.team.as_str(),
                    bool_to_sql(profile.is_bot),
                    bool_to_sql(profile.is_hltv),
                ])
                .with_context(|| format!("failed to insert player {slot}"))?;
                ids.push((*slot, PlayerId(tx.last_insert_rowid())));
            }
        }
        tx.commit().context("failed to commit players transaction")?;
        Ok(ids)
    }

    pub fn insert_match(&self, demo_file_id: i64, record: &MatchRecord) -> Result<MatchId> {
        let ended_at = match record.ended_at {
            Some(value) => Some(format_rfc3339(value).map_err(|err| anyhow!(err.to_string()))?),
            None => None,
        };
        self.conn
            .execute(
                "INSERT INTO matches(demo_file_id, map_name, started_at, ended_at, finished, total_rounds)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
                params![
                    demo_file_id,
                    record.map_name,
                    format_rfc3339(record.started_at).map_err(|err| anyhow!(err.to_string()))?,
                    ended_at,
                    bool_to_sql(record.finished),
                    record.total_rounds,
                ],
            )
            .context("failed to insert match")?;
        Ok(MatchId(self.conn.last_insert_rowid()))
    }

    pub fn insert_rounds(
        &mut self,
        match_id: MatchId,
        rounds: &[Round],
    ) -> Result<Vec<(RoundNumber, RoundId)>> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start rounds transaction")?;
        let mut ids = Vec::with_capacity(rounds.len());
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO rounds(
                    match_id, number, raw_number, start_tick, start_time, end_tick, end_time,
                    t_score_start, ct_score_start, t_score_end, ct_score_end, winner, end_reason
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13)",
            )?;
            for round in rounds {
                stmt.execute(params![
                    match_id.0,
                    round.number.0,
                    round.raw_number,
                    round.start_tick,
                    round.start_time,
                    round.end_tick,
                    round.end_time,
                    round.t_score_start,
                    round.ct_score_start,
                    round.t_score_end,
                    round.ct_score_end,
                    round.winner.map(|team| team.as_str()),
                    round.end_reason.map(|reason| reason.as_str()),
                ])
                .with_context(|| format!("failed to insert {}", round.number))?;
                ids.push((round.number, RoundId(tx.last_insert_rowid())));
            }
        }
        tx.commit().context("failed to commit rounds transaction")?;
        Ok(ids)
    }

    /// Inserts one batch in a single transaction; any failing row rolls back the batch.
    pub fn insert_batch(&mut self, kind: RecordKind, batch: &[Fact<Resolved>]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .with_context(|| format!("failed to start {} batch transaction", kind.as_str()))?;
        for fact in batch {
            if fact.kind() != kind {
                return Err(anyhow!(
                    "{} record in a {} batch",
                    fact.kind().as_str(),
                    kind.as_str()
                ));
            }
            insert_fact(&tx, fact)
                .with_context(|| format!("failed to insert {} row", kind.as_str()))?;
        }
        tx.commit()
            .with_context(|| format!("failed to commit {} batch", kind.as_str()))?;
        debug!(kind = kind.as_str(), rows = batch.len(), table = table_name(kind), "batch committed");
        Ok(())
    }

    pub fn insert_match_stats(&mut self, match_id: MatchId, stats: &[PlayerMatchStats]) -> Result<()> {
        let tx = self
            .conn
            .transaction()
            .context("failed to start match stats transaction")?;
        {
            let mut stmt = tx.prepare_cached(
                "INSERT INTO player_match_stats(
                    match_id, player_id, kills, deaths, assists, headshot_kills, wallbang_kills,
                    damage_dealt, rounds_played, headshot_pct, kd_ratio, adr
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?;
            for entry in stats {
                stmt.execute(params![
                    match_id.0,
                    entry.player.0,
                    entry.kills,
                    entry.deaths,
                    entry.assists,
                    entry.headshot_kills,
                    entry.wallbang_kills,
                    entry.damage_dealt,
                    entry.rounds_played,
                    entry.headshot_pct,
                    entry.kd_ratio,
                    entry.adr,
                ])
                .with_context(|| format!("failed to insert match stats for player {}", entry.player))?;
            }
        }
        tx.commit().context("failed to commit match stats transaction")?;
        Ok(())
    }

    pub fn table_counts(&self) -> Result<Vec<TableCount>> {
        let mut counts = Vec::with_capacity(TABLES.len());
        for table in TABLES {
            let rows = self
                .conn
                .query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |row| {
                    row.get::<_, i64>(0)
                })
                .with_context(|| format!("failed to count rows in {}", table))?;
            counts.push(TableCount {
                table: table.to_string(),
                rows: u64::try_from(rows)
                    .with_context(|| format!("invalid row count for {}: {}", table, rows))?,
            });
        }
        Ok(counts)
    }

    pub fn latest_match_id(&self) -> Result<Option<MatchId>> {
        let value = self
            .conn
            .query_row("SELECT MAX(id) FROM matches", [], |row| {
                row.get::<_, Option<i64>>(0)
            })
            .context("failed to query latest match id")?;
        Ok(value.map(MatchId))
    }

    pub fn round_summaries(&self, match_id: MatchId) -> Result<Vec<RoundSummary>> {
        let mut stmt = self.conn.prepare(
            "SELECT r.id, r.number, r.start_tick, r.end_tick, r.winner, r.end_reason,
                    r.t_score_end, r.ct_score_end,
                    (SELECT COUNT(*) FROM kills k WHERE k.round_id = r.id),
                    (SELECT COUNT(*) FROM damages d WHERE d.round_id = r.id)
             FROM rounds r
             WHERE r.match_id = ?1
             ORDER BY r.number ASC",
        )?;
        let rows = stmt.query_map(params![match_id.0], |row| {
            Ok(RoundSummary {
                round_id: row.get(0)?,
                number: row.get(1)?,
                start_tick: row.get(2)?,
                end_tick: row.get(3)?,
                winner: row.get(4)?,
                end_reason: row.get(5)?,
                t_score: row.get(6)?,
                ct_score: row.get(7)?,
                kills: row.get(8)?,
                damage_events: row.get(9)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn player_match_stats(&self, match_id: MatchId) -> Result<Vec<PlayerStatsRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT s.player_id, p.name, p.steam_id, p.team, s.kills, s.deaths, s.assists,
                    s.headshot_kills, s.damage_dealt, s.rounds_played, s.headshot_pct,
                    s.kd_ratio, s.adr
             FROM player_match_stats s
             JOIN players p ON p.id = s.player_id
             WHERE s.match_id = ?1
             ORDER BY s.kills DESC, s.deaths ASC, s.player_id ASC",
        )?;
        let rows = stmt.query_map(params![match_id.0], |row| {
            Ok(PlayerStatsRow {
                player_id: row.get(0)?,
                name: row.get(1)?,
                steam_id: row.get(2)?,
                team: row.get(3)?,
                kills: row.get(4)?,
                deaths: row.get(5)?,
                assists: row.get(6)?,
                headshot_kills: row.get(7)?,
                damage_dealt: row.get(8)?,
                rounds_played: row.get(9)?,
                headshot_pct: row.get(10)?,
                kd_ratio: row.get(11)?,
                adr: row.get(12)?,
            })
        })?;
        collect_rows(rows)
    }

    pub fn match_players(&self, match_id: MatchId) -> Result<Vec<PlayerRow>> {
        let mut stmt = self.conn.prepare(
            "SELECT p.id, p.slot, p.steam_id, p.name, p.team, p.is_bot, p.is_hltv
             FROM players p
             JOIN matches m ON m.demo_file_id = p.demo_file_id
             WHERE m.id = ?1
             ORDER BY p.slot ASC",
        )?;
        let rows = stmt.query_map(params![match_id.0], |row| {
            Ok(PlayerRow {
                player_id: row.get(0)?,
                slot: row.get(1)?,
                steam_id: row.get(2)?,
                name: row.get(3)?,
                team: row.get(4)?,
                is_bot: row.get(5)?,
                is_hltv: row.get(6)?,
            })
        })?;
        collect_rows(rows)
    }

    #[cfg(test)]
    fn connection(&self) -> &Connection {
        &self.conn
    }
}

impl MatchStore for SqliteMatchStore {
    fn register_demo(&mut self, demo: &DemoFileInfo) -> Result<i64, IngestError> {
        self.insert_demo(demo).map_err(to_ingest_error)
    }

    fn persist_players(
        &mut self,
        demo_file_id: i64,
        players: &[(PlayerSlot, PlayerProfile)],
    ) -> Result<Vec<(PlayerSlot, PlayerId)>, IngestError> {
        self.insert_players(demo_file_id, players)
            .map_err(to_ingest_error)
    }

    fn persist_match(
        &mut self,
        demo_file_id: i64,
        record: &MatchRecord,
    ) -> Result<MatchId, IngestError> {
        self.insert_match(demo_file_id, record)
            .map_err(to_ingest_error)
    }

    fn persist_rounds(
        &mut self,
        match_id: MatchId,
        rounds: &[Round],
    ) -> Result<Vec<(RoundNumber, RoundId)>, IngestError> {
        self.insert_rounds(match_id, rounds).map_err(to_ingest_error)
    }

    fn write_batch(
        &mut self,
        kind: RecordKind,
        batch: &[Fact<Resolved>],
    ) -> Result<(), IngestError> {
        self.insert_batch(kind, batch).map_err(to_ingest_error)
    }

    fn write_match_stats(
        &mut self,
        match_id: MatchId,
        stats: &[PlayerMatchStats],
    ) -> Result<(), IngestError> {
        self.insert_match_stats(match_id, stats)
            .map_err(to_ingest_error)
    }
}

#[must_use]
pub fn table_name(kind: RecordKind) -> &'static str {
    match kind {
        RecordKind::Kill => "kills",
        RecordKind::Damage => "damages",
        RecordKind::WeaponFire => "weapon_fires",
        RecordKind::Grenade => "grenades",
        RecordKind::Bomb => "bomb_events",
        RecordKind::ZoneEvent => "zone_events",
        RecordKind::EconomyEvent => "economy_events",
        RecordKind::Equipment => "equipment_events",
        RecordKind::InfernoEvent => "inferno_events",
        RecordKind::FlashEvent => "flash_events",
        RecordKind::HostageEvent => "hostage_events",
        RecordKind::ChatMessage => "chat_messages",
        RecordKind::PlayerPosition => "player_positions",
        RecordKind::GameEvent => "game_events",
        RecordKind::PlayerRoundStats => "player_round_stats",
    }
}

#[allow(clippy::too_many_lines)]
fn insert_fact(tx: &Transaction<'_>, fact: &Fact<Resolved>) -> rusqlite::Result<usize> {
    match fact {
        Fact::Kill(kill) => tx
            .prepare_cached(
                "INSERT INTO kills(
                    round_id, tick, game_time, victim_id, killer_id, assister_id, weapon,
                    headshot, penetrated, noscope, thrusmoke, attacker_blind, team_kill,
                    assist_kind, victim_x, victim_y, victim_z, killer_x, killer_y, killer_z,
                    killer_pitch, killer_yaw, distance
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11,
                    ?12, ?13, ?14, ?15, ?16, ?17, ?18, ?19, ?20, ?21, ?22, ?23
                 )",
            )?
            .execute(params![
                kill.round.0,
                kill.at.tick,
                kill.at.game_time,
                kill.victim.0,
                kill.killer.map(|id| id.0),
                kill.assister.map(|id| id.0),
                kill.weapon,
                bool_to_sql(kill.headshot),
                kill.penetrated,
                bool_to_sql(kill.noscope),
                bool_to_sql(kill.thrusmoke),
                bool_to_sql(kill.attacker_blind),
                bool_to_sql(kill.team_kill),
                kill.assist.map(|assist| assist.as_str()),
                kill.victim_position.x,
                kill.victim_position.y,
                kill.victim_position.z,
                kill.killer_position.map(|p| p.x),
                kill.killer_position.map(|p| p.y),
                kill.killer_position.map(|p| p.z),
                kill.killer_view.map(|v| v.pitch),
                kill.killer_view.map(|v| v.yaw),
                kill.distance,
            ]),
        Fact::Damage(damage) => tx
            .prepare_cached(
                "INSERT INTO damages(
                    round_id, tick, game_time, victim_id, attacker_id, weapon, dmg_health,
                    dmg_armor, health_after, armor_after, hitgroup, team_damage
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?
            .execute(params![
                damage.round.0,
                damage.at.tick,
                damage.at.game_time,
                damage.victim.0,
                damage.attacker.map(|id| id.0),
                damage.weapon,
                damage.dmg_health,
                damage.dmg_armor,
                damage.health_after,
                damage.armor_after,
                damage.hitgroup,
                bool_to_sql(damage.team_damage),
            ]),
        Fact::WeaponFire(fire) => tx
            .prepare_cached(
                "INSERT INTO weapon_fires(
                    round_id, tick, game_time, player_id, weapon, scoped, silenced,
                    x, y, z, pitch, yaw
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?
            .execute(params![
                fire.round.0,
                fire.at.tick,
                fire.at.game_time,
                fire.player.0,
                fire.weapon,
                bool_to_sql(fire.scoped),
                bool_to_sql(fire.silenced),
                fire.position.x,
                fire.position.y,
                fire.position.z,
                fire.view.pitch,
                fire.view.yaw,
            ]),
        Fact::Grenade(grenade) => tx
            .prepare_cached(
                "INSERT INTO grenades(
                    round_id, tick, game_time, thrower_id, grenade_type, entity_id, x, y, z
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?
            .execute(params![
                grenade.round.0,
                grenade.at.tick,
                grenade.at.game_time,
                grenade.thrower.0,
                grenade.grenade.as_str(),
                grenade.entity_id,
                grenade.position.x,
                grenade.position.y,
                grenade.position.z,
            ]),
        Fact::Bomb(bomb) => tx
            .prepare_cached(
                "INSERT INTO bomb_events(
                    round_id, tick, game_time, player_id, action, site, has_kit, x, y, z
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?
            .execute(params![
                bomb.round.0,
                bomb.at.tick,
                bomb.at.game_time,
                bomb.player.0,
                bomb.action.as_str(),
                bomb.site,
                bool_to_sql(bomb.has_kit),
                bomb.position.x,
                bomb.position.y,
                bomb.position.z,
            ]),
        Fact::ZoneEvent(zone) => tx
            .prepare_cached(
                "INSERT INTO zone_events(
                    round_id, tick, game_time, player_id, zone, action, x, y, z
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?
            .execute(params![
                zone.round.0,
                zone.at.tick,
                zone.at.game_time,
                zone.player.0,
                zone.zone.as_str(),
                zone.action.as_str(),
                zone.position.x,
                zone.position.y,
                zone.position.z,
            ]),
        Fact::EconomyEvent(economy) => tx
            .prepare_cached(
                "INSERT INTO economy_events(
                    round_id, tick, game_time, player_id, action, item, item_cost,
                    money_before, money_after, money_change
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?
            .execute(params![
                economy.round.0,
                economy.at.tick,
                economy.at.game_time,
                economy.player.0,
                economy.action.as_str(),
                economy.item,
                economy.item_cost,
                economy.money_before,
                economy.money_after,
                economy.money_change(),
            ]),
        Fact::Equipment(equipment) => tx
            .prepare_cached(
                "INSERT INTO equipment_events(round_id, tick, game_time, player_id, action, item)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                equipment.round.0,
                equipment.at.tick,
                equipment.at.game_time,
                equipment.player.0,
                equipment.action.as_str(),
                equipment.item,
            ]),
        Fact::InfernoEvent(inferno) => tx
            .prepare_cached(
                "INSERT INTO inferno_events(
                    round_id, tick, game_time, thrower_id, action, entity_id, x, y, z
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
            )?
            .execute(params![
                inferno.round.0,
                inferno.at.tick,
                inferno.at.game_time,
                inferno.thrower.map(|id| id.0),
                inferno.action.as_str(),
                inferno.entity_id,
                inferno.position.x,
                inferno.position.y,
                inferno.position.z,
            ]),
        Fact::FlashEvent(flash) => tx
            .prepare_cached(
                "INSERT INTO flash_events(
                    round_id, tick, game_time, flashed_id, flasher_id, duration, flashed_team,
                    flasher_team, team_flash, self_flash, x, y, z, distance
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14)",
            )?
            .execute(params![
                flash.round.0,
                flash.at.tick,
                flash.at.game_time,
                flash.flashed.0,
                flash.flasher.map(|id| id.0),
                flash.duration,
                flash.flashed_team.as_str(),
                flash.flasher_team.map(|team| team.as_str()),
                bool_to_sql(flash.team_flash),
                bool_to_sql(flash.self_flash),
                flash.flashed_position.x,
                flash.flashed_position.y,
                flash.flashed_position.z,
                flash.distance,
            ]),
        Fact::HostageEvent(hostage) => tx
            .prepare_cached(
                "INSERT INTO hostage_events(
                    round_id, tick, game_time, player_id, player_team, action,
                    hostage_entity, x, y, z
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10)",
            )?
            .execute(params![
                hostage.round.0,
                hostage.at.tick,
                hostage.at.game_time,
                hostage.player.map(|id| id.0),
                hostage.player_team.map(|team| team.as_str()),
                hostage.action.as_str(),
                hostage.hostage_entity,
                hostage.position.x,
                hostage.position.y,
                hostage.position.z,
            ]),
        Fact::ChatMessage(chat) => tx
            .prepare_cached(
                "INSERT INTO chat_messages(round_id, tick, game_time, sender_id, message, team_only)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
            )?
            .execute(params![
                chat.round.0,
                chat.at.tick,
                chat.at.game_time,
                chat.sender.0,
                chat.message,
                bool_to_sql(chat.team_only),
            ]),
        Fact::PlayerPosition(position) => tx
            .prepare_cached(
                "INSERT INTO player_positions(
                    round_id, tick, game_time, player_id, x, y, z, pitch, yaw,
                    health, armor, is_alive
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12)",
            )?
            .execute(params![
                position.round.0,
                position.at.tick,
                position.at.game_time,
                position.player.0,
                position.position.x,
                position.position.y,
                position.position.z,
                position.view.pitch,
                position.view.yaw,
                position.health,
                position.armor,
                bool_to_sql(position.is_alive),
            ]),
        Fact::GameEvent(event) => tx
            .prepare_cached(
                "INSERT INTO game_events(
                    round_id, tick, game_time, player_id, name, description, important
                 ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
            )?
            .execute(params![
                event.round.0,
                event.at.tick,
                event.at.game_time,
                event.player.map(|id| id.0),
                event.name,
                event.description,
                bool_to_sql(event.important),
            ]),
        Fact::PlayerRoundStats(line) => tx
            .prepare_cached(
                "INSERT INTO player_round_stats(
                    round_id, player_id, team, start_money, end_money, start_health,
                    end_health, start_armor, end_armor, has_helmet, has_defuser, kills,
                    deaths, assists, damage, shots_fired, survived
                 ) VALUES (
                    ?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15, ?16, ?17
                 )",
            )?
            .execute(params![
                line.round.0,
                line.player.0,
                line.team.as_str(),
                line.start_money,
                line.end_money,
                line.start_health,
                line.end_health,
                line.start_armor,
                line.end_armor,
                bool_to_sql(line.has_helmet),
                bool_to_sql(line.has_defuser),
                line.kills,
                line.deaths,
                line.assists,
                line.damage,
                line.shots_fired,
                line.survived.map(bool_to_sql),
            ]),
    }
}

fn to_ingest_error(err: anyhow::Error) -> IngestError {
    IngestError::Persistence(format!("{err:#}"))
}

fn bool_to_sql(value: bool) -> i64 {
    i64::from(value)
}

fn collect_rows<T>(
    rows: rusqlite::MappedRows<'_, impl FnMut(&rusqlite::Row<'_>) -> rusqlite::Result<T>>,
) -> Result<Vec<T>> {
    let mut values = Vec::new();
    for row in rows {
        values.push(row?);
    }
    Ok(values)
}

#[cfg(test)]
mod tests {
    #![allow(clippy::too_many_lines, clippy::float_cmp)]

    use super::*;
    use demo_ingest_core::{
        ingest, CancelToken, ChatMessage, DemoEvent, DemoHeader, DemoSource, EventKind,
        FlashEvent, HostageAction, HostageEvent, IngestConfig, PlayerRef, RoundEndReason, Stamp,
        Team, VecDecoder, Vector3,
    };
    use proptest::prelude::*;
    use ulid::Ulid;

    fn must<T>(result: Result<T>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn must_ok<T>(result: Result<T, IngestError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    fn fixture_store() -> SqliteMatchStore {
        let store = must(SqliteMatchStore::open(Path::new(":memory:")));
        must(store.migrate());
        store
    }

    /// Seeds one demo, one match, one round and one player; returns their ids.
    fn seeded_store() -> (SqliteMatchStore, RoundId, PlayerId) {
        let mut store = fixture_store();
        let demo = DemoFileInfo {
            run_id: Ulid::new(),
            file_name: "seed.dem".to_string(),
            file_size: 10,
            source: DemoSource::Faceit,
            parsed_at: now_utc(),
        };
        let demo_id = must(store.insert_demo(&demo));
        let players = must(store.insert_players(
            demo_id,
            &[(
                PlayerSlot(3),
                PlayerProfile {
                    name: "Alice".to_string(),
                    team: Team::CounterTerrorist,
                    ..PlayerProfile::default()
                },
            )],
        ));
        let match_id = must(store.insert_match(
            demo_id,
            &MatchRecord {
                map_name: "de_nuke".to_string(),
                started_at: now_utc(),
                ended_at: None,
                finished: false,
                total_rounds: 1,
            },
        ));
        let rounds = must(store.insert_rounds(
            match_id,
            &[Round {
                number: RoundNumber(1),
                raw_number: 3,
                start_tick: 64,
                start_time: 1.0,
                end_tick: None,
                end_time: None,
                t_score_start: 0,
                ct_score_start: 0,
                t_score_end: None,
                ct_score_end: None,
                winner: None,
                end_reason: None,
            }],
        ));
        (store, rounds[0].1, players[0].1)
    }

    fn chat(round: RoundId, sender: PlayerId, message: &str) -> Fact<Resolved> {
        Fact::ChatMessage(ChatMessage {
            round,
            at: Stamp::default(),
            sender,
            message: message.to_string(),
            team_only: false,
        })
    }

    fn count(store: &SqliteMatchStore, table: &str) -> i64 {
        match store.connection().query_row(
            &format!("SELECT COUNT(*) FROM {table}"),
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to count {table}: {err}"),
        }
    }

    fn player(slot: u32, name: &str, team: Team) -> PlayerRef {
        PlayerRef {
            slot: PlayerSlot(slot),
            steam_id: 76_561_198_000_000_000 + u64::from(slot),
            name: name.to_string(),
            team,
            health: 100,
            is_alive: true,
            ..PlayerRef::default()
        }
    }

    fn event(tick: u32, kind: EventKind) -> DemoEvent {
        DemoEvent {
            tick,
            game_time: 0.0,
            kind,
        }
    }

    fn scenario() -> Vec<DemoEvent> {
        let alice = player(0, "Alice", Team::CounterTerrorist);
        let bob = player(1, "Bob", Team::Terrorist);
        vec![
            event(
                64,
                EventKind::RoundStart {
                    t_score: 0,
                    ct_score: 0,
                    roster: vec![alice.clone(), bob.clone()],
                },
            ),
            event(
                65,
                EventKind::PlayerConnect {
                    player: alice.clone(),
                },
            ),
            event(
                600,
                EventKind::PlayerHurt {
                    victim: alice.clone(),
                    attacker: Some(bob.clone()),
                    weapon: "ak47".to_string(),
                    dmg_health: 100,
                    dmg_armor: 0,
                    hitgroup: 1,
                },
            ),
            event(
                640,
                EventKind::PlayerDeath {
                    victim: alice,
                    attacker: Some(bob.clone()),
                    assister: None,
                    weapon: "ak47".to_string(),
                    headshot: true,
                    penetrated: 0,
                    noscope: false,
                    thrusmoke: false,
                    attacker_blind: false,
                    assisted_flash: false,
                },
            ),
            event(
                700,
                EventKind::Chat {
                    player: bob,
                    message: "gg".to_string(),
                    team_only: false,
                },
            ),
            event(
                900,
                EventKind::RoundEnd {
                    winner: Some(Team::Terrorist),
                    reason: Some(RoundEndReason::TerroristsWin),
                    t_score: 1,
                    ct_score: 0,
                    roster: Vec::new(),
                },
            ),
        ]
    }

    fn header() -> DemoHeader {
        DemoHeader {
            map_name: "de_mirage".to_string(),
            file_name: "scenario.dem".to_string(),
            file_size: 2048,
        }
    }

    #[test]
    fn migration_is_idempotent() {
        let store = fixture_store();
        must(store.migrate());
        assert_eq!(count(&store, "schema_migrations"), 1);
        let counts = must(store.table_counts());
        assert_eq!(counts.len(), TABLES.len());
        assert!(counts.iter().all(|entry| entry.rows == 0));
    }

    #[test]
    fn every_kind_maps_to_a_schema_table() {
        for kind in RecordKind::ALL {
            assert!(TABLES.contains(&table_name(kind)), "{}", kind.as_str());
        }
    }

    #[test]
    fn foreign_key_rejects_unknown_round() {
        let (mut store, _round, player) = seeded_store();
        let result = store.write_batch(
            RecordKind::ChatMessage,
            &[chat(RoundId(9_999), player, "ghost")],
        );
        assert!(matches!(result, Err(IngestError::Persistence(_))));
        assert_eq!(count(&store, "chat_messages"), 0);
    }

    #[test]
    fn failing_row_rolls_back_its_batch() {
        let (mut store, round, player) = seeded_store();
        must(store.insert_batch(RecordKind::ChatMessage, &[chat(round, player, "first")]));

        let result = store.insert_batch(
            RecordKind::ChatMessage,
            &[
                chat(round, player, "ok"),
                chat(round, player, "ok too"),
                chat(round, PlayerId(4_242), "unknown sender"),
            ],
        );
        assert!(result.is_err());
        assert_eq!(count(&store, "chat_messages"), 1);
    }

    #[test]
    fn flash_and_hostage_rows_store_absent_players_as_null() {
        let (mut store, round, player) = seeded_store();
        must(store.insert_batch(
            RecordKind::FlashEvent,
            &[Fact::FlashEvent(FlashEvent {
                round,
                at: Stamp::default(),
                flashed: player,
                flasher: None,
                duration: 2.25,
                flashed_team: Team::CounterTerrorist,
                flasher_team: None,
                team_flash: false,
                self_flash: false,
                flashed_position: Vector3::default(),
                distance: None,
            })],
        ));
        must(store.insert_batch(
            RecordKind::HostageEvent,
            &[Fact::HostageEvent(HostageEvent {
                round,
                at: Stamp::default(),
                player: None,
                player_team: None,
                action: HostageAction::CallForHelp,
                hostage_entity: 212,
                position: Vector3::default(),
            })],
        ));

        let (flasher, duration): (Option<i64>, f64) = match store.connection().query_row(
            "SELECT flasher_id, duration FROM flash_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to read flash row: {err}"),
        };
        assert_eq!(flasher, None);
        assert_eq!(duration, 2.25);

        let (hostage_player, action): (Option<i64>, String) = match store.connection().query_row(
            "SELECT player_id, action FROM hostage_events",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to read hostage row: {err}"),
        };
        assert_eq!(hostage_player, None);
        assert_eq!(action, "call_for_help");
    }

    #[test]
    fn mismatched_kind_is_rejected() {
        let (mut store, round, player) = seeded_store();
        let result = store.insert_batch(RecordKind::Kill, &[chat(round, player, "wrong table")]);
        assert!(result.is_err());
        assert_eq!(count(&store, "chat_messages"), 0);
    }

    #[test]
    fn ingest_persists_scenario_with_resolved_ids() {
        let mut store = fixture_store();
        let mut decoder = VecDecoder::new(header(), scenario());
        let report = must_ok(ingest(
            &mut decoder,
            &mut store,
            &IngestConfig::defaults(),
            &CancelToken::new(),
        ));
        let match_id = match report.match_id {
            Some(value) => value,
            None => panic!("expected a persisted match"),
        };
        assert_eq!(must(store.latest_match_id()), Some(match_id));

        let (victim, round_number): (String, u32) = match store.connection().query_row(
            "SELECT p.name, r.number
             FROM kills k
             JOIN players p ON p.id = k.victim_id
             JOIN rounds r ON r.id = k.round_id",
            [],
            |row| Ok((row.get(0)?, row.get(1)?)),
        ) {
            Ok(value) => value,
            Err(err) => panic!("failed to read kill row: {err}"),
        };
        assert_eq!(victim, "Alice");
        assert_eq!(round_number, 1);
        assert_eq!(count(&store, "kills"), 1);

        let violations = match store.connection().query_row(
            "SELECT COUNT(*) FROM pragma_foreign_key_check",
            [],
            |row| row.get::<_, i64>(0),
        ) {
            Ok(value) => value,
            Err(err) => panic!("foreign key check failed: {err}"),
        };
        assert_eq!(violations, 0);

        let rounds = must(store.round_summaries(match_id));
        assert_eq!(rounds.len(), 1);
        assert_eq!(rounds[0].number, 1);
        assert_eq!(rounds[0].kills, 1);
        assert_eq!(rounds[0].damage_events, 1);
        assert_eq!(rounds[0].winner.as_deref(), Some("t"));
        assert_eq!(rounds[0].t_score, Some(1));

        let stats = must(store.player_match_stats(match_id));
        assert_eq!(stats.len(), 2);
        assert_eq!(stats[0].name, "Bob");
        assert_eq!(stats[0].kills, 1);
        assert_eq!(stats[0].headshot_pct, 100.0);
        assert_eq!(stats[0].adr, 100.0);

        let players = must(store.match_players(match_id));
        let names: Vec<_> = players.iter().map(|row| row.name.as_str()).collect();
        assert_eq!(names, vec!["Alice", "Bob"]);

        let counts = must(store.table_counts());
        let chat_rows = counts
            .iter()
            .find(|entry| entry.table == "chat_messages")
            .map(|entry| entry.rows);
        assert_eq!(chat_rows, Some(1));
    }

    #[test]
    fn file_backed_store_survives_reopen() {
        let db_path = std::env::temp_dir().join(format!("demo-ingest-test-{}.sqlite3", Ulid::new()));
        {
            let mut store = must(SqliteMatchStore::open(&db_path));
            must(store.migrate());
            let mut decoder = VecDecoder::new(header(), scenario());
            let _ = must_ok(ingest(
                &mut decoder,
                &mut store,
                &IngestConfig::defaults(),
                &CancelToken::new(),
            ));
        }
        let reopened = must(SqliteMatchStore::open(&db_path));
        must(reopened.migrate());
        assert_eq!(count(&reopened, "rounds"), 1);
        let _ = std::fs::remove_file(&db_path);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(16))]

        #[test]
        fn prop_committed_batches_land_every_row(records in 0usize..300, batch_size in 1usize..64) {
            let (mut store, round, player) = seeded_store();
            let facts: Vec<_> = (0..records)
                .map(|index| chat(round, player, &format!("msg {index}")))
                .collect();
            for batch in facts.chunks(batch_size) {
                must(store.insert_batch(RecordKind::ChatMessage, batch));
            }
            prop_assert_eq!(count(&store, "chat_messages"), i64::try_from(records).unwrap_or(i64::MAX));
        }
    }
}
