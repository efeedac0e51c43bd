use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use serde::{Deserialize, Serialize};
use tracing::{info, info_span, warn};
use ulid::Ulid;

use crate::config::IngestConfig;
use crate::events::DemoDecoder;
use crate::keys::{MatchId, PlayerId};
use crate::model::DemoFileInfo;
use crate::resolver::{resolve_staged, IdentityMap, ResolutionReport};
use crate::session::IngestSession;
use crate::stats::compute_match_stats;
use crate::store::MatchStore;
use crate::writer::{BatchWriter, WriteReport};
use crate::{now_utc, IngestError};

pub const INGEST_REPORT_CONTRACT: &str = "ingest_report.v1";

/// Shared flag that stops a run from pulling further events.
#[derive(Debug, Clone, Default)]
pub struct CancelToken(Arc<AtomicBool>);

impl CancelToken {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.0.store(true, Ordering::SeqCst);
    }

    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        self.0.load(Ordering::SeqCst)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct IngestReport {
    pub contract_version: String,
    pub run_id: Ulid,
    pub file_name: String,
    pub source: String,
    pub map_name: String,
    pub match_id: Option<MatchId>,
    pub events_seen: u64,
    pub events_ignored: u64,
    pub players: usize,
    pub rounds: usize,
    pub resolution: ResolutionReport,
    pub writes: WriteReport,
    pub match_stats: usize,
    pub elapsed_ms: u64,
}

/// Runs one replay through staging, resolution and batched writing.
///
/// Nothing is persisted unless the decoder reaches the end of its stream without
/// error or cancellation. Once writing has started, a store failure or cancellation
/// leaves the kinds already written in place.
///
/// # Errors
/// Returns [`IngestError::Decode`] when the decoder fails, [`IngestError::Cancelled`]
/// when `cancel` is set, [`IngestError::Persistence`] when the store fails, and
/// [`IngestError::Configuration`] for an invalid `config`.
pub fn ingest<D, S>(
    decoder: &mut D,
    store: &mut S,
    config: &IngestConfig,
    cancel: &CancelToken,
) -> Result<IngestReport, IngestError>
where
    D: DemoDecoder + ?Sized,
    S: MatchStore + ?Sized,
{
    config.validate()?;
    let writer = BatchWriter::new(config.batch_size)?;
    let run_id = Ulid::new();
    let span = info_span!("ingest", run_id = %run_id, source = %config.source);
    let _entered = span.enter();
    let started = Instant::now();

    let session = IngestSession::new(config.clone(), decoder.header().clone());
    loop {
        if cancel.is_cancelled() {
            info!("cancelled during decoding, nothing written");
            return Err(IngestError::Cancelled);
        }
        match decoder.next_event()? {
            Some(event) => {
                session.dispatch(&event);
            }
            None => break,
        }
    }

    let staged = session.finish();
    info!(
        events = staged.events_seen,
        ignored = staged.events_ignored,
        players = staged.players.len(),
        rounds = staged.rounds.len(),
        facts = staged.facts.len(),
        "decoding finished"
    );
    if cancel.is_cancelled() {
        info!("cancelled before resolution, nothing written");
        return Err(IngestError::Cancelled);
    }

    let mut report = IngestReport {
        contract_version: INGEST_REPORT_CONTRACT.to_string(),
        run_id,
        file_name: staged.header.file_name.clone(),
        source: config.source.as_str().to_string(),
        map_name: staged.header.map_name.clone(),
        match_id: None,
        events_seen: staged.events_seen,
        events_ignored: staged.events_ignored,
        players: staged.players.len(),
        rounds: staged.rounds.len(),
        resolution: ResolutionReport::default(),
        writes: WriteReport::default(),
        match_stats: 0,
        elapsed_ms: 0,
    };

    let Some(match_record) = staged.match_record else {
        warn!("stream contained no playable rounds, nothing written");
        report.elapsed_ms = elapsed_ms(started);
        return Ok(report);
    };

    let demo = DemoFileInfo {
        run_id,
        file_name: staged.header.file_name.clone(),
        file_size: staged.header.file_size,
        source: config.source.clone(),
        parsed_at: now_utc(),
    };
    let demo_file_id = store.register_demo(&demo)?;
    let player_ids = store.persist_players(demo_file_id, &staged.players)?;
    let match_id = store.persist_match(demo_file_id, &match_record)?;
    let round_ids = store.persist_rounds(match_id, &staged.rounds)?;
    info!(
        match_id = %match_id,
        players = player_ids.len(),
        rounds = round_ids.len(),
        "persisted match, rounds and players"
    );

    let identities = IdentityMap::from_persisted(&player_ids, &round_ids);
    let (resolved, resolution) = resolve_staged(staged.facts, &identities);
    info!(
        resolved = resolution.resolved(),
        dropped = resolution.dropped(),
        duplicate_rounds = resolution.duplicate_round_keys,
        duplicate_players = resolution.duplicate_player_keys,
        "resolution finished"
    );
    report.match_id = Some(match_id);
    report.resolution = resolution;

    report.writes = writer.write_all(store, &resolved, cancel)?;

    if cancel.is_cancelled() {
        return Err(IngestError::Cancelled);
    }
    let mut players: Vec<PlayerId> = player_ids.iter().map(|(_, id)| *id).collect();
    players.sort_unstable();
    players.dedup();
    let stats = compute_match_stats(&resolved, &players, match_record.total_rounds);
    store.write_match_stats(match_id, &stats)?;
    report.match_stats = stats.len();
    report.elapsed_ms = elapsed_ms(started);

    info!(
        records = report.writes.total_records,
        batches = report.writes.total_batches,
        elapsed_ms = report.elapsed_ms,
        "ingestion finished"
    );
    Ok(report)
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}
