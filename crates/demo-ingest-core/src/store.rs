use crate::facts::{Fact, RecordKind};
use crate::keys::{MatchId, PlayerId, PlayerSlot, Resolved, RoundId, RoundNumber};
use crate::model::{DemoFileInfo, MatchRecord, PlayerProfile, Round};
use crate::stats::PlayerMatchStats;
use crate::IngestError;

/// Persistence seam for one ingestion run.
///
/// Calls arrive in a fixed order: demo, players, match, rounds, then fact batches kind
/// by kind and finally match stats. Only resolved facts ever reach `write_batch`.
pub trait MatchStore {
    /// # Errors
    /// Returns [`IngestError::Persistence`] when the demo row cannot be written.
    fn register_demo(&mut self, demo: &DemoFileInfo) -> Result<i64, IngestError>;

    /// Persists players and returns their ids keyed by slot, in input order.
    ///
    /// # Errors
    /// Returns [`IngestError::Persistence`] when any player row cannot be written.
    fn persist_players(
        &mut self,
        demo_file_id: i64,
        players: &[(PlayerSlot, PlayerProfile)],
    ) -> Result<Vec<(PlayerSlot, PlayerId)>, IngestError>;

    /// # Errors
    /// Returns [`IngestError::Persistence`] when the match row cannot be written.
    fn persist_match(
        &mut self,
        demo_file_id: i64,
        record: &MatchRecord,
    ) -> Result<MatchId, IngestError>;

    /// Persists rounds tagged with `match_id` and returns their ids keyed by number.
    ///
    /// # Errors
    /// Returns [`IngestError::Persistence`] when any round row cannot be written.
    fn persist_rounds(
        &mut self,
        match_id: MatchId,
        rounds: &[Round],
    ) -> Result<Vec<(RoundNumber, RoundId)>, IngestError>;

    /// Writes one batch of a single kind atomically.
    ///
    /// # Errors
    /// Returns [`IngestError::Persistence`] when the batch cannot be committed.
    fn write_batch(&mut self, kind: RecordKind, batch: &[Fact<Resolved>])
        -> Result<(), IngestError>;

    /// # Errors
    /// Returns [`IngestError::Persistence`] when the stats rows cannot be written.
    fn write_match_stats(
        &mut self,
        match_id: MatchId,
        stats: &[PlayerMatchStats],
    ) -> Result<(), IngestError>;
}
