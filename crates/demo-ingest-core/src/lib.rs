//! Staging and deferred identity resolution for recorded match replays.
//!
//! A replay decoder pushes [`DemoEvent`]s into an [`IngestSession`], which stages
//! provisionally keyed facts (round number, player slot). Once the stream ends the
//! owning rows are persisted through a [`MatchStore`], every staged fact is rewritten
//! to the persisted ids by [`resolve_staged`], and the [`BatchWriter`] hands the
//! resolved set to the store in bounded chunks. [`ingest`] drives the whole run.

use time::{OffsetDateTime, UtcOffset};

mod config;
mod events;
mod facts;
mod keys;
mod model;
mod pipeline;
mod registry;
mod resolver;
mod session;
mod staging;
mod stats;
mod store;
mod writer;

pub use config::{IngestConfig, DEFAULT_BATCH_SIZE, DEFAULT_POSITION_INTERVAL};
pub use events::{DemoDecoder, DemoEvent, DemoHeader, EventKind, PlayerRef, VecDecoder};
pub use facts::{
    Bomb, ChatMessage, Damage, EconomyEvent, Equipment, Fact, FlashEvent, GameEvent, Grenade,
    HostageEvent, InfernoEvent, Kill, PlayerPosition, PlayerRoundStats, RecordKind, RecordSet,
    Stamp, WeaponFire, ZoneEvent,
};
pub use keys::{
    KeySpace, MatchId, PlayerId, PlayerSlot, Provisional, ProvisionalKey, Resolved, RoundId,
    RoundNumber,
};
pub use model::{
    AssistKind, BombAction, DemoFileInfo, DemoSource, EconomyAction, EquipmentAction, GrenadeKind,
    HostageAction, InfernoAction, MatchRecord, Player, PlayerProfile, Round, RoundEndReason, Team, Vector3,
    ViewAngles, ZoneAction, ZoneKind, ROUND_OFFSET,
};
pub use pipeline::{ingest, CancelToken, IngestReport};
pub use registry::{RoundClosing, RoundOpening, RoundPlayerRegistry};
pub use resolver::{resolve_staged, IdentityMap, KindResolution, ResolutionReport, Unresolved};
pub use session::{DeathDetails, IngestSession, StagedRun};
pub use staging::{RoundAccumulators, StagingStore};
pub use stats::{compute_match_stats, PlayerMatchStats};
pub use store::MatchStore;
pub use writer::{BatchWriter, KindWriteSummary, WriteReport};

#[derive(Debug, Clone, thiserror::Error, Eq, PartialEq)]
pub enum IngestError {
    #[error("validation error: {0}")]
    Validation(String),
    #[error("configuration error: {0}")]
    Configuration(String),
    #[error("decode error: {0}")]
    Decode(String),
    #[error("persistence error: {0}")]
    Persistence(String),
    #[error("ingestion cancelled")]
    Cancelled,
}

/// Formats a timestamp as RFC3339 in UTC.
///
/// # Errors
/// Returns [`IngestError::Validation`] when formatting fails.
pub fn format_rfc3339(value: OffsetDateTime) -> Result<String, IngestError> {
    value
        .to_offset(UtcOffset::UTC)
        .format(&time::format_description::well_known::Rfc3339)
        .map_err(|err| {
            IngestError::Validation(format!("failed to format RFC3339 timestamp: {err}"))
        })
}

/// Parses an RFC3339 timestamp and requires a UTC offset.
///
/// # Errors
/// Returns [`IngestError::Validation`] when the timestamp is malformed or not UTC.
pub fn parse_rfc3339_utc(value: &str) -> Result<OffsetDateTime, IngestError> {
    let parsed = OffsetDateTime::parse(value, &time::format_description::well_known::Rfc3339)
        .map_err(|err| IngestError::Validation(format!("invalid RFC3339 timestamp: {err}")))?;

    if parsed.offset() != UtcOffset::UTC {
        return Err(IngestError::Validation(
            "timestamp must use UTC offset (Z)".to_string(),
        ));
    }

    Ok(parsed)
}

#[must_use]
pub fn now_utc() -> OffsetDateTime {
    OffsetDateTime::now_utc().to_offset(UtcOffset::UTC)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn must_ok<T>(result: Result<T, IngestError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("unexpected error: {err}"),
        }
    }

    #[test]
    fn rfc3339_round_trip_keeps_utc() {
        let parsed = must_ok(parse_rfc3339_utc("2026-02-07T12:00:00Z"));
        assert_eq!(must_ok(format_rfc3339(parsed)), "2026-02-07T12:00:00Z");
    }

    #[test]
    fn rfc3339_rejects_non_utc_offset() {
        assert!(parse_rfc3339_utc("2026-02-07T12:00:00+02:00").is_err());
    }
}
