use serde::{Deserialize, Serialize};
use tracing::{error, info};

use crate::facts::{Fact, RecordKind, RecordSet};
use crate::keys::Resolved;
use crate::pipeline::CancelToken;
use crate::store::MatchStore;
use crate::IngestError;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct KindWriteSummary {
    pub kind: RecordKind,
    pub records: usize,
    pub batches: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct WriteReport {
    pub kinds: Vec<KindWriteSummary>,
    pub total_records: usize,
    pub total_batches: usize,
}

/// Writes resolved facts in fixed-size chunks, kind by kind.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BatchWriter {
    batch_size: usize,
}

impl BatchWriter {
    /// # Errors
    /// Returns [`IngestError::Configuration`] when `batch_size` is zero.
    pub fn new(batch_size: usize) -> Result<Self, IngestError> {
        if batch_size == 0 {
            return Err(IngestError::Configuration(
                "batch_size MUST be >= 1".to_string(),
            ));
        }
        Ok(Self { batch_size })
    }

    #[must_use]
    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Writes one kind. A failed chunk stops the kind; chunks already written stay.
    ///
    /// # Errors
    /// Propagates the store error of the first failing chunk.
    pub fn write_kind<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        kind: RecordKind,
        facts: &[Fact<Resolved>],
    ) -> Result<KindWriteSummary, IngestError> {
        let total = facts.len();
        let mut written = 0;
        let mut batches = 0;

        for chunk in facts.chunks(self.batch_size) {
            if let Err(err) = store.write_batch(kind, chunk) {
                error!(
                    kind = kind.as_str(),
                    written,
                    total,
                    error = %err,
                    "batch write failed, aborting kind"
                );
                return Err(err);
            }
            written += chunk.len();
            batches += 1;
            info!(
                kind = kind.as_str(),
                "saved batch of {} records (total: {}/{})",
                chunk.len(),
                written,
                total
            );
        }

        Ok(KindWriteSummary {
            kind,
            records: written,
            batches,
        })
    }

    /// Writes every kind in [`RecordKind::ALL`] order.
    ///
    /// Cancellation is checked between kinds only, so a kind that has started is always
    /// written in full.
    ///
    /// # Errors
    /// Returns [`IngestError::Cancelled`] when `cancel` is set before a kind starts, or
    /// the first store error.
    pub fn write_all<S: MatchStore + ?Sized>(
        &self,
        store: &mut S,
        facts: &RecordSet<Resolved>,
        cancel: &CancelToken,
    ) -> Result<WriteReport, IngestError> {
        let mut report = WriteReport::default();
        for kind in RecordKind::ALL {
            let bucket = facts.get(kind);
            if bucket.is_empty() {
                continue;
            }
            if cancel.is_cancelled() {
                info!(
                    next_kind = kind.as_str(),
                    written = report.total_records,
                    "cancellation observed between kinds"
                );
                return Err(IngestError::Cancelled);
            }
            let summary = self.write_kind(store, kind, bucket)?;
            report.total_records += summary.records;
            report.total_batches += summary.batches;
            report.kinds.push(summary);
        }
        Ok(report)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::facts::{ChatMessage, Stamp};
    use crate::keys::{PlayerId, RoundId};
    use crate::store::testing::RecordingStore;
    use proptest::prelude::*;

    fn chat(index: usize) -> Fact<Resolved> {
        Fact::ChatMessage(ChatMessage {
            round: RoundId(1),
            at: Stamp::default(),
            sender: PlayerId(1),
            message: format!("msg {index}"),
            team_only: false,
        })
    }

    fn must<T>(result: Result<T, IngestError>) -> T {
        match result {
            Ok(value) => value,
            Err(err) => panic!("test failure: {err}"),
        }
    }

    #[test]
    fn zero_batch_size_is_rejected() {
        assert!(BatchWriter::new(0).is_err());
    }

    #[test]
    fn failed_chunk_keeps_earlier_chunks_and_other_kinds() {
        let mut facts = RecordSet::new();
        for index in 0..5 {
            facts.push(chat(index));
        }
        facts.push(Fact::GameEvent(crate::facts::GameEvent {
            round: RoundId(1),
            at: Stamp::default(),
            player: None,
            name: "round_start".to_string(),
            description: "Round 1 started".to_string(),
            important: true,
        }));

        let mut store = RecordingStore::failing_kind(RecordKind::GameEvent, 0);
        let writer = must(BatchWriter::new(2));
        let result = writer.write_all(&mut store, &facts, &CancelToken::new());

        assert!(matches!(result, Err(IngestError::Persistence(_))));
        assert_eq!(
            store.batches,
            vec![
                (RecordKind::ChatMessage, 2),
                (RecordKind::ChatMessage, 2),
                (RecordKind::ChatMessage, 1),
            ]
        );
    }

    #[test]
    fn failure_mid_kind_stops_remaining_chunks() {
        let facts: Vec<Fact<Resolved>> = (0..10).map(chat).collect();
        let mut store = RecordingStore::failing_kind(RecordKind::ChatMessage, 2);
        let writer = must(BatchWriter::new(3));
        let result = writer.write_kind(&mut store, RecordKind::ChatMessage, &facts);
        assert!(result.is_err());
        assert_eq!(store.written.len(), 6);
    }

    #[test]
    fn cancelled_token_stops_before_first_kind() {
        let mut facts = RecordSet::new();
        facts.push(chat(0));
        let cancel = CancelToken::new();
        cancel.cancel();

        let mut store = RecordingStore::default();
        let writer = must(BatchWriter::new(10));
        let result = writer.write_all(&mut store, &facts, &cancel);
        assert_eq!(result, Err(IngestError::Cancelled));
        assert!(store.batches.is_empty());
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(48))]

        #[test]
        fn prop_batches_cover_records_exactly(records in 0usize..2_500, batch_size in 1usize..700) {
            let facts: Vec<Fact<Resolved>> = (0..records).map(chat).collect();
            let mut store = RecordingStore::default();
            let writer = must(BatchWriter::new(batch_size));
            let summary = must(writer.write_kind(&mut store, RecordKind::ChatMessage, &facts));

            let expected_batches = records.div_ceil(batch_size);
            prop_assert_eq!(summary.batches, expected_batches);
            prop_assert_eq!(store.batches.len(), expected_batches);
            prop_assert!(store.batches.iter().all(|(_, size)| *size <= batch_size && *size > 0));
            prop_assert_eq!(store.batches.iter().map(|(_, size)| size).sum::<usize>(), records);
            prop_assert_eq!(summary.records, records);
        }
    }
}
