use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use stockflow_core::{AggregateId, ExpectedVersion};

use super::r#trait::{EventStore, EventStoreError, StoredEvent, UncommittedEvent};

type Stream = Arc<Mutex<Vec<StoredEvent>>>;

/// In-memory append-only event store.
///
/// The stream map is only write-locked to create a stream; appends lock their own
/// stream, so writers on different stock keys never contend.
#[derive(Debug, Default)]
pub struct InMemoryEventStore {
    streams: RwLock<HashMap<AggregateId, Stream>>,
}

impl InMemoryEventStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn current_version(stream: &[StoredEvent]) -> u64 {
        stream.last().map(|e| e.sequence_number).unwrap_or(0)
    }

    fn stream(&self, aggregate_id: AggregateId) -> Result<Option<Stream>, EventStoreError> {
        let streams = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("stream map lock poisoned".to_string()))?;
        Ok(streams.get(&aggregate_id).cloned())
    }

    fn stream_or_create(&self, aggregate_id: AggregateId) -> Result<Stream, EventStoreError> {
        if let Some(stream) = self.stream(aggregate_id)? {
            return Ok(stream);
        }
        let mut streams = self
            .streams
            .write()
            .map_err(|_| EventStoreError::Backend("stream map lock poisoned".to_string()))?;
        Ok(streams.entry(aggregate_id).or_default().clone())
    }

    /// Number of streams created so far.
    pub fn stream_count(&self) -> usize {
        self.streams.read().map(|s| s.len()).unwrap_or(0)
    }
}

impl EventStore for InMemoryEventStore {
    fn append(
        &self,
        events: Vec<UncommittedEvent>,
        expected_version: ExpectedVersion,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(first) = events.first() else {
            return Ok(vec![]);
        };

        let aggregate_id = first.aggregate_id;
        let aggregate_type = first.aggregate_type.clone();

        for (idx, e) in events.iter().enumerate() {
            if e.aggregate_id != aggregate_id {
                return Err(EventStoreError::InvalidAppend(format!(
                    "batch contains multiple aggregate_ids (index {idx})"
                )));
            }
            if e.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "batch contains multiple aggregate_types (index {idx})"
                )));
            }
        }

        let stream = self.stream_or_create(aggregate_id)?;
        let mut stream = stream
            .lock()
            .map_err(|_| EventStoreError::Backend(format!("stream {aggregate_id} lock poisoned")))?;

        let current = Self::current_version(&stream);
        if !expected_version.matches(current) {
            return Err(EventStoreError::Concurrency(format!(
                "stream {aggregate_id}: expected {expected_version:?}, found {current}"
            )));
        }

        if let Some(existing) = stream.first() {
            if existing.aggregate_type != aggregate_type {
                return Err(EventStoreError::AggregateTypeMismatch(format!(
                    "stream aggregate_type is '{}', attempted append with '{}'",
                    existing.aggregate_type, aggregate_type
                )));
            }
        }

        let committed: Vec<StoredEvent> = events
            .into_iter()
            .zip(current + 1..)
            .map(|(e, sequence_number)| StoredEvent {
                event_id: e.event_id,
                aggregate_id: e.aggregate_id,
                aggregate_type: e.aggregate_type,
                sequence_number,
                event_type: e.event_type,
                event_version: e.event_version,
                occurred_at: e.occurred_at,
                payload: e.payload,
            })
            .collect();

        stream.extend(committed.iter().cloned());
        Ok(committed)
    }

    fn load_stream(&self, aggregate_id: AggregateId) -> Result<Vec<StoredEvent>, EventStoreError> {
        let Some(stream) = self.stream(aggregate_id)? else {
            return Ok(Vec::new());
        };
        let stream = stream
            .lock()
            .map_err(|_| EventStoreError::Backend(format!("stream {aggregate_id} lock poisoned")))?;
        Ok(stream.clone())
    }

    fn load_by_aggregate_type(
        &self,
        aggregate_type: &str,
    ) -> Result<Vec<StoredEvent>, EventStoreError> {
        let mut streams: Vec<(AggregateId, Stream)> = self
            .streams
            .read()
            .map_err(|_| EventStoreError::Backend("stream map lock poisoned".to_string()))?
            .iter()
            .map(|(id, stream)| (*id, stream.clone()))
            .collect();
        streams.sort_by_key(|(id, _)| *id);

        let mut out = Vec::new();
        for (aggregate_id, stream) in streams {
            let stream = stream.lock().map_err(|_| {
                EventStoreError::Backend(format!("stream {aggregate_id} lock poisoned"))
            })?;
            if stream.first().is_some_and(|e| e.aggregate_type == aggregate_type) {
                out.extend(stream.iter().cloned());
            }
        }
        Ok(out)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use uuid::Uuid;

    fn event(aggregate_id: AggregateId, n: u32) -> UncommittedEvent {
        UncommittedEvent {
            event_id: Uuid::now_v7(),
            aggregate_id,
            aggregate_type: "test.thing".to_string(),
            event_type: "test.thing.happened".to_string(),
            event_version: 1,
            occurred_at: Utc::now(),
            payload: serde_json::json!({ "n": n }),
        }
    }

    #[test]
    fn appends_assign_gapless_sequence_numbers() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();

        let first = store
            .append(vec![event(id, 1), event(id, 2)], ExpectedVersion::Exact(0))
            .unwrap();
        assert_eq!(first.iter().map(|e| e.sequence_number).collect::<Vec<_>>(), vec![1, 2]);

        let next = store.append(vec![event(id, 3)], ExpectedVersion::Exact(2)).unwrap();
        assert_eq!(next[0].sequence_number, 3);
        assert_eq!(store.load_stream(id).unwrap().len(), 3);
    }

    #[test]
    fn stale_expected_version_is_a_concurrency_error() {
        let store = InMemoryEventStore::new();
        let id = AggregateId::new();
        store.append(vec![event(id, 1)], ExpectedVersion::Exact(0)).unwrap();

        let err = store
            .append(vec![event(id, 2)], ExpectedVersion::Exact(0))
            .unwrap_err();
        assert!(matches!(err, EventStoreError::Concurrency(_)));
        assert_eq!(store.load_stream(id).unwrap().len(), 1);
    }

    #[test]
    fn mixed_batches_are_rejected() {
        let store = InMemoryEventStore::new();
        let err = store
            .append(
                vec![event(AggregateId::new(), 1), event(AggregateId::new(), 2)],
                ExpectedVersion::Any,
            )
            .unwrap_err();
        assert!(matches!(err, EventStoreError::InvalidAppend(_)));
    }

    #[test]
    fn load_by_aggregate_type_groups_streams() {
        let store = InMemoryEventStore::new();
        let (a, b) = (AggregateId::new(), AggregateId::new());
        store.append(vec![event(a, 1), event(a, 2)], ExpectedVersion::Exact(0)).unwrap();
        store.append(vec![event(b, 1)], ExpectedVersion::Exact(0)).unwrap();

        let mut other = event(AggregateId::new(), 9);
        other.aggregate_type = "test.other".to_string();
        store.append(vec![other], ExpectedVersion::Exact(0)).unwrap();

        let loaded = store.load_by_aggregate_type("test.thing").unwrap();
        assert_eq!(loaded.len(), 3);
        assert!(loaded.iter().all(|e| e.aggregate_type == "test.thing"));
        let a_seqs: Vec<u64> = loaded
            .iter()
            .filter(|e| e.aggregate_id == a)
            .map(|e| e.sequence_number)
            .collect();
        assert_eq!(a_seqs, vec![1, 2]);
        assert!(store.load_by_aggregate_type("test.none").unwrap().is_empty());
    }

    #[test]
    fn unknown_streams_load_empty() {
        let store = InMemoryEventStore::new();
        assert!(store.load_stream(AggregateId::new()).unwrap().is_empty());
        assert_eq!(store.stream_count(), 0);
    }

    #[test]
    fn racing_writers_on_one_stream_never_duplicate_versions() {
        let store = Arc::new(InMemoryEventStore::new());
        let id = AggregateId::new();

        let handles: Vec<_> = (0..8)
            .map(|n| {
                let store = store.clone();
                std::thread::spawn(move || {
                    let mut wins = 0;
                    for _ in 0..50 {
                        let current = store.load_stream(id).unwrap().len() as u64;
                        if store
                            .append(vec![event(id, n)], ExpectedVersion::Exact(current))
                            .is_ok()
                        {
                            wins += 1;
                        }
                    }
                    wins
                })
            })
            .collect();

        let wins: u64 = handles.into_iter().map(|h| h.join().unwrap()).sum();
        let stream = store.load_stream(id).unwrap();
        assert_eq!(stream.len() as u64, wins);
        for (i, e) in stream.iter().enumerate() {
            assert_eq!(e.sequence_number, i as u64 + 1);
        }
    }
}
