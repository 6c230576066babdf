//! Progress records for long-running admin tasks
//!
//! A task creates a record, mutates it as it goes and marks it done. Readers
//! either poll a point-in-time copy or subscribe to a stream that emits the
//! record on a fixed interval until it is done.
//!
//! One `std::sync::Mutex` guards the whole registry and is never held across
//! an await. Records idle for longer than the TTL are dropped on the next
//! access; there is no background sweeper.

use chrono::Utc;
use futures::stream::Stream;
use labelsync_common::time;
use serde::Serialize;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};
use tracing::debug;
use uuid::Uuid;

/// Idle time after which a record is evicted
pub const DEFAULT_TTL: Duration = Duration::from_secs(3600);

/// Interval between stream emissions
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(800);

/// Longest note kept, in characters
pub const MAX_NOTE_CHARS: usize = 200;

/// State of one task
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ProgressRecord {
    pub id: String,
    pub tag: String,
    pub stage: String,
    #[serde(rename = "pct")]
    pub percent: u8,
    pub note: String,
    pub ok: bool,
    pub done: bool,
    pub updated_at: String,
    #[serde(skip)]
    last_update: Instant,
}

/// Fields to merge into a record; `None` leaves a field unchanged
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    pub stage: Option<String>,
    pub percent: Option<i64>,
    pub note: Option<String>,
    pub ok: Option<bool>,
    pub done: Option<bool>,
}

impl ProgressUpdate {
    pub fn stage(stage: impl Into<String>) -> Self {
        Self {
            stage: Some(stage.into()),
            ..Self::default()
        }
    }

    pub fn percent(mut self, percent: i64) -> Self {
        self.percent = Some(percent);
        self
    }

    pub fn note(mut self, note: impl Into<String>) -> Self {
        self.note = Some(note.into());
        self
    }

    /// Terminal success at 100%
    pub fn finished(mut self) -> Self {
        self.percent = Some(100);
        self.done = Some(true);
        self
    }

    /// Terminal failure at 100%
    pub fn failed(mut self) -> Self {
        self.percent = Some(100);
        self.ok = Some(false);
        self.done = Some(true);
        self
    }
}

/// One item of a subscription feed
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    Progress(ProgressRecord),
    Done(ProgressRecord),
    /// Record absent, either never created or evicted
    Gone,
}

impl ProgressEvent {
    /// SSE event name
    pub fn event_name(&self) -> &'static str {
        match self {
            ProgressEvent::Progress(_) => "progress",
            ProgressEvent::Done(_) => "done",
            ProgressEvent::Gone => "gone",
        }
    }
}

/// Process-wide table of progress records (cheap to clone)
#[derive(Clone)]
pub struct ProgressRegistry {
    records: Arc<Mutex<HashMap<String, ProgressRecord>>>,
    ttl: Duration,
    poll_interval: Duration,
}

impl Default for ProgressRegistry {
    fn default() -> Self {
        Self::new()
    }
}

impl ProgressRegistry {
    pub fn new() -> Self {
        Self::with_timing(DEFAULT_TTL, DEFAULT_POLL_INTERVAL)
    }

    pub fn with_timing(ttl: Duration, poll_interval: Duration) -> Self {
        Self {
            records: Arc::new(Mutex::new(HashMap::new())),
            ttl,
            poll_interval,
        }
    }

    /// Lock, evict expired records, then run `f`
    fn with_records<R>(&self, f: impl FnOnce(&mut HashMap<String, ProgressRecord>) -> R) -> R {
        let mut records = self.records.lock().unwrap_or_else(PoisonError::into_inner);
        let ttl = self.ttl;
        records.retain(|id, record| {
            let keep = record.last_update.elapsed() <= ttl;
            if !keep {
                debug!(id = %id, "Evicting idle progress record");
            }
            keep
        });
        f(&mut records)
    }

    /// Start a record and return its id (32 hex chars)
    pub fn create(&self, tag: &str) -> String {
        let id = Uuid::new_v4().simple().to_string();
        let record = ProgressRecord {
            id: id.clone(),
            tag: tag.to_string(),
            stage: "init".to_string(),
            percent: 0,
            note: String::new(),
            ok: true,
            done: false,
            updated_at: time::to_iso_seconds(Utc::now()),
            last_update: Instant::now(),
        };
        self.with_records(|records| records.insert(id.clone(), record));
        id
    }

    /// Reuse `requested` when it names a live record, otherwise create one
    pub fn attach(&self, requested: Option<&str>, tag: &str) -> String {
        if let Some(id) = requested.map(str::trim).filter(|id| !id.is_empty()) {
            if self.with_records(|records| records.contains_key(id)) {
                return id.to_string();
            }
        }
        self.create(tag)
    }

    /// Merge `update` into a record; false when the id is unknown
    pub fn mutate(&self, id: &str, update: ProgressUpdate) -> bool {
        self.with_records(|records| {
            let Some(record) = records.get_mut(id) else {
                return false;
            };
            if let Some(stage) = update.stage {
                record.stage = stage;
            }
            if let Some(percent) = update.percent {
                record.percent = percent.clamp(0, 100) as u8;
            }
            if let Some(note) = update.note {
                record.note = note.chars().take(MAX_NOTE_CHARS).collect();
            }
            if let Some(ok) = update.ok {
                record.ok = ok;
            }
            if let Some(done) = update.done {
                record.done = done;
            }
            record.updated_at = time::to_iso_seconds(Utc::now());
            record.last_update = Instant::now();
            true
        })
    }

    /// Point-in-time copy of a record
    pub fn read(&self, id: &str) -> Option<ProgressRecord> {
        self.with_records(|records| records.get(id).cloned())
    }

    /// Feed of a record until it is done or disappears
    ///
    /// Dropping the stream stops it.
    pub fn subscribe(&self, id: &str) -> impl Stream<Item = ProgressEvent> + Send + 'static {
        let registry = self.clone();
        let id = id.to_string();

        async_stream::stream! {
            loop {
                match registry.read(&id) {
                    None => {
                        yield ProgressEvent::Gone;
                        break;
                    }
                    Some(record) if record.done => {
                        yield ProgressEvent::Done(record);
                        break;
                    }
                    Some(record) => {
                        yield ProgressEvent::Progress(record);
                    }
                }
                tokio::time::sleep(registry.poll_interval).await;
            }
        }
    }
}
