// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The collection loop.
//!
//! Every tick reads the new log lines and the stat snapshots, then hands them to the sink as
//! one batch. The cursor only moves once the sink accepted the batch, so an interrupted or
//! failed cycle is re-read on the next one. A failing sink is retried with the same batch
//! under capped exponential backoff; no new bytes are read meanwhile.

use crate::config::Config;
use crate::cursor::{Cursor, CursorStore};
use crate::errors::{CollectorError, CursorError};
use crate::extractor::EventExtractor;
use crate::reader::LogReader;
use crate::record::Batch;
use crate::sink::SinkWriter;
use crate::snapshot::{AggregateReport, SnapshotAggregator};
use chrono::{Local, NaiveDate, Utc};
use std::sync::Arc;
use std::time::Duration;
use tokio::time::MissedTickBehavior;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

const CURSOR_COMMIT_ATTEMPTS: u32 = 3;
const CURSOR_COMMIT_BACKOFF_BASE_MS: u64 = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectorState {
    Idle,
    Collecting,
    Flushing,
    Backoff { attempt: u32, delay: Duration },
    Stopped,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Schedule {
    /// Time between the start of two cycles.
    pub interval: Duration,
    pub backoff_base: Duration,
    pub backoff_max: Duration,
}

impl Schedule {
    /// Delay before retry number `attempt` (1-based): `base * 2^(attempt-1)`, capped.
    pub fn backoff_delay(&self, attempt: u32) -> Duration {
        let factor = 2_u32.checked_pow(attempt.saturating_sub(1)).unwrap_or(u32::MAX);
        self.backoff_base
            .checked_mul(factor)
            .map_or(self.backoff_max, |delay| delay.min(self.backoff_max))
    }
}

/// The output of one collection pass, waiting to be delivered.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PendingBatch {
    pub batch: Batch,
    /// Cursor to commit after delivery.
    pub next: Cursor,
    pub skipped_snapshots: usize,
}

/// How a cycle ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CycleOutcome {
    Delivered,
    /// Shutdown arrived while backing off; the batch was not delivered.
    Interrupted,
}

pub struct Collector {
    reader: LogReader,
    aggregator: SnapshotAggregator,
    extractor: Arc<EventExtractor>,
    cursor_store: Arc<dyn CursorStore>,
    sink: Arc<dyn SinkWriter>,
    schedule: Schedule,
    cursor: Cursor,
    state: CollectorState,
    consecutive_failures: u32,
}

impl Collector {
    /// Builds a collector and loads the persisted cursor.
    ///
    /// An unreadable or corrupt cursor record is fatal: guessing an offset would either drop
    /// or duplicate events.
    pub fn new(
        reader: LogReader,
        aggregator: SnapshotAggregator,
        extractor: EventExtractor,
        cursor_store: Arc<dyn CursorStore>,
        sink: Arc<dyn SinkWriter>,
        schedule: Schedule,
    ) -> Result<Self, CollectorError> {
        let cursor = cursor_store
            .load()
            .map_err(CollectorError::CursorLoad)?
            .unwrap_or_default();
        info!(
            "Collector | Resuming {} at offset {}",
            reader.path().display(),
            cursor.byte_offset
        );
        Ok(Collector {
            reader,
            aggregator,
            extractor: Arc::new(extractor),
            cursor_store,
            sink,
            schedule,
            cursor,
            state: CollectorState::Idle,
            consecutive_failures: 0,
        })
    }

    pub fn from_config(
        config: &Config,
        cursor_store: Arc<dyn CursorStore>,
        sink: Arc<dyn SinkWriter>,
    ) -> Result<Self, CollectorError> {
        Self::new(
            LogReader::new(&config.log_file),
            SnapshotAggregator::new(&config.stats_dir, &config.usercache_file),
            EventExtractor::new(config.death_causes.clone()),
            cursor_store,
            sink,
            Schedule {
                interval: config.collect_interval(),
                backoff_base: config.backoff_base(),
                backoff_max: config.backoff_max(),
            },
        )
    }

    pub fn state(&self) -> CollectorState {
        self.state
    }

    pub fn consecutive_failures(&self) -> u32 {
        self.consecutive_failures
    }

    /// Last committed cursor.
    pub fn cursor(&self) -> Cursor {
        self.cursor
    }

    /// Runs cycles on the configured interval until `cancel` fires.
    ///
    /// Returns an error only for conditions that must stop the process.
    pub async fn run(&mut self, cancel: CancellationToken) -> Result<(), CollectorError> {
        let mut interval = tokio::time::interval(self.schedule.interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);

        let result = loop {
            tokio::select! {
                biased;
                _ = cancel.cancelled() => break Ok(()),
                _ = interval.tick() => {}
            }
            match self.run_cycle(&cancel).await {
                Ok(CycleOutcome::Delivered) => {}
                Ok(CycleOutcome::Interrupted) => break Ok(()),
                Err(e) => break Err(e),
            }
        };

        self.state = CollectorState::Stopped;
        match &result {
            Ok(()) => info!("Collector | Stopped at offset {}", self.cursor.byte_offset),
            Err(e) => error!("Collector | Stopping: {e}"),
        }
        result
    }

    /// Collects one batch and delivers it.
    pub async fn run_cycle(
        &mut self,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CollectorError> {
        let pending = self.collect(Local::now().date_naive()).await?;
        self.flush(pending, cancel).await
    }

    /// Reads the log and aggregates snapshots concurrently.
    ///
    /// Log lines carry no date. `log_date` is taken as the date of the newest line read, and
    /// earlier lines step back a day each time their time of day wraps past midnight. A batch
    /// re-read on a later day with no newer lines is dated again from the new `log_date`.
    ///
    /// Local I/O failures are logged and treated as "nothing new" for that input; they are
    /// retried on the next cycle.
    pub async fn collect(&mut self, log_date: NaiveDate) -> Result<PendingBatch, CollectorError> {
        self.state = CollectorState::Collecting;

        let reader = self.reader.clone();
        let cursor = self.cursor;
        let extractor = Arc::clone(&self.extractor);
        let read_handle = tokio::task::spawn_blocking(move || {
            reader.read_new_bytes(&cursor).map(|chunk| {
                let events = extractor.extract_all(chunk.lines(), log_date);
                (events, chunk.next, chunk.rotated)
            })
        });

        let aggregator = self.aggregator.clone();
        let captured_at = Utc::now();
        let aggregate_handle =
            tokio::task::spawn_blocking(move || aggregator.aggregate(captured_at));

        let (read, aggregate) = tokio::try_join!(read_handle, aggregate_handle)
            .map_err(|e| CollectorError::Task(e.to_string()))?;

        let (events, next) = match read {
            Ok((events, next, rotated)) => {
                if rotated {
                    info!("Collector | Log rotation detected, re-reading from the start");
                }
                (events, next)
            }
            Err(e) => {
                warn!(
                    "Collector | Unable to read {}: {e}",
                    self.reader.path().display()
                );
                (Vec::new(), cursor)
            }
        };
        let report = aggregate.unwrap_or_else(|e| {
            warn!(
                "Collector | Unable to list snapshots in {}: {e}",
                self.aggregator.snapshot_dir().display()
            );
            AggregateReport::default()
        });

        debug!(
            "Collector | Collected {} events and {} snapshots ({} skipped)",
            events.len(),
            report.snapshots.len(),
            report.skipped
        );
        Ok(PendingBatch {
            batch: Batch::new(events, report.snapshots),
            next,
            skipped_snapshots: report.skipped,
        })
    }

    /// Delivers `pending`, retrying the same batch until the sink accepts it or `cancel` fires
    /// during a backoff sleep. A write in progress is never abandoned.
    pub async fn flush(
        &mut self,
        pending: PendingBatch,
        cancel: &CancellationToken,
    ) -> Result<CycleOutcome, CollectorError> {
        if pending.batch.is_empty() {
            debug!("Collector | Nothing new to deliver");
            self.commit(pending.next).await?;
            self.state = CollectorState::Idle;
            return Ok(CycleOutcome::Delivered);
        }

        loop {
            self.state = CollectorState::Flushing;
            match self.sink.write(&pending.batch).await {
                Ok(()) => {
                    self.consecutive_failures = 0;
                    self.commit(pending.next).await?;
                    self.state = CollectorState::Idle;
                    info!(
                        "Collector | Delivered {} events, {} snapshots, {} snapshot files skipped",
                        pending.batch.events.len(),
                        pending.batch.snapshots.len(),
                        pending.skipped_snapshots
                    );
                    return Ok(CycleOutcome::Delivered);
                }
                Err(e) => {
                    self.consecutive_failures += 1;
                    let attempt = self.consecutive_failures;
                    let delay = self.schedule.backoff_delay(attempt);
                    error!(
                        "Collector | Sink write failed (attempt {attempt}), retrying in {} ms: {e}",
                        delay.as_millis()
                    );
                    self.state = CollectorState::Backoff { attempt, delay };

                    tokio::select! {
                        biased;
                        _ = cancel.cancelled() => {
                            warn!(
                                "Collector | Shutdown during backoff, {} events will be re-read on restart",
                                pending.batch.events.len()
                            );
                            return Ok(CycleOutcome::Interrupted);
                        }
                        _ = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }
    }

    /// Persists `next`, retrying a few times before giving up for good.
    async fn commit(&mut self, next: Cursor) -> Result<(), CollectorError> {
        if next == self.cursor {
            return Ok(());
        }

        let mut attempts = 0;
        let mut last_error: Option<CursorError> = None;
        while attempts < CURSOR_COMMIT_ATTEMPTS {
            attempts += 1;
            match self.cursor_store.save(&next) {
                Ok(()) => {
                    debug!("Collector | Cursor committed at offset {}", next.byte_offset);
                    self.cursor = next;
                    return Ok(());
                }
                Err(e) => {
                    error!("Collector | Failed to persist cursor (attempt {attempts}): {e}");
                    last_error = Some(e);
                }
            }
            if attempts < CURSOR_COMMIT_ATTEMPTS {
                let backoff_ms = CURSOR_COMMIT_BACKOFF_BASE_MS * (2_u64.pow(attempts - 1));
                tokio::time::sleep(Duration::from_millis(backoff_ms)).await;
            }
        }

        Err(CollectorError::CursorPersist {
            attempts,
            source: last_error
                .unwrap_or_else(|| CursorError::Unavailable("no attempt made".to_string())),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cursor::MemoryCursorStore;
    use crate::errors::SinkError;
    use async_trait::async_trait;
    use std::fs;
    use std::io::Write;
    use std::path::Path;
    use std::sync::atomic::{AtomicU32, Ordering};
    use std::sync::Mutex;
    use tempfile::{tempdir, TempDir};

    /// Records every batch it is handed and fails the first `failures` writes.
    #[derive(Default)]
    struct RecordingSink {
        failures: AtomicU32,
        attempts: Mutex<Vec<Batch>>,
    }

    impl RecordingSink {
        fn failing(failures: u32) -> Self {
            RecordingSink {
                failures: AtomicU32::new(failures),
                attempts: Mutex::new(Vec::new()),
            }
        }

        fn attempts(&self) -> Vec<Batch> {
            self.attempts.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl SinkWriter for RecordingSink {
        async fn write(&self, batch: &Batch) -> Result<(), SinkError> {
            self.attempts.lock().unwrap().push(batch.clone());
            let remaining = self.failures.load(Ordering::SeqCst);
            if remaining > 0 {
                self.failures.store(remaining - 1, Ordering::SeqCst);
                return Err(SinkError::Transport("connection refused".to_string()));
            }
            Ok(())
        }
    }

    const SCHEDULE: Schedule = Schedule {
        interval: Duration::from_secs(120),
        backoff_base: Duration::from_secs(1),
        backoff_max: Duration::from_secs(300),
    };

    struct Fixture {
        dir: TempDir,
        store: MemoryCursorStore,
        sink: Arc<RecordingSink>,
    }

    impl Fixture {
        fn new(sink: RecordingSink) -> Self {
            let dir = tempdir().unwrap();
            fs::create_dir_all(dir.path().join("logs")).unwrap();
            fs::create_dir_all(dir.path().join("stats")).unwrap();
            Fixture {
                dir,
                store: MemoryCursorStore::new(),
                sink: Arc::new(sink),
            }
        }

        fn log_path(&self) -> std::path::PathBuf {
            self.dir.path().join("logs/latest.log")
        }

        fn append(&self, text: &str) {
            let mut file = fs::OpenOptions::new()
                .create(true)
                .append(true)
                .open(self.log_path())
                .unwrap();
            file.write_all(text.as_bytes()).unwrap();
        }

        fn collector(&self) -> Collector {
            Collector::new(
                LogReader::new(self.log_path()),
                SnapshotAggregator::new(
                    self.dir.path().join("stats"),
                    self.dir.path().join("usercache.json"),
                ),
                EventExtractor::default(),
                Arc::new(self.store.clone()),
                self.sink.clone(),
                SCHEDULE,
            )
            .unwrap()
        }
    }

    fn log_date() -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 4, 21).unwrap()
    }

    fn write_snapshot(dir: &Path, id: &str, body: &str) {
        fs::write(dir.join("stats").join(format!("{id}.json")), body).unwrap();
    }

    #[test]
    fn test_backoff_delay_doubles_and_caps() {
        assert_eq!(SCHEDULE.backoff_delay(1), Duration::from_secs(1));
        assert_eq!(SCHEDULE.backoff_delay(2), Duration::from_secs(2));
        assert_eq!(SCHEDULE.backoff_delay(4), Duration::from_secs(8));
        assert_eq!(SCHEDULE.backoff_delay(9), Duration::from_secs(256));
        assert_eq!(SCHEDULE.backoff_delay(10), Duration::from_secs(300));
        assert_eq!(SCHEDULE.backoff_delay(64), Duration::from_secs(300));
    }

    #[tokio::test]
    async fn test_cycle_delivers_events_and_snapshots() {
        let fixture = Fixture::new(RecordingSink::default());
        fixture.append("[14:08:05] [Server thread/INFO]: Steve was slain by Zombie\n");
        fixture.append("[14:08:06] [Server thread/INFO]: Some unrelated message\n");
        write_snapshot(
            fixture.dir.path(),
            "63f1",
            r#"{"stats": {"minecraft:mined": {"minecraft:stone": 50}}, "DataVersion": 3955}"#,
        );
        let mut collector = fixture.collector();

        let pending = collector.collect(log_date()).await.unwrap();
        assert_eq!(pending.batch.events.len(), 1);
        assert_eq!(pending.batch.snapshots.len(), 1);

        let outcome = collector
            .flush(pending, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert_eq!(collector.state(), CollectorState::Idle);
        assert_eq!(fixture.sink.attempts().len(), 1);
        let saved = fixture.store.saved().unwrap();
        assert_eq!(saved.byte_offset, fs::metadata(fixture.log_path()).unwrap().len());
        assert_eq!(collector.cursor(), saved);
    }

    #[tokio::test(start_paused = true)]
    async fn test_sink_fails_twice_then_succeeds() {
        let fixture = Fixture::new(RecordingSink::failing(2));
        fixture.append("[14:08:05] [Server thread/INFO]: Steve was slain by Zombie\n");
        let mut collector = fixture.collector();

        let pending = collector.collect(log_date()).await.unwrap();
        let outcome = collector
            .flush(pending, &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Delivered);
        let attempts = fixture.sink.attempts();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[0], attempts[1]);
        assert_eq!(attempts[1], attempts[2]);
        assert_eq!(fixture.store.save_count(), 1);
        assert_eq!(collector.consecutive_failures(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_not_persisted_before_success() {
        let fixture = Fixture::new(RecordingSink::failing(u32::MAX));
        fixture.append("[14:08:05] [Server thread/INFO]: Alex joined the game\n");
        let mut collector = fixture.collector();
        let cancel = CancellationToken::new();

        let pending = collector.collect(log_date()).await.unwrap();
        let outcome = {
            let flush = collector.flush(pending, &cancel);
            tokio::pin!(flush);

            // Let a few retries happen, then shut down mid-backoff
            tokio::select! {
                _ = &mut flush => panic!("flush should not complete"),
                _ = tokio::time::sleep(Duration::from_secs(10)) => {}
            }
            cancel.cancel();
            flush.await.unwrap()
        };

        assert_eq!(outcome, CycleOutcome::Interrupted);
        assert!(fixture.sink.attempts().len() >= 3);
        assert_eq!(fixture.store.saved(), None);
        assert_eq!(collector.cursor(), Cursor::default());
        assert!(matches!(
            collector.state(),
            CollectorState::Backoff { .. }
        ));
    }

    #[tokio::test]
    async fn test_partial_line_held_until_complete() {
        let fixture = Fixture::new(RecordingSink::default());
        fixture.append("[14:08:05] [Server thread/INFO]: Alex joi");
        let mut collector = fixture.collector();
        let cancel = CancellationToken::new();

        collector.run_cycle(&cancel).await.unwrap();
        assert!(fixture.sink.attempts().is_empty());
        assert_eq!(collector.cursor().byte_offset, 0);

        fixture.append("ned the game\n");
        collector.run_cycle(&cancel).await.unwrap();

        let attempts = fixture.sink.attempts();
        assert_eq!(attempts.len(), 1);
        assert_eq!(attempts[0].events.len(), 1);
        assert_eq!(attempts[0].events[0].actor, "Alex");
    }

    #[tokio::test]
    async fn test_rotation_reads_new_file_from_start() {
        let fixture = Fixture::new(RecordingSink::default());
        fixture.append("[14:08:05] [Server thread/INFO]: Alex joined the game\n");
        fixture.append("[14:09:05] [Server thread/INFO]: Alex left the game\n");
        let mut collector = fixture.collector();
        let cancel = CancellationToken::new();
        collector.run_cycle(&cancel).await.unwrap();

        fs::write(
            fixture.log_path(),
            "[00:00:01] [Server thread/INFO]: Steve joined the game\n",
        )
        .unwrap();
        collector.run_cycle(&cancel).await.unwrap();

        let attempts = fixture.sink.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[1].events.len(), 1);
        assert_eq!(attempts[1].events[0].actor, "Steve");
    }

    #[tokio::test]
    async fn test_empty_cycle_skips_sink() {
        let fixture = Fixture::new(RecordingSink::default());
        let mut collector = fixture.collector();

        let outcome = collector
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert!(fixture.sink.attempts().is_empty());
    }

    #[tokio::test]
    async fn test_noise_only_cycle_commits_cursor_without_sink() {
        let fixture = Fixture::new(RecordingSink::default());
        fixture.append("[13:53:58] [Server thread/INFO]: Starting minecraft server\n");
        fixture.append("[13:53:59] [Server thread/WARN]: Can't keep up!\n");
        let mut collector = fixture.collector();

        let outcome = collector
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(outcome, CycleOutcome::Delivered);
        assert!(fixture.sink.attempts().is_empty());
        let end = fs::metadata(fixture.log_path()).unwrap().len();
        assert_eq!(fixture.store.saved().unwrap().byte_offset, end);
        assert_eq!(collector.cursor().byte_offset, end);
    }

    #[tokio::test(start_paused = true)]
    async fn test_lines_written_during_backoff_wait_for_next_cycle() {
        let fixture = Fixture::new(RecordingSink::failing(1));
        fixture.append("[14:08:05] [Server thread/INFO]: Alex joined the game\n");
        let mut collector = fixture.collector();
        let cancel = CancellationToken::new();

        let pending = collector.collect(log_date()).await.unwrap();
        let outcome = {
            let flush = collector.flush(pending, &cancel);
            tokio::pin!(flush);

            // First write fails; append while the retry is still pending
            tokio::select! {
                _ = &mut flush => panic!("flush should still be backing off"),
                _ = tokio::time::sleep(Duration::from_millis(500)) => {}
            }
            fixture.append("[14:09:05] [Server thread/INFO]: Alex left the game\n");
            flush.await.unwrap()
        };
        assert_eq!(outcome, CycleOutcome::Delivered);

        let attempts = fixture.sink.attempts();
        assert_eq!(attempts.len(), 2);
        assert_eq!(attempts[0], attempts[1]);
        assert_eq!(attempts[1].events.len(), 1);
        assert_eq!(attempts[1].events[0].kind, crate::event::EventKind::Join);

        collector.run_cycle(&cancel).await.unwrap();

        let attempts = fixture.sink.attempts();
        assert_eq!(attempts.len(), 3);
        assert_eq!(attempts[2].events.len(), 1);
        assert_eq!(attempts[2].events[0].kind, crate::event::EventKind::Leave);
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_commit_retries_then_fails() {
        let fixture = Fixture::new(RecordingSink::default());
        fixture.append("[14:08:05] [Server thread/INFO]: Alex joined the game\n");
        let mut collector = fixture.collector();
        fixture.store.fail_next_saves(3);

        let result = collector.run_cycle(&CancellationToken::new()).await;

        assert!(matches!(
            result,
            Err(CollectorError::CursorPersist { attempts: 3, .. })
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn test_cursor_commit_recovers_after_transient_failure() {
        let fixture = Fixture::new(RecordingSink::default());
        fixture.append("[14:08:05] [Server thread/INFO]: Alex joined the game\n");
        let mut collector = fixture.collector();
        fixture.store.fail_next_saves(2);

        collector
            .run_cycle(&CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(fixture.store.save_count(), 1);
    }

    #[tokio::test]
    async fn test_resumes_from_stored_cursor() {
        let fixture = Fixture::new(RecordingSink::default());
        let first = "[14:08:05] [Server thread/INFO]: Alex joined the game\n";
        fixture.append(first);
        fixture.append("[14:09:05] [Server thread/INFO]: Alex left the game\n");
        fixture
            .store
            .save(&Cursor::new(None, first.len() as u64))
            .unwrap();
        let mut collector = fixture.collector();

        let pending = collector.collect(log_date()).await.unwrap();

        assert_eq!(pending.batch.events.len(), 1);
        assert_eq!(pending.batch.events[0].kind.name(), "leave");
    }

    #[tokio::test]
    async fn test_run_stops_on_cancel() {
        let fixture = Fixture::new(RecordingSink::default());
        let mut collector = fixture.collector();
        let cancel = CancellationToken::new();
        cancel.cancel();

        collector.run(cancel).await.unwrap();

        assert_eq!(collector.state(), CollectorState::Stopped);
    }
}
