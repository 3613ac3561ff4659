// SPDX-License-Identifier: MIT OR Apache-2.0
//! The driver: storage events and catch-up polls fan into one bounded
//! channel; a worker pool drains it through the ledger and the processors.

use crate::clock::Clock;
use crate::metrics::IngestionMetrics;
use crate::processor::Processor;
use chrono::{DateTime, Duration, Utc};
use gold_clients::VcsAdapter;
use gold_config::IngesterConfig;
use gold_error::{IngestionError, Result};
use gold_ledger::Ledger;
use gold_source::IngestionSource;
use gold_store::Caches;
use std::sync::Arc;
use tokio::sync::{Mutex, mpsc, watch};
use tokio::task::JoinSet;
use tokio::time::timeout;
use tracing::{debug, error, info, warn};

/// Seconds between cache-size gauge refreshes.
const GAUGE_EVERY_SECS: u64 = 60;

/// A storage notification (or a synthetic one republished by the poller).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FileEvent {
    /// Full object name, bucket included.
    pub name: String,
}

struct SourcePair {
    source: Arc<dyn IngestionSource>,
    processor: Arc<dyn Processor>,
}

struct Inner {
    cfg: IngesterConfig,
    pairs: Vec<SourcePair>,
    ledger: Arc<dyn Ledger>,
    clock: Arc<dyn Clock>,
    vcs: Option<Arc<dyn VcsAdapter>>,
    caches: Option<Arc<Caches>>,
    metrics: Arc<IngestionMetrics>,
    tx: mpsc::Sender<FileEvent>,
}

/// Drives any number of source/processor pairs until shut down.
pub struct Ingester {
    inner: Arc<Inner>,
    rx: mpsc::Receiver<FileEvent>,
}

impl std::fmt::Debug for Ingester {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Ingester").finish_non_exhaustive()
    }
}

impl Ingester {
    /// Build an ingester.
    ///
    /// `vcs` powers the commit-oriented poll window; `caches` is only used
    /// for gauge export.
    ///
    /// # Errors
    ///
    /// Returns a fatal error when no source/processor pair is given.
    pub fn new(
        cfg: IngesterConfig,
        pairs: Vec<(Arc<dyn IngestionSource>, Arc<dyn Processor>)>,
        ledger: Arc<dyn Ledger>,
        clock: Arc<dyn Clock>,
        vcs: Option<Arc<dyn VcsAdapter>>,
        caches: Option<Arc<Caches>>,
    ) -> Result<Self> {
        if pairs.is_empty() {
            return Err(IngestionError::fatal(
                "an ingester needs at least one source/processor pair",
            ));
        }
        let (tx, rx) = mpsc::channel(cfg.queue_size.max(1));
        let inner = Inner {
            cfg,
            pairs: pairs
                .into_iter()
                .map(|(source, processor)| SourcePair { source, processor })
                .collect(),
            ledger,
            clock,
            vcs,
            caches,
            metrics: Arc::new(IngestionMetrics::new()),
            tx,
        };
        Ok(Self {
            inner: Arc::new(inner),
            rx,
        })
    }

    /// A sender the event-bus subscription writes storage notifications to.
    #[must_use]
    pub fn event_sender(&self) -> mpsc::Sender<FileEvent> {
        self.inner.tx.clone()
    }

    /// The shared counters.
    #[must_use]
    pub fn metrics(&self) -> Arc<IngestionMetrics> {
        Arc::clone(&self.inner.metrics)
    }

    /// Run workers, poll loops, and the gauge loop until `shutdown` flips
    /// to `true`.
    pub async fn run(self, shutdown: watch::Receiver<bool>) {
        let Self { inner, rx } = self;
        let rx = Arc::new(Mutex::new(rx));
        let mut tasks = JoinSet::new();

        for worker_id in 0..inner.cfg.files_processed_in_parallel {
            let inner = Arc::clone(&inner);
            let rx = Arc::clone(&rx);
            let shutdown = shutdown.clone();
            tasks.spawn(worker_loop(worker_id, inner, rx, shutdown));
        }
        for index in 0..inner.pairs.len() {
            let inner = Arc::clone(&inner);
            let shutdown = shutdown.clone();
            tasks.spawn(poll_loop(index, inner, shutdown));
        }
        if inner.caches.is_some() {
            let inner = Arc::clone(&inner);
            let shutdown = shutdown.clone();
            tasks.spawn(gauge_loop(inner, shutdown));
        }

        while tasks.join_next().await.is_some() {}
    }
}

async fn worker_loop(
    worker_id: usize,
    inner: Arc<Inner>,
    rx: Arc<Mutex<mpsc::Receiver<FileEvent>>>,
    mut shutdown: watch::Receiver<bool>,
) {
    debug!(worker_id, "worker started");
    loop {
        let event = {
            let mut guard = rx.lock().await;
            tokio::select! {
                _ = shutdown.changed() => None,
                event = guard.recv() => event,
            }
        };
        let Some(event) = event else { break };
        inner.handle_event(event).await;
    }
    debug!(worker_id, "worker stopped");
}

async fn poll_loop(index: usize, inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let every = std::time::Duration::from_secs(inner.cfg.run_every_secs);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(every) => {}
        }
        match inner.poll_source(index, &shutdown).await {
            Ok(()) => inner.metrics.poll_succeeded(inner.clock.now()),
            Err(e) => warn!(index, error = %e, "poll pass failed"),
        }
    }
}

async fn gauge_loop(inner: Arc<Inner>, mut shutdown: watch::Receiver<bool>) {
    let every = std::time::Duration::from_secs(GAUGE_EVERY_SECS);
    loop {
        tokio::select! {
            _ = shutdown.changed() => break,
            () = tokio::time::sleep(every) => {}
        }
        if let Some(caches) = &inner.caches {
            let stats = caches.stats();
            info!(
                commits = stats.commits,
                expectations = stats.expectations,
                options_groupings = stats.options_groupings,
                params = stats.params,
                traces = stats.traces,
                "cache sizes"
            );
        }
    }
}

impl Inner {
    async fn handle_event(&self, event: FileEvent) {
        let Some(pair) = self
            .pairs
            .iter()
            .find(|p| p.source.handles_file(&event.name))
        else {
            debug!(file = %event.name, "no source claims this file");
            return;
        };

        match self.ledger.was_ingested(&event.name).await {
            Ok(true) => {
                debug!(file = %event.name, "already ingested");
                return;
            }
            Ok(false) => {}
            // A duplicate process is safe; a dropped file is not.
            Err(e) => warn!(file = %event.name, error = %e, "ledger check failed, processing anyway"),
        }

        self.metrics.file_processed();
        let deadline = std::time::Duration::from_secs(self.cfg.process_timeout_secs);
        match timeout(deadline, pair.processor.process(&event.name)).await {
            Err(_) => {
                warn!(
                    file = %event.name,
                    processor = pair.processor.name(),
                    timeout_secs = self.cfg.process_timeout_secs,
                    "processing timed out; the next poll will retry"
                );
            }
            Ok(Ok(outcome)) => {
                self.metrics
                    .file_succeeded(outcome.results_ingested, self.clock.now());
                if let Err(e) = self
                    .ledger
                    .set_ingested(&event.name, self.clock.now())
                    .await
                {
                    warn!(file = %event.name, error = %e, "ledger write failed");
                }
            }
            Ok(Err(e)) if e.is_retryable() => {
                warn!(
                    file = %event.name,
                    processor = pair.processor.name(),
                    error = %e,
                    "retryable failure; the next poll will retry"
                );
            }
            Ok(Err(e)) => {
                error!(
                    file = %event.name,
                    processor = pair.processor.name(),
                    error = %e,
                    "permanent failure; skipping file"
                );
                if self.cfg.ledger_permanent_failures {
                    if let Err(e) = self
                        .ledger
                        .set_ingested(&event.name, self.clock.now())
                        .await
                    {
                        warn!(file = %event.name, error = %e, "ledger write failed");
                    }
                }
            }
        }
    }

    async fn poll_source(&self, index: usize, shutdown: &watch::Receiver<bool>) -> Result<()> {
        let pair = &self.pairs[index];
        let now = self.clock.now();
        let start = self.start_time_of_interest(now).await?;
        let names = pair.source.search_for_files(start, now).await?;
        debug!(index, from = %start, files = names.len(), "poll pass enumerated");
        for name in names {
            if *shutdown.borrow() {
                break;
            }
            if self.ledger.was_ingested(&name).await.unwrap_or(false) {
                continue;
            }
            // Republish as a synthetic storage event so catch-up files take
            // the exact same path as live ones.
            if self.tx.send(FileEvent { name }).await.is_err() {
                break;
            }
        }
        Ok(())
    }

    /// The oldest upload instant this poll pass must cover.
    async fn start_time_of_interest(&self, now: DateTime<Utc>) -> Result<DateTime<Utc>> {
        let min_window =
            Duration::seconds(i64::try_from(self.cfg.min_window_secs()).unwrap_or(0).max(0));
        let (Some(vcs), true) = (&self.vcs, self.cfg.is_commit_oriented()) else {
            return Ok(now - min_window);
        };

        vcs.update().await?;
        let year = Duration::days(365);
        let mut window = min_window.max(Duration::hours(1));
        loop {
            let commits = vcs.commits_after(now - window).await?;
            if commits.len() >= self.cfg.n_commits || window >= year {
                let mut recent = commits;
                if recent.len() > self.cfg.n_commits {
                    recent = recent.split_off(recent.len() - self.cfg.n_commits);
                }
                // Oldest of the newest n commits; an empty history falls
                // back to the whole window.
                return Ok(recent.first().map_or(now - window, |c| c.timestamp));
            }
            window = window * 2;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::FixedClock;
    use crate::processor::{ProcessOutcome, Processor};
    use async_trait::async_trait;
    use chrono::TimeZone;
    use gold_ledger::MemLedger;
    use gold_source::{BucketSource, MemObjectStore};
    use std::sync::Mutex as StdMutex;

    enum Behavior {
        Succeed(usize),
        Retryable,
        Permanent,
        Hang,
    }

    struct StubProcessor {
        behavior: Behavior,
        seen: StdMutex<Vec<String>>,
    }

    impl StubProcessor {
        fn new(behavior: Behavior) -> Self {
            Self {
                behavior,
                seen: StdMutex::new(Vec::new()),
            }
        }

        fn seen(&self) -> Vec<String> {
            self.seen.lock().unwrap().clone()
        }
    }

    #[async_trait]
    impl Processor for StubProcessor {
        fn name(&self) -> &str {
            "stub"
        }

        async fn process(&self, file_name: &str) -> Result<ProcessOutcome> {
            self.seen.lock().unwrap().push(file_name.to_string());
            match self.behavior {
                Behavior::Succeed(n) => Ok(ProcessOutcome { results_ingested: n }),
                Behavior::Retryable => Err(IngestionError::retryable("db down")),
                Behavior::Permanent => Err(IngestionError::permanent("bad json")),
                Behavior::Hang => {
                    tokio::time::sleep(std::time::Duration::from_secs(3600)).await;
                    Ok(ProcessOutcome::default())
                }
            }
        }
    }

    struct Harness {
        ingester: Option<Ingester>,
        processor: Arc<StubProcessor>,
        ledger: Arc<MemLedger>,
        store: Arc<MemObjectStore>,
        metrics: Arc<IngestionMetrics>,
        tx: mpsc::Sender<FileEvent>,
    }

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2024, 1, 2, 6, 30, 0).unwrap()
    }

    fn harness(cfg: IngesterConfig, behavior: Behavior) -> Harness {
        let store = Arc::new(MemObjectStore::new());
        let source = Arc::new(BucketSource::new(
            Arc::clone(&store) as Arc<dyn gold_source::ObjectStore>,
            "bucket",
            "prefix",
        ));
        let processor = Arc::new(StubProcessor::new(behavior));
        let ledger = Arc::new(MemLedger::new());
        let clock = Arc::new(FixedClock::new(now()));
        let ingester = Ingester::new(
            cfg,
            vec![(
                source as Arc<dyn IngestionSource>,
                Arc::clone(&processor) as Arc<dyn Processor>,
            )],
            Arc::clone(&ledger) as Arc<dyn Ledger>,
            Arc::clone(&clock) as Arc<dyn Clock>,
            None,
            None,
        )
        .unwrap();
        let metrics = ingester.metrics();
        let tx = ingester.event_sender();
        Harness {
            ingester: Some(ingester),
            processor,
            ledger,
            store,
            metrics,
            tx,
        }
    }

    fn quick_cfg() -> IngesterConfig {
        IngesterConfig {
            min_hours: 1,
            run_every_secs: 10,
            files_processed_in_parallel: 4,
            process_timeout_secs: 5,
            ..IngesterConfig::default()
        }
    }

    async fn settle() {
        // Paused-clock runtimes auto-advance; a few yields let the pipeline
        // drain.
        for _ in 0..50 {
            tokio::task::yield_now().await;
        }
    }

    // -- 1. Event path: process, record, count -------------------------------

    #[tokio::test(start_paused = true)]
    async fn event_is_processed_and_ledgered() {
        let mut h = harness(quick_cfg(), Behavior::Succeed(3));
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(h.ingester.take().unwrap().run(stop_rx));

        h.tx.send(FileEvent {
            name: "bucket/prefix/2024/01/02/06/a.json".into(),
        })
        .await
        .unwrap();
        settle().await;

        assert_eq!(h.processor.seen(), vec!["bucket/prefix/2024/01/02/06/a.json"]);
        assert!(h
            .ledger
            .was_ingested("bucket/prefix/2024/01/02/06/a.json")
            .await
            .unwrap());
        let snap = h.metrics.snapshot();
        assert_eq!(snap.files_processed, 1);
        assert_eq!(snap.files_success, 1);
        assert_eq!(snap.results_ingested, 3);

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    // -- 2. Ledger dedup skips the processor ---------------------------------

    #[tokio::test(start_paused = true)]
    async fn already_ingested_files_are_skipped() {
        let mut h = harness(quick_cfg(), Behavior::Succeed(1));
        h.ledger
            .set_ingested("bucket/prefix/2024/01/02/06/a.json", now())
            .await
            .unwrap();
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(h.ingester.take().unwrap().run(stop_rx));

        h.tx.send(FileEvent {
            name: "bucket/prefix/2024/01/02/06/a.json".into(),
        })
        .await
        .unwrap();
        settle().await;

        assert!(h.processor.seen().is_empty());
        assert_eq!(h.metrics.snapshot().files_processed, 0);

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    // -- 3. Retryable failures leave the ledger untouched ---------------------

    #[tokio::test(start_paused = true)]
    async fn retryable_failure_is_not_ledgered() {
        let mut h = harness(quick_cfg(), Behavior::Retryable);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(h.ingester.take().unwrap().run(stop_rx));

        h.tx.send(FileEvent {
            name: "bucket/prefix/2024/01/02/06/a.json".into(),
        })
        .await
        .unwrap();
        settle().await;

        assert!(!h
            .ledger
            .was_ingested("bucket/prefix/2024/01/02/06/a.json")
            .await
            .unwrap());
        let snap = h.metrics.snapshot();
        assert_eq!(snap.files_processed, 1);
        assert_eq!(snap.files_success, 0);

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    // -- 4. Permanent failures are optionally ledgered ------------------------

    #[tokio::test(start_paused = true)]
    async fn permanent_failure_ledgered_when_configured() {
        let cfg = IngesterConfig {
            ledger_permanent_failures: true,
            ..quick_cfg()
        };
        let mut h = harness(cfg, Behavior::Permanent);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(h.ingester.take().unwrap().run(stop_rx));

        h.tx.send(FileEvent {
            name: "bucket/prefix/2024/01/02/06/poison.json".into(),
        })
        .await
        .unwrap();
        settle().await;

        assert!(h
            .ledger
            .was_ingested("bucket/prefix/2024/01/02/06/poison.json")
            .await
            .unwrap());
        assert_eq!(h.metrics.snapshot().files_success, 0);

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    // -- 5. Per-file timeout fires --------------------------------------------

    #[tokio::test(start_paused = true)]
    async fn hanging_processor_times_out() {
        let mut h = harness(quick_cfg(), Behavior::Hang);
        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(h.ingester.take().unwrap().run(stop_rx));

        h.tx.send(FileEvent {
            name: "bucket/prefix/2024/01/02/06/slow.json".into(),
        })
        .await
        .unwrap();
        settle().await;
        tokio::time::sleep(std::time::Duration::from_secs(6)).await;
        settle().await;

        let snap = h.metrics.snapshot();
        assert_eq!(snap.files_processed, 1);
        assert_eq!(snap.files_success, 0);
        assert!(!h
            .ledger
            .was_ingested("bucket/prefix/2024/01/02/06/slow.json")
            .await
            .unwrap());

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    // -- 6. Poll republishes unledgered files through the event path ----------

    #[tokio::test(start_paused = true)]
    async fn poll_republishes_missed_files() {
        let mut h = harness(quick_cfg(), Behavior::Succeed(1));
        // Within [now - 1h, now]: hours 05 and 06.
        h.store
            .insert("bucket/prefix/2024/01/02/06/missed.json", b"{}".to_vec());
        h.store
            .insert("bucket/prefix/2024/01/02/05/done.json", b"{}".to_vec());
        h.ledger
            .set_ingested("bucket/prefix/2024/01/02/05/done.json", now())
            .await
            .unwrap();

        let (stop_tx, stop_rx) = watch::channel(false);
        let run = tokio::spawn(h.ingester.take().unwrap().run(stop_rx));

        // Let the first poll interval elapse and the pipeline drain.
        tokio::time::sleep(std::time::Duration::from_secs(11)).await;
        settle().await;

        assert_eq!(h.processor.seen(), vec!["bucket/prefix/2024/01/02/06/missed.json"]);
        assert!(h
            .ledger
            .was_ingested("bucket/prefix/2024/01/02/06/missed.json")
            .await
            .unwrap());
        assert!(h.metrics.snapshot().last_successful_poll_ms > 0);

        stop_tx.send(true).unwrap();
        run.await.unwrap();
    }

    // -- 7. Construction without pairs is fatal -------------------------------

    #[test]
    fn no_pairs_is_fatal() {
        let err = Ingester::new(
            IngesterConfig::default(),
            vec![],
            Arc::new(MemLedger::new()),
            Arc::new(FixedClock::new(now())),
            None,
            None,
        )
        .unwrap_err();
        assert_eq!(err.kind(), gold_error::ErrorKind::Fatal);
    }

    // -- 8. Commit-oriented start time walks the VCS --------------------------

    #[tokio::test]
    async fn commit_oriented_start_time_doubles_window() {
        use gold_clients::MockVcs;

        let vcs = Arc::new(MockVcs::new());
        let t = now();
        // Two commits: 90 minutes and 3 hours back. A 1-hour starting
        // window must double before it sees them.
        vcs.add_commit("aaaa", t - Duration::minutes(90));
        vcs.add_commit("bbbb", t - Duration::hours(3));

        let cfg = IngesterConfig {
            n_commits: 2,
            min_hours: 1,
            ..IngesterConfig::default()
        };
        let store = Arc::new(MemObjectStore::new());
        let source = Arc::new(BucketSource::new(
            store as Arc<dyn gold_source::ObjectStore>,
            "bucket",
            "prefix",
        ));
        let processor = Arc::new(StubProcessor::new(Behavior::Succeed(0)));
        let ingester = Ingester::new(
            cfg,
            vec![(
                source as Arc<dyn IngestionSource>,
                processor as Arc<dyn Processor>,
            )],
            Arc::new(MemLedger::new()),
            Arc::new(FixedClock::new(t)),
            Some(vcs as Arc<dyn VcsAdapter>),
            None,
        )
        .unwrap();

        let start = ingester.inner.start_time_of_interest(t).await.unwrap();
        assert_eq!(start, t - Duration::hours(3));
    }
}
