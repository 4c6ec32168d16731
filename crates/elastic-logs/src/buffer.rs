// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Bulk buffering with size and time triggered flushes.
//!
//! Lines accumulate in a single vector guarded by a mutex. The lock is only
//! held to append or to swap the vector out; detached batches are handed to a
//! [`BatchSink`] on their own tokio task so writers never wait on the network.
//!
//! Two things trigger a flush:
//! - a write that finds the buffer already holding `bulk_size` lines. The full
//!   buffer is detached and the new line starts the next one, so capacity
//!   flushes always carry exactly `bulk_size` lines.
//! - the periodic task, every `flush_interval`, if anything is buffered.
//!
//! Sends may complete out of order. The number of sends running at once is
//! capped by `max_in_flight`; extra batches wait for a permit inside their own
//! task, never in [`BulkWriter::write`].

use std::mem;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::sync::Semaphore;
use tokio::task::JoinHandle;
use tokio::time::{interval, timeout, MissedTickBehavior};
use tokio_util::sync::{CancellationToken, DropGuard};
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use crate::config::{BulkWriterConfig, DriverDefaults, LogInfo};
use crate::errors::ConfigError;
use crate::sender::{BatchSink, BulkSender};

struct Shared {
    lines: Mutex<Vec<String>>,
    config: Arc<BulkWriterConfig>,
    sink: Arc<dyn BatchSink>,
    in_flight: Arc<Semaphore>,
    sends: TaskTracker,
    runtime: Handle,
}

impl Shared {
    fn write(&self, line: String) {
        let full = {
            #[allow(clippy::expect_used)]
            let mut lines = self.lines.lock().expect("lock poisoned");
            if lines.len() < self.config.bulk_size {
                lines.push(line);
                return;
            }
            let full = mem::replace(&mut *lines, Vec::with_capacity(self.config.bulk_size));
            lines.push(line);
            full
        };

        info!(
            id = %self.config.container_id,
            container = %self.config.container_name,
            elastic_host = %self.config.host,
            bulk_size = self.config.bulk_size,
            "Sending bulk to elastic"
        );
        self.dispatch(full);
    }

    /// Detaches whatever is buffered. Returns the number of lines dispatched.
    fn flush(&self) -> usize {
        let batch = {
            #[allow(clippy::expect_used)]
            let mut lines = self.lines.lock().expect("lock poisoned");
            if lines.is_empty() {
                return 0;
            }
            mem::take(&mut *lines)
        };

        let count = batch.len();
        self.dispatch(batch);
        count
    }

    fn buffered(&self) -> usize {
        #[allow(clippy::expect_used)]
        let lines = self.lines.lock().expect("lock poisoned");
        lines.len()
    }

    fn dispatch(&self, batch: Vec<String>) {
        let sink = Arc::clone(&self.sink);
        let in_flight = Arc::clone(&self.in_flight);
        let id = self.config.container_id.clone();
        let send = self.sends.track_future(async move {
            let Ok(_permit) = in_flight.acquire_owned().await else {
                error!(id = %id, "Dropping bulk of {} lines: send queue closed", batch.len());
                return;
            };
            sink.send(batch).await;
        });
        self.runtime.spawn(send);
    }
}

/// Cheap, cloneable write handle onto a [`BulkBuffer`].
#[derive(Clone)]
pub struct BulkWriter {
    shared: Arc<Shared>,
}

impl BulkWriter {
    /// Buffers `line`, flushing the current batch first when it is full. Never blocks on I/O.
    pub fn write(&self, line: impl Into<String>) {
        self.shared.write(line.into());
    }
}

/// A session's bulk buffer together with its periodic flush task.
///
/// The periodic task runs until [`BulkBuffer::stop`] consumes the buffer.
/// Dropping a `BulkBuffer` without stopping it also cancels the task, but
/// skips the final flush.
pub struct BulkBuffer {
    shared: Arc<Shared>,
    cancel_on_drop: DropGuard,
    periodic_flush: JoinHandle<()>,
}

impl BulkBuffer {
    /// Starts a buffer shipping to `sink`. Must be called from within a tokio runtime.
    pub fn new(config: Arc<BulkWriterConfig>, sink: Arc<dyn BatchSink>) -> Self {
        let runtime = Handle::current();
        let shared = Arc::new(Shared {
            lines: Mutex::new(Vec::with_capacity(config.bulk_size)),
            in_flight: Arc::new(Semaphore::new(config.max_in_flight.max(1))),
            sends: TaskTracker::new(),
            config,
            sink,
            runtime: runtime.clone(),
        });

        let cancel = CancellationToken::new();
        let periodic_flush = runtime.spawn(run_periodic_flush(
            Arc::clone(&shared),
            cancel.child_token(),
        ));

        BulkBuffer {
            shared,
            cancel_on_drop: cancel.drop_guard(),
            periodic_flush,
        }
    }

    /// Resolves the session options and starts a buffer shipping over HTTP.
    pub fn from_options(info: &LogInfo, defaults: &DriverDefaults) -> Result<Self, ConfigError> {
        let config = Arc::new(BulkWriterConfig::resolve(info, defaults)?);
        let sender = Arc::new(BulkSender::new(Arc::clone(&config))?);
        Ok(Self::new(config, sender))
    }

    pub fn config(&self) -> &BulkWriterConfig {
        &self.shared.config
    }

    pub fn writer(&self) -> BulkWriter {
        BulkWriter {
            shared: Arc::clone(&self.shared),
        }
    }

    pub fn write(&self, line: impl Into<String>) {
        self.shared.write(line.into());
    }

    /// Dispatches everything buffered right now. Returns the number of lines sent off.
    pub fn flush(&self) -> usize {
        self.shared.flush()
    }

    /// Number of lines waiting for the next flush.
    pub fn buffered(&self) -> usize {
        self.shared.buffered()
    }

    /// Number of dispatched sends that have not finished yet.
    pub fn sends_in_flight(&self) -> usize {
        self.shared.sends.len()
    }

    /// Stops the periodic flush task.
    ///
    /// With `flush_on_stop` the remaining lines are dispatched as a last batch,
    /// otherwise they are dropped. Sends already dispatched keep running.
    pub async fn stop(self) {
        let BulkBuffer {
            shared,
            cancel_on_drop,
            periodic_flush,
        } = self;
        drop(cancel_on_drop);

        if let Err(e) = periodic_flush.await {
            warn!(id = %shared.config.container_id, "Periodic flush task ended abnormally: {}", e);
        }

        if shared.config.flush_on_stop {
            let count = shared.flush();
            if count > 0 {
                info!(
                    id = %shared.config.container_id,
                    container = %shared.config.container_name,
                    elastic_host = %shared.config.host,
                    bulk_size = count,
                    "Stop: Sending bulk to elastic"
                );
            }
        } else {
            let dropped = shared.buffered();
            if dropped > 0 {
                debug!(
                    id = %shared.config.container_id,
                    "Stop: dropping {} buffered lines",
                    dropped
                );
            }
        }
        shared.sends.close();
    }

    /// Like [`BulkBuffer::stop`], then waits up to `limit` for every dispatched send to finish.
    ///
    /// Returns `false` if sends were still running when `limit` elapsed.
    pub async fn stop_and_wait(self, limit: Duration) -> bool {
        let shared = Arc::clone(&self.shared);
        self.stop().await;
        let drained = timeout(limit, shared.sends.wait()).await.is_ok();
        if !drained {
            warn!(
                id = %shared.config.container_id,
                "Gave up waiting for {} bulk sends",
                shared.sends.len()
            );
        }
        drained
    }
}

async fn run_periodic_flush(shared: Arc<Shared>, cancel: CancellationToken) {
    debug!(id = %shared.config.container_id, "Periodic flush task started");

    let mut ticker = interval(shared.config.flush_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker.tick().await; // discard first tick, which is instantaneous

    loop {
        tokio::select! {
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                let count = shared.flush();
                if count > 0 {
                    info!(
                        id = %shared.config.container_id,
                        container = %shared.config.container_name,
                        elastic_host = %shared.config.host,
                        bulk_size = count,
                        "GC: Sending bulk to elastic"
                    );
                }
            }
        }
    }

    debug!(id = %shared.config.container_id, "Periodic flush task stopped");
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use async_trait::async_trait;
    use tokio::sync::mpsc;
    use tokio::time::sleep;

    /// Sink that forwards every batch to a channel.
    pub(crate) struct RecordingSink {
        tx: mpsc::UnboundedSender<Vec<String>>,
    }

    impl RecordingSink {
        pub(crate) fn new() -> (Arc<Self>, mpsc::UnboundedReceiver<Vec<String>>) {
            let (tx, rx) = mpsc::unbounded_channel();
            (Arc::new(RecordingSink { tx }), rx)
        }
    }

    #[async_trait]
    impl BatchSink for RecordingSink {
        async fn send(&self, batch: Vec<String>) {
            let _ = self.tx.send(batch);
        }
    }

    fn config(bulk_size: usize, flush_interval: Duration) -> Arc<BulkWriterConfig> {
        let mut config = BulkWriterConfig::new("http://localhost:9200", "testindex");
        config.bulk_size = bulk_size;
        config.flush_interval = flush_interval;
        config.container_id = "c0ffee".to_string();
        Arc::new(config)
    }

    const LONG: Duration = Duration::from_secs(3600);

    #[tokio::test]
    async fn test_no_send_until_bulk_size_is_exceeded() {
        let (sink, mut rx) = RecordingSink::new();
        let buffer = BulkBuffer::new(config(3, LONG), sink);

        buffer.write("Line 1");
        buffer.write("Line 2");
        buffer.write("Line 3");
        assert_eq!(buffer.buffered(), 3);
        assert_eq!(buffer.sends_in_flight(), 0);
        assert!(rx.try_recv().is_err());

        buffer.write("Line 4");
        assert_eq!(buffer.buffered(), 1);

        let batch = rx.recv().await.expect("one batch");
        assert_eq!(batch, vec!["Line 1", "Line 2", "Line 3"]);
        assert!(rx.try_recv().is_err());

        buffer.stop().await;
    }

    #[tokio::test]
    async fn test_every_line_is_dispatched_once_in_order() {
        let (sink, mut rx) = RecordingSink::new();
        let mut config = (*config(4, LONG)).clone();
        config.flush_on_stop = true;
        let buffer = BulkBuffer::new(Arc::new(config), sink);

        let written: Vec<String> = (0..23).map(|i| format!(r#"{{"n":{i}}}"#)).collect();
        let writer = buffer.writer();
        for line in &written {
            writer.write(line.clone());
        }
        assert!(buffer.stop_and_wait(Duration::from_secs(5)).await);

        let mut batches = Vec::new();
        while let Ok(batch) = rx.try_recv() {
            batches.push(batch);
        }
        assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= 4));
        // sends may complete out of order, but each batch keeps write order
        batches.sort_by_key(|b| written.iter().position(|l| l == &b[0]));
        let shipped: Vec<String> = batches.into_iter().flatten().collect();
        assert_eq!(shipped, written);
    }

    #[tokio::test]
    async fn test_explicit_flush_detaches_everything() {
        let (sink, mut rx) = RecordingSink::new();
        let buffer = BulkBuffer::new(config(10, LONG), sink);

        assert_eq!(buffer.flush(), 0);
        buffer.write("a");
        buffer.write("b");
        assert_eq!(buffer.flush(), 2);
        assert_eq!(buffer.buffered(), 0);
        assert_eq!(rx.recv().await.expect("batch"), vec!["a", "b"]);

        buffer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_ships_stale_lines() {
        let (sink, mut rx) = RecordingSink::new();
        let buffer = BulkBuffer::new(config(3, Duration::from_secs(1)), sink);

        buffer.write("Line 1");
        sleep(Duration::from_millis(500)).await;
        assert!(rx.try_recv().is_err());

        sleep(Duration::from_millis(600)).await;
        let batch = timeout(Duration::from_millis(100), rx.recv())
            .await
            .expect("flush within the interval")
            .expect("batch");
        assert_eq!(batch, vec!["Line 1"]);
        assert_eq!(buffer.buffered(), 0);

        buffer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_periodic_flush_skips_empty_buffer() {
        let (sink, mut rx) = RecordingSink::new();
        let buffer = BulkBuffer::new(config(3, Duration::from_secs(1)), sink);

        sleep(Duration::from_secs(5)).await;
        assert!(rx.try_recv().is_err());

        buffer.stop().await;
    }

    #[tokio::test(start_paused = true)]
    async fn test_stop_halts_periodic_flush() {
        let (sink, mut rx) = RecordingSink::new();
        let mut config = (*config(3, Duration::from_secs(1))).clone();
        config.flush_on_stop = false;
        let buffer = BulkBuffer::new(Arc::new(config), sink);
        let writer = buffer.writer();

        buffer.stop().await;
        writer.write("late line");
        sleep(Duration::from_secs(5)).await;

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_stop_flushes_remaining_lines_by_default() {
        let (sink, mut rx) = RecordingSink::new();
        let buffer = BulkBuffer::new(config(3, LONG), sink);

        buffer.write("Line 1");
        buffer.write("Line 2");
        buffer.stop().await;

        assert_eq!(rx.recv().await.expect("final batch"), vec!["Line 1", "Line 2"]);
    }

    #[tokio::test]
    async fn test_stop_without_flush_drops_remaining_lines() {
        let (sink, mut rx) = RecordingSink::new();
        let mut config = (*config(3, LONG)).clone();
        config.flush_on_stop = false;
        let buffer = BulkBuffer::new(Arc::new(config), sink);

        buffer.write("Line 1");
        assert!(buffer.stop_and_wait(Duration::from_secs(1)).await);

        assert!(rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_writers_never_block_on_slow_sends() {
        struct StuckSink;

        #[async_trait]
        impl BatchSink for StuckSink {
            async fn send(&self, _batch: Vec<String>) {
                std::future::pending::<()>().await;
            }
        }

        let mut config = (*config(1, LONG)).clone();
        config.max_in_flight = 1;
        config.flush_on_stop = false;
        let buffer = BulkBuffer::new(Arc::new(config), Arc::new(StuckSink));

        for i in 0..50 {
            buffer.write(format!("line {i}"));
        }
        assert_eq!(buffer.buffered(), 1);
        assert_eq!(buffer.sends_in_flight(), 49);

        assert!(!buffer.stop_and_wait(Duration::from_millis(50)).await);
    }

    #[tokio::test]
    async fn test_concurrent_writers_lose_nothing() {
        let (sink, mut rx) = RecordingSink::new();
        let buffer = BulkBuffer::new(config(7, LONG), sink);

        let mut tasks = Vec::new();
        for t in 0..4 {
            let writer = buffer.writer();
            tasks.push(tokio::spawn(async move {
                for i in 0..100 {
                    writer.write(format!("{t}-{i}"));
                }
            }));
        }
        for task in tasks {
            task.await.expect("writer task");
        }
        assert!(buffer.stop_and_wait(Duration::from_secs(5)).await);

        let mut total = 0;
        while let Ok(batch) = rx.try_recv() {
            total += batch.len();
        }
        assert_eq!(total, 400);
    }

    #[tokio::test]
    async fn test_from_options_requires_index() {
        let info = LogInfo::new("c0ffee", "web").with_option("host", "http://es:9200");
        let result = BulkBuffer::from_options(&info, &DriverDefaults::default());
        assert!(matches!(result, Err(ConfigError::MissingIndex)));
    }

    #[tokio::test]
    async fn test_from_options_applies_defaults() {
        let info = LogInfo::new("c0ffee", "web")
            .with_option("host", "http://es:9200")
            .with_option("index", "testindex");
        let buffer =
            BulkBuffer::from_options(&info, &DriverDefaults::default()).expect("valid config");

        assert_eq!(buffer.config().bulk_size, 10);
        assert_eq!(buffer.config().doc_type, "log");
        assert_eq!(buffer.config().flush_interval, Duration::from_secs(60));
        buffer.stop().await;
    }
}
