// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Session registry.
//!
//! The runtime starts one logging session per container stream and later
//! stops it by the same id. Each session owns a bulk buffer and a consume task
//! that decodes the stream, filters lines and feeds the buffer.
//!
//! The registry lock only guards the map itself: opening streams, stopping
//! buffers and awaiting tasks all happen outside of it.

use std::collections::HashMap;
use std::io;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use futures::future::join_all;
use futures::StreamExt;
use tokio::io::AsyncRead;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use crate::buffer::{BulkBuffer, BulkWriter};
use crate::config::{BulkWriterConfig, DriverDefaults, LogInfo};
use crate::decoder::decode_entries;
use crate::errors::DriverError;
use crate::filter::should_forward;
use crate::sender::BulkSender;

/// How long [`Driver::shutdown`] waits for in-flight bulk requests.
pub const SHUTDOWN_DRAIN_TIMEOUT: Duration = Duration::from_secs(10);

pub type BoxedReader = Box<dyn AsyncRead + Send + Unpin>;

/// Opens the byte stream behind a session id.
#[async_trait]
pub trait StreamOpener: Send + Sync {
    async fn open(&self, stream_id: &str) -> io::Result<BoxedReader>;
}

/// Treats session ids as filesystem paths: named pipes created by the
/// runtime, or regular files when replaying a captured stream.
#[derive(Debug, Clone, Copy, Default)]
pub struct FifoOpener;

#[async_trait]
impl StreamOpener for FifoOpener {
    async fn open(&self, stream_id: &str) -> io::Result<BoxedReader> {
        #[cfg(unix)]
        {
            use std::os::unix::fs::FileTypeExt;

            let metadata = tokio::fs::metadata(stream_id).await?;
            if metadata.file_type().is_fifo() {
                return open_fifo(stream_id).await;
            }
        }
        let file = tokio::fs::File::open(stream_id).await?;
        Ok(Box::new(file))
    }
}

/// Opens a named pipe read-only, waiting for the runtime to attach its writer.
///
/// The blocking open runs off the async workers. Once the writer closes its
/// end the receiver reports end-of-stream.
#[cfg(unix)]
async fn open_fifo(path: &str) -> io::Result<BoxedReader> {
    let owned = path.to_string();
    let file = tokio::task::spawn_blocking(move || std::fs::File::open(owned))
        .await
        .map_err(io::Error::other)??;
    let receiver = tokio::net::unix::pipe::Receiver::from_file(file)?;
    Ok(Box::new(receiver))
}

struct Session {
    info: LogInfo,
    buffer: BulkBuffer,
    cancel: CancellationToken,
    consumer: JoinHandle<()>,
}

impl Session {
    async fn stop(self, stream_id: &str, drain: Option<Duration>) {
        info!(
            id = %self.info.container_id,
            container = %self.info.container_name,
            stream = stream_id,
            "Stop logging"
        );

        self.cancel.cancel();
        if let Err(e) = self.consumer.await {
            warn!(stream = stream_id, "Consume task ended abnormally: {}", e);
        }
        match drain {
            Some(limit) => {
                self.buffer.stop_and_wait(limit).await;
            }
            None => self.buffer.stop().await,
        }
    }
}

/// Registry of running sessions, keyed by stream id.
pub struct Driver {
    defaults: DriverDefaults,
    opener: Arc<dyn StreamOpener>,
    sessions: Mutex<HashMap<String, Session>>,
}

impl Driver {
    pub fn new(defaults: DriverDefaults, opener: Arc<dyn StreamOpener>) -> Self {
        Driver {
            defaults,
            opener,
            sessions: Mutex::new(HashMap::new()),
        }
    }

    /// Starts consuming `stream_id` into a new bulk buffer.
    ///
    /// Fails without registering anything if the id is already in use, the
    /// options do not resolve, or the stream cannot be opened.
    pub async fn start_logging(&self, stream_id: &str, info: LogInfo) -> Result<(), DriverError> {
        if self.contains(stream_id) {
            return Err(DriverError::AlreadyExists(stream_id.to_string()));
        }

        let config = Arc::new(BulkWriterConfig::resolve(&info, &self.defaults)?);
        let sender = Arc::new(BulkSender::new(Arc::clone(&config))?);
        let buffer = BulkBuffer::new(Arc::clone(&config), sender);

        let reader = match self.opener.open(stream_id).await {
            Ok(reader) => reader,
            Err(source) => {
                buffer.stop().await;
                return Err(DriverError::OpenStream {
                    stream_id: stream_id.to_string(),
                    source,
                });
            }
        };

        let rejected = {
            #[allow(clippy::expect_used)]
            let mut sessions = self.sessions.lock().expect("lock poisoned");
            if sessions.contains_key(stream_id) {
                Some(buffer)
            } else {
                let cancel = CancellationToken::new();
                let consumer = tokio::spawn(consume(
                    stream_id.to_string(),
                    info.container_id.clone(),
                    reader,
                    buffer.writer(),
                    cancel.clone(),
                ));
                sessions.insert(
                    stream_id.to_string(),
                    Session {
                        info,
                        buffer,
                        cancel,
                        consumer,
                    },
                );
                None
            }
        };
        // a concurrent start for the same id won the race
        if let Some(buffer) = rejected {
            buffer.stop().await;
            return Err(DriverError::AlreadyExists(stream_id.to_string()));
        }

        info!(
            id = %config.container_id,
            container = %config.container_name,
            elastic_host = %config.host,
            index = %config.index,
            date_suffix = config.date_suffix.as_deref().unwrap_or(""),
            doc_type = %config.doc_type,
            stream = stream_id,
            "Start logging"
        );
        Ok(())
    }

    /// Stops the session for `stream_id`. Unknown ids are ignored.
    pub async fn stop_logging(&self, stream_id: &str) {
        let session = {
            #[allow(clippy::expect_used)]
            let mut sessions = self.sessions.lock().expect("lock poisoned");
            sessions.remove(stream_id)
        };
        match session {
            Some(session) => session.stop(stream_id, None).await,
            None => debug!(stream = stream_id, "No logger to stop"),
        }
    }

    /// Stops every session and waits a bounded time for their last sends.
    pub async fn shutdown(&self) {
        let sessions: Vec<(String, Session)> = {
            #[allow(clippy::expect_used)]
            let mut sessions = self.sessions.lock().expect("lock poisoned");
            sessions.drain().collect()
        };
        if sessions.is_empty() {
            return;
        }

        info!("Shutting down {} loggers", sessions.len());
        join_all(
            sessions
                .into_iter()
                .map(|(id, session)| async move {
                    session.stop(&id, Some(SHUTDOWN_DRAIN_TIMEOUT)).await
                }),
        )
        .await;
    }

    pub fn contains(&self, stream_id: &str) -> bool {
        #[allow(clippy::expect_used)]
        let sessions = self.sessions.lock().expect("lock poisoned");
        sessions.contains_key(stream_id)
    }

    pub fn session_ids(&self) -> Vec<String> {
        #[allow(clippy::expect_used)]
        let sessions = self.sessions.lock().expect("lock poisoned");
        sessions.keys().cloned().collect()
    }

    /// Whether the session's consume task is still reading its stream.
    ///
    /// A session whose stream ended, or failed to decode, stays registered
    /// until it is stopped, but reports `false` here.
    pub fn is_consuming(&self, stream_id: &str) -> bool {
        #[allow(clippy::expect_used)]
        let sessions = self.sessions.lock().expect("lock poisoned");
        sessions
            .get(stream_id)
            .is_some_and(|session| !session.consumer.is_finished())
    }
}

async fn consume(
    stream_id: String,
    container_id: String,
    reader: BoxedReader,
    writer: BulkWriter,
    cancel: CancellationToken,
) {
    let mut entries = decode_entries(reader);
    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => {
                debug!(id = %container_id, stream = %stream_id, "Logger cancelled");
                break;
            }
            next = entries.next() => match next {
                Some(Ok(entry)) => {
                    if should_forward(&entry) {
                        writer.write(entry.line_lossy());
                    }
                }
                Some(Err(e)) => {
                    error!(
                        id = %container_id,
                        stream = %stream_id,
                        frame_too_large = e.is_frame_too_large(),
                        "Error reading log stream: {}",
                        e
                    );
                    break;
                }
                None => {
                    info!(id = %container_id, stream = %stream_id, "Shutting down logger: end of stream");
                    break;
                }
            }
        }
    }
}
