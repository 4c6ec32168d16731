// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Ships container log streams to Elasticsearch.
//!
//! Each session reads the runtime's length-prefixed protobuf stream, keeps
//! the lines that look like JSON objects and sends them in `_bulk` batches,
//! flushed by size or on a timer. Delivery is best effort.

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod buffer;
pub mod config;
pub mod decoder;
pub mod driver;
pub mod entry;
pub mod errors;
pub mod filter;
pub mod sender;

pub use buffer::{BulkBuffer, BulkWriter};
pub use config::{BulkWriterConfig, DriverDefaults, LogInfo};
pub use driver::{BoxedReader, Driver, FifoOpener, StreamOpener};
pub use entry::LogEntry;
pub use errors::{ConfigError, DriverError, FramingError, SendError};
pub use sender::{BatchSink, BulkSender};
