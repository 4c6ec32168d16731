// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Log records as written by the container runtime's log-driver protocol.
//!
//! Each frame on the inbound stream carries one protobuf-encoded [`LogEntry`].
//! The message layout matches the runtime's `logdriver.LogEntry` definition, so
//! the types are derived with `prost` directly instead of generated from a
//! `.proto` file.

/// A single log record produced by a container.
#[derive(Clone, PartialEq, prost::Message)]
pub struct LogEntry {
    /// Output stream the line was written to (`stdout` or `stderr`).
    #[prost(string, tag = "1")]
    pub source: String,
    /// Capture time in nanoseconds since the Unix epoch.
    #[prost(int64, tag = "2")]
    pub time_nano: i64,
    /// Raw line bytes, without the trailing newline.
    #[prost(bytes = "vec", tag = "3")]
    pub line: Vec<u8>,
    /// Set when the runtime split a long line into several records.
    #[prost(bool, tag = "4")]
    pub partial: bool,
    #[prost(message, optional, tag = "5")]
    pub partial_log_metadata: Option<PartialLogEntryMetadata>,
}

/// Reassembly hints attached to partial records.
#[derive(Clone, PartialEq, prost::Message)]
pub struct PartialLogEntryMetadata {
    #[prost(bool, tag = "1")]
    pub last: bool,
    #[prost(string, tag = "2")]
    pub id: String,
    #[prost(int32, tag = "3")]
    pub ordinal: i32,
}

impl LogEntry {
    /// Builds a complete (non-partial) stdout record, mostly useful for tests and tooling.
    pub fn new(line: impl Into<Vec<u8>>, time_nano: i64) -> Self {
        LogEntry {
            source: "stdout".to_string(),
            time_nano,
            line: line.into(),
            partial: false,
            partial_log_metadata: None,
        }
    }

    /// Returns the line as UTF-8, replacing invalid sequences.
    pub fn line_lossy(&self) -> String {
        String::from_utf8_lossy(&self.line).into_owned()
    }
}
