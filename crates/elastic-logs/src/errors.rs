// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::io;

use tokio_util::codec::LengthDelimitedCodecError;

/// Problems found while resolving a session's configuration.
///
/// These are fatal to session construction: nothing is registered when one is returned.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("HOST is not defined so --log-opt host is mandatory")]
    MissingHost,

    #[error("invalid host {0:?}")]
    InvalidHost(String),

    #[error("invalid host {0:?}: missing scheme")]
    MissingScheme(String),

    #[error("--log-opt index is mandatory")]
    MissingIndex,

    #[error("invalid date suffix format {0:?}")]
    InvalidDateSuffix(String),

    #[error("invalid bulk size {0:?}: expected a positive integer")]
    InvalidBulkSize(String),

    #[error("invalid duration for {key}: {value:?}")]
    InvalidDuration { key: &'static str, value: String },

    #[error("invalid boolean for {key}: {value:?}")]
    InvalidBool { key: &'static str, value: String },

    #[error("failed to build HTTP client: {0}")]
    HttpClient(#[source] reqwest::Error),
}

/// Errors that end a session's consume loop.
#[derive(Debug, thiserror::Error)]
pub enum FramingError {
    /// Read failures, truncated frames and frames above the size limit.
    #[error("failed to read log frame: {0}")]
    Io(#[from] io::Error),

    #[error("failed to decode log entry: {0}")]
    Decode(#[from] prost::DecodeError),
}

impl FramingError {
    /// True when the frame header declared a length above the decoder's maximum.
    pub fn is_frame_too_large(&self) -> bool {
        match self {
            FramingError::Io(e) => e
                .get_ref()
                .is_some_and(|inner| inner.is::<LengthDelimitedCodecError>()),
            FramingError::Decode(_) => false,
        }
    }
}

/// Outcome of a failed bulk request. Logged by the sender and otherwise dropped.
#[derive(Debug, thiserror::Error)]
pub enum SendError {
    #[error("transport error: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("failed to build bulk payload: {0}")]
    Payload(#[from] serde_json::Error),

    #[error("backend returned {status}: {body}")]
    Backend {
        status: reqwest::StatusCode,
        body: String,
    },
}

/// Errors returned to the host by the session registry.
#[derive(Debug, thiserror::Error)]
pub enum DriverError {
    #[error("logger for {0:?} already exists")]
    AlreadyExists(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error("error opening logger stream {stream_id:?}: {source}")]
    OpenStream {
        stream_id: String,
        #[source]
        source: io::Error,
    },
}
