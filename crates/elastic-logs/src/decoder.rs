// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Length-prefixed log stream decoding.
//!
//! The runtime writes each record as a 4-byte big-endian length followed by a
//! protobuf-encoded [`LogEntry`]. [`LogEntryCodec`] turns those frames into
//! entries and [`decode_entries`] wraps any reader into a lazy stream of them.
//!
//! The stream ends with `None` on a clean end-of-file (EOF on a frame
//! boundary). Everything else, including a frame header above
//! [`MAX_FRAME_SIZE`] or a stream cut in the middle of a frame, surfaces as a
//! [`FramingError`]. There is no attempt to resynchronize after an error.

use bytes::BytesMut;
use prost::Message;
use tokio::io::AsyncRead;
use tokio_util::codec::{Decoder, FramedRead, LengthDelimitedCodec};

use crate::entry::LogEntry;
use crate::errors::FramingError;

/// Largest frame accepted from the runtime. Anything bigger is treated as corruption.
pub const MAX_FRAME_SIZE: usize = 1_000_000;

const LENGTH_FIELD_SIZE: usize = 4;

/// Decoder for `[u32 big-endian length][LogEntry]` frames.
#[derive(Debug)]
pub struct LogEntryCodec {
    frames: LengthDelimitedCodec,
}

impl LogEntryCodec {
    pub fn new() -> Self {
        Self::with_max_frame_size(MAX_FRAME_SIZE)
    }

    pub fn with_max_frame_size(max_frame_size: usize) -> Self {
        let frames = LengthDelimitedCodec::builder()
            .big_endian()
            .length_field_length(LENGTH_FIELD_SIZE)
            .max_frame_length(max_frame_size)
            .new_codec();
        LogEntryCodec { frames }
    }
}

impl Default for LogEntryCodec {
    fn default() -> Self {
        Self::new()
    }
}

impl Decoder for LogEntryCodec {
    type Item = LogEntry;
    type Error = FramingError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<LogEntry>, FramingError> {
        match self.frames.decode(src)? {
            Some(frame) => Ok(Some(LogEntry::decode(frame.freeze())?)),
            None => Ok(None),
        }
    }
}

/// Lazily decodes every entry of `reader`, in order.
pub fn decode_entries<R>(reader: R) -> FramedRead<R, LogEntryCodec>
where
    R: AsyncRead,
{
    FramedRead::new(reader, LogEntryCodec::new())
}

/// Encodes `entry` the way the runtime frames it. Used by tests and tooling that replay streams.
pub fn encode_frame(entry: &LogEntry) -> Vec<u8> {
    let body = entry.encode_to_vec();
    let mut frame = Vec::with_capacity(LENGTH_FIELD_SIZE + body.len());
    frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
    frame.extend_from_slice(&body);
    frame
}
