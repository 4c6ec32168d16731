// Copyright 2025-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use crate::entry::LogEntry;

/// Cheap check that a payload looks like a JSON object: its first byte is `{`.
///
/// Whitespace is not skipped. This is not validation, the backend rejects
/// malformed documents on its own.
pub fn is_json_object(payload: &[u8]) -> bool {
    payload.first() == Some(&b'{')
}

/// Whether `entry` should reach the bulk buffer. Everything else is dropped silently.
pub fn should_forward(entry: &LogEntry) -> bool {
    is_json_object(&entry.line)
}
