// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Record encoding and the worker-owned batch accumulator.
//!
//! Records are encoded to their final JSON form at enqueue time and the
//! accumulator stores the encoded lines. A batch retained after a failed
//! flush therefore re-sends byte-identical content on the next attempt.

use serde::Serialize;

use crate::error::Error;

/// Encodes one record to its JSONL line (without the trailing newline).
///
/// `serde_json` escapes control characters inside strings, so a raw newline
/// in the output can only come from pre-rendered passthrough values such as
/// `RawValue`. Those would silently split into two wire records, and are
/// rejected instead.
pub(crate) fn encode_record<T>(record: &T) -> Result<String, Error>
where
    T: Serialize + ?Sized,
{
    let line = serde_json::to_string(record)?;
    if line.contains('\n') {
        return Err(Error::MultilineRecord);
    }
    Ok(line)
}

/// Ordered accumulator of encoded records awaiting delivery.
///
/// Owned exclusively by the background worker, so it needs no locking. It is
/// sized for one batch but may exceed that while a failed flush is pending
/// retry; the worker caps its growth by pausing queue intake.
#[derive(Debug)]
pub(crate) struct Batch {
    lines: Vec<String>,
}

impl Batch {
    pub(crate) fn with_capacity(batch_size: usize) -> Self {
        Self {
            lines: Vec::with_capacity(batch_size),
        }
    }

    pub(crate) fn push(&mut self, line: String) {
        self.lines.push(line);
    }

    pub(crate) fn len(&self) -> usize {
        self.lines.len()
    }

    pub(crate) fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    /// Drops the accumulated records, keeping the allocation for the next
    /// batch.
    pub(crate) fn clear(&mut self) {
        self.lines.clear();
    }

    /// Assembles the newline-delimited payload, one record per line in
    /// enqueue order. Rebuilding from the retained lines keeps retried
    /// payloads byte-identical.
    pub(crate) fn to_ndjson(&self) -> Vec<u8> {
        let mut payload = Vec::with_capacity(self.lines.iter().map(|l| l.len() + 1).sum());
        for line in &self.lines {
            payload.extend_from_slice(line.as_bytes());
            payload.push(b'\n');
        }
        payload
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use serde::Serialize;

    #[derive(Serialize)]
    struct TestRecord {
        s: &'static str,
    }

    #[test]
    fn test_encode_record_compact_json() {
        let line = encode_record(&TestRecord { s: "a" }).unwrap();
        assert_eq!(line, "{\"s\":\"a\"}");
    }

    #[test]
    fn test_encode_record_escapes_embedded_newlines() {
        let line = encode_record(&TestRecord { s: "line1\nline2" }).unwrap();
        assert_eq!(line, "{\"s\":\"line1\\nline2\"}");
        assert!(!line.contains('\n'));
    }

    #[test]
    fn test_encode_record_rejects_multiline_raw_values() {
        let raw: Box<serde_json::value::RawValue> =
            serde_json::from_str("{\n  \"s\": \"a\"\n}").unwrap();
        assert!(matches!(
            encode_record(&raw),
            Err(Error::MultilineRecord)
        ));
    }

    #[test]
    fn test_payload_preserves_enqueue_order() {
        let mut batch = Batch::with_capacity(4);
        for s in ["a", "b", "c"] {
            batch.push(encode_record(&TestRecord { s }).unwrap());
        }
        assert_eq!(batch.len(), 3);
        assert_eq!(
            batch.to_ndjson(),
            b"{\"s\":\"a\"}\n{\"s\":\"b\"}\n{\"s\":\"c\"}\n"
        );
    }

    #[test]
    fn test_heterogeneous_records_interleave() {
        #[derive(Serialize)]
        struct Other {
            n: u32,
        }

        let mut batch = Batch::with_capacity(4);
        batch.push(encode_record(&TestRecord { s: "a" }).unwrap());
        batch.push(encode_record(&Other { n: 7 }).unwrap());
        assert_eq!(batch.to_ndjson(), b"{\"s\":\"a\"}\n{\"n\":7}\n");
    }

    #[test]
    fn test_empty_batch_produces_empty_payload() {
        let batch = Batch::with_capacity(4);
        assert!(batch.is_empty());
        assert!(batch.to_ndjson().is_empty());
    }

    #[test]
    fn test_clear_empties_but_keeps_allocation() {
        let mut batch = Batch::with_capacity(2);
        for s in ["a", "b", "c", "d"] {
            batch.push(encode_record(&TestRecord { s }).unwrap());
        }
        let grown = batch.lines.capacity();
        batch.clear();
        assert!(batch.is_empty());
        assert_eq!(batch.lines.capacity(), grown);
    }

    #[test]
    fn test_payload_rebuild_is_byte_identical() {
        let mut batch = Batch::with_capacity(2);
        batch.push(encode_record(&TestRecord { s: "a" }).unwrap());
        batch.push(encode_record(&TestRecord { s: "b" }).unwrap());
        assert_eq!(batch.to_ndjson(), batch.to_ndjson());
    }

    proptest! {
        #[test]
        fn prop_payload_round_trips_in_order(
            values in proptest::collection::vec("[ -~]{0,32}", 0..50),
        ) {
            let mut batch = Batch::with_capacity(8);
            for value in &values {
                batch.push(encode_record(value).unwrap());
            }
            let payload = String::from_utf8(batch.to_ndjson()).unwrap();
            let decoded: Vec<String> = payload
                .lines()
                .map(|line| serde_json::from_str(line).unwrap())
                .collect();
            prop_assert_eq!(decoded, values);
        }
    }
}
