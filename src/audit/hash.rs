/// Canonical encoding and SHA-256 digest of audit log batches.
///
/// Each entry becomes `id|actor|action|target_type|target_id|timestamp|metadata`
/// with absent optionals rendered as `null`. Entries are concatenated with no
/// separator and the whole string is hashed once. Historical anchors were
/// produced from this exact byte sequence, so the format must not change.
use chrono::{DateTime, Timelike, Utc};
use serde_json::{Map, Number, Value};
use sha2::{Digest, Sha256};

use super::AuditLogEntry;

/// Placeholder hashed in place of an empty batch.
pub const EMPTY_BATCH_TOKEN: &str = "empty";

const NULL_FIELD: &str = "null";

/// Hash an ordered batch of entries to lowercase hex.
pub fn compute_hash(entries: &[AuditLogEntry]) -> String {
    if entries.is_empty() {
        return sha256_hex(EMPTY_BATCH_TOKEN.as_bytes());
    }

    let canonical: String = entries.iter().map(canonical_record).collect();
    sha256_hex(canonical.as_bytes())
}

/// Pipe-delimited form of one entry.
pub fn canonical_record(entry: &AuditLogEntry) -> String {
    let metadata = match &entry.metadata {
        Some(value) if !value.is_null() => render_metadata(value),
        _ => "{}".to_string(),
    };

    [
        entry.id.as_str(),
        entry.actor_id.as_deref().unwrap_or(NULL_FIELD),
        entry.action.as_str(),
        entry.target_type.as_deref().unwrap_or(NULL_FIELD),
        entry.target_id.as_deref().unwrap_or(NULL_FIELD),
        &format_timestamp(&entry.timestamp),
        &metadata,
    ]
    .join("|")
}

/// Compact JSON as the portal's `JSON.stringify` writes it.
///
/// Integral floats print without a fraction (`1.0` is `1`) and
/// integer-like keys come first in ascending numeric order, followed by
/// the remaining keys in insertion order.
pub fn render_metadata(value: &Value) -> String {
    let mut out = String::new();
    write_value(value, &mut out);
    out
}

/// Largest integer a JS number holds exactly (2^53).
const MAX_SAFE_INTEGER: f64 = 9_007_199_254_740_992.0;

fn write_value(value: &Value, out: &mut String) {
    match value {
        Value::Null => out.push_str("null"),
        Value::Bool(b) => out.push_str(if *b { "true" } else { "false" }),
        Value::Number(n) => write_number(n, out),
        Value::String(s) => write_string(s, out),
        Value::Array(items) => {
            out.push('[');
            for (i, item) in items.iter().enumerate() {
                if i > 0 {
                    out.push(',');
                }
                write_value(item, out);
            }
            out.push(']');
        }
        Value::Object(map) => write_object(map, out),
    }
}

fn write_number(n: &Number, out: &mut String) {
    match n.as_f64() {
        Some(v) if n.is_f64() && v.fract() == 0.0 && v.abs() <= MAX_SAFE_INTEGER => {
            // Covers -0.0, which JS also prints as 0.
            out.push_str(&(v as i64).to_string());
        }
        _ => out.push_str(&n.to_string()),
    }
}

fn write_string(s: &str, out: &mut String) {
    out.push_str(&Value::String(s.to_string()).to_string());
}

fn write_object(map: &Map<String, Value>, out: &mut String) {
    let mut indexed: Vec<(u32, &String, &Value)> = Vec::new();
    let mut named: Vec<(&String, &Value)> = Vec::new();
    for (key, value) in map {
        match array_index(key) {
            Some(index) => indexed.push((index, key, value)),
            None => named.push((key, value)),
        }
    }
    indexed.sort_by_key(|(index, _, _)| *index);

    out.push('{');
    let ordered = indexed
        .into_iter()
        .map(|(_, key, value)| (key, value))
        .chain(named);
    for (i, (key, value)) in ordered.enumerate() {
        if i > 0 {
            out.push(',');
        }
        write_string(key, out);
        out.push(':');
        write_value(value, out);
    }
    out.push('}');
}

/// Keys JS treats as array indices: canonical decimal below 2^32 - 1.
fn array_index(key: &str) -> Option<u32> {
    if key.is_empty() || !key.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    if key.len() > 1 && key.starts_with('0') {
        return None;
    }
    key.parse::<u32>().ok().filter(|index| *index != u32::MAX)
}

/// Render a timestamp the way the audit store serializes `timestamptz`:
/// `2024-03-01T12:00:00.5+00:00`, trailing fractional zeros trimmed.
pub fn format_timestamp(ts: &DateTime<Utc>) -> String {
    let base = ts.format("%Y-%m-%dT%H:%M:%S").to_string();
    let micros = ts.nanosecond() / 1_000;

    if micros == 0 {
        return format!("{base}+00:00");
    }

    let fraction = format!("{micros:06}");
    format!("{base}.{}+00:00", fraction.trim_end_matches('0'))
}

fn sha256_hex(data: &[u8]) -> String {
    hex::encode(Sha256::digest(data))
}
