//! Trace processing
//!
//! Decoded OTLP trace payloads are turned into two archive payloads per
//! trace: the original protobuf (`.otlp.pb`) and a Grafana Tempo JSON
//! document (`.tempo.json`). Tempo's schema is a rename of the OTLP tree;
//! span ids are normalized to lowercase hex throughout.

use crate::diagnostics::proto;
use crate::error::Result;
use base64::Engine;
use chrono::{DateTime, Utc};
use prost::Message;
use serde_json::{json, Value};
use tracing::debug;

/// Fallback service name when the root span's resource carries none
const UNKNOWN_SERVICE: &str = "unknown";

/// One fully-processed trace, ready for archiving
#[derive(Debug, Clone)]
pub struct TraceRecord {
    /// Lowercase hex of the 16-byte trace id
    pub trace_id: String,
    /// Name of the root span
    pub span_name: String,
    /// `service.name` of the root span's owning resource
    pub service_name: String,
    /// Start time of the root span
    pub timestamp: DateTime<Utc>,
    /// Serialized OTLP `TracesData`
    pub otlp: Vec<u8>,
    /// Tempo-schema JSON document, keys sorted
    pub tempo: Vec<u8>,
}

impl TraceRecord {
    /// Shared basename of the trace's two archive entries
    pub fn archive_basename(&self) -> String {
        format!("{}.{}.{}", self.service_name, self.span_name, self.trace_id)
    }
}

/// Normalize a span/trace id to lowercase hex.
///
/// The wire carries raw bytes, but JSON serializers commonly emit them as
/// base64; accept either and write hex out.
pub fn normalize_id(id: &str) -> Option<String> {
    if id.is_empty() {
        return None;
    }
    if id.len() % 2 == 0 && id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Some(id.to_ascii_lowercase());
    }
    base64::engine::general_purpose::STANDARD
        .decode(id)
        .ok()
        .map(hex::encode)
}

/// Interpret a `*_unix_nano` field as a UTC timestamp; zero is undetermined
fn timestamp_from_nanos(nanos: u64) -> Option<DateTime<Utc>> {
    if nanos == 0 || nanos > i64::MAX as u64 {
        return None;
    }
    Some(DateTime::from_timestamp_nanos(nanos as i64))
}

/// Process one decoded trace into its archive payloads.
///
/// Returns `None` (logged at debug) when the root span, owning resource, or
/// start timestamp cannot be determined.
pub fn process_trace(trace: &proto::TracesData) -> Result<Option<TraceRecord>> {
    // Root span: no parent after decoding. Deterministic iteration order,
    // last one wins when the payload carries several.
    let mut root: Option<(&proto::Span, &proto::ResourceSpans)> = None;
    for resource_spans in &trace.resource_spans {
        for scope_spans in &resource_spans.scope_spans {
            for span in &scope_spans.spans {
                if span.parent_span_id.is_empty() {
                    root = Some((span, resource_spans));
                }
            }
        }
    }

    let Some((root_span, owner)) = root else {
        debug!("trace has no root span, skipping");
        return Ok(None);
    };

    let Some(timestamp) = timestamp_from_nanos(root_span.start_time_unix_nano) else {
        debug!("root span has no start timestamp, skipping trace");
        return Ok(None);
    };

    let service_name = owner
        .resource
        .as_ref()
        .and_then(|r| {
            r.attributes.iter().find_map(|kv| {
                if kv.key != "service.name" {
                    return None;
                }
                match kv.value.as_ref()?.value.as_ref()? {
                    proto::any_value::Value::StringValue(s) => Some(s.clone()),
                    _ => None,
                }
            })
        })
        .unwrap_or_else(|| UNKNOWN_SERVICE.to_string());

    let otlp_json = traces_to_json(trace);
    let tempo_json = tempo_from_otlp(&otlp_json);

    Ok(Some(TraceRecord {
        trace_id: hex::encode(&root_span.trace_id),
        span_name: root_span.name.clone(),
        service_name,
        timestamp,
        otlp: trace.encode_to_vec(),
        tempo: serde_json::to_vec_pretty(&tempo_json)?,
    }))
}

/// Serialize a `TracesData` tree as OTLP-style JSON with hex span ids
pub fn traces_to_json(trace: &proto::TracesData) -> Value {
    json!({
        "resourceSpans": trace
            .resource_spans
            .iter()
            .map(resource_spans_to_json)
            .collect::<Vec<_>>(),
    })
}

fn resource_spans_to_json(rs: &proto::ResourceSpans) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(resource) = &rs.resource {
        out.insert("resource".into(), resource_to_json(resource));
    }
    out.insert(
        "scopeSpans".into(),
        Value::Array(rs.scope_spans.iter().map(scope_spans_to_json).collect()),
    );
    if !rs.schema_url.is_empty() {
        out.insert("schemaUrl".into(), rs.schema_url.clone().into());
    }
    Value::Object(out)
}

fn scope_spans_to_json(ss: &proto::ScopeSpans) -> Value {
    let mut out = serde_json::Map::new();
    if let Some(scope) = &ss.scope {
        let mut scope_json = serde_json::Map::new();
        if !scope.name.is_empty() {
            scope_json.insert("name".into(), scope.name.clone().into());
        }
        if !scope.version.is_empty() {
            scope_json.insert("version".into(), scope.version.clone().into());
        }
        if !scope.attributes.is_empty() {
            scope_json.insert(
                "attributes".into(),
                Value::Array(scope.attributes.iter().map(key_value_to_json).collect()),
            );
        }
        if scope.dropped_attributes_count > 0 {
            scope_json.insert(
                "droppedAttributesCount".into(),
                scope.dropped_attributes_count.into(),
            );
        }
        out.insert("scope".into(), Value::Object(scope_json));
    }
    out.insert(
        "spans".into(),
        Value::Array(ss.spans.iter().map(span_to_json).collect()),
    );
    if !ss.schema_url.is_empty() {
        out.insert("schemaUrl".into(), ss.schema_url.clone().into());
    }
    Value::Object(out)
}

fn resource_to_json(resource: &proto::Resource) -> Value {
    let mut out = serde_json::Map::new();
    out.insert(
        "attributes".into(),
        Value::Array(resource.attributes.iter().map(key_value_to_json).collect()),
    );
    if resource.dropped_attributes_count > 0 {
        out.insert(
            "droppedAttributesCount".into(),
            resource.dropped_attributes_count.into(),
        );
    }
    Value::Object(out)
}

fn span_to_json(span: &proto::Span) -> Value {
    let mut out = serde_json::Map::new();
    out.insert("traceId".into(), hex::encode(&span.trace_id).into());
    out.insert("spanId".into(), hex::encode(&span.span_id).into());
    if !span.trace_state.is_empty() {
        out.insert("traceState".into(), span.trace_state.clone().into());
    }
    if !span.parent_span_id.is_empty() {
        out.insert(
            "parentSpanId".into(),
            hex::encode(&span.parent_span_id).into(),
        );
    }
    out.insert("name".into(), span.name.clone().into());
    out.insert("kind".into(), span.kind.into());
    // 64-bit integers are strings in protobuf JSON
    out.insert(
        "startTimeUnixNano".into(),
        span.start_time_unix_nano.to_string().into(),
    );
    out.insert(
        "endTimeUnixNano".into(),
        span.end_time_unix_nano.to_string().into(),
    );
    if !span.attributes.is_empty() {
        out.insert(
            "attributes".into(),
            Value::Array(span.attributes.iter().map(key_value_to_json).collect()),
        );
    }
    if span.dropped_attributes_count > 0 {
        out.insert(
            "droppedAttributesCount".into(),
            span.dropped_attributes_count.into(),
        );
    }
    if !span.events.is_empty() {
        out.insert(
            "events".into(),
            Value::Array(span.events.iter().map(event_to_json).collect()),
        );
    }
    if span.dropped_events_count > 0 {
        out.insert("droppedEventsCount".into(), span.dropped_events_count.into());
    }
    if !span.links.is_empty() {
        out.insert(
            "links".into(),
            Value::Array(span.links.iter().map(link_to_json).collect()),
        );
    }
    if span.dropped_links_count > 0 {
        out.insert("droppedLinksCount".into(), span.dropped_links_count.into());
    }
    if let Some(status) = &span.status {
        let mut status_json = serde_json::Map::new();
        if !status.message.is_empty() {
            status_json.insert("message".into(), status.message.clone().into());
        }
        status_json.insert("code".into(), status.code.into());
        out.insert("status".into(), Value::Object(status_json));
    }
    if span.flags != 0 {
        out.insert("flags".into(), span.flags.into());
    }
    Value::Object(out)
}

fn event_to_json(event: &proto::span::Event) -> Value {
    let mut out = serde_json::Map::new();
    out.insert(
        "timeUnixNano".into(),
        event.time_unix_nano.to_string().into(),
    );
    out.insert("name".into(), event.name.clone().into());
    if !event.attributes.is_empty() {
        out.insert(
            "attributes".into(),
            Value::Array(event.attributes.iter().map(key_value_to_json).collect()),
        );
    }
    if event.dropped_attributes_count > 0 {
        out.insert(
            "droppedAttributesCount".into(),
            event.dropped_attributes_count.into(),
        );
    }
    Value::Object(out)
}

fn link_to_json(link: &proto::span::Link) -> Value {
    let mut out = serde_json::Map::new();
    out.insert("traceId".into(), hex::encode(&link.trace_id).into());
    out.insert("spanId".into(), hex::encode(&link.span_id).into());
    if !link.trace_state.is_empty() {
        out.insert("traceState".into(), link.trace_state.clone().into());
    }
    if !link.attributes.is_empty() {
        out.insert(
            "attributes".into(),
            Value::Array(link.attributes.iter().map(key_value_to_json).collect()),
        );
    }
    if link.dropped_attributes_count > 0 {
        out.insert(
            "droppedAttributesCount".into(),
            link.dropped_attributes_count.into(),
        );
    }
    if link.flags != 0 {
        out.insert("flags".into(), link.flags.into());
    }
    Value::Object(out)
}

fn key_value_to_json(kv: &proto::KeyValue) -> Value {
    json!({
        "key": kv.key,
        "value": kv.value.as_ref().map(any_value_to_json).unwrap_or(Value::Null),
    })
}

fn any_value_to_json(av: &proto::AnyValue) -> Value {
    match &av.value {
        Some(proto::any_value::Value::StringValue(s)) => json!({ "stringValue": s }),
        Some(proto::any_value::Value::BoolValue(b)) => json!({ "boolValue": b }),
        Some(proto::any_value::Value::IntValue(i)) => json!({ "intValue": i.to_string() }),
        Some(proto::any_value::Value::DoubleValue(d)) => json!({ "doubleValue": d }),
        Some(proto::any_value::Value::ArrayValue(arr)) => json!({
            "arrayValue": {
                "values": arr.values.iter().map(any_value_to_json).collect::<Vec<_>>(),
            }
        }),
        Some(proto::any_value::Value::KvlistValue(kvs)) => json!({
            "kvlistValue": {
                "values": kvs.values.iter().map(key_value_to_json).collect::<Vec<_>>(),
            }
        }),
        Some(proto::any_value::Value::BytesValue(bytes)) => json!({
            "bytesValue": base64::engine::general_purpose::STANDARD.encode(bytes),
        }),
        None => Value::Null,
    }
}

/// Convert an OTLP JSON tree to the Tempo schema.
///
/// A rename in three places: `resourceSpans` becomes `batches`, `scopeSpans`
/// becomes `instrumentationLibrarySpans`, `scope` becomes
/// `instrumentationLibrary`. Values are preserved structurally; any string
/// span ids met along the way are normalized to hex.
pub fn tempo_from_otlp(otlp: &Value) -> Value {
    let Some(obj) = otlp.as_object() else {
        return otlp.clone();
    };

    let mut out = serde_json::Map::new();
    for (key, value) in obj {
        match key.as_str() {
            "resourceSpans" => {
                out.insert("batches".into(), rename_in_resource_spans(value));
            }
            other => {
                out.insert(other.to_string(), value.clone());
            }
        }
    }
    Value::Object(out)
}

fn rename_in_resource_spans(value: &Value) -> Value {
    let Some(items) = value.as_array() else {
        return value.clone();
    };
    Value::Array(
        items
            .iter()
            .map(|item| {
                let Some(obj) = item.as_object() else {
                    return item.clone();
                };
                let mut out = serde_json::Map::new();
                for (key, value) in obj {
                    match key.as_str() {
                        "scopeSpans" => {
                            out.insert(
                                "instrumentationLibrarySpans".into(),
                                rename_in_scope_spans(value),
                            );
                        }
                        other => {
                            out.insert(other.to_string(), value.clone());
                        }
                    }
                }
                Value::Object(out)
            })
            .collect(),
    )
}

fn rename_in_scope_spans(value: &Value) -> Value {
    let Some(items) = value.as_array() else {
        return value.clone();
    };
    Value::Array(
        items
            .iter()
            .map(|item| {
                let Some(obj) = item.as_object() else {
                    return item.clone();
                };
                let mut out = serde_json::Map::new();
                for (key, value) in obj {
                    match key.as_str() {
                        "scope" => {
                            out.insert("instrumentationLibrary".into(), value.clone());
                        }
                        "spans" => {
                            out.insert("spans".into(), normalize_span_ids(value));
                        }
                        other => {
                            out.insert(other.to_string(), value.clone());
                        }
                    }
                }
                Value::Object(out)
            })
            .collect(),
    )
}

fn normalize_span_ids(value: &Value) -> Value {
    let Some(spans) = value.as_array() else {
        return value.clone();
    };
    Value::Array(
        spans
            .iter()
            .map(|span| {
                let Some(obj) = span.as_object() else {
                    return span.clone();
                };
                let mut out = obj.clone();
                for field in ["traceId", "spanId", "parentSpanId"] {
                    if let Some(raw) = out.get(field).and_then(Value::as_str) {
                        if let Some(normalized) = normalize_id(raw) {
                            out.insert(field.to_string(), normalized.into());
                        }
                    }
                }
                Value::Object(out)
            })
            .collect(),
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_id_accepts_hex() {
        assert_eq!(
            normalize_id("847969664D5E616AE956FC6AAAAE6560").as_deref(),
            Some("847969664d5e616ae956fc6aaaae6560")
        );
    }

    #[test]
    fn test_normalize_id_accepts_base64() {
        let raw = [0x84u8, 0x79, 0x69, 0x66];
        let encoded = base64::engine::general_purpose::STANDARD.encode(raw);
        assert_eq!(normalize_id(&encoded).as_deref(), Some("84796966"));
    }

    #[test]
    fn test_normalize_id_rejects_empty() {
        assert!(normalize_id("").is_none());
    }

    #[test]
    fn test_timestamp_from_nanos() {
        let ts = timestamp_from_nanos(1_701_380_840_937_645_506).unwrap();
        assert_eq!(ts.format("%Y-%m-%dT%H:%M:%S").to_string(), "2023-11-30T21:47:20");
        assert!(timestamp_from_nanos(0).is_none());
    }
}
