//! Trace processing tests

mod common;

use common::{make_span, make_traces_data, probe_trace};
use iotops::collect::trace_path;
use iotops::diagnostics::proto;
use iotops::traces::{process_trace, tempo_from_otlp, traces_to_json};
use prost::Message;
use serde_json::Value;

// ============================================================================
// Round trip with the diagnostics probe reference trace
// ============================================================================

#[test]
fn test_probe_trace_round_trip() {
    let record = process_trace(&probe_trace()).unwrap().unwrap();

    assert_eq!(record.trace_id, "847969664d5e616ae956fc6aaaae6560");
    assert_eq!(record.service_name, "aio-mq-diagnostics-probe-0");
    assert_eq!(record.span_name, "publish");
    assert_eq!(
        record.archive_basename(),
        "aio-mq-diagnostics-probe-0.publish.847969664d5e616ae956fc6aaaae6560"
    );
    assert_eq!(
        record.timestamp.format("%Y-%m-%dT%H:%M:%S%.3fZ").to_string(),
        "2023-11-30T21:47:20.937Z"
    );

    // The OTLP payload is the original protobuf message
    let decoded = proto::TracesData::decode(record.otlp.as_slice()).unwrap();
    assert_eq!(decoded, probe_trace());

    // Both archive entries share the basename and differ only in extension
    let otlp_path = trace_path(
        "azure-iot-operations",
        "mq",
        &record.archive_basename(),
        "otlp.pb",
    );
    let tempo_path = trace_path(
        "azure-iot-operations",
        "mq",
        &record.archive_basename(),
        "tempo.json",
    );
    assert_eq!(
        otlp_path,
        "azure-iot-operations/mq/traces/aio-mq-diagnostics-probe-0.publish.847969664d5e616ae956fc6aaaae6560.otlp.pb"
    );
    assert_eq!(otlp_path.trim_end_matches("otlp.pb"), tempo_path.trim_end_matches("tempo.json"));
}

#[test]
fn test_tempo_payload_uses_renamed_keys() {
    let record = process_trace(&probe_trace()).unwrap().unwrap();
    let tempo: Value = serde_json::from_slice(&record.tempo).unwrap();

    let root = tempo.as_object().unwrap();
    assert!(root.contains_key("batches"));
    assert!(!root.contains_key("resourceSpans"));

    let batch = &root["batches"][0];
    assert!(batch.get("instrumentationLibrarySpans").is_some());
    assert!(batch.get("scopeSpans").is_none());

    let ils = &batch["instrumentationLibrarySpans"][0];
    assert!(ils.get("instrumentationLibrary").is_some());
    assert!(ils.get("scope").is_none());
}

#[test]
fn test_rename_is_lossy_in_key_names_only() {
    let otlp = traces_to_json(&probe_trace());
    let tempo = tempo_from_otlp(&otlp);

    // Same resource object, same spans, just reparented under new keys
    assert_eq!(
        otlp["resourceSpans"][0]["resource"],
        tempo["batches"][0]["resource"]
    );
    assert_eq!(
        otlp["resourceSpans"][0]["scopeSpans"][0]["spans"],
        tempo["batches"][0]["instrumentationLibrarySpans"][0]["spans"]
    );
    assert_eq!(
        otlp["resourceSpans"][0]["scopeSpans"][0]["scope"],
        tempo["batches"][0]["instrumentationLibrarySpans"][0]["instrumentationLibrary"]
    );
}

// ============================================================================
// Span id normalization
// ============================================================================

#[test]
fn test_span_ids_are_lowercase_hex() {
    let otlp = traces_to_json(&probe_trace());
    let span = &otlp["resourceSpans"][0]["scopeSpans"][0]["spans"][0];

    for field in ["traceId", "spanId"] {
        let id = span[field].as_str().unwrap();
        assert!(!id.is_empty());
        assert_eq!(id.len() % 2, 0);
        assert!(id.chars().all(|c| c.is_ascii_hexdigit() && !c.is_ascii_uppercase()));
    }
    // Root span carries no parent id at all
    assert!(span.get("parentSpanId").is_none());
}

#[test]
fn test_span_projection_keeps_all_set_fields() {
    let trace_id = vec![0x42; 16];
    let mut span = make_span(&trace_id, &[7; 8], &[], "publish", 1_701_380_840_000_000_000);
    span.trace_state = "vendor=state".to_string();
    span.flags = 0x0100;
    span.dropped_attributes_count = 3;
    span.dropped_events_count = 1;
    span.dropped_links_count = 2;
    span.events.push(proto::span::Event {
        time_unix_nano: 1_701_380_840_500_000_000,
        name: "enqueued".to_string(),
        attributes: vec![],
        dropped_attributes_count: 4,
    });
    span.links.push(proto::span::Link {
        trace_id: vec![0x43; 16],
        span_id: vec![8; 8],
        trace_state: "vendor=linked".to_string(),
        attributes: vec![proto::KeyValue {
            key: "peer".to_string(),
            value: Some(proto::AnyValue {
                value: Some(proto::any_value::Value::StringValue("broker".to_string())),
            }),
        }],
        dropped_attributes_count: 5,
        flags: 1,
    });
    span.status = Some(proto::Status {
        message: "timed out".to_string(),
        code: proto::status::StatusCode::Error as i32,
    });
    let trace = make_traces_data("broker", vec![span]);

    let otlp = traces_to_json(&trace);
    let json_span = &otlp["resourceSpans"][0]["scopeSpans"][0]["spans"][0];
    assert_eq!(json_span["traceState"], "vendor=state");
    assert_eq!(json_span["flags"], 0x0100);
    assert_eq!(json_span["droppedAttributesCount"], 3);
    assert_eq!(json_span["droppedEventsCount"], 1);
    assert_eq!(json_span["droppedLinksCount"], 2);
    assert_eq!(json_span["events"][0]["droppedAttributesCount"], 4);
    assert_eq!(json_span["status"]["message"], "timed out");
    assert_eq!(json_span["status"]["code"], 2);

    let link = &json_span["links"][0];
    assert_eq!(link["traceState"], "vendor=linked");
    assert_eq!(link["attributes"][0]["key"], "peer");
    assert_eq!(link["droppedAttributesCount"], 5);
    assert_eq!(link["flags"], 1);

    // The Tempo document renames containers but keeps span values intact
    let tempo = tempo_from_otlp(&otlp);
    assert_eq!(
        *json_span,
        tempo["batches"][0]["instrumentationLibrarySpans"][0]["spans"][0]
    );
}

#[test]
fn test_child_span_keeps_parent_id_in_hex() {
    let trace_id = vec![0xaa; 16];
    let root = make_span(&trace_id, &[1; 8], &[], "publish", 1_701_380_840_000_000_000);
    let child = make_span(
        &trace_id,
        &[2; 8],
        &[1; 8],
        "deliver",
        1_701_380_840_000_000_100,
    );
    let trace = make_traces_data("broker", vec![root, child]);

    let otlp = traces_to_json(&trace);
    let spans = otlp["resourceSpans"][0]["scopeSpans"][0]["spans"]
        .as_array()
        .unwrap();
    assert_eq!(spans[1]["parentSpanId"].as_str().unwrap(), "0101010101010101");
}

// ============================================================================
// Root span determination
// ============================================================================

#[test]
fn test_last_root_span_wins() {
    let trace_id = vec![0xbb; 16];
    let first = make_span(&trace_id, &[1; 8], &[], "first", 1_701_000_000_000_000_000);
    let second = make_span(&trace_id, &[2; 8], &[], "second", 1_701_000_001_000_000_000);
    let trace = make_traces_data("broker", vec![first, second]);

    let record = process_trace(&trace).unwrap().unwrap();
    assert_eq!(record.span_name, "second");
}

#[test]
fn test_trace_without_root_is_skipped() {
    let trace_id = vec![0xcc; 16];
    let orphan = make_span(&trace_id, &[2; 8], &[1; 8], "orphan", 1_701_000_000_000_000_000);
    let trace = make_traces_data("broker", vec![orphan]);

    assert!(process_trace(&trace).unwrap().is_none());
}

#[test]
fn test_trace_without_timestamp_is_skipped() {
    let trace_id = vec![0xdd; 16];
    let root = make_span(&trace_id, &[1; 8], &[], "publish", 0);
    let trace = make_traces_data("broker", vec![root]);

    assert!(process_trace(&trace).unwrap().is_none());
}

#[test]
fn test_missing_service_name_falls_back_to_unknown() {
    let trace_id = vec![0xee; 16];
    let mut trace = make_traces_data("ignored", vec![make_span(
        &trace_id,
        &[1; 8],
        &[],
        "publish",
        1_701_000_000_000_000_000,
    )]);
    trace.resource_spans[0].resource = None;

    let record = process_trace(&trace).unwrap().unwrap();
    assert_eq!(record.service_name, "unknown");
}
