// Common test utilities and helpers

use iotops::diagnostics::proto;

/// Build a span with the given ids; `parent` empty means root
pub fn make_span(
    trace_id: &[u8],
    span_id: &[u8],
    parent: &[u8],
    name: &str,
    start_time_unix_nano: u64,
) -> proto::Span {
    proto::Span {
        trace_id: trace_id.to_vec(),
        span_id: span_id.to_vec(),
        parent_span_id: parent.to_vec(),
        name: name.to_string(),
        kind: proto::span::SpanKind::Internal as i32,
        start_time_unix_nano,
        end_time_unix_nano: start_time_unix_nano + 1_000_000,
        ..Default::default()
    }
}

/// Build a single-resource `TracesData` carrying the given spans
pub fn make_traces_data(service_name: &str, spans: Vec<proto::Span>) -> proto::TracesData {
    proto::TracesData {
        resource_spans: vec![proto::ResourceSpans {
            resource: Some(proto::Resource {
                attributes: vec![proto::KeyValue {
                    key: "service.name".to_string(),
                    value: Some(proto::AnyValue {
                        value: Some(proto::any_value::Value::StringValue(
                            service_name.to_string(),
                        )),
                    }),
                }],
                dropped_attributes_count: 0,
            }),
            scope_spans: vec![proto::ScopeSpans {
                scope: Some(proto::InstrumentationScope {
                    name: "aio-broker".to_string(),
                    ..Default::default()
                }),
                spans,
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    }
}

/// The trace used throughout the trace round-trip tests
pub fn probe_trace() -> proto::TracesData {
    let trace_id = hex::decode("847969664d5e616ae956fc6aaaae6560").unwrap();
    let span = make_span(
        &trace_id,
        &[1, 2, 3, 4, 5, 6, 7, 8],
        &[],
        "publish",
        1_701_380_840_937_645_506,
    );
    make_traces_data("aio-mq-diagnostics-probe-0", vec![span])
}
