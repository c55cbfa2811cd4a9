// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Helper functions for integration tests

use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::resource::v1::Resource;
use opentelemetry_proto::tonic::trace::v1::{span::SpanKind, ResourceSpans, ScopeSpans, Span};

/// Create a string attribute
pub fn attr(key: &str, value: &str) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::StringValue(value.to_string())),
        }),
    }
}

/// Create an integer attribute
#[allow(dead_code)]
pub fn int_attr(key: &str, value: i64) -> KeyValue {
    KeyValue {
        key: key.to_string(),
        value: Some(AnyValue {
            value: Some(Value::IntValue(value)),
        }),
    }
}

/// Create a span of the given trace, with IDs encoded the way OTLP SDKs send them
pub fn create_test_span(trace_id: u64, span_id: u64, parent_id: u64, kind: SpanKind) -> Span {
    let mut full_trace_id = vec![0xaa; 8];
    full_trace_id.extend_from_slice(&trace_id.to_be_bytes());
    Span {
        trace_id: full_trace_id,
        span_id: span_id.to_be_bytes().to_vec(),
        parent_span_id: if parent_id == 0 {
            vec![]
        } else {
            parent_id.to_be_bytes().to_vec()
        },
        name: format!("span-{span_id}"),
        kind: kind as i32,
        start_time_unix_nano: 1_700_000_000_000_000_000,
        end_time_unix_nano: 1_700_000_000_000_500_000,
        ..Default::default()
    }
}

/// Wrap spans into a resource span group with a single instrumentation scope
pub fn create_resource_spans(resource: Vec<KeyValue>, spans: Vec<Span>) -> ResourceSpans {
    ResourceSpans {
        resource: Some(Resource {
            attributes: resource,
            ..Default::default()
        }),
        scope_spans: vec![ScopeSpans {
            scope: Some(InstrumentationScope {
                name: "io.opentelemetry.test".to_string(),
                version: "1.0.0".to_string(),
                ..Default::default()
            }),
            spans,
            ..Default::default()
        }],
        ..Default::default()
    }
}

pub fn create_request(resource_spans: Vec<ResourceSpans>) -> ExportTraceServiceRequest {
    ExportTraceServiceRequest { resource_spans }
}
