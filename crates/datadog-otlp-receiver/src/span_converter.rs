// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Conversion of a single OTLP span into a Datadog span.
//!
//! Attributes are classified through a static key table: a handful of OTLP keys map onto
//! dedicated span fields, numeric span attributes become metrics and everything else becomes a
//! meta tag. Fields still empty once all attributes are applied are derived from the span kind,
//! the instrumentation scope and well known semantic conventions.

use std::collections::HashMap;
use std::fmt::Write as _;

use datadog_trace_normalization::normalize_utils::normalize_tag;
use datadog_trace_protobuf::pb;
use opentelemetry_proto::tonic::common::v1::{InstrumentationScope, KeyValue};
use opentelemetry_proto::tonic::trace::v1::{
    span::{Event, Link, SpanKind},
    status::StatusCode,
    Span as OtlpSpan,
};

use crate::attributes::{
    any_value_as_string, get_first_from_map, AttributeValue, KEY_ANALYTICS_EVENT, KEY_DB_SYSTEM,
    KEY_DEPLOYMENT_ENVIRONMENT, KEY_EXCEPTION_MESSAGE, KEY_EXCEPTION_STACKTRACE,
    KEY_EXCEPTION_TYPE, KEY_GRPC_PATH, KEY_HTTP_METHOD, KEY_HTTP_REQUEST_METHOD, KEY_HTTP_ROUTE,
    KEY_HTTP_STATUS_CODE, KEY_HTTP_STATUS_TEXT, KEY_MESSAGING_DESTINATION,
    KEY_MESSAGING_DESTINATION_NAME, KEY_MESSAGING_OPERATION, KEY_OPERATION_NAME,
    KEY_RESOURCE_NAME, KEY_RPC_METHOD, KEY_RPC_SERVICE, KEY_SAMPLING_PRIORITY, KEY_SERVICE_NAME,
    KEY_SERVICE_VERSION, KEY_SPAN_TYPE,
};
use crate::config::{Config, FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND};
use crate::sampler;

pub const DEFAULT_SERVICE_NAME: &str = "OTLPResourceNoServiceName";

const META_OTEL_TRACE_ID: &str = "otel.trace_id";
const META_SPAN_KIND: &str = "span.kind";
const META_VERSION: &str = "version";
const META_ENV: &str = "env";
const META_EVENTS: &str = "events";
const META_SPAN_LINKS: &str = "_dd.span_links";
const META_W3C_TRACESTATE: &str = "w3c.tracestate";
const META_OTEL_LIBRARY_NAME: &str = "otel.library.name";
const META_OTEL_LIBRARY_VERSION: &str = "otel.library.version";
const META_OTEL_STATUS_CODE: &str = "otel.status_code";
const META_OTEL_STATUS_DESCRIPTION: &str = "otel.status_description";
const META_ERROR_MSG: &str = "error.msg";
const META_ERROR_TYPE: &str = "error.type";
const META_ERROR_STACK: &str = "error.stack";

const METRIC_TOP_LEVEL: &str = "_top_level";
const METRIC_MEASURED: &str = "_dd.measured";

const EXCEPTION_EVENT_NAME: &str = "exception";

/// Span fields that can be set directly from a string attribute.
#[derive(Debug, Clone, Copy)]
enum SpanField {
    Name,
    Service,
    Resource,
    Type,
    AnalyticsEvent,
}

/// String attributes that land on a span field instead of a meta tag.
const META_KEY_TABLE: &[(&str, SpanField)] = &[
    (KEY_OPERATION_NAME, SpanField::Name),
    (KEY_SERVICE_NAME, SpanField::Service),
    (KEY_RESOURCE_NAME, SpanField::Resource),
    (KEY_SPAN_TYPE, SpanField::Type),
    (KEY_ANALYTICS_EVENT, SpanField::AnalyticsEvent),
];

/// Numeric attributes that are stored under a reserved metric name.
const METRIC_KEY_TABLE: &[(&str, &str)] = &[(KEY_SAMPLING_PRIORITY, sampler::KEY_SAMPLING_PRIORITY)];

const SPAN_KIND_NAMES: &[(i32, &str)] = &[
    (0, "unspecified"),
    (1, "internal"),
    (2, "server"),
    (3, "client"),
    (4, "producer"),
    (5, "consumer"),
];

/// Converts the given span kind into a valid Datadog span name component.
pub fn span_kind_name(kind: i32) -> &'static str {
    SPAN_KIND_NAMES
        .iter()
        .find(|(k, _)| *k == kind)
        .map(|(_, name)| *name)
        .unwrap_or("unknown")
}

fn status_code_name(code: i32) -> &'static str {
    match StatusCode::try_from(code) {
        Ok(StatusCode::Unset) => "Unset",
        Ok(StatusCode::Ok) => "Ok",
        Ok(StatusCode::Error) => "Error",
        Err(_) => "",
    }
}

/// Converts the low 8 bytes of a trace ID, big endian.
pub fn trace_id_to_u64(bytes: &[u8]) -> u64 {
    let low = &bytes[bytes.len().saturating_sub(8)..];
    low.iter().fold(0, |acc, b| (acc << 8) | u64::from(*b))
}

/// Converts the 8 bytes of a span ID, big endian.
pub fn span_id_to_u64(bytes: &[u8]) -> u64 {
    bytes[..bytes.len().min(8)]
        .iter()
        .fold(0, |acc, b| (acc << 8) | u64::from(*b))
}

/// Lowercase hex of an ID, left padded with zeros to its `N` bytes.
fn fixed_width_hex<const N: usize>(bytes: &[u8]) -> String {
    let mut buf = [0u8; N];
    let n = bytes.len().min(N);
    buf[N - n..].copy_from_slice(&bytes[bytes.len() - n..]);
    hex::encode(buf)
}

/// Go `strconv.ParseBool` compatible parsing.
fn parse_bool(value: &str) -> Option<bool> {
    match value {
        "1" | "t" | "T" | "TRUE" | "true" | "True" => Some(true),
        "0" | "f" | "F" | "FALSE" | "false" | "False" => Some(false),
        _ => None,
    }
}

/// Sets a meta tag, removing any metric with the same key.
pub(crate) fn set_meta(span: &mut pb::Span, key: &str, value: String) {
    span.metrics.remove(key);
    span.meta.insert(key.to_string(), value);
}

/// Sets a metric, removing any meta tag with the same key.
pub(crate) fn set_metric(span: &mut pb::Span, key: &str, value: f64) {
    span.meta.remove(key);
    span.metrics.insert(key.to_string(), value);
}

/// Sets the string attribute `key` on the span, as a span field or a meta tag.
fn set_meta_otlp(span: &mut pb::Span, key: &str, value: String) {
    let field = META_KEY_TABLE
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, field)| *field);
    match field {
        Some(SpanField::Name) => span.name = value,
        Some(SpanField::Service) => span.service = value,
        Some(SpanField::Resource) => span.resource = value,
        Some(SpanField::Type) => span.r#type = value,
        Some(SpanField::AnalyticsEvent) => {
            if let Some(enabled) = parse_bool(&value) {
                let rate = if enabled { 1.0 } else { 0.0 };
                set_metric(span, sampler::KEY_SAMPLING_RATE_EVENT_EXTRACTION, rate);
            }
        }
        None => set_meta(span, key, value),
    }
}

/// Sets the numeric attribute `key` on the span as a metric.
fn set_metric_otlp(span: &mut pb::Span, key: &str, value: f64) {
    let key = METRIC_KEY_TABLE
        .iter()
        .find(|(k, _)| *k == key)
        .map(|(_, metric)| *metric)
        .unwrap_or(key);
    set_metric(span, key, value);
}

fn set_attribute(span: &mut pb::Span, attribute: &KeyValue) {
    match AttributeValue::from(attribute.value.as_ref()) {
        AttributeValue::Numeric(v) => set_metric_otlp(span, &attribute.key, v),
        AttributeValue::Text(v) => set_meta_otlp(span, &attribute.key, v),
    }
}

/// Converts OTLP spans using the receiver configuration.
#[derive(Debug, Clone, Copy)]
pub struct SpanConverter<'a> {
    config: &'a Config,
}

impl<'a> SpanConverter<'a> {
    pub fn new(config: &'a Config) -> Self {
        Self { config }
    }

    /// Converts the span `in_span` into a Datadog span, using the resource attributes `rattr` and
    /// the instrumentation `scope` to further augment it.
    pub fn convert(
        &self,
        rattr: &HashMap<String, String>,
        scope: &InstrumentationScope,
        in_span: &OtlpSpan,
    ) -> pb::Span {
        let start = in_span.start_time_unix_nano as i64;
        let mut span = pb::Span {
            trace_id: trace_id_to_u64(&in_span.trace_id),
            span_id: span_id_to_u64(&in_span.span_id),
            parent_id: span_id_to_u64(&in_span.parent_span_id),
            start,
            duration: (in_span.end_time_unix_nano as i64).wrapping_sub(start),
            meta: HashMap::with_capacity(rattr.len()),
            metrics: HashMap::new(),
            ..Default::default()
        };
        for (k, v) in rattr {
            set_meta_otlp(&mut span, k, v.clone());
        }

        if self.config.has_feature(FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND) {
            compute_top_level_and_measured(&mut span, in_span.kind);
        }

        set_meta_otlp(
            &mut span,
            META_OTEL_TRACE_ID,
            fixed_width_hex::<16>(&in_span.trace_id),
        );
        set_meta_otlp(
            &mut span,
            META_SPAN_KIND,
            span_kind_name(in_span.kind).to_string(),
        );
        if !span.meta.contains_key(META_VERSION) {
            if let Some(version) = rattr.get(KEY_SERVICE_VERSION).filter(|v| !v.is_empty()) {
                set_meta_otlp(&mut span, META_VERSION, version.clone());
            }
        }
        if !in_span.events.is_empty() {
            set_meta_otlp(&mut span, META_EVENTS, marshal_events(&in_span.events));
        }
        if !in_span.links.is_empty() {
            set_meta_otlp(&mut span, META_SPAN_LINKS, marshal_links(&in_span.links));
        }
        for attribute in &in_span.attributes {
            set_attribute(&mut span, attribute);
        }
        if !span.meta.contains_key(META_ENV) {
            if let Some(env) = span
                .meta
                .get(KEY_DEPLOYMENT_ENVIRONMENT)
                .filter(|v| !v.is_empty())
            {
                let mut env = env.clone();
                normalize_tag(&mut env);
                set_meta_otlp(&mut span, META_ENV, env);
            }
        }
        if !in_span.trace_state.is_empty() {
            set_meta_otlp(&mut span, META_W3C_TRACESTATE, in_span.trace_state.clone());
        }
        if !scope.name.is_empty() {
            set_meta_otlp(&mut span, META_OTEL_LIBRARY_NAME, scope.name.clone());
        }
        if !scope.version.is_empty() {
            set_meta_otlp(&mut span, META_OTEL_LIBRARY_VERSION, scope.version.clone());
        }

        let (status_code, status_message) = in_span
            .status
            .as_ref()
            .map(|s| (s.code, s.message.as_str()))
            .unwrap_or((StatusCode::Unset as i32, ""));
        set_meta_otlp(
            &mut span,
            META_OTEL_STATUS_CODE,
            status_code_name(status_code).to_string(),
        );
        if !status_message.is_empty() {
            set_meta_otlp(
                &mut span,
                META_OTEL_STATUS_DESCRIPTION,
                status_message.to_string(),
            );
        }
        status_to_error(status_code, status_message, &in_span.events, &mut span);

        if span.name.is_empty() {
            span.name = self.default_name(scope, in_span);
        }
        if span.service.is_empty() {
            span.service = DEFAULT_SERVICE_NAME.to_string();
        }
        if span.resource.is_empty() {
            span.resource = resource_from_tags(&span.meta)
                .unwrap_or_else(|| in_span.name.clone());
        }
        if span.resource.is_empty() {
            span.resource = span.name.clone();
        }
        if span.r#type.is_empty() {
            span.r#type = span_kind_to_type(in_span.kind, &span.meta).to_string();
        }
        span
    }

    /// The span name when no `operation.name` attribute set one. Never empty.
    fn default_name(&self, scope: &InstrumentationScope, in_span: &OtlpSpan) -> String {
        let receiver_config = &self.config.otlp_receiver;
        let kind_name = || {
            let kind = span_kind_name(in_span.kind);
            if scope.name.is_empty() {
                format!("opentelemetry.{kind}")
            } else {
                format!("{}.{kind}", scope.name)
            }
        };
        let name = if receiver_config.span_name_as_resource_name && !in_span.name.is_empty() {
            in_span.name.clone()
        } else {
            kind_name()
        };
        match receiver_config.span_name_remappings.get(&name) {
            Some(remapped) if !remapped.is_empty() => remapped.clone(),
            Some(_) => kind_name(),
            None => name,
        }
    }
}

/// Marks the span as top-level if it is a root span or has a span kind of server or consumer,
/// and as measured if it has a span kind of client or producer.
fn compute_top_level_and_measured(span: &mut pb::Span, kind: i32) {
    let kind = SpanKind::try_from(kind).unwrap_or(SpanKind::Unspecified);
    if span.parent_id == 0 || matches!(kind, SpanKind::Server | SpanKind::Consumer) {
        set_metric(span, METRIC_TOP_LEVEL, 1.0);
    }
    if matches!(kind, SpanKind::Client | SpanKind::Producer) {
        // not top-level, but we still want stats for it
        set_metric(span, METRIC_MEASURED, 1.0);
    }
}

/// Attempts to deduce a more accurate span resource from the given meta tags.
fn resource_from_tags(meta: &HashMap<String, String>) -> Option<String> {
    let with_detail = |op: &str, detail: Option<&str>| match detail {
        Some(detail) => format!("{op} {detail}"),
        None => op.to_string(),
    };
    if let Some((_, method)) = get_first_from_map(meta, &[KEY_HTTP_METHOD, KEY_HTTP_REQUEST_METHOD])
    {
        let route = get_first_from_map(meta, &[KEY_HTTP_ROUTE, KEY_GRPC_PATH]).map(|(_, r)| r);
        return Some(with_detail(method, route));
    }
    if let Some((_, operation)) = get_first_from_map(meta, &[KEY_MESSAGING_OPERATION]) {
        let destination = get_first_from_map(
            meta,
            &[KEY_MESSAGING_DESTINATION, KEY_MESSAGING_DESTINATION_NAME],
        )
        .map(|(_, d)| d);
        return Some(with_detail(operation, destination));
    }
    if let Some((_, method)) = get_first_from_map(meta, &[KEY_RPC_METHOD]) {
        let service = get_first_from_map(meta, &[KEY_RPC_SERVICE]).map(|(_, s)| s);
        return Some(with_detail(method, service));
    }
    None
}

/// Returns a span's type based on its kind and the presence of a database system.
fn span_kind_to_type(kind: i32, meta: &HashMap<String, String>) -> &'static str {
    match SpanKind::try_from(kind) {
        Ok(SpanKind::Server) => "web",
        Ok(SpanKind::Client) => match meta.get(KEY_DB_SYSTEM).map(String::as_str) {
            None => "http",
            Some("redis" | "memcached") => "cache",
            Some(_) => "db",
        },
        _ => "custom",
    }
}

/// Applies the error status and any exception details found in the span events.
fn status_to_error(code: i32, message: &str, events: &[Event], span: &mut pb::Span) {
    if code != StatusCode::Error as i32 {
        return;
    }
    span.error = 1;
    for event in events
        .iter()
        .filter(|e| e.name.eq_ignore_ascii_case(EXCEPTION_EVENT_NAME))
    {
        for (attr, tag) in [
            (KEY_EXCEPTION_MESSAGE, META_ERROR_MSG),
            (KEY_EXCEPTION_TYPE, META_ERROR_TYPE),
            (KEY_EXCEPTION_STACKTRACE, META_ERROR_STACK),
        ] {
            if let Some(kv) = event.attributes.iter().find(|kv| kv.key == attr) {
                set_meta(span, tag, any_value_as_string(kv.value.as_ref()));
            }
        }
    }
    if span.meta.contains_key(META_ERROR_MSG) {
        return;
    }
    // no error message was extracted, find alternatives
    let msg = if !message.is_empty() {
        Some(message.to_string())
    } else {
        http_status_code(span).map(|code| match span.meta.get(KEY_HTTP_STATUS_TEXT) {
            Some(text) => format!("{code} {text}"),
            None => code,
        })
    };
    if let Some(msg) = msg {
        set_meta(span, META_ERROR_MSG, msg);
    }
}

/// The HTTP status code of the span, whether it was sent as a string or a number.
fn http_status_code(span: &pb::Span) -> Option<String> {
    if let Some(code) = span.meta.get(KEY_HTTP_STATUS_CODE) {
        return Some(code.clone());
    }
    span.metrics
        .get(KEY_HTTP_STATUS_CODE)
        .map(|code| (*code as i64).to_string())
}

fn write_attributes(out: &mut String, attributes: &[KeyValue]) {
    out.push_str(r#""attributes":{"#);
    for (i, kv) in attributes.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(
            out,
            r#""{}":"{}""#,
            kv.key,
            any_value_as_string(kv.value.as_ref())
        );
    }
    out.push('}');
}

/// Marshals span events into their JSON representation.
///
/// Fields are only written when set and string contents are written as they are, as expected by
/// the consumers of the `events` tag.
pub fn marshal_events(events: &[Event]) -> String {
    let mut out = String::from("[");
    for (i, event) in events.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        out.push('{');
        let mut wrote = false;
        if event.time_unix_nano != 0 {
            let _ = write!(out, r#""time_unix_nano":{}"#, event.time_unix_nano);
            wrote = true;
        }
        if !event.name.is_empty() {
            if wrote {
                out.push(',');
            }
            let _ = write!(out, r#""name":"{}""#, event.name);
            wrote = true;
        }
        if !event.attributes.is_empty() {
            if wrote {
                out.push(',');
            }
            write_attributes(&mut out, &event.attributes);
            wrote = true;
        }
        if event.dropped_attributes_count != 0 {
            if wrote {
                out.push(',');
            }
            let _ = write!(
                out,
                r#""dropped_attributes_count":{}"#,
                event.dropped_attributes_count
            );
        }
        out.push('}');
    }
    out.push(']');
    out
}

/// Marshals span links into their JSON representation.
pub fn marshal_links(links: &[Link]) -> String {
    let mut out = String::from("[");
    for (i, link) in links.iter().enumerate() {
        if i > 0 {
            out.push(',');
        }
        let _ = write!(
            out,
            r#"{{"trace_id":"{}","span_id":"{}""#,
            fixed_width_hex::<16>(&link.trace_id),
            fixed_width_hex::<8>(&link.span_id)
        );
        if !link.trace_state.is_empty() {
            let _ = write!(out, r#","trace_state":"{}""#, link.trace_state);
        }
        if !link.attributes.is_empty() {
            out.push(',');
            write_attributes(&mut out, &link.attributes);
        }
        if link.dropped_attributes_count > 0 {
            let _ = write!(
                out,
                r#","dropped_attributes_count":{}"#,
                link.dropped_attributes_count
            );
        }
        out.push('}');
    }
    out.push(']');
    out
}
