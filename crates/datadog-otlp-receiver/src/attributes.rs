// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Attribute keys and value helpers shared by the span converter and the context resolver.

use std::collections::{BTreeMap, HashMap};

use base64::{engine::general_purpose::STANDARD, Engine as _};
use opentelemetry_proto::tonic::common::v1::{any_value::Value, AnyValue, KeyValue};

// OTLP attributes that map onto dedicated span fields
pub const KEY_OPERATION_NAME: &str = "operation.name";
pub const KEY_SERVICE_NAME: &str = "service.name";
pub const KEY_RESOURCE_NAME: &str = "resource.name";
pub const KEY_SPAN_TYPE: &str = "span.type";
pub const KEY_ANALYTICS_EVENT: &str = "analytics.event";
pub const KEY_SAMPLING_PRIORITY: &str = "sampling.priority";

// semantic conventions
pub const KEY_SERVICE_VERSION: &str = "service.version";
pub const KEY_DEPLOYMENT_ENVIRONMENT: &str = "deployment.environment";
pub const KEY_TELEMETRY_SDK_LANGUAGE: &str = "telemetry.sdk.language";
pub const KEY_TELEMETRY_SDK_VERSION: &str = "telemetry.sdk.version";
pub const KEY_CONTAINER_ID: &str = "container.id";
pub const KEY_K8S_POD_UID: &str = "k8s.pod.uid";
pub const KEY_HTTP_METHOD: &str = "http.method";
pub const KEY_HTTP_REQUEST_METHOD: &str = "http.request.method";
pub const KEY_HTTP_ROUTE: &str = "http.route";
pub const KEY_GRPC_PATH: &str = "grpc.path";
pub const KEY_HTTP_STATUS_CODE: &str = "http.status_code";
pub const KEY_HTTP_STATUS_TEXT: &str = "http.status_text";
pub const KEY_MESSAGING_OPERATION: &str = "messaging.operation";
pub const KEY_MESSAGING_DESTINATION: &str = "messaging.destination";
pub const KEY_MESSAGING_DESTINATION_NAME: &str = "messaging.destination.name";
pub const KEY_RPC_METHOD: &str = "rpc.method";
pub const KEY_RPC_SERVICE: &str = "rpc.service";
pub const KEY_DB_SYSTEM: &str = "db.system";
pub const KEY_EXCEPTION_MESSAGE: &str = "exception.message";
pub const KEY_EXCEPTION_TYPE: &str = "exception.type";
pub const KEY_EXCEPTION_STACKTRACE: &str = "exception.stacktrace";
pub const KEY_HOST_NAME: &str = "host.name";
pub const KEY_HOST_ID: &str = "host.id";
pub const KEY_CLOUD_PROVIDER: &str = "cloud.provider";
pub const KEY_CLOUD_PLATFORM: &str = "cloud.platform";
pub const KEY_CLOUD_ACCOUNT_ID: &str = "cloud.account.id";
pub const KEY_AWS_ECS_LAUNCH_TYPE: &str = "aws.ecs.launchtype";
pub const KEY_AWS_ECS_TASK_ARN: &str = "aws.ecs.task.arn";

// Datadog specific keys
pub const KEY_DD_HOSTNAME: &str = "_dd.hostname";
pub const KEY_DATADOG_HOST_NAME: &str = "datadog.host.name";
pub const KEY_STATS_COMPUTED: &str = "_dd.stats_computed";

/// Resource attributes that identify a container, in lookup order.
pub const CONTAINER_ID_KEYS: &[&str] = &[KEY_CONTAINER_ID, KEY_K8S_POD_UID];

/// Resource attributes turned into container tags, with the Datadog tag name they map to.
const CONTAINER_TAG_MAPPINGS: &[(&str, &str)] = &[
    ("container.id", "container_id"),
    ("container.name", "container_name"),
    ("container.image.name", "image_name"),
    ("container.image.tag", "image_tag"),
    ("container.runtime", "runtime"),
    ("cloud.provider", "cloud_provider"),
    ("cloud.region", "region"),
    ("cloud.availability_zone", "zone"),
    ("aws.ecs.task.family", "task_family"),
    ("aws.ecs.task.arn", "task_arn"),
    ("aws.ecs.cluster.arn", "ecs_cluster_name"),
    ("aws.ecs.task.revision", "task_version"),
    ("aws.ecs.container.arn", "ecs_container_name"),
    ("k8s.container.name", "kube_container_name"),
    ("k8s.cluster.name", "kube_cluster_name"),
    ("k8s.deployment.name", "kube_deployment"),
    ("k8s.replicaset.name", "kube_replica_set"),
    ("k8s.statefulset.name", "kube_stateful_set"),
    ("k8s.daemonset.name", "kube_daemon_set"),
    ("k8s.job.name", "kube_job"),
    ("k8s.cronjob.name", "kube_cronjob"),
    ("k8s.namespace.name", "kube_namespace"),
    ("k8s.pod.name", "pod_name"),
];

/// The two destinations an OTLP attribute can end up in on a converted span.
#[derive(Debug, Clone, PartialEq)]
pub enum AttributeValue {
    Numeric(f64),
    Text(String),
}

impl From<Option<&AnyValue>> for AttributeValue {
    fn from(value: Option<&AnyValue>) -> Self {
        match value.and_then(|v| v.value.as_ref()) {
            Some(Value::IntValue(i)) => AttributeValue::Numeric(*i as f64),
            Some(Value::DoubleValue(d)) => AttributeValue::Numeric(*d),
            _ => AttributeValue::Text(any_value_as_string(value)),
        }
    }
}

/// Renders any attribute value as a string: bools and numbers in their usual form, bytes as
/// base64, arrays and maps as JSON.
pub fn any_value_as_string(value: Option<&AnyValue>) -> String {
    match value.and_then(|v| v.value.as_ref()) {
        None => String::new(),
        Some(Value::StringValue(s)) => s.clone(),
        Some(Value::BoolValue(b)) => b.to_string(),
        Some(Value::IntValue(i)) => i.to_string(),
        Some(Value::DoubleValue(d)) => format_double(*d),
        Some(Value::BytesValue(b)) => STANDARD.encode(b),
        Some(other) => value_to_json(other).to_string(),
    }
}

/// Doubles as rendered by OTLP collectors, infinities included.
fn format_double(d: f64) -> String {
    if d == f64::INFINITY {
        "+Inf".to_string()
    } else if d == f64::NEG_INFINITY {
        "-Inf".to_string()
    } else {
        d.to_string()
    }
}

fn value_to_json(value: &Value) -> serde_json::Value {
    match value {
        Value::StringValue(s) => serde_json::Value::from(s.as_str()),
        Value::BoolValue(b) => serde_json::Value::from(*b),
        Value::IntValue(i) => serde_json::Value::from(*i),
        Value::DoubleValue(d) => serde_json::Value::from(*d),
        Value::BytesValue(b) => serde_json::Value::from(STANDARD.encode(b)),
        Value::ArrayValue(array) => serde_json::Value::Array(
            array
                .values
                .iter()
                .map(|v| {
                    v.value
                        .as_ref()
                        .map(value_to_json)
                        .unwrap_or(serde_json::Value::Null)
                })
                .collect(),
        ),
        Value::KvlistValue(list) => serde_json::Value::Object(
            list.values
                .iter()
                .map(|kv| {
                    let v = kv
                        .value
                        .as_ref()
                        .and_then(|v| v.value.as_ref())
                        .map(value_to_json)
                        .unwrap_or(serde_json::Value::Null);
                    (kv.key.clone(), v)
                })
                .collect(),
        ),
    }
}

/// Flattens a list of attributes into a string map. Later duplicates win.
pub fn attributes_to_map(attributes: &[KeyValue]) -> HashMap<String, String> {
    attributes
        .iter()
        .map(|kv| (kv.key.clone(), any_value_as_string(kv.value.as_ref())))
        .collect()
}

/// Looks up a string attribute in an attribute list. Returns `None` for missing or empty values.
pub fn get_attribute<'a>(attributes: &'a [KeyValue], key: &str) -> Option<&'a str> {
    attributes
        .iter()
        .rev()
        .find(|kv| kv.key == key)
        .and_then(|kv| kv.value.as_ref())
        .and_then(|v| match v.value.as_ref() {
            Some(Value::StringValue(s)) if !s.is_empty() => Some(s.as_str()),
            _ => None,
        })
}

/// Checks each of the given keys in the map and returns the first key-value pair with a
/// non-empty value.
pub fn get_first_from_map<'a>(
    map: &'a HashMap<String, String>,
    keys: &[&'a str],
) -> Option<(&'a str, &'a str)> {
    keys.iter().find_map(|key| match map.get(*key) {
        Some(val) if !val.is_empty() => Some((*key, val.as_str())),
        _ => None,
    })
}

/// Extracts the container related tags carried by resource attributes, keyed by Datadog tag
/// name.
pub fn container_tags_from_resource_attributes(
    attributes: &HashMap<String, String>,
) -> BTreeMap<String, String> {
    CONTAINER_TAG_MAPPINGS
        .iter()
        .filter_map(|(attr, tag)| match attributes.get(*attr) {
            Some(val) if !val.is_empty() => Some((tag.to_string(), val.clone())),
            _ => None,
        })
        .collect()
}
