// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{HashMap, HashSet};
use std::env;

pub const FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND: &str =
    "enable_otlp_compute_top_level_by_span_kind";

const DEFAULT_PROBABILISTIC_SAMPLING: f64 = 100.0;
const DEFAULT_CONTAINER_PROC_ROOT: &str = "/proc";

/// Settings of the OTLP receiver itself.
#[derive(Debug, Clone, PartialEq)]
pub struct OtlpReceiverConfig {
    /// percentage of traces to keep, between 0 and 100
    pub probabilistic_sampling: f64,
    pub span_name_as_resource_name: bool,
    pub span_name_remappings: HashMap<String, String>,
}

impl Default for OtlpReceiverConfig {
    fn default() -> Self {
        Self {
            probabilistic_sampling: DEFAULT_PROBABILISTIC_SAMPLING,
            span_name_as_resource_name: false,
            span_name_remappings: HashMap::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Config {
    /// fallback hostname, used when nothing in the payload identifies a source
    pub hostname: String,
    /// fallback environment, used when neither resources nor spans carry one
    pub default_env: String,
    pub container_proc_root: String,
    pub features: HashSet<String>,
    pub max_request_content_length: usize,
    pub otlp_receiver: OtlpReceiverConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            hostname: String::new(),
            default_env: String::new(),
            container_proc_root: DEFAULT_CONTAINER_PROC_ROOT.to_string(),
            features: HashSet::new(),
            max_request_content_length: 10 * 1024 * 1024, // 10MB in Bytes
            otlp_receiver: OtlpReceiverConfig::default(),
        }
    }
}

impl Config {
    pub fn new() -> Result<Config, Box<dyn std::error::Error>> {
        let hostname = env::var("DD_HOSTNAME")
            .or_else(|_| env::var("HOSTNAME"))
            .unwrap_or_default();

        let probabilistic_sampling =
            match env::var("DD_OTLP_CONFIG_TRACES_PROBABILISTIC_SAMPLER_SAMPLING_PERCENTAGE") {
                Ok(val) => val.trim().parse::<f64>().map_err(|_| {
                    anyhow::anyhow!("Invalid probabilistic sampling percentage: {val}")
                })?,
                Err(_) => DEFAULT_PROBABILISTIC_SAMPLING,
            };

        let span_name_as_resource_name =
            match env::var("DD_OTLP_CONFIG_TRACES_SPAN_NAME_AS_RESOURCE_NAME") {
                Ok(val) => val.trim().to_lowercase().parse::<bool>().map_err(|_| {
                    anyhow::anyhow!("Invalid value for span name as resource name: {val}")
                })?,
                Err(_) => false,
            };

        let span_name_remappings = env::var("DD_OTLP_CONFIG_TRACES_SPAN_NAME_REMAPPINGS")
            .map(|val| parse_span_name_remappings(&val))
            .unwrap_or_default();

        let features = env::var("DD_APM_FEATURES")
            .map(|val| parse_features(&val))
            .unwrap_or_default();

        Ok(Config {
            hostname,
            default_env: env::var("DD_ENV").unwrap_or_default(),
            container_proc_root: env::var("DD_CONTAINER_PROC_ROOT")
                .unwrap_or_else(|_| DEFAULT_CONTAINER_PROC_ROOT.to_string()),
            features,
            otlp_receiver: OtlpReceiverConfig {
                probabilistic_sampling,
                span_name_as_resource_name,
                span_name_remappings,
            },
            ..Default::default()
        })
    }

    pub fn has_feature(&self, feature: &str) -> bool {
        self.features.contains(feature)
    }
}

fn parse_features(val: &str) -> HashSet<String> {
    // Space-separated values are the standard. For compatibility reasons we also support
    // comma-separated values.
    val.replace(',', " ")
        .split_whitespace()
        .map(str::to_string)
        .collect()
}

/// Accepts either a JSON object (`{"from":"to"}`) or `from:to` pairs separated by commas or
/// spaces. Pairs that do not split into exactly two parts are skipped.
fn parse_span_name_remappings(val: &str) -> HashMap<String, String> {
    if let Ok(map) = serde_json::from_str::<HashMap<String, String>>(val) {
        return map;
    }
    let normalized = val.replace(',', " ");
    let mut remappings = HashMap::new();
    for kv in normalized.split_whitespace() {
        let parts = kv.split(':').collect::<Vec<&str>>();
        if parts.len() == 2 {
            remappings.insert(parts[0].to_string(), parts[1].to_string());
        }
    }
    remappings
}
