// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! The unit of work handed to the downstream trace pipeline.

use datadog_trace_protobuf::pb;

/// Tags describing the client that sent a payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Tags {
    pub lang: String,
    pub lang_version: String,
    pub interpreter: String,
    pub lang_vendor: String,
    pub tracer_version: String,
    pub endpoint_version: String,
}

impl Tags {
    /// Returns the non-empty tags as `key:value` strings.
    pub fn as_tags(&self) -> Vec<String> {
        [
            ("lang", &self.lang),
            ("lang_version", &self.lang_version),
            ("interpreter", &self.interpreter),
            ("lang_vendor", &self.lang_vendor),
            ("tracer_version", &self.tracer_version),
            ("endpoint_version", &self.endpoint_version),
        ]
        .iter()
        .filter(|(_, v)| !v.is_empty())
        .map(|(k, v)| format!("{k}:{v}"))
        .collect()
    }
}

/// Receive statistics for the spans of one payload.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TagStats {
    pub tags: Tags,
    pub spans_received: i64,
    pub traces_received: i64,
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct Payload {
    pub source: TagStats,
    /// stats were already computed by the client, the agent should not compute them again
    pub client_computed_stats: bool,
    /// top-level spans were already marked by the client or by the receiver
    pub client_computed_top_level: bool,
    pub tracer_payload: pb::TracerPayload,
}

impl Payload {
    pub fn span_count(&self) -> usize {
        self.tracer_payload
            .chunks
            .iter()
            .map(|chunk| chunk.spans.len())
            .sum()
    }
}
