// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::time::Duration;

use tracing::trace;

pub const METRIC_SPANS: &str = "datadog.trace_agent.otlp.spans";
pub const METRIC_TRACES: &str = "datadog.trace_agent.otlp.traces";
pub const METRIC_PAYLOAD: &str = "datadog.trace_agent.otlp.payload";
pub const METRIC_PROCESS_REQUEST_MS: &str = "datadog.trace_agent.otlp.process_grpc_request_ms";
pub const METRIC_COMPUTE_TOP_LEVEL_BY_SPAN_KIND: &str =
    "datadog.trace_agent.otlp.compute_top_level_by_span_kind";

/// Sink for the receiver's internal telemetry.
pub trait StatsReporter: Send + Sync {
    fn count(&self, name: &str, value: i64, tags: &[String]);
    fn gauge(&self, name: &str, value: f64, tags: &[String]);
    fn timing(&self, name: &str, value: Duration, tags: &[String]);
}

/// A [`StatsReporter`] that only traces what it is given.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopStatsReporter;

impl StatsReporter for NoopStatsReporter {
    fn count(&self, name: &str, value: i64, tags: &[String]) {
        trace!("count {name}={value} {tags:?}");
    }

    fn gauge(&self, name: &str, value: f64, tags: &[String]) {
        trace!("gauge {name}={value} {tags:?}");
    }

    fn timing(&self, name: &str, value: Duration, tags: &[String]) {
        trace!("timing {name}={value:?} {tags:?}");
    }
}
