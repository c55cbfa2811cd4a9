// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Probabilistic sampling of traces that arrive without a sampling decision.

/// A large prime number ideal for Knuth's multiplicative hashing.
///
/// Warning: do not change this number. It is shared with the other probabilistic samplers in the
/// agent, the Datadog tracing libraries and OpenTelemetry, so that independent services reach the
/// same decision for the same trace ID.
pub const KNUTH_FACTOR: u64 = 1_111_111_111_111_111_111;

/// Metric holding the sampling priority of a span.
pub const KEY_SAMPLING_PRIORITY: &str = "_sampling_priority_v1";
/// Metric holding the event extraction rate of a span.
pub const KEY_SAMPLING_RATE_EVENT_EXTRACTION: &str = "_dd1.sr.eausr";
/// Meta tag recording the mechanism that produced a chunk's sampling decision.
pub const KEY_DECISION_MAKER: &str = "_dd.p.dm";
/// Chunk tag recording the configured sampling rate.
pub const KEY_OTLP_SAMPLING_RATE: &str = "_dd.otlp_sr";

/// Decision maker value for priorities set by the user or a tracing library.
pub const DECISION_MAKER_EXPLICIT: &str = "-4";
/// Decision maker value for priorities computed by [`ProbabilisticSampler`].
pub const DECISION_MAKER_PROBABILISTIC: &str = "-9";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SamplingPriority(pub i32);

impl SamplingPriority {
    pub const USER_DROP: SamplingPriority = SamplingPriority(-1);
    pub const AUTO_DROP: SamplingPriority = SamplingPriority(0);
    pub const AUTO_KEEP: SamplingPriority = SamplingPriority(1);
    pub const USER_KEEP: SamplingPriority = SamplingPriority(2);
}

impl From<f64> for SamplingPriority {
    fn from(value: f64) -> Self {
        SamplingPriority(value as i32)
    }
}

impl From<SamplingPriority> for i32 {
    fn from(value: SamplingPriority) -> Self {
        value.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ProbabilisticSampler {
    rate: f64,
}

impl ProbabilisticSampler {
    /// Creates a sampler keeping the given percentage (0-100) of traces.
    ///
    /// A percentage outside of (0, 100) keeps everything: the user sent the traces from their SDK
    /// and asked for no sampling anywhere else.
    pub fn new(percentage: f64) -> Self {
        let rate = percentage / 100.0;
        let rate = if rate <= 0.0 || rate >= 1.0 || rate.is_nan() {
            1.0
        } else {
            rate
        };
        Self { rate }
    }

    pub fn rate(&self) -> f64 {
        self.rate
    }

    /// The rate as recorded on trace chunks.
    pub fn rate_tag(&self) -> String {
        format!("{:.2}", self.rate)
    }

    /// Returns the sampling priority to apply to the trace with the given ID.
    pub fn sample(&self, trace_id: u64) -> SamplingPriority {
        if self.rate == 1.0 {
            return SamplingPriority::AUTO_KEEP;
        }
        let hash = trace_id.wrapping_mul(KNUTH_FACTOR);
        // keep the trace if its hash falls into the rate percentage of the whole u64 range
        if hash < (self.rate * u64::MAX as f64) as u64 {
            SamplingPriority::AUTO_KEEP
        } else {
            SamplingPriority::AUTO_DROP
        }
    }
}
