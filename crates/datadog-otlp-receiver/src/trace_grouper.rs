// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;

use datadog_trace_protobuf::pb;
use indexmap::IndexMap;

use crate::sampler::{SamplingPriority, KEY_SAMPLING_PRIORITY};

/// Groups converted spans by trace ID, keeping the order in which traces were first seen.
#[derive(Debug, Default)]
pub struct TraceGrouper {
    traces: IndexMap<u64, Vec<pb::Span>>,
    priorities: HashMap<u64, SamplingPriority>,
}

impl TraceGrouper {
    pub fn new() -> Self {
        Self::default()
    }

    /// Appends the span to its trace. A span carrying a sampling priority metric sets the priority
    /// of the whole trace, the last one seen wins.
    pub fn push(&mut self, span: pb::Span) {
        if let Some(priority) = span.metrics.get(KEY_SAMPLING_PRIORITY) {
            self.priorities
                .insert(span.trace_id, SamplingPriority::from(*priority));
        }
        self.traces.entry(span.trace_id).or_default().push(span);
    }

    pub fn span_count(&self) -> usize {
        self.traces.values().map(Vec::len).sum()
    }

    pub fn trace_count(&self) -> usize {
        self.traces.len()
    }

    /// Consumes the grouper, yielding each trace with its explicit sampling priority if any.
    pub fn into_traces(
        self,
    ) -> impl Iterator<Item = (u64, Vec<pb::Span>, Option<SamplingPriority>)> {
        let priorities = self.priorities;
        self.traces
            .into_iter()
            .map(move |(trace_id, spans)| (trace_id, spans, priorities.get(&trace_id).copied()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn span(trace_id: u64, span_id: u64, priority: Option<f64>) -> pb::Span {
        let mut span = pb::Span {
            trace_id,
            span_id,
            ..Default::default()
        };
        if let Some(p) = priority {
            span.metrics.insert(KEY_SAMPLING_PRIORITY.to_string(), p);
        }
        span
    }

    #[test]
    fn test_groups_in_first_seen_order() {
        let mut grouper = TraceGrouper::new();
        for (trace_id, span_id) in [(7, 1), (3, 2), (7, 3), (5, 4), (3, 5)] {
            grouper.push(span(trace_id, span_id, None));
        }
        assert_eq!(grouper.span_count(), 5);
        assert_eq!(grouper.trace_count(), 3);

        let traces: Vec<_> = grouper
            .into_traces()
            .map(|(id, spans, _)| (id, spans.iter().map(|s| s.span_id).collect::<Vec<_>>()))
            .collect();
        assert_eq!(traces, vec![(7, vec![1, 3]), (3, vec![2, 5]), (5, vec![4])]);
    }

    #[test]
    fn test_last_priority_wins() {
        let mut grouper = TraceGrouper::new();
        grouper.push(span(1, 1, Some(2.0)));
        grouper.push(span(1, 2, None));
        grouper.push(span(1, 3, Some(-1.0)));
        grouper.push(span(2, 4, None));

        let priorities: Vec<_> = grouper.into_traces().map(|(_, _, p)| p).collect();
        assert_eq!(priorities, vec![Some(SamplingPriority::USER_DROP), None]);
    }
}
