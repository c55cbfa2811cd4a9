// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::{BTreeMap, HashMap};

use datadog_trace_protobuf::pb;
use hyper::HeaderMap;
use tracing::debug;

use crate::attributes::{container_tags_from_resource_attributes, KEY_STATS_COMPUTED};
use crate::config::{Config, FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND};
use crate::container::ContainerTagger;
use crate::http_utils::{header_value, HEADER_COMPUTED_STATS, HEADER_COMPUTED_TOP_LEVEL};
use crate::sampler::{
    ProbabilisticSampler, DECISION_MAKER_EXPLICIT, DECISION_MAKER_PROBABILISTIC,
    KEY_DECISION_MAKER, KEY_OTLP_SAMPLING_RATE,
};
use crate::source::{Source, SourceKind};
use crate::span_converter::set_meta;
use crate::trace_grouper::TraceGrouper;

/// Payload tag holding the container tags of the resource.
pub const TAG_CONTAINER_TAGS: &str = "_dd.tags.container";

/// Builds one chunk per trace. Traces without an explicit sampling priority are sampled
/// with `sampler`, and the first span of each chunk records where its decision came from.
pub fn create_chunks(grouper: TraceGrouper, sampler: &ProbabilisticSampler) -> Vec<pb::TraceChunk> {
    let rate = sampler.rate_tag();
    let mut chunks = Vec::with_capacity(grouper.trace_count());
    for (trace_id, mut spans, priority) in grouper.into_traces() {
        let Some(first) = spans.first_mut() else {
            continue;
        };
        let (priority, decision_maker) = match priority {
            // a manual decision has been made by the user
            Some(priority) => (priority, DECISION_MAKER_EXPLICIT),
            None => (sampler.sample(trace_id), DECISION_MAKER_PROBABILISTIC),
        };
        set_meta(first, KEY_DECISION_MAKER, decision_maker.to_string());
        chunks.push(pb::TraceChunk {
            priority: priority.into(),
            spans,
            tags: HashMap::from([(KEY_OTLP_SAMPLING_RATE.to_string(), rate.clone())]),
            ..Default::default()
        });
    }
    chunks
}

/// Whether the client already computed stats for these spans.
pub fn client_computed_stats(rattr: &HashMap<String, String>, headers: &HeaderMap) -> bool {
    rattr
        .get(KEY_STATS_COMPUTED)
        .is_some_and(|v| !v.is_empty())
        || !header_value(headers, HEADER_COMPUTED_STATS).is_empty()
}

/// Whether top-level spans are already marked, by the client or by the span converter.
pub fn client_computed_top_level(config: &Config, headers: &HeaderMap) -> bool {
    config.has_feature(FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND)
        || !header_value(headers, HEADER_COMPUTED_TOP_LEVEL).is_empty()
}

/// Aggregates the container tags of a payload into the comma separated form used by the
/// `_dd.tags.container` tag. Returns `None` when there is nothing to attach.
pub fn container_tags(
    rattr: &HashMap<String, String>,
    container_id: &str,
    source: &Source,
    tagger: Option<&dyn ContainerTagger>,
) -> Option<String> {
    let resource_tags: BTreeMap<String, String> = container_tags_from_resource_attributes(rattr);
    let mut tags: Vec<String> = resource_tags
        .iter()
        .map(|(k, v)| format!("{k}:{v}"))
        .collect();

    if let Some(extra) = tagger
        .filter(|_| !container_id.is_empty())
        .and_then(|tagger| tagger.container_tags(container_id))
        .filter(|tags| !tags.is_empty())
    {
        tags.push(extra);
    }
    // the source only describes the container when nothing else did
    if tags.is_empty() && source.kind == SourceKind::AwsEcsFargate {
        tags.push(source.tag());
    }

    if tags.is_empty() {
        return None;
    }
    let tags = tags.join(",");
    debug!("Container tags for the payload: {}", tags);
    Some(tags)
}

#[cfg(test)]
mod tests {
    use hyper::header::HeaderValue;

    use super::*;
    use crate::sampler::{SamplingPriority, KEY_SAMPLING_PRIORITY};

    struct StaticTagger(&'static str);

    impl ContainerTagger for StaticTagger {
        fn container_tags(&self, _container_id: &str) -> Option<String> {
            Some(self.0.to_string())
        }
    }

    fn span(trace_id: u64, span_id: u64) -> pb::Span {
        pb::Span {
            trace_id,
            span_id,
            ..Default::default()
        }
    }

    #[test]
    fn test_explicit_priority_wins() {
        let mut grouper = TraceGrouper::new();
        grouper.push(span(9, 1));
        let mut prioritized = span(9, 2);
        prioritized
            .metrics
            .insert(KEY_SAMPLING_PRIORITY.to_string(), 2.0);
        grouper.push(prioritized);

        // 9 would be dropped by a 50% sampler
        let chunks = create_chunks(grouper, &ProbabilisticSampler::new(50.0));
        assert_eq!(chunks.len(), 1);
        let chunk = &chunks[0];
        assert_eq!(chunk.priority, i32::from(SamplingPriority::USER_KEEP));
        assert_eq!(chunk.spans.len(), 2);
        assert_eq!(chunk.spans[0].meta["_dd.p.dm"], "-4");
        assert!(!chunk.spans[1].meta.contains_key("_dd.p.dm"));
        assert_eq!(chunk.tags["_dd.otlp_sr"], "0.50");
    }

    #[test]
    fn test_decision_maker_replaces_metric() {
        let mut grouper = TraceGrouper::new();
        let mut first = span(3, 1);
        first.metrics.insert("_dd.p.dm".to_string(), 4.0);
        grouper.push(first);

        let chunks = create_chunks(grouper, &ProbabilisticSampler::new(100.0));
        let span = &chunks[0].spans[0];
        assert_eq!(span.meta["_dd.p.dm"], "-9");
        assert!(!span.metrics.contains_key("_dd.p.dm"));
    }

    #[test]
    fn test_sampler_decides_without_priority() {
        let mut grouper = TraceGrouper::new();
        grouper.push(span(9, 1));
        grouper.push(span(1, 2));

        let chunks = create_chunks(grouper, &ProbabilisticSampler::new(50.0));
        assert_eq!(chunks.len(), 2);
        assert_eq!(chunks[0].priority, i32::from(SamplingPriority::AUTO_DROP));
        assert_eq!(chunks[1].priority, i32::from(SamplingPriority::AUTO_KEEP));
        for chunk in &chunks {
            assert_eq!(chunk.spans[0].meta["_dd.p.dm"], "-9");
        }
    }

    #[test]
    fn test_rate_tag_at_default_rate() {
        let mut grouper = TraceGrouper::new();
        grouper.push(span(1, 1));
        let chunks = create_chunks(grouper, &ProbabilisticSampler::new(100.0));
        assert_eq!(chunks[0].tags["_dd.otlp_sr"], "1.00");
        assert_eq!(chunks[0].priority, 1);
    }

    #[test]
    fn test_client_computed_flags() {
        let mut headers = HeaderMap::new();
        let rattr = HashMap::new();
        assert!(!client_computed_stats(&rattr, &headers));
        assert!(!client_computed_top_level(&Config::default(), &headers));

        let rattr = HashMap::from([("_dd.stats_computed".to_string(), "true".to_string())]);
        assert!(client_computed_stats(&rattr, &headers));

        headers.insert(
            "datadog-client-computed-stats",
            HeaderValue::from_static("yes"),
        );
        headers.insert(
            "datadog-client-computed-top-level",
            HeaderValue::from_static("yes"),
        );
        assert!(client_computed_stats(&HashMap::new(), &headers));
        assert!(client_computed_top_level(&Config::default(), &headers));

        let mut config = Config::default();
        config
            .features
            .insert(FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND.to_string());
        assert!(client_computed_top_level(&config, &HeaderMap::new()));
    }

    #[test]
    fn test_container_tags() {
        let host = Source::hostname("host");
        assert_eq!(container_tags(&HashMap::new(), "", &host, None), None);

        let rattr = HashMap::from([
            ("k8s.pod.name".to_string(), "pod".to_string()),
            ("container.id".to_string(), "cid".to_string()),
        ]);
        assert_eq!(
            container_tags(&rattr, "cid", &host, None).as_deref(),
            Some("container_id:cid,pod_name:pod")
        );
        assert_eq!(
            container_tags(&rattr, "cid", &host, Some(&StaticTagger("image_name:nginx")))
                .as_deref(),
            Some("container_id:cid,pod_name:pod,image_name:nginx")
        );
        // the tagger is only asked about known containers
        assert_eq!(
            container_tags(&HashMap::new(), "", &host, Some(&StaticTagger("image_name:x"))),
            None
        );
    }

    #[test]
    fn test_fargate_container_tags() {
        let fargate = Source::aws_ecs_fargate("arn:task");
        assert_eq!(
            container_tags(&HashMap::new(), "", &fargate, None).as_deref(),
            Some("task_arn:arn:task")
        );
        let rattr = HashMap::from([
            ("cloud.provider".to_string(), "aws".to_string()),
            ("aws.ecs.task.arn".to_string(), "arn:task".to_string()),
        ]);
        assert_eq!(
            container_tags(&rattr, "", &fargate, None).as_deref(),
            Some("cloud_provider:aws,task_arn:arn:task")
        );
        assert_eq!(
            container_tags(&HashMap::new(), "cid", &fargate, Some(&StaticTagger("a:b")))
                .as_deref(),
            Some("a:b")
        );
    }
}
