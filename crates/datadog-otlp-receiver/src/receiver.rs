// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use datadog_trace_protobuf::pb;
use hyper::HeaderMap;
use opentelemetry_proto::tonic::collector::trace::v1::{
    ExportTraceServiceRequest, ExportTraceServiceResponse,
};
use opentelemetry_proto::tonic::common::v1::InstrumentationScope;
use opentelemetry_proto::tonic::trace::v1::ResourceSpans;
use prost::Message;
use tokio::sync::mpsc::Sender;
use tracing::{debug, error};

use crate::assembler::{self, TAG_CONTAINER_TAGS};
use crate::attributes::attributes_to_map;
use crate::config::{Config, FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND};
use crate::container::{ContainerIdProvider, ContainerTagger, HeaderContainerIdProvider};
use crate::dispatcher::PayloadDispatcher;
use crate::error::ReceiverError;
use crate::http_utils::{tags_from_headers, verify_request_content_length};
use crate::payload::{Payload, TagStats};
use crate::resolver::ContextResolver;
use crate::sampler::ProbabilisticSampler;
use crate::source::{AttributesTranslator, Source, SourceProvider};
use crate::span_converter::SpanConverter;
use crate::stats::{
    StatsReporter, METRIC_COMPUTE_TOP_LEVEL_BY_SPAN_KIND, METRIC_PAYLOAD,
    METRIC_PROCESS_REQUEST_MS, METRIC_SPANS, METRIC_TRACES,
};
use crate::trace_grouper::TraceGrouper;

#[async_trait]
pub trait TraceReceiver {
    /// Converts every resource span group of the request into a payload and sends it downstream.
    async fn export(
        &self,
        headers: &HeaderMap,
        request: ExportTraceServiceRequest,
    ) -> Result<ExportTraceServiceResponse, ReceiverError>;
}

/// Translates OTLP traces into Datadog payloads.
///
/// All per request state is local to the call, so a single receiver can be shared between
/// concurrent requests.
pub struct OtlpReceiver {
    config: Arc<Config>,
    sampler: ProbabilisticSampler,
    dispatcher: PayloadDispatcher,
    stats: Arc<dyn StatsReporter>,
    source_provider: Arc<dyn SourceProvider + Send + Sync>,
    container_id_provider: Arc<dyn ContainerIdProvider + Send + Sync>,
    container_tagger: Option<Arc<dyn ContainerTagger + Send + Sync>>,
}

impl OtlpReceiver {
    pub fn new(out: Sender<Payload>, config: Arc<Config>, stats: Arc<dyn StatsReporter>) -> Self {
        let compute_top_level = config.has_feature(FEATURE_COMPUTE_TOP_LEVEL_BY_SPAN_KIND);
        stats.gauge(
            METRIC_COMPUTE_TOP_LEVEL_BY_SPAN_KIND,
            if compute_top_level { 1.0 } else { 0.0 },
            &[],
        );
        Self {
            sampler: ProbabilisticSampler::new(config.otlp_receiver.probabilistic_sampling),
            dispatcher: PayloadDispatcher::new(out),
            stats,
            source_provider: Arc::new(AttributesTranslator::new()),
            container_id_provider: Arc::new(HeaderContainerIdProvider::new(
                config.container_proc_root.as_str(),
            )),
            container_tagger: None,
            config,
        }
    }

    pub fn with_source_provider(
        mut self,
        provider: Arc<dyn SourceProvider + Send + Sync>,
    ) -> Self {
        self.source_provider = provider;
        self
    }

    pub fn with_container_id_provider(
        mut self,
        provider: Arc<dyn ContainerIdProvider + Send + Sync>,
    ) -> Self {
        self.container_id_provider = provider;
        self
    }

    pub fn with_container_tagger(mut self, tagger: Arc<dyn ContainerTagger + Send + Sync>) -> Self {
        self.container_tagger = Some(tagger);
        self
    }

    /// Converts one resource span group into a payload, returning it together with the source
    /// identified while processing it.
    pub fn build_payload(&self, headers: &HeaderMap, rspans: &ResourceSpans) -> (Payload, Source) {
        let resource_attributes = rspans
            .resource
            .as_ref()
            .map(|r| r.attributes.as_slice())
            .unwrap_or_default();
        let rattr = attributes_to_map(resource_attributes);
        let mut resolver = ContextResolver::new(
            headers,
            resource_attributes,
            &rattr,
            self.source_provider.as_ref(),
            self.container_id_provider.as_ref(),
        );

        let converter = SpanConverter::new(&self.config);
        let default_scope = InstrumentationScope::default();
        let mut grouper = TraceGrouper::new();
        for scope_spans in &rspans.scope_spans {
            let scope = scope_spans.scope.as_ref().unwrap_or(&default_scope);
            for span in &scope_spans.spans {
                let span = converter.convert(&rattr, scope, span);
                resolver.observe_span(&span);
                grouper.push(span);
            }
        }

        let context = resolver.finish(&self.config);
        let tag_stats = TagStats {
            tags: context.tags,
            spans_received: grouper.span_count() as i64,
            traces_received: grouper.trace_count() as i64,
        };
        let tags = tag_stats.tags.as_tags();
        self.stats
            .count(METRIC_SPANS, tag_stats.spans_received, &tags);
        self.stats
            .count(METRIC_TRACES, tag_stats.traces_received, &tags);

        let payload_tags = assembler::container_tags(
            &rattr,
            &context.container_id,
            &context.source,
            self.container_tagger.as_deref().map(|t| t as &dyn ContainerTagger),
        )
        .map(|tags| HashMap::from([(TAG_CONTAINER_TAGS.to_string(), tags)]))
        .unwrap_or_default();

        let tracer_payload = pb::TracerPayload {
            hostname: context.hostname,
            chunks: assembler::create_chunks(grouper, &self.sampler),
            env: context.env,
            container_id: context.container_id,
            language_name: tag_stats.tags.lang.clone(),
            language_version: tag_stats.tags.lang_version.clone(),
            tracer_version: tag_stats.tags.tracer_version.clone(),
            tags: payload_tags,
            ..Default::default()
        };
        let payload = Payload {
            client_computed_stats: assembler::client_computed_stats(&rattr, headers),
            client_computed_top_level: assembler::client_computed_top_level(&self.config, headers),
            source: tag_stats,
            tracer_payload,
        };
        (payload, context.source)
    }

    /// Processes one resource span group and sends the resulting payload downstream.
    pub async fn receive_resource_spans(
        &self,
        headers: &HeaderMap,
        rspans: &ResourceSpans,
    ) -> Result<Source, ReceiverError> {
        let (payload, source) = self.build_payload(headers, rspans);
        debug!(
            "Built payload from {} with {} chunks",
            source,
            payload.tracer_payload.chunks.len()
        );
        self.dispatcher.dispatch(payload).await?;
        Ok(source)
    }

    /// Processes every resource span group of the request, in order.
    pub async fn process_request(
        &self,
        headers: &HeaderMap,
        request: &ExportTraceServiceRequest,
    ) -> Result<(), ReceiverError> {
        for rspans in &request.resource_spans {
            self.receive_resource_spans(headers, rspans).await?;
        }
        Ok(())
    }

    /// Decodes a protobuf encoded export request and exports it.
    pub async fn process_body(
        &self,
        headers: &HeaderMap,
        body: &[u8],
    ) -> Result<ExportTraceServiceResponse, ReceiverError> {
        let max_length = self.config.max_request_content_length;
        verify_request_content_length(headers, max_length)?;
        if body.len() > max_length {
            return Err(ReceiverError::PayloadTooLarge {
                size: body.len(),
                limit: max_length,
            });
        }
        let request = ExportTraceServiceRequest::decode(body).map_err(|e| {
            error!("Error decoding OTLP export request: {e}");
            ReceiverError::from(e)
        })?;
        self.export(headers, request).await
    }
}

#[async_trait]
impl TraceReceiver for OtlpReceiver {
    async fn export(
        &self,
        headers: &HeaderMap,
        request: ExportTraceServiceRequest,
    ) -> Result<ExportTraceServiceResponse, ReceiverError> {
        let start = Instant::now();
        let header_tags = tags_from_headers(headers);
        self.stats.count(METRIC_PAYLOAD, 1, &header_tags);
        let result = self.process_request(headers, &request).await;
        self.stats
            .timing(METRIC_PROCESS_REQUEST_MS, start.elapsed(), &[]);
        result?;
        Ok(ExportTraceServiceResponse::default())
    }
}
