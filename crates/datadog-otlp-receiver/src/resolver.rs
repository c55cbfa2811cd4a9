// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Resolution of the payload level context of a resource span group: source, environment,
//! container ID and client language.
//!
//! Every signal is resolved by an ordered cascade of small lookup functions. Resource level
//! lookups run when the resolver is created; span level fallbacks run for each converted span
//! through [`ContextResolver::observe_span`], and only for signals that are still unresolved.

use std::collections::HashMap;

use datadog_trace_normalization::normalize_utils::normalize_tag;
use datadog_trace_protobuf::pb;
use hyper::HeaderMap;
use opentelemetry_proto::tonic::common::v1::KeyValue;
use tracing::debug;

use crate::attributes::{
    get_first_from_map, CONTAINER_ID_KEYS, KEY_DATADOG_HOST_NAME, KEY_DD_HOSTNAME,
    KEY_DEPLOYMENT_ENVIRONMENT, KEY_TELEMETRY_SDK_LANGUAGE, KEY_TELEMETRY_SDK_VERSION,
};
use crate::config::Config;
use crate::container::ContainerIdProvider;
use crate::http_utils::{
    header_value, ENDPOINT_VERSION, HEADER_LANG, HEADER_LANG_INTERPRETER,
    HEADER_LANG_INTERPRETER_VENDOR, HEADER_LANG_VERSION,
};
use crate::payload::Tags;
use crate::source::{Source, SourceKind, SourceProvider};

const META_ENV: &str = "env";
const TRACER_VERSION_PREFIX: &str = "otlp-";

/// Span meta tags that can identify the host, in lookup order.
const SPAN_HOSTNAME_KEYS: &[&str] = &[KEY_DD_HOSTNAME, KEY_DATADOG_HOST_NAME];

/// The resolved context of a resource span group.
#[derive(Debug, Clone, PartialEq)]
pub struct ResolvedContext {
    pub source: Source,
    /// empty unless the source is a host
    pub hostname: String,
    pub env: String,
    pub container_id: String,
    pub tags: Tags,
}

fn source_from_provider(provider: &dyn SourceProvider, attributes: &[KeyValue]) -> Option<Source> {
    provider.resource_to_source(attributes)
}

fn source_from_resource_hostname(rattr: &HashMap<String, String>) -> Option<Source> {
    get_first_from_map(rattr, &[KEY_DD_HOSTNAME]).map(|(_, host)| Source::hostname(host))
}

fn source_from_span(span: &pb::Span) -> Option<Source> {
    get_first_from_map(&span.meta, SPAN_HOSTNAME_KEYS).map(|(_, host)| Source::hostname(host))
}

fn env_from_resource(rattr: &HashMap<String, String>) -> Option<String> {
    get_first_from_map(rattr, &[KEY_DEPLOYMENT_ENVIRONMENT]).map(|(_, env)| env.to_string())
}

fn env_from_span(span: &pb::Span) -> Option<String> {
    get_first_from_map(&span.meta, &[META_ENV]).map(|(_, env)| env.to_string())
}

fn container_id_from_resource(rattr: &HashMap<String, String>) -> Option<String> {
    get_first_from_map(rattr, CONTAINER_ID_KEYS).map(|(_, cid)| cid.to_string())
}

fn container_id_from_provider(
    provider: &dyn ContainerIdProvider,
    headers: &HeaderMap,
) -> Option<String> {
    Some(provider.get_container_id(headers)).filter(|cid| !cid.is_empty())
}

fn container_id_from_span(span: &pb::Span) -> Option<String> {
    get_first_from_map(&span.meta, CONTAINER_ID_KEYS).map(|(_, cid)| cid.to_string())
}

fn lang_from_resource(rattr: &HashMap<String, String>) -> Option<String> {
    get_first_from_map(rattr, &[KEY_TELEMETRY_SDK_LANGUAGE]).map(|(_, lang)| lang.to_string())
}

fn lang_from_headers(headers: &HeaderMap) -> Option<String> {
    Some(header_value(headers, HEADER_LANG))
        .filter(|lang| !lang.is_empty())
        .map(str::to_string)
}

/// Resolves the context of one resource span group.
#[derive(Debug)]
pub struct ContextResolver {
    source: Option<Source>,
    env: Option<String>,
    container_id: Option<String>,
    tags: Tags,
}

impl ContextResolver {
    /// Runs the resource and header level lookups.
    pub fn new(
        headers: &HeaderMap,
        resource_attributes: &[KeyValue],
        rattr: &HashMap<String, String>,
        source_provider: &dyn SourceProvider,
        container_id_provider: &dyn ContainerIdProvider,
    ) -> Self {
        let source = source_from_provider(source_provider, resource_attributes)
            .or_else(|| source_from_resource_hostname(rattr));
        let env = env_from_resource(rattr);
        let container_id = container_id_from_resource(rattr)
            .or_else(|| container_id_from_provider(container_id_provider, headers));
        let lang = lang_from_resource(rattr)
            .or_else(|| lang_from_headers(headers))
            .unwrap_or_default();
        let sdk_version = rattr
            .get(KEY_TELEMETRY_SDK_VERSION)
            .map(String::as_str)
            .unwrap_or_default();

        let tags = Tags {
            lang,
            lang_version: header_value(headers, HEADER_LANG_VERSION).to_string(),
            interpreter: header_value(headers, HEADER_LANG_INTERPRETER).to_string(),
            lang_vendor: header_value(headers, HEADER_LANG_INTERPRETER_VENDOR).to_string(),
            tracer_version: format!("{TRACER_VERSION_PREFIX}{sdk_version}"),
            endpoint_version: ENDPOINT_VERSION.to_string(),
        };

        Self {
            source,
            env,
            container_id,
            tags,
        }
    }

    /// Fills the signals that are still unresolved from a converted span.
    pub fn observe_span(&mut self, span: &pb::Span) {
        if self.source.is_none() {
            self.source = source_from_span(span);
        }
        if self.env.is_none() {
            self.env = env_from_span(span);
        }
        if self.container_id.is_none() {
            self.container_id = container_id_from_span(span);
        }
    }

    /// Applies the configured defaults to the signals that are still unresolved.
    pub fn finish(self, config: &Config) -> ResolvedContext {
        let source = self.source.unwrap_or_else(|| {
            debug!(
                "No source found in the payload, using the configured hostname {:?}",
                config.hostname
            );
            Source::hostname(config.hostname.as_str())
        });
        let hostname = match source.kind {
            SourceKind::Hostname => source.identifier.clone(),
            SourceKind::AwsEcsFargate => String::new(),
        };
        let env = self.env.unwrap_or_else(|| config.default_env.clone());

        ResolvedContext {
            source,
            hostname,
            env: {
                let mut env = env;
                normalize_tag(&mut env);
                env
            },
            container_id: self.container_id.unwrap_or_default(),
            tags: self.tags,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};

    use hyper::header::HeaderValue;

    use super::*;
    use crate::attributes::attributes_to_map;
    use crate::attributes::test_utils::kv_str;
    use crate::source::AttributesTranslator;

    #[derive(Default)]
    struct CountingContainerIdProvider {
        container_id: String,
        calls: AtomicUsize,
    }

    impl ContainerIdProvider for CountingContainerIdProvider {
        fn get_container_id(&self, _headers: &HeaderMap) -> String {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.container_id.clone()
        }
    }

    fn resolver(
        headers: &HeaderMap,
        attributes: &[KeyValue],
        cid_provider: &dyn ContainerIdProvider,
    ) -> ContextResolver {
        ContextResolver::new(
            headers,
            attributes,
            &attributes_to_map(attributes),
            &AttributesTranslator::new(),
            cid_provider,
        )
    }

    fn span_with_meta(meta: &[(&str, &str)]) -> pb::Span {
        pb::Span {
            meta: meta
                .iter()
                .map(|(k, v)| (k.to_string(), v.to_string()))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_resource_container_id_skips_provider() {
        let provider = CountingContainerIdProvider {
            container_id: "from-provider".to_string(),
            ..Default::default()
        };
        let mut resolver = resolver(
            &HeaderMap::new(),
            &[kv_str("container.id", "abc")],
            &provider,
        );
        resolver.observe_span(&span_with_meta(&[("k8s.pod.uid", "pod")]));
        let ctx = resolver.finish(&Config::default());
        assert_eq!(ctx.container_id, "abc");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 0);
    }

    #[test]
    fn test_container_id_cascade() {
        let provider = CountingContainerIdProvider {
            container_id: "from-provider".to_string(),
            ..Default::default()
        };
        let ctx = resolver(&HeaderMap::new(), &[], &provider).finish(&Config::default());
        assert_eq!(ctx.container_id, "from-provider");
        assert_eq!(provider.calls.load(Ordering::SeqCst), 1);

        let empty = CountingContainerIdProvider::default();
        let mut resolver = resolver(&HeaderMap::new(), &[], &empty);
        resolver.observe_span(&span_with_meta(&[]));
        resolver.observe_span(&span_with_meta(&[("k8s.pod.uid", "first")]));
        resolver.observe_span(&span_with_meta(&[("container.id", "second")]));
        assert_eq!(resolver.finish(&Config::default()).container_id, "first");
    }

    #[test]
    fn test_source_from_provider() {
        let ctx = resolver(
            &HeaderMap::new(),
            &[kv_str("host.name", "otel-host"), kv_str("_dd.hostname", "dd")],
            &CountingContainerIdProvider::default(),
        )
        .finish(&Config::default());
        assert_eq!(ctx.source, Source::hostname("otel-host"));
        assert_eq!(ctx.hostname, "otel-host");
    }

    #[test]
    fn test_source_from_resource_dd_hostname() {
        let mut resolver = resolver(
            &HeaderMap::new(),
            &[kv_str("_dd.hostname", "dd-host")],
            &CountingContainerIdProvider::default(),
        );
        resolver.observe_span(&span_with_meta(&[("_dd.hostname", "span-host")]));
        assert_eq!(
            resolver.finish(&Config::default()).source,
            Source::hostname("dd-host")
        );
    }

    #[test]
    fn test_source_from_spans_then_config() {
        let mut resolver = resolver(&HeaderMap::new(), &[], &CountingContainerIdProvider::default());
        resolver.observe_span(&span_with_meta(&[]));
        resolver.observe_span(&span_with_meta(&[("datadog.host.name", "span-host")]));
        resolver.observe_span(&span_with_meta(&[("_dd.hostname", "later-host")]));
        assert_eq!(
            resolver.finish(&Config::default()).source,
            Source::hostname("span-host")
        );

        let config = Config {
            hostname: "config-host".to_string(),
            ..Default::default()
        };
        let ctx = resolver_default().finish(&config);
        assert_eq!(ctx.source, Source::hostname("config-host"));
        assert_eq!(ctx.hostname, "config-host");
    }

    fn resolver_default() -> ContextResolver {
        resolver(&HeaderMap::new(), &[], &CountingContainerIdProvider::default())
    }

    #[test]
    fn test_fargate_source_has_no_hostname() {
        let ctx = resolver(
            &HeaderMap::new(),
            &[
                kv_str("cloud.provider", "aws"),
                kv_str("cloud.platform", "aws_ecs"),
                kv_str("aws.ecs.launchtype", "fargate"),
                kv_str("aws.ecs.task.arn", "arn:task"),
            ],
            &CountingContainerIdProvider::default(),
        )
        .finish(&Config {
            hostname: "config-host".to_string(),
            ..Default::default()
        });
        assert_eq!(ctx.source, Source::aws_ecs_fargate("arn:task"));
        assert_eq!(ctx.hostname, "");
    }

    #[test]
    fn test_env_cascade() {
        let config = Config {
            default_env: "Default Env".to_string(),
            ..Default::default()
        };

        let mut resolver = resolver(
            &HeaderMap::new(),
            &[kv_str("deployment.environment", "Prod")],
            &CountingContainerIdProvider::default(),
        );
        resolver.observe_span(&span_with_meta(&[("env", "span-env")]));
        assert_eq!(resolver.finish(&config).env, "prod");

        let mut resolver = resolver_default();
        resolver.observe_span(&span_with_meta(&[("env", "")]));
        resolver.observe_span(&span_with_meta(&[("env", "Staging")]));
        resolver.observe_span(&span_with_meta(&[("env", "other")]));
        assert_eq!(resolver.finish(&config).env, "staging");

        assert_eq!(resolver_default().finish(&config).env, "default_env");
    }

    #[test]
    fn test_non_ascii_env_is_not_truncated() {
        let env = "é".repeat(150);
        let ctx = resolver(
            &HeaderMap::new(),
            &[kv_str("deployment.environment", &env)],
            &CountingContainerIdProvider::default(),
        )
        .finish(&Config::default());
        assert_eq!(ctx.env.chars().count(), 150);
        assert_eq!(ctx.env, env);
    }

    #[test]
    fn test_language_and_tags() {
        let mut headers = HeaderMap::new();
        headers.insert("datadog-meta-lang", HeaderValue::from_static("python"));
        headers.insert("datadog-meta-lang-version", HeaderValue::from_static("3.12"));
        headers.insert(
            "datadog-meta-lang-interpreter",
            HeaderValue::from_static("CPython"),
        );

        let ctx = resolver(
            &headers,
            &[
                kv_str("telemetry.sdk.language", "go"),
                kv_str("telemetry.sdk.version", "1.2.0"),
            ],
            &CountingContainerIdProvider::default(),
        )
        .finish(&Config::default());
        assert_eq!(
            ctx.tags,
            Tags {
                lang: "go".to_string(),
                lang_version: "3.12".to_string(),
                interpreter: "CPython".to_string(),
                lang_vendor: String::new(),
                tracer_version: "otlp-1.2.0".to_string(),
                endpoint_version: "opentelemetry_grpc_v1".to_string(),
            }
        );

        let ctx = resolver(&headers, &[], &CountingContainerIdProvider::default())
            .finish(&Config::default());
        assert_eq!(ctx.tags.lang, "python");
        assert_eq!(ctx.tags.tracer_version, "otlp-");
    }
}
