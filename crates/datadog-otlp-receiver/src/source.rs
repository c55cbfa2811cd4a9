// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Identification of the entity (host or serverless task) that emitted a resource.

use std::fmt;

use opentelemetry_proto::tonic::common::v1::KeyValue;

use crate::attributes::{
    get_attribute, KEY_AWS_ECS_LAUNCH_TYPE, KEY_AWS_ECS_TASK_ARN, KEY_CLOUD_ACCOUNT_ID,
    KEY_CLOUD_PLATFORM, KEY_CLOUD_PROVIDER, KEY_DATADOG_HOST_NAME, KEY_HOST_ID, KEY_HOST_NAME,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceKind {
    Hostname,
    AwsEcsFargate,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Source {
    pub kind: SourceKind,
    pub identifier: String,
}

impl Source {
    pub fn hostname(identifier: impl Into<String>) -> Self {
        Source {
            kind: SourceKind::Hostname,
            identifier: identifier.into(),
        }
    }

    pub fn aws_ecs_fargate(task_arn: impl Into<String>) -> Self {
        Source {
            kind: SourceKind::AwsEcsFargate,
            identifier: task_arn.into(),
        }
    }

    /// The tag representation of this source.
    pub fn tag(&self) -> String {
        match self.kind {
            SourceKind::Hostname => format!("host:{}", self.identifier),
            SourceKind::AwsEcsFargate => format!("task_arn:{}", self.identifier),
        }
    }
}

impl fmt::Display for Source {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.tag())
    }
}

/// Resolves the source of a resource from its attributes.
pub trait SourceProvider {
    fn resource_to_source(&self, attributes: &[KeyValue]) -> Option<Source>;
}

/// Default [`SourceProvider`], reading the host and cloud semantic conventions.
#[derive(Debug, Default, Clone)]
pub struct AttributesTranslator {}

impl AttributesTranslator {
    pub fn new() -> Self {
        Self {}
    }
}

impl SourceProvider for AttributesTranslator {
    fn resource_to_source(&self, attributes: &[KeyValue]) -> Option<Source> {
        if let Some(host) = get_attribute(attributes, KEY_DATADOG_HOST_NAME) {
            return Some(Source::hostname(host));
        }

        let provider = get_attribute(attributes, KEY_CLOUD_PROVIDER).unwrap_or_default();
        if provider == "aws"
            && get_attribute(attributes, KEY_CLOUD_PLATFORM) == Some("aws_ecs")
            && get_attribute(attributes, KEY_AWS_ECS_LAUNCH_TYPE) == Some("fargate")
        {
            if let Some(task_arn) = get_attribute(attributes, KEY_AWS_ECS_TASK_ARN) {
                return Some(Source::aws_ecs_fargate(task_arn));
            }
        }

        let host_name = get_attribute(attributes, KEY_HOST_NAME);
        let cloud_host = match provider {
            "aws" | "azure" => get_attribute(attributes, KEY_HOST_ID).map(str::to_string),
            "gcp" => host_name.zip(get_attribute(attributes, KEY_CLOUD_ACCOUNT_ID)).map(
                |(name, project)| format!("{name}.{project}"),
            ),
            _ => None,
        };
        cloud_host
            .or_else(|| host_name.map(str::to_string))
            .map(Source::hostname)
    }
}
