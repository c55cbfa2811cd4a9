// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use hyper::{header, HeaderMap};
use tracing::debug;

use crate::error::ReceiverError;

pub const HEADER_LANG: &str = "datadog-meta-lang";
pub const HEADER_LANG_VERSION: &str = "datadog-meta-lang-version";
pub const HEADER_LANG_INTERPRETER: &str = "datadog-meta-lang-interpreter";
pub const HEADER_LANG_INTERPRETER_VENDOR: &str = "datadog-meta-lang-interpreter-vendor";
pub const HEADER_COMPUTED_STATS: &str = "datadog-client-computed-stats";
pub const HEADER_COMPUTED_TOP_LEVEL: &str = "datadog-client-computed-top-level";
pub const HEADER_CONTAINER_ID: &str = "datadog-container-id";
pub const HEADER_LOCAL_DATA: &str = "dd-localdata";
pub const HEADER_EXTERNAL_DATA: &str = "dd-externaldata";

pub const ENDPOINT_VERSION: &str = "opentelemetry_grpc_v1";

/// Returns the first value of the given header, or an empty string when it is missing or not
/// valid UTF-8.
pub fn header_value<'a>(headers: &'a HeaderMap, key: &str) -> &'a str {
    headers
        .get(key)
        .and_then(|v| v.to_str().ok())
        .unwrap_or_default()
}

/// Builds the tags describing the client that sent a request, used to tag request level metrics.
pub fn tags_from_headers(headers: &HeaderMap) -> Vec<String> {
    let mut tags = vec![format!("endpoint_version:{ENDPOINT_VERSION}")];
    for (key, tag) in [
        (HEADER_LANG, "lang"),
        (HEADER_LANG_VERSION, "lang_version"),
        (HEADER_LANG_INTERPRETER, "interpreter"),
        (HEADER_LANG_INTERPRETER_VENDOR, "lang_vendor"),
    ] {
        let value = header_value(headers, key);
        if !value.is_empty() {
            tags.push(format!("{tag}:{value}"));
        }
    }
    tags
}

/// Takes a request's header map, and verifies that the "content-length" header, when present, is
/// valid and not larger than the given max_content_length.
///
/// A missing header is accepted: the decoded body size is checked again by the caller.
pub fn verify_request_content_length(
    header_map: &HeaderMap,
    max_content_length: usize,
) -> Result<(), ReceiverError> {
    let Some(content_length_header) = header_map.get(header::CONTENT_LENGTH) else {
        if let Some(transfer_encoding_header) = header_map.get(header::TRANSFER_ENCODING) {
            debug!(
                "Transfer-Encoding header is present: {:?}",
                transfer_encoding_header
            );
        }
        return Ok(());
    };
    let content_length = content_length_header
        .to_str()
        .map_err(|_| ReceiverError::InvalidContentLength)?
        .parse::<usize>()
        .map_err(|_| ReceiverError::InvalidContentLength)?;
    if content_length > max_content_length {
        return Err(ReceiverError::PayloadTooLarge {
            size: content_length,
            limit: max_content_length,
        });
    }
    Ok(())
}
