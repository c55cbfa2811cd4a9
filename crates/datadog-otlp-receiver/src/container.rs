// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Container ID extraction from transport headers and the originating process' cgroup.

use std::path::PathBuf;
use std::sync::OnceLock;

use base64::{engine::general_purpose::STANDARD, Engine as _};
use hyper::HeaderMap;
use regex::Regex;
use serde::Deserialize;
use tracing::{debug, trace};

use crate::http_utils::{
    header_value, HEADER_CONTAINER_ID, HEADER_EXTERNAL_DATA, HEADER_LOCAL_DATA,
};

/// Resolves the ID of the container that sent a request.
pub trait ContainerIdProvider {
    /// Returns the container ID, or an empty string if it can't be determined.
    fn get_container_id(&self, headers: &HeaderMap) -> String;
}

/// Resolves the container tags of a container, as a comma separated `key:value` list.
pub trait ContainerTagger {
    fn container_tags(&self, container_id: &str) -> Option<String>;
}

/// Parsed from the DD-LocalData header
#[derive(Debug, Clone, Default, Deserialize)]
struct LocalData {
    #[serde(rename = "container-id")]
    container_id: Option<String>,
    #[serde(rename = "process-id")]
    process_id: Option<u32>,
}

/// Parsed from the DD-ExternalData header
#[derive(Debug, Clone, Default, Deserialize)]
struct ExternalData {
    #[serde(rename = "container-id")]
    container_id: Option<String>,
}

/// Default [`ContainerIdProvider`].
///
/// Lookup order:
/// 1. DD-LocalData header, either its container ID or the cgroup of its process ID
/// 2. Datadog-Container-ID header
/// 3. DD-ExternalData header
#[derive(Debug, Clone)]
pub struct HeaderContainerIdProvider {
    proc_root: PathBuf,
}

impl HeaderContainerIdProvider {
    pub fn new(proc_root: impl Into<PathBuf>) -> Self {
        Self {
            proc_root: proc_root.into(),
        }
    }

    fn from_local_data(&self, value: &str) -> Option<String> {
        let data: LocalData = parse_header_json(value)?;
        if let Some(cid) = data.container_id.filter(|cid| !cid.is_empty()) {
            debug!("Extracted container ID from DD-LocalData: {}", cid);
            return Some(cid);
        }
        let pid = data.process_id?;
        let cgroup_path = self.proc_root.join(pid.to_string()).join("cgroup");
        match std::fs::read_to_string(&cgroup_path) {
            Ok(content) => parse_container_id_from_cgroup(&content),
            Err(e) => {
                trace!("Could not read cgroup file {}: {}", cgroup_path.display(), e);
                None
            }
        }
    }
}

impl ContainerIdProvider for HeaderContainerIdProvider {
    fn get_container_id(&self, headers: &HeaderMap) -> String {
        let local_data = header_value(headers, HEADER_LOCAL_DATA);
        if !local_data.is_empty() {
            if let Some(cid) = self.from_local_data(local_data) {
                return cid;
            }
        }

        let cid = header_value(headers, HEADER_CONTAINER_ID);
        if !cid.is_empty() {
            debug!("Extracted container ID from Datadog-Container-ID header: {}", cid);
            return cid.to_string();
        }

        let external_data = header_value(headers, HEADER_EXTERNAL_DATA);
        if !external_data.is_empty() {
            if let Some(cid) = parse_header_json::<ExternalData>(external_data)
                .and_then(|data| data.container_id)
                .filter(|cid| !cid.is_empty())
            {
                debug!("Extracted container ID from DD-ExternalData: {}", cid);
                return cid;
            }
        }

        trace!("No container ID found in headers");
        String::new()
    }
}

/// Header payloads are JSON, either plain or base64 encoded.
fn parse_header_json<T: for<'de> Deserialize<'de>>(data: &str) -> Option<T> {
    if let Ok(parsed) = serde_json::from_str::<T>(data) {
        return Some(parsed);
    }
    let decoded = STANDARD.decode(data).ok()?;
    match serde_json::from_slice::<T>(&decoded) {
        Ok(parsed) => Some(parsed),
        Err(e) => {
            debug!("Failed to parse header payload: {}", e);
            None
        }
    }
}

fn container_id_regex() -> Option<&'static Regex> {
    static RE: OnceLock<Option<Regex>> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"^(?:[0-9a-f]{64}|[0-9a-f]{32}-\d+|[0-9a-f]{8}(?:-[0-9a-f]{4}){4})$").ok()
    })
    .as_ref()
}

fn container_id_from_segment(segment: &str) -> Option<&str> {
    let re = container_id_regex()?;
    let segment = segment.trim_end_matches(".scope");
    if re.is_match(segment) {
        return Some(segment);
    }
    // runtime prefixed scopes, e.g. docker-<id>.scope or cri-containerd-<id>.scope
    segment
        .rsplit_once('-')
        .map(|(_, id)| id)
        .filter(|id| re.is_match(id))
}

/// Finds the container ID in the content of a `/proc/<pid>/cgroup` file.
pub fn parse_container_id_from_cgroup(content: &str) -> Option<String> {
    content.lines().find_map(|line| {
        let path = line.splitn(3, ':').nth(2)?;
        path.split('/')
            .find_map(container_id_from_segment)
            .map(str::to_string)
    })
}
