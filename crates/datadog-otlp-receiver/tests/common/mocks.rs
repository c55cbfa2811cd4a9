// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

//! Mock implementations of the receiver collaborators for testing

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

use datadog_otlp_receiver::container::{ContainerIdProvider, ContainerTagger};
use datadog_otlp_receiver::stats::StatsReporter;
use hyper::HeaderMap;

/// Stats reporter that records every count it receives
#[derive(Default)]
pub struct RecordingStatsReporter {
    counts: Mutex<Vec<(String, i64)>>,
}

#[allow(dead_code)]
impl RecordingStatsReporter {
    /// Sum of all the counts reported under `name`
    pub fn total(&self, name: &str) -> i64 {
        self.counts
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, v)| v)
            .sum()
    }
}

impl StatsReporter for RecordingStatsReporter {
    fn count(&self, name: &str, value: i64, _tags: &[String]) {
        self.counts.lock().unwrap().push((name.to_string(), value));
    }

    fn gauge(&self, _name: &str, _value: f64, _tags: &[String]) {}

    fn timing(&self, _name: &str, _value: Duration, _tags: &[String]) {}
}

/// Container ID provider returning a fixed ID and counting its calls
#[allow(dead_code)]
pub struct MockContainerIdProvider {
    container_id: String,
    calls: AtomicUsize,
}

#[allow(dead_code)]
impl MockContainerIdProvider {
    pub fn new(container_id: &str) -> Self {
        Self {
            container_id: container_id.to_string(),
            calls: AtomicUsize::new(0),
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ContainerIdProvider for MockContainerIdProvider {
    fn get_container_id(&self, _headers: &HeaderMap) -> String {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.container_id.clone()
    }
}

/// Container tagger that knows the tags of a single container
#[allow(dead_code)]
pub struct MockContainerTagger {
    pub container_id: String,
    pub tags: String,
}

impl ContainerTagger for MockContainerTagger {
    fn container_tags(&self, container_id: &str) -> Option<String> {
        (container_id == self.container_id).then(|| self.tags.clone())
    }
}
