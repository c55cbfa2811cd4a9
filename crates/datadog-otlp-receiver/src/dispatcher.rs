// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use tokio::sync::mpsc::Sender;
use tracing::{debug, error};

use crate::error::ReceiverError;
use crate::payload::Payload;

/// Hands finished payloads to the downstream pipeline through a bounded channel.
///
/// Sending waits for channel capacity, so a slow consumer slows down the receiver instead of
/// losing payloads.
#[derive(Debug, Clone)]
pub struct PayloadDispatcher {
    out: Sender<Payload>,
}

impl PayloadDispatcher {
    pub fn new(out: Sender<Payload>) -> Self {
        Self { out }
    }

    pub async fn dispatch(&self, payload: Payload) -> Result<(), ReceiverError> {
        let span_count = payload.span_count();
        match self.out.send(payload).await {
            Ok(()) => {
                debug!("Dispatched payload with {} spans", span_count);
                Ok(())
            }
            Err(e) => {
                error!(
                    "Failed to dispatch payload with {} spans: {}",
                    span_count, e
                );
                Err(ReceiverError::SinkClosed)
            }
        }
    }
}
