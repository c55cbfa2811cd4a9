// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

use thiserror::Error;

/// Failures that are visible to the caller of the receiver.
///
/// Attribute level problems never show up here: unknown or malformed attributes fall back to
/// defaults during conversion.
#[derive(Debug, Error)]
pub enum ReceiverError {
    #[error("Invalid Content-Length header")]
    InvalidContentLength,
    #[error("Payload too large: {size} bytes exceeds the limit of {limit} bytes")]
    PayloadTooLarge { size: usize, limit: usize },
    #[error("Error decoding OTLP export request: {0}")]
    Decode(#[from] prost::DecodeError),
    #[error("Output channel is closed, payload could not be delivered")]
    SinkClosed,
}
