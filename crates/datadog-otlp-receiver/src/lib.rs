// Copyright 2023-Present Datadog, Inc. https://www.datadoghq.com/
// SPDX-License-Identifier: Apache-2.0

#![cfg_attr(not(test), deny(clippy::panic))]
#![cfg_attr(not(test), deny(clippy::unwrap_used))]
#![cfg_attr(not(test), deny(clippy::expect_used))]
#![cfg_attr(not(test), deny(clippy::todo))]
#![cfg_attr(not(test), deny(clippy::unimplemented))]

pub mod assembler;
pub mod attributes;
pub mod config;
pub mod container;
pub mod dispatcher;
pub mod error;
pub mod http_utils;
pub mod payload;
pub mod receiver;
pub mod resolver;
pub mod sampler;
pub mod source;
pub mod span_converter;
pub mod stats;
pub mod trace_grouper;
