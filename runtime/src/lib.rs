// Copyright 2026 Webfetch Contributors
// SPDX-License-Identifier: Apache-2.0

//! Webfetch runtime library: resilient single-URL fetching.
//!
//! A [`FetchOrchestrator`](orchestrator::FetchOrchestrator) routes each URL
//! to an ordered list of strategies, classifies failures to decide between
//! retry, fallback and abort, and caches those decisions per host. The
//! browser strategy runs on a long-lived headless backend owned by a
//! [`SessionSupervisor`](session::SessionSupervisor).

pub mod audit;
pub mod classify;
pub mod cli;
pub mod config;
pub mod orchestrator;
pub mod routing;
pub mod session;
pub mod strategy;
