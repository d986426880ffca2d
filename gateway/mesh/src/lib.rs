// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # `warden-mesh`: Encrypted Peer Messaging
//!
//! Point-to-point AES-256-GCM messaging between registered identities, with a
//! content safety filter in front of every external projection and a
//! relevance-driven insight propagator.
//!
//! ## Crate Layout
//!
//! | Module | Layer | Contents |
//! |--------|-------|----------|
//! | [`domain`] | Domain | `Message`, `InsightArtifact`, rule tables, `MessagingError` |
//! | [`application`] | Application | `MessageBus`, `SafetyFilter`, `InsightPropagator` |
//! | [`presentation`] | Presentation | Axum routes under `/v1/messages` and `/v1/insights` |
//!
//! ## Key Concepts
//!
//! - **Ciphertext at rest only**: the bus stores sealed payloads. Plaintext
//!   exists only while a message is being sealed, scored, filtered, or handed
//!   to its recipient.
//! - **Errored, not dropped**: a message that fails to open is marked errored
//!   and stays listable for diagnosis.
//! - **Best-effort heuristics**: relevance and safety decisions run over
//!   versioned rule tables loaded from YAML. They filter, they do not guarantee.

pub mod domain;
pub mod application;
pub mod presentation;

pub use domain::*;
