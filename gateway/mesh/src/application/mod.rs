// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

pub mod context;
pub mod insight_propagator;
pub mod message_bus;
pub mod safety_filter;

pub use context::MeshContext;
pub use insight_propagator::{InsightPropagator, PropagatorSettings};
pub use message_bus::{MessageBus, MessageRetention, OpenedMessage, SendMessageRequest, SendMessageResponse};
pub use safety_filter::{FilterDecision, SafetyFilter, ValueAlignmentPredicate};
