// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! # Mesh Domain Layer
//!
//! | Module | Key Types |
//! |--------|-----------|
//! | [`message`] | `Message`, `MessageId`, `MessageType`, `SafetyLevel`, `DeliveryState` |
//! | [`insight`] | `InsightArtifact`, `SafeProjection` |
//! | [`rules`] | `RuleTable`, `MeshRules`, `CompiledRules` |
//! | [`error`] | `MessagingError` |

pub mod error;
pub mod insight;
pub mod message;
pub mod rules;

pub use error::MessagingError;
pub use insight::{InsightArtifact, SafeProjection};
pub use message::{DeliveryState, Message, MessageId, MessageType, SafetyLevel};
pub use rules::{CompiledRules, MeshRules, RuleEntry, RuleTable};
