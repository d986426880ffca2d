// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0
//! Messaging composition root, layered on the gateway's shared stores.

use anyhow::Context as _;
use std::path::Path;
use std::sync::Arc;
use tracing::info;
use warden_core::application::context::GatewayContext;

use crate::application::insight_propagator::{InsightPropagator, PropagatorSettings};
use crate::application::message_bus::{MessageBus, MessageRetention};
use crate::application::safety_filter::SafetyFilter;
use crate::domain::rules::{CompiledRules, MeshRules};

pub struct MeshContext {
    pub rules: Arc<CompiledRules>,
    pub filter: Arc<SafetyFilter>,
    pub propagator: Arc<InsightPropagator>,
    pub bus: Arc<MessageBus>,
}

impl MeshContext {
    pub fn build(gateway: &GatewayContext) -> anyhow::Result<Self> {
        let messaging = &gateway.config.spec.messaging;
        let rules = MeshRules::load(messaging.rules_path.as_deref().map(Path::new))?
            .compile()
            .context("Failed to compile messaging rule tables")?;
        info!(
            version = %rules.version,
            overridden = messaging.rules_path.is_some(),
            "Messaging rule tables loaded"
        );
        Ok(Self::with_rules(gateway, Arc::new(rules)))
    }

    pub fn with_rules(gateway: &GatewayContext, rules: Arc<CompiledRules>) -> Self {
        let messaging = &gateway.config.spec.messaging;
        let filter = Arc::new(SafetyFilter::new(rules.clone(), messaging.max_display_len));
        let propagator = Arc::new(InsightPropagator::new(
            rules.clone(),
            filter.clone(),
            gateway.identities.clone(),
            gateway.event_bus.clone(),
            gateway.clock.clone(),
            PropagatorSettings::from(messaging),
        ));
        let bus = Arc::new(MessageBus::new(
            gateway.secrets.clone(),
            gateway.identities.clone(),
            filter.clone(),
            propagator.clone(),
            gateway.event_bus.clone(),
            gateway.clock.clone(),
        )
        .with_retention(MessageRetention::from(&messaging.retention)));
        Self {
            rules,
            filter,
            propagator,
            bus,
        }
    }
}
