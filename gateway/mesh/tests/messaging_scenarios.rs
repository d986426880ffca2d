// Copyright (c) 2026 100monkeys.ai
// SPDX-License-Identifier: AGPL-3.0

use chrono::{Duration, Utc};
use std::collections::HashSet;
use std::sync::Arc;
use warden_core::application::context::GatewayContext;
use warden_core::domain::clock::ManualClock;
use warden_core::domain::events::MessagingEvent;
use warden_core::domain::gateway_config::{GatewayConfigManifest, IdentityConfig};
use warden_core::domain::identity::{IdentityId, IdentityTier};
use warden_core::infrastructure::event_bus::DomainEvent;
use warden_mesh::application::message_bus::SendMessageRequest;
use warden_mesh::application::MeshContext;
use warden_mesh::{MessageType, MessagingError, SafetyLevel};

fn member(id: &str, tier: IdentityTier, role: &str, caps: &[&str]) -> IdentityConfig {
    IdentityConfig {
        id: id.to_string(),
        tier,
        role: role.to_string(),
        capabilities: caps.iter().map(|c| c.to_string()).collect(),
        key: None,
    }
}

fn config() -> GatewayConfigManifest {
    let mut config = GatewayConfigManifest::default();
    config.spec.identities = vec![
        member("worker-b", IdentityTier::WorkerAgent, "analyst", &["read", "submit"]),
        member("worker-c", IdentityTier::WorkerAgent, "strategist", &["read"]),
        member("worker-d", IdentityTier::WorkerAgent, "analyst", &["read", "submit"]),
        member("worker-e", IdentityTier::WorkerAgent, "executor", &["submit"]),
        member("worker-f", IdentityTier::WorkerAgent, "researcher", &["read"]),
        member("worker-g", IdentityTier::WorkerAgent, "generalist", &[]),
        member("ghost", IdentityTier::Denied, "analyst", &["read", "submit"]),
    ];
    config
}

async fn harness() -> (GatewayContext, MeshContext, Arc<ManualClock>) {
    let clock = Arc::new(ManualClock::new(Utc::now()));
    let gateway = GatewayContext::build(config(), clock.clone()).await.unwrap();
    let mesh = MeshContext::build(&gateway).unwrap();
    (gateway, mesh, clock)
}

fn send(from: &str, to: &str, text: &str, level: SafetyLevel) -> SendMessageRequest {
    SendMessageRequest {
        sender_id: from.to_string(),
        recipient_id: to.to_string(),
        message_type: MessageType::Insight,
        plaintext: text.to_string(),
        safety_level: level,
    }
}

#[tokio::test]
async fn test_credential_redacted_externally_but_kept_for_recipient() {
    let (_gateway, mesh, _clock) = harness().await;
    let text = "Use sk_live_51HqLyjWDarjtT1zdp7dc for the billing sandbox until the new account is approved";

    let id = mesh
        .bus
        .send(send("worker-b", "worker-c", text, SafetyLevel::Safe))
        .await
        .unwrap();

    let projections = mesh.bus.fetch_safe_messages(&IdentityId::new("worker-c"), 10).await;
    assert_eq!(projections.len(), 1);
    assert!(!projections[0].content.contains("sk_live_"));
    assert!(projections[0].content.contains("[REDACTED:api_key]"));
    assert_eq!(projections[0].redactions, vec!["api_key".to_string()]);

    let opened = mesh.bus.open_message(&IdentityId::new("worker-c"), &id).await.unwrap();
    assert_eq!(opened.plaintext, text);
}

#[tokio::test]
async fn test_cross_relevant_message_yields_one_artifact() {
    let (gateway, mesh, _clock) = harness().await;
    let mut events = gateway.event_bus.subscribe();
    let text = "Sharing a trend, a pattern, a signal, an anomaly and an opportunity from the weekly review";

    let id = mesh
        .bus
        .send(send("worker-b", "worker-c", text, SafetyLevel::Internal))
        .await
        .unwrap();

    let stored = mesh.bus.message(&id).unwrap();
    assert!((stored.relevance_score - 0.85).abs() < 1e-9);
    assert_eq!(mesh.propagator.derived_count(), 1);

    let mut targets = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let DomainEvent::Messaging(MessagingEvent::InsightPropagated {
            targets: t,
            source_message_id,
            ..
        }) = event
        {
            assert_eq!(source_message_id, id.0);
            targets = t;
        }
    }
    assert!(!targets.is_empty() && targets.len() <= 3);
    let names: HashSet<&str> = targets.iter().map(|t| t.as_str()).collect();
    for excluded in ["worker-b", "worker-c", "ghost"] {
        assert!(!names.contains(excluded));
    }

    let mut artifact_ids = HashSet::new();
    for target in &targets {
        let inbox = mesh.bus.insights_for(target);
        assert_eq!(inbox.len(), 1);
        assert_eq!(inbox[0].category, "market");
        assert!(inbox[0].safety_validated);
        artifact_ids.insert(inbox[0].id);
    }
    assert_eq!(artifact_ids.len(), 1);
}

#[tokio::test]
async fn test_low_relevance_message_propagates_nothing() {
    let (_gateway, mesh, _clock) = harness().await;
    mesh.bus
        .send(send("worker-e", "worker-g", "lunch is at noon", SafetyLevel::Safe))
        .await
        .unwrap();
    assert_eq!(mesh.propagator.derived_count(), 0);
    assert!(mesh.bus.insights_for(&IdentityId::new("worker-d")).is_empty());
}

#[tokio::test]
async fn test_safe_fetch_orders_newest_first_and_skips_restricted() {
    let (_gateway, mesh, clock) = harness().await;
    let c = IdentityId::new("worker-c");

    mesh.bus.send(send("worker-b", "worker-c", "first note", SafetyLevel::Safe)).await.unwrap();
    clock.advance(Duration::seconds(5));
    mesh.bus
        .send(send("worker-b", "worker-c", "restricted note", SafetyLevel::Restricted))
        .await
        .unwrap();
    clock.advance(Duration::seconds(5));
    mesh.bus.send(send("worker-d", "worker-c", "second note", SafetyLevel::Internal)).await.unwrap();

    let projections = mesh.bus.fetch_safe_messages(&c, 10).await;
    let contents: Vec<&str> = projections.iter().map(|p| p.content.as_str()).collect();
    assert_eq!(contents, vec!["second note", "first note"]);

    let limited = mesh.bus.fetch_safe_messages(&c, 1).await;
    assert_eq!(limited.len(), 1);
    assert_eq!(limited[0].content, "second note");

    // Projection is not delivery.
    let opened = mesh.bus.open_pending(&c).await;
    assert_eq!(opened.len(), 3);
    assert!(opened.iter().all(|(_, r)| r.is_ok()));
    assert!(mesh.bus.open_pending(&c).await.is_empty());
}

#[tokio::test]
async fn test_denied_identity_cannot_send_or_receive() {
    let (_gateway, mesh, _clock) = harness().await;
    assert_eq!(
        mesh.bus
            .send(send("ghost", "worker-c", "hi", SafetyLevel::Safe))
            .await
            .unwrap_err(),
        MessagingError::UnknownIdentity("ghost".to_string())
    );
    assert!(mesh
        .bus
        .send(send("worker-b", "ghost", "hi", SafetyLevel::Safe))
        .await
        .is_err());
}

#[tokio::test]
async fn test_messages_survive_recipient_key_rotation() {
    let (gateway, mesh, _clock) = harness().await;
    let c = IdentityId::new("worker-c");
    let id = mesh
        .bus
        .send(send("worker-b", "worker-c", "sealed before rotation", SafetyLevel::Safe))
        .await
        .unwrap();

    gateway.secrets.rotate_key(&c).await.unwrap();
    let later = mesh
        .bus
        .send(send("worker-b", "worker-c", "sealed after rotation", SafetyLevel::Safe))
        .await
        .unwrap();
    assert_eq!(mesh.bus.message(&later).unwrap().key_version, 2);

    let opened = mesh.bus.open_message(&c, &id).await.unwrap();
    assert_eq!(opened.plaintext, "sealed before rotation");
}
