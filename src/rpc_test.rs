use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use anyhow::Result;
use serde_json::json;

use crate::error::RingError;
use crate::rpc::*;

/// A token source yielding `token1`, `token2`, ...
fn counting_rpc() -> ClusterRpc {
    let counter = Arc::new(AtomicUsize::new(0));
    ClusterRpc::with_tokens(move || format!("token{}", counter.fetch_add(1, Ordering::SeqCst) + 1))
}

#[test]
fn stop_proxy_request_wire_form() -> Result<()> {
    let rpc = counting_rpc();

    let msg = rpc.stop_proxy_request(Some(true));

    let wire = serde_json::to_value(msg.to_wire())?;
    let expected = json!({
        "trigger": "token1",
        "broker-token": null,
        "builder-broker": null,
        "peers-only": "True",
        "leader-changed-notification": null,
        "stop-proxy-service": "token1",
        "stop-proxy-service-ack": null,
        "sync-only-builders": null,
    });
    assert!(wire == expected, "expected {} got {}", expected, wire);
    assert!(msg.peers_only(), "expected peers-only to be truthy");

    let wire = serde_json::to_value(rpc.stop_proxy_request(None).to_wire())?;
    assert!(wire["trigger"] == "token2", "expected fresh trigger token2 got {}", wire["trigger"]);
    assert!(wire["stop-proxy-service"] == "token2", "expected stop token to equal the trigger got {}", wire["stop-proxy-service"]);
    assert!(wire["peers-only"].is_null(), "expected no peers-only flag got {}", wire["peers-only"]);
    Ok(())
}

#[test]
fn stop_proxy_ack_echoes_token_and_flag() -> Result<()> {
    let rpc = counting_rpc();

    let msg = rpc.stop_proxy_ack("tok1", Some("1".into()));

    let wire = serde_json::to_value(msg.to_wire())?;
    let expected = json!({
        "trigger": "token1",
        "broker-token": null,
        "builder-broker": null,
        "peers-only": "1",
        "leader-changed-notification": null,
        "stop-proxy-service": null,
        "stop-proxy-service-ack": "tok1",
        "sync-only-builders": null,
    });
    assert!(wire == expected, "expected {} got {}", expected, wire);
    assert!(msg.peers_only(), "expected echoed peers-only '1' to be truthy");
    Ok(())
}

#[test]
fn sync_requests_wire_form() -> Result<()> {
    let rpc = counting_rpc();

    let wire = serde_json::to_value(rpc.sync_rings_request("10.0.0.1", "brokertok").to_wire())?;
    let expected = json!({
        "trigger": "token1",
        "broker-token": "brokertok",
        "builder-broker": "10.0.0.1",
        "peers-only": null,
        "leader-changed-notification": null,
        "stop-proxy-service": null,
        "stop-proxy-service-ack": null,
        "sync-only-builders": null,
    });
    assert!(wire == expected, "expected {} got {}", expected, wire);

    let wire = serde_json::to_value(rpc.sync_builders_request("10.0.0.1", "brokertok").to_wire())?;
    assert!(wire["trigger"] == "token2", "expected fresh trigger token2 got {}", wire["trigger"]);
    assert!(wire["sync-only-builders"] == "1", "expected sync-only-builders to be set got {}", wire["sync-only-builders"]);
    Ok(())
}

#[test]
fn leader_changed_is_self_referential() -> Result<()> {
    let rpc = counting_rpc();

    let wire = serde_json::to_value(rpc.notify_leader_changed().to_wire())?;

    let expected = json!({
        "trigger": "token1",
        "broker-token": null,
        "builder-broker": null,
        "peers-only": null,
        "leader-changed-notification": "token1",
        "stop-proxy-service": null,
        "stop-proxy-service-ack": null,
        "sync-only-builders": null,
    });
    assert!(wire == expected, "expected {} got {}", expected, wire);
    Ok(())
}

#[test]
fn every_message_carries_a_fresh_trigger() {
    let rpc = ClusterRpc::new();
    let triggers = vec![
        rpc.sync_rings_request("10.0.0.1", "t").trigger().to_string(),
        rpc.notify_leader_changed().trigger().to_string(),
        rpc.stop_proxy_request(None).trigger().to_string(),
        rpc.stop_proxy_ack("t", None).trigger().to_string(),
    ];
    for (idx, trigger) in triggers.iter().enumerate() {
        assert!(!trigger.is_empty(), "expected a trigger token on message {}", idx);
        assert!(!triggers[..idx].contains(trigger), "expected trigger {} to be unique", trigger);
    }
}

#[test]
fn from_wire_interprets_each_intent() -> Result<()> {
    let rpc = counting_rpc();
    let messages = vec![
        rpc.sync_rings_request("10.0.0.1", "brokertok"),
        rpc.sync_builders_request("10.0.0.1", "brokertok"),
        rpc.notify_leader_changed(),
        rpc.stop_proxy_request(Some(false)),
        rpc.stop_proxy_ack("tok1", Some("1".into())),
    ];
    for msg in messages {
        let parsed = ClusterMessage::from_wire(&msg.to_wire())?;
        assert!(parsed == msg, "expected {:?} got {:?}", msg, parsed);
    }

    let wire: WireMessage = serde_json::from_value(json!({"trigger": "t1", "stop-proxy-service-ack": "tok1"}))?;
    let parsed = ClusterMessage::from_wire(&wire)?;
    assert!(
        matches!(parsed, ClusterMessage::StopAck { ref token, peers_only: None, .. } if token == "tok1"),
        "expected sparse ack to be interpreted got {:?}",
        parsed
    );
    Ok(())
}

#[test]
fn from_wire_rejects_ambiguous_messages() -> Result<()> {
    let cases = vec![
        json!({"stop-proxy-service": "tok1"}),
        json!({"trigger": "t1"}),
        json!({"trigger": "t1", "stop-proxy-service": "tok1", "leader-changed-notification": "t1"}),
        json!({"trigger": "t1", "broker-token": "tok1"}),
        json!({"trigger": "t1", "builder-broker": "10.0.0.1"}),
    ];
    for case in cases {
        let wire: WireMessage = serde_json::from_value(case.clone())?;
        let res = ClusterMessage::from_wire(&wire);
        assert!(matches!(res, Err(RingError::InvalidMessage(_))), "expected {} to be rejected got {:?}", case, res);
    }
    Ok(())
}
