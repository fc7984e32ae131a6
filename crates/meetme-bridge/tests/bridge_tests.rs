//! Supervisor tests: call tasks under the bridge and graceful shutdown.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use bridge_test_utils::{settle, MockMixer, TestChannel};
use common::types::ConferenceId;
use meetme_bridge::actors::Bridge;
use meetme_bridge::config::{Config, RoomsFile};
use meetme_bridge::errors::BridgeError;
use meetme_bridge::mixer::MixingEngine;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

fn bridge(mixer: &Arc<MockMixer>) -> Bridge {
    let config = Config::from_vars(&HashMap::new()).unwrap();
    let mixer: Arc<dyn MixingEngine> = Arc::<MockMixer>::clone(mixer);
    Bridge::from_config(&config, RoomsFile::default(), mixer)
}

async fn wait_for_count(bridge: &Bridge, id: &str, count: usize) {
    let id = ConferenceId::new(id).unwrap();
    for _ in 0..500 {
        if bridge.registry().count(&id) == count {
            return;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    panic!("room {id} never reached {count} participants");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_drains_running_calls() {
    let mixer = Arc::new(MockMixer::new());
    let bridge = bridge(&mixer);

    let first = TestChannel::new("SIP/first");
    let second = TestChannel::new("SIP/second");
    let first_handle = first.handle();
    bridge.spawn_call(Box::new(first), "600,dq".to_string()).unwrap();
    bridge.spawn_call(Box::new(second), "600,dq".to_string()).unwrap();
    wait_for_count(&bridge, "600", 2).await;
    assert_eq!(bridge.active_calls(), 2);

    assert_eq!(bridge.shutdown(Duration::from_secs(5)).await, 0);
    assert!(bridge.is_cancelled());
    assert!(bridge.registry().list().is_empty());
    assert_eq!(mixer.live_rooms(), 0);
    assert!(first_handle.is_answered());
}

#[tokio::test(start_paused = true)]
async fn test_refuses_calls_after_shutdown() {
    let mixer = Arc::new(MockMixer::new());
    let bridge = bridge(&mixer);
    assert_eq!(bridge.shutdown(Duration::from_secs(1)).await, 0);

    let result = bridge.spawn_call(Box::new(TestChannel::new("SIP/late")), "600,d".to_string());
    assert!(matches!(result, Err(BridgeError::RoomUnavailable(_))));
    assert_eq!(mixer.rooms_created(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_finished_calls_are_reaped() {
    let mixer = Arc::new(MockMixer::new());
    let bridge = bridge(&mixer);

    let channel = TestChannel::new("SIP/brief");
    let handle = channel.handle();
    bridge.spawn_call(Box::new(channel), "600,dq".to_string()).unwrap();
    wait_for_count(&bridge, "600", 1).await;
    handle.hang_up();
    settle().await;
    assert!(bridge.registry().list().is_empty());

    bridge
        .spawn_call(Box::new(TestChannel::new("SIP/next")), "601,dq".to_string())
        .unwrap();
    assert_eq!(bridge.active_calls(), 1);
    wait_for_count(&bridge, "601", 1).await;

    assert_eq!(bridge.shutdown(Duration::from_secs(5)).await, 0);
    assert_eq!(mixer.rooms_created(), 2);
    assert_eq!(mixer.rooms_destroyed(), 2);
}

#[tokio::test]
async fn test_child_tokens_follow_shutdown() {
    let bridge = bridge(&Arc::new(MockMixer::new()));
    let token = bridge.child_token();
    assert!(!token.is_cancelled());
    bridge.shutdown(Duration::from_secs(1)).await;
    assert!(token.is_cancelled());
}
