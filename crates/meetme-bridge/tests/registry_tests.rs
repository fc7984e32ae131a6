//! Registry lifecycle tests: creation, reference counting, admission and
//! teardown of recorded rooms.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use bridge_test_utils::{MockMixer, TestChannel};
use common::types::{ConferenceId, UserNo};
use meetme_bridge::actors::recorder::{RecordingFormat, RecordingState, RecordingTarget};
use meetme_bridge::channel::ChannelInfo;
use meetme_bridge::conference::AdminFlags;
use meetme_bridge::errors::BridgeError;
use meetme_bridge::events::{BridgeEvent, EventBus};
use meetme_bridge::policy::Policy;
use meetme_bridge::registry::{Registry, RoomRequest, DEFAULT_ROOM_ID_SPACE};
use std::sync::Arc;
use std::time::Duration;

fn registry() -> (Arc<Registry>, Arc<MockMixer>) {
    let mixer = Arc::new(MockMixer::new());
    let registry = Arc::new(Registry::new(
        mixer.clone(),
        EventBus::default(),
        DEFAULT_ROOM_ID_SPACE,
    ));
    (registry, mixer)
}

fn id(s: &str) -> ConferenceId {
    ConferenceId::new(s).unwrap()
}

fn info(name: &str) -> ChannelInfo {
    ChannelInfo::of(&TestChannel::new(name))
}

#[tokio::test]
async fn test_find_without_create_returns_none() {
    let (registry, mixer) = registry();
    let found = registry
        .find_or_create(&id("600"), &RoomRequest::existing())
        .await
        .unwrap();
    assert!(found.is_none());
    assert!(registry.list().is_empty());
    assert_eq!(mixer.rooms_created(), 0);
}

#[tokio::test]
async fn test_create_marks_slot_and_emits_start() {
    let (registry, mixer) = registry();
    let mut events = registry.events().subscribe();

    let conf = registry
        .find_or_create(&id("0"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registry.free_room_number(), Some(id("1")));
    assert_eq!(mixer.rooms_created(), 1);
    assert_eq!(events.recv().await.unwrap().name(), "MeetmeStart");

    assert!(registry.dispose(conf).await);
    assert_eq!(registry.free_room_number(), Some(id("0")));
    assert_eq!(mixer.rooms_destroyed(), 1);
    match events.recv().await.unwrap() {
        BridgeEvent::End {
            conference_id,
            recording,
            ..
        } => {
            assert_eq!(conference_id, id("0"));
            assert!(recording.is_none());
        }
        other => panic!("expected MeetmeEnd, got {other:?}"),
    }
}

#[tokio::test]
async fn test_out_of_range_and_named_rooms_bypass_map() {
    let (registry, _) = registry();
    let big = registry
        .find_or_create(&id("5000"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    let named = registry
        .find_or_create(&id("sales"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registry.free_room_number(), Some(id("0")));
    assert_eq!(registry.list().len(), 2);
    registry.dispose(big).await;
    registry.dispose(named).await;
    assert!(registry.list().is_empty());
}

#[tokio::test]
async fn test_small_room_space_runs_out() {
    let mixer = Arc::new(MockMixer::new());
    let registry = Registry::new(mixer, EventBus::default(), 2);
    let a = registry
        .find_or_create(&id("0"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    let b = registry
        .find_or_create(&id("1"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    assert_eq!(registry.free_room_number(), None);
    registry.dispose(a).await;
    assert_eq!(registry.free_room_number(), Some(id("0")));
    registry.dispose(b).await;
}

#[tokio::test]
async fn test_listing_shows_newest_first() {
    let (registry, _) = registry();
    let first = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    let second = registry
        .find_or_create(&id("601"), &RoomRequest::configured(None, None))
        .await
        .unwrap()
        .unwrap();

    let rooms = registry.list();
    assert_eq!(rooms.len(), 2);
    assert_eq!(rooms[0].id, id("601"));
    assert!(!rooms[0].is_dynamic);
    assert_eq!(rooms[1].id, id("600"));
    assert!(rooms[1].is_dynamic);

    registry.dispose(first).await;
    registry.dispose(second).await;
}

#[tokio::test]
async fn test_refcount_disposes_exactly_once() {
    let (registry, mixer) = registry();
    let first = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    let second = registry.acquire(&id("600")).await.unwrap();
    assert_eq!(mixer.rooms_created(), 1);

    assert!(!registry.dispose(first).await);
    assert!(registry.is_active(&id("600")));
    assert!(registry.dispose(second).await);
    assert!(!registry.is_active(&id("600")));
    assert_eq!(mixer.rooms_destroyed(), 1);
}

#[tokio::test]
async fn test_concurrent_dispose_frees_once() {
    let (registry, mixer) = registry();
    let mut refs = Vec::new();
    for _ in 0..8 {
        refs.push(
            registry
                .find_or_create(&id("700"), &RoomRequest::dynamic(None))
                .await
                .unwrap()
                .unwrap(),
        );
    }

    let mut tasks = Vec::new();
    for conf in refs {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move { registry.dispose(conf).await }));
    }
    let mut destroyed = 0;
    for task in tasks {
        if task.await.unwrap() {
            destroyed += 1;
        }
    }
    assert_eq!(destroyed, 1);
    assert_eq!(mixer.rooms_destroyed(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_concurrent_creates_share_one_room() {
    let (registry, mixer) = registry();
    let mut tasks = Vec::new();
    for _ in 0..8 {
        let registry = Arc::clone(&registry);
        tasks.push(tokio::spawn(async move {
            registry
                .find_or_create(&id("800"), &RoomRequest::dynamic(None))
                .await
                .unwrap()
                .unwrap()
        }));
    }
    let mut refs = Vec::new();
    for task in tasks {
        refs.push(task.await.unwrap());
    }

    assert_eq!(mixer.rooms_created(), 1);
    assert_eq!(registry.list().len(), 1);
    for conf in refs {
        registry.dispose(conf).await;
    }
    assert_eq!(mixer.rooms_destroyed(), 1);
}

#[tokio::test]
async fn test_mixer_failure_creates_nothing() {
    let mixer = Arc::new(MockMixer::new().failing_create());
    let registry = Registry::new(mixer, EventBus::default(), DEFAULT_ROOM_ID_SPACE);
    let result = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await;
    assert!(matches!(result, Err(BridgeError::Mixer(_))));
    assert!(!registry.is_active(&id("600")));
    assert_eq!(registry.free_room_number(), Some(id("0")));
}

#[tokio::test]
async fn test_admit_assigns_sequential_numbers() {
    let (registry, _) = registry();
    let conf = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();

    let a = registry.admit(&conf, info("SIP/a"), Policy::parse("")).unwrap();
    let b = registry.admit(&conf, info("SIP/b"), Policy::parse("A")).unwrap();
    let c = registry.admit(&conf, info("SIP/c"), Policy::parse("")).unwrap();
    assert_eq!(
        (a.user_no, b.user_no, c.user_no),
        (UserNo(1), UserNo(2), UserNo(3))
    );
    assert_eq!(c.status.participants, 3);
    assert_eq!(c.status.marked, 1);

    let departed = registry.depart(&conf, UserNo(2)).unwrap();
    assert_eq!(departed.remaining, 2);
    assert_eq!(registry.status(&conf).unwrap().marked, 0);
    assert!(registry.depart(&conf, UserNo(2)).is_none());

    let d = registry.admit(&conf, info("SIP/d"), Policy::parse("")).unwrap();
    assert_eq!(d.user_no, UserNo(4));
    registry.dispose(conf).await;
}

#[tokio::test]
async fn test_locked_room_admits_only_admins() {
    let (registry, _) = registry();
    let conf = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    registry
        .with_conference(&conf, |c| c.set_locked(true))
        .unwrap();

    let rejected = registry.admit(&conf, info("SIP/a"), Policy::parse(""));
    assert!(matches!(rejected, Err(BridgeError::RoomLocked(_))));
    assert_eq!(registry.count(&id("600")), 0);

    let admin = registry.admit(&conf, info("SIP/b"), Policy::parse("a"));
    assert!(admin.is_ok());
    assert_eq!(registry.count(&id("600")), 1);
    registry.dispose(conf).await;
}

#[tokio::test]
async fn test_start_muted_sets_admin_mute() {
    let (registry, _) = registry();
    let conf = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    let admitted = registry
        .admit(&conf, info("SIP/a"), Policy::parse("m"))
        .unwrap();
    assert!(admitted.control.flags().contains(AdminFlags::MUTED));
    registry.dispose(conf).await;
}

#[tokio::test]
async fn test_independent_registries_are_isolated() {
    let (first, _) = registry();
    let (second, _) = registry();
    let conf = first
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    assert!(first.is_active(&id("600")));
    assert!(!second.is_active(&id("600")));
    first.dispose(conf).await;
}

#[tokio::test(start_paused = true)]
async fn test_recorded_room_teardown_waits_for_file() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, mixer) = registry();
    let mut events = registry.events().subscribe();
    let conf = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();

    let target = RecordingTarget::default_for(dir.path(), &id("600"), "call.1", RecordingFormat::Sln);
    assert!(registry.start_recording(&conf, &target).unwrap());
    // A second request while recording is a no-op
    assert!(!registry.start_recording(&conf, &target).unwrap());
    assert_eq!(
        registry.list()[0].recording,
        RecordingState::Active
    );

    tokio::time::sleep(Duration::from_millis(200)).await;
    assert!(registry.dispose(conf).await);
    assert_eq!(mixer.rooms_destroyed(), 1);

    let end = loop {
        let event = events.recv().await.unwrap();
        if event.name() == "MeetmeEnd" {
            break event;
        }
    };
    match end {
        BridgeEvent::End { recording, .. } => {
            assert_eq!(recording, Some(target.path().display().to_string()));
        }
        other => panic!("expected MeetmeEnd, got {other:?}"),
    }
    let bytes = tokio::fs::read(target.path()).await.unwrap();
    assert!(!bytes.is_empty());
    assert_eq!(bytes.len() % 2, 0);
}

#[tokio::test(start_paused = true)]
async fn test_rejoin_during_teardown_gets_fresh_room() {
    let dir = tempfile::tempdir().unwrap();
    let (registry, mixer) = registry();
    let conf = registry
        .find_or_create(&id("600"), &RoomRequest::dynamic(None))
        .await
        .unwrap()
        .unwrap();
    let target = RecordingTarget::default_for(dir.path(), &id("600"), "call.1", RecordingFormat::Wav);
    registry.start_recording(&conf, &target).unwrap();

    let teardown = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move { registry.dispose(conf).await })
    };
    let rejoin = {
        let registry = Arc::clone(&registry);
        tokio::spawn(async move {
            registry
                .find_or_create(&id("600"), &RoomRequest::dynamic(None))
                .await
        })
    };

    assert!(teardown.await.unwrap());
    let fresh = rejoin.await.unwrap().unwrap().unwrap();
    assert!(registry.is_active(&id("600")));
    assert_eq!(mixer.rooms_created(), 2);
    assert_eq!(mixer.live_rooms(), 1);
    registry.dispose(fresh).await;
}
