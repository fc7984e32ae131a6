//! Admission tests: room selection, static and dynamic rooms, PIN gates.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use bridge_test_utils::{settle, TestBridge, TestChannel};
use common::types::ConferenceId;
use meetme_bridge::errors::BridgeError;

const ROOMS: &str = r#"
[rooms]
conf = ["700,1234", "701", "800,1234,9999", "900,,4321"]
"#;

fn id(s: &str) -> ConferenceId {
    ConferenceId::new(s).unwrap()
}

fn count(prompts: &[String], name: &str) -> usize {
    prompts.iter().filter(|p| *p == name).count()
}

#[tokio::test(start_paused = true)]
async fn test_unknown_room_from_arguments_fails() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/a-0001");
    let caller = channel.handle();

    let result = bridge.call(channel, "601").await.unwrap();
    assert!(matches!(result, Err(BridgeError::ConferenceNotFound(room)) if room == "601"));
    assert!(caller.heard("conf-invalid"));
    assert!(!caller.heard("conf-getconfno"));
    assert!(bridge.registry.list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_prompted_room_retries_until_found() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["999", "701"]);
    let caller = channel.handle();

    let call = bridge.call(channel, "");
    bridge.wait_for_count("701", 1).await;
    assert_eq!(count(&caller.prompts(), "conf-getconfno"), 2);
    assert!(caller.heard("conf-invalid"));

    caller.hang_up();
    call.await.unwrap().unwrap();
    assert!(!bridge.registry.is_active(&id("701")));
}

#[tokio::test(start_paused = true)]
async fn test_prompted_room_gives_up_after_budget() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["", "12a", "555"]);
    let caller = channel.handle();

    let result = bridge.call(channel, "").await.unwrap();
    assert!(matches!(result, Err(BridgeError::InvalidRoomNumber(_))));
    assert_eq!(count(&caller.prompts(), "conf-getconfno"), 3);
    assert_eq!(count(&caller.prompts(), "conf-invalid"), 3);
}

#[tokio::test(start_paused = true)]
async fn test_static_room_pin_retries() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["1111", "2222", "1234"]);
    let caller = channel.handle();

    let call = bridge.call(channel, "700");
    bridge.wait_for_count("700", 1).await;
    assert_eq!(count(&caller.prompts(), "conf-getpin"), 3);
    assert_eq!(count(&caller.prompts(), "conf-invalidpin"), 2);
    assert!(!bridge.registry.participants(&id("700")).unwrap()[0].is_admin);

    caller.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pin_exhausted_releases_room() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["1", "2", "3"]);
    let caller = channel.handle();

    let result = bridge.call(channel, "700").await.unwrap();
    assert!(matches!(result, Err(BridgeError::PinRejected(room)) if room == "700"));
    assert_eq!(count(&caller.prompts(), "conf-invalidpin"), 3);
    assert!(!bridge.registry.is_active(&id("700")));
    assert_eq!(bridge.mixer.rooms_created(), 1);
    assert_eq!(bridge.mixer.rooms_destroyed(), 1);
}

#[tokio::test(start_paused = true)]
async fn test_pin_attempt_budget_is_configurable() {
    let bridge = TestBridge::new().with_rooms(ROOMS).with_pin_attempts(1).build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["1", "1234"]);

    let result = bridge.call(channel, "700").await.unwrap();
    assert!(matches!(result, Err(BridgeError::PinRejected(_))));
}

#[tokio::test(start_paused = true)]
async fn test_admin_pin_grants_admin() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/boss-0001").with_digits(["9999"]);
    let boss = channel.handle();

    let call = bridge.call(channel, "800");
    bridge.wait_for_count("800", 1).await;
    assert!(bridge.registry.participants(&id("800")).unwrap()[0].is_admin);

    boss.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_admin_only_pin_skips_plain_callers() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/a-0001");
    let caller = channel.handle();

    let call = bridge.call(channel, "900");
    bridge.wait_for_count("900", 1).await;
    assert!(!caller.heard("conf-getpin"));
    caller.hang_up();
    call.await.unwrap().unwrap();

    // An admin must know the admin PIN
    let channel = TestChannel::new("SIP/boss-0001").with_digits(["4321"]);
    let boss = channel.handle();
    let call = bridge.call(channel, "900,a");
    bridge.wait_for_count("900", 1).await;
    assert!(boss.heard("conf-getpin"));
    boss.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_preset_pin_is_tried_once() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();

    let channel = TestChannel::new("SIP/a-0001");
    let good = channel.handle();
    let call = bridge.call(channel, "700,,1234");
    bridge.wait_for_count("700", 1).await;
    assert!(!good.heard("conf-getpin"));
    good.hang_up();
    call.await.unwrap().unwrap();

    let channel = TestChannel::new("SIP/b-0001").with_digits(["1234"]);
    let bad = channel.handle();
    let result = bridge.call(channel, "700,,0000").await.unwrap();
    assert!(matches!(result, Err(BridgeError::PinRejected(_))));
    assert!(!bad.heard("conf-getpin"));
    assert_eq!(count(&bad.prompts(), "conf-invalidpin"), 1);
}

#[tokio::test(start_paused = true)]
async fn test_always_prompt_ignores_preset_pin() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["1234"]);
    let caller = channel.handle();

    let call = bridge.call(channel, "700,P,0000");
    bridge.wait_for_count("700", 1).await;
    assert_eq!(count(&caller.prompts(), "conf-getpin"), 1);
    caller.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_room_with_pin_argument() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/a-0001");
    let owner = channel.handle();
    let call = bridge.call(channel, "650,d,55");
    bridge.wait_for_count("650", 1).await;
    assert!(!owner.heard("conf-getpin"));
    assert!(bridge.registry.list()[0].has_pin);

    let channel = TestChannel::new("SIP/b-0001").with_digits(["55"]);
    let guest = channel.handle();
    let guest_call = bridge.call(channel, "650");
    bridge.wait_for_count("650", 2).await;
    assert!(guest.heard("conf-getpin"));

    owner.hang_up();
    guest.hang_up();
    call.await.unwrap().unwrap();
    guest_call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_dynamic_pin_creator_asked_once() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/a-0001").with_digits(["4321"]);
    let owner = channel.handle();

    let call = bridge.call(channel, "660,D");
    bridge.wait_for_count("660", 1).await;
    assert_eq!(count(&owner.prompts(), "conf-getpin"), 1);
    assert!(bridge.registry.list()[0].has_pin);

    let channel = TestChannel::new("SIP/b-0001").with_digits(["0000", "4321"]);
    let guest = channel.handle();
    let guest_call = bridge.call(channel, "660");
    bridge.wait_for_count("660", 2).await;
    assert_eq!(count(&guest.prompts(), "conf-invalidpin"), 1);

    owner.hang_up();
    guest.hang_up();
    call.await.unwrap().unwrap();
    guest_call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_empty_room_pick_dynamic_takes_lowest_slot() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/a-0001");
    let first = channel.handle();
    let first_call = bridge.call(channel, ",de");
    bridge.wait_for_count("0", 1).await;
    assert!(first.heard("conf-enteringno"));
    assert_eq!(first.said(), vec!["0".to_string()]);

    let channel = TestChannel::new("SIP/b-0001");
    let second = channel.handle();
    let second_call = bridge.call(channel, ",de");
    bridge.wait_for_count("1", 1).await;
    assert_eq!(second.said(), vec!["1".to_string()]);

    first.hang_up();
    second.hang_up();
    first_call.await.unwrap().unwrap();
    second_call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_empty_room_pick_static_without_pin() {
    let bridge = TestBridge::new().with_rooms(ROOMS).build();

    let channel = TestChannel::new("SIP/a-0001").with_digits(["1234"]);
    let any = channel.handle();
    let any_call = bridge.call(channel, ",e");
    bridge.wait_for_count("700", 1).await;
    assert_eq!(any.said(), vec!["700".to_string()]);

    let channel = TestChannel::new("SIP/b-0001");
    let no_pin = channel.handle();
    let no_pin_call = bridge.call(channel, ",E");
    bridge.wait_for_count("701", 1).await;
    assert_eq!(no_pin.said(), vec!["701".to_string()]);
    assert!(!no_pin.heard("conf-getpin"));

    any.hang_up();
    no_pin.hang_up();
    any_call.await.unwrap().unwrap();
    no_pin_call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_no_empty_room_available() {
    let bridge = TestBridge::new().with_room_id_space(1).build();
    let channel = TestChannel::new("SIP/a-0001");
    let first = channel.handle();
    let first_call = bridge.call(channel, ",de");
    bridge.wait_for_count("0", 1).await;

    let channel = TestChannel::new("SIP/b-0001");
    let second = channel.handle();
    let result = bridge.call(channel, ",de").await.unwrap();
    assert!(matches!(result, Err(BridgeError::RoomUnavailable(_))));
    assert!(second.heard("conf-noempty"));

    first.hang_up();
    first_call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_hangup_while_prompting_for_room() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/a-0001");
    channel.handle().hang_up();

    let result = bridge.call(channel.answered(), "").await.unwrap();
    assert!(matches!(result, Err(BridgeError::Channel(_))));
    assert!(bridge.registry.list().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_count_reports_participants() {
    let bridge = TestBridge::new().build();
    assert_eq!(bridge.admission.count("600").unwrap(), 0);
    assert!(matches!(
        bridge.admission.count(""),
        Err(BridgeError::MissingArgument(_))
    ));

    let channel = TestChannel::new("SIP/a-0001");
    let caller = channel.handle();
    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    assert_eq!(bridge.admission.count("600").unwrap(), 1);

    caller.hang_up();
    call.await.unwrap().unwrap();
    settle().await;
    assert_eq!(bridge.admission.count("600").unwrap(), 0);
}
