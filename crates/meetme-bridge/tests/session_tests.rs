//! Participant session tests: calls run through admission against the mock
//! mixer in paused time.

#![allow(clippy::unwrap_used, clippy::expect_used, clippy::panic, clippy::indexing_slicing)]

use bridge_test_utils::{next_event, settle, MockMixer, ScriptedDetector, TestBridge, TestChannel};
use common::types::{ConferenceId, UserNo};
use meetme_bridge::actors::session::DEFAULT_POLL_INTERVAL;
use meetme_bridge::actors::LeaveReason;
use meetme_bridge::audio::{AudioFrame, TalkState};
use meetme_bridge::channel::GainDirection;
use meetme_bridge::errors::BridgeError;
use meetme_bridge::events::BridgeEvent;
use meetme_bridge::mixer::{MixMode, RoomSound};
use std::time::Duration;

fn id(s: &str) -> ConferenceId {
    ConferenceId::new(s).unwrap()
}

#[tokio::test(start_paused = true)]
async fn test_solo_caller_joins_and_hangs_up() {
    let bridge = TestBridge::new().build();
    let mut events = bridge.events();
    let channel = TestChannel::new("SIP/alice-0001");
    let alice = channel.handle();

    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    assert!(alice.is_answered());
    assert!(alice.is_linear());
    assert!(alice.heard("conf-onlyperson"));
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::FULL_DUPLEX));
    assert!(alice.frames_written() > 0, "mixed audio should reach the caller");

    alice.hang_up();
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::Hangup);
    assert_eq!(outcome.user_no, Some(UserNo(1)));
    assert!(outcome.reason.is_success());

    assert!(bridge.mixer.port_closed(0));
    assert!(!bridge.registry.is_active(&id("600")));
    assert_eq!(bridge.mixer.rooms_destroyed(), 1);
    assert_eq!(bridge.mixer.sounds(), vec![RoomSound::Enter, RoomSound::Leave]);

    let mut names = Vec::new();
    while let Ok(event) = events.try_recv() {
        names.push(event.name());
    }
    assert_eq!(
        names,
        vec!["MeetmeStart", "MeetmeJoin", "MeetmeLeave", "MeetmeEnd"]
    );
}

#[tokio::test(start_paused = true)]
async fn test_quiet_admin_plays_no_sounds() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/admin-0001");
    let admin = channel.handle();

    let call = bridge.call(channel, "600,dqa");
    bridge.wait_for_count("600", 1).await;
    settle().await;
    admin.hang_up();
    call.await.unwrap().unwrap();

    assert!(admin.prompts().is_empty());
    assert!(bridge.mixer.sounds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_kick_removes_participant() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/bob-0001");
    let bob = channel.handle();

    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    bridge.control.kick_one(&id("600"), UserNo(1)).unwrap();
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::Kicked);
    assert!(bob.heard("conf-kicked"));
    assert!(!bridge.registry.is_active(&id("600")));
}

#[tokio::test(start_paused = true)]
async fn test_kick_racing_hangup_still_succeeds() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/bob-0002");
    let bob = channel.handle();

    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    bridge.control.kick_one(&id("600"), UserNo(1)).unwrap();
    bob.hang_up();
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::Kicked);
    assert!(outcome.reason.is_success());
    assert!(!bob.heard("conf-kicked"));
    assert!(!bridge.registry.is_active(&id("600")));
}

#[tokio::test(start_paused = true)]
async fn test_hangup_during_whisper_is_a_hangup() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/una-0001");
    let una = channel.handle();

    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    bridge
        .control
        .whisper(&id("600"), UserNo(1), "conf-hurry")
        .unwrap();
    una.hang_up();
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::Hangup);
    assert!(!una.heard("conf-hurry"));
}

#[tokio::test(start_paused = true)]
async fn test_admin_mute_drops_talk_bit() {
    let bridge = TestBridge::new().build();
    let mut events = bridge.events();
    let channel = TestChannel::new("SIP/carol-0001");
    let carol = channel.handle();

    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    bridge.control.mute_one(&id("600"), UserNo(1)).unwrap();
    settle().await;
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::LISTEN_ONLY));
    match next_event(&mut events, "MeetmeMute").await {
        BridgeEvent::Mute { participant, muted } => {
            assert!(muted);
            assert_eq!(participant.user_no, UserNo(1));
        }
        other => panic!("expected MeetmeMute, got {other:?}"),
    }

    assert!(bridge.control.unmute_one(&id("600"), UserNo(1)).unwrap());
    settle().await;
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::FULL_DUPLEX));
    match next_event(&mut events, "MeetmeMute").await {
        BridgeEvent::Mute { muted, .. } => assert!(!muted),
        other => panic!("expected MeetmeMute, got {other:?}"),
    }

    carol.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_listen_only_never_talks() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/dave-0001");
    let dave = channel.handle();

    let call = bridge.call(channel, "600,dl");
    bridge.wait_for_count("600", 1).await;
    settle().await;
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::LISTEN_ONLY));

    dave.send_voice(AudioFrame::silence());
    settle().await;
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::LISTEN_ONLY));

    dave.hang_up();
    call.await.unwrap().unwrap();
    // Monitors enter and leave silently
    assert!(bridge.mixer.sounds().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_star_menu_toggles_self_mute() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/erin-0001");
    let erin = channel.handle();

    let call = bridge.call(channel, "600,ds");
    bridge.wait_for_count("600", 1).await;
    settle().await;
    assert!(erin.tone_suppression());

    erin.press_during_prompt('1');
    erin.send_dtmf('*');
    settle().await;

    assert!(erin.heard("conf-usermenu"));
    assert!(erin.heard("conf-muted"));
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::LISTEN_ONLY));
    assert!(bridge.mixer.port_history(0).contains(&None), "menu detaches the port");
    let summary = &bridge.registry.participants(&id("600")).unwrap()[0];
    assert!(summary.self_muted);
    assert!(!summary.admin_muted);

    // An admin unmute does not clear a self mute
    assert!(!bridge.control.unmute_one(&id("600"), UserNo(1)).unwrap());

    erin.hang_up();
    call.await.unwrap().unwrap();
    assert!(!erin.tone_suppression());
}

#[tokio::test(start_paused = true)]
async fn test_volume_keys_keep_menu_open() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("DAHDI/1-1").with_hardware_gain();
    let frank = channel.handle();

    let call = bridge.call(channel, "600,ds");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    frank.press_during_prompt('9');
    frank.send_dtmf('*');
    settle().await;
    assert_eq!(frank.gains(), vec![(GainDirection::Receive, 6)]);

    // Still in the menu: the next digit is a command, not a new menu
    frank.send_dtmf('8');
    settle().await;
    let menus = frank
        .prompts()
        .iter()
        .filter(|p| *p == "conf-usermenu")
        .count();
    assert_eq!(menus, 1);
    assert!(!frank.heard("conf-errormenu"));
    assert_eq!(
        frank.gains().last(),
        Some(&(GainDirection::Receive, 6))
    );

    frank.hang_up();
    call.await.unwrap().unwrap();
    let gains = frank.gains();
    assert_eq!(
        &gains[gains.len() - 2..],
        &[(GainDirection::Receive, 0), (GainDirection::Transmit, 0)]
    );
}

#[tokio::test(start_paused = true)]
async fn test_invalid_menu_key_closes_menu() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/gina-0001");
    let gina = channel.handle();

    let call = bridge.call(channel, "600,ds");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    gina.press_during_prompt('5');
    gina.send_dtmf('*');
    settle().await;
    assert!(gina.heard("conf-errormenu"));

    // Closed again, so `*` reopens the menu
    gina.send_dtmf('*');
    settle().await;
    let menus = gina
        .prompts()
        .iter()
        .filter(|p| *p == "conf-usermenu")
        .count();
    assert_eq!(menus, 2);

    gina.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_admin_menu_locks_room() {
    let bridge = TestBridge::new().build();
    let mut events = bridge.events();
    let channel = TestChannel::new("SIP/admin-0001");
    let admin = channel.handle();

    let call = bridge.call(channel, "600,dsa");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    admin.press_during_prompt('2');
    admin.send_dtmf('*');
    settle().await;
    assert!(admin.heard("conf-adminmenu"));
    assert!(admin.heard("conf-lockednow"));
    assert!(bridge.registry.list()[0].locked);
    match next_event(&mut events, "MeetmeLock").await {
        BridgeEvent::Lock { locked, .. } => assert!(locked),
        other => panic!("expected MeetmeLock, got {other:?}"),
    }

    // A plain caller is now turned away at the door
    let late = TestChannel::new("SIP/late-0001");
    let late_handle = late.handle();
    let outcome = bridge.call(late, "600").await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::Locked);
    assert!(!outcome.reason.is_success());
    assert_eq!(outcome.user_no, None);
    assert!(late_handle.heard("conf-locked"));
    assert_eq!(bridge.registry.count(&id("600")), 1);

    admin.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_admin_menu_ejects_last_caller() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/admin-0001");
    let admin = channel.handle();
    let admin_call = bridge.call(channel, "600,dsa");
    bridge.wait_for_count("600", 1).await;

    let guest = bridge.call(TestChannel::new("SIP/guest-0001"), "600");
    bridge.wait_for_count("600", 2).await;
    settle().await;

    admin.press_during_prompt('3');
    admin.send_dtmf('*');
    let outcome = guest.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::Kicked);
    assert_eq!(bridge.registry.count(&id("600")), 1);

    admin.hang_up();
    admin_call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_menu_star_alerts_operator() {
    let bridge = TestBridge::new().build();
    let mut events = bridge.events();
    let channel = TestChannel::new("SIP/hank-0001");
    let hank = channel.handle();

    let call = bridge.call(channel, "600,ds");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    hank.press_during_prompt('*');
    hank.send_dtmf('*');
    settle().await;
    assert!(hank.heard("conf-sysopreq"));
    assert_eq!(next_event(&mut events, "MeetmeAlert").await.name(), "MeetmeAlert");

    hank.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_pound_exits_with_p() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/ivan-0001");
    let ivan = channel.handle();

    let call = bridge.call(channel, "600,dp");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    ivan.send_dtmf('#');
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::PoundExit);
}

#[tokio::test(start_paused = true)]
async fn test_pound_ignored_without_p() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/judy-0001");
    let judy = channel.handle();

    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    judy.send_dtmf('#');
    settle().await;
    assert_eq!(bridge.registry.count(&id("600")), 1);

    judy.hang_up();
    assert_eq!(call.await.unwrap().unwrap().reason, LeaveReason::Hangup);
}

#[tokio::test(start_paused = true)]
async fn test_exit_context_jumps_on_known_digit() {
    let bridge = TestBridge::new().build();
    let mut events = bridge.events();
    let channel = TestChannel::new("SIP/kim-0001")
        .with_variable("MEETME_EXIT_CONTEXT", "conf-exits")
        .with_goto_target("conf-exits", "1");
    let kim = channel.handle();

    let call = bridge.call(channel, "600,dXz");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    kim.send_dtmf('5');
    match next_event(&mut events, "MeetmeDTMF").await {
        BridgeEvent::Dtmf { digit, .. } => assert_eq!(digit, '5'),
        other => panic!("expected MeetmeDTMF, got {other:?}"),
    }
    settle().await;
    assert_eq!(bridge.registry.count(&id("600")), 1);

    kim.send_dtmf('1');
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::ExitContext('1'));
    assert_eq!(
        kim.gotos(),
        vec![("conf-exits".to_string(), "1".to_string())]
    );
}

#[tokio::test(start_paused = true)]
async fn test_exit_context_falls_back_to_context() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/lee-0001")
        .with_variable("CONTEXT", "default")
        .with_goto_target("default", "0");
    let lee = channel.handle();

    let call = bridge.call(channel, "600,dX");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    lee.send_dtmf('0');
    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::ExitContext('0'));
}

#[tokio::test(start_paused = true)]
async fn test_wait_for_marked_times_out() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/mia-0001");
    let mia = channel.handle();

    let call = bridge.call(channel, "600,dw(5)");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    assert!(mia.heard("conf-waitforleader"));
    assert!(!mia.heard("conf-onlyperson"));
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::empty()));

    let outcome = call.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::WaitMarkedTimeout);
    assert!(!outcome.reason.is_success());
    assert!(outcome.duration >= Duration::from_secs(5));
    assert!(
        outcome.duration <= Duration::from_secs(5) + DEFAULT_POLL_INTERVAL,
        "left {:?} after joining",
        outcome.duration
    );
}

#[tokio::test(start_paused = true)]
async fn test_marked_arrival_and_departure() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/ned-0001");
    let ned = channel.handle();
    let waiter = bridge.call(channel, "600,dwx");
    bridge.wait_for_count("600", 1).await;
    settle().await;
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::empty()));

    let channel = TestChannel::new("SIP/leader-0001");
    let leader = channel.handle();
    let leader_call = bridge.call(channel, "600,A");
    bridge.wait_for_count("600", 2).await;
    settle().await;

    assert!(ned.heard("conf-placeintoconf"));
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::FULL_DUPLEX));
    assert_eq!(bridge.registry.list()[0].marked, 1);

    leader.hang_up();
    leader_call.await.unwrap().unwrap();

    let outcome = waiter.await.unwrap().unwrap();
    assert_eq!(outcome.reason, LeaveReason::MarkedLeft);
    assert!(outcome.reason.is_success());
    assert!(ned.heard("conf-leaderhasleft"));
}

#[tokio::test(start_paused = true)]
async fn test_marked_leader_hears_waiting_count() {
    let bridge = TestBridge::new().build();
    let waiter = TestChannel::new("SIP/olga-0001");
    let olga = waiter.handle();
    let waiting = bridge.call(waiter, "600,dw");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    let channel = TestChannel::new("SIP/leader-0001");
    let leader = channel.handle();
    let leader_call = bridge.call(channel, "600,Aw");
    bridge.wait_for_count("600", 2).await;
    settle().await;

    assert_eq!(leader.said(), vec!["1".to_string()]);
    assert!(leader.heard("conf-userwilljoin"));

    leader.hang_up();
    olga.hang_up();
    leader_call.await.unwrap().unwrap();
    waiting.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_music_on_hold_while_alone() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/pat-0001");
    let pat = channel.handle();
    let call = bridge.call(channel, "600,dM");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    assert!(pat.is_on_hold());
    assert_eq!(pat.holds_started(), 1);
    let written = pat.frames_written();
    settle().await;
    assert_eq!(pat.frames_written(), written, "no mixed audio while on hold");

    let other = TestChannel::new("SIP/quinn-0001");
    let quinn = other.handle();
    let other_call = bridge.call(other, "600");
    bridge.wait_for_count("600", 2).await;
    settle().await;
    assert!(!pat.is_on_hold());
    assert!(pat.frames_written() > written);

    quinn.hang_up();
    other_call.await.unwrap().unwrap();
    settle().await;
    assert!(pat.is_on_hold());
    assert_eq!(pat.holds_started(), 2);

    pat.hang_up();
    call.await.unwrap().unwrap();
    assert!(!pat.is_on_hold());
}

#[tokio::test(start_paused = true)]
async fn test_whisper_plays_privately() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/rita-0001");
    let rita = channel.handle();
    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    bridge
        .control
        .whisper(&id("600"), UserNo(1), "conf-secret")
        .unwrap();
    settle().await;

    assert!(rita.heard("conf-secret"));
    assert!(bridge
        .mixer
        .port_history(0)
        .contains(&Some(MixMode::TALK_ONLY)));
    assert_eq!(bridge.mixer.port_mode(0), Some(MixMode::FULL_DUPLEX));

    rita.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_transport_swap_reopens_port() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/sam-0001");
    let sam = channel.handle();
    let call = bridge.call(channel, "600,d");
    bridge.wait_for_count("600", 1).await;
    settle().await;
    assert_eq!(bridge.mixer.port_transport(0), Some(1));

    sam.set_transport(2);
    settle().await;
    assert_eq!(bridge.mixer.ports_opened(), 2);
    assert!(bridge.mixer.port_closed(0));
    assert_eq!(bridge.mixer.port_transport(1), Some(2));
    assert_eq!(bridge.mixer.port_mode(1), Some(MixMode::FULL_DUPLEX));

    sam.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_talker_detection_reports_edges() {
    let bridge = TestBridge::new()
        .with_detector(ScriptedDetector::new([0, 2000], 2000).factory())
        .build();
    let mut events = bridge.events();
    let channel = TestChannel::new("SIP/tom-0001");
    let tom = channel.handle();
    let call = bridge.call(channel, "600,dT");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    tom.send_voice(AudioFrame::silence());
    match next_event(&mut events, "MeetmeTalking").await {
        BridgeEvent::Talking { talking, .. } => assert!(talking),
        other => panic!("expected MeetmeTalking, got {other:?}"),
    }
    settle().await;
    assert_eq!(
        bridge.registry.participants(&id("600")).unwrap()[0].talking,
        TalkState::Talking
    );

    tom.send_voice(AudioFrame::silence());
    match next_event(&mut events, "MeetmeTalking").await {
        BridgeEvent::Talking { talking, .. } => assert!(!talking),
        other => panic!("expected MeetmeTalking, got {other:?}"),
    }
    assert_eq!(bridge.mixer.frames_written(0), 2);

    tom.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_optimize_talker_drops_silence() {
    let bridge = TestBridge::new()
        .with_detector(ScriptedDetector::new([2000, 0], 0).factory())
        .build();
    let channel = TestChannel::new("SIP/uma-0001");
    let uma = channel.handle();
    let call = bridge.call(channel, "600,do");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    uma.send_voice(AudioFrame::silence());
    settle().await;
    assert_eq!(bridge.mixer.frames_written(0), 0);

    uma.send_voice(AudioFrame::silence());
    settle().await;
    assert_eq!(bridge.mixer.frames_written(0), 1);

    uma.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_optimize_talker_without_detector_forwards_audio() {
    let bridge = TestBridge::new().build();
    let channel = TestChannel::new("SIP/vic-0001");
    let vic = channel.handle();
    let call = bridge.call(channel, "600,do");
    bridge.wait_for_count("600", 1).await;
    settle().await;

    vic.send_voice(AudioFrame::silence());
    settle().await;
    assert_eq!(bridge.mixer.frames_written(0), 1);

    vic.hang_up();
    call.await.unwrap().unwrap();
}

#[tokio::test(start_paused = true)]
async fn test_announce_count_on_join() {
    let bridge = TestBridge::new().build();
    let first = TestChannel::new("SIP/a-0001");
    let a = first.handle();
    let first_call = bridge.call(first, "600,d");
    bridge.wait_for_count("600", 1).await;

    let second = TestChannel::new("SIP/b-0001");
    let b = second.handle();
    let second_call = bridge.call(second, "600,c");
    bridge.wait_for_count("600", 2).await;

    let third = TestChannel::new("SIP/c-0001");
    let c = third.handle();
    let third_call = bridge.call(third, "600,c");
    bridge.wait_for_count("600", 3).await;
    settle().await;

    assert!(b.heard("conf-onlyone"));
    assert!(c.heard("conf-thereare"));
    assert_eq!(c.said(), vec!["2".to_string()]);
    assert!(c.heard("conf-otherinparty"));

    for handle in [&a, &b, &c] {
        handle.hang_up();
    }
    for call in [first_call, second_call, third_call] {
        call.await.unwrap().unwrap();
    }
    assert!(!bridge.registry.is_active(&id("600")));
}

#[tokio::test(start_paused = true)]
async fn test_port_open_failure_ends_only_that_session() {
    let bridge = TestBridge::new()
        .with_mixer(MockMixer::new().failing_open())
        .build();
    let mut events = bridge.events();

    let result = bridge.call(TestChannel::new("SIP/wes-0001"), "600,d").await.unwrap();
    assert!(matches!(result, Err(BridgeError::Mixer(_))));
    assert!(!bridge.registry.is_active(&id("600")));
    assert_eq!(next_event(&mut events, "MeetmeLeave").await.name(), "MeetmeLeave");
    assert_eq!(next_event(&mut events, "MeetmeEnd").await.name(), "MeetmeEnd");
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_ends_every_session() {
    let bridge = TestBridge::new().build();
    let first = bridge.call(TestChannel::new("SIP/x-0001"), "600,d");
    let second = bridge.call(TestChannel::new("SIP/y-0001"), "601,d");
    bridge.wait_for_count("600", 1).await;
    bridge.wait_for_count("601", 1).await;
    settle().await;

    bridge.cancel.cancel();
    for call in [first, second] {
        assert_eq!(call.await.unwrap().unwrap().reason, LeaveReason::Shutdown);
    }
    assert!(bridge.registry.list().is_empty());
    assert_eq!(bridge.mixer.live_rooms(), 0);
}

#[tokio::test(start_paused = true)]
async fn test_recording_option_starts_sidecar_once() {
    let dir = tempfile::tempdir().unwrap();
    let base = dir.path().join("board-call");
    let bridge = TestBridge::new()
        .with_recording_dir(dir.path().to_path_buf())
        .build();
    let mut events = bridge.events();

    let first = TestChannel::new("SIP/rec-0001")
        .with_variable("MEETME_RECORDINGFILE", base.to_str().unwrap())
        .with_variable("MEETME_RECORDINGFORMAT", "sln");
    let a = first.handle();
    let first_call = bridge.call(first, "600,dr");
    bridge.wait_for_count("600", 1).await;
    let second = TestChannel::new("SIP/rec-0002");
    let b = second.handle();
    let second_call = bridge.call(second, "600,r");
    bridge.wait_for_count("600", 2).await;
    settle().await;

    a.hang_up();
    b.hang_up();
    first_call.await.unwrap().unwrap();
    second_call.await.unwrap().unwrap();

    let expected = dir.path().join("board-call.sln");
    match next_event(&mut events, "MeetmeEnd").await {
        BridgeEvent::End { recording, .. } => {
            assert_eq!(recording, Some(expected.display().to_string()));
        }
        other => panic!("expected MeetmeEnd, got {other:?}"),
    }
    assert!(expected.exists());
    assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
}
