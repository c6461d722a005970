//! Feature adapters driven through a live in-memory session.

mod common;

use std::sync::Arc;
use std::time::Duration;

use common::{AlertCall, Harness, RecordingSink, settle};
use serde_json::json;
use tether_client::TaskGroup;
use tether_core::{Envelope, MatchId, MessageType, UserId};
use tether_features::{
    ActivityStatus, ChatAdapter, DeliveryStatus, Features, MatchingAdapter, NotificationsAdapter,
    PresenceAdapter, RevealOutcome, TracingAlertSink,
};
use tokio::time::sleep;

// ── Chat ────────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn typing_clears_five_seconds_after_last_start() {
    let mut h = Harness::connected().await;
    let chat = ChatAdapter::new(&h.session);
    let u2 = UserId::from("u2");

    let _ = h.push(MessageType::TypingStart, json!({"userId": "u2"})).await;
    assert!(chat.is_typing(&u2));
    assert_eq!(
        h.session.scheduler().live_tasks(TaskGroup::Feature),
        vec!["chat.typing"]
    );

    sleep(Duration::from_secs(4)).await;
    let _ = h.push(MessageType::TypingStart, json!({"userId": "u2"})).await;
    sleep(Duration::from_secs(4)).await;
    assert!(chat.is_typing(&u2), "second start resets the expiry");

    sleep(Duration::from_millis(1_500)).await;
    assert!(!chat.is_typing(&u2));
    assert!(h.session.scheduler().live_tasks(TaskGroup::Feature).is_empty());
}

#[tokio::test(start_paused = true)]
async fn typing_stop_clears_immediately_and_per_user() {
    let mut h = Harness::connected().await;
    let chat = ChatAdapter::new(&h.session);

    let _ = h.push(MessageType::TypingStart, json!({"userId": "u2"})).await;
    let _ = h.push(MessageType::TypingStart, json!({"userId": "u3"})).await;
    assert_eq!(chat.typing_users(), vec![UserId::from("u2"), UserId::from("u3")]);

    let _ = h.push(MessageType::TypingStop, json!({"userId": "u2"})).await;
    assert_eq!(chat.typing_users(), vec![UserId::from("u3")]);
    assert_eq!(
        h.session.scheduler().live_tasks(TaskGroup::Feature),
        vec!["chat.typing"]
    );
}

#[tokio::test(start_paused = true)]
async fn delivery_status_follows_reply_and_receipts() {
    let mut h = Harness::connected().await;
    let chat = ChatAdapter::new(&h.session);

    let id = chat.send_chat_message(&UserId::from("u2"), "hello").unwrap();
    assert_eq!(chat.status(id.as_str()), Some(DeliveryStatus::Pending));

    let sent = h.next_sent().await;
    assert_eq!(sent.message_type, MessageType::Message);
    assert_eq!(sent.id, id);
    assert_eq!(sent.payload_str("content"), Some("hello"));
    assert_eq!(sent.payload_str("recipientId"), Some("u2"));

    let payload = tether_core::protocol::payload_from(json!({"messageId": id})).unwrap();
    let _ = h
        .deliver(Envelope::reply(MessageType::MessageDelivered, payload, &id))
        .await;
    settle().await;
    assert_eq!(chat.status(id.as_str()), Some(DeliveryStatus::Delivered));

    let _ = h.push(MessageType::MessageRead, json!({"messageId": id})).await;
    assert_eq!(chat.status(id.as_str()), Some(DeliveryStatus::Read));

    // duplicate delivery receipt does not regress
    let _ = h.push(MessageType::MessageDelivered, json!({"messageId": id})).await;
    assert_eq!(chat.status(id.as_str()), Some(DeliveryStatus::Read));
}

#[tokio::test(start_paused = true)]
async fn lost_connection_fails_pending_chat_message() {
    let mut h = Harness::connected().await;
    let chat = ChatAdapter::new(&h.session);
    let id = chat.send_chat_message(&UserId::from("u2"), "hello?").unwrap();
    let _ = h.next_sent().await;

    let Harness { session, peer, .. } = h;
    peer.close(1006);
    settle().await;
    assert_eq!(chat.status(id.as_str()), Some(DeliveryStatus::Failed));
    drop(session);
}

#[tokio::test(start_paused = true)]
async fn incoming_messages_are_republished() {
    let mut h = Harness::connected().await;
    let chat = ChatAdapter::new(&h.session);
    let mut messages = chat.messages();

    let _ = h
        .push(
            MessageType::Message,
            json!({"messageId": "m-9", "senderId": "u2", "content": "hi there"}),
        )
        .await;
    let msg = messages.recv().await.unwrap();
    assert_eq!(msg.id, "m-9");
    assert_eq!(msg.sender, Some(UserId::from("u2")));
    assert_eq!(msg.content, "hi there");
}

#[tokio::test(start_paused = true)]
async fn typing_and_read_are_sent_fire_and_forget() {
    let mut h = Harness::connected().await;
    let chat = ChatAdapter::new(&h.session);
    let _ = chat.send_typing(&UserId::from("u2"), true).unwrap();
    let _ = chat.send_typing(&UserId::from("u2"), false).unwrap();
    let _ = chat.mark_as_read("m-9").unwrap();

    assert_eq!(h.next_sent().await.message_type, MessageType::TypingStart);
    assert_eq!(h.next_sent().await.message_type, MessageType::TypingStop);
    let read = h.next_sent().await;
    assert_eq!(read.message_type, MessageType::MessageRead);
    assert_eq!(read.payload_str("messageId"), Some("m-9"));
    assert_eq!(chat.status("m-9"), Some(DeliveryStatus::Read));
    settle().await;
    assert_eq!(h.session.status().pending, 0);
}

// ── Matching ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn match_lists_keep_last_ten_newest_first() {
    let mut h = Harness::connected().await;
    let matching = MatchingAdapter::new(&h.session);

    for n in 0..12 {
        let _ = h
            .push(MessageType::NewMatch, json!({"matchId": format!("m{n}")}))
            .await;
    }
    let matches = matching.new_matches();
    assert_eq!(matches.len(), 10);
    assert_eq!(matches[0].match_id, MatchId::from("m11"));
    assert_eq!(matches[9].match_id, MatchId::from("m2"));

    let _ = h
        .push(MessageType::MatchMutual, json!({"matchId": "m5", "userId": "u5"}))
        .await;
    assert_eq!(matching.mutual_matches()[0].user_id, Some(UserId::from("u5")));
}

#[tokio::test(start_paused = true)]
async fn reveal_round_trip() {
    let mut h = Harness::connected().await;
    let matching = MatchingAdapter::new(&h.session);
    let m1 = MatchId::from("m1");

    let _ = h.push(MessageType::RevealRequest, json!({"matchId": "m1"})).await;
    assert_eq!(matching.reveal_requests().len(), 1);

    let _ = matching.respond_to_reveal(&m1, true).unwrap();
    let sent = h.next_sent().await;
    assert_eq!(sent.message_type, MessageType::RevealAccepted);
    assert_eq!(sent.payload_str("matchId"), Some("m1"));
    assert!(matching.reveal_requests().is_empty());

    let _ = h.push(MessageType::RevealMutual, json!({"matchId": "m1"})).await;
    assert_eq!(matching.reveal_outcome(&m1), Some(RevealOutcome::Mutual));
    assert_eq!(matching.reveal_outcome(&MatchId::from("m2")), None);
}

#[tokio::test(start_paused = true)]
async fn match_actions_send_match_id() {
    let mut h = Harness::connected().await;
    let matching = MatchingAdapter::new(&h.session);
    let m = MatchId::from("m7");

    let _ = matching.send_like(&m).unwrap();
    let _ = matching.send_pass(&m).unwrap();
    let _ = matching.send_reveal_request(&m).unwrap();
    let _ = matching.respond_to_reveal(&m, false).unwrap();

    for expected in [
        MessageType::MatchLiked,
        MessageType::MatchPassed,
        MessageType::RevealRequest,
        MessageType::RevealDeclined,
    ] {
        let sent = h.next_sent().await;
        assert_eq!(sent.message_type, expected);
        assert_eq!(sent.payload_str("matchId"), Some("m7"));
    }
}

#[tokio::test(start_paused = true)]
async fn trust_and_profile_updates_are_kept() {
    let mut h = Harness::connected().await;
    let matching = MatchingAdapter::new(&h.session);
    assert!(matching.trust_score().is_none());

    let _ = h.push(MessageType::TrustScoreUpdate, json!({"score": 71})).await;
    let _ = h.push(MessageType::TrustScoreUpdate, json!({"score": 74})).await;
    let _ = h.push(MessageType::BgpUpdate, json!({"traits": [0.1, 0.9]})).await;

    assert_eq!(matching.trust_score().unwrap()["score"], json!(74));
    assert_eq!(matching.behavior_profile().unwrap()["traits"], json!([0.1, 0.9]));
}

// ── Presence ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn online_set_follows_server() {
    let mut h = Harness::connected().await;
    let presence = PresenceAdapter::new(&h.session);
    let u2 = UserId::from("u2");

    let _ = h
        .push(MessageType::UserOnline, json!({"userId": "u2", "status": "away"}))
        .await;
    let _ = h.push(MessageType::UserOnline, json!({"userId": "u1"})).await;
    assert_eq!(presence.online_users(), vec![UserId::from("u1"), u2.clone()]);
    assert_eq!(presence.status_of(&u2), Some(ActivityStatus::Away));

    let _ = h.push(MessageType::UserOffline, json!({"userId": "u2"})).await;
    assert!(!presence.is_online(&u2));
    assert_eq!(presence.status_of(&u2), Some(ActivityStatus::Away));
}

#[tokio::test(start_paused = true)]
async fn local_status_goes_away_after_idle_timeout() {
    let h = Harness::connected().await;
    let presence = PresenceAdapter::new(&h.session);
    assert_eq!(presence.local_status(), ActivityStatus::Active);

    sleep(Duration::from_secs(299)).await;
    presence.record_activity();
    sleep(Duration::from_secs(299)).await;
    assert_eq!(presence.local_status(), ActivityStatus::Active);

    sleep(Duration::from_secs(2)).await;
    assert_eq!(presence.local_status(), ActivityStatus::Away);
    assert!(h.session.scheduler().live_tasks(TaskGroup::Feature).is_empty());

    presence.record_activity();
    assert_eq!(presence.local_status(), ActivityStatus::Active);
    assert_eq!(
        h.session.scheduler().live_tasks(TaskGroup::Feature),
        vec!["presence.idle"]
    );
}

// ── Notifications ───────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn alerts_by_priority() {
    let mut h = Harness::connected().await;
    let sink = Arc::new(RecordingSink::default());
    let notifications = NotificationsAdapter::new(&h.session, sink.clone());

    for (id, priority) in [("n-low", "low"), ("n-norm", "normal"), ("n-high", "high")] {
        let _ = h
            .push(MessageType::Notification, json!({"id": id, "priority": priority}))
            .await;
    }
    assert_eq!(notifications.unread_count(), 3);
    assert_eq!(
        sink.calls(),
        vec![
            AlertCall::Show("n-norm".into()),
            AlertCall::Show("n-high".into())
        ]
    );

    sleep(Duration::from_secs(5)).await;
    settle().await;
    assert_eq!(sink.calls()[2], AlertCall::Dismiss("n-norm".into()));
    assert_eq!(sink.calls().len(), 3);

    assert!(notifications.mark_read("n-high"));
    assert_eq!(sink.calls()[3], AlertCall::Dismiss("n-high".into()));
    assert_eq!(notifications.unread_count(), 2);
    assert!(!notifications.mark_read("missing"));

    notifications.mark_all_read();
    assert_eq!(notifications.unread_count(), 0);
    assert_eq!(notifications.notifications().len(), 3);
}

#[tokio::test(start_paused = true)]
async fn inbox_is_bounded_and_clearable() {
    let mut h = Harness::connected().await;
    let notifications = NotificationsAdapter::new(&h.session, Arc::new(TracingAlertSink));

    for n in 0..52 {
        let _ = h
            .push(
                MessageType::Notification,
                json!({"id": format!("n{n}"), "priority": "low"}),
            )
            .await;
    }
    let items = notifications.notifications();
    assert_eq!(items.len(), 50);
    assert_eq!(items[0].id, "n51");
    assert_eq!(items[49].id, "n2");
    // the counter outlives eviction
    assert_eq!(notifications.unread_count(), 52);

    assert!(notifications.mark_read("n51"));
    assert!(notifications.mark_read("n51"));
    assert!(!notifications.mark_read("n0"));
    assert_eq!(notifications.unread_count(), 51);

    notifications.clear();
    assert!(notifications.notifications().is_empty());
    assert_eq!(notifications.unread_count(), 0);
}

#[tokio::test(start_paused = true)]
async fn read_before_auto_dismiss_cancels_timer() {
    let mut h = Harness::connected().await;
    let sink = Arc::new(RecordingSink::default());
    let notifications = NotificationsAdapter::new(&h.session, sink.clone());

    let _ = h.push(MessageType::Notification, json!({"id": "n1"})).await;
    assert_eq!(
        h.session.scheduler().live_tasks(TaskGroup::Feature),
        vec!["notifications.dismiss"]
    );
    assert!(notifications.mark_read("n1"));
    assert!(h.session.scheduler().live_tasks(TaskGroup::Feature).is_empty());

    sleep(Duration::from_secs(10)).await;
    assert_eq!(
        sink.calls(),
        vec![AlertCall::Show("n1".into()), AlertCall::Dismiss("n1".into())]
    );
}

// ── Lifetime ────────────────────────────────────────────────────────────────

#[tokio::test(start_paused = true)]
async fn feature_timers_survive_disconnect_but_not_drop() {
    let mut h = Harness::connected().await;
    let features = Features::attach(&h.session, Arc::new(TracingAlertSink));

    let _ = h.push(MessageType::TypingStart, json!({"userId": "u2"})).await;
    assert_eq!(
        h.session.scheduler().live_tasks(TaskGroup::Feature),
        vec!["chat.typing", "presence.idle"]
    );

    h.session.disconnect().await.unwrap();
    assert!(h.session.scheduler().live_tasks(TaskGroup::Transport).is_empty());
    assert_eq!(h.session.scheduler().live_tasks(TaskGroup::Feature).len(), 2);

    drop(features);
    assert!(h.session.scheduler().live_tasks(TaskGroup::Feature).is_empty());
}

#[tokio::test(start_paused = true)]
async fn dropped_adapter_stops_tracking() {
    let mut h = Harness::connected().await;
    let presence = PresenceAdapter::new(&h.session);
    let _ = h.push(MessageType::UserOnline, json!({"userId": "u2"})).await;
    assert!(presence.is_online(&UserId::from("u2")));
    drop(presence);

    let replacement = PresenceAdapter::new(&h.session);
    let _ = h.push(MessageType::UserOnline, json!({"userId": "u3"})).await;
    assert_eq!(replacement.online_users(), vec![UserId::from("u3")]);
}
