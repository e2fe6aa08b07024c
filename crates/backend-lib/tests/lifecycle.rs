mod common;

use aura_backend_lib::storage::RecordStore;
use aura_common::{ClientEvent, ProfilePatch, Sender, ServerEvent};
use common::{setup_hub, TestClient};

fn system_texts(events: &[ServerEvent]) -> Vec<&str> {
    events
        .iter()
        .filter_map(|event| match event {
            ServerEvent::SystemMessage { text } => Some(text.as_str()),
            _ => None,
        })
        .collect()
}

#[tokio::test]
async fn test_join_sequence() {
    let hub = setup_hub();
    let alice = TestClient::join(&hub, "alice").await;
    alice.say("first").await;

    let mut bob = TestClient::connect(&hub);
    bob.handler
        .handle_event(ClientEvent::Join {
            username: "Bob".to_string(),
        })
        .await;
    let events = bob.drain();

    assert_eq!(
        events[0],
        ServerEvent::UserListUpdate {
            roster: vec!["alice".to_string(), "Bob".to_string()]
        }
    );
    match &events[1] {
        ServerEvent::ChatMessage(event) => assert_eq!(event.body, "first"),
        other => panic!("expected replayed history, got {other:?}"),
    }
    match &events[2] {
        ServerEvent::ForceUpdate(record) => {
            assert_eq!(record.username, "Bob");
            assert_eq!(record.gold, 100);
        },
        other => panic!("expected force_update, got {other:?}"),
    }
    // the joiner does not see its own arrival notice
    assert!(system_texts(&events).is_empty());
}

#[tokio::test]
async fn test_join_and_leave_notices_follow_presence() {
    let hub = setup_hub();
    let mut alice = TestClient::join(&hub, "alice").await;

    let bob_one = TestClient::join(&hub, "bob").await;
    assert_eq!(system_texts(&alice.drain()), vec!["bob joined"]);

    // a second tab is not a new arrival
    let bob_two = TestClient::join(&hub, "bob").await;
    assert!(system_texts(&alice.drain()).is_empty());

    bob_one.handler.disconnect().await;
    let events = alice.drain();
    assert!(system_texts(&events).is_empty());
    assert!(events.contains(&ServerEvent::UserListUpdate {
        roster: vec!["alice".to_string(), "bob".to_string()]
    }));

    bob_two.handler.disconnect().await;
    let events = alice.drain();
    assert_eq!(system_texts(&events), vec!["bob left"]);
    assert!(events.contains(&ServerEvent::UserListUpdate {
        roster: vec!["alice".to_string()]
    }));

    // presence notices are not kept in history
    assert!(hub.state.store.load_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_is_persisted_and_broadcast() {
    let hub = setup_hub();
    let mut alice = TestClient::join(&hub, "alice").await;
    let mut bob = TestClient::join(&hub, "bob").await;
    alice.drain();

    bob.say("  hi all  ").await;

    for events in [alice.drain(), bob.drain()] {
        let chat = events.iter().find_map(|event| match event {
            ServerEvent::ChatMessage(event) => Some(event),
            _ => None,
        });
        let chat = chat.unwrap();
        assert_eq!(chat.body, "hi all");
        assert_eq!(
            chat.sender,
            Sender::User {
                username: "bob".to_string()
            }
        );
    }

    let history = hub.state.store.load_history().await.unwrap();
    assert_eq!(history.len(), 1);
    assert_eq!(history[0].body, "hi all");
}

#[tokio::test]
async fn test_blank_chat_ignored() {
    let hub = setup_hub();
    let mut alice = TestClient::join(&hub, "alice").await;

    alice.say("   ").await;
    assert!(alice.drain().is_empty());
    assert!(hub.state.store.load_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_oversized_chat_rejected() {
    let hub = setup_hub();
    let mut alice = TestClient::join(&hub, "alice").await;

    let text = "a".repeat(hub.state.settings.max_message_len + 1);
    alice.say(&text).await;

    let events = alice.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code, .. }] if code == "VAL_001"));
    assert!(hub.state.store.load_history().await.unwrap().is_empty());
}

#[tokio::test]
async fn test_chat_before_join_rejected() {
    let hub = setup_hub();
    let mut stranger = TestClient::connect(&hub);

    stranger.say("hello?").await;
    let events = stranger.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code, .. }] if code == "SESSION_002"));
}

#[tokio::test]
async fn test_second_join_rejected() {
    let hub = setup_hub();
    let mut alice = TestClient::join(&hub, "alice").await;

    alice
        .handler
        .handle_event(ClientEvent::Join {
            username: "mallory".to_string(),
        })
        .await;

    let events = alice.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code, .. }] if code == "SESSION_001"));
    assert_eq!(hub.state.registry.roster_snapshot(), vec!["alice"]);
}

#[tokio::test]
async fn test_malformed_frame_reports_error() {
    let hub = setup_hub();
    let mut client = TestClient::connect(&hub);

    client.handler.handle_text("{not json").await;
    client.handler.handle_text(r#"{"event":"dance","data":{}}"#).await;

    let events = client.drain();
    assert_eq!(events.len(), 2);
    assert!(events
        .iter()
        .all(|event| matches!(event, ServerEvent::Error { code, .. } if code == "MALFORMED")));
}

#[tokio::test]
async fn test_history_replay_capped() {
    let hub = setup_hub();
    let alice = TestClient::join(&hub, "alice").await;
    for i in 0..8 {
        alice.say(&format!("line {i}")).await;
    }

    let mut bob = TestClient::connect(&hub);
    bob.handler
        .handle_event(ClientEvent::Join {
            username: "bob".to_string(),
        })
        .await;

    let replayed: Vec<String> = bob
        .drain()
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::ChatMessage(event) => Some(event.body),
            _ => None,
        })
        .collect();
    assert_eq!(replayed, vec!["line 3", "line 4", "line 5", "line 6", "line 7"]);
}

#[tokio::test]
async fn test_profile_update_reaches_every_tab() {
    let hub = setup_hub();
    let mut tab_one = TestClient::join(&hub, "alice").await;
    let mut tab_two = TestClient::join(&hub, "alice").await;
    let mut bob = TestClient::join(&hub, "bob").await;
    tab_one.drain();
    tab_two.drain();

    tab_one
        .handler
        .handle_event(ClientEvent::UpdateProfile(ProfilePatch {
            bio: Some("hello there".to_string()),
            ..ProfilePatch::default()
        }))
        .await;

    for events in [tab_one.drain(), tab_two.drain()] {
        assert!(events.iter().any(|event| matches!(
            event,
            ServerEvent::ForceUpdate(record) if record.bio == "hello there"
        )));
    }
    assert!(bob.drain().is_empty());
    assert_eq!(hub.state.store.get_user("alice").await.unwrap().bio, "hello there");
}

#[tokio::test]
async fn test_invalid_profile_rejected() {
    let hub = setup_hub();
    let mut alice = TestClient::join(&hub, "alice").await;

    alice
        .handler
        .handle_event(ClientEvent::UpdateProfile(ProfilePatch {
            bio: Some("b".repeat(501)),
            ..ProfilePatch::default()
        }))
        .await;

    let events = alice.drain();
    assert!(matches!(&events[..], [ServerEvent::Error { code, .. }] if code == "VAL_001"));
    assert_eq!(hub.state.store.get_user("alice").await.unwrap().bio, "");
}
