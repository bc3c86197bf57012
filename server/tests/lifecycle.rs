//! Message lifecycle through the hub: windows, permissions, fan-out and push

mod common;

use common::{drain, names, TestApp};
use futures_util::future::join_all;
use parley_server::{
    error::AppError,
    events::ServerEvent,
    messages::{Outcome, Rejection},
    models::{PageQuery, SendMessageRequest, SettingsPatch},
};

fn text(to: &str, content: &str) -> SendMessageRequest {
    SendMessageRequest {
        recipient_id: to.to_string(),
        content: content.to_string(),
        image_urls: Vec::new(),
        reply_to_id: None,
    }
}

#[tokio::test]
async fn edit_and_unsend_windows_for_a_real_conversation() {
    let app = TestApp::new().await;

    let sent = app.hub.send_message("5", text("3", "hi")).await.unwrap();
    let message_id = sent.message.id.clone();
    assert_eq!(sent.message.conversation_id, "3_5");

    // Only the sender may edit
    let err = app.hub.edit_message("3", &message_id, "hacked").await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    app.advance_secs(5 * 60);
    let edited = app
        .hub
        .edit_message("5", &message_id, "hello")
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(edited.message.content, "hello");
    assert_eq!(edited.message.original_content.as_deref(), Some("hi"));
    assert!(edited.message.is_edited);
    assert_eq!(edited.other_party_id, "3");

    // A second edit keeps the very first text
    let again = app
        .hub
        .edit_message("5", &message_id, "hello there")
        .await
        .unwrap()
        .applied()
        .unwrap();
    assert_eq!(again.message.original_content.as_deref(), Some("hi"));

    app.advance_secs(6 * 60);
    let outcome = app.hub.unsend_message("5", &message_id).await.unwrap();
    assert_eq!(outcome.rejection(), Some(Rejection::UnsendWindowExpired));

    let ack = Rejection::UnsendWindowExpired.to_ack("unsendMessage");
    assert_eq!(ack.can_unsend, Some(false));
}

#[tokio::test]
async fn unsend_window_is_inclusive() {
    let app = TestApp::new().await;

    let on_time = app.hub.send_message("5", text("3", "one")).await.unwrap().message;
    app.advance_secs(600);
    let outcome = app.hub.unsend_message("5", &on_time.id).await.unwrap();
    let unsent = outcome.applied().unwrap().message;
    assert!(unsent.is_deleted_for_everyone);
    assert_eq!(unsent.content, "");
    assert_eq!(unsent.deleted_for_everyone_by.as_deref(), Some("5"));

    let late = app.hub.send_message("5", text("3", "two")).await.unwrap().message;
    app.advance_secs(601);
    let outcome = app.hub.unsend_message("5", &late.id).await.unwrap();
    assert_eq!(outcome.rejection(), Some(Rejection::UnsendWindowExpired));

    // Terminal state
    let outcome = app.hub.unsend_message("5", &on_time.id).await.unwrap();
    assert_eq!(outcome.rejection(), Some(Rejection::AlreadyUnsent));
}

#[tokio::test]
async fn edit_window_is_inclusive() {
    let app = TestApp::new().await;

    let first = app.hub.send_message("5", text("3", "one")).await.unwrap().message;
    app.advance_secs(900);
    assert!(app.hub.edit_message("5", &first.id, "uno").await.unwrap().applied().is_some());

    let second = app.hub.send_message("5", text("3", "two")).await.unwrap().message;
    app.advance_secs(901);
    let outcome = app.hub.edit_message("5", &second.id, "dos").await.unwrap();
    assert_eq!(outcome.rejection(), Some(Rejection::EditWindowExpired));
}

#[tokio::test]
async fn media_and_unsent_messages_are_never_editable() {
    let app = TestApp::new().await;

    let photo = app
        .hub
        .send_message(
            "5",
            SendMessageRequest {
                recipient_id: "3".into(),
                content: String::new(),
                image_urls: vec!["https://cdn.example/a.jpg".into()],
                reply_to_id: None,
            },
        )
        .await
        .unwrap()
        .message;
    let sticker = app.hub.send_message("5", text("3", "[STICKER:cat]")).await.unwrap().message;

    for id in [&photo.id, &sticker.id] {
        let outcome = app.hub.edit_message("5", id, "caption").await.unwrap();
        assert_eq!(outcome.rejection(), Some(Rejection::NotEditable));
    }

    let plain = app.hub.send_message("5", text("3", "oops")).await.unwrap().message;
    app.hub.unsend_message("5", &plain.id).await.unwrap();
    let outcome = app.hub.edit_message("5", &plain.id, "fixed").await.unwrap();
    assert_eq!(outcome.rejection(), Some(Rejection::NotEditable));
}

#[tokio::test]
async fn only_the_pinner_can_unpin() {
    let app = TestApp::new().await;
    let message = app.hub.send_message("5", text("3", "remember this")).await.unwrap().message;

    let pinned = app.hub.pin_message("3", &message.id).await.unwrap().applied().unwrap();
    assert_eq!(pinned.message.pinned_by.as_deref(), Some("3"));
    assert!(pinned.message.pinned_at.is_some());

    let err = app.hub.unpin_message("5", &message.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let err = app.hub.pin_message("9", &message.id).await.unwrap_err();
    assert!(matches!(err, AppError::Forbidden(_)));

    let unpinned = app.hub.unpin_message("3", &message.id).await.unwrap();
    assert_eq!(unpinned.message.pinned_by, None);
    assert_eq!(unpinned.message.pinned_at, None);

    let pinned = app.hub.messages().pinned("5", "3").await.unwrap();
    assert!(pinned.is_empty());
}

#[tokio::test]
async fn unsent_messages_cannot_be_pinned_and_lose_their_pin() {
    let app = TestApp::new().await;
    let message = app.hub.send_message("5", text("3", "pin me")).await.unwrap().message;

    app.hub.pin_message("5", &message.id).await.unwrap();
    let unsent = app.hub.unsend_message("5", &message.id).await.unwrap().applied().unwrap();
    assert_eq!(unsent.message.pinned_by, None);

    let outcome = app.hub.pin_message("3", &message.id).await.unwrap();
    assert_eq!(outcome.rejection(), Some(Rejection::AlreadyUnsent));
}

#[tokio::test]
async fn delete_for_me_only_affects_the_viewer() {
    let app = TestApp::new().await;
    let mut three = app.connect("c3", "3").await;
    let mut five = app.connect("c5", "5").await;

    let message = app.hub.send_message("5", text("3", "secret")).await.unwrap().message;
    drain(&mut three);
    drain(&mut five);

    app.hub.delete_for_me("3", &message.id).await.unwrap();
    app.hub.delete_for_me("3", &message.id).await.unwrap();

    let for_three = app
        .hub
        .messages()
        .list_messages("3", "5", &PageQuery::default())
        .await
        .unwrap();
    let for_five = app
        .hub
        .messages()
        .list_messages("5", "3", &PageQuery::default())
        .await
        .unwrap();
    assert!(for_three.is_empty());
    assert_eq!(for_five.len(), 1);
    assert_eq!(for_five[0].deleted_for_user_ids, vec!["3".to_string()]);

    assert_eq!(names(&drain(&mut three)), vec!["messageHidden", "messageHidden"]);
    assert!(drain(&mut five).is_empty());
}

#[tokio::test]
async fn mute_suppresses_push_but_not_delivery() {
    let app = TestApp::new().await;
    let mut three = app.connect("c3", "3").await;

    let sent = app.hub.send_message("5", text("3", "first")).await.unwrap();
    sent.push_task.unwrap().await.unwrap();
    assert_eq!(app.push.sent(), vec![("3".to_string(), "first".to_string())]);

    let mute = SettingsPatch {
        muted: Some(true),
        ..Default::default()
    };
    app.hub.update_settings("3", "5", &mute).await.unwrap();

    let sent = app.hub.send_message("5", text("3", "second")).await.unwrap();
    assert!(sent.push_task.is_none());
    assert_eq!(app.push.sent().len(), 1);

    let events = drain(&mut three);
    assert_eq!(
        names(&events),
        vec!["newMessage", "conversationSettingsChanged", "newMessage"]
    );
}

#[tokio::test]
async fn blocked_send_creates_nothing() {
    let app = TestApp::new().await;
    let mut three = app.connect("c3", "3").await;
    app.permissions.block("5", "3");

    let err = app.hub.send_message("5", text("3", "hello?")).await.unwrap_err();
    assert!(matches!(err, AppError::MessagingBlocked(_)));

    let messages = app
        .hub
        .messages()
        .list_messages("3", "5", &PageQuery::default())
        .await
        .unwrap();
    assert!(messages.is_empty());
    assert_eq!(app.hub.stats().await.unwrap().messages, 0);
    assert!(app.push.sent().is_empty());
    assert!(!names(&drain(&mut three)).contains(&"newMessage"));

    // The block is one-directional
    assert!(app.hub.send_message("3", text("5", "hi")).await.is_ok());
}

#[tokio::test]
async fn invalid_sends_are_rejected() {
    let app = TestApp::new().await;

    let err = app.hub.send_message("5", text("5", "me")).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let err = app.hub.send_message("5", text("3", "   ")).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    // Reply target from another conversation
    let elsewhere = app.hub.send_message("5", text("7", "other chat")).await.unwrap().message;
    let mut reply = text("3", "re");
    reply.reply_to_id = Some(elsewhere.id);
    let err = app.hub.send_message("5", reply).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));

    let mut reply = text("3", "re");
    reply.reply_to_id = Some("missing".into());
    let err = app.hub.send_message("5", reply).await.unwrap_err();
    assert!(matches!(err, AppError::NotFound(_)));
}

#[tokio::test]
async fn replies_carry_a_snapshot_of_the_target() {
    let app = TestApp::new().await;
    let original = app.hub.send_message("3", text("5", "lunch?")).await.unwrap().message;

    let mut reply = text("3", "sure");
    reply.reply_to_id = Some(original.id.clone());
    let reply = app.hub.send_message("5", reply).await.unwrap().message;

    let snapshot = reply.reply_to.unwrap();
    assert_eq!(snapshot.message_id, original.id);
    assert_eq!(snapshot.content, "lunch?");
    assert_eq!(snapshot.sender_id, "3");
}

#[tokio::test]
async fn mutations_reach_both_parties_on_every_device() {
    let app = TestApp::new().await;
    let mut phone = app.connect("phone", "5").await;
    let mut laptop = app.connect("laptop", "5").await;
    let mut three = app.connect("c3", "3").await;
    drain(&mut phone);
    drain(&mut laptop);

    let message = app.hub.send_message("5", text("3", "hi")).await.unwrap().message;
    app.hub.edit_message("5", &message.id, "hey").await.unwrap();
    app.hub.unsend_message("5", &message.id).await.unwrap();

    let expected_sender = vec!["messageSent", "messageEdited", "messageUnsent"];
    assert_eq!(names(&drain(&mut phone)), expected_sender);
    assert_eq!(names(&drain(&mut laptop)), expected_sender);
    assert_eq!(
        names(&drain(&mut three)),
        vec!["newMessage", "messageEdited", "messageUnsent"]
    );
}

#[tokio::test]
async fn typing_goes_to_the_recipient_only() {
    let app = TestApp::new().await;
    let mut five = app.connect("c5", "5").await;
    let mut three = app.connect("c3", "3").await;
    drain(&mut five);

    app.hub.typing("5", "3", true).unwrap();

    assert!(drain(&mut five).is_empty());
    assert_eq!(
        drain(&mut three),
        vec![ServerEvent::UserTyping {
            user_id: "5".into(),
            conversation_id: "3_5".into(),
            is_typing: true,
        }]
    );
}

#[tokio::test]
async fn unsend_recomputes_the_conversation_preview() {
    let app = TestApp::new().await;
    app.hub.send_message("5", text("3", "older")).await.unwrap();
    let newer = app.hub.send_message("5", text("3", "newer")).await.unwrap().message;

    app.hub.unsend_message("5", &newer.id).await.unwrap();

    let conversation = app.hub.conversations().get("3", "5").await.unwrap().unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("older"));

    let summaries = app.hub.messages().list_conversations("3").await.unwrap();
    assert_eq!(summaries.len(), 1);
    assert_eq!(summaries[0].last_message.as_deref(), Some("older"));
    assert_eq!(summaries[0].unread_count, 1);
}

#[tokio::test]
async fn mark_read_clears_unread_and_notifies_both() {
    let app = TestApp::new().await;
    let mut five = app.connect("c5", "5").await;

    app.hub.send_message("5", text("3", "a")).await.unwrap();
    app.hub.send_message("5", text("3", "b")).await.unwrap();
    assert_eq!(app.hub.messages().unread_count("3").await.unwrap(), 2);

    let receipt = app.hub.mark_read("3", "5").await.unwrap();
    assert_eq!(receipt.count, 2);
    assert_eq!(app.hub.messages().unread_count("3").await.unwrap(), 0);

    assert!(names(&drain(&mut five)).contains(&"messagesRead"));
}

#[tokio::test]
async fn theme_is_shared_and_announced() {
    let app = TestApp::new().await;
    let mut three = app.connect("c3", "3").await;
    app.hub.send_message("5", text("3", "hi")).await.unwrap();
    drain(&mut three);

    let settings = app.hub.change_theme("5", "3", "#ff8800").await.unwrap();
    assert_eq!(settings.theme_color.as_deref(), Some("#ff8800"));

    let other_side = app.hub.conversations().settings_for("3", "5").await.unwrap();
    assert_eq!(other_side.theme_color.as_deref(), Some("#ff8800"));

    let events = drain(&mut three);
    assert_eq!(names(&events), vec!["newMessage", "themeColorChanged"]);
    match &events[0] {
        ServerEvent::NewMessage(notice) => assert!(notice.is_system),
        other => panic!("unexpected {:?}", other),
    }

    // System notices leave the preview and push alone
    let conversation = app.hub.conversations().get("3", "5").await.unwrap().unwrap();
    assert_eq!(conversation.last_message.as_deref(), Some("hi"));
}

#[tokio::test]
async fn search_and_media_split_text_from_attachments() {
    let app = TestApp::new().await;
    app.hub.send_message("5", text("3", "Holiday plans")).await.unwrap();
    app.hub.send_message("5", text("3", "[IMAGE] holiday")).await.unwrap();
    app.hub.send_message("5", text("3", "[VOICE:v1]")).await.unwrap();

    let found = app.hub.messages().search("3", "5", "HOLIDAY", None).await.unwrap();
    assert_eq!(found.len(), 1);
    assert_eq!(found[0].content, "Holiday plans");

    let media = app.hub.messages().media("3", "5", None).await.unwrap();
    assert_eq!(media.len(), 2);

    let err = app.hub.messages().search("3", "5", "  ", None).await.unwrap_err();
    assert!(matches!(err, AppError::BadRequest(_)));
}

#[tokio::test]
async fn concurrent_sends_are_observed_in_storage_order() {
    let app = TestApp::new().await;
    let mut three = app.connect("c3", "3").await;

    let sends = (0..20).map(|i| {
        let hub = app.hub.clone();
        let (from, to) = if i % 2 == 0 { ("5", "3") } else { ("3", "5") };
        async move { hub.send_message(from, text(to, &format!("m{}", i))).await }
    });
    for result in join_all(sends).await {
        result.unwrap();
    }

    let observed: Vec<String> = drain(&mut three)
        .into_iter()
        .filter_map(|event| match event {
            ServerEvent::NewMessage(m) | ServerEvent::MessageSent(m) => Some(m.id),
            _ => None,
        })
        .collect();

    let page = PageQuery {
        limit: Some(50),
        offset: None,
    };
    let mut stored: Vec<String> = app
        .hub
        .messages()
        .list_messages("3", "5", &page)
        .await
        .unwrap()
        .into_iter()
        .map(|m| m.id)
        .collect();
    stored.reverse();

    assert_eq!(observed.len(), 20);
    assert_eq!(observed, stored);
    assert_eq!(app.hub.locked_conversation_count(), 0);
}

#[tokio::test]
async fn conversation_locks_are_released_after_use() {
    let app = TestApp::new().await;

    for other in ["3", "7", "9"] {
        app.hub.send_message("5", text(other, "hi")).await.unwrap();
    }
    app.hub.change_theme("5", "3", "#123456").await.unwrap();
    assert_eq!(app.hub.locked_conversation_count(), 0);

    // Failed sends release the lock too
    app.permissions.block("5", "3");
    assert!(app.hub.send_message("5", text("3", "blocked")).await.is_err());
    assert_eq!(app.hub.locked_conversation_count(), 0);
}

#[tokio::test]
async fn rejections_are_values_not_errors() {
    let app = TestApp::new().await;
    let message = app.hub.send_message("5", text("3", "hi")).await.unwrap().message;
    app.advance_secs(16 * 60);

    match app.hub.edit_message("5", &message.id, "late").await.unwrap() {
        Outcome::Rejected(rejection) => {
            let ack = rejection.to_ack("editMessage");
            assert!(!ack.success);
            assert_eq!(ack.can_edit, Some(false));
        }
        Outcome::Applied(_) => panic!("edit after the window was applied"),
    }
}
