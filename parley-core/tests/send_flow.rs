use config::{DEFAULT_TEMPERATURE, Provider, Settings};
use llm::ChatModel;
use parley_core::testing::{
    Failure, FixedServices, GatedModel, ManualClock, RecordingStorage, ScriptedModel, StaticImageProvider,
};
use parley_core::{
    Attachment, ConversationStore, ImageResolver, MessageRole, NoticeKind, SendError, StoreEvent,
    SyncStatus,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::broadcast;

fn store_with(model: Arc<dyn ChatModel>) -> ConversationStore {
    ConversationStore::builder().chat_model(model).build()
}

fn drain(events: &mut broadcast::Receiver<StoreEvent>) -> Vec<StoreEvent> {
    let mut all = Vec::new();
    while let Ok(event) = events.try_recv() {
        all.push(event);
    }
    all
}

async fn wait_until(mut condition: impl FnMut() -> bool) -> bool {
    for _ in 0..200 {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

#[tokio::test]
async fn test_hello_streams_into_placeholder() {
    let model = Arc::new(ScriptedModel::new(["Hi", " there", "!"]));
    let store = store_with(model.clone());
    let mut events = store.subscribe();

    let outcome = store.send_message("hello", Vec::new()).await.unwrap();

    let conversation = store.conversation(&outcome.conversation_id).unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[0].role, MessageRole::User);
    assert_eq!(conversation.messages[0].content, "hello");
    assert_eq!(conversation.messages[1].role, MessageRole::Assistant);
    assert_eq!(conversation.messages[1].content, "Hi there!");
    assert!(!conversation.messages[1].is_streaming);
    assert_eq!(conversation.messages[1].id, outcome.assistant_message_id);
    assert_eq!(conversation.sync_status, SyncStatus::Pending);
    assert!(!store.is_streaming(&outcome.conversation_id));

    let requests = model.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].messages.len(), 1);
    assert_eq!(requests[0].messages[0].get_text(), "hello");
    assert_eq!(requests[0].temperature, Some(DEFAULT_TEMPERATURE));

    let partials: Vec<(String, bool)> = drain(&mut events)
        .into_iter()
        .filter_map(|event| match event {
            StoreEvent::MessageUpdated { message, .. } if message.id == outcome.assistant_message_id => {
                Some((message.content, message.is_streaming))
            }
            _ => None,
        })
        .collect();
    assert_eq!(
        partials,
        vec![
            ("Hi".to_string(), true),
            ("Hi there".to_string(), true),
            ("Hi there!".to_string(), true),
            ("Hi there!".to_string(), false),
        ]
    );
}

#[tokio::test]
async fn test_second_turn_sends_full_history() {
    let model = Arc::new(ScriptedModel::new(["Sure."]));
    let store = store_with(model.clone());

    store.send_message("first", Vec::new()).await.unwrap();
    store.send_message("second", Vec::new()).await.unwrap();

    let requests = model.requests();
    let texts: Vec<String> = requests[1].messages.iter().map(|m| m.get_text()).collect();
    assert_eq!(texts, vec!["first", "Sure.", "second"]);
}

#[tokio::test]
async fn test_stream_error_rolls_back_exactly() {
    let store = store_with(Arc::new(ScriptedModel::new(["Fine."])));
    // A custom title keeps the background title task out of the way.
    let id = store.new_conversation();
    store.set_title(&id, "Rollback");
    let first = store.send_message("first", Vec::new()).await.unwrap();
    assert_eq!(first.conversation_id, id);
    let before = store.conversation(&first.conversation_id).unwrap();

    store.set_chat_model(Some(Arc::new(
        ScriptedModel::new(["partial"]).failing_after(Failure::Stream("connection reset".into())),
    )));
    let mut events = store.subscribe();
    let err = store.send_message("second", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::Provider(_)));

    let after = store.conversation(&first.conversation_id).unwrap();
    assert_eq!(after.messages, before.messages);
    assert_eq!(after.updated_at, before.updated_at);
    assert_eq!(after.sync_status, before.sync_status);
    assert!(!store.is_streaming(&first.conversation_id));

    let notice = store.error().unwrap();
    assert_eq!(notice.kind, NoticeKind::Generic);
    assert!(
        drain(&mut events)
            .iter()
            .any(|e| matches!(e, StoreEvent::TurnRolledBack { .. }))
    );
}

#[tokio::test]
async fn test_request_failure_rolls_back_new_conversation_turn() {
    let store = store_with(Arc::new(ScriptedModel::failing(Failure::Http {
        status: 500,
        message: "upstream down".into(),
    })));

    let mut events = store.subscribe();
    let err = store.send_message("hello", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::Provider(_)));
    assert!(store.conversations().is_empty());
    assert_eq!(store.active_conversation_id(), None);

    let created = drain(&mut events)
        .into_iter()
        .find_map(|event| match event {
            StoreEvent::ConversationCreated(id) => Some(id),
            _ => None,
        })
        .unwrap();
    assert!(store.conversation(&created).is_none());
}

#[tokio::test]
async fn test_failed_send_keeps_existing_empty_conversation() {
    let store = store_with(Arc::new(ScriptedModel::failing(Failure::Http {
        status: 500,
        message: "upstream down".into(),
    })));
    let id = store.new_conversation();

    store.send_message("hello", Vec::new()).await.unwrap_err();
    assert!(store.conversation(&id).unwrap().messages.is_empty());
    assert_eq!(store.active_conversation_id(), Some(id));
}

#[tokio::test]
async fn test_quota_error_shows_upgrade_notice() {
    let store = store_with(Arc::new(ScriptedModel::failing(Failure::Quota {
        message: "Insufficient credits".into(),
        upgrade_url: Some("https://openrouter.ai/settings/credits".into()),
    })));

    store.send_message("hello", Vec::new()).await.unwrap_err();
    let notice = store.error().unwrap();
    assert_eq!(
        notice.kind,
        NoticeKind::Quota {
            upgrade_url: Some("https://openrouter.ai/settings/credits".into())
        }
    );
    assert!(notice.dismiss_after > Duration::from_secs(5));
}

#[tokio::test]
async fn test_empty_reply_is_an_error() {
    let store = store_with(Arc::new(ScriptedModel::new(Vec::<String>::new())));
    let err = store.send_message("hello", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::Provider(_)));
    assert!(store.conversations().is_empty());
}

#[tokio::test]
async fn test_missing_credential_touches_nothing() {
    let store = ConversationStore::builder().build();
    let err = store.send_message("hello", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::MissingCredential));
    assert!(store.conversations().is_empty());
    assert_eq!(store.error().unwrap().kind, NoticeKind::Configuration);
}

#[tokio::test]
async fn test_blank_message_is_ignored() {
    let store = store_with(Arc::new(ScriptedModel::new(["x"])));
    let err = store.send_message("   ", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::EmptyMessage));
    assert!(store.error().is_none());
    assert!(store.conversations().is_empty());
}

#[tokio::test]
async fn test_second_send_while_streaming_is_rejected() {
    let model = Arc::new(GatedModel::new(["Working"]));
    let store = store_with(model.clone());

    let first = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("first", Vec::new()).await }
    });
    model.wait_started().await;

    let err = store.send_message("second", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::AlreadyStreaming));
    assert_eq!(model.calls(), 1);

    model.release();
    let outcome = first.await.unwrap().unwrap();
    let conversation = store.conversation(&outcome.conversation_id).unwrap();
    assert_eq!(conversation.messages.len(), 2);
    assert_eq!(conversation.messages[1].content, "Working");
}

#[tokio::test]
async fn test_cancel_rolls_back_without_notice() {
    let model = Arc::new(GatedModel::new(["Par"]));
    let store = store_with(model.clone());

    let send = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("hello", Vec::new()).await }
    });
    model.wait_started().await;

    let id = store.active_conversation_id().unwrap();
    assert!(store.is_streaming(&id));
    assert!(store.cancel(&id));

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, SendError::Cancelled));
    assert!(store.conversation(&id).is_none());
    assert!(store.error().is_none());
    assert!(!store.cancel(&id));
}

#[tokio::test]
async fn test_rename_during_stream_survives_rollback() {
    let clock = Arc::new(ManualClock::new(1_000));
    let model = Arc::new(GatedModel::new(["Par"]));
    let store = ConversationStore::builder()
        .chat_model(model.clone())
        .clock(clock.clone())
        .build();

    let id = store.new_conversation();
    store.set_title(&id, "Initial");
    let synced_at = store.conversation(&id).unwrap().updated_at;
    assert!(store.mark_synced(&id, synced_at, synced_at));

    let send = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("hello", Vec::new()).await }
    });
    model.wait_started().await;

    clock.advance(100);
    assert!(store.set_title(&id, "Renamed during stream"));
    clock.advance(50);
    assert!(store.cancel(&id));
    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, SendError::Cancelled));

    let conversation = store.conversation(&id).unwrap();
    assert!(conversation.messages.is_empty());
    assert_eq!(conversation.title, "Renamed during stream");
    assert_eq!(conversation.sync_status, SyncStatus::Pending);
    assert_eq!(conversation.updated_at, 1_150);
}

#[tokio::test]
async fn test_credential_rotation_cancels_in_flight_stream() {
    let model = Arc::new(GatedModel::new(["Hel"]));
    let services = Arc::new(FixedServices::new(model.clone()));
    let store = ConversationStore::builder().services(services.clone()).build();

    let mut settings = Settings::default();
    settings.set_api_key(Provider::OpenRouter, "sk-or-first").unwrap();
    store.apply_settings(&settings);
    assert!(store.has_chat_model());

    let send = tokio::spawn({
        let store = store.clone();
        async move { store.send_message("hello", Vec::new()).await }
    });
    model.wait_started().await;

    settings.set_api_key(Provider::OpenRouter, "sk-or-second").unwrap();
    store.apply_settings(&settings);

    let err = send.await.unwrap().unwrap_err();
    assert!(matches!(err, SendError::Cancelled));
    let keys: Vec<String> = services.requested().into_iter().map(|(key, _)| key).collect();
    assert_eq!(keys, vec!["sk-or-first", "sk-or-second"]);
}

#[tokio::test]
async fn test_clearing_credential_drops_model() {
    let services = Arc::new(FixedServices::new(Arc::new(ScriptedModel::new(["x"]))));
    let store = ConversationStore::builder().services(services).build();

    let mut settings = Settings::default();
    settings.set_api_key(Provider::OpenRouter, "sk-or-key").unwrap();
    store.apply_settings(&settings);
    assert!(store.has_chat_model());

    settings.remove_api_key(Provider::OpenRouter);
    store.apply_settings(&settings);
    assert!(!store.has_chat_model());
}

#[tokio::test]
async fn test_image_request_uses_resolver() {
    let chat = Arc::new(ScriptedModel::new(["unused"]));
    let provider = Arc::new(StaticImageProvider::ok("pollinations", "https://img.test/cat.png"));
    let store = ConversationStore::builder()
        .chat_model(chat.clone())
        .image_resolver(ImageResolver::new(provider.clone()))
        .build();

    let outcome = store.send_message("draw a cat wearing a hat", Vec::new()).await.unwrap();

    let conversation = store.conversation(&outcome.conversation_id).unwrap();
    let reply = &conversation.messages[1];
    assert!(reply.content.starts_with("Here's your image of"));
    assert!(reply.content.contains("cat wearing a hat"));
    assert_eq!(reply.attachments.len(), 1);
    assert_eq!(reply.attachments[0].uri, "https://img.test/cat.png");
    assert!(!reply.is_streaming);
    assert!(chat.requests().is_empty());
    assert_eq!(provider.calls(), 1);
}

#[tokio::test]
async fn test_revised_prompt_becomes_caption() {
    let provider = Arc::new(
        StaticImageProvider::ok("dall-e", "https://img.test/1.png")
            .with_revised_prompt("A tabby cat in a top hat"),
    );
    let store = ConversationStore::builder()
        .chat_model(Arc::new(ScriptedModel::new(["unused"])))
        .image_resolver(ImageResolver::new(provider))
        .build();

    let outcome = store.send_message("generate an image of a cat", Vec::new()).await.unwrap();
    let conversation = store.conversation(&outcome.conversation_id).unwrap();
    assert_eq!(conversation.messages[1].content, "Here's your image: A tabby cat in a top hat");
}

#[tokio::test]
async fn test_image_failure_rolls_back() {
    let store = ConversationStore::builder()
        .chat_model(Arc::new(ScriptedModel::new(["unused"])))
        .image_resolver(ImageResolver::new(Arc::new(StaticImageProvider::failing("pollinations"))))
        .build();

    let err = store.send_message("draw a cat", Vec::new()).await.unwrap_err();
    assert!(matches!(err, SendError::Image(_)));
    assert!(store.conversations().is_empty());
    assert!(store.error().unwrap().message.starts_with("Image generation failed"));
}

#[tokio::test]
async fn test_image_toggle_off_uses_chat() {
    let chat = Arc::new(ScriptedModel::new(["I can't draw, but..."]));
    let provider = Arc::new(StaticImageProvider::ok("pollinations", "https://img.test/x.png"));
    let services = Arc::new(
        FixedServices::new(chat.clone()).with_images(ImageResolver::new(provider.clone())),
    );
    let store = ConversationStore::builder().services(services).build();

    let mut settings = Settings::default();
    settings.set_api_key(Provider::OpenRouter, "sk-or-key").unwrap();
    settings.features.image_generation = Some(false);
    store.apply_settings(&settings);

    store.send_message("draw a cat", Vec::new()).await.unwrap();
    assert_eq!(provider.calls(), 0);
    assert_eq!(chat.requests().len(), 1);
}

#[tokio::test]
async fn test_first_exchange_gets_a_title() {
    let model = Arc::new(ScriptedModel::new(["Paris is lovely in spring."]).with_chat_reply("\"Trip To Paris.\""));
    let store = store_with(model.clone());
    let mut events = store.subscribe();

    let outcome = store.send_message("plan a trip to paris", Vec::new()).await.unwrap();

    let title = tokio::time::timeout(Duration::from_secs(2), async {
        loop {
            if let Ok(StoreEvent::TitleChanged { title, .. }) = events.recv().await {
                return title;
            }
        }
    })
    .await
    .unwrap();
    assert_eq!(title, "Trip To Paris");
    assert_eq!(store.conversation(&outcome.conversation_id).unwrap().title, "Trip To Paris");

    let chat_requests = model.chat_requests();
    assert_eq!(chat_requests.len(), 1);
    assert!(chat_requests[0].messages[1].get_text().contains("plan a trip to paris"));
}

#[tokio::test]
async fn test_manual_title_is_not_overwritten() {
    let model = Arc::new(ScriptedModel::new(["ok"]));
    let store = store_with(model.clone());
    let id = store.new_conversation();
    store.set_title(&id, "My Title");

    store.send_message("hello", Vec::new()).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;
    assert_eq!(store.conversation(&id).unwrap().title, "My Title");
    assert!(model.chat_requests().is_empty());
}

#[tokio::test]
async fn test_inline_image_is_sent_and_uploaded() {
    let model = Arc::new(ScriptedModel::new(["Nice photo"]));
    let storage = Arc::new(RecordingStorage::new());
    let store = ConversationStore::builder()
        .chat_model(model.clone())
        .object_storage(storage.clone())
        .build();

    let attachment =
        Attachment::image("file:///tmp/photo.png", "photo.png", "image/png").with_data("aGVsbG8=");
    let outcome = store.send_message("what is this?", vec![attachment]).await.unwrap();

    assert!(model.requests()[0].messages[0].has_images());

    let uploaded = wait_until(|| {
        store
            .conversation(&outcome.conversation_id)
            .and_then(|c| c.message(&outcome.user_message_id).cloned())
            .is_some_and(|m| m.attachments[0].uri.starts_with(RecordingStorage::BASE_URL))
    })
    .await;
    assert!(uploaded);

    let uploads = storage.uploads();
    assert_eq!(uploads.len(), 1);
    assert!(uploads[0].0.starts_with("anonymous/"));
    assert!(uploads[0].0.ends_with("-photo.png"));
    assert_eq!(uploads[0].1, 5);
    assert_eq!(uploads[0].2, "image/png");
}

#[tokio::test]
async fn test_failed_upload_keeps_local_uri() {
    let store = ConversationStore::builder()
        .chat_model(Arc::new(ScriptedModel::new(["ok"])))
        .object_storage(Arc::new(RecordingStorage::failing()))
        .build();

    let attachment =
        Attachment::image("file:///tmp/photo.png", "photo.png", "image/png").with_data("aGVsbG8=");
    let outcome = store.send_message("look", vec![attachment]).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let conversation = store.conversation(&outcome.conversation_id).unwrap();
    assert_eq!(conversation.messages[0].attachments[0].uri, "file:///tmp/photo.png");
    assert!(store.error().is_none());
}
