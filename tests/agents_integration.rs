//! Preset Session Integration Tests
//!
//! Opens the preset sessions against the scripted mock realtime server and
//! runs a tutorial end to end.

mod mock_providers;

use mock_providers::{MockRealtime, ResponseMode};
use realtime_gateway::core::realtime::{
    ModelVariant, RepeaterSettings, Role, Session, SessionConfig, TranscriberSettings,
    TranslatorSettings, TurnDetection, agents::REPEAT_PRIMER, create_transcriber,
    create_transcriber_repeater, create_translator, tutorial,
};

#[tokio::test]
async fn test_transcriber_opens_text_only() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;

    let session = create_transcriber(TranscriberSettings::default(), mock.options())
        .await
        .unwrap();

    assert_eq!(session.id(), "transcriber");
    assert_eq!(session.config().modalities, vec!["text"]);
    let update = mock
        .received(0)
        .into_iter()
        .find(|v| v["type"] == "session.update")
        .unwrap();
    assert_eq!(update["session"]["turn_detection"]["type"], "server_vad");
    assert_eq!(update["session"]["turn_detection"]["silence_duration_ms"], 1200);
    assert!(session.items().is_empty());
    session.close();
}

#[tokio::test]
async fn test_repeater_is_primed_after_open() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;

    let session = create_transcriber_repeater(RepeaterSettings::default(), mock.options())
        .await
        .unwrap();

    assert_eq!(
        mock.received_types(0),
        vec!["session.update", "conversation.item.create"]
    );
    let items = session.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].role, Role::System);
    assert_eq!(items[0].payload, REPEAT_PRIMER);
    assert!(matches!(
        session.config().turn_detection,
        Some(TurnDetection::ServerVad {
            silence_duration_ms: Some(500),
            ..
        })
    ));
    session.close();
}

#[tokio::test]
async fn test_translator_uses_its_model_and_language() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let settings = TranslatorSettings {
        target_language: "German".to_string(),
        ..Default::default()
    };

    let session = create_translator(settings, mock.options()).await.unwrap();

    assert_eq!(session.model(), ModelVariant::Gpt4oMini);
    assert_eq!(session.id(), "translator");
    assert!(
        session
            .config()
            .instructions
            .unwrap()
            .contains("**German**")
    );
    assert_eq!(session.items()[0].payload, REPEAT_PRIMER);
    session.close();
}

#[tokio::test]
async fn test_tutorial_teaches_then_removes_lessons() {
    let mock = MockRealtime::start(ResponseMode::Complete).await;
    let session = Session::open(SessionConfig::text("You are a student."), mock.options())
        .await
        .unwrap();

    let lessons = ["Always answer in French.", "Keep answers under ten words."];
    let outcomes = tutorial(&session, &lessons).await.unwrap();

    assert_eq!(outcomes.len(), 2);
    assert!(outcomes.iter().all(|o| o.is_completed()));
    assert_eq!(
        mock.received_types(0)[1..5],
        [
            "conversation.item.create",
            "response.create",
            "conversation.item.create",
            "response.create"
        ]
    );
    assert_eq!(mock.count(0, "conversation.item.delete"), 2);

    let items = session.items();
    assert_eq!(items.len(), 2);
    assert!(items.iter().all(|i| i.role == Role::System && i.deleted));
    assert_eq!(session.usage().compute.total_responses, 2);
    session.close();
}
