//! Preset sessions.
//!
//! Ready-made configurations for common voice tasks, opened through
//! [`Session::open`]:
//! - transcriber: text-only transcription of voice input
//! - transcriber-repeater: speaks back and transcribes what it heard
//! - translator: speaks back what it heard in another language
//!
//! [`tutorial`] primes a session with throwaway instructions and removes them
//! from the conversation afterwards.

use futures::future::try_join_all;
use std::time::Instant;
use tracing::info;

use super::base::RealtimeResult;
use super::config::{ModelVariant, SessionOptions};
use super::messages::{SessionConfig, TurnDetection};
use super::response::ResponseOutcome;
use super::session::Session;

const TRANSCRIBER_INSTRUCTIONS: &str = "\
Whenever prompted to respond, transcribe any user voice input received since the last time you were asked to respond.
If you received no input, just output an empty string.
Transcribe fragments that were too distorted to hear clearly as ???
Don't surround output in quotes or add extra commentary.";

const REPEATER_INSTRUCTIONS: &str = "\
You are a transcriber-repeater. You repeat what the user said back to them, and transcribe it.
Whenever prompted to respond, transcribe and repeat any user voice input received since the last time you were asked to respond.
If you didn't receive intelligible audio, reply \"No audio was received.\"";

/// System item added right after a repeating preset opens.
pub const REPEAT_PRIMER: &str = "From now, whenever prompted to respond, repeat and transcribe whatever you heard the user say.";

/// Prefix padding for the presets that speak back.
const SPOKEN_PREFIX_PADDING_MS: u32 = 500;

fn server_vad(silence_duration_ms: u32, create_response: bool, prefix_padding_ms: Option<u32>) -> TurnDetection {
    TurnDetection::ServerVad {
        threshold: None,
        prefix_padding_ms,
        silence_duration_ms: Some(silence_duration_ms),
        create_response: Some(create_response),
        interrupt_response: None,
    }
}

/// Use the preset's name unless the caller already picked one.
fn named(mut options: SessionOptions, name: &str) -> SessionOptions {
    if options.session_name.is_none() {
        options.session_name = Some(name.to_string());
    }
    options
}

// =============================================================================
// Transcriber
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscriberSettings {
    /// Silence that ends a user turn
    pub silence_duration_ms: u32,
    /// Respond automatically at the end of each turn
    pub create_response: bool,
    pub name: String,
}

impl Default for TranscriberSettings {
    fn default() -> Self {
        Self {
            silence_duration_ms: 1200,
            create_response: true,
            name: "transcriber".to_string(),
        }
    }
}

impl TranscriberSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            turn_detection: Some(server_vad(
                self.silence_duration_ms,
                self.create_response,
                None,
            )),
            ..SessionConfig::text(TRANSCRIBER_INSTRUCTIONS)
        }
    }
}

/// Open a text-only session that transcribes voice input.
pub async fn create_transcriber(
    settings: TranscriberSettings,
    options: SessionOptions,
) -> RealtimeResult<Session> {
    Session::open(settings.session_config(), named(options, &settings.name)).await
}

// =============================================================================
// Transcriber-repeater
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RepeaterSettings {
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub name: String,
    pub modalities: Vec<String>,
    pub model: ModelVariant,
}

impl Default for RepeaterSettings {
    fn default() -> Self {
        Self {
            silence_duration_ms: 500,
            create_response: true,
            name: "transcriber".to_string(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            model: ModelVariant::Gpt4o,
        }
    }
}

impl RepeaterSettings {
    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: self.modalities.clone(),
            instructions: Some(REPEATER_INSTRUCTIONS.to_string()),
            turn_detection: Some(server_vad(
                self.silence_duration_ms,
                self.create_response,
                Some(SPOKEN_PREFIX_PADDING_MS),
            )),
            ..Default::default()
        }
    }
}

/// Open a session that repeats and transcribes what the user said.
///
/// The model in `settings` replaces the one in `options`.
pub async fn create_transcriber_repeater(
    settings: RepeaterSettings,
    options: SessionOptions,
) -> RealtimeResult<Session> {
    let options = SessionOptions {
        model: settings.model,
        ..named(options, &settings.name)
    };
    let session = Session::open(settings.session_config(), options).await?;
    session.system(REPEAT_PRIMER).await?;
    Ok(session)
}

// =============================================================================
// Translator
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranslatorSettings {
    pub target_language: String,
    /// Delivery direction appended to the instructions
    pub acting_cue: String,
    pub silence_duration_ms: u32,
    pub create_response: bool,
    pub name: String,
    pub modalities: Vec<String>,
    pub model: ModelVariant,
}

impl Default for TranslatorSettings {
    fn default() -> Self {
        Self {
            target_language: "Spanish".to_string(),
            acting_cue: "Speak with clear enunciation.".to_string(),
            silence_duration_ms: 500,
            create_response: true,
            name: "translator".to_string(),
            modalities: vec!["text".to_string(), "audio".to_string()],
            model: ModelVariant::Gpt4oMini,
        }
    }
}

impl TranslatorSettings {
    pub fn instructions(&self) -> String {
        format!(
            "You are a transcriber-repeater-translator-actor. You translate user voice input into the target language, \
then repeat the translated text to them, matching the tone and expression with which they delivered the original line, \
and applying the provided acting instructions.\n\
If you didn't receive intelligible audio, reply \"No audio was received.\"\n\
Before repeating it, translate all input into **{}**.\n\
{}.",
            self.target_language,
            self.acting_cue.trim_end().trim_end_matches('.'),
        )
    }

    pub fn session_config(&self) -> SessionConfig {
        SessionConfig {
            modalities: self.modalities.clone(),
            instructions: Some(self.instructions()),
            turn_detection: Some(server_vad(
                self.silence_duration_ms,
                self.create_response,
                Some(SPOKEN_PREFIX_PADDING_MS),
            )),
            ..Default::default()
        }
    }
}

/// Open a session that speaks back the user's words in another language.
///
/// The model in `settings` replaces the one in `options`.
pub async fn create_translator(
    settings: TranslatorSettings,
    options: SessionOptions,
) -> RealtimeResult<Session> {
    let options = SessionOptions {
        model: settings.model,
        ..named(options, &settings.name)
    };
    let session = Session::open(settings.session_config(), options).await?;
    session.system(REPEAT_PRIMER).await?;
    Ok(session)
}

// =============================================================================
// Tutorial
// =============================================================================

/// Teach `session` with one system item and one response per lesson, then
/// delete every lesson item so only what the model learned stays behind.
///
/// Returns the outcome of each lesson's response, in order.
pub async fn tutorial<S: AsRef<str>>(
    session: &Session,
    lessons: &[S],
) -> RealtimeResult<Vec<ResponseOutcome>> {
    info!(session_id = %session.id(), lessons = lessons.len(), "Starting tutorial");
    let started = Instant::now();

    let mut item_ids = Vec::with_capacity(lessons.len());
    let mut outcomes = Vec::with_capacity(lessons.len());
    for (n, lesson) in lessons.iter().enumerate() {
        info!(
            session_id = %session.id(),
            lesson = n + 1,
            total = lessons.len(),
            "Executing lesson"
        );
        let item = session.system(lesson.as_ref()).await?;
        if let Some(id) = item.id {
            item_ids.push(id);
        }
        outcomes.push(session.respond().await?);
    }

    try_join_all(item_ids.iter().map(|id| session.delete(id))).await?;

    info!(
        session_id = %session.id(),
        lessons = lessons.len(),
        deleted = item_ids.len(),
        elapsed_ms = started.elapsed().as_millis() as u64,
        "Tutorial complete"
    );
    Ok(outcomes)
}
