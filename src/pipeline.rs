//! # Voice Pipeline
//!
//! Runs one inbound recording through every stage and produces the single
//! event that goes back to the originating connection:
//!
//! ```text
//! Received → Converted → Transcribed ─┬─ empty → "didn't catch that"
//!                                     └─ Filtered → Replied ─┬─ synthesis failed → error
//!                                                            └─ Synthesized → audio_response
//! ```
//!
//! Conversion and synthesis failures abort the exchange. Transcription
//! failures count as an empty transcript and chat failures as the fallback
//! reply. Anything unexpected, a panic included, becomes the generic error.
//! Temporary audio files are owned by a guard that is dropped on every one
//! of these paths.

use crate::audio::AudioIngest;
use crate::conversation::{SessionStore, SharedConversation};
use crate::dialogue::DialogueGenerator;
use crate::error::{client_messages, ConversionError, PipelineError, SynthesisError};
use crate::filter::ContentFilter;
use crate::protocol::ServerEvent;
use crate::synthesis::SpeechSynthesizer;
use crate::transcription::Transcriber;
use futures_util::FutureExt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Why an exchange ended without an `audio_response`.
#[derive(Debug)]
enum Failure {
    Conversion(ConversionError),
    Synthesis(SynthesisError),
    Unexpected(PipelineError),
    /// Chat service down and fallback replies are reported as errors
    ChatUnavailable(String),
}

impl From<ConversionError> for Failure {
    fn from(err: ConversionError) -> Self {
        match err {
            // Temp file write failed, not a decoding problem
            ConversionError::Io(io) => Failure::Unexpected(PipelineError::Io(io)),
            other => Failure::Conversion(other),
        }
    }
}

impl From<SynthesisError> for Failure {
    fn from(err: SynthesisError) -> Self {
        Failure::Synthesis(err)
    }
}

impl Failure {
    fn client_message(&self) -> String {
        match self {
            Failure::Conversion(_) => client_messages::CONVERSION_FAILED.to_string(),
            Failure::Synthesis(_) => client_messages::SYNTHESIS_FAILED.to_string(),
            Failure::Unexpected(_) => client_messages::PROCESSING_FAILED.to_string(),
            Failure::ChatUnavailable(reply) => reply.clone(),
        }
    }
}

impl std::fmt::Display for Failure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Failure::Conversion(e) => write!(f, "conversion: {}", e),
            Failure::Synthesis(e) => write!(f, "synthesis: {}", e),
            Failure::Unexpected(e) => write!(f, "{}", e),
            Failure::ChatUnavailable(_) => write!(f, "chat service unavailable"),
        }
    }
}

/// The stages of one exchange, shared by every connection.
pub struct VoicePipeline {
    ingest: AudioIngest,
    transcriber: Transcriber,
    filter: ContentFilter,
    dialogue: DialogueGenerator,
    synthesizer: SpeechSynthesizer,
    sessions: Arc<SessionStore>,
    fallback_as_error: bool,
}

impl VoicePipeline {
    pub fn new(
        ingest: AudioIngest,
        transcriber: Transcriber,
        filter: ContentFilter,
        dialogue: DialogueGenerator,
        synthesizer: SpeechSynthesizer,
        sessions: Arc<SessionStore>,
    ) -> Self {
        Self {
            ingest,
            transcriber,
            filter,
            dialogue,
            synthesizer,
            sessions,
            fallback_as_error: false,
        }
    }

    /// Report chat-service outages as `error` events carrying the fallback text.
    pub fn with_fallback_as_error(mut self, enabled: bool) -> Self {
        self.fallback_as_error = enabled;
        self
    }

    pub fn sessions(&self) -> &Arc<SessionStore> {
        &self.sessions
    }

    /// Process one recording from `connection_id` and return the reply event.
    ///
    /// `conversation` is taken from the store when the message arrives. If the
    /// connection closes mid-exchange the store entry is gone and the turns
    /// land in this detached handle only.
    pub async fn handle(&self, connection_id: &str, conversation: SharedConversation, audio: &[u8]) -> ServerEvent {
        let message_id = Uuid::new_v4().to_string();
        let start_time = Instant::now();
        info!(connection_id, message_id = %message_id, bytes = audio.len(), "Processing audio message");

        let outcome = AssertUnwindSafe(self.process(connection_id, &message_id, &conversation, audio))
            .catch_unwind()
            .await
            .unwrap_or_else(|panic| Err(Failure::Unexpected(PipelineError::Panic(panic_message(&*panic)))));

        let elapsed_ms = start_time.elapsed().as_millis() as u64;
        match outcome {
            Ok(event) => {
                info!(connection_id, message_id = %message_id, elapsed_ms, error = event.is_error(), "Audio message processed");
                event
            }
            Err(failure) => {
                error!(connection_id, message_id = %message_id, elapsed_ms, "Audio message failed: {}", failure);
                ServerEvent::error(failure.client_message())
            }
        }
    }

    async fn process(
        &self,
        connection_id: &str,
        message_id: &str,
        conversation: &SharedConversation,
        audio: &[u8],
    ) -> Result<ServerEvent, Failure> {
        // Dropping `ingested` deletes both temporary files
        let ingested = self.ingest.ingest(message_id, audio).await?;
        debug!(message_id, "Audio converted");

        let transcript = self.transcriber.transcribe(ingested.waveform_path()).await;
        if transcript.trim().is_empty() {
            info!(connection_id, message_id, "Empty transcript");
            return Ok(ServerEvent::error(client_messages::NOT_UNDERSTOOD));
        }

        let filtered = self.filter.censor(&transcript);
        if filtered != transcript {
            debug!(message_id, "Transcript contained filtered words");
        }

        let reply = self.dialogue.respond(conversation, &filtered).await;
        if reply.fallback && self.fallback_as_error {
            warn!(connection_id, message_id, "Reporting chat outage to client");
            return Err(Failure::ChatUnavailable(reply.text));
        }

        let audio_data = self.synthesizer.synthesize(&reply.text).await?;

        Ok(ServerEvent::AudioResponse {
            user_text: transcript,
            assistant_text: reply.text,
            audio_data,
        })
    }
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(message) = panic.downcast_ref::<&str>() {
        message.to_string()
    } else if let Some(message) = panic.downcast_ref::<String>() {
        message.clone()
    } else {
        "unknown panic".to_string()
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use super::*;
    use crate::audio::AudioConverter;
    use crate::conversation::{Role, Turn};
    use crate::dialogue::ChatCompletion;
    use crate::error::{DialogueError, TranscriptionError};
    use crate::synthesis::SpeechSynthesis;
    use crate::transcription::SpeechToText;
    use async_trait::async_trait;
    use std::path::{Path, PathBuf};
    use std::sync::Mutex;
    use std::time::Duration;

    pub(crate) const FALLBACK: &str = "I'm having trouble connecting to the server.";

    /// Copies the blob to the waveform path and remembers the paths it saw.
    #[derive(Default)]
    pub(crate) struct FakeConverter {
        pub fail: bool,
        pub delay: Duration,
        pub seen: Mutex<Vec<PathBuf>>,
    }

    #[async_trait]
    impl AudioConverter for FakeConverter {
        async fn convert(&self, input: &Path, output: &Path) -> Result<(), ConversionError> {
            self.seen.lock().unwrap().extend([input.to_path_buf(), output.to_path_buf()]);
            tokio::time::sleep(self.delay).await;
            if self.fail {
                return Err(ConversionError::Failed {
                    status: "exit status: 1".to_string(),
                    stderr: "Invalid data found when processing input".to_string(),
                });
            }
            std::fs::copy(input, output)?;
            Ok(())
        }
    }

    /// "Transcribes" by reading the waveform file as UTF-8 text.
    pub(crate) struct EchoRecognizer {
        pub fail: bool,
        pub panic: bool,
    }

    #[async_trait]
    impl SpeechToText for EchoRecognizer {
        async fn transcribe(&self, waveform: &Path) -> Result<String, TranscriptionError> {
            if self.panic {
                panic!("decoder exploded");
            }
            if self.fail {
                return Err(TranscriptionError::Worker("model crashed".to_string()));
            }
            let bytes = tokio::fs::read(waveform)
                .await
                .map_err(|e| TranscriptionError::Waveform(e.to_string()))?;
            Ok(String::from_utf8_lossy(&bytes).to_string())
        }
    }

    /// Answers "You said: <last user turn>" and records every request.
    #[derive(Default)]
    pub(crate) struct EchoChat {
        pub fail: bool,
        pub calls: Mutex<Vec<Vec<Turn>>>,
    }

    #[async_trait]
    impl ChatCompletion for EchoChat {
        async fn complete(&self, turns: &[Turn]) -> Result<String, DialogueError> {
            self.calls.lock().unwrap().push(turns.to_vec());
            if self.fail {
                return Err(DialogueError::Status { status: 503, body: "down".to_string() });
            }
            let last = turns.last().map(|t| t.content.clone()).unwrap_or_default();
            Ok(format!("You said: {}", last))
        }
    }

    /// Returns the reply text as audio bytes.
    #[derive(Default)]
    pub(crate) struct EchoSpeech {
        pub fail: bool,
        pub calls: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl SpeechSynthesis for EchoSpeech {
        async fn synthesize(&self, text: &str) -> Result<Vec<u8>, SynthesisError> {
            self.calls.lock().unwrap().push(text.to_string());
            if self.fail {
                return Err(SynthesisError::Canceled { status: 400, details: "bad voice".to_string() });
            }
            Ok(text.as_bytes().to_vec())
        }
    }

    pub(crate) struct Harness {
        pub pipeline: VoicePipeline,
        pub converter: Arc<FakeConverter>,
        pub chat: Arc<EchoChat>,
        pub speech: Arc<EchoSpeech>,
        pub temp_dir: tempfile::TempDir,
    }

    impl Harness {
        pub fn builder() -> HarnessBuilder {
            HarnessBuilder::default()
        }

        /// Deliver `audio` the way the socket actor does: session first, then the exchange.
        pub async fn send(&self, connection_id: &str, audio: &[u8]) -> ServerEvent {
            let conversation = self.pipeline.sessions().get_or_create(connection_id);
            self.pipeline.handle(connection_id, conversation, audio).await
        }

        pub fn temp_files(&self) -> usize {
            std::fs::read_dir(self.temp_dir.path()).unwrap().count()
        }
    }

    #[derive(Default)]
    pub(crate) struct HarnessBuilder {
        conversion_fails: bool,
        conversion_delay: Duration,
        transcription_fails: bool,
        transcription_panics: bool,
        chat_fails: bool,
        synthesis_fails: bool,
        fallback_as_error: bool,
    }

    impl HarnessBuilder {
        pub fn conversion_fails(mut self) -> Self {
            self.conversion_fails = true;
            self
        }
        pub fn conversion_delay(mut self, delay: Duration) -> Self {
            self.conversion_delay = delay;
            self
        }
        pub fn transcription_fails(mut self) -> Self {
            self.transcription_fails = true;
            self
        }
        pub fn transcription_panics(mut self) -> Self {
            self.transcription_panics = true;
            self
        }
        pub fn chat_fails(mut self) -> Self {
            self.chat_fails = true;
            self
        }
        pub fn synthesis_fails(mut self) -> Self {
            self.synthesis_fails = true;
            self
        }
        pub fn fallback_as_error(mut self) -> Self {
            self.fallback_as_error = true;
            self
        }

        pub fn build(self) -> Harness {
            let temp_dir = tempfile::tempdir().unwrap();
            let converter = Arc::new(FakeConverter {
                fail: self.conversion_fails,
                delay: self.conversion_delay,
                ..Default::default()
            });
            let chat = Arc::new(EchoChat {
                fail: self.chat_fails,
                ..Default::default()
            });
            let speech = Arc::new(EchoSpeech {
                fail: self.synthesis_fails,
                ..Default::default()
            });

            let pipeline = VoicePipeline::new(
                AudioIngest::new(converter.clone(), temp_dir.path().to_path_buf(), ".webm"),
                Transcriber::new(Arc::new(EchoRecognizer {
                    fail: self.transcription_fails,
                    panic: self.transcription_panics,
                })),
                ContentFilter::new(),
                DialogueGenerator::new(chat.clone(), FALLBACK, Duration::from_secs(5)),
                SpeechSynthesizer::new(speech.clone(), Duration::from_secs(5)),
                Arc::new(SessionStore::new("You are Ava.")),
            )
            .with_fallback_as_error(self.fallback_as_error);

            Harness {
                pipeline,
                converter,
                chat,
                speech,
                temp_dir,
            }
        }
    }

    #[tokio::test]
    async fn test_successful_exchange() {
        let harness = Harness::builder().build();

        let event = harness.send("conn-1", b"hello there").await;
        assert_eq!(
            event,
            ServerEvent::AudioResponse {
                user_text: "hello there".to_string(),
                assistant_text: "You said: hello there".to_string(),
                audio_data: b"You said: hello there".to_vec(),
            }
        );

        let conversation = harness.pipeline.sessions().get("conn-1").unwrap();
        let conversation = conversation.lock().await;
        assert_eq!(conversation.len(), 3);
        assert_eq!(conversation.turns()[0], Turn::system("You are Ava."));
        assert_eq!(harness.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_each_exchange_adds_two_turns() {
        let harness = Harness::builder().build();

        harness.send("conn-1", b"first").await;
        harness.send("conn-1", b"second").await;

        let conversation = harness.pipeline.sessions().get("conn-1").unwrap();
        let conversation = conversation.lock().await;
        let roles: Vec<Role> = conversation.turns().iter().map(|t| t.role).collect();
        assert_eq!(
            roles,
            vec![Role::System, Role::User, Role::Assistant, Role::User, Role::Assistant]
        );
        assert_eq!(conversation.system_turn().content, "You are Ava.");
    }

    #[tokio::test]
    async fn test_conversion_failure_sends_one_error_and_cleans_up() {
        let harness = Harness::builder().conversion_fails().build();

        let event = harness.send("conn-1", b"garbage").await;
        assert_eq!(event, ServerEvent::error("Audio conversion failed."));

        assert!(harness.converter.seen.lock().unwrap().iter().all(|p| !p.exists()));
        assert_eq!(harness.temp_files(), 0);
        assert!(harness.chat.calls.lock().unwrap().is_empty());

        // The session exists from the first message on, untouched by the failed exchange
        let conversation = harness.pipeline.sessions().get("conn-1").unwrap();
        assert_eq!(conversation.lock().await.len(), 1);
    }

    #[tokio::test]
    async fn test_empty_payload_is_conversion_failure() {
        let harness = Harness::builder().build();

        let event = harness.send("conn-1", b"").await;
        assert_eq!(event, ServerEvent::error("Audio conversion failed."));
    }

    #[tokio::test]
    async fn test_blank_transcript_skips_dialogue_and_synthesis() {
        let harness = Harness::builder().build();

        let event = harness.send("conn-1", b"   \n ").await;
        assert_eq!(event, ServerEvent::error("I didn't catch that. Could you please repeat?"));
        assert!(harness.chat.calls.lock().unwrap().is_empty());
        assert!(harness.speech.calls.lock().unwrap().is_empty());
        assert_eq!(harness.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_transcription_failure_behaves_like_empty_transcript() {
        let harness = Harness::builder().transcription_fails().build();

        let event = harness.send("conn-1", b"hello").await;
        assert_eq!(event, ServerEvent::error("I didn't catch that. Could you please repeat?"));
        assert!(harness.chat.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_profanity_is_masked_before_dialogue() {
        let harness = Harness::builder().build();

        let event = harness.send("conn-1", b"well shit, that's damn late").await;
        match event {
            ServerEvent::AudioResponse { user_text, assistant_text, .. } => {
                assert_eq!(user_text, "well shit, that's damn late");
                assert_eq!(assistant_text, "You said: well ****, that's **** late");
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let calls = harness.chat.calls.lock().unwrap();
        assert!(calls[0].iter().all(|t| !t.content.contains("shit") && !t.content.contains("damn")));

        let conversation = harness.pipeline.sessions().get("conn-1").unwrap();
        let conversation = conversation.lock().await;
        assert!(conversation.turns().iter().all(|t| !t.content.contains("shit")));
    }

    #[tokio::test]
    async fn test_synthesis_failure_sends_error_not_response() {
        let harness = Harness::builder().synthesis_fails().build();

        let event = harness.send("conn-1", b"hello").await;
        assert_eq!(event, ServerEvent::error("Error during speech synthesis."));
        assert_eq!(harness.speech.calls.lock().unwrap().len(), 1);
        assert_eq!(harness.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_chat_failure_speaks_fallback_and_keeps_user_turn() {
        let harness = Harness::builder().chat_fails().build();

        let event = harness.send("conn-1", b"hello").await;
        match event {
            ServerEvent::AudioResponse { assistant_text, audio_data, .. } => {
                assert_eq!(assistant_text, FALLBACK);
                assert_eq!(audio_data, FALLBACK.as_bytes());
            }
            other => panic!("unexpected event: {other:?}"),
        }

        let conversation = harness.pipeline.sessions().get("conn-1").unwrap();
        let conversation = conversation.lock().await;
        assert_eq!(conversation.len(), 2);
        assert_eq!(conversation.turns()[1], Turn::user("hello"));
    }

    #[tokio::test]
    async fn test_chat_failure_reported_as_error_when_configured() {
        let harness = Harness::builder().chat_fails().fallback_as_error().build();

        let event = harness.send("conn-1", b"hello").await;
        assert_eq!(event, ServerEvent::error(FALLBACK));
        assert!(harness.speech.calls.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_panic_becomes_generic_error_and_cleans_up() {
        let harness = Harness::builder().transcription_panics().build();

        let event = harness.send("conn-1", b"hello").await;
        assert_eq!(event, ServerEvent::error("An error occurred during processing."));
        assert_eq!(harness.temp_files(), 0);
    }

    #[tokio::test]
    async fn test_missing_temp_dir_is_generic_error() {
        let harness = Harness::builder().build();
        let pipeline = VoicePipeline::new(
            AudioIngest::new(
                harness.converter.clone(),
                harness.temp_dir.path().join("does-not-exist"),
                ".webm",
            ),
            Transcriber::new(Arc::new(EchoRecognizer { fail: false, panic: false })),
            ContentFilter::new(),
            DialogueGenerator::new(harness.chat.clone(), FALLBACK, Duration::from_secs(5)),
            SpeechSynthesizer::new(harness.speech.clone(), Duration::from_secs(5)),
            Arc::new(SessionStore::new("You are Ava.")),
        );

        let conversation = pipeline.sessions().get_or_create("conn-1");
        let event = pipeline.handle("conn-1", conversation, b"hello").await;
        assert_eq!(event, ServerEvent::error("An error occurred during processing."));
    }

    #[tokio::test]
    async fn test_disconnect_mid_exchange_does_not_recreate_session() {
        let harness = Arc::new(Harness::builder().conversion_delay(Duration::from_millis(200)).build());
        let sessions = harness.pipeline.sessions().clone();
        let conversation = sessions.get_or_create("conn-x");

        let task = {
            let harness = harness.clone();
            let conversation = conversation.clone();
            tokio::spawn(async move { harness.pipeline.handle("conn-x", conversation, b"hello").await })
        };
        tokio::time::sleep(Duration::from_millis(50)).await;
        assert!(sessions.remove("conn-x"));

        let event = task.await.unwrap();
        assert!(!event.is_error());
        assert!(sessions.get("conn-x").is_none());
        assert!(sessions.is_empty());
        // The exchange finished against the detached conversation
        assert_eq!(conversation.lock().await.len(), 3);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_connections_do_not_mix() {
        let harness = Arc::new(Harness::builder().build());

        let tasks: Vec<_> = (0..8)
            .map(|i| {
                let harness = harness.clone();
                tokio::spawn(async move {
                    let connection = format!("conn-{}", i % 2);
                    let text = format!("message {} for {}", i, connection);
                    harness.send(&connection, text.as_bytes()).await
                })
            })
            .collect();
        for task in tasks {
            assert!(!task.await.unwrap().is_error());
        }

        for connection in ["conn-0", "conn-1"] {
            let conversation = harness.pipeline.sessions().get(connection).unwrap();
            let conversation = conversation.lock().await;
            assert_eq!(conversation.len(), 9);
            for pair in conversation.turns()[1..].chunks(2) {
                assert_eq!(pair[0].role, Role::User);
                assert_eq!(pair[1].role, Role::Assistant);
                assert!(pair[0].content.ends_with(connection));
                assert_eq!(pair[1].content, format!("You said: {}", pair[0].content));
            }
        }
    }
}
