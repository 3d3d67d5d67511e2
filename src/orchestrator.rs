//! Submission state machine.
//!
//! The shell calls `begin_*` synchronously from its event handler, runs the
//! returned request on [`ChatPipeline::respond`] as a background task, and
//! hands the outcome back through [`Orchestrator::finish`]. Only one request
//! can be in flight: any `begin_*` call outside `Phase::Idle` is a no-op.

use std::collections::HashMap;
use std::sync::Arc;

use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::conversation::{Conversation, Message, Role, Source};
use crate::error::ChatError;
use crate::gemini::{is_creator_question, ModelClient, CREATOR_RESPONSE};
use crate::history::{HistoryEntry, HistoryStore, Reaction, ReactionCounts};
use crate::normalize::{self, FileInput};
use crate::progress;
use crate::prompt;
use crate::search::SearchAugmenter;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Reply {
    pub text: String,
    pub sources: Vec<Source>,
    pub image_url: Option<String>,
    pub additional_images: Vec<String>,
}

impl Reply {
    fn plain(text: impl Into<String>) -> Self {
        Reply {
            text: text.into(),
            sources: Vec::new(),
            image_url: None,
            additional_images: Vec::new(),
        }
    }
}

/// Everything the pipeline needs for one turn, captured at submit time.
#[derive(Debug, Clone)]
pub struct ChatRequest {
    pub id: Uuid,
    pub prompt: String,
    pub model: String,
    pub use_web_search: bool,
}

pub struct ChatPipeline {
    client: Arc<ModelClient>,
    augmenter: Option<SearchAugmenter>,
}

impl ChatPipeline {
    pub fn new(client: Arc<ModelClient>, augmenter: Option<SearchAugmenter>) -> Self {
        Self { client, augmenter }
    }

    pub fn default_model(&self) -> &str {
        self.client.get_model()
    }

    /// Search (when asked for), compose, then call the model.
    pub async fn respond(&self, request: &ChatRequest) -> Result<Reply, ChatError> {
        if is_creator_question(&request.prompt) {
            return Ok(Reply::plain(CREATOR_RESPONSE));
        }
        debug!("Responding to message {}", request.id);

        let sources = match (&self.augmenter, request.use_web_search) {
            (Some(augmenter), true) => augmenter.augment(&request.prompt).await,
            _ => Vec::new(),
        };

        let composed = prompt::compose(&request.prompt, &sources);
        progress::log(format!("Asking {}...", request.model));
        let text = self.client.generate_with(&request.model, &composed).await?;

        let mut icons = sources.iter().filter_map(|s| s.icon.clone());
        let image_url = icons.next();
        let additional_images = icons.collect();

        Ok(Reply {
            text,
            sources,
            image_url,
            additional_images,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Idle,
    Extracting,
    Submitting,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Severity {
    Info,
    Error,
}

/// Transient toast for the shell.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub title: String,
    pub description: String,
    pub severity: Severity,
}

impl Notice {
    pub fn info(title: impl Into<String>, description: impl Into<String>) -> Self {
        Notice { title: title.into(), description: description.into(), severity: Severity::Info }
    }

    pub fn error(err: &ChatError) -> Self {
        Notice {
            title: err.title().to_string(),
            description: err.user_message(),
            severity: Severity::Error,
        }
    }
}

pub struct Orchestrator {
    pipeline: Arc<ChatPipeline>,
    conversation: Conversation,
    history: Option<HistoryStore>,
    history_limit: usize,
    reactions: HashMap<Uuid, ReactionCounts>,
    input: String,
    phase: Phase,
    model: String,
    web_search: bool,
    notices: Vec<Notice>,
}

impl Orchestrator {
    pub fn new(pipeline: Arc<ChatPipeline>, history: Option<HistoryStore>) -> Self {
        let model = pipeline.default_model().to_string();
        Orchestrator {
            pipeline,
            conversation: Conversation::new(),
            history,
            history_limit: 50,
            reactions: HashMap::new(),
            input: String::new(),
            phase: Phase::Idle,
            model,
            web_search: false,
            notices: Vec::new(),
        }
    }

    pub fn with_history_limit(mut self, limit: usize) -> Self {
        self.history_limit = limit.max(1);
        self
    }

    pub fn with_web_search(mut self, enabled: bool) -> Self {
        self.web_search = enabled;
        self
    }

    pub fn pipeline(&self) -> Arc<ChatPipeline> {
        self.pipeline.clone()
    }

    pub fn conversation(&self) -> &Conversation {
        &self.conversation
    }

    pub fn input(&self) -> &str {
        &self.input
    }

    pub fn set_input(&mut self, value: String) {
        self.input = value;
    }

    pub fn phase(&self) -> Phase {
        self.phase
    }

    pub fn is_loading(&self) -> bool {
        self.phase != Phase::Idle
    }

    pub fn model(&self) -> &str {
        &self.model
    }

    pub fn set_model(&mut self, model: impl Into<String>) {
        self.model = model.into();
        info!("Model switched to {}", self.model);
    }

    pub fn web_search(&self) -> bool {
        self.web_search
    }

    pub fn set_web_search(&mut self, enabled: bool) {
        self.web_search = enabled;
    }

    /// Submits the current input box.
    pub fn begin_submit(&mut self) -> Option<ChatRequest> {
        let text = self.input.clone();
        self.begin_submit_text(text)
    }

    /// Idle-guarded transition to `Submitting`. The user message is in the
    /// transcript before this returns.
    pub fn begin_submit_text(&mut self, text: String) -> Option<ChatRequest> {
        if text.trim().is_empty() || self.phase != Phase::Idle {
            debug!("Ignoring submit in phase {:?}", self.phase);
            return None;
        }

        let id = self.conversation.push(Message::user(text.clone())).id;
        self.input.clear();
        self.phase = Phase::Submitting;

        if let Some(history) = &self.history {
            if let Err(e) = history.add_query(&text) {
                warn!("Failed to record query in history: {:#}", e);
                self.notices.push(Notice::info("Warning", "Failed to save to search history"));
            }
        }

        Some(ChatRequest {
            id,
            prompt: text,
            model: self.model.clone(),
            use_web_search: self.web_search,
        })
    }

    /// Lands a pipeline outcome. Outside `Submitting` the outcome is stale and dropped.
    pub fn finish(&mut self, outcome: Result<Reply, ChatError>) {
        if self.phase != Phase::Submitting {
            warn!("Dropping reply received in phase {:?}", self.phase);
            return;
        }

        match outcome {
            Ok(reply) => {
                let message = Message::assistant(reply.text)
                    .with_sources(reply.sources)
                    .with_images(reply.image_url, reply.additional_images);
                self.conversation.push(message);
                progress::log("Response received");
            }
            Err(err) => {
                warn!("Submission failed: {}", err);
                self.conversation.push(Message::assistant(format!("Error: {}", err.user_message())));
                self.notices.push(Notice::error(&err));
            }
        }
        self.phase = Phase::Idle;
    }

    /// Screens dropped files and moves to `Extracting`. Returns the files to normalize.
    /// An empty list means none of the dropped paths could be read.
    pub fn begin_files(&mut self, files: Vec<FileInput>) -> Option<Vec<FileInput>> {
        if self.phase != Phase::Idle {
            debug!("Ignoring {} file(s) in phase {:?}", files.len(), self.phase);
            self.notices.push(Notice::info(
                "Busy",
                "Please wait for the current response before adding files.",
            ));
            return None;
        }
        if files.is_empty() {
            self.notices.push(Notice {
                title: "Error processing file".to_string(),
                description: "Failed to process the file. Please try again.".to_string(),
                severity: Severity::Error,
            });
            return None;
        }

        match normalize::accept(files) {
            Ok(accepted) => {
                self.notices.push(Notice::info(
                    "Files received",
                    format!("Processing {} file(s)", accepted.len()),
                ));
                self.phase = Phase::Extracting;
                Some(accepted)
            }
            Err(err) => {
                self.notices.push(Notice::error(&err));
                None
            }
        }
    }

    /// Normalized file text becomes a regular submission. Extraction failures
    /// abort it and land in the transcript.
    pub fn files_ready(&mut self, outcome: Result<String, ChatError>) -> Option<ChatRequest> {
        if self.phase != Phase::Extracting {
            return None;
        }
        self.phase = Phase::Idle;

        match outcome {
            Ok(text) => self.begin_submit_text(text),
            Err(err) => {
                warn!("File processing failed: {}", err);
                self.conversation.push(Message::assistant(format!("Error: {}", err.user_message())));
                self.notices.push(Notice::error(&err));
                None
            }
        }
    }

    /// Records a like/dislike on an assistant message. Unknown ids are ignored.
    pub fn react(&mut self, message_id: Uuid, reaction: Reaction) -> Option<ReactionCounts> {
        let message = self.conversation.get(message_id)?;
        if message.role != Role::Assistant {
            return None;
        }

        let persisted = self.history.as_ref().and_then(|history| {
            history
                .react(message_id, reaction)
                .map_err(|e| warn!("Failed to persist reaction: {:#}", e))
                .ok()
        });

        let counts = self.reactions.entry(message_id).or_default();
        match persisted {
            Some(stored) => *counts = stored,
            None => match reaction {
                Reaction::Like => counts.likes += 1,
                Reaction::Dislike => counts.dislikes += 1,
            },
        }
        Some(*counts)
    }

    pub fn reactions(&self, message_id: Uuid) -> ReactionCounts {
        self.reactions.get(&message_id).copied().unwrap_or_default()
    }

    /// Newest first. Falls back to this session's queries without a store.
    pub fn recent_queries(&self) -> Vec<HistoryEntry> {
        if let Some(history) = &self.history {
            match history.list_queries(self.history_limit) {
                Ok(entries) => return entries,
                Err(e) => warn!("Failed to fetch history: {:#}", e),
            }
        }

        self.conversation
            .user_queries()
            .rev()
            .take(self.history_limit)
            .map(|m| HistoryEntry { query: m.content.clone(), created_at: m.created_at })
            .collect()
    }

    /// Wipes stored queries and the transcript. Refused while a request is pending.
    pub fn clear_history(&mut self) -> bool {
        if self.phase != Phase::Idle {
            return false;
        }
        if let Some(history) = &self.history {
            if let Err(e) = history.clear() {
                warn!("Failed to clear history: {:#}", e);
                self.notices.push(Notice {
                    title: "Error".to_string(),
                    description: "Failed to clear history. Please try again.".to_string(),
                    severity: Severity::Error,
                });
                return false;
            }
        }
        self.conversation.clear();
        self.reactions.clear();
        self.notices.push(Notice::info("History cleared", "Your search history has been cleared successfully."));
        true
    }

    pub fn notify(&mut self, notice: Notice) {
        self.notices.push(notice);
    }

    pub fn take_notices(&mut self) -> Vec<Notice> {
        std::mem::take(&mut self.notices)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::GeminiConfig;
    use crate::credentials::{CredentialStore, Credentials};
    use crate::error::ApiFailure;
    use crate::gemini::tests::{keyed_store, ScriptedBackend};
    use crate::search::SearchProvider;
    use async_trait::async_trait;

    impl Orchestrator {
        /// Runs a whole turn inline.
        pub async fn submit(&mut self, text: impl Into<String>) -> bool {
            let Some(request) = self.begin_submit_text(text.into()) else {
                return false;
            };
            let outcome = self.pipeline.respond(&request).await;
            self.finish(outcome);
            true
        }

        pub async fn submit_files(&mut self, files: Vec<FileInput>) -> bool {
            let Some(accepted) = self.begin_files(files) else {
                return false;
            };
            let text = normalize::normalize_all(&accepted).await;
            let Some(request) = self.files_ready(text) else {
                return false;
            };
            let outcome = self.pipeline.respond(&request).await;
            self.finish(outcome);
            true
        }
    }

    struct FixedProvider(Vec<Source>);

    #[async_trait]
    impl SearchProvider for FixedProvider {
        async fn search(&self, _query: &str, _max: usize) -> Result<Vec<Source>, ChatError> {
            Ok(self.0.clone())
        }
    }

    fn source(n: usize, icon: bool) -> Source {
        Source {
            title: format!("Source {}", n),
            link: format!("https://example.com/{}", n),
            snippet: format!("About {}", n),
            icon: icon.then(|| format!("https://example.com/{}.png", n)),
        }
    }

    fn orchestrator(backend: Arc<ScriptedBackend>, store: &CredentialStore) -> Orchestrator {
        let client = Arc::new(ModelClient::new(backend, store.handle(), &GeminiConfig::default()));
        Orchestrator::new(Arc::new(ChatPipeline::new(client, None)), None)
    }

    fn with_search(backend: Arc<ScriptedBackend>, store: &CredentialStore, sources: Vec<Source>) -> Orchestrator {
        let client = Arc::new(ModelClient::new(backend, store.handle(), &GeminiConfig::default()));
        let augmenter = SearchAugmenter::new(Arc::new(FixedProvider(sources)), 3);
        Orchestrator::new(Arc::new(ChatPipeline::new(client, Some(augmenter))), None).with_web_search(true)
    }

    #[tokio::test]
    async fn test_user_message_lands_before_network() {
        let backend = ScriptedBackend::new(vec![Ok("Drilling mud cools the bit.".to_string())]);
        let store = keyed_store();
        let mut orch = orchestrator(backend.clone(), &store);
        orch.set_input("What is drilling mud?".to_string());

        let request = orch.begin_submit().unwrap();
        assert_eq!(orch.conversation().messages().len(), 1);
        assert_eq!(orch.conversation().messages()[0].role, Role::User);
        assert_eq!(orch.input(), "");
        assert!(orch.is_loading());
        assert_eq!(backend.calls(), 0);

        let outcome = orch.pipeline().respond(&request).await;
        orch.finish(outcome);

        assert_eq!(orch.phase(), Phase::Idle);
        assert_eq!(orch.conversation().messages().len(), 2);
        assert_eq!(orch.conversation().messages()[1].content, "Drilling mud cools the bit.");
    }

    #[test]
    fn test_blank_input_is_ignored() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend, &store);
        orch.set_input("   \n ".to_string());

        assert!(orch.begin_submit().is_none());
        assert!(orch.conversation().is_empty());
        assert_eq!(orch.input(), "   \n ");
    }

    #[tokio::test]
    async fn test_second_submit_while_pending_is_a_no_op() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend.clone(), &store);

        let first = orch.begin_submit_text("first".to_string()).unwrap();
        assert!(orch.begin_submit_text("second".to_string()).is_none());
        assert!(orch.begin_files(vec![FileInput::new("a.pdf", "application/pdf", vec![1])]).is_none());

        let outcome = orch.pipeline().respond(&first).await;
        orch.finish(outcome);

        assert_eq!(backend.calls(), 1);
        assert_eq!(orch.conversation().messages().len(), 2);
        assert_eq!(orch.conversation().user_queries().count(), 1);
    }

    #[tokio::test]
    async fn test_failure_is_written_to_transcript() {
        let backend = ScriptedBackend::new(vec![Err(ApiFailure::new(Some(400), "exceeds max tokens limit"))]);
        let store = keyed_store();
        let mut orch = orchestrator(backend, &store);

        assert!(orch.submit("a huge prompt").await);

        let last = orch.conversation().messages().last().unwrap();
        assert_eq!(last.content, "Error: Your message is too long. Please try sending a shorter message.");
        assert!(last.is_error());
        assert_eq!(orch.phase(), Phase::Idle);

        let notices = orch.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Error);
        assert!(orch.take_notices().is_empty());
    }

    #[tokio::test]
    async fn test_missing_key_prompts_for_settings() {
        let backend = ScriptedBackend::new(vec![]);
        let store = CredentialStore::in_memory(Credentials::default());
        let mut orch = orchestrator(backend.clone(), &store);

        orch.submit("hello").await;

        assert_eq!(backend.calls(), 0);
        assert_eq!(
            orch.conversation().messages().last().unwrap().content,
            "Error: Please add your Gemini API key in settings before sending a message."
        );
    }

    #[tokio::test]
    async fn test_creator_question_needs_no_key_or_search() {
        let backend = ScriptedBackend::new(vec![]);
        let store = CredentialStore::in_memory(Credentials::default());
        let mut orch = with_search(backend.clone(), &store, vec![source(1, true)]);

        orch.submit("Who Made You?").await;

        let reply = orch.conversation().messages().last().unwrap();
        assert_eq!(reply.content, CREATOR_RESPONSE);
        assert!(reply.sources.is_empty());
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn test_sources_and_images_attach_to_reply() {
        let backend = ScriptedBackend::new(vec![Ok("ANSWER:\n\nSee sources.".to_string())]);
        let store = keyed_store();
        let sources = vec![source(1, false), source(2, true), source(3, true), source(4, true)];
        let mut orch = with_search(backend.clone(), &store, sources);

        orch.submit("latest rig counts").await;

        let reply = orch.conversation().messages().last().unwrap();
        assert_eq!(reply.sources.len(), 3);
        assert_eq!(reply.image_url.as_deref(), Some("https://example.com/2.png"));
        assert_eq!(reply.additional_images, vec!["https://example.com/3.png".to_string()]);

        let prompt = backend.prompts.lock().unwrap()[0].clone();
        assert!(prompt.contains("Reference Materials"));
        assert!(prompt.contains("3. Source 3"));
        assert!(!prompt.contains("Source 4"));
    }

    #[tokio::test]
    async fn test_search_skipped_when_toggle_off() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = with_search(backend.clone(), &store, vec![source(1, true)]);
        orch.set_web_search(false);

        orch.submit("no search please").await;

        assert!(orch.conversation().messages().last().unwrap().sources.is_empty());
        assert!(!backend.prompts.lock().unwrap()[0].contains("Reference Materials"));
    }

    #[tokio::test]
    async fn test_selected_model_is_used() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend.clone(), &store);
        assert_eq!(orch.model(), "gemini-1.5-pro");

        orch.set_model("gemini-1.5-flash");
        orch.submit("quick one").await;

        assert_eq!(backend.models.lock().unwrap().as_slice(), ["gemini-1.5-flash".to_string()]);
    }

    #[test]
    fn test_stale_finish_is_ignored() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend, &store);

        orch.finish(Ok(Reply::plain("late")));
        assert!(orch.conversation().is_empty());
    }

    #[tokio::test]
    async fn test_unsupported_files_only_notify() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend.clone(), &store);

        let submitted = orch.submit_files(vec![FileInput::new("notes.txt", "text/plain", b"hi".to_vec())]).await;

        assert!(!submitted);
        assert!(orch.conversation().is_empty());
        assert_eq!(orch.phase(), Phase::Idle);
        let notices = orch.take_notices();
        assert_eq!(notices[0].title, "Unsupported file type");
        assert_eq!(backend.calls(), 0);
    }

    #[test]
    fn test_files_while_busy_or_unreadable_notify() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend, &store);

        assert!(orch.begin_files(Vec::new()).is_none());
        let notices = orch.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].severity, Severity::Error);
        assert_eq!(orch.phase(), Phase::Idle);

        orch.begin_submit_text("pending".to_string()).unwrap();
        let deck = FileInput::new("deck.pptx", normalize::PPTX_MIME, b"Slide".to_vec());
        assert!(orch.begin_files(vec![deck]).is_none());
        let notices = orch.take_notices();
        assert_eq!(notices.len(), 1);
        assert_eq!(notices[0].title, "Busy");
        assert_eq!(orch.phase(), Phase::Submitting);
    }

    #[tokio::test]
    async fn test_extraction_failure_aborts_submission() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend.clone(), &store);

        let bogus_png = FileInput::new("photo.png", "image/png", b"definitely not a png".to_vec());
        let submitted = orch.submit_files(vec![bogus_png]).await;

        assert!(!submitted);
        assert_eq!(backend.calls(), 0);
        assert_eq!(orch.phase(), Phase::Idle);
        assert_eq!(orch.conversation().messages().len(), 1);
        assert!(orch.conversation().messages().last().unwrap().is_error());

        let titles: Vec<String> = orch.take_notices().into_iter().map(|n| n.title).collect();
        assert_eq!(titles, vec!["Files received".to_string(), "Error processing file".to_string()]);
    }

    #[tokio::test]
    async fn test_presentation_is_submitted_as_text() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend.clone(), &store);

        let deck = FileInput::new("deck.pptx", normalize::PPTX_MIME, b"Slide one".to_vec());
        assert!(orch.submit_files(vec![deck]).await);

        let user = &orch.conversation().messages()[0];
        assert!(user.content.contains("Slide one"));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn test_history_and_reactions_persist() {
        let dir = tempfile::tempdir().unwrap();
        let history = HistoryStore::open(&dir.path().join("history.sqlite")).unwrap();
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let client = Arc::new(ModelClient::new(backend, store.handle(), &GeminiConfig::default()));
        let mut orch = Orchestrator::new(Arc::new(ChatPipeline::new(client, None)), Some(history.clone()))
            .with_history_limit(1);

        orch.submit("first question").await;
        orch.submit("second question").await;
        let recent: Vec<String> = orch.recent_queries().into_iter().map(|e| e.query).collect();
        assert_eq!(recent, vec!["second question".to_string()]);

        let user_id = orch.conversation().messages()[0].id;
        let reply_id = orch.conversation().last_assistant().unwrap().id;
        assert!(orch.react(user_id, Reaction::Like).is_none());
        orch.react(reply_id, Reaction::Like);
        let counts = orch.react(reply_id, Reaction::Dislike).unwrap();
        assert_eq!(counts, ReactionCounts { likes: 1, dislikes: 1 });
        assert_eq!(history.reactions(reply_id).unwrap(), counts);

        assert!(orch.clear_history());
        assert!(orch.conversation().is_empty());
        assert!(orch.recent_queries().is_empty());
    }

    #[tokio::test]
    async fn test_recent_queries_without_store() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend, &store);

        orch.submit("one").await;
        orch.submit("two").await;
        let recent: Vec<String> = orch.recent_queries().into_iter().map(|e| e.query).collect();
        assert_eq!(recent, vec!["two".to_string(), "one".to_string()]);

        let reply_id = orch.conversation().last_assistant().unwrap().id;
        orch.react(reply_id, Reaction::Like);
        assert_eq!(orch.reactions(reply_id).likes, 1);
    }

    #[test]
    fn test_clear_refused_while_pending() {
        let backend = ScriptedBackend::new(vec![]);
        let store = keyed_store();
        let mut orch = orchestrator(backend, &store);

        orch.begin_submit_text("pending".to_string()).unwrap();
        assert!(!orch.clear_history());
        assert_eq!(orch.conversation().messages().len(), 1);
    }
}
