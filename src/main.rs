mod config;
mod conversation;
mod credentials;
mod error;
mod format;
mod gemini;
mod history;
mod normalize;
mod orchestrator;
mod progress;
mod prompt;
mod search;

use iced::{
    widget::{
        button, checkbox, column, container, pick_list, rich_text, row, scrollable, span, text,
        text::Span, text_input, text_input::Id, Column,
    },
    Element, Length, Task, Theme, Font, Subscription,
    time, clipboard, font,
    keyboard::{self, Key},
    event::{self, Event as IcedEvent},
    alignment, Padding,
    window,
};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use uuid::Uuid;

use config::{Config, SearchProviderKind};
use conversation::Role;
use credentials::{CredentialKey, CredentialStore, Credentials};
use error::ChatError;
use format::Block;
use gemini::{GeminiHttp, ModelClient, KNOWN_MODELS};
use history::{HistoryEntry, HistoryStore, Reaction};
use normalize::FileInput;
use orchestrator::{ChatPipeline, Notice, Orchestrator, Phase, Reply, Severity};
use search::{GoogleSearch, ModelSearch, SearchAugmenter, SearchProvider};

const BOLD: Font = Font { weight: font::Weight::Bold, ..Font::MONOSPACE };
const UNDERLINE: Font = Font { style: font::Style::Italic, ..Font::MONOSPACE };
const NOTICE_TTL: Duration = Duration::from_secs(4);
const DROP_SETTLE: Duration = Duration::from_millis(200);

fn main() -> iced::Result {
    init_tracing();
    let config = Config::load();

    iced::application("Layla", App::update, App::view)
        .theme(App::theme)
        .subscription(App::subscription)
        .window(window::Settings {
            size: iced::Size::new(config.window.width as f32, config.window.height as f32),
            min_size: Some(iced::Size::new(config.window.min_width as f32, config.window.min_height as f32)),
            position: window::Position::Centered,
            ..Default::default()
        })
        .default_font(Font::MONOSPACE)
        .run_with(App::new)
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("LAYLA_LOG").unwrap_or_else(|_| EnvFilter::new("warn"));
    tracing_subscriber::fmt().with_env_filter(filter).init();
}

/// Wires the model client, search provider and history store from config.
fn build_orchestrator(config: &Config, credentials: &CredentialStore) -> Orchestrator {
    let backend = Arc::new(GeminiHttp::with_config(&config.gemini));
    let client = Arc::new(ModelClient::new(backend, credentials.handle(), &config.gemini));

    let provider: Arc<dyn SearchProvider> = match (&config.search.provider, &config.search.google_engine_id) {
        (SearchProviderKind::Google, Some(engine_id)) => {
            Arc::new(GoogleSearch::new(credentials.handle(), engine_id.clone(), config.gemini.request_timeout()))
        }
        (SearchProviderKind::Google, None) => {
            warn!("Google search selected without google_engine_id, using model search");
            Arc::new(ModelSearch::new(client.clone()))
        }
        (SearchProviderKind::Model, _) => Arc::new(ModelSearch::new(client.clone())),
    };
    let augmenter = SearchAugmenter::new(provider, config.search.max_sources);

    let history = if config.history.enabled {
        match HistoryStore::open(&HistoryStore::default_path()) {
            Ok(store) => Some(store),
            Err(e) => {
                warn!("History disabled: {:#}", e);
                None
            }
        }
    } else {
        None
    };

    Orchestrator::new(Arc::new(ChatPipeline::new(client, Some(augmenter))), history)
        .with_history_limit(config.history.max_entries)
        .with_web_search(config.search.web_search_default)
}

#[derive(Debug, Clone, PartialEq, Eq)]
struct ModelChoice {
    id: &'static str,
    label: &'static str,
}

impl fmt::Display for ModelChoice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label)
    }
}

fn model_choices() -> Vec<ModelChoice> {
    KNOWN_MODELS.iter().map(|&(id, label)| ModelChoice { id, label }).collect()
}

#[derive(Debug, Clone)]
enum Message {
    InputChanged(String),
    Submit,
    Replied(Result<Reply, ChatError>),
    Suggestion(&'static str),
    HistorySelected(String),
    ClearHistory,
    ToggleWebSearch(bool),
    ModelSelected(ModelChoice),
    ApiKeyChanged(String),
    SearchKeyChanged(String),
    SaveApiKey(CredentialKey),
    FileDropped(PathBuf),
    DropsSettled,
    FilesNormalized(Result<String, ChatError>),
    React(Uuid, Reaction),
    CopyOutput,
    Tick,
    Exit,
}

struct App {
    orchestrator: Orchestrator,
    credentials: CredentialStore,
    search_provider: SearchProviderKind,
    api_key_input: String,
    search_key_input: String,
    pending_drops: Vec<PathBuf>,
    history_items: Vec<HistoryEntry>,
    toasts: Vec<(Instant, Notice)>,
    loading_frame: usize,
    input_id: Id,
}

impl App {
    fn new() -> (Self, Task<Message>) {
        let config = Config::load();

        let secrets_path = Config::get_config_dir().join("secrets.toml");
        let credentials = CredentialStore::load(secrets_path).unwrap_or_else(|e| {
            warn!("Could not load saved keys: {:#}", e);
            CredentialStore::in_memory(Credentials::default())
        });

        let orchestrator = build_orchestrator(&config, &credentials);
        let history_items = orchestrator.recent_queries();
        info!("Ready with model {}", orchestrator.model());

        let input_id = Id::unique();

        let app = App {
            orchestrator,
            credentials,
            search_provider: config.search.provider,
            api_key_input: String::new(),
            search_key_input: String::new(),
            pending_drops: Vec::new(),
            history_items,
            toasts: Vec::new(),
            loading_frame: 0,
            input_id: input_id.clone(),
        };

        (app, text_input::focus(input_id))
    }

    fn update(&mut self, message: Message) -> Task<Message> {
        let task = match message {
            Message::InputChanged(value) => {
                self.orchestrator.set_input(value);
                Task::none()
            }
            Message::Submit => {
                let request = self.orchestrator.begin_submit();
                self.dispatch(request)
            }
            Message::Suggestion(question) => {
                let request = self.orchestrator.begin_submit_text(question.to_string());
                self.dispatch(request)
            }
            Message::Replied(outcome) => {
                self.orchestrator.finish(outcome);
                self.history_items = self.orchestrator.recent_queries();
                Task::none()
            }
            Message::HistorySelected(query) => {
                if !self.orchestrator.is_loading() {
                    self.orchestrator.set_input(query);
                }
                text_input::focus(self.input_id.clone())
            }
            Message::ClearHistory => {
                if self.orchestrator.clear_history() {
                    self.history_items = self.orchestrator.recent_queries();
                }
                Task::none()
            }
            Message::ToggleWebSearch(enabled) => {
                self.orchestrator.set_web_search(enabled);
                Task::none()
            }
            Message::ModelSelected(choice) => {
                self.orchestrator.set_model(choice.id);
                Task::none()
            }
            Message::ApiKeyChanged(value) => {
                self.api_key_input = value;
                Task::none()
            }
            Message::SearchKeyChanged(value) => {
                self.search_key_input = value;
                Task::none()
            }
            Message::SaveApiKey(key) => {
                let value = match key {
                    CredentialKey::Gemini => std::mem::take(&mut self.api_key_input),
                    CredentialKey::Search => std::mem::take(&mut self.search_key_input),
                };
                match self.credentials.save(key, &value) {
                    Ok(()) => self.orchestrator.notify(Notice::info("Success", "API key saved successfully")),
                    Err(e) => self.orchestrator.notify(Notice {
                        title: "Error".to_string(),
                        description: e.to_string(),
                        severity: Severity::Error,
                    }),
                }
                Task::none()
            }
            Message::FileDropped(path) => {
                // Multi-file drops arrive as one event per file.
                self.pending_drops.push(path);
                if self.pending_drops.len() == 1 {
                    Task::future(async {
                        tokio::time::sleep(DROP_SETTLE).await;
                        Message::DropsSettled
                    })
                } else {
                    Task::none()
                }
            }
            Message::DropsSettled => {
                let files: Vec<FileInput> = std::mem::take(&mut self.pending_drops)
                    .iter()
                    .filter_map(|path| match FileInput::from_path(path) {
                        Ok(file) => Some(file),
                        Err(e) => {
                            warn!("Skipping dropped file: {:#}", e);
                            None
                        }
                    })
                    .collect();

                match self.orchestrator.begin_files(files) {
                    Some(accepted) => {
                        progress::clear();
                        Task::future(async move {
                            Message::FilesNormalized(normalize::normalize_all(&accepted).await)
                        })
                    }
                    None => Task::none(),
                }
            }
            Message::FilesNormalized(outcome) => {
                let request = self.orchestrator.files_ready(outcome);
                self.dispatch(request)
            }
            Message::React(id, reaction) => {
                self.orchestrator.react(id, reaction);
                Task::none()
            }
            Message::CopyOutput => {
                match self.orchestrator.conversation().last_assistant() {
                    Some(reply) => clipboard::write(reply.content.clone()),
                    None => Task::none(),
                }
            }
            Message::Tick => {
                if self.orchestrator.is_loading() {
                    self.loading_frame = (self.loading_frame + 1) % 80;
                }
                let now = Instant::now();
                self.toasts.retain(|(shown, _)| now.duration_since(*shown) < NOTICE_TTL);
                Task::none()
            }
            Message::Exit => {
                return iced::exit();
            }
        };

        let now = Instant::now();
        self.toasts.extend(self.orchestrator.take_notices().into_iter().map(|n| (now, n)));
        task
    }

    /// Runs an accepted request off the UI thread.
    fn dispatch(&mut self, request: Option<orchestrator::ChatRequest>) -> Task<Message> {
        let Some(request) = request else {
            return Task::none();
        };
        self.history_items = self.orchestrator.recent_queries();
        self.loading_frame = 0;
        progress::clear();

        let pipeline = self.orchestrator.pipeline();
        Task::future(async move { Message::Replied(pipeline.respond(&request).await) })
    }

    fn subscription(&self) -> Subscription<Message> {
        let timer = if self.orchestrator.is_loading() {
            time::every(Duration::from_millis(80)).map(|_| Message::Tick)
        } else if !self.toasts.is_empty() {
            time::every(Duration::from_millis(500)).map(|_| Message::Tick)
        } else {
            Subscription::none()
        };

        let events = event::listen_with(|event, _status, _id| match event {
            IcedEvent::Keyboard(keyboard::Event::KeyPressed {
                key: Key::Named(keyboard::key::Named::Escape),
                ..
            }) => Some(Message::Exit),
            IcedEvent::Window(window::Event::FileDropped(path)) => Some(Message::FileDropped(path)),
            _ => None,
        });

        Subscription::batch([timer, events])
    }

    fn view(&self) -> Element<Message> {
        let input = text_input("Type your message, or drop a file...", self.orchestrator.input())
            .on_input(Message::InputChanged)
            .on_submit(Message::Submit)
            .padding(15)
            .size(18)
            .id(self.input_id.clone());

        let selected = model_choices().into_iter().find(|c| c.id == self.orchestrator.model());
        let controls = row![
            checkbox("Web search", self.orchestrator.web_search()).on_toggle(Message::ToggleWebSearch),
            pick_list(model_choices(), selected, Message::ModelSelected).placeholder(self.orchestrator.model()),
            button(text("[Copy]").size(14)).on_press(Message::CopyOutput).padding(6),
        ]
        .spacing(15)
        .align_y(alignment::Vertical::Center);

        let transcript: Element<Message> = if self.orchestrator.conversation().is_empty() {
            self.suggestions()
        } else {
            scrollable(
                Column::with_children(
                    self.orchestrator.conversation().messages().iter().map(|m| self.render_message(m)),
                )
                .spacing(14)
                .padding(15)
                .width(Length::Fill),
            )
            .height(Length::Fill)
            .into()
        };

        let mut main = column![self.settings(), controls, transcript].spacing(10);
        if self.orchestrator.is_loading() {
            main = main.push(self.spinner());
        }
        main = main.push(input);

        let content = row![
            container(main).width(Length::FillPortion(3)),
            container(self.sidebar()).width(Length::FillPortion(1)),
        ]
        .spacing(10);

        let mut page = column![content].padding(10);
        for (_, notice) in &self.toasts {
            page = page.push(render_notice(notice));
        }

        container(page)
            .width(Length::Fill)
            .height(Length::Fill)
            .into()
    }

    fn settings(&self) -> Element<Message> {
        let mut settings = column![row![
            text_input("Enter your Gemini API key", &self.api_key_input)
                .on_input(Message::ApiKeyChanged)
                .on_submit(Message::SaveApiKey(CredentialKey::Gemini))
                .secure(true)
                .padding(8),
            button(text("Save")).on_press(Message::SaveApiKey(CredentialKey::Gemini)),
        ]
        .spacing(8)]
        .spacing(6);

        if self.search_provider == SearchProviderKind::Google {
            settings = settings.push(
                row![
                    text_input("Enter your search API key", &self.search_key_input)
                        .on_input(Message::SearchKeyChanged)
                        .on_submit(Message::SaveApiKey(CredentialKey::Search))
                        .secure(true)
                        .padding(8),
                    button(text("Save")).on_press(Message::SaveApiKey(CredentialKey::Search)),
                ]
                .spacing(8),
            );
        }

        if !self.credentials.has(CredentialKey::Gemini) {
            settings = settings.push(text("No Gemini API key saved yet.").size(13));
        }
        settings.into()
    }

    fn suggestions(&self) -> Element<Message> {
        let cards = prompt::SUGGESTED_QUESTIONS.iter().map(|s| {
            button(column![text(s.title).size(16).font(BOLD), text(s.description).size(13)].spacing(4))
                .on_press(Message::Suggestion(s.question))
                .padding(12)
                .width(Length::Fill)
                .into()
        });

        container(Column::with_children(cards).spacing(10).max_width(600.0))
            .width(Length::Fill)
            .height(Length::Fill)
            .align_x(alignment::Horizontal::Center)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn spinner(&self) -> Element<Message> {
        let frames = ["⠋", "⠙", "⠹", "⠸", "⠼", "⠴", "⠦", "⠧", "⠇", "⠏"];
        let status = progress::latest()
            .map(|entry| format!("{}{}", entry.kind.tag(), entry.text))
            .unwrap_or_else(|| match self.orchestrator.phase() {
                Phase::Extracting => "Processing files...".to_string(),
                _ => "Thinking...".to_string(),
            });

        row![text(frames[self.loading_frame % frames.len()]).size(20), text(status).size(14)]
            .spacing(10)
            .align_y(alignment::Vertical::Center)
            .into()
    }

    fn sidebar(&self) -> Element<Message> {
        let entries = self.history_items.iter().map(|entry| {
            let label: String = entry.query.chars().take(60).collect();
            let when = entry.created_at.with_timezone(&chrono::Local).format("%b %d %H:%M");
            button(column![text(when.to_string()).size(11), text(label).size(13)].spacing(2))
                .on_press(Message::HistorySelected(entry.query.clone()))
                .width(Length::Fill)
                .into()
        });

        column![
            text("History").size(16).font(BOLD),
            scrollable(Column::with_children(entries).spacing(4)).height(Length::Fill),
            button(text("Clear History").size(13)).on_press(Message::ClearHistory),
        ]
        .spacing(8)
        .into()
    }

    fn render_message(&self, message: &conversation::Message) -> Element<Message> {
        match message.role {
            Role::User => container(text(message.content.clone()).size(15))
                .padding(Padding::from([6, 10]))
                .width(Length::Fill)
                .align_x(alignment::Horizontal::Right)
                .into(),
            Role::Assistant => {
                let mut body = Column::with_children(format::format(&message.content).iter().map(render_block))
                    .spacing(8);

                if let Some(url) = &message.image_url {
                    body = body.push(text(format!("Image: {}", url)).size(12));
                }
                for url in &message.additional_images {
                    body = body.push(text(format!("Image: {}", url)).size(12));
                }
                if !message.sources.is_empty() {
                    body = body.push(text("Sources").size(13).font(BOLD));
                    for (i, source) in message.sources.iter().enumerate() {
                        body = body.push(text(format!("{}. {} ({})", i + 1, source.title, source.link)).size(12));
                    }
                }

                if !message.is_error() {
                    let counts = self.orchestrator.reactions(message.id);
                    body = body.push(
                        row![
                            button(text(format!("[+ {}]", counts.likes)).size(12))
                                .on_press(Message::React(message.id, Reaction::Like)),
                            button(text(format!("[- {}]", counts.dislikes)).size(12))
                                .on_press(Message::React(message.id, Reaction::Dislike)),
                        ]
                        .spacing(6),
                    );
                }

                container(body).padding(10).width(Length::Fill).into()
            }
        }
    }

    fn theme(&self) -> Theme {
        Theme::TokyoNight
    }
}

fn render_block(block: &Block) -> Element<'static, Message> {
    match block {
        Block::Heading(title) => text(title.clone()).size(18).font(BOLD).into(),
        Block::Subheading(title) => text(title.clone()).size(16).font(BOLD).into(),
        Block::SubheadingList { title, items } => {
            let mut list = column![text(title.clone()).size(16).font(BOLD)].spacing(4);
            for item in items {
                list = list.push(render_bullet(item));
            }
            list.into()
        }
        Block::BulletList(items) => Column::with_children(items.iter().map(render_bullet)).spacing(4).into(),
        Block::Paragraph(line) => render_line(line),
    }
}

fn render_bullet(line: &format::Line) -> Element<'static, Message> {
    row![text(format::BULLET).size(15), render_line(line)].into()
}

fn render_line(line: &format::Line) -> Element<'static, Message> {
    let spans: Vec<Span<'static, Message, Font>> = line
        .iter()
        .map(|s| match s {
            format::Span::Text(t) => span(t.clone()),
            format::Span::Bold(t) => span(t.clone()).font(BOLD),
            format::Span::Underline(t) => span(t.clone()).font(UNDERLINE),
        })
        .collect();
    rich_text(spans).size(15).into()
}

fn render_notice(notice: &Notice) -> Element<'static, Message> {
    let marker = match notice.severity {
        Severity::Info => "[i]",
        Severity::Error => "[!]",
    };
    container(
        column![
            text(format!("{} {}", marker, notice.title)).size(14).font(BOLD),
            text(notice.description.clone()).size(13),
        ]
        .spacing(2),
    )
    .padding(8)
    .width(Length::Fill)
    .into()
}
