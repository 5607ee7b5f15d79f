mod controls;
mod history_logger;
mod settings;

use anyhow::Result;
use controls::{ControlEvent, ControlsState};
use crossterm::{
    event::{self, DisableMouseCapture, EnableMouseCapture, Event, KeyCode, KeyEventKind},
    execute,
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
};
use history_logger::{EntryKind, HistoryLogger};
use mentor_core::{
    prompt::render_question, CoordinatorConfig, GenerateError, InferenceEngine, LocalEngine,
    SessionState, StreamingCoordinator,
};
use mentor_shared::{ModelRecord, UsageStats};
use ratatui::{
    backend::{Backend, CrosstermBackend},
    layout::{Constraint, Direction, Layout},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, List, ListItem, ListState, Paragraph, Wrap},
    Frame, Terminal,
};
use settings::Settings;
use std::io;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{error, info};

/// Terminal events produced by an in-flight generation.
enum StreamEvent {
    Update(String),
    Finished {
        text: String,
        usage: Option<UsageStats>,
    },
    Failed(GenerateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Focus {
    Code,
    ErrorText,
    SystemPrompt,
    Template,
}

impl Focus {
    fn next(self) -> Self {
        match self {
            Focus::Code => Focus::ErrorText,
            Focus::ErrorText => Focus::SystemPrompt,
            Focus::SystemPrompt => Focus::Template,
            Focus::Template => Focus::Code,
        }
    }
}

struct App {
    focus: Focus,
    code: String,
    error_text: String,
    system_prompt: String,
    question_template: String,
    models: Vec<String>,
    selected_model: usize,
    loaded_model: Option<String>,
    controls: ControlsState,
    /// Streamed or final response text; `None` keeps the panel hidden.
    output: Option<String>,
    stats_line: Option<String>,
    status: String,
    session: SessionState,
    settings_path: PathBuf,
    settings: Settings,
    logger: HistoryLogger,
}

impl App {
    fn new(settings: Settings, settings_path: PathBuf, models: Vec<String>) -> Self {
        let logger = HistoryLogger::default();
        if let Some(path) = logger.path() {
            info!("hint history at {:?}", path);
        }

        Self {
            focus: Focus::Code,
            code: String::new(),
            error_text: String::new(),
            system_prompt: settings.system_prompt.clone(),
            question_template: settings.question_template.clone(),
            models,
            selected_model: 0,
            loaded_model: None,
            controls: ControlsState::default(),
            output: None,
            stats_line: None,
            status: "Select a model and press Ctrl-L to load it".to_string(),
            session: SessionState::new(settings.system_prompt.clone()),
            settings_path,
            settings,
            logger,
        }
    }

    fn focused_buffer(&mut self) -> &mut String {
        match self.focus {
            Focus::Code => &mut self.code,
            Focus::ErrorText => &mut self.error_text,
            Focus::SystemPrompt => &mut self.system_prompt,
            Focus::Template => &mut self.question_template,
        }
    }

    fn insert_char(&mut self, c: char) {
        self.focused_buffer().push(c);
        self.after_edit();
    }

    fn delete_char(&mut self) {
        self.focused_buffer().pop();
        self.after_edit();
    }

    fn after_edit(&mut self) {
        match self.focus {
            Focus::ErrorText => {
                let present = !self.error_text.trim().is_empty();
                self.controls.apply(ControlEvent::ErrorPresence(present));
            }
            Focus::SystemPrompt | Focus::Template => self.persist_settings(),
            Focus::Code => {}
        }
    }

    fn persist_settings(&mut self) {
        self.settings.system_prompt = self.system_prompt.clone();
        self.settings.question_template = self.question_template.clone();
        if let Err(e) = self.settings.save(&self.settings_path) {
            error!("failed to save settings: {}", e);
        }
    }

    fn select_previous_model(&mut self) {
        if self.selected_model > 0 {
            self.selected_model -= 1;
        }
    }

    fn select_next_model(&mut self) {
        if self.selected_model + 1 < self.models.len() {
            self.selected_model += 1;
        }
    }

    fn clear_memory(&mut self) {
        self.session.reset();
        self.output = None;
        self.stats_line = None;
        self.status = "Memory cleared - new session started".to_string();
        info!("memory cleared");
    }

    fn apply_stream_event(&mut self, event: StreamEvent) {
        match event {
            StreamEvent::Update(partial) => {
                self.output = Some(format!("AI Response:\n{}", partial));
            }
            StreamEvent::Finished { text, usage } => {
                self.session.record_completion(text.clone(), usage.clone());
                self.output = Some(format!("AI Response:\n{}", text));
                self.stats_line = usage.as_ref().map(UsageStats::summary);
                self.status = "Done".to_string();
                self.controls.apply(ControlEvent::GenerationEnded);
                if let Err(e) = self.logger.log(EntryKind::Hint { text, usage }) {
                    error!("failed to log hint: {}", e);
                }
            }
            StreamEvent::Failed(err) => {
                self.controls.apply(ControlEvent::GenerationEnded);
                if err.is_interruption() {
                    self.output = Some("Generation stopped by user.".to_string());
                    self.status = "Stopped".to_string();
                    if let Err(e) = self.logger.log(EntryKind::Stopped) {
                        error!("failed to log stop: {}", e);
                    }
                } else {
                    error!("generation failed: {}", err);
                    self.output = Some(format!("Error: {}", err));
                    self.status = "Failed".to_string();
                    if let Err(e) = self.logger.log(EntryKind::Failure {
                        detail: err.to_string(),
                    }) {
                        error!("failed to log failure: {}", e);
                    }
                }
            }
        }
    }
}

/// Models the engine serves out of the box. Custom records from the
/// settings file are registered on top of these at startup.
fn builtin_catalog() -> Vec<ModelRecord> {
    [
        "SocraticAI_1.5B-q4f16_1-MLC",
        "Qwen2.5-1.5B-Instruct-q4f16_1-MLC",
        "Llama-3.2-3B-Instruct-q4f16_1-MLC",
    ]
    .into_iter()
    .map(|id| ModelRecord {
        model_url: format!("https://huggingface.co/mlc-ai/{id}"),
        model_id: id.to_string(),
        model_lib_url: None,
        context_window_size: None,
    })
    .collect()
}

#[tokio::main]
async fn main() -> Result<()> {
    // Log to a file instead of the terminal to avoid corrupting the TUI.
    if let Ok(file) = std::fs::File::create("mentor-cli.log") {
        tracing_subscriber::fmt()
            .with_writer(file)
            .with_ansi(false)
            .init();
    }
    dotenv::dotenv().ok();

    let base_url =
        std::env::var("MENTOR_ENGINE_URL").unwrap_or_else(|_| "http://127.0.0.1:8000/v1".into());
    let api_key = std::env::var("MENTOR_ENGINE_API_KEY").unwrap_or_else(|_| "local".into());

    let settings_path = Settings::default_path();
    let settings = Settings::load(&settings_path);

    let engine: Arc<dyn InferenceEngine> = Arc::new(LocalEngine::new(
        base_url,
        api_key,
        builtin_catalog(),
    ));
    for record in &settings.custom_models {
        engine.register_model(record.clone());
    }
    let models = engine.available_models();

    let coordinator = Arc::new(StreamingCoordinator::new(
        engine,
        CoordinatorConfig::default(),
    ));

    enable_raw_mode()?;
    let mut stdout = io::stdout();
    execute!(stdout, EnterAlternateScreen, EnableMouseCapture)?;
    let backend = CrosstermBackend::new(stdout);
    let mut terminal = Terminal::new(backend)?;

    let mut app = App::new(settings, settings_path, models);

    let (ui_tx, mut ui_rx) = mpsc::unbounded_channel();
    std::thread::spawn(move || {
        while let Ok(event) = event::read() {
            if ui_tx.send(event).is_err() {
                break;
            }
        }
    });

    let (stream_tx, mut stream_rx) = mpsc::unbounded_channel();

    let res = run_app(
        &mut terminal,
        &mut app,
        coordinator,
        stream_tx,
        &mut stream_rx,
        &mut ui_rx,
    )
    .await;

    disable_raw_mode()?;
    execute!(
        terminal.backend_mut(),
        LeaveAlternateScreen,
        DisableMouseCapture
    )?;
    terminal.show_cursor()?;

    if let Err(err) = res {
        println!("{err:?}");
    }

    Ok(())
}

async fn run_app<B: Backend>(
    terminal: &mut Terminal<B>,
    app: &mut App,
    coordinator: Arc<StreamingCoordinator>,
    stream_tx: mpsc::UnboundedSender<StreamEvent>,
    stream_rx: &mut mpsc::UnboundedReceiver<StreamEvent>,
    ui_rx: &mut mpsc::UnboundedReceiver<Event>,
) -> Result<()> {
    loop {
        terminal.draw(|f| ui(f, app))?;

        tokio::select! {
            Some(event) = ui_rx.recv() => {
                if let Event::Key(key) = event {
                    if key.kind != KeyEventKind::Press {
                        continue;
                    }
                    match key.code {
                        KeyCode::Char('q') | KeyCode::Char('c')
                            if key.modifiers.contains(event::KeyModifiers::CONTROL) =>
                        {
                            return Ok(())
                        }
                        KeyCode::Char('l')
                            if key.modifiers.contains(event::KeyModifiers::CONTROL) =>
                        {
                            load_selected_model(app, &coordinator).await;
                        }
                        KeyCode::Char('r')
                            if key.modifiers.contains(event::KeyModifiers::CONTROL) =>
                        {
                            if app.controls.clear_enabled() {
                                app.clear_memory();
                            }
                        }
                        KeyCode::Char(c) => app.insert_char(c),
                        KeyCode::Backspace => app.delete_char(),
                        KeyCode::Tab => app.focus = app.focus.next(),
                        KeyCode::Up => app.select_previous_model(),
                        KeyCode::Down => app.select_next_model(),
                        KeyCode::Enter => ask(app, &coordinator, &stream_tx),
                        KeyCode::Esc => {
                            if app.controls.stop_enabled() {
                                coordinator.cancel().await;
                                app.status = "Stopping...".to_string();
                            }
                        }
                        _ => {}
                    }
                }
            }
            Some(stream_event) = stream_rx.recv() => {
                app.apply_stream_event(stream_event);
            }
        }
    }
}

async fn load_selected_model(app: &mut App, coordinator: &Arc<StreamingCoordinator>) {
    let Some(model_id) = app.models.get(app.selected_model).cloned() else {
        return;
    };
    app.status = format!("Loading {model_id}...");
    match coordinator.engine().load_model(&model_id).await {
        Ok(()) => {
            app.loaded_model = Some(model_id.clone());
            app.controls.apply(ControlEvent::ModelLoaded);
            app.status = format!("Model {model_id} ready");
        }
        Err(e) => {
            error!("failed to load model {}: {}", model_id, e);
            app.status = format!("Failed to load {model_id}: {e}");
        }
    }
}

fn ask(
    app: &mut App,
    coordinator: &Arc<StreamingCoordinator>,
    stream_tx: &mpsc::UnboundedSender<StreamEvent>,
) {
    if !app.controls.ask_enabled() {
        app.status = if !app.controls.model_loaded() {
            "Select and load a model first".to_string()
        } else if app.controls.is_generating() {
            "A generation is already in progress".to_string()
        } else {
            "Enter the error you want a hint for".to_string()
        };
        return;
    }

    let question = render_question(&app.question_template, &app.code, &app.error_text);
    let session = app.session.build_session(&app.system_prompt, &question);

    if let Err(e) = app.logger.log(EntryKind::Question {
        system_prompt: session[0].content.clone(),
        question: question.clone(),
        model: app.loaded_model.clone().unwrap_or_default(),
    }) {
        error!("failed to log question: {}", e);
    }

    app.output = Some("AI is thinking...".to_string());
    app.stats_line = None;
    app.status = "Generating...".to_string();
    app.controls.apply(ControlEvent::GenerationStarted);

    let coordinator = coordinator.clone();
    let update_tx = stream_tx.clone();
    let finish_tx = stream_tx.clone();
    let error_tx = stream_tx.clone();
    tokio::spawn(async move {
        coordinator
            .generate(
                session,
                move |partial| {
                    let _ = update_tx.send(StreamEvent::Update(partial.to_string()));
                },
                move |text, usage| {
                    let _ = finish_tx.send(StreamEvent::Finished { text, usage });
                },
                move |err| {
                    let _ = error_tx.send(StreamEvent::Failed(err));
                },
            )
            .await;
    });
}

fn ui(f: &mut Frame, app: &App) {
    let outer = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Length(3),
            Constraint::Min(10),
            Constraint::Length(1),
        ])
        .split(f.area());

    let status = Paragraph::new(app.status.as_str())
        .block(Block::default().borders(Borders::ALL).title("Status"));
    f.render_widget(status, outer[0]);

    let columns = Layout::default()
        .direction(Direction::Horizontal)
        .constraints([Constraint::Percentage(30), Constraint::Percentage(70)])
        .split(outer[1]);

    render_model_list(f, app, columns[0]);
    render_workspace(f, app, columns[1]);

    let help = Line::from(vec![Span::styled(
        "Tab focus | Up/Down model | Ctrl-L load | Enter ask | Esc stop | Ctrl-R clear | Ctrl-Q quit",
        Style::default().fg(Color::DarkGray),
    )]);
    f.render_widget(Paragraph::new(help), outer[2]);
}

fn render_model_list(f: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let items: Vec<ListItem> = app
        .models
        .iter()
        .map(|id| {
            let loaded = app.loaded_model.as_deref() == Some(id.as_str());
            let label = if loaded {
                format!("* {id}")
            } else {
                format!("  {id}")
            };
            let style = if loaded {
                Style::default().fg(Color::Green)
            } else {
                Style::default()
            };
            ListItem::new(label).style(style)
        })
        .collect();

    let list = List::new(items)
        .block(Block::default().borders(Borders::ALL).title("Models"))
        .highlight_style(Style::default().add_modifier(Modifier::REVERSED));

    let mut state = ListState::default();
    state.select(Some(app.selected_model));
    f.render_stateful_widget(list, area, &mut state);
}

fn render_workspace(f: &mut Frame, app: &App, area: ratatui::layout::Rect) {
    let rows = Layout::default()
        .direction(Direction::Vertical)
        .constraints([
            Constraint::Min(4),
            Constraint::Length(4),
            Constraint::Length(3),
            Constraint::Length(3),
            Constraint::Min(6),
            Constraint::Length(3),
        ])
        .split(area);

    render_input_box(f, app, rows[0], Focus::Code, "Code", &app.code);
    render_input_box(f, app, rows[1], Focus::ErrorText, "Error", &app.error_text);
    render_input_box(
        f,
        app,
        rows[2],
        Focus::SystemPrompt,
        "System prompt",
        &app.system_prompt,
    );
    render_input_box(
        f,
        app,
        rows[3],
        Focus::Template,
        "Question template",
        &app.question_template,
    );

    let hint_title = if app.controls.ask_enabled() {
        "Hint (Enter to ask)"
    } else if app.controls.stop_enabled() {
        "Hint (Esc to stop)"
    } else {
        "Hint"
    };
    let hint = Paragraph::new(app.output.as_deref().unwrap_or(""))
        .wrap(Wrap { trim: false })
        .block(Block::default().borders(Borders::ALL).title(hint_title));
    f.render_widget(hint, rows[4]);

    let stats = Paragraph::new(app.stats_line.as_deref().unwrap_or(""))
        .block(Block::default().borders(Borders::ALL).title("Usage"));
    f.render_widget(stats, rows[5]);
}

fn render_input_box(
    f: &mut Frame,
    app: &App,
    area: ratatui::layout::Rect,
    focus: Focus,
    title: &str,
    content: &str,
) {
    let border_style = if app.focus == focus {
        Style::default().fg(Color::Yellow)
    } else {
        Style::default()
    };
    let widget = Paragraph::new(content)
        .wrap(Wrap { trim: false })
        .block(
            Block::default()
                .borders(Borders::ALL)
                .border_style(border_style)
                .title(title),
        );
    f.render_widget(widget, area);
}
