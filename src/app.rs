use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use crossterm::event::{self, Event, KeyCode, KeyEvent, KeyEventKind};
use tokio::sync::mpsc::{self, UnboundedReceiver, UnboundedSender};
use tokio::task::JoinHandle;

use ratatui::Frame;
use ratatui::layout::{Alignment, Constraint, Direction, Layout, Rect};
use ratatui::style::{Color, Modifier, Style};
use ratatui::text::{Line, Span};
use ratatui::widgets::{
    Block, Borders, Cell, Clear, List, ListItem, ListState, Paragraph, Row, Table, TableState,
    Wrap,
};

use crate::api::{ApiService, CommentDraft};
use crate::config::AppConfig;
use crate::internal::error::ApiError;
use crate::internal::feed::{FeedPhase, FeedSync};
use crate::internal::models::{
    CommentNode, FeedPayload, Reaction, ReactionKind, SortField, SortKey, User,
};
use crate::internal::notification::{Notification, NotificationKind};
use crate::internal::push::{PushEvent, PushScope, PushSubscription};
use crate::internal::session::SessionStore;
use crate::internal::thread::ThreadLoader;
use crate::utils::datetime::relative_label;
use crate::utils::html::comment_body_text;

/// Application view modes.
#[derive(Debug, PartialEq, Clone, Copy)]
pub enum ViewMode {
    Feed,
    Thread,
}

#[derive(Debug, PartialEq, Clone, Copy)]
enum LoginField {
    Email,
    Password,
}

/// Modal input states layered over the current view.
#[derive(Debug, PartialEq, Clone)]
enum InputMode {
    Normal,
    Login {
        email: String,
        password: String,
        focus: LoginField,
    },
    Compose {
        text: String,
        parent: Option<String>,
    },
}

/// Actions/messages sent through the app action channel. Results of
/// background work carry the tag they were requested under so stale
/// completions can be recognized and dropped.
#[derive(Debug)]
pub enum Action {
    Quit,
    NavigateUp,
    NavigateDown,
    OpenSelected,
    Back,
    LoadFeed,
    FeedLoaded(u32, SortKey, FeedPayload),
    FeedFailed(u32, SortKey, String),
    LoadMore,
    SortBy(SortField),
    NextPage,
    PrevPage,
    OpenThread(String),
    ThreadLoaded(String, Box<CommentNode>),
    ThreadFailed(String, String),
    React(String, ReactionKind),
    ReactionConfirmed(String),
    ReactionFailed(String),
    Push(PushEvent),
    SubmitLogin(String, String),
    LoggedIn(User),
    LoginFailed(String),
    SubmitComment(CommentDraft),
    CommentPosted(Option<String>),
    PostFailed(String),
    SessionExpired,
    Logout,
}

/// Main application state: the feed synchronizer, the current thread
/// snapshot, and the channels everything flows through.
pub struct App {
    pub running: bool,
    view: ViewMode,
    input: InputMode,
    feed: FeedSync,
    feed_state: TableState,
    thread: Option<CommentNode>,
    thread_id: Option<String>,
    thread_loading: bool,
    thread_task: Option<JoinHandle<()>>,
    thread_state: ListState,
    api: Arc<ApiService>,
    loader: Arc<ThreadLoader>,
    user: Option<User>,
    notification: Option<Notification>,
    push_tx: UnboundedSender<String>,
    push: PushSubscription,
    #[allow(dead_code)]
    config: AppConfig,
    action_tx: UnboundedSender<Action>,
    action_rx: UnboundedReceiver<Action>,
}

impl App {
    pub fn new(config: AppConfig) -> Self {
        let session = SessionStore::load_or_create().unwrap_or_else(|err| {
            tracing::warn!(error = %err, "falling back to in-memory session store");
            SessionStore::in_memory()
        });
        Self::with_session(config, session)
    }

    pub fn with_session(config: AppConfig, session: SessionStore) -> Self {
        let (action_tx, action_rx) = mpsc::unbounded_channel();
        let api = Arc::new(ApiService::with_timeout(
            config.base_url.clone(),
            session.clone(),
            Duration::from_secs(config.request_timeout_secs),
        ));
        let loader = Arc::new(ThreadLoader::new(Arc::clone(&api)));
        let user = session.user();
        let feed = FeedSync::new(config.page_size, config.infinite_scroll);
        let (push_tx, push) = PushSubscription::attach(PushScope::Feed);

        Self {
            running: true,
            view: ViewMode::Feed,
            input: InputMode::Normal,
            feed,
            feed_state: TableState::default(),
            thread: None,
            thread_id: None,
            thread_loading: false,
            thread_task: None,
            thread_state: ListState::default(),
            api,
            loader,
            user,
            notification: None,
            push_tx,
            push,
            config,
            action_tx,
            action_rx,
        }
    }

    /// Hand frames from a push transport into the current subscription.
    /// The sender is replaced whenever the scope changes, so a transport
    /// should re-request it after navigation.
    pub fn push_frame_sender(&self) -> UnboundedSender<String> {
        self.push_tx.clone()
    }

    pub fn push_scope(&self) -> &PushScope {
        self.push.scope()
    }

    pub async fn run(&mut self, mut tui: crate::tui::Tui) -> Result<()> {
        let _ = self.action_tx.send(Action::LoadFeed);

        let mut event_interval = tokio::time::interval(Duration::from_millis(16));

        loop {
            tui.draw(|f| self.ui(f))?;

            tokio::select! {
                _ = event_interval.tick() => {
                    if event::poll(Duration::from_millis(0))?
                        && let Event::Key(key) = event::read()?
                        && key.kind == KeyEventKind::Press
                    {
                        self.handle_key_event(key);
                    }
                }
                Some(action) = self.action_rx.recv() => {
                    self.handle_action(action).await;
                }
                Some(push_event) = self.push.next_event() => {
                    let _ = self.action_tx.send(Action::Push(push_event));
                }
            }

            if let Some(notification) = &self.notification
                && notification.should_dismiss()
            {
                self.notification = None;
            }

            if !self.running {
                break;
            }
        }
        Ok(())
    }

    // ------------------------------------------------------------------
    // Input handling
    // ------------------------------------------------------------------

    fn handle_key_event(&mut self, key: KeyEvent) {
        match self.input {
            InputMode::Login { .. } => self.handle_login_input(key),
            InputMode::Compose { .. } => self.handle_compose_input(key),
            InputMode::Normal => self.handle_normal_input(key),
        }
    }

    fn handle_login_input(&mut self, key: KeyEvent) {
        let InputMode::Login {
            email,
            password,
            focus,
        } = &mut self.input
        else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.input = InputMode::Normal,
            KeyCode::Tab | KeyCode::Down | KeyCode::Up => {
                *focus = match focus {
                    LoginField::Email => LoginField::Password,
                    LoginField::Password => LoginField::Email,
                };
            }
            KeyCode::Enter => {
                let (email, password) = (email.clone(), password.clone());
                self.input = InputMode::Normal;
                let _ = self.action_tx.send(Action::SubmitLogin(email, password));
            }
            KeyCode::Backspace => {
                match focus {
                    LoginField::Email => email.pop(),
                    LoginField::Password => password.pop(),
                };
            }
            KeyCode::Char(c) => {
                match focus {
                    LoginField::Email => email.push(c),
                    LoginField::Password => password.push(c),
                };
            }
            _ => {}
        }
    }

    fn handle_compose_input(&mut self, key: KeyEvent) {
        let InputMode::Compose { text, parent } = &mut self.input else {
            return;
        };
        match key.code {
            KeyCode::Esc => self.input = InputMode::Normal,
            KeyCode::Enter => {
                if text.trim().is_empty() {
                    return;
                }
                let draft = CommentDraft {
                    text: text.trim().to_string(),
                    parent: parent.clone(),
                    guest: None,
                    attachments: Vec::new(),
                };
                self.input = InputMode::Normal;
                let _ = self.action_tx.send(Action::SubmitComment(draft));
            }
            KeyCode::Backspace => {
                text.pop();
            }
            KeyCode::Char(c) => text.push(c),
            _ => {}
        }
    }

    fn handle_normal_input(&mut self, key: KeyEvent) {
        match key.code {
            KeyCode::Esc | KeyCode::Char('q') => match self.view {
                ViewMode::Feed => {
                    let _ = self.action_tx.send(Action::Quit);
                }
                ViewMode::Thread => {
                    let _ = self.action_tx.send(Action::Back);
                }
            },
            KeyCode::Char('j') | KeyCode::Down => {
                let _ = self.action_tx.send(Action::NavigateDown);
            }
            KeyCode::Char('k') | KeyCode::Up => {
                let _ = self.action_tx.send(Action::NavigateUp);
            }
            KeyCode::Enter => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::OpenSelected);
                }
            }
            KeyCode::Char('d') => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::SortBy(SortField::Created));
                } else {
                    self.send_reaction(ReactionKind::Down);
                }
            }
            KeyCode::Char('u') => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::SortBy(SortField::Username));
                }
            }
            KeyCode::Char('e') => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::SortBy(SortField::Email));
                }
            }
            KeyCode::Char('n') | KeyCode::Right => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::NextPage);
                }
            }
            KeyCode::Char('p') | KeyCode::Left => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::PrevPage);
                }
            }
            KeyCode::Char('m') => {
                if self.view == ViewMode::Feed {
                    let _ = self.action_tx.send(Action::LoadMore);
                }
            }
            KeyCode::Char('+') => self.send_reaction(ReactionKind::Up),
            KeyCode::Char('-') => self.send_reaction(ReactionKind::Down),
            KeyCode::Char('r') => match self.view {
                ViewMode::Feed => {
                    let _ = self.action_tx.send(Action::LoadFeed);
                }
                ViewMode::Thread => self.open_reply_form(),
            },
            KeyCode::Char('c') => {
                if self.view == ViewMode::Feed {
                    self.open_compose_form(None);
                }
            }
            KeyCode::Char('i') => {
                if self.user.is_none() {
                    self.input = InputMode::Login {
                        email: String::new(),
                        password: String::new(),
                        focus: LoginField::Email,
                    };
                }
            }
            KeyCode::Char('o') => {
                if self.user.is_some() {
                    let _ = self.action_tx.send(Action::Logout);
                }
            }
            _ => {}
        }
    }

    fn send_reaction(&mut self, kind: ReactionKind) {
        if self.user.is_none() {
            self.notification = Some(Notification::warning("Sign in to react to comments"));
            return;
        }
        if let Some(id) = self.selected_comment_id() {
            let _ = self.action_tx.send(Action::React(id, kind));
        }
    }

    fn open_compose_form(&mut self, parent: Option<String>) {
        if self.user.is_none() {
            self.notification = Some(Notification::warning("Sign in to post comments"));
            return;
        }
        self.input = InputMode::Compose {
            text: String::new(),
            parent,
        };
    }

    fn open_reply_form(&mut self) {
        let Some(parent) = self.selected_comment_id() else {
            return;
        };
        self.open_compose_form(Some(parent));
    }

    fn selected_comment_id(&self) -> Option<String> {
        match self.view {
            ViewMode::Feed => {
                let index = self.feed_state.selected()?;
                self.feed
                    .comments()
                    .get(index)
                    .map(|comment| comment.id.clone())
            }
            ViewMode::Thread => {
                let thread = self.thread.as_ref()?;
                let rows = flatten_thread(thread);
                let index = self.thread_state.selected()?;
                rows.get(index).map(|row| row.node.id.clone())
            }
        }
    }

    // ------------------------------------------------------------------
    // Actions
    // ------------------------------------------------------------------

    async fn handle_action(&mut self, action: Action) {
        match action {
            Action::Quit => self.running = false,
            Action::NavigateUp => self.select_prev(),
            Action::NavigateDown => self.select_next(),
            Action::OpenSelected => {
                if let Some(id) = self.selected_comment_id() {
                    let _ = self.action_tx.send(Action::OpenThread(id));
                }
            }
            Action::Back => {
                self.view = ViewMode::Feed;
                self.thread = None;
                self.thread_id = None;
                self.thread_loading = false;
                self.thread_state = ListState::default();
                if let Some(task) = self.thread_task.take() {
                    task.abort();
                }
                self.resubscribe(PushScope::Feed);
            }
            Action::LoadFeed => {
                self.feed.begin_load();
                self.spawn_fetch_page(self.feed.page(), self.feed.sort());
            }
            Action::FeedLoaded(page, sort, payload) => {
                self.feed.page_loaded(page, sort, payload);
                if self.feed_state.selected().is_none() && !self.feed.comments().is_empty() {
                    self.feed_state.select(Some(0));
                }
                let len = self.feed.comments().len();
                if let Some(selected) = self.feed_state.selected()
                    && selected >= len
                {
                    self.feed_state
                        .select(if len == 0 { None } else { Some(len - 1) });
                }
            }
            Action::FeedFailed(page, sort, message) => {
                self.feed.load_failed(page, sort, message.clone());
                self.notification = Some(Notification::error(message));
            }
            Action::SortBy(field) => {
                self.feed.set_sort(field);
                let _ = self.action_tx.send(Action::LoadFeed);
            }
            Action::NextPage => {
                let next = self.feed.page().saturating_add(1);
                if self.feed.set_page(next) {
                    let _ = self.action_tx.send(Action::LoadFeed);
                }
            }
            Action::PrevPage => {
                let prev = self.feed.page().saturating_sub(1);
                if self.feed.set_page(prev) {
                    let _ = self.action_tx.send(Action::LoadFeed);
                }
            }
            Action::LoadMore => {
                if let Some((page, sort)) = self.feed.request_more() {
                    self.spawn_fetch_page(page, sort);
                }
            }
            Action::OpenThread(id) => {
                self.view = ViewMode::Thread;
                if self.thread_id.as_deref() != Some(id.as_str()) {
                    self.thread = None;
                    self.thread_state = ListState::default();
                }
                self.thread_id = Some(id.clone());
                // The push subscription follows the viewed thread; the feed
                // subscription is torn down until we navigate back.
                self.resubscribe(PushScope::Thread(id.clone()));
                self.reload_thread(id);
            }
            Action::ThreadLoaded(id, node) => {
                // A late result for a thread we no longer display must not
                // be applied.
                if self.thread_id.as_deref() != Some(id.as_str()) {
                    tracing::debug!(thread = %id, "discarding stale thread result");
                    return;
                }
                self.thread = Some(*node);
                self.thread_loading = false;
                if self.thread_state.selected().is_none() {
                    self.thread_state.select(Some(0));
                }
            }
            Action::ThreadFailed(id, message) => {
                if self.thread_id.as_deref() != Some(id.as_str()) {
                    return;
                }
                self.thread_loading = false;
                self.notification = Some(Notification::error(format!(
                    "Thread unavailable: {message}"
                )));
            }
            Action::React(id, kind) => {
                let api = Arc::clone(&self.api);
                let tx = self.action_tx.clone();
                tokio::spawn(async move {
                    let result = match kind {
                        ReactionKind::Up => api.like(&id).await,
                        ReactionKind::Down => api.unlike(&id).await,
                    };
                    match result {
                        Ok(()) => {
                            let _ = tx.send(Action::ReactionConfirmed(id));
                        }
                        Err(err) => {
                            if matches!(err, ApiError::AuthExpired) {
                                let _ = tx.send(Action::SessionExpired);
                            }
                            let _ = tx.send(Action::ReactionFailed(describe_error(&err)));
                        }
                    }
                });
            }
            Action::ReactionConfirmed(_) => {
                // Counts come from the server, never from local guesses:
                // re-fetch whatever the reaction touched.
                match self.view {
                    ViewMode::Thread => {
                        if let Some(id) = self.thread_id.clone() {
                            self.reload_thread(id);
                        }
                    }
                    ViewMode::Feed => {
                        let _ = self.action_tx.send(Action::LoadFeed);
                    }
                }
            }
            Action::ReactionFailed(message) => {
                self.notification = Some(Notification::error(message));
            }
            Action::Push(event) => self.apply_push(event),
            Action::SubmitLogin(email, password) => {
                let api = Arc::clone(&self.api);
                let tx = self.action_tx.clone();
                tokio::spawn(async move {
                    match api.login(&email, &password).await {
                        Ok(user) => {
                            let _ = tx.send(Action::LoggedIn(user));
                        }
                        Err(err) => {
                            let _ = tx.send(Action::LoginFailed(describe_error(&err)));
                        }
                    }
                });
            }
            Action::LoggedIn(user) => {
                self.notification =
                    Some(Notification::info(format!("Signed in as {}", user.username)));
                self.user = Some(user);
                // Reaction flags are per-user; refresh what is on screen.
                let _ = self.action_tx.send(Action::LoadFeed);
            }
            Action::LoginFailed(message) => {
                self.notification = Some(Notification::error(message));
            }
            Action::SubmitComment(draft) => {
                let api = Arc::clone(&self.api);
                let tx = self.action_tx.clone();
                tokio::spawn(async move {
                    let parent = draft.parent.clone();
                    match api.create_comment(&draft).await {
                        Ok(_) => {
                            let _ = tx.send(Action::CommentPosted(parent));
                        }
                        Err(err) => {
                            if matches!(err, ApiError::AuthExpired) {
                                let _ = tx.send(Action::SessionExpired);
                            }
                            let _ = tx.send(Action::PostFailed(describe_error(&err)));
                        }
                    }
                });
            }
            Action::CommentPosted(parent) => {
                self.notification = Some(Notification::info("Comment posted"));
                match parent {
                    Some(_) => {
                        if let Some(id) = self.thread_id.clone() {
                            self.reload_thread(id);
                        }
                    }
                    None => {
                        // Jump back to the newest-first front page where the
                        // new comment is visible.
                        self.feed.reset_to_newest();
                        let _ = self.action_tx.send(Action::LoadFeed);
                    }
                }
            }
            Action::PostFailed(message) => {
                self.notification = Some(Notification::error(message));
            }
            Action::SessionExpired => {
                self.user = None;
                self.notification =
                    Some(Notification::warning("Session expired — sign in again"));
            }
            Action::Logout => {
                self.api.logout();
                self.user = None;
                self.notification = Some(Notification::info("Signed out"));
                let _ = self.action_tx.send(Action::LoadFeed);
            }
        }
    }

    fn spawn_fetch_page(&self, page: u32, sort: SortKey) {
        let api = Arc::clone(&self.api);
        let tx = self.action_tx.clone();
        tokio::spawn(async move {
            match api.fetch_page(page, sort).await {
                Ok(payload) => {
                    let _ = tx.send(Action::FeedLoaded(page, sort, payload));
                }
                Err(err) => {
                    if matches!(err, ApiError::AuthExpired) {
                        let _ = tx.send(Action::SessionExpired);
                    }
                    let _ = tx.send(Action::FeedFailed(page, sort, describe_error(&err)));
                }
            }
        });
    }

    /// Kick off a (re)load of the given thread, aborting whatever load was
    /// still in flight. The previous snapshot stays visible while the new
    /// one is fetched.
    fn reload_thread(&mut self, id: String) {
        self.thread_loading = true;
        if let Some(task) = self.thread_task.take() {
            task.abort();
        }
        let loader = Arc::clone(&self.loader);
        let tx = self.action_tx.clone();
        let task = tokio::spawn(async move {
            match loader.load_thread(&id).await {
                Ok(node) => {
                    let _ = tx.send(Action::ThreadLoaded(id, Box::new(node)));
                }
                Err(err) => {
                    if matches!(err, ApiError::AuthExpired) {
                        let _ = tx.send(Action::SessionExpired);
                    }
                    let _ = tx.send(Action::ThreadFailed(id, describe_error(&err)));
                }
            }
        });
        self.thread_task = Some(task);
    }

    fn resubscribe(&mut self, scope: PushScope) {
        if self.push.scope() == &scope {
            return;
        }
        let (tx, sub) = PushSubscription::attach(scope);
        self.push_tx = tx;
        self.push = sub;
    }

    fn apply_push(&mut self, event: PushEvent) {
        match &event {
            PushEvent::CommentCreated(_) => {
                if self.feed.apply_push(&event) {
                    tracing::debug!("merged pushed comment into the feed");
                }
            }
            PushEvent::ReplyCreated(payload) => {
                let Some(id) = self.thread_id.clone() else {
                    return;
                };
                // Our own reply racing the push event: the reload triggered
                // by posting already covers it.
                if let Some(thread) = &self.thread
                    && thread.contains(&payload.id)
                {
                    return;
                }
                if self.view == ViewMode::Thread {
                    self.reload_thread(id);
                }
            }
        }
    }

    fn select_prev(&mut self) {
        match self.view {
            ViewMode::Feed => {
                let len = self.feed.comments().len();
                move_selection(&mut self.feed_state, len, -1);
            }
            ViewMode::Thread => {
                let len = self.thread_row_count();
                move_list_selection(&mut self.thread_state, len, -1);
            }
        }
    }

    fn select_next(&mut self) {
        match self.view {
            ViewMode::Feed => {
                let len = self.feed.comments().len();
                move_selection(&mut self.feed_state, len, 1);
            }
            ViewMode::Thread => {
                let len = self.thread_row_count();
                move_list_selection(&mut self.thread_state, len, 1);
            }
        }
    }

    fn thread_row_count(&self) -> usize {
        self.thread
            .as_ref()
            .map(|thread| flatten_thread(thread).len())
            .unwrap_or(0)
    }

    // ------------------------------------------------------------------
    // Rendering
    // ------------------------------------------------------------------

    fn ui(&mut self, f: &mut Frame) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .constraints([Constraint::Min(3), Constraint::Length(1)])
            .split(f.area());

        match self.view {
            ViewMode::Feed => self.render_feed(f, chunks[0]),
            ViewMode::Thread => self.render_thread(f, chunks[0]),
        }
        self.render_status(f, chunks[1]);

        match self.input.clone() {
            InputMode::Login {
                email,
                password,
                focus,
            } => self.render_login(f, &email, &password, focus),
            InputMode::Compose { text, parent } => self.render_compose(f, &text, parent.is_some()),
            InputMode::Normal => {}
        }
    }

    fn render_feed(&mut self, f: &mut Frame, area: Rect) {
        let sort = self.feed.sort();
        let header_label = |label: &str, field: SortField| {
            if sort.field == field {
                let arrow = match sort.order {
                    crate::internal::models::SortOrder::Desc => "↓",
                    crate::internal::models::SortOrder::Asc => "↑",
                };
                format!("{label} {arrow}")
            } else {
                label.to_string()
            }
        };

        let header = Row::new(vec![
            Cell::from(header_label("User", SortField::Username)),
            Cell::from(header_label("Email", SortField::Email)),
            Cell::from(header_label("Date", SortField::Created)),
            Cell::from("Comment"),
        ])
        .style(Style::default().add_modifier(Modifier::BOLD));

        let rows: Vec<Row> = self
            .feed
            .comments()
            .iter()
            .map(|comment| {
                let text = comment_body_text(&comment.text, 200)
                    .replace('\n', " ")
                    .trim()
                    .to_string();
                Row::new(vec![
                    Cell::from(comment.author_label.clone()),
                    Cell::from(comment.author_email.clone().unwrap_or_default()),
                    Cell::from(relative_label(&comment.created_at)),
                    Cell::from(text),
                ])
            })
            .collect();

        let loading = match self.feed.phase() {
            FeedPhase::Loading => " (loading…)",
            _ => "",
        };
        let title = format!(
            " Comments — {} total · page {}/{}{} ",
            self.feed.total(),
            self.feed.page(),
            self.feed.page_count(),
            loading
        );

        let table = Table::new(
            rows,
            [
                Constraint::Length(16),
                Constraint::Length(26),
                Constraint::Length(10),
                Constraint::Min(20),
            ],
        )
        .header(header)
        .block(Block::default().borders(Borders::ALL).title(title))
        .row_highlight_style(
            Style::default()
                .bg(Color::DarkGray)
                .add_modifier(Modifier::BOLD),
        );

        f.render_stateful_widget(table, area, &mut self.feed_state);
    }

    fn render_thread(&mut self, f: &mut Frame, area: Rect) {
        let width = area.width.saturating_sub(4).max(20) as usize;
        let title = match (&self.thread, self.thread_loading) {
            (Some(thread), false) => format!(" Thread by {} ", thread.author_label),
            (Some(thread), true) => format!(" Thread by {} (refreshing…) ", thread.author_label),
            (None, true) => " Thread (loading…) ".to_string(),
            (None, false) => " Thread ".to_string(),
        };

        let items: Vec<ListItem> = match &self.thread {
            Some(thread) => flatten_thread(thread)
                .into_iter()
                .map(|row| thread_list_item(&row, width))
                .collect(),
            None => Vec::new(),
        };

        let list = List::new(items)
            .block(Block::default().borders(Borders::ALL).title(title))
            .highlight_style(Style::default().bg(Color::DarkGray));

        f.render_stateful_widget(list, area, &mut self.thread_state);
    }

    fn render_status(&self, f: &mut Frame, area: Rect) {
        let line = if let Some(notification) = &self.notification {
            let style = match notification.kind {
                NotificationKind::Info => Style::default().fg(Color::Green),
                NotificationKind::Warning => Style::default().fg(Color::Yellow),
                NotificationKind::Error => Style::default().fg(Color::Red),
            };
            Line::from(Span::styled(notification.message.clone(), style))
        } else {
            let identity = match &self.user {
                Some(user) => format!("{} · o sign out", user.username),
                None => "guest · i sign in".to_string(),
            };
            let hints = match self.view {
                ViewMode::Feed => {
                    "q quit · j/k move · ⏎ open · d/u/e sort · n/p page · r refresh · +/- react · c comment"
                }
                ViewMode::Thread => "q back · j/k move · r reply · +/- react",
            };
            Line::from(Span::styled(
                format!(" {identity} │ {hints}"),
                Style::default().fg(Color::DarkGray),
            ))
        };
        f.render_widget(Paragraph::new(line), area);
    }

    fn render_login(&self, f: &mut Frame, email: &str, password: &str, focus: LoginField) {
        let area = centered_rect(50, 9, f.area());
        f.render_widget(Clear, area);
        let masked: String = "*".repeat(password.len());
        let marker = |field: LoginField| if focus == field { "> " } else { "  " };
        let lines = vec![
            Line::from(""),
            Line::from(format!("{}Email:    {}", marker(LoginField::Email), email)),
            Line::from(format!(
                "{}Password: {}",
                marker(LoginField::Password),
                masked
            )),
            Line::from(""),
            Line::from(Span::styled(
                "⏎ sign in · tab switch · esc cancel",
                Style::default().fg(Color::DarkGray),
            )),
        ];
        let form = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(" Sign in "))
            .alignment(Alignment::Left);
        f.render_widget(form, area);
    }

    fn render_compose(&self, f: &mut Frame, text: &str, is_reply: bool) {
        let area = centered_rect(60, 10, f.area());
        f.render_widget(Clear, area);
        let title = if is_reply { " Reply " } else { " New comment " };
        let mut lines: Vec<Line> = textwrap::wrap(text, area.width.saturating_sub(4) as usize)
            .into_iter()
            .map(|part| Line::from(part.into_owned()))
            .collect();
        if lines.is_empty() {
            lines.push(Line::from(""));
        }
        lines.push(Line::from(""));
        lines.push(Line::from(Span::styled(
            "⏎ send · esc cancel",
            Style::default().fg(Color::DarkGray),
        )));
        let form = Paragraph::new(lines)
            .block(Block::default().borders(Borders::ALL).title(title))
            .wrap(Wrap { trim: false });
        f.render_widget(form, area);
    }
}

struct ThreadRow<'a> {
    node: &'a CommentNode,
    depth: usize,
}

/// Depth-first flattening of a thread snapshot into display rows, iterative
/// so display depth is never bounded by the call stack.
fn flatten_thread(root: &CommentNode) -> Vec<ThreadRow<'_>> {
    let mut rows = Vec::new();
    let mut stack = vec![(root, 0usize)];
    while let Some((node, depth)) = stack.pop() {
        rows.push(ThreadRow { node, depth });
        for reply in node.replies.iter().rev() {
            stack.push((reply, depth + 1));
        }
    }
    rows
}

fn thread_list_item(row: &ThreadRow<'_>, width: usize) -> ListItem<'static> {
    let indent = "  ".repeat(row.depth);
    let reaction = match row.node.reaction {
        Reaction::Liked => " ▲",
        Reaction::Disliked => " ▼",
        Reaction::None => "",
    };
    let edited = if row.node.edited { " (edited)" } else { "" };
    let meta = format!(
        "{indent}{} · {} · {} likes{reaction}{edited}",
        row.node.author_label,
        relative_label(&row.node.created_at),
        row.node.like_count,
    );

    let mut lines = vec![Line::from(Span::styled(
        meta,
        Style::default().add_modifier(Modifier::BOLD),
    ))];

    let body_width = width.saturating_sub(indent.len()).max(20);
    let body = comment_body_text(&row.node.text, body_width);
    for body_line in body.lines() {
        lines.push(Line::from(format!("{indent}{body_line}")));
    }
    for attachment in &row.node.attachments {
        let kind = match attachment.kind {
            crate::internal::models::AttachmentKind::Image => "image",
            crate::internal::models::AttachmentKind::Document => "file",
        };
        let name = attachment
            .display_name
            .clone()
            .unwrap_or_else(|| attachment.uri.clone());
        lines.push(Line::from(Span::styled(
            format!("{indent}[{kind}] {name}"),
            Style::default().fg(Color::Cyan),
        )));
    }
    lines.push(Line::from(""));
    ListItem::new(lines)
}

fn move_selection(state: &mut TableState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1) as usize;
    state.select(Some(next));
}

fn move_list_selection(state: &mut ListState, len: usize, delta: isize) {
    if len == 0 {
        state.select(None);
        return;
    }
    let current = state.selected().unwrap_or(0) as isize;
    let next = (current + delta).clamp(0, len as isize - 1) as usize;
    state.select(Some(next));
}

fn centered_rect(width: u16, height: u16, area: Rect) -> Rect {
    let x = area.x + area.width.saturating_sub(width) / 2;
    let y = area.y + area.height.saturating_sub(height) / 2;
    Rect {
        x,
        y,
        width: width.min(area.width),
        height: height.min(area.height),
    }
}

fn describe_error(err: &ApiError) -> String {
    match err {
        ApiError::Validation(fields) => {
            let mut parts = Vec::new();
            for (field, messages) in fields {
                parts.push(format!("{field}: {}", messages.join(" ")));
            }
            parts.join("; ")
        }
        other => other.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::internal::models::CommentPayload;

    fn test_app() -> App {
        let config = AppConfig {
            base_url: "http://localhost:1/api/".to_string(),
            ..AppConfig::default()
        };
        App::with_session(config, SessionStore::in_memory())
    }

    fn node(id: &str) -> CommentNode {
        let payload: CommentPayload = serde_json::from_str(&format!(
            r#"{{"id": "{id}", "text": "t", "created": "2024-01-01T00:00:00Z"}}"#
        ))
        .expect("payload should parse");
        payload.normalize()
    }

    #[tokio::test]
    async fn stale_thread_results_are_discarded() {
        let mut app = test_app();
        app.view = ViewMode::Thread;
        app.thread_id = Some("current".to_string());

        app.handle_action(Action::ThreadLoaded(
            "abandoned".to_string(),
            Box::new(node("abandoned")),
        ))
        .await;
        assert!(app.thread.is_none());

        app.handle_action(Action::ThreadLoaded(
            "current".to_string(),
            Box::new(node("current")),
        ))
        .await;
        assert_eq!(app.thread.as_ref().map(|t| t.id.as_str()), Some("current"));
    }

    #[tokio::test]
    async fn push_events_flow_into_the_feed() {
        let mut app = test_app();
        let payload: CommentPayload = serde_json::from_str(
            r#"{"id": "p1", "text": "pushed", "created": "2024-01-01T00:00:00Z"}"#,
        )
        .unwrap();
        app.handle_action(Action::Push(PushEvent::CommentCreated(payload)))
            .await;
        assert_eq!(app.feed.total(), 1);
    }

    #[tokio::test]
    async fn session_expiry_drops_the_identity() {
        let mut app = test_app();
        app.user = Some(User {
            username: "alice".to_string(),
            email: "a@example.com".to_string(),
            avatar: None,
        });
        app.handle_action(Action::SessionExpired).await;
        assert!(app.user.is_none());
        assert!(app.notification.is_some());
    }

    #[tokio::test]
    async fn navigation_resubscribes_the_push_channel() {
        let mut app = test_app();
        assert_eq!(app.push_scope(), &PushScope::Feed);

        app.handle_action(Action::OpenThread("c-42".to_string())).await;
        assert_eq!(app.push_scope(), &PushScope::Thread("c-42".to_string()));
        assert!(app.thread_loading);

        app.handle_action(Action::Back).await;
        assert_eq!(app.push_scope(), &PushScope::Feed);
        assert!(app.thread_id.is_none());
    }

    #[test]
    fn flatten_preserves_sibling_order_and_depth() {
        let mut root = node("r");
        let mut a = node("a");
        a.replies = vec![node("a1")];
        root.replies = vec![a, node("b")];

        let rows = flatten_thread(&root);
        let ids: Vec<&str> = rows.iter().map(|row| row.node.id.as_str()).collect();
        assert_eq!(ids, vec!["r", "a", "a1", "b"]);
        assert_eq!(rows[2].depth, 2);
        assert_eq!(rows[3].depth, 1);
    }
}
