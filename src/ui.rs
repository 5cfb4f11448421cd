use crate::diary_entry::{parse_entry_date, DiaryEntry, EntryPatch, Mood};
use crate::entry_cache::EntryCache;
use crate::gateway::EntryGateway;
use chrono::NaiveDate;
use color_eyre::Result;
use crossterm::{
    event::{KeyCode, KeyEvent, KeyEventKind, KeyModifiers},
    terminal::{disable_raw_mode, enable_raw_mode, EnterAlternateScreen, LeaveAlternateScreen},
    ExecutableCommand,
};
use ratatui::{
    backend::CrosstermBackend,
    layout::{Alignment, Constraint, Direction, Layout, Rect},
    style::{Color, Modifier, Style},
    text::{Line, Span},
    widgets::{Block, Borders, Clear, Paragraph},
    Frame, Terminal,
};
use std::io::{stdout, Stdout};
use unicode_width::UnicodeWidthChar;

pub enum Action {
    PreviousDay,
    NextDay,
    Today,
    GoTo(NaiveDate),
    Edit(EntryPatch),
    Save,
    Reload,
    SignIn {
        email: String,
        password: String,
    },
    SignUp {
        full_name: String,
        email: String,
        password: String,
    },
    SignOut,
    Quit,
}

/// What the editor needs to know about the cache to draw a frame.
pub struct View<'a> {
    pub date: NaiveDate,
    pub entry: &'a DiaryEntry,
    pub resolving: bool,
    pub saving: bool,
    pub editable: bool,
    pub error: Option<&'a str>,
}

impl<'a> View<'a> {
    pub fn of<G: EntryGateway + 'static>(cache: &'a EntryCache<G>) -> Self {
        View {
            date: cache.selected_date(),
            entry: cache.current_entry(),
            resolving: cache.is_resolving(),
            saving: cache.is_saving(),
            editable: cache.is_editable(),
            error: cache.last_error(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Field {
    Title,
    Content,
    Mood,
}

impl Field {
    fn next(self) -> Self {
        match self {
            Field::Title => Field::Content,
            Field::Content => Field::Mood,
            Field::Mood => Field::Title,
        }
    }

    fn previous(self) -> Self {
        match self {
            Field::Title => Field::Mood,
            Field::Content => Field::Title,
            Field::Mood => Field::Content,
        }
    }
}

/// Cursor into a text field, counted in chars.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct TextCursor {
    pos: usize,
}

impl TextCursor {
    fn at_end(text: &str) -> Self {
        TextCursor {
            pos: text.chars().count(),
        }
    }

    /// Applies `key` to `text`. Returns the new text if it changed.
    pub fn edit(&mut self, text: &str, key: KeyCode, multiline: bool) -> Option<String> {
        let mut chars: Vec<char> = text.chars().collect();
        self.pos = self.pos.min(chars.len());

        match key {
            KeyCode::Char(c) => {
                chars.insert(self.pos, c);
                self.pos += 1;
            }
            KeyCode::Enter if multiline => {
                chars.insert(self.pos, '\n');
                self.pos += 1;
            }
            KeyCode::Backspace if self.pos > 0 => {
                chars.remove(self.pos - 1);
                self.pos -= 1;
            }
            KeyCode::Delete if self.pos < chars.len() => {
                chars.remove(self.pos);
            }
            KeyCode::Left => {
                self.pos = self.pos.saturating_sub(1);
                return None;
            }
            KeyCode::Right => {
                self.pos = (self.pos + 1).min(chars.len());
                return None;
            }
            KeyCode::Home => {
                self.pos = line_start(&chars, self.pos);
                return None;
            }
            KeyCode::End => {
                self.pos = line_end(&chars, self.pos);
                return None;
            }
            KeyCode::Up => {
                let current_line_start = line_start(&chars, self.pos);
                if current_line_start > 0 {
                    let prev_line_start = line_start(&chars, current_line_start - 1);
                    let prev_line_length = current_line_start - 1 - prev_line_start;
                    let current_column = self.pos - current_line_start;
                    self.pos = prev_line_start + current_column.min(prev_line_length);
                }
                return None;
            }
            KeyCode::Down => {
                let current_line_start = line_start(&chars, self.pos);
                let next_line_start = line_end(&chars, self.pos) + 1;
                if next_line_start <= chars.len() {
                    let next_line_length = line_end(&chars, next_line_start) - next_line_start;
                    let current_column = self.pos - current_line_start;
                    self.pos = next_line_start + current_column.min(next_line_length);
                }
                return None;
            }
            _ => return None,
        }

        Some(chars.into_iter().collect())
    }

    /// Row and display column of the cursor within `text`.
    pub fn position(&self, text: &str) -> (u16, u16) {
        let mut row = 0u16;
        let mut column = 0u16;
        for c in text.chars().take(self.pos) {
            if c == '\n' {
                row = row.saturating_add(1);
                column = 0;
            } else {
                column = column.saturating_add(c.width().unwrap_or(0) as u16);
            }
        }
        (row, column)
    }
}

fn line_start(chars: &[char], pos: usize) -> usize {
    chars[..pos]
        .iter()
        .rposition(|&c| c == '\n')
        .map(|i| i + 1)
        .unwrap_or(0)
}

fn line_end(chars: &[char], pos: usize) -> usize {
    chars[pos..]
        .iter()
        .position(|&c| c == '\n')
        .map(|i| pos + i)
        .unwrap_or(chars.len())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthMode {
    SignIn,
    SignUp,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum AuthField {
    FullName,
    Email,
    Password,
}

#[derive(Debug, Default, Clone, PartialEq, Eq)]
struct FormErrors {
    full_name: Option<&'static str>,
    email: Option<&'static str>,
    password: Option<&'static str>,
}

impl FormErrors {
    fn is_empty(&self) -> bool {
        self.full_name.is_none() && self.email.is_none() && self.password.is_none()
    }
}

enum Notice {
    Info(String),
    Error(String),
}

struct AuthForm {
    mode: AuthMode,
    full_name: String,
    email: String,
    password: String,
    focus: AuthField,
    errors: FormErrors,
    pending: bool,
    message: Option<Notice>,
}

impl AuthForm {
    fn new(mode: AuthMode) -> Self {
        AuthForm {
            mode,
            full_name: String::new(),
            email: String::new(),
            password: String::new(),
            focus: AuthForm::first_field(mode),
            errors: FormErrors::default(),
            pending: false,
            message: None,
        }
    }

    fn first_field(mode: AuthMode) -> AuthField {
        match mode {
            AuthMode::SignIn => AuthField::Email,
            AuthMode::SignUp => AuthField::FullName,
        }
    }

    fn fields(&self) -> &'static [AuthField] {
        match self.mode {
            AuthMode::SignIn => &[AuthField::Email, AuthField::Password],
            AuthMode::SignUp => &[AuthField::FullName, AuthField::Email, AuthField::Password],
        }
    }

    fn cycle_focus(&mut self, forward: bool) {
        let fields = self.fields();
        let index = fields.iter().position(|f| *f == self.focus).unwrap_or(0);
        let next = if forward {
            (index + 1) % fields.len()
        } else {
            (index + fields.len() - 1) % fields.len()
        };
        self.focus = fields[next];
    }

    fn focused_value(&mut self) -> &mut String {
        match self.focus {
            AuthField::FullName => &mut self.full_name,
            AuthField::Email => &mut self.email,
            AuthField::Password => &mut self.password,
        }
    }

    fn clear_focused_error(&mut self) {
        match self.focus {
            AuthField::FullName => self.errors.full_name = None,
            AuthField::Email => self.errors.email = None,
            AuthField::Password => self.errors.password = None,
        }
    }

    fn validate(&self) -> FormErrors {
        let mut errors = FormErrors::default();
        if self.mode == AuthMode::SignUp && self.full_name.trim().is_empty() {
            errors.full_name = Some("Please enter your name.");
        }
        if self.email.trim().is_empty() {
            errors.email = Some("Please enter a valid email.");
        }
        if self.password.trim().is_empty() {
            errors.password = Some("Password cannot be empty.");
        }
        errors
    }

    fn submit(&mut self) -> Option<Action> {
        let errors = self.validate();
        if !errors.is_empty() {
            self.errors = errors;
            return None;
        }
        self.pending = true;
        self.message = None;
        let email = self.email.trim().to_string();
        let password = self.password.clone();
        Some(match self.mode {
            AuthMode::SignIn => Action::SignIn { email, password },
            AuthMode::SignUp => Action::SignUp {
                full_name: self.full_name.trim().to_string(),
                email,
                password,
            },
        })
    }

    fn switch_mode(&mut self) {
        self.mode = match self.mode {
            AuthMode::SignIn => AuthMode::SignUp,
            AuthMode::SignUp => AuthMode::SignIn,
        };
        self.focus = AuthForm::first_field(self.mode);
        self.errors = FormErrors::default();
        self.message = None;
    }

    fn handle_key(&mut self, key: KeyEvent) -> Option<Action> {
        if self.pending {
            return None;
        }
        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        match key.code {
            KeyCode::Esc => Some(Action::Quit),
            KeyCode::Char('q') | KeyCode::Char('c') if ctrl => Some(Action::Quit),
            KeyCode::Char('n') if ctrl => {
                self.switch_mode();
                None
            }
            KeyCode::Tab | KeyCode::Down => {
                self.cycle_focus(true);
                None
            }
            KeyCode::BackTab | KeyCode::Up => {
                self.cycle_focus(false);
                None
            }
            KeyCode::Enter => self.submit(),
            KeyCode::Backspace => {
                self.focused_value().pop();
                self.clear_focused_error();
                None
            }
            KeyCode::Char(c) if !ctrl => {
                self.focused_value().push(c);
                self.clear_focused_error();
                None
            }
            _ => None,
        }
    }
}

struct GotoPrompt {
    input: String,
    error: Option<&'static str>,
}

enum Screen {
    Auth(AuthForm),
    Diary,
}

/// Screen state and key handling, independent of the terminal.
pub struct Editor {
    screen: Screen,
    focus: Field,
    title_cursor: TextCursor,
    content_cursor: TextCursor,
    // Day whose loaded text the cursors were placed in.
    cursor_date: Option<NaiveDate>,
    goto: Option<GotoPrompt>,
}

impl Editor {
    pub fn new(mode: AuthMode) -> Self {
        Editor {
            screen: Screen::Auth(AuthForm::new(mode)),
            focus: Field::Title,
            title_cursor: TextCursor::default(),
            content_cursor: TextCursor::default(),
            cursor_date: None,
            goto: None,
        }
    }

    pub fn prefill_credentials(&mut self, email: Option<&str>, password: Option<&str>) {
        if let Screen::Auth(form) = &mut self.screen {
            if let Some(email) = email {
                form.email = email.to_string();
            }
            if let Some(password) = password {
                form.password = password.to_string();
                form.focus = AuthField::Password;
            }
        }
    }

    /// Marks the form as submitted, for sign-ins not started from a key press.
    pub fn mark_pending(&mut self) {
        if let Screen::Auth(form) = &mut self.screen {
            form.pending = true;
        }
    }

    pub fn show_diary(&mut self) {
        self.screen = Screen::Diary;
        self.focus = Field::Title;
        self.title_cursor = TextCursor::default();
        self.content_cursor = TextCursor::default();
        self.cursor_date = None;
        self.goto = None;
    }

    /// Moves both cursors to the end of the text once a newly selected day
    /// has loaded.
    pub fn sync_cursors(&mut self, view: &View) {
        if view.editable && self.cursor_date != Some(view.date) {
            self.title_cursor = TextCursor::at_end(&view.entry.title);
            self.content_cursor = TextCursor::at_end(&view.entry.content);
            self.cursor_date = Some(view.date);
        }
    }

    pub fn show_sign_in(&mut self, info: Option<String>) {
        let mut form = AuthForm::new(AuthMode::SignIn);
        form.message = info.map(Notice::Info);
        self.screen = Screen::Auth(form);
    }

    pub fn auth_failed(&mut self, message: String) {
        if let Screen::Auth(form) = &mut self.screen {
            form.pending = false;
            form.password.clear();
            form.message = Some(Notice::Error(message));
        }
    }

    pub fn handle_key(&mut self, key: KeyEvent, view: &View) -> Option<Action> {
        if key.kind != KeyEventKind::Press {
            return None;
        }
        if let Screen::Auth(form) = &mut self.screen {
            return form.handle_key(key);
        }
        self.handle_diary_key(key, view)
    }

    fn handle_diary_key(&mut self, key: KeyEvent, view: &View) -> Option<Action> {
        if self.goto.is_some() {
            return self.handle_goto_key(key);
        }
        self.sync_cursors(view);

        let ctrl = key.modifiers.contains(KeyModifiers::CONTROL);
        let alt = key.modifiers.contains(KeyModifiers::ALT);
        match key.code {
            KeyCode::Esc => return Some(Action::Quit),
            KeyCode::Char('q') | KeyCode::Char('c') if ctrl => return Some(Action::Quit),
            KeyCode::PageUp => return Some(Action::PreviousDay),
            KeyCode::PageDown => return Some(Action::NextDay),
            KeyCode::Left if alt => return Some(Action::PreviousDay),
            KeyCode::Right if alt => return Some(Action::NextDay),
            KeyCode::Char('t') if ctrl => return Some(Action::Today),
            KeyCode::Char('s') if ctrl => return (!view.saving).then_some(Action::Save),
            KeyCode::Char('r') if ctrl => return Some(Action::Reload),
            KeyCode::Char('o') if ctrl => return Some(Action::SignOut),
            KeyCode::Char('g') if ctrl => {
                self.goto = Some(GotoPrompt {
                    input: String::new(),
                    error: None,
                });
                return None;
            }
            KeyCode::Tab => {
                self.focus = self.focus.next();
                return None;
            }
            KeyCode::BackTab => {
                self.focus = self.focus.previous();
                return None;
            }
            _ if ctrl || alt => return None,
            _ => {}
        }

        if !view.editable {
            return None;
        }

        match self.focus {
            Field::Title => {
                if key.code == KeyCode::Enter {
                    self.focus = Field::Content;
                    return None;
                }
                self.title_cursor
                    .edit(&view.entry.title, key.code, false)
                    .map(|title| Action::Edit(EntryPatch::title(title)))
            }
            Field::Content => self
                .content_cursor
                .edit(&view.entry.content, key.code, true)
                .map(|content| Action::Edit(EntryPatch::content(content))),
            Field::Mood => {
                let mood = match key.code {
                    KeyCode::Left => Some(Mood::step(view.entry.mood, false)),
                    KeyCode::Right => Some(Mood::step(view.entry.mood, true)),
                    KeyCode::Char('0') | KeyCode::Backspace | KeyCode::Delete => None,
                    KeyCode::Char(c) => {
                        let code = c.to_digit(10)?;
                        Some(Mood::try_from(code as u8).ok()?)
                    }
                    _ => return None,
                };
                if mood == view.entry.mood {
                    None
                } else {
                    Some(Action::Edit(EntryPatch::mood(mood)))
                }
            }
        }
    }

    fn handle_goto_key(&mut self, key: KeyEvent) -> Option<Action> {
        let prompt = self.goto.as_mut()?;
        match key.code {
            KeyCode::Esc => {
                self.goto = None;
                None
            }
            KeyCode::Enter => match parse_entry_date(&prompt.input) {
                Some(date) => {
                    self.goto = None;
                    Some(Action::GoTo(date))
                }
                None => {
                    prompt.error = Some("Invalid date, use YYYY-MM-DD");
                    None
                }
            },
            KeyCode::Backspace => {
                prompt.input.pop();
                prompt.error = None;
                None
            }
            KeyCode::Char(c) if c.is_ascii_digit() || c == '-' => {
                prompt.input.push(c);
                prompt.error = None;
                None
            }
            _ => None,
        }
    }

    pub fn render(&self, f: &mut Frame, view: &View) {
        match &self.screen {
            Screen::Auth(form) => render_auth(f, form),
            Screen::Diary => self.render_diary(f, view),
        }
    }

    fn render_diary(&self, f: &mut Frame, view: &View) {
        let chunks = Layout::default()
            .direction(Direction::Vertical)
            .margin(1)
            .constraints([
                Constraint::Length(3),
                Constraint::Length(3),
                Constraint::Min(5),
                Constraint::Length(3),
                Constraint::Length(1),
                Constraint::Length(1),
            ])
            .split(f.area());

        let mut header = vec![
            Span::raw("◀ PgUp   "),
            Span::styled(
                format!("{}", view.date.format("%Y-%m-%d %A")),
                Style::default()
                    .fg(Color::Cyan)
                    .add_modifier(Modifier::BOLD),
            ),
            Span::raw("   PgDn ▶"),
        ];
        if view.resolving {
            header.push(Span::styled(
                "  loading…",
                Style::default().fg(Color::DarkGray),
            ));
        }
        let date_controls = Paragraph::new(Line::from(header))
            .alignment(Alignment::Center)
            .block(Block::default().borders(Borders::ALL).title("Personal Diary"));
        f.render_widget(date_controls, chunks[0]);

        let text_style = if view.editable {
            Style::default()
        } else {
            Style::default().fg(Color::DarkGray)
        };

        let title = Paragraph::new(view.entry.title.clone())
            .style(text_style)
            .block(self.field_block("Title", Field::Title));
        f.render_widget(title, chunks[1]);

        let content = Paragraph::new(view.entry.content.clone())
            .style(text_style)
            .block(self.field_block("Content", Field::Content));
        f.render_widget(content, chunks[2]);

        let mut moods: Vec<Span> = Vec::new();
        for mood in Mood::ALL {
            let style = if view.entry.mood == Some(mood) {
                Style::default().add_modifier(Modifier::REVERSED)
            } else {
                text_style
            };
            moods.push(Span::styled(
                format!(" {} {} ", mood.emoji(), mood.code()),
                style,
            ));
            moods.push(Span::raw(" "));
        }
        if view.entry.mood.is_none() {
            moods.push(Span::styled(
                Mood::PROMPT,
                Style::default().fg(Color::DarkGray),
            ));
        }
        let mood = Paragraph::new(Line::from(moods)).block(self.field_block("Mood", Field::Mood));
        f.render_widget(mood, chunks[3]);

        let status = if view.saving {
            Span::styled("Saving…", Style::default().fg(Color::Yellow))
        } else if let Some(error) = view.error {
            Span::styled(error.to_string(), Style::default().fg(Color::Red))
        } else {
            Span::raw("")
        };
        f.render_widget(Paragraph::new(Line::from(status)), chunks[4]);

        let help = Paragraph::new(
            "PgUp/PgDn: day, ^T: today, ^G: go to, ^S: save, ^R: reload, Tab: field, ^O: sign out, Esc: quit",
        )
        .style(Style::default().fg(Color::Yellow))
        .alignment(Alignment::Center);
        f.render_widget(help, chunks[5]);

        if let Some(prompt) = &self.goto {
            render_goto(f, prompt);
        } else if view.editable {
            let cursor = match self.focus {
                Field::Title => Some((chunks[1], self.title_cursor.position(&view.entry.title))),
                Field::Content => Some((
                    chunks[2],
                    self.content_cursor.position(&view.entry.content),
                )),
                Field::Mood => None,
            };
            if let Some((area, (row, column))) = cursor {
                f.set_cursor_position((
                    area.x.saturating_add(1).saturating_add(column),
                    area.y.saturating_add(1).saturating_add(row),
                ));
            }
        }
    }

    fn field_block(&self, title: &'static str, field: Field) -> Block<'static> {
        let border_style = if self.focus == field && self.goto.is_none() {
            Style::default().fg(Color::Yellow)
        } else {
            Style::default()
        };
        Block::default()
            .borders(Borders::ALL)
            .title(title)
            .border_style(border_style)
    }
}

fn centered(area: Rect, width: u16, height: u16) -> Rect {
    let width = width.min(area.width);
    let height = height.min(area.height);
    Rect {
        x: area.x + (area.width - width) / 2,
        y: area.y + (area.height - height) / 2,
        width,
        height,
    }
}

fn render_goto(f: &mut Frame, prompt: &GotoPrompt) {
    let area = centered(f.area(), 40, 5);
    let mut lines = vec![Line::from(prompt.input.clone())];
    if let Some(error) = prompt.error {
        lines.push(Line::from(Span::styled(
            error,
            Style::default().fg(Color::Red),
        )));
    }
    let popup = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title("Go to date (YYYY-MM-DD)"),
    );
    f.render_widget(Clear, area);
    f.render_widget(popup, area);
}

fn render_auth(f: &mut Frame, form: &AuthForm) {
    let area = centered(f.area(), 60, 16);
    let heading = match form.mode {
        AuthMode::SignIn => "Sign in to Mood Diary",
        AuthMode::SignUp => "Sign up to Mood Diary",
    };

    let mut lines: Vec<Line> = Vec::new();
    for field in form.fields() {
        let (label, value, error) = match field {
            AuthField::FullName => ("Full Name", form.full_name.clone(), form.errors.full_name),
            AuthField::Email => ("Email", form.email.clone(), form.errors.email),
            AuthField::Password => (
                "Password",
                "•".repeat(form.password.chars().count()),
                form.errors.password,
            ),
        };
        let label_style = if form.focus == *field {
            Style::default()
                .fg(Color::Yellow)
                .add_modifier(Modifier::BOLD)
        } else {
            Style::default()
        };
        lines.push(Line::from(vec![
            Span::styled(format!("{label:>10}: "), label_style),
            Span::raw(value),
        ]));
        match error {
            Some(error) => lines.push(Line::from(Span::styled(
                format!("{:>12}{error}", ""),
                Style::default().fg(Color::Red),
            ))),
            None => lines.push(Line::from("")),
        }
    }

    if form.pending {
        lines.push(Line::from(Span::styled(
            "Please wait…",
            Style::default().fg(Color::DarkGray),
        )));
    } else if let Some(message) = &form.message {
        let (text, color) = match message {
            Notice::Info(text) => (text, Color::Green),
            Notice::Error(text) => (text, Color::Red),
        };
        lines.push(Line::from(Span::styled(
            text.clone(),
            Style::default().fg(color),
        )));
    }
    lines.push(Line::from(""));
    let switch_hint = match form.mode {
        AuthMode::SignIn => "Don't have an account? ^N: sign up",
        AuthMode::SignUp => "Already have an account? ^N: sign in",
    };
    lines.push(Line::from(Span::styled(
        switch_hint,
        Style::default().fg(Color::Yellow),
    )));
    lines.push(Line::from(Span::styled(
        "Tab: next field, Enter: submit, Esc: quit",
        Style::default().fg(Color::Yellow),
    )));

    let panel = Paragraph::new(lines).block(
        Block::default()
            .borders(Borders::ALL)
            .title(heading)
            .title_alignment(Alignment::Center),
    );
    f.render_widget(panel, area);
}

pub struct UI {
    terminal: Terminal<CrosstermBackend<Stdout>>,
    editor: Editor,
}

impl UI {
    pub fn new(mode: AuthMode) -> Result<Self> {
        enable_raw_mode()?;
        stdout().execute(EnterAlternateScreen)?;

        let backend = CrosstermBackend::new(stdout());
        let terminal = Terminal::new(backend)?;

        Ok(UI {
            terminal,
            editor: Editor::new(mode),
        })
    }

    pub fn editor(&mut self) -> &mut Editor {
        &mut self.editor
    }

    pub fn display(&mut self, view: &View) -> Result<()> {
        self.editor.sync_cursors(view);
        let editor = &self.editor;
        self.terminal.draw(|f| editor.render(f, view))?;
        Ok(())
    }

    pub fn handle_key(&mut self, key: KeyEvent, view: &View) -> Option<Action> {
        self.editor.handle_key(key, view)
    }
}

impl Drop for UI {
    fn drop(&mut self) {
        let _ = disable_raw_mode();
        let _ = stdout().execute(LeaveAlternateScreen);
    }
}
