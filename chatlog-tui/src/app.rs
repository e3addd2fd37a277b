use std::sync::Arc;

use chatlog_common::{AttachmentRef, Bytes};
use chatlog_export::{spawn_load, FileHandle, LoadEvent, Session};
use ratatui::{
    layout::{Constraint, Layout},
    style::{Color, Stylize},
    text::Line,
    widgets::{Block, Paragraph},
    Frame,
};
use tokio::{
    sync::mpsc,
    time::{Duration, Instant},
};

use crate::{
    keymap::{KeyBuffer, KeyCode, KeyEvent, Keymap, KeymapError},
    message_list::MessageListView,
};

const SEQUENCE_TIMEOUT: Duration = Duration::from_millis(1000);

const HELP: &str = "q quit  j/k move  gg/G first/last  w window  u/U active user  a attachment  o open";

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    Down,
    Up,
    First,
    Last,
    NextUser,
    PrevUser,
    EditWindow,
    Open,
    ResolveAttachment,
    Quit,
}

pub fn default_keymap() -> Result<Keymap<Action>, KeymapError> {
    Keymap::new(SEQUENCE_TIMEOUT)
        .bind("j", Action::Down)?
        .bind("<Down>", Action::Down)?
        .bind("k", Action::Up)?
        .bind("<Up>", Action::Up)?
        .bind("gg", Action::First)?
        .bind("<Home>", Action::First)?
        .bind("G", Action::Last)?
        .bind("<End>", Action::Last)?
        .bind("u", Action::NextUser)?
        .bind("U", Action::PrevUser)?
        .bind("w", Action::EditWindow)?
        .bind("o", Action::Open)?
        .bind("a", Action::ResolveAttachment)?
        .bind("q", Action::Quit)
}

/// A line of text being typed at the bottom of the screen.
#[derive(Clone, Debug, Eq, PartialEq)]
enum Prompt {
    Start { input: String },
    End { start: String, input: String },
    Open { input: String },
}

impl Prompt {
    fn input(&mut self) -> &mut String {
        match self {
            Self::Start { input } | Self::End { input, .. } | Self::Open { input } => input,
        }
    }

    fn text(&self) -> &str {
        match self {
            Self::Start { input } | Self::End { input, .. } | Self::Open { input } => input,
        }
    }

    fn label(&self) -> &'static str {
        match self {
            Self::Start { .. } => "Start",
            Self::End { .. } => "End",
            Self::Open { .. } => "Open",
        }
    }
}

#[derive(Clone, Debug, Eq, PartialEq)]
enum Status {
    Info(String),
    Error(String),
}

/// An attachment that finished resolving in the background.
#[derive(Debug)]
pub struct Resolved {
    filename: Arc<str>,
    bytes: Option<Bytes>,
}

/// Resolves `attachment` and reports the outcome on `channel`.
pub async fn resolve_sender(attachment: AttachmentRef, channel: mpsc::UnboundedSender<Resolved>) {
    let bytes = attachment.resolve().await;
    let resolved = Resolved {
        filename: attachment.filename,
        bytes,
    };
    if channel.send(resolved).is_err() {
        tracing::debug!("resolution receiver gone, dropping result");
    }
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Flow {
    Continue,
    Quit,
}

#[derive(Debug)]
pub struct App {
    session: Session,
    loads: mpsc::UnboundedSender<LoadEvent>,
    resolutions: mpsc::UnboundedSender<Resolved>,
    keys: KeyBuffer<Action>,
    list: MessageListView,
    prompt: Option<Prompt>,
    status: Option<Status>,
}

impl App {
    pub fn new(
        session: Session,
        loads: mpsc::UnboundedSender<LoadEvent>,
        resolutions: mpsc::UnboundedSender<Resolved>,
    ) -> Result<Self, KeymapError> {
        let mut list = MessageListView::default();
        list.redraw(session.view());
        Ok(Self {
            session,
            loads,
            resolutions,
            keys: KeyBuffer::new(default_keymap()?),
            list,
            prompt: None,
            status: None,
        })
    }

    pub fn session(&self) -> &Session {
        &self.session
    }

    pub fn key_deadline(&self) -> Option<Instant> {
        self.keys.deadline()
    }

    pub fn expire_keys(&mut self) {
        self.keys.expire();
    }

    pub fn handle_key(&mut self, key: KeyEvent) -> Flow {
        if self.prompt.is_some() {
            self.edit_prompt(key);
            return Flow::Continue;
        }
        let action = self.keys.push(key, |skipped| {
            tracing::trace!(?skipped, "unbound keys");
        });
        match action {
            Some(action) => self.perform(action),
            None => Flow::Continue,
        }
    }

    fn perform(&mut self, action: Action) -> Flow {
        match action {
            Action::Down => self.list.select_next(),
            Action::Up => self.list.select_prev(),
            Action::First => self.list.select_first(),
            Action::Last => self.list.select_last(),
            Action::NextUser | Action::PrevUser => {
                if self.session.view().participants().is_empty() {
                    self.status = Some(Status::Error("no participants to choose from".into()));
                } else {
                    self.session
                        .view_mut()
                        .cycle_active_user(action == Action::NextUser);
                    self.list.redraw(self.session.view());
                }
            }
            Action::EditWindow => {
                self.prompt = Some(Prompt::Start {
                    input: String::new(),
                })
            }
            Action::Open => {
                self.prompt = Some(Prompt::Open {
                    input: String::new(),
                })
            }
            Action::ResolveAttachment => self.resolve_attachment(),
            Action::Quit => return Flow::Quit,
        }
        Flow::Continue
    }

    fn edit_prompt(&mut self, key: KeyEvent) {
        let Some(prompt) = &mut self.prompt else {
            return;
        };
        match key.code {
            KeyCode::Char(c) => prompt.input().push(c),
            KeyCode::Backspace => {
                prompt.input().pop();
            }
            KeyCode::Escape => self.prompt = None,
            KeyCode::Enter => {
                if let Some(prompt) = self.prompt.take() {
                    self.submit(prompt);
                }
            }
            _ => {}
        }
    }

    fn submit(&mut self, prompt: Prompt) {
        match prompt {
            Prompt::Start { input } => {
                self.prompt = Some(Prompt::End {
                    start: input,
                    input: String::new(),
                })
            }
            Prompt::End { start, input } => {
                let window = self.session.apply_window_input(&start, &input);
                self.list.redraw(self.session.view());
                self.status = Some(Status::Info(format!(
                    "showing messages {}-{}",
                    window.lower(),
                    window.upper()
                )));
            }
            Prompt::Open { input } => {
                let path = input.trim();
                if path.is_empty() {
                    return;
                }
                spawn_load(FileHandle::new(path), self.loads.clone());
                self.status = Some(Status::Info(format!("opening {path}")));
            }
        }
    }

    fn resolve_attachment(&mut self) {
        let Some(attachment) = self
            .list
            .selected(self.session.view())
            .and_then(|message| message.attachment.clone())
        else {
            self.status = Some(Status::Error("no attachment on this message".into()));
            return;
        };
        self.status = Some(Status::Info(format!("resolving {}", attachment.filename)));
        tokio::spawn(resolve_sender(attachment, self.resolutions.clone()));
    }

    pub fn handle_resolution(&mut self, resolved: Resolved) {
        self.status = Some(match resolved.bytes {
            Some(bytes) => Status::Info(format!("{}: {} bytes", resolved.filename, bytes.len())),
            None => Status::Error(format!("{}: not in archive", resolved.filename)),
        });
    }

    pub fn handle_load(&mut self, event: LoadEvent) {
        let path = match &event {
            LoadEvent::Loaded(document) => document.path.clone(),
            LoadEvent::Failed { path, .. } => path.clone(),
        };
        match self.session.handle(event) {
            Ok(()) => {
                self.list.redraw(self.session.view());
                self.status = Some(Status::Info(format!("opened {}", path.display())));
            }
            Err(err) => self.status = Some(Status::Error(err.to_string())),
        }
    }

    pub fn draw(&mut self, frame: &mut Frame) {
        let [main, status] =
            Layout::vertical([Constraint::Min(0), Constraint::Length(1)]).areas(frame.area());
        let [messages, sidebar] =
            Layout::horizontal([Constraint::Min(0), Constraint::Length(32)]).areas(main);
        frame.render_widget(&mut self.list, messages);
        frame.render_widget(self.sidebar(), sidebar);
        frame.render_widget(self.status_line(), status);
    }

    fn sidebar(&self) -> Paragraph<'static> {
        let view = self.session.view();
        let window = view.window();
        let participants = view.participants();
        let mut lines = vec![
            Line::from("Messages limit").bold(),
            Line::from(format!("  Start {}", window.lower())),
            Line::from(format!("  End   {}", window.upper())),
            Line::default(),
            Line::from("Active User").bold(),
        ];
        if participants.is_empty() {
            lines.push(Line::from("  (none)").dim());
        }
        for participant in participants.iter() {
            let line = if view.active_user() == Some(&**participant) {
                Line::from(format!("* {participant}")).fg(Color::Green)
            } else {
                Line::from(format!("  {participant}"))
            };
            lines.push(line);
        }
        Paragraph::new(lines).block(Block::bordered().title(" Controls "))
    }

    fn status_line(&self) -> Line<'static> {
        if let Some(prompt) = &self.prompt {
            return Line::from(format!("{}: {}_", prompt.label(), prompt.text()));
        }
        match &self.status {
            Some(Status::Info(message)) => Line::from(message.clone()),
            Some(Status::Error(message)) => Line::from(message.clone()).fg(Color::Red),
            None => Line::from(HELP).dim(),
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Weak;

    use chatlog_common::{AttachmentSource, Message};
    use chatlog_export::{Document, LoadError, MediaType};
    use chrono::NaiveDateTime;
    use futures::future::BoxFuture;
    use tokio::sync::Notify;

    use super::*;

    const TRANSCRIPT: &str = "\
[1/2/20, 10:00:00] Alice: hi
[1/2/20, 10:00:05] Bob: hey
[1/2/20, 10:00:09] Alice: how are you
[1/2/20, 10:00:12] Carol: <attached: IMG-001.jpg>";

    fn text_session() -> Session {
        let mut session = Session::default();
        session.install(Document {
            path: "chat.txt".into(),
            transcript: TRANSCRIPT.into(),
            archive: None,
        });
        session
    }

    fn app_with(session: Session) -> (App, mpsc::UnboundedReceiver<Resolved>) {
        let (loads, _) = mpsc::unbounded_channel();
        let (resolutions, rx) = mpsc::unbounded_channel();
        (App::new(session, loads, resolutions).unwrap(), rx)
    }

    fn app() -> App {
        app_with(text_session()).0
    }

    fn type_keys(app: &mut App, keys: &str) -> Flow {
        let mut flow = Flow::Continue;
        for key in crate::keymap::parse_key_sequence(keys).unwrap() {
            flow = app.handle_key(key);
        }
        flow
    }

    /// Holds every fetch until `open` is notified.
    struct Gated {
        open: Notify,
    }

    impl AttachmentSource for Gated {
        fn fetch<'a>(&'a self, filename: &'a str) -> BoxFuture<'a, Option<Bytes>> {
            Box::pin(async move {
                self.open.notified().await;
                Some(Bytes::from(filename.as_bytes()))
            })
        }
    }

    fn message(author: &str, body: &str, attachment: Option<AttachmentRef>) -> Message {
        Message {
            timestamp: NaiveDateTime::default(),
            author: author.into(),
            body: body.into(),
            attachment,
        }
    }

    #[test]
    fn window_prompt_takes_start_then_end() {
        let mut app = app();
        type_keys(&mut app, "w3<CR>2<CR>");
        let window = app.session().view().window();
        assert_eq!((window.lower(), window.upper()), (2, 3));
        assert_eq!(app.list.len(), 2);
        assert_eq!(
            app.status,
            Some(Status::Info("showing messages 2-3".into()))
        );
    }

    #[test]
    fn blank_window_fields_use_defaults() {
        let mut app = app();
        type_keys(&mut app, "w<CR><CR>");
        let window = app.session().view().window();
        assert_eq!((window.lower(), window.upper()), (1, 100));
    }

    #[test]
    fn escape_cancels_prompt() {
        let mut app = app();
        type_keys(&mut app, "w5<Esc>");
        assert!(app.prompt.is_none());
        assert_eq!(app.session().view().window().lower(), 1);
    }

    #[test]
    fn active_user_survives_window_change() {
        let mut app = app();
        assert_eq!(app.session().view().active_user(), Some("Alice"));
        type_keys(&mut app, "u");
        assert_eq!(app.session().view().active_user(), Some("Bob"));
        type_keys(&mut app, "w1<CR>2<CR>");
        assert_eq!(app.session().view().active_user(), Some("Bob"));
        type_keys(&mut app, "UU");
        assert_eq!(app.session().view().active_user(), Some("Carol"));
    }

    #[test]
    fn text_transcripts_have_no_attachments_to_resolve() {
        let mut app = app();
        type_keys(&mut app, "Ga");
        assert_eq!(
            app.status,
            Some(Status::Error("no attachment on this message".into()))
        );
    }

    #[tokio::test]
    async fn keys_are_handled_while_an_attachment_resolves() {
        let source = Arc::new(Gated {
            open: Notify::new(),
        });
        let weak: Weak<dyn AttachmentSource> = Arc::<Gated>::downgrade(&source);
        let mut session = Session::default();
        session.view_mut().set_messages(
            vec![
                message("Alice", "look", None),
                message(
                    "Bob",
                    "<attached: VID-001.mp4>",
                    Some(AttachmentRef::new("VID-001.mp4", weak)),
                ),
            ]
            .into(),
        );
        let (mut app, mut resolutions) = app_with(session);

        type_keys(&mut app, "Ga");
        assert_eq!(
            app.status,
            Some(Status::Info("resolving VID-001.mp4".into()))
        );
        type_keys(&mut app, "k");
        let selected = app.list.selected(app.session().view()).unwrap();
        assert_eq!(&*selected.author, "Alice");
        assert!(resolutions.try_recv().is_err());

        source.open.notify_one();
        let resolved = resolutions.recv().await.unwrap();
        app.handle_resolution(resolved);
        assert_eq!(
            app.status,
            Some(Status::Info("VID-001.mp4: 11 bytes".into()))
        );
    }

    #[tokio::test]
    async fn dropped_source_reports_missing_attachment() {
        let source: Arc<dyn AttachmentSource> = Arc::new(Gated {
            open: Notify::new(),
        });
        let attachment = AttachmentRef::new("IMG-001.jpg", Arc::downgrade(&source));
        drop(source);
        let (mut app, mut resolutions) = app_with(Session::default());
        resolve_sender(attachment, app.resolutions.clone()).await;
        app.handle_resolution(resolutions.recv().await.unwrap());
        assert_eq!(
            app.status,
            Some(Status::Error("IMG-001.jpg: not in archive".into()))
        );
    }

    #[test]
    fn failed_load_is_reported_and_keeps_messages() {
        let mut app = app();
        app.handle_load(LoadEvent::Failed {
            path: "photo.png".into(),
            error: LoadError::UnsupportedMediaType(MediaType::new("image/png")).into(),
        });
        assert_eq!(
            app.status,
            Some(Status::Error("File type image/png not supported".into()))
        );
        assert_eq!(app.session().view().messages().len(), 4);
    }

    #[test]
    fn quit_key_stops() {
        let mut app = app();
        assert_eq!(type_keys(&mut app, "jjk"), Flow::Continue);
        assert_eq!(type_keys(&mut app, "q"), Flow::Quit);
    }
}
