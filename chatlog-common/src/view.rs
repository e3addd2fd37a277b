//! State derived from a parsed transcript: who took part, which slice of the conversation is
//! shown, and whose perspective it is shown from.

use std::{collections::HashSet, ops::Range, sync::Arc};

use crate::Message;

#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct Participants(Arc<[Arc<str>]>);

impl Participants {
    /// Distinct non-system authors, in the order they first speak.
    pub fn from_messages(messages: &[Message]) -> Self {
        let mut seen = HashSet::new();
        let authors = messages
            .iter()
            .filter(|message| !message.is_system())
            .filter(|message| seen.insert(message.author.clone()))
            .map(|message| message.author.clone())
            .collect();
        Self(authors)
    }

    pub fn iter(&self) -> impl Iterator<Item = &Arc<str>> {
        self.0.iter()
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn first(&self) -> Option<&Arc<str>> {
        self.0.first()
    }

    pub fn position(&self, name: &str) -> Option<usize> {
        self.0.iter().position(|participant| &**participant == name)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.position(name).is_some()
    }

    fn get(&self, index: usize) -> Option<&Arc<str>> {
        self.0.get(index)
    }
}

/// A closed, 1-based range of message indices.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct Window {
    lower: usize,
    upper: usize,
}

impl Window {
    pub const DEFAULT_LOWER: usize = 1;
    pub const DEFAULT_UPPER: usize = 100;

    /// Builds a window from two bounds in either order. Bounds below 1 are raised to 1.
    pub fn new(a: i64, b: i64) -> Self {
        let to_bound = |n: i64| usize::try_from(n.max(1)).unwrap_or(usize::MAX);
        Self {
            lower: to_bound(a.min(b)),
            upper: to_bound(a.max(b)),
        }
    }

    /// Builds a window from what the user typed into the "Start" and "End" fields.
    ///
    /// Each field is read like a leading integer ("12abc" is 12). Empty, unreadable, and zero
    /// fields fall back to that field's default, and reversed bounds are swapped.
    pub fn parse(lower: &str, upper: &str) -> Self {
        let field = |input: &str, default: usize| {
            leading_integer(input)
                .filter(|&n| n != 0)
                .unwrap_or(default as i64)
        };
        Self::new(
            field(lower, Self::DEFAULT_LOWER),
            field(upper, Self::DEFAULT_UPPER),
        )
    }

    pub fn lower(&self) -> usize {
        self.lower
    }

    pub fn upper(&self) -> usize {
        self.upper
    }

    /// The 0-based slice range this window selects out of `len` messages.
    pub fn range(&self, len: usize) -> Range<usize> {
        let upper = self.upper.min(len);
        let lower = (self.lower - 1).min(upper);
        lower..upper
    }
}

impl Default for Window {
    fn default() -> Self {
        Self {
            lower: Self::DEFAULT_LOWER,
            upper: Self::DEFAULT_UPPER,
        }
    }
}

fn leading_integer(input: &str) -> Option<i64> {
    use nom::{
        character::complete::{digit1, multispace0, one_of},
        combinator::{opt, recognize},
        sequence::{pair, preceded},
    };

    let (_, number) = preceded::<_, _, _, nom::error::Error<&str>, _, _>(
        multispace0,
        recognize(pair(opt(one_of("+-")), digit1)),
    )(input)
    .ok()?;
    number.parse().ok()
}

/// The participant whose messages are shown as sent rather than received.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct ActiveUser(Option<Arc<str>>);

impl ActiveUser {
    pub fn get(&self) -> Option<&str> {
        self.0.as_deref()
    }

    /// Keeps the current choice if it is still a participant, otherwise falls back to the first
    /// participant (or nobody). Returns whether the choice changed.
    pub fn reconcile(&mut self, participants: &Participants) -> bool {
        if self.get().is_some_and(|name| participants.contains(name)) {
            return false;
        }
        let next = participants.first().cloned();
        let changed = next != self.0;
        self.0 = next;
        changed
    }

    /// Selects `name` if it is a participant.
    pub fn select(&mut self, name: &str, participants: &Participants) -> bool {
        match participants.position(name).and_then(|idx| participants.get(idx)) {
            Some(participant) => {
                self.0 = Some(participant.clone());
                true
            }
            None => false,
        }
    }

    /// Moves to the next (or previous) participant, wrapping around.
    pub fn cycle(&mut self, participants: &Participants, forward: bool) {
        let len = participants.len();
        if len == 0 {
            return;
        }
        let next = match self.get().and_then(|name| participants.position(name)) {
            Some(idx) if forward => (idx + 1) % len,
            Some(idx) => (idx + len - 1) % len,
            None => 0,
        };
        self.0 = participants.get(next).cloned();
    }
}

/// How a message sits in the conversation relative to the active user.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Alignment {
    System,
    Outgoing,
    Incoming,
}

/// Everything the presentation layer needs to draw a conversation.
#[derive(Clone, Debug)]
pub struct ViewModel {
    messages: Arc<[Message]>,
    participants: Participants,
    window: Window,
    active_user: ActiveUser,
}

impl Default for ViewModel {
    fn default() -> Self {
        Self {
            messages: Arc::new([]),
            participants: Participants::default(),
            window: Window::default(),
            active_user: ActiveUser::default(),
        }
    }
}

impl ViewModel {
    pub fn new() -> Self {
        Self::default()
    }

    /// Replaces the conversation. The window is kept, and a still-valid active user survives.
    pub fn set_messages(&mut self, messages: Arc<[Message]>) {
        if Arc::ptr_eq(&self.messages, &messages) {
            return;
        }
        self.messages = messages;
        let participants = Participants::from_messages(&self.messages);
        if participants != self.participants {
            tracing::debug!(count = participants.len(), "participants changed");
            self.participants = participants;
        }
        if self.active_user.reconcile(&self.participants) {
            tracing::debug!(active_user = ?self.active_user.get(), "active user reset");
        }
    }

    pub fn apply_window(&mut self, window: Window) {
        self.window = window;
    }

    pub fn select_active_user(&mut self, name: &str) -> bool {
        self.active_user.select(name, &self.participants)
    }

    pub fn cycle_active_user(&mut self, forward: bool) {
        self.active_user.cycle(&self.participants, forward);
    }

    pub fn messages(&self) -> &Arc<[Message]> {
        &self.messages
    }

    pub fn participants(&self) -> &Participants {
        &self.participants
    }

    pub fn window(&self) -> Window {
        self.window
    }

    pub fn active_user(&self) -> Option<&str> {
        self.active_user.get()
    }

    /// Messages inside the window.
    pub fn visible(&self) -> &[Message] {
        &self.messages[self.window.range(self.messages.len())]
    }

    /// 1-based position of the first visible message.
    pub fn first_visible_number(&self) -> usize {
        self.window.range(self.messages.len()).start + 1
    }

    pub fn alignment(&self, message: &Message) -> Alignment {
        if message.is_system() {
            Alignment::System
        } else if self.active_user() == Some(&*message.author) {
            Alignment::Outgoing
        } else {
            Alignment::Incoming
        }
    }
}
