use std::{cmp, collections::BTreeMap};

use crossterm::event::KeyModifiers;
use tokio::time::{Duration, Instant};

// resolving a key event needs the keys pressed so far, to handle multi-key sequences. a pending
// sequence is dropped once its deadline passes; the caller is expected to wake up at
// `KeyBuffer::deadline` and call `expire`.

pub fn parse_key_sequence(input: &str) -> Result<Vec<KeyEvent>, nom::error::Error<&str>> {
    use nom::Finish;
    nom::combinator::all_consuming(nom::multi::many1(parse_key))(input)
        .finish()
        .map(|(_, k)| k)
}

fn parse_key(input: &str) -> nom::IResult<&str, KeyEvent> {
    use nom::{
        branch::alt,
        bytes::complete::tag,
        character::complete::one_of,
        combinator::map,
        sequence::{delimited, separated_pair},
    };

    let key = alt((KeyCode::parse_char, KeyCode::parse_special));
    let modifiers = nom::multi::fold_many1(
        map(one_of("ACMS"), |c| match c {
            'A' => KeyModifiers::ALT,
            'C' => KeyModifiers::CONTROL,
            'M' => KeyModifiers::META,
            'S' => KeyModifiers::SHIFT,
            _ => unreachable!(),
        }),
        KeyModifiers::empty,
        KeyModifiers::union,
    );

    let bracketed = alt((
        map(
            separated_pair(modifiers, tag("-"), key),
            |(modifiers, code)| KeyEvent { modifiers, code },
        ),
        map(KeyCode::parse_special, KeyEvent::from),
    ));
    alt((
        delimited(tag("<"), bracketed, tag(">")),
        map(KeyCode::parse_char, KeyEvent::from),
    ))(input)
}

#[derive(Clone, Copy, Debug, Eq)]
pub struct KeyEvent {
    pub code: KeyCode,
    pub modifiers: KeyModifiers,
}

impl From<KeyCode> for KeyEvent {
    fn from(code: KeyCode) -> Self {
        Self {
            code,
            modifiers: KeyModifiers::empty(),
        }
    }
}

impl From<crossterm::event::KeyEvent> for KeyEvent {
    fn from(event: crossterm::event::KeyEvent) -> Self {
        let code = KeyCode::from(event.code);
        // the case of a character already says whether shift was held
        let modifiers = match code {
            KeyCode::Char(_) => event.modifiers - KeyModifiers::SHIFT,
            _ => event.modifiers,
        };
        Self { code, modifiers }
    }
}

// manually impl `Ord` since `KeyModifiers` isn't `Ord`
// https://github.com/crossterm-rs/crossterm/pull/951
impl Ord for KeyEvent {
    fn cmp(&self, other: &Self) -> cmp::Ordering {
        self.code
            .cmp(&other.code)
            .then(self.modifiers.bits().cmp(&other.modifiers.bits()))
    }
}

impl PartialOrd for KeyEvent {
    fn partial_cmp(&self, other: &Self) -> Option<cmp::Ordering> {
        Some(self.cmp(other))
    }
}

impl PartialEq for KeyEvent {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == cmp::Ordering::Equal
    }
}

// Our own version of `crossterm::event::KeyCode`
// https://github.com/crossterm-rs/crossterm/pull/951
#[allow(unused)]
#[derive(Clone, Copy, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub enum KeyCode {
    Char(char),
    Backspace,
    Delete,
    Enter,
    Left,
    Right,
    Up,
    Down,
    Home,
    End,
    PageUp,
    PageDown,
    Tab,
    Insert,
    Escape,
    F(u8),
    Unknown,
}

impl KeyCode {
    fn parse_char(input: &str) -> nom::IResult<&str, Self> {
        nom::combinator::map(
            nom::character::complete::satisfy(nom_unicode::is_alphanumeric),
            Self::Char,
        )(input)
    }

    fn parse_special(input: &str) -> nom::IResult<&str, Self> {
        use nom::{
            bytes::complete::tag,
            combinator::{map, value},
            sequence::preceded,
        };
        nom::branch::alt((
            value(Self::Backspace, tag("BS")),
            value(Self::Delete, tag("Del")),
            value(Self::Enter, tag("CR")),
            value(Self::Left, tag("Left")),
            value(Self::Right, tag("Right")),
            value(Self::Up, tag("Up")),
            value(Self::Down, tag("Down")),
            value(Self::Home, tag("Home")),
            value(Self::End, tag("End")),
            value(Self::PageUp, tag("PageUp")),
            value(Self::PageDown, tag("PageDown")),
            value(Self::Tab, tag("Tab")),
            value(Self::Insert, tag("Ins")),
            value(Self::Escape, tag("Esc")),
            map(preceded(tag("F"), nom::character::complete::u8), Self::F),
        ))(input)
    }
}

impl From<crossterm::event::KeyCode> for KeyCode {
    fn from(code: crossterm::event::KeyCode) -> Self {
        use crossterm::event::KeyCode as Kc;
        match code {
            Kc::Char(c) => Self::Char(c),
            Kc::Backspace => Self::Backspace,
            Kc::Delete => Self::Delete,
            Kc::Enter => Self::Enter,
            Kc::Left => Self::Left,
            Kc::Right => Self::Right,
            Kc::Up => Self::Up,
            Kc::Down => Self::Down,
            Kc::Home => Self::Home,
            Kc::End => Self::End,
            Kc::PageUp => Self::PageUp,
            Kc::PageDown => Self::PageDown,
            Kc::Tab => Self::Tab,
            Kc::Insert => Self::Insert,
            Kc::Esc => Self::Escape,
            Kc::F(n) => Self::F(n),
            _ => Self::Unknown,
        }
    }
}

#[derive(Debug, thiserror::Error)]
#[error("invalid key sequence {sequence:?}")]
pub struct KeymapError {
    sequence: String,
}

#[derive(Clone, Debug)]
pub struct Keymap<A> {
    pub keys: BTreeMap<Vec<KeyEvent>, A>,
    pub timeout: Duration,
}

impl<A: Clone> Keymap<A> {
    pub fn new(timeout: Duration) -> Self {
        Self {
            keys: BTreeMap::new(),
            timeout,
        }
    }

    /// Binds a key sequence written like `gg`, `<C-d>` or `<Down>`.
    pub fn bind(mut self, sequence: &str, action: A) -> Result<Self, KeymapError> {
        let keys = parse_key_sequence(sequence).map_err(|_| KeymapError {
            sequence: sequence.to_owned(),
        })?;
        self.keys.insert(keys, action);
        Ok(self)
    }

    fn entries_with_prefix<'s, 'p>(
        &'s self,
        prefix: &'p [KeyEvent],
    ) -> impl Iterator<Item = (&'s Vec<KeyEvent>, &'s A)> + use<'s, 'p, A> {
        use std::ops::Bound;

        self.keys
            .range::<[_], _>((Bound::Included(prefix), Bound::Unbounded))
            .take_while(move |(k, _)| k.starts_with(prefix))
    }

    /// Finds the action corresponding to the provided key sequence.
    ///
    /// ## Return values
    /// - `Some(Some(action))`: the key sequence is mapped to the action
    /// - `Some(None)`: the key sequence is a prefix to at least one action
    /// - `None`: the key sequence is not a prefix to any action
    fn get(&self, keys: &[KeyEvent]) -> Option<Option<A>> {
        self.entries_with_prefix(keys)
            .next()
            .map(|(k, v)| (k == keys).then_some(v.clone()))
    }
}

/// Keys pressed so far, waiting to be resolved against a [`Keymap`].
#[derive(Clone, Debug)]
pub struct KeyBuffer<A> {
    keymap: Keymap<A>,
    buffer: Vec<KeyEvent>,
    deadline: Option<Instant>,
}

impl<A: Clone> KeyBuffer<A> {
    pub fn new(keymap: Keymap<A>) -> Self {
        Self {
            keymap,
            buffer: Vec::new(),
            deadline: None,
        }
    }

    /// Adds a key press. Keys that can't start any binding are handed to `passthru_callback`.
    pub fn push(
        &mut self,
        event: KeyEvent,
        mut passthru_callback: impl FnMut(&[KeyEvent]),
    ) -> Option<A> {
        self.buffer.push(event);
        let (skipped, action) = (0..self.buffer.len())
            .find_map(|i| self.keymap.get(&self.buffer[i..]).map(|action| (i, action)))
            .unwrap_or((self.buffer.len(), None));
        passthru_callback(&self.buffer[..skipped]);
        self.buffer.drain(..skipped).for_each(drop);
        if action.is_some() {
            self.buffer.clear();
        }
        self.deadline = if self.buffer.is_empty() {
            None
        } else {
            Some(Instant::now() + self.keymap.timeout)
        };
        action
    }

    /// When a pending sequence should be given up on.
    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub fn expire(&mut self) {
        self.buffer.clear();
        self.deadline = None;
    }

    pub fn pending(&self) -> &[KeyEvent] {
        &self.buffer
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn key(c: char) -> KeyEvent {
        KeyCode::Char(c).into()
    }

    #[test]
    fn parses_sequences() {
        assert_eq!(parse_key_sequence("gg").unwrap(), [key('g'), key('g')]);
        assert_eq!(
            parse_key_sequence("<C-d><Down>").unwrap(),
            [
                KeyEvent {
                    code: KeyCode::Char('d'),
                    modifiers: KeyModifiers::CONTROL
                },
                KeyCode::Down.into()
            ]
        );
        assert_eq!(parse_key_sequence("<F5>").unwrap(), [KeyCode::F(5).into()]);
        assert!(parse_key_sequence("<Nope>").is_err());
        assert!(parse_key_sequence("").is_err());
    }

    #[test]
    fn shifted_characters_drop_shift() {
        let event = crossterm::event::KeyEvent::new(
            crossterm::event::KeyCode::Char('G'),
            KeyModifiers::SHIFT,
        );
        assert_eq!(KeyEvent::from(event), key('G'));
    }

    fn buffer() -> KeyBuffer<&'static str> {
        let keymap = Keymap::new(Duration::from_millis(500))
            .bind("gg", "first")
            .and_then(|keymap| keymap.bind("G", "last"))
            .and_then(|keymap| keymap.bind("j", "down"))
            .unwrap();
        KeyBuffer::new(keymap)
    }

    #[test]
    fn resolves_single_and_multi_key_bindings() {
        let mut keys = buffer();
        assert_eq!(keys.push(key('j'), |_| {}), Some("down"));
        assert_eq!(keys.push(key('g'), |_| {}), None);
        assert!(keys.deadline().is_some());
        assert_eq!(keys.push(key('g'), |_| {}), Some("first"));
        assert!(keys.pending().is_empty());
        assert!(keys.deadline().is_none());
    }

    #[test]
    fn unbound_keys_pass_through() {
        let mut keys = buffer();
        let mut passed = Vec::new();
        assert_eq!(keys.push(key('x'), |k| passed.extend_from_slice(k)), None);
        assert_eq!(passed, [key('x')]);
        assert!(keys.pending().is_empty());

        passed.clear();
        keys.push(key('g'), |k| passed.extend_from_slice(k));
        assert_eq!(keys.push(key('G'), |k| passed.extend_from_slice(k)), Some("last"));
        assert_eq!(passed, [key('g')]);
    }

    #[test]
    fn expired_prefix_is_dropped() {
        let mut keys = buffer();
        keys.push(key('g'), |_| {});
        keys.expire();
        assert_eq!(keys.push(key('j'), |_| {}), Some("down"));
    }
}
