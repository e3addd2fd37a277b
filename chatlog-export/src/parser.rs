//! Line-oriented parser for exported WhatsApp transcripts.
//!
//! Each message starts on a line like `[31/12/2019, 21:00:00] Alice: hi` (iOS) or
//! `31/12/2019, 21:00 - Alice: hi` (Android). Any other line continues the message before it.

use std::sync::{Arc, Weak};

use chatlog_common::{AttachmentRef, AttachmentSource, Message, SYSTEM_AUTHOR};
use chrono::{NaiveDate, NaiveDateTime};
use nom::IResult;

use crate::archive::Archive;

const LEFT_TO_RIGHT_MARK: char = '\u{200e}';
const RIGHT_TO_LEFT_MARK: char = '\u{200f}';

/// Which date component comes first in an export. Fixed for a whole transcript.
#[derive(Clone, Copy, Debug, Eq, Hash, PartialEq)]
pub enum DateOrder {
    DayFirst,
    MonthFirst,
    YearFirst,
}

#[derive(Clone, Copy, Debug, Default, Eq, Hash, PartialEq)]
pub struct ParseOptions {
    /// Bind attachment placeholders to the archive passed to [`parse`].
    pub resolve_attachments: bool,
    /// Inferred from the transcript when `None`.
    pub date_order: Option<DateOrder>,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
enum Meridiem {
    Am,
    Pm,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RawDate {
    parts: [u32; 3],
    first_len: usize,
}

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
struct RawTime {
    hour: u32,
    minute: u32,
    second: u32,
    meridiem: Option<Meridiem>,
}

/// A line shaped like the start of a message. The timestamp isn't checked yet.
#[derive(Debug)]
struct StartLine<'a> {
    date: RawDate,
    time: RawTime,
    rest: &'a str,
}

enum Line<'a> {
    Start(StartLine<'a>),
    Other,
}

struct Pending<'a> {
    timestamp: NaiveDateTime,
    author: &'a str,
    body: String,
}

enum State<'a> {
    Idle,
    Open(Pending<'a>),
}

/// Parses a transcript into messages, in line order.
///
/// Parsing is best effort: lines that can't be attached to any message are dropped, and it
/// never fails.
pub fn parse(text: &str, options: &ParseOptions, archive: Option<&Arc<Archive>>) -> Vec<Message> {
    let source = archive
        .filter(|_| options.resolve_attachments)
        .map(|archive| Arc::downgrade(archive) as Weak<dyn AttachmentSource>);

    let lines = text
        .lines()
        .map(|line| (line, classify(line)))
        .collect::<Vec<_>>();
    let order = options.date_order.unwrap_or_else(|| {
        infer_date_order(lines.iter().filter_map(|(_, line)| match line {
            Line::Start(start) => Some(&start.date),
            Line::Other => None,
        }))
    });

    let mut messages = Vec::new();
    let mut dropped = 0;
    let mut state = State::Idle;
    for (text, line) in &lines {
        let start = match line {
            Line::Start(start) => timestamp(&start.date, &start.time, order)
                .map(|timestamp| (timestamp, start.rest)),
            Line::Other => None,
        };
        state = match (state, start) {
            (State::Open(pending), Some((timestamp, rest))) => {
                messages.push(finish(pending, source.as_ref()));
                State::Open(open(timestamp, rest))
            }
            (State::Idle, Some((timestamp, rest))) => State::Open(open(timestamp, rest)),
            (State::Open(mut pending), None) => {
                pending.body.push('\n');
                pending.body.push_str(text);
                State::Open(pending)
            }
            (State::Idle, None) => {
                if !text.trim().is_empty() {
                    dropped += 1;
                }
                State::Idle
            }
        };
    }
    if let State::Open(pending) = state {
        messages.push(finish(pending, source.as_ref()));
    }

    tracing::debug!(messages = messages.len(), dropped, ?order, "parsed transcript");
    messages
}

fn open(timestamp: NaiveDateTime, rest: &str) -> Pending<'_> {
    let (author, body) = split_author(rest).unwrap_or((SYSTEM_AUTHOR, rest));
    Pending {
        timestamp,
        author,
        body: body.to_owned(),
    }
}

fn finish(pending: Pending<'_>, source: Option<&Weak<dyn AttachmentSource>>) -> Message {
    let attachment = source.and_then(|source| {
        attachment_filename(&pending.body)
            .map(|filename| AttachmentRef::new(filename, source.clone()))
    });
    Message {
        timestamp: pending.timestamp,
        author: pending.author.into(),
        body: pending.body.into(),
        attachment,
    }
}

/// Splits `Alice: hi` at the first `": "`. The author is never empty.
fn split_author(rest: &str) -> Option<(&str, &str)> {
    let skip = rest.chars().next()?.len_utf8();
    let idx = rest[skip..].find(": ")? + skip;
    Some((&rest[..idx], &rest[idx + 2..]))
}

fn classify(line: &str) -> Line<'_> {
    match start_line(line) {
        Ok((_, start)) => Line::Start(start),
        Err(_) => Line::Other,
    }
}

fn start_line(input: &str) -> IResult<&str, StartLine<'_>> {
    use nom::{
        branch::alt,
        bytes::complete::{tag, take_while},
        character::complete::{char, one_of},
        combinator::{opt, rest, verify},
        sequence::tuple,
    };

    let (input, (_, _, date, _, _, _, time, _, _, _, rest)) = tuple((
        take_while(|c: char| c == LEFT_TO_RIGHT_MARK || c == RIGHT_TO_LEFT_MARK),
        opt(char('[')),
        date,
        opt(one_of(",.")),
        char(' '),
        take_while(|c: char| !c.is_ascii_digit()),
        time,
        opt(char(']')),
        opt(alt((tag(" -"), tag(":")))),
        char(' '),
        verify(rest, |rest: &str| !rest.is_empty()),
    ))(input)?;
    Ok((input, StartLine { date, time, rest }))
}

fn digits<'a>(max: usize) -> impl FnMut(&'a str) -> IResult<&'a str, &'a str> {
    nom::bytes::complete::take_while_m_n(1, max, |c: char| c.is_ascii_digit())
}

fn number<'a>(max: usize) -> impl FnMut(&'a str) -> IResult<&'a str, u32> {
    nom::combinator::map_res(digits(max), str::parse)
}

fn date(input: &str) -> IResult<&str, RawDate> {
    use nom::{
        character::complete::{char, one_of},
        combinator::{map_res, opt},
        sequence::{pair, tuple},
    };

    let separator = || pair(one_of("-/."), opt(char(' ')));
    let first = map_res(digits(4), |digits: &str| {
        digits.parse::<u32>().map(|n| (n, digits.len()))
    });
    let (input, ((first, first_len), _, second, _, third)) =
        tuple((first, separator(), number(4), separator(), number(4)))(input)?;
    Ok((
        input,
        RawDate {
            parts: [first, second, third],
            first_len,
        },
    ))
}

fn time(input: &str) -> IResult<&str, RawTime> {
    use nom::{
        character::complete::one_of,
        combinator::opt,
        sequence::{preceded, tuple},
    };

    let (input, (hour, _, minute, second, meridiem)) = tuple((
        number(2),
        one_of(".:"),
        number(2),
        opt(preceded(one_of(".:"), number(2))),
        opt(preceded(one_of(" \u{202f}\u{a0}"), meridiem)),
    ))(input)?;
    Ok((
        input,
        RawTime {
            hour,
            minute,
            second: second.unwrap_or(0),
            meridiem,
        },
    ))
}

/// `AM`, `p.m.`, `a. m.` and friends.
fn meridiem(input: &str) -> IResult<&str, Meridiem> {
    use nom::{
        character::complete::{char, one_of},
        combinator::opt,
        sequence::tuple,
    };

    let (input, (half, _, _, _, _)) = tuple((
        one_of("aApP"),
        opt(char('.')),
        opt(char(' ')),
        one_of("mM"),
        opt(char('.')),
    ))(input)?;
    let meridiem = match half {
        'a' | 'A' => Meridiem::Am,
        _ => Meridiem::Pm,
    };
    Ok((input, meridiem))
}

/// Works out the date order from every message start in the transcript.
///
/// A four-digit first component means year first. Otherwise a first component above 12 must be
/// a day, and a second component above 12 must be a day. If nothing gives it away, the day is
/// whichever component changes more often from one message to the next.
fn infer_date_order<'a>(dates: impl Iterator<Item = &'a RawDate> + Clone) -> DateOrder {
    if dates.clone().any(|date| date.first_len > 2) {
        return DateOrder::YearFirst;
    }
    if dates.clone().any(|date| date.parts[0] > 12) {
        return DateOrder::DayFirst;
    }
    if dates.clone().any(|date| date.parts[1] > 12) {
        return DateOrder::MonthFirst;
    }
    let (mut first_changes, mut second_changes) = (0, 0);
    let mut previous: Option<&RawDate> = None;
    for date in dates {
        if let Some(previous) = previous {
            first_changes += usize::from(previous.parts[0] != date.parts[0]);
            second_changes += usize::from(previous.parts[1] != date.parts[1]);
        }
        previous = Some(date);
    }
    if first_changes > second_changes {
        DateOrder::DayFirst
    } else {
        DateOrder::MonthFirst
    }
}

fn timestamp(date: &RawDate, time: &RawTime, order: DateOrder) -> Option<NaiveDateTime> {
    let [a, b, c] = date.parts;
    let (year, month, day) = match order {
        DateOrder::DayFirst => (c, b, a),
        DateOrder::MonthFirst => (c, a, b),
        DateOrder::YearFirst => (a, b, c),
    };
    let year = if year < 100 { year + 2000 } else { year };
    let hour = match time.meridiem {
        Some(_) if !(1..=12).contains(&time.hour) => return None,
        Some(Meridiem::Am) => time.hour % 12,
        Some(Meridiem::Pm) => time.hour % 12 + 12,
        None => time.hour,
    };
    NaiveDate::from_ymd_opt(i32::try_from(year).ok()?, month, day)?.and_hms_opt(
        hour,
        time.minute,
        time.second,
    )
}

/// The file named by an attachment placeholder, if the body is one.
///
/// iOS writes `<attached: 00000012-PHOTO-2020-06-07-15-13-20.jpg>`, Android writes
/// `IMG-20200607-WA0001.jpg (file attached)` or `report.pdf <attached>`. Only the start of the
/// first line is considered, since a caption may follow.
pub fn attachment_filename(body: &str) -> Option<&str> {
    let first_line = body.lines().next()?.trim_matches(|c: char| {
        c.is_whitespace() || c == LEFT_TO_RIGHT_MARK || c == RIGHT_TO_LEFT_MARK
    });
    ios_attachment(first_line)
        .or_else(|_| android_attachment(first_line))
        .ok()
        .map(|(_, filename)| filename)
        .filter(|filename| !filename.is_empty())
}

fn ios_attachment(input: &str) -> IResult<&str, &str> {
    use nom::{
        bytes::complete::is_not, character::complete::char, combinator::map_opt,
        sequence::delimited,
    };

    map_opt(
        delimited(char('<'), is_not(">"), char('>')),
        |inner: &str| inner.split_once(':').map(|(_, filename)| filename.trim()),
    )(input)
}

fn android_attachment(input: &str) -> IResult<&str, &str> {
    use nom::{
        branch::alt,
        bytes::complete::{is_not, take_while1},
        character::complete::{char, multispace1},
        combinator::recognize,
        sequence::{delimited, terminated, tuple},
    };

    terminated(
        recognize(tuple((
            take_while1(|c: char| c.is_alphanumeric() || c == '_' || c == '-'),
            char('.'),
            take_while1(|c: char| c.is_alphanumeric() || c == '_'),
        ))),
        tuple((
            multispace1,
            alt((
                delimited(char('('), is_not(")"), char(')')),
                delimited(char('<'), is_not(">"), char('>')),
            )),
        )),
    )(input)
}
