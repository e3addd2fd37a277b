use chatlog_common::{Alignment, Message, ViewModel};
use ratatui::{
    buffer::Buffer,
    layout::{self, Rect},
    style::{Color, Modifier, Style, Stylize},
    text::{Line, Span, Text},
    widgets::{Block, List, ListItem, ListState, StatefulWidget, Widget},
};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M";

#[derive(Debug)]
pub struct MessageListView {
    list_state: ListState,
    list_items: List<'static>,
    len: usize,
}

impl Default for MessageListView {
    fn default() -> Self {
        Self {
            list_state: Default::default(),
            list_items: List::default()
                .highlight_symbol("->")
                .highlight_style(Style::new().add_modifier(Modifier::REVERSED)),
            len: 0,
        }
    }
}

impl MessageListView {
    pub fn select_next(&mut self) {
        self.list_state.select_next();
    }

    pub fn select_prev(&mut self) {
        self.list_state.select_previous();
    }

    pub fn select_first(&mut self) {
        self.list_state.select_first();
    }

    pub fn select_last(&mut self) {
        self.list_state.select_last();
    }

    /// The selected message, out of the view it was last redrawn from.
    pub fn selected<'v>(&self, view: &'v ViewModel) -> Option<&'v Message> {
        let visible = view.visible();
        self.list_state
            .selected()
            .map(|idx| idx.min(visible.len().saturating_sub(1)))
            .and_then(|idx| visible.get(idx))
    }

    /// Rebuilds the list items after the messages, window or active user change.
    pub fn redraw(&mut self, view: &ViewModel) {
        let first = view.first_visible_number();
        let items = view
            .visible()
            .iter()
            .enumerate()
            .map(|(idx, message)| message_item(first + idx, message, view.alignment(message)))
            .collect::<Vec<_>>();
        let selected = match (self.list_state.selected(), items.len()) {
            (_, 0) => None,
            (Some(idx), len) => Some(idx.min(len - 1)),
            (None, _) => Some(0),
        };
        self.len = items.len();
        self.list_state = std::mem::take(&mut self.list_state).with_selected(selected);
        self.list_items = std::mem::take(&mut self.list_items)
            .items(items)
            .block(Block::bordered().title(format!(" Messages ({}) ", view.messages().len())));
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }
}

fn message_item(number: usize, message: &Message, alignment: Alignment) -> ListItem<'static> {
    let (align, color) = match alignment {
        Alignment::System => (layout::Alignment::Center, Color::DarkGray),
        Alignment::Outgoing => (layout::Alignment::Right, Color::Green),
        Alignment::Incoming => (layout::Alignment::Left, Color::Cyan),
    };
    let header = Line::from(vec![
        Span::raw(format!("#{number} ")).dim(),
        Span::raw(message.author.to_string()).fg(color).bold(),
        Span::raw(format!(" {}", message.timestamp.format(TIMESTAMP_FORMAT))).dim(),
    ]);
    let mut lines = vec![header];
    lines.extend(message.body.lines().map(|line| Line::raw(line.to_owned())));
    if let Some(attachment) = &message.attachment {
        lines.push(Line::from(format!("[attachment: {}]", attachment.filename)).italic());
    }
    let lines = lines
        .into_iter()
        .map(|line| line.alignment(align))
        .collect::<Vec<_>>();
    ListItem::new(Text::from(lines))
}

impl Widget for &mut MessageListView {
    fn render(self, area: Rect, buffer: &mut Buffer) {
        StatefulWidget::render(&self.list_items, area, buffer, &mut self.list_state);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use chatlog_common::{Message, Window};
    use chrono::NaiveDateTime;

    use super::*;

    fn view(authors: &[&str]) -> ViewModel {
        let messages = authors
            .iter()
            .map(|author| Message {
                timestamp: NaiveDateTime::default(),
                author: (*author).into(),
                body: "hi".into(),
                attachment: None,
            })
            .collect::<Arc<[Message]>>();
        let mut view = ViewModel::new();
        view.set_messages(messages);
        view
    }

    #[test]
    fn selection_is_kept_within_window() {
        let mut view = view(&["A", "B", "A", "B"]);
        let mut list = MessageListView::default();
        list.redraw(&view);
        assert_eq!(list.len(), 4);
        list.select_last();
        list.redraw(&view);
        view.apply_window(Window::new(1, 2));
        list.redraw(&view);
        assert_eq!(list.len(), 2);
        assert_eq!(list.selected(&view).map(|m| &*m.author), Some("B"));
    }

    #[test]
    fn empty_view_has_no_selection() {
        let view = ViewModel::new();
        let mut list = MessageListView::default();
        list.redraw(&view);
        assert!(list.is_empty());
        assert!(list.selected(&view).is_none());
    }
}
