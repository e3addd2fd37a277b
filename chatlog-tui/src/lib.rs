use chatlog_export::{LoadEvent, Session};
use crossterm::event::{Event, KeyEventKind};
use tokio::{sync::mpsc, time::Instant};

mod app;
pub mod keymap;
mod message_list;

pub use app::{default_keymap, resolve_sender, Action, App, Flow, Resolved};
pub use message_list::MessageListView;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Keymap(#[from] keymap::KeymapError),
}

pub async fn run(
    session: Session,
    loads_tx: mpsc::UnboundedSender<LoadEvent>,
    loads_rx: mpsc::UnboundedReceiver<LoadEvent>,
) -> Result<(), Error> {
    let (resolutions_tx, resolutions_rx) = mpsc::unbounded_channel();
    let app = App::new(session, loads_tx, resolutions_tx)?;
    let terminal = ratatui::init();
    let res = run_inner(terminal, app, loads_rx, resolutions_rx).await;
    ratatui::restore();
    res
}

async fn run_inner(
    mut term: ratatui::DefaultTerminal,
    mut app: App,
    mut loads: mpsc::UnboundedReceiver<LoadEvent>,
    mut resolutions: mpsc::UnboundedReceiver<Resolved>,
) -> Result<(), Error> {
    use futures::stream::StreamExt;

    let mut term_events = crossterm::event::EventStream::new();
    loop {
        term.draw(|frame| app.draw(frame))?;
        let deadline = app.key_deadline();
        tokio::select! {
            event = term_events.next() => match event {
                Some(Ok(Event::Key(key))) if key.kind == KeyEventKind::Press => {
                    if app.handle_key(key.into()) == Flow::Quit {
                        break;
                    }
                }
                Some(Ok(event)) => tracing::trace!("{event:?}"),
                Some(Err(err)) => tracing::warn!("{err}"),
                None => {
                    tracing::info!("term events stream stopped, shutting down");
                    break;
                }
            },
            Some(event) = loads.recv() => app.handle_load(event),
            Some(resolved) = resolutions.recv() => app.handle_resolution(resolved),
            () = sleep_until(deadline) => app.expire_keys(),
        }
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}
