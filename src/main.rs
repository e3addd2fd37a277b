use std::path::PathBuf;

use chatlog_common::{Alignment, ViewModel};
use chatlog_export::{DateOrder, Document, FileHandle, MediaType, Session};
use clap::Parser;
use tokio::sync::mpsc;
use tracing_subscriber::prelude::*;

/// Browse an exported WhatsApp chat.
#[derive(Debug, Parser)]
#[command(version)]
struct Args {
    /// Transcript (`.txt`) or export archive (`.zip`) to open.
    file: Option<PathBuf>,
    /// Declared media type of FILE, instead of guessing from its extension.
    #[arg(long)]
    media_type: Option<String>,
    /// First message to show (1-based).
    #[arg(long, default_value = "")]
    start: String,
    /// Last message to show (1-based).
    #[arg(long, default_value = "")]
    end: String,
    /// Participant whose messages are shown as sent.
    #[arg(long)]
    active_user: Option<String>,
    /// Read dates as day/month/year.
    #[arg(long, conflicts_with = "month_first")]
    day_first: bool,
    /// Read dates as month/day/year.
    #[arg(long)]
    month_first: bool,
    /// Print the selected messages instead of starting the viewer.
    #[arg(long, requires = "file")]
    dump: bool,
    #[arg(long, env = "CHATLOG_LOG_FILE", default_value = "chatlog-viewer.log")]
    log_file: PathBuf,
}

impl Args {
    fn date_order(&self) -> Option<DateOrder> {
        if self.day_first {
            Some(DateOrder::DayFirst)
        } else if self.month_first {
            Some(DateOrder::MonthFirst)
        } else {
            None
        }
    }

    fn file_handle(&self) -> Option<FileHandle> {
        let handle = FileHandle::new(self.file.clone()?);
        Some(match &self.media_type {
            Some(media_type) => handle.with_media_type(MediaType::new(media_type.as_str())),
            None => handle,
        })
    }
}

#[tokio::main]
async fn main() -> color_eyre::Result<()> {
    color_eyre::install()?;
    let args = Args::parse();
    let log_file = std::sync::Mutex::new(std::fs::File::create(&args.log_file)?);
    tracing_subscriber::registry()
        .with(tracing_subscriber::fmt::layer().with_writer(log_file))
        .with(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let mut session = Session::new(args.date_order());
    if let Some(file) = args.file_handle() {
        session.install(Document::open(&file).await?);
    }
    session.apply_window_input(&args.start, &args.end);
    if let Some(name) = &args.active_user {
        if !session.view_mut().select_active_user(name) {
            tracing::warn!(%name, "not a participant, keeping {:?}", session.view().active_user());
        }
    }

    if args.dump {
        dump(session.view()).await;
        return Ok(());
    }

    let (tx, rx) = mpsc::unbounded_channel();
    chatlog_tui::run(session, tx, rx).await?;
    Ok(())
}

async fn dump(view: &ViewModel) {
    let first = view.first_visible_number();
    for (idx, message) in view.visible().iter().enumerate() {
        let marker = match view.alignment(message) {
            Alignment::System => '*',
            Alignment::Outgoing => '>',
            Alignment::Incoming => '<',
        };
        println!(
            "{:>5} {} {marker} {}: {}",
            first + idx,
            message.timestamp.format("%Y-%m-%d %H:%M:%S"),
            message.author,
            message.body,
        );
        if let Some(attachment) = &message.attachment {
            match attachment.resolve().await {
                Some(bytes) => println!("      [{}: {} bytes]", attachment.filename, bytes.len()),
                None => println!("      [{}: missing]", attachment.filename),
            }
        }
    }
}
