//! `duet`: one-to-one chat in the terminal.
//!
//! A line-based front end over the client library. Lines starting with `/`
//! are commands; anything else is sent to the open conversation.
//!
//! ```bash
//! cargo run --bin duet -- --server http://127.0.0.1:5001 --user alice --token alice-token
//!
//! # Or via environment variables
//! DUET_USER=alice DUET_TOKEN=alice-token cargo run --bin duet
//! ```

use std::path::Path;
use std::process::ExitCode;
use std::sync::Arc;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing_appender::non_blocking::WorkerGuard;

use duet::api::HttpApi;
use duet::config::{CliArgs, ClientConfig};
use duet::error::ClientError;
use duet::events::EventStream;
use duet::session::{ChatSession, Notice};
use duet::view::ChatView;
use duet_proto::event::ServerEvent;
use duet_proto::message::UserId;
use duet_proto::user::UserSummary;

const HELP: &str = "\
commands:
  /users              list conversation partners
  /open <user>        open the conversation with <user>
  /older              load older messages
  /react <n> <emoji>  toggle a reaction on message <n>
  /fav <user>         toggle <user> as a favourite
  /image <url>        send an image
  /quit               leave
anything else is sent as a message";

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("error: {e}");
            return ExitCode::FAILURE;
        }
    };

    // Logs go to a file so they never interleave with the conversation.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());
    tracing::info!(server = %config.server_url, "duet starting");

    match run(config).await {
        Ok(()) => {
            tracing::info!("duet exiting");
            ExitCode::SUCCESS
        }
        Err(e) => {
            tracing::error!(error = %e, "duet failed");
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown so buffered
/// entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("duet.log");
    let log_path = file_path.unwrap_or(&default_path);

    let log_dir = log_path.parent()?;
    let file_name = log_path.file_name()?.to_str()?;

    let file_appender = tracing_appender::rolling::never(log_dir, file_name);
    let (non_blocking, guard) = tracing_appender::non_blocking(file_appender);

    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(level));

    tracing_subscriber::fmt()
        .with_writer(non_blocking)
        .with_env_filter(env_filter)
        .with_ansi(false)
        .init();

    Some(guard)
}

async fn run(config: ClientConfig) -> Result<(), Box<dyn std::error::Error>> {
    let (me, token) = config.identity()?;
    let api = HttpApi::new(config.api_url()?, token, config.request_timeout)?;
    let (stream, mut events) =
        EventStream::connect(&config.events_url(token)?, config.connect_timeout)
            .await
            .map_err(ClientError::from)?;
    let stream = Arc::new(stream);

    let (session, channels) = ChatSession::new(api, me.clone(), config.page_size);
    let session = Arc::new(session);

    let event_session = Arc::clone(&session);
    let event_task = tokio::spawn(async move {
        while let Some(event) = events.recv().await {
            if let Some(line) = event_session.view(|v| describe_event(v, &event)) {
                println!("{line}");
            }
            event_session.apply_event(event);
        }
        println!("* disconnected from server");
    });

    let outbox_stream = Arc::clone(&stream);
    let mut outbox = channels.outbox;
    let outbox_task = tokio::spawn(async move {
        while let Some(event) = outbox.recv().await {
            if let Err(e) = outbox_stream.send(&event).await {
                tracing::warn!(event = event.name(), error = %e, "could not send event");
            }
        }
    });

    let mut notices = channels.notices;
    let notice_task = tokio::spawn(async move {
        while let Some(notice) = notices.recv().await {
            println!("{}", describe_notice(&notice));
        }
    });

    println!("signed in as {me}. /help for commands");
    print_partners(&session.refresh_partners().await?);

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    while let Some(line) = lines.next_line().await? {
        match Command::parse(&line) {
            Command::Quit => break,
            Command::Empty => {}
            Command::Help => println!("{HELP}"),
            Command::Unknown(what) => println!("! unknown command {what:?}, try /help"),
            Command::Users => match session.refresh_partners().await {
                Ok(partners) => print_partners(&partners),
                Err(e) => println!("! {e}"),
            },
            Command::Open(partner) => match session.open_conversation(&partner).await {
                Ok(()) => session.view(print_history),
                Err(e) => println!("! {e}"),
            },
            Command::Older => match session.load_older().await {
                Ok(0) => println!("* no older messages"),
                Ok(_) => session.view(print_history),
                Err(e) => println!("! {e}"),
            },
            Command::React(index, emoji) => {
                let target = session.view(|v| {
                    index
                        .checked_sub(1)
                        .and_then(|i| v.messages().get(i))
                        .map(|m| m.id)
                });
                match target {
                    Some(id) => report(session.toggle_reaction(id, &emoji).await),
                    None => println!("! no message {index}"),
                }
            }
            Command::Favourite(user) => match session.toggle_favourite(&user).await {
                Ok(true) => println!("* {user} added to favourites"),
                Ok(false) => println!("* {user} removed from favourites"),
                Err(e) => report::<()>(Err(e)),
            },
            Command::Image(url) => report(session.send(None, Some(url)).await.map(drop)),
            Command::Send(text) => report(session.send(Some(text), None).await.map(drop)),
        }
    }

    stream.close().await;
    event_task.abort();
    outbox_task.abort();
    notice_task.abort();
    Ok(())
}

/// Prints errors the session does not already announce as notices.
fn report<T>(result: Result<T, ClientError>) {
    if let Err(e) = result
        && !matches!(e, ClientError::Api(_))
    {
        println!("! {e}");
    }
}

/// One line of user input.
#[derive(Debug, PartialEq, Eq)]
enum Command {
    Empty,
    Help,
    Quit,
    Users,
    Older,
    Open(UserId),
    React(usize, String),
    Favourite(UserId),
    Image(String),
    Send(String),
    Unknown(String),
}

impl Command {
    fn parse(line: &str) -> Self {
        let line = line.trim();
        if line.is_empty() {
            return Self::Empty;
        }
        let Some(rest) = line.strip_prefix('/') else {
            return Self::Send(line.to_string());
        };
        let mut words = rest.split_whitespace();
        let name = words.next().unwrap_or_default();
        let args: Vec<&str> = words.collect();
        match (name, args.as_slice()) {
            ("help", []) => Self::Help,
            ("quit" | "q", []) => Self::Quit,
            ("users", []) => Self::Users,
            ("older", []) => Self::Older,
            ("open", [user]) => Self::Open(UserId::new(*user)),
            ("fav", [user]) => Self::Favourite(UserId::new(*user)),
            ("image", [url]) => Self::Image((*url).to_string()),
            ("react", [n, emoji]) => n
                .parse()
                .map_or_else(|_| Self::Unknown(line.to_string()), |n| {
                    Self::React(n, (*emoji).to_string())
                }),
            _ => Self::Unknown(line.to_string()),
        }
    }
}

fn print_partners(partners: &[UserSummary]) {
    if partners.is_empty() {
        println!("* nobody else is here yet");
    }
    for p in partners {
        let star = if p.is_favourite { "*" } else { " " };
        println!("{star} {} ({})", p.id, p.full_name);
    }
}

fn print_history(view: &ChatView) {
    let Some(partner) = view.partner() else {
        return;
    };
    println!("--- {partner}{} ---", if view.is_online(partner) { " (online)" } else { "" });
    if view.has_more() {
        println!("    /older for earlier messages");
    }
    for (i, m) in view.messages().iter().enumerate() {
        let body = m.text.as_deref().or(m.image.as_deref()).unwrap_or_default();
        let mut line = format!("[{}] {}: {body}", i + 1, m.sender_id);
        if m.sender_id == *view.me() {
            line.push_str(&format!(" ({})", m.status));
        }
        if !m.reactions.is_empty() {
            let emojis: Vec<&str> = m.reactions.iter().map(|r| r.emoji.as_str()).collect();
            line.push_str(&format!(" [{}]", emojis.join(" ")));
        }
        println!("{line}");
    }
}

/// Line to show for an incoming event, judged against the view before the
/// event is merged.
fn describe_event(view: &ChatView, event: &ServerEvent) -> Option<String> {
    match event {
        ServerEvent::NewMessage(m) if view.partner() == Some(&m.sender_id) => {
            let body = m.text.as_deref().or(m.image.as_deref()).unwrap_or_default();
            Some(format!("{}: {body}", m.sender_id))
        }
        ServerEvent::ReadReceipt { reader_id, .. } if view.partner() == Some(reader_id) => {
            Some(format!("* {reader_id} read your messages"))
        }
        _ => None,
    }
}

fn describe_notice(notice: &Notice) -> String {
    match notice {
        Notice::Error {
            action,
            reason,
            retryable,
        } => {
            let hint = if *retryable { ", try again" } else { "" };
            format!("! could not {action}: {reason}{hint}")
        }
        Notice::Incoming { from } => format!("* new message from {from}"),
        Notice::Server(reason) => format!("! server: {reason}"),
    }
}
