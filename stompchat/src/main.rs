//! `StompChat`, a line-mode chat client.
//!
//! Joins the lobby (or `--room`) on a STOMP broker and prints the chat as it
//! arrives. Every stdin line is sent; `/w <user> <text>` whispers, `/more`
//! loads older history, `/who` prints the roster, `/quit` leaves.
//!
//! ```bash
//! # Anonymous lobby on a local broker
//! cargo run --bin stompchat
//!
//! # Logged in, in room 12, with reconnects
//! STOMPCHAT_ACCESS_TOKEN=... cargo run --bin stompchat -- \
//!     --url ws://127.0.0.1:8080/ws --user alice --room 12 --reconnect-attempts 5
//! ```

use std::collections::HashMap;
use std::path::Path;
use std::process::ExitCode;

use clap::Parser;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::time::Instant;
use tracing_appender::non_blocking::WorkerGuard;

use stompchat::config::{CliArgs, ClientConfig};
use stompchat::connection::{ConnectionManager, ConnectionState, SessionHandle};
use stompchat::display;
use stompchat::pagination::{FetchOutcome, HttpHistoryBackend, PaginationFetcher};
use stompchat::router::{self, RejectReason, SendOutcome};
use stompchat::transport::ws::WsConnector;
use stompchat_proto::message::MessageKey;

#[tokio::main]
async fn main() -> ExitCode {
    let cli = CliArgs::parse();

    let config = match ClientConfig::load(&cli) {
        Ok(c) => c,
        Err(e) => {
            eprintln!("Warning: failed to load config file: {e}");
            ClientConfig::default()
        }
    };

    // Logs go to a file; stdout carries the chat.
    let _log_guard = init_logging(&cli.log_level, cli.log_file.as_deref());

    tracing::info!("stompchat starting");

    let backend = match config
        .history_base()
        .map_err(|e| e.to_string())
        .and_then(|base| {
            HttpHistoryBackend::new(base, config.request_timeout).map_err(|e| e.to_string())
        }) {
        Ok(backend) => backend,
        Err(e) => {
            eprintln!("Error: {e}");
            return ExitCode::FAILURE;
        }
    };

    let manager = ConnectionManager::new(WsConnector, config.connection_config());
    let fetcher = PaginationFetcher::new(backend);

    let result = run(&manager, &fetcher, &config).await;

    tracing::info!("stompchat exiting");
    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e}");
            ExitCode::FAILURE
        }
    }
}

/// Initialize file-based logging.
///
/// Returns a [`WorkerGuard`] that must be held until shutdown to ensure all
/// buffered log entries are flushed.
fn init_logging(level: &str, file_path: Option<&Path>) -> Option<WorkerGuard> {
    let default_path = std::env::temp_dir().join("stompchat.log");
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

/// One stdin line.
#[derive(Debug, PartialEq, Eq)]
enum Input<'a> {
    Quit,
    Who,
    More,
    /// Anything else, exactly as typed.
    Send(&'a str),
}

impl<'a> Input<'a> {
    fn parse(line: &'a str) -> Self {
        match line.trim_end() {
            "/quit" => Self::Quit,
            "/who" => Self::Who,
            "/more" => Self::More,
            _ => Self::Send(line),
        }
    }
}

/// What the terminal has already shown for the current session.
#[derive(Default)]
struct View {
    /// How many messages with each key have been printed.
    printed: HashMap<MessageKey, usize>,
    roster: Vec<String>,
}

impl View {
    /// Print whatever changed in `session`'s store since the last call.
    fn refresh(&mut self, session: &SessionHandle, config: &ClientConfig) {
        let me = session.auth().user_id();
        let window = session.store().read();

        // Unnumbered repeats share a key, so count occurrences.
        let mut seen: HashMap<MessageKey, usize> = HashMap::new();
        let fresh: Vec<_> = window
            .messages()
            .iter()
            .filter(|m| {
                let key = m.key();
                let printed = self.printed.get(&key).copied().unwrap_or(0);
                let nth = seen.entry(key).or_default();
                *nth += 1;
                *nth > printed
            })
            .collect();
        // A page landed ahead of what was already shown.
        let older = !self.printed.is_empty()
            && fresh
                .first()
                .is_some_and(|first| window.messages().first() == Some(*first));
        if older {
            println!("-- older messages --");
        }
        for message in fresh {
            println!(
                "{}",
                display::format_message(message, me, &config.timestamp_format)
            );
            *self.printed.entry(message.key()).or_default() += 1;
        }

        if window.roster() != self.roster.as_slice() {
            self.roster = window.roster().to_vec();
            println!("* {}", display::format_roster(&self.roster, me));
        }
    }
}

/// Read stdin and drive one session until `/quit`, EOF, or a drop that
/// exhausts the reconnect policy.
async fn run<C: stompchat::transport::Connector>(
    manager: &ConnectionManager<C>,
    fetcher: &PaginationFetcher<HttpHistoryBackend>,
    config: &ClientConfig,
) -> std::io::Result<()> {
    let scope = config.scope();
    let auth = config.auth();
    let policy = config.reconnect;

    let mut session = manager.activate(scope.clone(), auth.clone());
    let mut revisions = session.store().subscribe();
    let mut states = manager.subscribe_state();
    let mut view = View::default();
    let mut attempts = 0u32;
    let mut reconnect_at: Option<Instant> = None;

    println!("* joining {scope} as {}", auth.user_id().unwrap_or("guest"));

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    loop {
        tokio::select! {
            line = lines.next_line() => {
                let Some(line) = line? else { break };
                match Input::parse(&line) {
                    Input::Quit => break,
                    Input::Who => println!("* {}", display::format_roster(&view.roster, auth.user_id())),
                    Input::More => more(fetcher, &session).await,
                    Input::Send(text) => report(router::send(text, Some(&session)).await),
                }
            }
            changed = revisions.changed() => {
                if changed.is_ok() {
                    view.refresh(&session, config);
                }
            }
            changed = states.changed() => {
                if changed.is_err() {
                    break;
                }
                let state = *states.borrow_and_update();
                println!("* {state}");
                match state {
                    ConnectionState::Connected => attempts = 0,
                    ConnectionState::Disconnected if attempts < policy.max_attempts => {
                        attempts += 1;
                        let delay = policy.delay(attempts);
                        println!("* reconnecting in {}ms ({attempts}/{})", delay.as_millis(), policy.max_attempts);
                        reconnect_at = Some(Instant::now() + delay);
                    }
                    ConnectionState::Disconnected if policy.max_attempts > 0 => {
                        println!("* giving up after {attempts} attempts");
                        break;
                    }
                    _ => {}
                }
            }
            () = sleep_until(reconnect_at), if reconnect_at.is_some() => {
                reconnect_at = None;
                tracing::info!(attempt = attempts, "reconnecting");
                session = manager.activate(scope.clone(), auth.clone());
                revisions = session.store().subscribe();
                view = View::default();
            }
        }
    }

    if manager.deactivate(&session) {
        let mut states = manager.subscribe_state();
        let wait = states.wait_for(|s| *s == ConnectionState::Disconnected);
        // Bounded by the receipt timeout inside the driver, plus slack.
        let _ = tokio::time::timeout(config.receipt_timeout * 2, wait).await;
    }
    Ok(())
}

async fn sleep_until(deadline: Option<Instant>) {
    if let Some(deadline) = deadline {
        tokio::time::sleep_until(deadline).await;
    }
}

async fn more(fetcher: &PaginationFetcher<HttpHistoryBackend>, session: &SessionHandle) {
    match fetcher.fetch_older(session).await {
        Ok(FetchOutcome::Applied { added, has_more }) => {
            let tail = if has_more { "" } else { " (start of history)" };
            println!("* loaded {added} older messages{tail}");
        }
        Ok(FetchOutcome::Skipped(reason)) => println!("* nothing to load ({reason:?})"),
        Ok(FetchOutcome::Discarded) => println!("* history changed while loading, try again"),
        Err(e) => println!("* could not load history: {e}"),
    }
}

fn report(outcome: SendOutcome) {
    let SendOutcome::Rejected(reason) = outcome else {
        return;
    };
    let text = match reason {
        RejectReason::EmptyInput => return,
        RejectReason::NoSession | RejectReason::NotConnected => "not connected".to_string(),
        RejectReason::MalformedDirect(e) => format!("{e}; usage: /w <user> <message>"),
        RejectReason::DirectRequiresLogin => "log in to send direct messages".to_string(),
        RejectReason::Transport => "message could not be sent".to_string(),
    };
    println!("* {text}");
}
