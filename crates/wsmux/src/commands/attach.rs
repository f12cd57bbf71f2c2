//! `wsmux attach`: relay stdin and stdout through one registry session.
//!
//! The registry lives for the duration of the command, so `:detach` followed
//! by `:attach` within the grace period exercises connection reuse, and a
//! late `:attach` opens a fresh connection.

use std::time::Duration;

use tabled::Tabled;
use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, Stdout};
use tokio::sync::mpsc;
use tracing::debug;
use wsmux_api::{CloseReason, Payload, WsConnector};
use wsmux_core::{ConnectionId, ConnectionRegistry, Listener, SessionHandle, SessionInfo};

use crate::cli::{AttachArgs, GlobalOpts, OutputFormat};
use crate::config::{self, ResolvedEndpoint};
use crate::error::CliError;
use crate::output::{self, Painter};

// ── Relay events ────────────────────────────────────────────────────

#[derive(Debug)]
enum Relay {
    Open,
    Message(Payload),
    Error(String),
    Closed(CloseReason),
}

/// A listener event tagged with the attach that produced it.
#[derive(Debug)]
struct Tagged {
    generation: u64,
    event: Relay,
}

fn relay_listener(generation: u64, tx: &mpsc::UnboundedSender<Tagged>) -> Listener {
    let (open, message, error, close) = (tx.clone(), tx.clone(), tx.clone(), tx.clone());
    Listener::new()
        .on_open(move || {
            let _ = open.send(Tagged {
                generation,
                event: Relay::Open,
            });
        })
        .on_message(move |payload| {
            let _ = message.send(Tagged {
                generation,
                event: Relay::Message(payload.clone()),
            });
        })
        .on_error(move |e| {
            let _ = error.send(Tagged {
                generation,
                event: Relay::Error(e.to_string()),
            });
        })
        .on_close(move |reason| {
            let _ = close.send(Tagged {
                generation,
                event: Relay::Closed(reason.clone()),
            });
        })
}

// ── Control lines ───────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Control {
    Detach,
    Attach,
    Stats,
    Quit,
}

impl Control {
    fn parse(line: &str) -> Option<Self> {
        match line.trim() {
            ":detach" => Some(Self::Detach),
            ":attach" => Some(Self::Attach),
            ":stats" => Some(Self::Stats),
            ":quit" | ":q" => Some(Self::Quit),
            _ => None,
        }
    }
}

// ── Table row ───────────────────────────────────────────────────────

#[derive(Tabled)]
struct SessionRow {
    #[tabled(rename = "Key")]
    key: String,
    #[tabled(rename = "Connection")]
    connection: String,
    #[tabled(rename = "State")]
    state: &'static str,
    #[tabled(rename = "Refs")]
    refs: usize,
    #[tabled(rename = "Closing")]
    closing: &'static str,
    #[tabled(rename = "Opened")]
    opened: String,
}

impl From<&SessionInfo> for SessionRow {
    fn from(s: &SessionInfo) -> Self {
        let id = s.connection_id.to_string();
        Self {
            key: s.key.clone(),
            connection: id.chars().take(8).collect(),
            state: s.state,
            refs: s.ref_count,
            closing: if s.close_pending { "pending" } else { "" },
            opened: s.opened_at.format("%H:%M:%S").to_string(),
        }
    }
}

// ── Session state ───────────────────────────────────────────────────

struct Session {
    registry: ConnectionRegistry<WsConnector>,
    endpoint: ResolvedEndpoint,
    key: String,
    grace: Duration,
    events: mpsc::UnboundedSender<Tagged>,
    generation: u64,
    handle: Option<SessionHandle>,
    /// Whether the current attach has seen its transport open.
    opened: bool,
    last_connection: Option<ConnectionId>,
}

impl Session {
    /// Attach a new consumer. Returns `true` if an existing connection was
    /// reused.
    fn attach(&mut self) -> bool {
        self.generation += 1;
        let listener = relay_listener(self.generation, &self.events);
        let handle =
            self.registry
                .attach_with_grace(self.key.clone(), &self.endpoint.url, listener, self.grace);

        // A reused open transport will not report `Open` again.
        self.opened = handle.is_open();
        let reused = self.last_connection == Some(handle.connection_id());
        self.last_connection = Some(handle.connection_id());
        debug!(key = %self.key, connection_id = %handle.connection_id(), reused, "attached");
        self.handle = Some(handle);
        reused
    }

    fn detach(&mut self) -> bool {
        match self.handle.take() {
            Some(handle) => {
                handle.detach();
                true
            }
            None => false,
        }
    }

    fn connection_failed(&self, reason: String) -> CliError {
        CliError::ConnectionFailed {
            url: self.endpoint.url.to_string(),
            reason,
        }
    }
}

// ── Handler ─────────────────────────────────────────────────────────

pub async fn handle(args: AttachArgs, global: &GlobalOpts) -> Result<(), CliError> {
    let cfg = config::load(global)?;
    let endpoint = config::resolve_endpoint(&cfg, args.target.as_deref())
        .map_err(|e| CliError::from_config(e, &config::config_path(global)))?;

    if args.session.as_deref() == Some("") {
        return Err(CliError::Validation {
            field: "session".into(),
            reason: "session key must not be empty".into(),
        });
    }
    let key = endpoint.session_key(args.session.as_deref());

    let registry_config = cfg.registry_config();
    let grace = args.grace.map_or(registry_config.grace_period, Duration::from);
    let registry = ConnectionRegistry::with_websocket(registry_config, cfg.ws_config());
    let painter = Painter::new(global.color, global.quiet);

    let (tx, mut rx) = mpsc::unbounded_channel();
    let mut session = Session {
        registry: registry.clone(),
        endpoint,
        key,
        grace,
        events: tx,
        generation: 0,
        handle: None,
        opened: false,
        last_connection: None,
    };

    painter.status(&format!(
        "connecting to {} (session {})",
        session.endpoint.url, session.key
    ));
    session.attach();

    let mut stdout = tokio::io::stdout();
    let result = match wait_for_open(&mut session, &mut rx, &mut stdout).await {
        Ok(()) => {
            painter.status("connected; control lines: :detach :attach :stats :quit");
            relay(&mut session, &mut rx, &mut stdout, painter, global.output).await
        }
        Err(e) => Err(e),
    };

    session.detach();
    registry.shutdown();
    result
}

/// Block until the first attach opens, or fail with its error.
async fn wait_for_open(
    session: &mut Session,
    rx: &mut mpsc::UnboundedReceiver<Tagged>,
    stdout: &mut Stdout,
) -> Result<(), CliError> {
    let mut last_error = None;
    while !session.opened {
        let Some(Tagged { generation, event }) = rx.recv().await else {
            return Err(session.connection_failed("event channel closed".into()));
        };
        if generation != session.generation {
            continue;
        }
        match event {
            Relay::Open => session.opened = true,
            Relay::Message(payload) => write_payload(stdout, &payload).await?,
            Relay::Error(e) => last_error = Some(e),
            Relay::Closed(reason) => {
                return Err(session.connection_failed(last_error.unwrap_or_else(|| reason.to_string())));
            }
        }
    }
    Ok(())
}

/// Pump stdin lines out and session events in until quit, EOF or close.
async fn relay(
    session: &mut Session,
    rx: &mut mpsc::UnboundedReceiver<Tagged>,
    stdout: &mut Stdout,
    painter: Painter,
    format: OutputFormat,
) -> Result<(), CliError> {
    let mut stdin = BufReader::new(tokio::io::stdin()).lines();
    let mut last_error = None;

    loop {
        tokio::select! {
            line = stdin.next_line() => {
                let Some(line) = line? else {
                    painter.status("end of input");
                    return Ok(());
                };
                match Control::parse(&line) {
                    Some(Control::Quit) => return Ok(()),
                    Some(Control::Detach) => {
                        if session.detach() {
                            painter.status(&format!(
                                "detached; connection kept for {}",
                                humantime::format_duration(session.grace)
                            ));
                        } else {
                            painter.warn("not attached");
                        }
                    }
                    Some(Control::Attach) => {
                        if session.handle.is_some() {
                            painter.warn("already attached");
                        } else {
                            let reused = session.attach();
                            painter.status(if reused {
                                "re-attached to the existing connection"
                            } else {
                                "attached; opening a new connection"
                            });
                        }
                    }
                    Some(Control::Stats) => print_stats(&session.registry, format)?,
                    None => match &session.handle {
                        Some(handle) => {
                            if !handle.send(line) {
                                painter.warn("not connected; input dropped");
                            }
                        }
                        None => painter.warn("detached; type :attach first"),
                    },
                }
            }
            Some(Tagged { generation, event }) = rx.recv() => {
                if generation != session.generation || session.handle.is_none() {
                    continue;
                }
                match event {
                    Relay::Open => {
                        session.opened = true;
                        painter.status("connected");
                    }
                    Relay::Message(payload) => write_payload(stdout, &payload).await?,
                    Relay::Error(e) => {
                        painter.warn(&e);
                        last_error = Some(e);
                    }
                    Relay::Closed(reason) => {
                        if !session.opened {
                            return Err(session.connection_failed(
                                last_error.take().unwrap_or_else(|| reason.to_string()),
                            ));
                        }
                        painter.status(&format!("session closed ({reason})"));
                        return Ok(());
                    }
                }
            }
        }
    }
}

async fn write_payload(stdout: &mut Stdout, payload: &Payload) -> Result<(), CliError> {
    match payload {
        Payload::Text(text) => {
            stdout.write_all(text.as_bytes()).await?;
            if !text.ends_with('\n') {
                stdout.write_all(b"\n").await?;
            }
        }
        Payload::Binary(bytes) => stdout.write_all(bytes).await?,
    }
    stdout.flush().await?;
    Ok(())
}

fn print_stats(registry: &ConnectionRegistry<WsConnector>, format: OutputFormat) -> Result<(), CliError> {
    let sessions = registry.sessions();
    let out = output::render_list(
        format,
        &sessions,
        |s| SessionRow::from(s),
        |s| s.key.clone(),
    )?;
    output::print_output(&out, false);

    if matches!(format, OutputFormat::Table) {
        let stats = registry.stats();
        output::print_output(
            &format!(
                "{} session(s): {} active, {} idle, {} reference(s)",
                stats.sessions, stats.active, stats.idle, stats.total_refs
            ),
            false,
        );
    }
    Ok(())
}
