//! Main chat loop orchestration.
//!
//! Subscribes to the session topic, seeds the local transcript, then
//! alternates between user input and messages published by other
//! connections. Each turn runs through the reconciler: optimistic user
//! entry, streamed placeholder, then confirmation or removal.

use std::io::Write;
use std::time::Duration;

use anyhow::Result;
use console::style;
use futures_util::StreamExt;
use indicatif::{ProgressBar, ProgressStyle};
use tokio::sync::mpsc;
use tracing::{debug, warn};
use uuid::Uuid;

use chatline_core::chat::{EntryState, Finalization, MergeOutcome, Reconciler, TranscriptEntry};
use chatline_types::chat::{ChatMessage, ConnectionId, Sender};
use chatline_types::event::TopicEvent;

use super::banner::print_welcome_banner;
use super::client::{ChatClient, ChatRequest, ReplyEvent, TopicEvents};
use super::commands::{self, ChatCommand};
use super::input::{ChatInput, InputEvent};

const EVENT_BUFFER: usize = 64;
const RESUBSCRIBE_DELAY: Duration = Duration::from_secs(3);

/// Options for `chatline chat`.
#[derive(Debug, Clone)]
pub struct ChatOptions {
    pub server: String,
    pub session_id: Option<String>,
    pub connection_id: Option<String>,
    pub timezone: Option<String>,
}

/// What the subscription task hands to the chat loop.
#[derive(Debug)]
enum TopicUpdate {
    Event(TopicEvent),
    /// The subscription was re-established; events published while it was
    /// down are only in the stored transcript.
    Resubscribed,
}

/// Identity of this terminal within a session.
struct ChatSession {
    client: ChatClient,
    session_id: String,
    connection_id: ConnectionId,
    timezone: Option<String>,
}

/// Run the interactive chat loop against a server.
pub async fn run_chat_loop(options: ChatOptions) -> Result<()> {
    let session = ChatSession {
        client: ChatClient::new(options.server),
        session_id: non_blank(options.session_id).unwrap_or_else(|| Uuid::now_v7().to_string()),
        connection_id: ConnectionId::new(
            non_blank(options.connection_id).unwrap_or_else(|| format!("cli-{}", Uuid::now_v7())),
        ),
        timezone: non_blank(options.timezone),
    };

    // Subscribe before seeding so nothing published in between is missed;
    // the reconciler drops whatever the seed already contains.
    let (event_tx, mut event_rx) = mpsc::channel::<TopicUpdate>(EVENT_BUFFER);
    let events = session
        .client
        .subscribe(&session.session_id, &session.connection_id)
        .await?;
    let subscriber = tokio::spawn(forward_events(
        session.client.clone(),
        session.session_id.clone(),
        session.connection_id.clone(),
        events,
        event_tx,
    ));

    let seed = session.client.transcript(&session.session_id).await?;
    let mut reconciler = Reconciler::from_seed(&session.session_id, seed);

    print_welcome_banner(
        session.client.base_url(),
        &session.session_id,
        session.connection_id.as_str(),
        reconciler.len(),
    );
    print_transcript(&reconciler);

    let prompt = format!("  {} ", style("You >").green().bold());
    let (mut chat_input, mut writer) =
        ChatInput::new(prompt).map_err(|e| anyhow::anyhow!("Failed to initialize input: {e}"))?;

    loop {
        tokio::select! {
            input = chat_input.read_line() => match input {
                InputEvent::Eof => {
                    println!("\n  {}", style("Session ended.").dim());
                    break;
                }
                InputEvent::Interrupted => {
                    println!("\n  {}", style("Press Ctrl+D to exit, or keep chatting.").dim());
                }
                InputEvent::Message(text) if text.is_empty() => {}
                InputEvent::Message(text) => match commands::parse(&text) {
                    Some(ChatCommand::Help) => commands::print_help(),
                    Some(ChatCommand::Clear) => chat_input.clear(),
                    Some(ChatCommand::Exit) => {
                        println!("\n  {}", style("Session ended.").dim());
                        break;
                    }
                    Some(ChatCommand::History) => print_transcript(&reconciler),
                    Some(ChatCommand::Resync) => {
                        resync(&session, &mut reconciler).await;
                        print_transcript(&reconciler);
                    }
                    Some(ChatCommand::Unknown(name)) => {
                        println!(
                            "\n  {} Unknown command: {}. Type /help for available commands.\n",
                            style("?").yellow().bold(),
                            style(name).dim()
                        );
                    }
                    None => run_turn(&session, &mut reconciler, &text).await,
                },
            },

            Some(update) = event_rx.recv() => {
                let lines = match update {
                    TopicUpdate::Event(event) => {
                        merge_broadcast(&mut reconciler, &event).into_iter().collect()
                    }
                    TopicUpdate::Resubscribed => catch_up(&session, &mut reconciler).await,
                };
                for line in lines {
                    let _ = writeln!(writer, "{line}");
                }
            }
        }
    }

    subscriber.abort();
    chat_input.flush();
    Ok(())
}

/// Send one user turn and stream its reply into the transcript.
async fn run_turn(session: &ChatSession, reconciler: &mut Reconciler, text: &str) {
    let optimistic = reconciler.apply_optimistic(text);
    let spinner = thinking_spinner();

    let request = ChatRequest {
        session_id: &session.session_id,
        message: text,
        connection_id: &session.connection_id,
        timezone: session.timezone.as_deref(),
    };
    let mut replies = match session.client.send_turn(&request).await {
        Ok(replies) => replies,
        Err(err) => {
            spinner.finish_and_clear();
            eprintln!("\n  {} {err:#}", style("!").red().bold());
            reconciler.apply_finalize(optimistic, Finalization::Failed);
            // The server may have stored the user message before failing.
            resync(session, reconciler).await;
            return;
        }
    };

    let mut placeholder: Option<Uuid> = None;
    while let Some(item) = replies.next().await {
        match item {
            Ok(ReplyEvent::UserMessage(message)) => {
                reconciler.apply_finalize(optimistic, Finalization::Persisted(message));
            }
            Ok(ReplyEvent::TextDelta(delta)) => {
                if placeholder.is_none() {
                    spinner.finish_and_clear();
                    print!("\n  {} ", style("Assistant >").cyan().bold());
                }
                placeholder = Some(reconciler.apply_stream_delta(&delta));
                print!("{delta}");
                let _ = std::io::stdout().flush();
            }
            Ok(ReplyEvent::Done(stored)) => {
                spinner.finish_and_clear();
                let placeholder = placeholder.unwrap_or_else(|| reconciler.apply_stream_delta(""));
                let finalization = match stored {
                    Some(message) => Finalization::Persisted(message),
                    None => finalize_locally(session, reconciler, placeholder).await,
                };
                let outcome = reconciler.apply_finalize(placeholder, finalization);
                debug!(?outcome, "Reply finalized");
                println!();
                println!();
                return;
            }
            Ok(ReplyEvent::Error(message)) => {
                abandon_reply(reconciler, &spinner, placeholder, &message);
                return;
            }
            Err(err) => {
                abandon_reply(reconciler, &spinner, placeholder, &format!("{err:#}"));
                return;
            }
        }
    }

    abandon_reply(
        reconciler,
        &spinner,
        placeholder,
        "The connection closed before the reply finished.",
    );
}

/// Persist the streamed text ourselves when the server runs in client
/// finalize mode.
async fn finalize_locally(
    session: &ChatSession,
    reconciler: &Reconciler,
    placeholder: Uuid,
) -> Finalization {
    let text = reconciler
        .get(placeholder)
        .map(|entry| entry.text.clone())
        .unwrap_or_default();

    match session
        .client
        .finalize(
            &session.session_id,
            &session.connection_id,
            &text,
            session.timezone.as_deref(),
        )
        .await
    {
        Ok(message) => Finalization::Persisted(message),
        Err(err) => {
            eprintln!("\n  {} Reply was not saved: {err:#}", style("!").red().bold());
            Finalization::Failed
        }
    }
}

fn abandon_reply(
    reconciler: &mut Reconciler,
    spinner: &ProgressBar,
    placeholder: Option<Uuid>,
    message: &str,
) {
    spinner.finish_and_clear();
    if let Some(placeholder) = placeholder {
        reconciler.apply_finalize(placeholder, Finalization::Failed);
    }
    eprintln!("\n  {} {message}", style("!").red().bold());
    eprintln!("  {}", style("Type a message to retry, /exit to quit.").dim());
}

/// Replace the local transcript with the server's.
async fn resync(session: &ChatSession, reconciler: &mut Reconciler) {
    match session.client.transcript(&session.session_id).await {
        Ok(seed) => *reconciler = Reconciler::from_seed(&session.session_id, seed),
        Err(err) => warn!(error = %err, "Failed to reload transcript"),
    }
}

/// Fetch the stored transcript and merge it like a run of broadcasts.
///
/// Returns display lines for messages this terminal had not seen. Local
/// placeholders are kept.
async fn catch_up(session: &ChatSession, reconciler: &mut Reconciler) -> Vec<String> {
    match session.client.transcript(&session.session_id).await {
        Ok(messages) => merge_missed(reconciler, messages),
        Err(err) => {
            warn!(error = %err, "Failed to fetch transcript after resubscribing");
            Vec::new()
        }
    }
}

fn merge_missed(reconciler: &mut Reconciler, messages: Vec<ChatMessage>) -> Vec<String> {
    messages
        .into_iter()
        .filter_map(|message| merge_broadcast(reconciler, &TopicEvent::NewMessage(message)))
        .collect()
}

/// Merge a broadcast and describe what should be shown, if anything.
fn merge_broadcast(reconciler: &mut Reconciler, event: &TopicEvent) -> Option<String> {
    match reconciler.apply_broadcast(event) {
        MergeOutcome::Inserted | MergeOutcome::AppendedOutOfOrder => {
            reconciler.get(event.message().id).map(format_entry)
        }
        _ => None,
    }
}

/// Forward topic events to the chat loop, resubscribing after a drop.
async fn forward_events(
    client: ChatClient,
    session_id: String,
    connection_id: ConnectionId,
    mut events: TopicEvents,
    tx: mpsc::Sender<TopicUpdate>,
) {
    loop {
        while let Some(item) = events.next().await {
            match item {
                Ok(event) => {
                    if tx.send(TopicUpdate::Event(event)).await.is_err() {
                        return;
                    }
                }
                Err(err) => {
                    warn!(error = %err, "Topic subscription failed");
                    break;
                }
            }
        }
        if tx.is_closed() {
            return;
        }

        tokio::time::sleep(RESUBSCRIBE_DELAY).await;
        events = match client.subscribe(&session_id, &connection_id).await {
            Ok(events) => {
                debug!(session_id = %session_id, "Resubscribed to session topic");
                if tx.send(TopicUpdate::Resubscribed).await.is_err() {
                    return;
                }
                events
            }
            Err(err) => {
                debug!(error = %err, "Resubscribe failed");
                Box::pin(futures_util::stream::empty())
            }
        };
    }
}

fn thinking_spinner() -> ProgressBar {
    let spinner = ProgressBar::new_spinner();
    spinner.set_style(
        ProgressStyle::default_spinner()
            .template("{spinner:.cyan} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    spinner.set_message("thinking...");
    spinner.enable_steady_tick(Duration::from_millis(80));
    spinner
}

fn print_transcript(reconciler: &Reconciler) {
    if reconciler.is_empty() {
        return;
    }
    for entry in reconciler.entries() {
        println!("{}", format_entry(entry));
    }
    println!();
}

fn format_entry(entry: &TranscriptEntry) -> String {
    let label = match entry.sender {
        Sender::User => style("You >").green().bold(),
        Sender::Assistant => style("Assistant >").cyan().bold(),
    };
    let marker = match entry.state {
        EntryState::Final => String::new(),
        EntryState::Optimistic => format!(" {}", style("(unconfirmed)").dim()),
        EntryState::Streaming => format!(" {}", style("(streaming)").dim()),
    };
    format!(
        "  {} {} {}{marker}",
        style(entry.timestamp.format("%H:%M")).dim(),
        label,
        entry.text
    )
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|v| !v.trim().is_empty())
}
