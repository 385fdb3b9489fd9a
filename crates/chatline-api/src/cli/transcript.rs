//! `chatline transcript`: print a stored session straight from the database.

use anyhow::{Context, Result};
use comfy_table::{Cell, Color, ContentArrangement, Table, presets};
use console::style;

use chatline_core::repository::MessageStore;
use chatline_types::chat::{ChatMessage, Sender};
use chatline_types::config::ChatlineConfig;

use std::path::Path;

use crate::state::open_store;

const PREVIEW_CHARS: usize = 72;

/// Print every message of a session in order.
///
/// # Examples
///
/// ```bash
/// chatline transcript 3f9c-visitor
/// chatline transcript 3f9c-visitor --json
/// ```
pub async fn show_transcript(
    config: &ChatlineConfig,
    data_dir: &Path,
    session_id: &str,
    json: bool,
) -> Result<()> {
    let session_id = session_id.trim();
    anyhow::ensure!(!session_id.is_empty(), "session id must not be empty");

    let store = open_store(config, data_dir).await?;
    let messages = store
        .list_by_session(session_id)
        .await
        .with_context(|| format!("failed to load session '{session_id}'"))?;

    if json {
        println!("{}", serde_json::to_string_pretty(&messages)?);
        return Ok(());
    }

    if messages.is_empty() {
        println!();
        println!(
            "  {} No messages in session '{}'.",
            style("i").blue().bold(),
            style(session_id).cyan()
        );
        println!();
        return Ok(());
    }

    let count = store.count_by_session(session_id).await?;

    println!();
    println!("  Transcript for '{}'", style(session_id).cyan().bold());
    println!();
    println!("{}", render_table(&messages));
    println!();
    println!(
        "  {} message{}",
        style(count).bold(),
        if count == 1 { "" } else { "s" }
    );
    println!();

    Ok(())
}

fn render_table(messages: &[ChatMessage]) -> Table {
    let mut table = Table::new();
    table.load_preset(presets::UTF8_FULL_CONDENSED);
    table.set_content_arrangement(ContentArrangement::Dynamic);

    table.set_header(vec![
        Cell::new("Time").fg(Color::White),
        Cell::new("Sender").fg(Color::White),
        Cell::new("Message").fg(Color::White),
        Cell::new("Timezone").fg(Color::White),
    ]);

    for message in messages {
        let sender_cell = match message.sender {
            Sender::User => Cell::new("user").fg(Color::Green),
            Sender::Assistant => Cell::new("assistant").fg(Color::Cyan),
        };

        table.add_row(vec![
            Cell::new(message.timestamp.format("%Y-%m-%d %H:%M:%S").to_string())
                .fg(Color::DarkGrey),
            sender_cell,
            Cell::new(preview(&message.text)),
            Cell::new(message.timezone.as_deref().unwrap_or("-")).fg(Color::DarkGrey),
        ]);
    }

    table
}

/// First line of `text`, cut to a fixed number of characters.
fn preview(text: &str) -> String {
    let line = text.lines().next().unwrap_or_default();
    let truncated = line.chars().count() > PREVIEW_CHARS || text.lines().nth(1).is_some();
    if !truncated {
        return line.to_string();
    }
    let mut short: String = line.chars().take(PREVIEW_CHARS - 3).collect();
    short.push_str("...");
    short
}
