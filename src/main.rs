// src/main.rs

use std::io::{BufRead, Write};
use std::sync::Arc;

use anyhow::Result;
use clap::Parser;
use tracing::info;
use tracing_subscriber::EnvFilter;

use sommelier::actions::{Action, ChipAction};
use sommelier::backend::HttpBackend;
use sommelier::config::Config;
use sommelier::engine::Engine;
use sommelier::transcript::{EntryContent, EntryRole, TranscriptEntry};
use sommelier::wine::BottleForm;

/// Terminal front-end for the wine conversation engine.
#[derive(Parser, Debug)]
#[command(name = "sommelier", version, about)]
struct Args {
    /// Backend base URL (overrides config file).
    #[arg(long, env = "SOMMELIER_BACKEND_URL")]
    backend_url: Option<String>,

    /// Backend API key.
    #[arg(long, env = "SOMMELIER_API_KEY", hide_env_values = true)]
    api_key: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    dotenvy::dotenv().ok();
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("sommelier=info")),
        )
        .with_writer(std::io::stderr)
        .init();

    let args = Args::parse();
    let mut config = Config::load();
    if let Some(url) = args.backend_url {
        config.backend_url = url;
    }
    if let Some(key) = args.api_key {
        config.api_key = Some(key);
    }
    info!(backend = %config.backend_url, "starting sommelier");

    let backend = Arc::new(HttpBackend::new(
        config.backend_url.clone(),
        config.api_key.clone(),
    ));
    let engine = Engine::new(Arc::clone(&backend), backend, config);

    // Render new transcript entries as they arrive.
    let renderer = {
        let engine = engine.clone();
        let mut revisions = engine.subscribe();
        tokio::spawn(async move {
            let mut seen: Vec<String> = Vec::new();
            loop {
                render_new(&engine.transcript(), &mut seen);
                if revisions.changed().await.is_err() {
                    break;
                }
            }
        })
    };

    // Read user input on a blocking thread; stdin has no async story worth
    // the trouble for a line-oriented REPL.
    let (tx, mut rx) = tokio::sync::mpsc::channel::<String>(16);
    std::thread::spawn(move || {
        let stdin = std::io::stdin();
        for line in stdin.lock().lines() {
            let Ok(line) = line else { break };
            if tx.blocking_send(line).is_err() {
                break;
            }
        }
    });

    while let Some(line) = rx.recv().await {
        let line = line.trim().to_string();
        if line.is_empty() {
            continue;
        }
        match parse_input(&line, &engine) {
            Input::Quit => break,
            Input::Action(action) => engine.dispatch(action).await,
            Input::Unknown(msg) => eprintln!("{msg}"),
        }
    }

    renderer.abort();
    Ok(())
}

enum Input {
    Quit,
    Action(Action),
    Unknown(String),
}

fn parse_input<R, C>(line: &str, engine: &Engine<R, C>) -> Input
where
    R: sommelier::backend::RecognitionBackend + 'static,
    C: sommelier::backend::CatalogBackend + 'static,
{
    if line == "/q" || line == "/quit" {
        return Input::Quit;
    }
    // "/bottle [quantity]" submits the bottle-details form.
    if let Some(rest) = line.strip_prefix("/bottle") {
        let quantity = rest.trim().parse().unwrap_or(1);
        return Input::Action(Action::SubmitBottleForm {
            form: BottleForm {
                quantity,
                ..Default::default()
            },
        });
    }
    // A bare number taps that chip in the most recent chip row.
    if let Ok(n) = line.parse::<usize>() {
        if let Some(action) = chip_at(&engine.transcript(), n) {
            return Input::Action(Action::Chip {
                action,
                message_id: None,
            });
        }
        return Input::Unknown(format!("no chip numbered {n}"));
    }
    Input::Action(Action::SubmitText {
        text: line.to_string(),
    })
}

fn chip_at(entries: &[TranscriptEntry], n: usize) -> Option<ChipAction> {
    let row = entries.iter().rev().find_map(|e| match &e.content {
        EntryContent::Chips { chips } if !e.disabled => Some(chips),
        _ => None,
    })?;
    row.get(n.checked_sub(1)?).map(|c| c.action.clone())
}

fn render_new(entries: &[TranscriptEntry], seen: &mut Vec<String>) {
    for entry in entries {
        if seen.contains(&entry.id) {
            continue;
        }
        seen.push(entry.id.clone());
        let who = match entry.role {
            EntryRole::User => "you",
            EntryRole::Agent => "sommelier",
        };
        match &entry.content {
            EntryContent::Text { text } => println!("[{who}] {text}"),
            EntryContent::Image { note, .. } => {
                println!("[{who}] (photo){}", note.as_deref().unwrap_or(""));
            }
            EntryContent::Chips { chips } => {
                let labels: Vec<String> = chips
                    .iter()
                    .enumerate()
                    .map(|(i, c)| format!("[{}] {}", i + 1, c.label))
                    .collect();
                println!("        {}", labels.join("  "));
            }
            EntryContent::Form { .. } => {
                println!("[{who}] (bottle details — reply with /bottle <quantity>)");
            }
            EntryContent::WineCard { wine, confidence } => {
                let pct = confidence
                    .map(|c| format!(" ({:.0}% sure)", c * 100.0))
                    .unwrap_or_default();
                println!("[{who}] ▸ {}{pct}", wine.display_name());
                for (label, value) in [
                    ("Region", wine.region.as_deref()),
                    ("Country", wine.country.as_deref()),
                    ("Type", wine.wine_type.as_deref()),
                    ("Appellation", wine.appellation.as_deref()),
                ] {
                    if let Some(value) = value {
                        println!("          {label}: {value}");
                    }
                }
                if !wine.grapes.is_empty() {
                    println!("          Grapes: {}", wine.grapes.join(", "));
                }
            }
            EntryContent::EnrichmentCard { data, cached } => {
                let tag = if *cached { " (from the guide)" } else { "" };
                println!("[{who}] ▸ about this wine{tag}");
                for (label, value) in [
                    ("Style", data.style.as_deref()),
                    ("Tasting notes", data.tasting_notes.as_deref()),
                    ("Pairings", data.pairings.as_deref()),
                    ("Critic score", data.critic_score.as_deref()),
                    ("Drink window", data.drink_window.as_deref()),
                ] {
                    if let Some(value) = value {
                        println!("          {label}: {value}");
                    }
                }
            }
            EntryContent::Error {
                message,
                support_ref,
                ..
            } => {
                println!("[{who}] ⚠ {message}");
                if let Some(r) = support_ref {
                    println!("          (support ref {r})");
                }
            }
            EntryContent::Typing => {
                print!("        …\r");
                let _ = std::io::stdout().flush();
            }
        }
    }
}
