use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};
use futures::StreamExt;
use std::io::Write;
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};

use nex::archive::ArchiveSummary;
use nex::config::load_config;
use nex::memory::MemoryError;
use nex::quota::Tier;
use nex::turn::{Fragment, TurnError};
use nex::{Engine, ServiceContext};

/// Subcommand names, listed when an unknown one is given
pub const COMMAND_NAMES: &[&str] = &[
    "version", "chat", "archives", "status", "remember", "memories", "upgrade", "help",
];

#[derive(Parser)]
#[command(name = "nex")]
#[command(about = "nex - conversational turn engine with long-term memory")]
#[command(version = env!("CARGO_PKG_VERSION"))]
pub struct Cli {
    /// Enable debug logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Path to the configuration file (defaults to ~/.nex/config.json)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Override the provider's default model
    #[arg(long, global = true)]
    pub model: Option<String>,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand)]
pub enum Commands {
    /// Display version information
    Version,

    /// Start an interactive session (/end closes it, /quit leaves)
    Chat {
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// List archived sessions, newest first, or show one by id
    Archives {
        #[arg(short, long, default_value = "local")]
        user: String,
        #[arg(short, long)]
        limit: Option<usize>,
        /// Show the full archive with this id
        #[arg(long)]
        id: Option<String>,
    },

    /// Show tier and remaining allowance
    Status {
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Store a memory item
    Remember {
        #[arg(short, long, default_value = "local")]
        user: String,
        #[arg(required = true, num_args = 1..)]
        text: Vec<String>,
    },

    /// List stored memories, newest first
    Memories {
        #[arg(short, long, default_value = "local")]
        user: String,
    },

    /// Change a user's tier (TIER_1, TIER_2, TIER_3)
    Upgrade {
        #[arg(short, long, default_value = "local")]
        user: String,
        tier: Tier,
    },
}

pub fn run(cli: Cli) -> Result<()> {
    let command = match cli.command {
        Some(Commands::Version) => {
            print_version();
            return Ok(());
        }
        Some(command) => command,
        None => {
            // No subcommand provided - show help
            Cli::command().print_help()?;
            println!();
            return Ok(());
        }
    };

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()
        .context("Failed to start async runtime")?;

    runtime.block_on(async move {
        let config = load_config(cli.model, cli.config)?;
        let context = ServiceContext::from_config(config)
            .await
            .context("Failed to initialize services")?;
        let engine = Engine::new(context);

        let outcome = dispatch(&engine, command).await;
        engine.shutdown().await.context("Failed to shut down cleanly")?;
        outcome
    })
}

async fn dispatch(engine: &Engine, command: Commands) -> Result<()> {
    match command {
        Commands::Version => print_version(),
        Commands::Chat { user } => chat(engine, &user).await?,
        Commands::Archives { user, limit, id } => match id {
            Some(id) => match engine.get_archive(&user, &id).await? {
                Some(record) => {
                    println!("{} [{}]", record.title, record.emotion_tag);
                    println!("{}", record.created_at.to_rfc3339());
                    println!();
                    println!("{}", record.reflection);
                }
                None => anyhow::bail!("archive {} not found", id),
            },
            None => {
                let archives = engine.list_archives(&user, limit).await?;
                if archives.is_empty() {
                    println!("No archives yet.");
                }
                for archive in archives {
                    print_archive_line(&archive);
                }
            }
        },
        Commands::Status { user } => {
            let status = engine.quota_status(&user).await?;
            println!("User:     {}", user);
            println!("Tier:     {}", status.tier);
            println!(
                "Messages: {} used, {} remaining today",
                status.messages_used_today,
                format_limit(status.messages_remaining)
            );
            println!(
                "Memories: {} of {}",
                status.memory_used,
                format_limit(status.memory_limit)
            );
        }
        Commands::Remember { user, text } => {
            match engine.remember(&user, &text.join(" ")).await {
                Ok(listing) => println!(
                    "Remembered. {} of {} memories used.",
                    listing.used,
                    format_limit(listing.limit)
                ),
                Err(MemoryError::QuotaExceeded(denial)) => {
                    anyhow::bail!("{}{}", denial, upgrade_hint(denial.upgrade_available))
                }
                Err(e) => return Err(e.into()),
            }
        }
        Commands::Memories { user } => {
            let listing = engine.memories(&user).await?;
            println!("{} of {} memories used", listing.used, format_limit(listing.limit));
            for entry in listing.entries {
                println!("- {} ({})", entry.content, entry.timestamp.format("%Y-%m-%d"));
            }
        }
        Commands::Upgrade { user, tier } => {
            let record = engine.upgrade_tier(&user, tier).await?;
            println!("{} is now on {}", user, record.tier);
        }
    }
    Ok(())
}

/// Line-oriented chat loop on stdin
async fn chat(engine: &Engine, user: &str) -> Result<()> {
    engine.start_background().await;

    let mut session_id = engine
        .active_session(user)
        .await?
        .map(|session| session.session_id);
    let mut lines = BufReader::new(tokio::io::stdin()).lines();

    println!("Type a message. /end closes the session, /quit leaves.");
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let Some(line) = lines.next_line().await? else {
            break;
        };
        let line = line.trim();
        match line {
            "" => continue,
            "/quit" => break,
            "/end" => {
                match session_id.take() {
                    Some(id) => end_session(engine, user, &id).await?,
                    None => println!("No active session."),
                }
                continue;
            }
            _ => {}
        }

        let id = match session_id.clone() {
            Some(id) => id,
            None => match engine.start_session(user).await {
                Ok(handle) => {
                    session_id = Some(handle.session_id.clone());
                    handle.session_id
                }
                Err(e) => {
                    eprintln!("{}", e);
                    continue;
                }
            },
        };

        let turn = match engine.submit_turn(user, &id, line).await {
            Ok(turn) => turn,
            Err(e) => {
                report_turn_error(&e);
                if e.requires_restart() {
                    session_id = None;
                }
                continue;
            }
        };

        let mut fragments = turn.fragments;
        while let Some(fragment) = fragments.next().await {
            match fragment {
                Fragment::Text(piece) => {
                    print!("{}", piece);
                    std::io::stdout().flush()?;
                }
                Fragment::Error(message) => eprintln!("\n{}", message),
                Fragment::End => println!(),
            }
        }
        if let Some(remaining) = turn.remaining_messages {
            if remaining <= 3 {
                println!("({} messages left today)", remaining);
            }
        }
    }

    if session_id.is_some() {
        println!(
            "Session left open; it is archived after {} minutes of inactivity.",
            engine.config().session.inactivity_minutes
        );
    }
    Ok(())
}

async fn end_session(engine: &Engine, user: &str, session_id: &str) -> Result<()> {
    match engine.end_session(user, session_id).await {
        Ok(Some(archive)) => {
            println!("Session archived:");
            print_archive_line(&archive);
        }
        Ok(None) => println!("Session was already closed."),
        Err(e) if e.requires_restart() => println!("Session was already closed."),
        Err(e) => return Err(e.into()),
    }
    Ok(())
}

fn report_turn_error(e: &TurnError) {
    match e {
        TurnError::QuotaExceeded(denial) => {
            eprintln!("{}{}", denial, upgrade_hint(denial.upgrade_available))
        }
        _ if e.is_retryable() => eprintln!("{} ({})", e, e.code()),
        _ => eprintln!("{}", e),
    }
}

fn upgrade_hint(available: bool) -> &'static str {
    if available {
        ". Upgrade your tier for more."
    } else {
        ""
    }
}

fn print_archive_line(archive: &ArchiveSummary) {
    println!(
        "{}  {}  {} [{}]",
        archive.archive_id,
        archive.created_at.format("%Y-%m-%d %H:%M"),
        archive.title,
        archive.emotion_tag
    );
}

fn format_limit(limit: Option<u64>) -> String {
    match limit {
        Some(n) => n.to_string(),
        None => "unlimited".to_string(),
    }
}

pub fn extract_command_from_error(error_msg: &str) -> String {
    // Try to extract the command name from error messages like:
    // "error: unrecognized subcommand 'invalid_command'"
    if let Some(start) = error_msg.find('\'') {
        if let Some(end) = error_msg[start + 1..].find('\'') {
            return error_msg[start + 1..start + 1 + end].to_string();
        }
    }
    "unknown".to_string()
}

fn print_version() {
    println!("nex {}", env!("CARGO_PKG_VERSION"));
}
