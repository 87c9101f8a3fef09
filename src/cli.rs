//! Command-line interface and REPL

use anyhow::Result;
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;

use crate::device::{PropertyKey, RoboVac, SessionState};
use crate::error::DeviceError;

/// One parsed REPL line
#[derive(Debug, Clone, PartialEq)]
pub enum Command {
    /// Full status, refreshed if older than the cache duration
    Status,
    /// Cached status without touching the device
    Cached,
    Get(PropertyKey),
    Set(PropertyKey, String),
    /// Force a fetch regardless of cache age
    Refresh,
    Disconnect,
    Help,
    Quit,
    Empty,
}

pub fn parse_command(line: &str) -> std::result::Result<Command, String> {
    let mut parts = line.split_whitespace();
    let Some(verb) = parts.next() else {
        return Ok(Command::Empty);
    };

    let key = |arg: Option<&str>| -> std::result::Result<PropertyKey, String> {
        let arg = arg.ok_or_else(|| format!("usage: {} <property>", verb))?;
        arg.parse::<PropertyKey>().map_err(|e| e.to_string())
    };

    let command = match verb.to_ascii_lowercase().as_str() {
        "status" | "s" => Command::Status,
        "cached" | "c" => Command::Cached,
        "get" | "g" => Command::Get(key(parts.next())?),
        "set" => {
            let key = key(parts.next())?;
            let value: Vec<&str> = parts.collect();
            if value.is_empty() {
                return Err("usage: set <property> <value>".to_string());
            }
            Command::Set(key, value.join(" "))
        },
        "refresh" | "r" => Command::Refresh,
        "disconnect" => Command::Disconnect,
        "help" | "h" | "?" => Command::Help,
        "quit" | "exit" | "q" => Command::Quit,
        other => return Err(format!("unknown command '{}' (try 'help')", other)),
    };
    Ok(command)
}

fn print_help() {
    println!("{}", "Commands:".bold());
    println!("  {}               full status (uses cache if fresh)", "status".yellow());
    println!("  {}               cached status, no network", "cached".yellow());
    println!("  {}      read one property", "get <property>".yellow());
    println!("  {} write one property", "set <property> <v>".yellow());
    println!("  {}              fetch status now", "refresh".yellow());
    println!("  {}           close the session", "disconnect".yellow());
    println!("  {}                 leave", "quit".yellow());
    println!();
    println!("{}", "Properties:".bold());
    for key in PropertyKey::ALL {
        let access = if key.is_writable() { "rw" } else { "r " };
        println!("  {} [{}] {}", access.dimmed(), key.dps(), key.friendly_name().cyan());
    }
}

fn print_error(e: &DeviceError) {
    println!("{} {}", format!("[{:?}]", e.kind()).red().bold(), e.to_string().red());
}

fn session_label(state: SessionState) -> ColoredString {
    match state {
        SessionState::Connected => "connected".green(),
        SessionState::Connecting => "connecting".yellow(),
        SessionState::Disconnected => "disconnected".red(),
    }
}

/// Run one command; returns false when the REPL should exit
pub async fn execute(vac: &RoboVac, command: Command) -> bool {
    match command {
        Command::Empty => {},
        Command::Help => print_help(),
        Command::Quit => return false,
        Command::Status => match vac.read_fresh(vac.cache_duration()).await {
            Ok(state) => println!("{}", state.format_status()),
            Err(e) => print_error(&e),
        },
        Command::Refresh => match vac.read_fresh(std::time::Duration::ZERO).await {
            Ok(state) => println!("{}", state.format_status()),
            Err(e) => print_error(&e),
        },
        Command::Cached => {
            let snapshot = vac.read_cached();
            let updated = snapshot
                .updated_at()
                .map(|t| t.to_rfc3339())
                .unwrap_or_else(|| "never".to_string());
            let validity = if snapshot.is_valid() {
                "valid".green()
            } else {
                "invalid".red()
            };
            println!(
                "session: {}  cache: {}  updated: {}",
                session_label(vac.session_state()),
                validity,
                updated.dimmed()
            );
            println!("{}", snapshot.state().format_status());
        },
        Command::Get(key) => match vac.get_value(key, vac.cache_duration()).await {
            Ok(value) => println!("{}: {}", key.friendly_name().cyan(), value.to_string().green()),
            Err(e) => print_error(&e),
        },
        Command::Set(key, raw) => {
            let result = match key.parse_value(&raw) {
                Ok(value) => vac.set_value(key, value).await,
                Err(e) => Err(e),
            };
            match result {
                Ok(()) => println!("{} {} = {}", "✓".green(), key.friendly_name(), raw),
                Err(e) => print_error(&e),
            }
        },
        Command::Disconnect => {
            vac.disconnect().await;
            println!("session: {}", session_label(vac.session_state()));
        },
    }
    true
}

pub async fn run_repl(vac: RoboVac) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{} (type 'help' for commands)", format!("{} REPL", vac.name()).bold().cyan());

    loop {
        // readline blocks; keep it off the async workers
        let (editor, readline) = tokio::task::spawn_blocking(move || {
            let line = rl.readline("robovac> ");
            (rl, line)
        })
        .await?;
        rl = editor;

        match readline {
            Ok(line) => {
                let _ = rl.add_history_entry(line.as_str());
                match parse_command(&line) {
                    Ok(command) => {
                        if !execute(&vac, command).await {
                            break;
                        }
                    },
                    Err(msg) => println!("{}", msg.yellow()),
                }
            },
            Err(ReadlineError::Interrupted) | Err(ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        }
    }

    Ok(())
}
