//! Command execution.

use colored::Colorize;
use teletable_client::{Client, ClientConfig, ConnectionState, SessionEvent};
use teletable_protocol::{EntryFlags, EntryType, EntryValue};
use tokio::sync::broadcast;

type CommandResult = Result<(), Box<dyn std::error::Error>>;

/// Connects and waits for the initial sync. The returned receiver was
/// subscribed before dialing, so burst events are not lost.
async fn ready_client(
    config: ClientConfig,
) -> Result<(Client, broadcast::Receiver<SessionEvent>), Box<dyn std::error::Error>> {
    let client = Client::connect(config.with_reconnect(false));
    let mut events = client.subscribe();
    loop {
        match events.recv().await? {
            SessionEvent::StateChanged(ConnectionState::Ready) => return Ok((client, events)),
            SessionEvent::StateChanged(ConnectionState::Disconnected) => {
                return Err("could not establish a session".into());
            }
            _ => {}
        }
    }
}

pub async fn watch(config: ClientConfig) -> CommandResult {
    let (client, mut events) = ready_client(config).await?;
    for entry in client.entries() {
        println!("{} {}", "sync".dimmed(), describe_entry(&entry.name, &entry.value));
    }
    eprintln!("{}", "watching; ctrl-c to exit".dimmed());

    loop {
        tokio::select! {
            _ = tokio::signal::ctrl_c() => break,
            event = events.recv() => match event {
                Ok(event) => print_event(&event),
                Err(broadcast::error::RecvError::Lagged(missed)) => {
                    eprintln!("{}", format!("skipped {missed} events").yellow());
                }
                Err(broadcast::error::RecvError::Closed) => break,
            },
        }
    }
    client.close().await;
    Ok(())
}

pub async fn list(config: ClientConfig) -> CommandResult {
    let (client, _events) = ready_client(config).await?;
    for entry in client.entries() {
        let id = if entry.is_pending() {
            "-".to_string()
        } else {
            entry.id.to_string()
        };
        let flags = if entry.flags.is_persistent() { "P" } else { " " };
        println!(
            "{:<32} {:<13} {:>5} {:>5} {} {}",
            entry.name.bold(),
            type_name(entry.entry_type),
            id,
            entry.seq,
            flags,
            format_value(&entry.value)
        );
    }
    client.close().await;
    Ok(())
}

pub async fn set(config: ClientConfig, name: &str, literal: &str, persistent: bool) -> CommandResult {
    let (client, _events) = ready_client(config).await?;
    let flags = if persistent {
        EntryFlags::persistent()
    } else {
        EntryFlags::new()
    };
    client.assign(name, parse_value(literal), flags).await?;
    println!("{} {}", "set".green(), name);
    client.close().await;
    Ok(())
}

pub async fn delete(config: ClientConfig, name: &str) -> CommandResult {
    let (client, _events) = ready_client(config).await?;
    client.delete(name).await?;
    println!("{} {}", "deleted".red(), name);
    client.close().await;
    Ok(())
}

pub async fn clear(config: ClientConfig) -> CommandResult {
    let (client, _events) = ready_client(config).await?;
    client.clear_all().await?;
    println!("{}", "cleared all entries".red());
    client.close().await;
    Ok(())
}

/// true/false parse as booleans and numbers as doubles; anything else is
/// a string.
fn parse_value(literal: &str) -> EntryValue {
    match literal {
        "true" => EntryValue::Boolean(true),
        "false" => EntryValue::Boolean(false),
        _ => match literal.parse::<f64>() {
            Ok(number) => EntryValue::Double(number),
            Err(_) => EntryValue::String(literal.to_owned()),
        },
    }
}

fn print_event(event: &SessionEvent) {
    match event {
        SessionEvent::StateChanged(state) => {
            eprintln!("{}", format!("state: {state:?}").dimmed());
        }
        SessionEvent::EntryAssigned(entry) => {
            println!(
                "{} {}",
                "assign".green(),
                describe_entry(&entry.name, &entry.value)
            );
        }
        SessionEvent::EntryUpdated { entry, .. } => {
            println!(
                "{} {}",
                "update".cyan(),
                describe_entry(&entry.name, &entry.value)
            );
        }
        SessionEvent::EntryFlagsUpdated(entry) => {
            let flags = if entry.flags.is_persistent() {
                "persistent"
            } else {
                "transient"
            };
            println!("{} {} -> {flags}", "flags".cyan(), entry.name);
        }
        SessionEvent::EntryDeleted { name, .. } => {
            println!("{} {name}", "delete".red());
        }
        SessionEvent::EntriesCleared => println!("{}", "cleared".red()),
        SessionEvent::RpcResponse {
            definition_id,
            unique_id,
            ..
        } => {
            println!("{} def={definition_id} call={unique_id}", "rpc".magenta());
        }
    }
}

fn describe_entry(name: &str, value: &EntryValue) -> String {
    format!("{name} = {}", format_value(value))
}

fn type_name(entry_type: EntryType) -> &'static str {
    match entry_type {
        EntryType::Boolean => "boolean",
        EntryType::Double => "double",
        EntryType::String => "string",
        EntryType::Raw => "raw",
        EntryType::BooleanArray => "boolean[]",
        EntryType::DoubleArray => "double[]",
        EntryType::StringArray => "string[]",
        EntryType::Rpc => "rpc",
    }
}

fn format_value(value: &EntryValue) -> String {
    match value {
        EntryValue::Boolean(b) => b.to_string(),
        EntryValue::Double(d) => d.to_string(),
        EntryValue::String(s) => format!("{s:?}"),
        EntryValue::Raw(bytes) => format!("<{} raw bytes>", bytes.len()),
        EntryValue::BooleanArray(items) => format!("{items:?}"),
        EntryValue::DoubleArray(items) => format!("{items:?}"),
        EntryValue::StringArray(items) => format!("{items:?}"),
        EntryValue::Rpc(definition) => format!(
            "<rpc {} ({} params, {} results)>",
            definition.name,
            definition.parameters.len(),
            definition.results.len()
        ),
    }
}
