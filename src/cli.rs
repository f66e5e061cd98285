//! Command-line interface and REPL

use anyhow::{Context, Result};
use colored::*;
use rustyline::error::ReadlineError;
use rustyline::DefaultEditor;
use std::path::PathBuf;
use std::time::Duration;

use crate::binding::ActionBinding;
use crate::config::Properties;
use crate::controller::MidiController;
use crate::device::DeviceRegistry;
use crate::midi::{MessageType, ShortMessage};
use crate::table::BindingTable;

/// Print every input and output device
pub fn list_ports_formatted(registry: &DeviceRegistry) {
    println!("\n{}", "=== Available MIDI Devices ===".bold().cyan());

    let enumeration = registry.enumerate();
    let inputs: Vec<_> = enumeration.devices.iter().filter(|d| d.can_transmit()).collect();
    let outputs: Vec<_> = enumeration.devices.iter().filter(|d| d.can_receive()).collect();

    println!("\n{}", "Input Devices:".bold());
    if inputs.is_empty() {
        println!("  {}", "No input devices found".dimmed());
    }
    for device in inputs {
        println!("  {} {}", "[IN ]".green(), device.identity());
    }

    println!("\n{}", "Output Devices:".bold());
    if outputs.is_empty() {
        println!("  {}", "No output devices found".dimmed());
    }
    for device in outputs {
        println!("  {} {}", "[OUT]".red(), device.identity());
    }

    if !enumeration.skipped.is_empty() {
        println!("\n{}", "Unavailable:".bold().yellow());
        for err in &enumeration.skipped {
            println!("  {}", err.to_string().yellow());
        }
    }

    println!();
}

pub fn print_bindings(table: &BindingTable) {
    println!("\n{}", "=== MIDI Bindings ===".bold().cyan());
    for binding in table.iter() {
        let state = if binding.is_enabled() {
            "on ".green()
        } else {
            "off".dimmed()
        };
        println!(
            "  {} {:<16} {}",
            state,
            binding.action(),
            binding.config_string().bright_white()
        );
    }
    for rejected in table.rejected() {
        println!("  {} {}", "!!".red(), rejected);
    }
    println!();
}

/// Capture the next inbound message as a binding for `action`.
///
/// Refuses a gesture already bound to another enabled action.
pub fn learn(controller: &MidiController, action: &str, timeout: Duration) -> Result<ActionBinding> {
    let session = controller.session();
    let table = session.table().snapshot();
    table.lookup(action)?;

    println!(
        "{} '{}' ({}s)...",
        "Waiting for a MIDI event for".cyan(),
        action.bright_white(),
        timeout.as_secs()
    );
    let message = session
        .wait_for_event(Some(timeout))
        .context("No MIDI event captured")?;
    let binding = ActionBinding::from_message(action, &message)?;

    if let Some(other) = table.conflicting(&binding) {
        anyhow::bail!(
            "{} is already bound to '{}'",
            binding.config_string(),
            other
        );
    }

    Ok(binding)
}

/// One REPL command line
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Command {
    Help,
    Exit,
    Ports,
    Status,
    Bindings,
    Send { action: String, value: u8 },
    Tone,
    Learn { action: String, timeout: Duration },
    Export(PathBuf),
    OpenInput(String),
    OpenOutput(String),
    CloseInput,
    CloseOutput,
}

impl Command {
    pub fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (name, rest) = line.split_once(char::is_whitespace).unwrap_or((line, ""));
        let rest = rest.trim();
        let args: Vec<&str> = rest.split_whitespace().collect();

        match name {
            "help" | "?" => Ok(Command::Help),
            "exit" | "quit" => Ok(Command::Exit),
            "ports" => Ok(Command::Ports),
            "status" => Ok(Command::Status),
            "bindings" => Ok(Command::Bindings),
            "tone" => Ok(Command::Tone),
            "close-in" => Ok(Command::CloseInput),
            "close-out" => Ok(Command::CloseOutput),
            "send" => {
                let action = args.first().ok_or("usage: send <action> [value]")?;
                let value = match args.get(1) {
                    Some(v) => v.parse().map_err(|_| format!("invalid value '{}'", v))?,
                    None => 127,
                };
                Ok(Command::Send {
                    action: action.to_string(),
                    value,
                })
            }
            "learn" => {
                let action = args.first().ok_or("usage: learn <action> [seconds]")?;
                let secs = match args.get(1) {
                    Some(s) => s.parse().map_err(|_| format!("invalid timeout '{}'", s))?,
                    None => 30,
                };
                Ok(Command::Learn {
                    action: action.to_string(),
                    timeout: Duration::from_secs(secs),
                })
            }
            "export" if !rest.is_empty() => Ok(Command::Export(PathBuf::from(rest))),
            "export" => Err("usage: export <file>".to_string()),
            // Device identities may contain spaces
            "open-in" if !rest.is_empty() => Ok(Command::OpenInput(rest.to_string())),
            "open-out" if !rest.is_empty() => Ok(Command::OpenOutput(rest.to_string())),
            "open-in" | "open-out" => Err(format!("usage: {} <device>", name)),
            other => Err(format!("unknown command '{}' (try 'help')", other)),
        }
    }
}

fn print_help() {
    println!("  {:<26} list MIDI devices", "ports");
    println!("  {:<26} show controller state", "status");
    println!("  {:<26} show the binding table", "bindings");
    println!("  {:<26} send an action's message", "send <action> [value]");
    println!("  {:<26} send middle C to the output", "tone");
    println!("  {:<26} bind the next inbound event", "learn <action> [seconds]");
    println!("  {:<26} write bindings to a properties file", "export <file>");
    println!("  {:<26} bind an input device", "open-in <device>");
    println!("  {:<26} bind an output device", "open-out <device>");
    println!("  {:<26} release a device", "close-in | close-out");
    println!("  {:<26} leave", "exit");
}

/// Interactive shell. Blocking; run it off the async executor.
pub fn run_repl(controller: &mut MidiController, runtime: tokio::runtime::Handle) -> Result<()> {
    let mut rl = DefaultEditor::new()?;
    println!("{}", "MIDI Remote shell, 'help' for commands".bold().cyan());

    loop {
        let line = match rl.readline("midi> ") {
            Ok(line) => line,
            Err(ReadlineError::Interrupted | ReadlineError::Eof) => break,
            Err(e) => return Err(e.into()),
        };
        if line.trim().is_empty() {
            continue;
        }
        let _ = rl.add_history_entry(line.as_str());

        let command = match Command::parse(&line) {
            Ok(command) => command,
            Err(e) => {
                println!("{}", e.yellow());
                continue;
            }
        };

        if command == Command::Exit {
            break;
        }
        if let Err(e) = execute(controller, command, &runtime) {
            println!("{} {:#}", "error:".red().bold(), e);
        }
    }

    Ok(())
}

fn execute(controller: &mut MidiController, command: Command, runtime: &tokio::runtime::Handle) -> Result<()> {
    let session = controller.session().clone();

    match command {
        Command::Help => print_help(),
        Command::Exit => {}
        Command::Ports => list_ports_formatted(session.registry()),
        Command::Status => println!("{}", controller.status()),
        Command::Bindings => print_bindings(&session.table().snapshot()),
        Command::Send { action, value } => {
            session.send_action(&action, value)?;
            println!("{} {} ({})", "sent".green(), action, value);
        }
        Command::Tone => {
            let tone = ShortMessage::new(MessageType::NoteOn, 0, 60, 93)?;
            session.send_raw(&tone.encode())?;
            println!("{} {}", "sent".green(), tone);
        }
        Command::Learn { action, timeout } => {
            let binding = learn(controller, &action, timeout)?;
            println!("{} {}", "learned".green(), binding.config_string().bright_white());
            session.table().update(|table| table.replace(binding))?;
        }
        Command::Export(path) => {
            let updates = session.table().snapshot().to_properties();
            runtime.block_on(Properties::export(&path, &updates))?;
            println!("{} {}", "exported to".green(), path.display());
        }
        Command::OpenInput(identity) => session.open_input(&identity)?,
        Command::OpenOutput(identity) => session.open_output(&identity)?,
        Command::CloseInput => session.close_input(),
        Command::CloseOutput => session.close_output(),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_simple_commands() {
        assert_eq!(Command::parse("  status "), Ok(Command::Status));
        assert_eq!(Command::parse("quit"), Ok(Command::Exit));
        assert_eq!(Command::parse("close-out"), Ok(Command::CloseOutput));
        assert!(Command::parse("rewind").is_err());
    }

    #[test]
    fn test_parse_send() {
        assert_eq!(
            Command::parse("send play 93"),
            Ok(Command::Send {
                action: "play".to_string(),
                value: 93
            })
        );
        assert_eq!(
            Command::parse("send black"),
            Ok(Command::Send {
                action: "black".to_string(),
                value: 127
            })
        );
        assert!(Command::parse("send").is_err());
        assert!(Command::parse("send play loud").is_err());
    }

    #[test]
    fn test_parse_learn_timeout() {
        assert_eq!(
            Command::parse("learn next 5"),
            Ok(Command::Learn {
                action: "next".to_string(),
                timeout: Duration::from_secs(5)
            })
        );
    }

    #[test]
    fn test_parse_device_with_spaces() {
        assert_eq!(
            Command::parse("open-in X-Touch INT 0"),
            Ok(Command::OpenInput("X-Touch INT 0".to_string()))
        );
        assert!(Command::parse("open-out").is_err());
    }
}
