use anyhow::Result;
use promptdeck_console::{ConsoleAction, TemplateConsole};
use promptdeck_core::AppConfig;
use promptdeck_observe::Observer;
use serde_json::json;
use std::io::{Write, stdin, stdout};
use std::path::Path;

use crate::output::print_json;
use crate::{Cli, ExecArgs};

pub(crate) fn run_console(cwd: &Path, cli: &Cli) -> Result<()> {
    let mut console = open_console(cwd, cli)?;
    if !cli.json {
        println!("promptdeck console (type 'exit' to quit)");
        println!("hash commands start with '#'; try # for the menu");
    }
    loop {
        if !cli.json {
            print!("> ");
            stdout().flush()?;
        }
        let mut line = String::new();
        if stdin().read_line(&mut line)? == 0 {
            break;
        }
        let raw = line.trim();
        if raw == "exit" {
            break;
        }
        if raw.is_empty() {
            continue;
        }
        match console.handle_input(raw) {
            Some(action) => emit_action(&action, cli.json)?,
            None => {
                // Declined lines would flow to the chat pipeline in an
                // embedded host; this binary has nowhere else to send them.
                if cli.json {
                    print_json(&json!({"handled": false}))?;
                } else {
                    println!("(not a hash command; type # for the menu)");
                }
            }
        }
    }
    Ok(())
}

pub(crate) fn run_exec(cwd: &Path, args: ExecArgs, cli: &Cli) -> Result<()> {
    let mut console = open_console(cwd, cli)?;
    match console.handle_input(&args.line) {
        Some(action) => emit_action(&action, cli.json),
        None => {
            if cli.json {
                print_json(&json!({"handled": false}))
            } else {
                println!("(not a hash command; lines must start with '#')");
                Ok(())
            }
        }
    }
}

fn open_console(cwd: &Path, cli: &Cli) -> Result<TemplateConsole> {
    let cfg = AppConfig::ensure(cwd)?;
    let mut observer = Observer::new(cwd, &cfg.telemetry)?;
    observer.set_verbose(cli.verbose);
    observer.verbose_log(&format!("console: workspace {}", cwd.display()));
    TemplateConsole::with_config(cwd, &cfg, Some(observer))
}

fn emit_action(action: &ConsoleAction, json_mode: bool) -> Result<()> {
    if json_mode {
        return print_json(action);
    }
    match action {
        ConsoleAction::ShowMenu { heading, entries } => {
            println!("{heading}");
            for entry in entries {
                println!("{entry}");
            }
        }
        ConsoleAction::InputRequest { message, prompt } => {
            println!("{message}");
            println!("{prompt}");
        }
        ConsoleAction::SetInputText { notice, text } => {
            if let Some(notice) = notice {
                println!("{notice}");
            }
            // No input box to preset on a plain terminal; show it as a hint.
            if !text.is_empty() {
                println!("[input] {text}");
            }
        }
        ConsoleAction::Message { text } => println!("{text}"),
        ConsoleAction::TemplateContent { content } => println!("{content}"),
    }
    Ok(())
}
