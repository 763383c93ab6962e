pub mod commands;

use clap::{Parser, Subcommand};
use std::process::ExitCode;

#[derive(Debug, Parser)]
#[command(
    name = "operator",
    about = "Operator agent runtime CLI",
    long_about = "Run agent turns, inspect and purge conversation checkpoints, manage channel \
                  profiles, apply migrations and check readiness.",
    after_help = "Examples:\n  operator doctor --json\n  operator profile add P1 +15550001 whatsapp\n  \
                  operator turn --channel whatsapp --from +15550001 \"any open opportunities?\"\n  \
                  operator thread P1"
)]
pub struct Cli {
    #[command(subcommand)]
    command: Command,
}

#[derive(Debug, Subcommand)]
enum Command {
    #[command(about = "Apply pending database migrations and return structured status output")]
    Migrate,
    #[command(
        about = "Inspect effective configuration values with source attribution and redaction"
    )]
    Config,
    #[command(about = "Validate config, system prompt, provider settings and database readiness")]
    Doctor {
        #[arg(long, help = "Emit machine-readable JSON output")]
        json: bool,
    },
    #[command(about = "Handle one inbound message end-to-end against the configured provider")]
    Turn {
        #[arg(long, help = "Delivery channel the message arrived on, e.g. whatsapp")]
        channel: String,
        #[arg(long, help = "Sender address on that channel")]
        from: String,
        message: String,
    },
    #[command(about = "Print the stored checkpoint of a thread")]
    Thread { thread_id: String },
    #[command(about = "Delete checkpoints whose TTL has elapsed")]
    Purge,
    #[command(subcommand, about = "Manage the channel bindings that map senders to threads")]
    Profile(ProfileCommand),
}

#[derive(Debug, Subcommand)]
enum ProfileCommand {
    #[command(about = "Bind a sender address on a channel to a profile")]
    Add { profile_id: String, user_id: String, channel: String },
    #[command(about = "List every channel binding")]
    List,
}

pub fn run() -> ExitCode {
    let cli = Cli::parse();

    let result = match cli.command {
        Command::Migrate => commands::migrate::run(),
        Command::Config => {
            commands::CommandResult { exit_code: 0, output: commands::config::run() }
        }
        Command::Doctor { json } => {
            commands::CommandResult { exit_code: 0, output: commands::doctor::run(json) }
        }
        Command::Turn { channel, from, message } => commands::turn::run(&channel, &from, &message),
        Command::Thread { thread_id } => commands::thread::run(&thread_id),
        Command::Purge => commands::purge::run(),
        Command::Profile(ProfileCommand::Add { profile_id, user_id, channel }) => {
            commands::profile::add(&profile_id, &user_id, &channel)
        }
        Command::Profile(ProfileCommand::List) => commands::profile::list(),
    };

    println!("{}", result.output);
    ExitCode::from(result.exit_code)
}
