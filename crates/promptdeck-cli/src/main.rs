use anyhow::Result;
use clap::{Args, Parser, Subcommand};

mod commands;
mod output;

use commands::console::{run_console, run_exec};
use commands::templates::{run_categories, run_templates};

#[derive(Parser)]
#[command(name = "promptdeck")]
#[command(about = "Prompt template console for chat workspaces", long_about = None)]
struct Cli {
    #[arg(long, global = true)]
    json: bool,

    /// Enable verbose logging to stderr.
    #[arg(short = 'v', long = "verbose", global = true)]
    verbose: bool,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Interactive hash-command console.
    Console,
    /// Run a single console line and print the resulting action.
    Exec(ExecArgs),
    /// List categories with template counts.
    Categories,
    /// Inspect and edit templates without the console surface.
    Templates {
        #[command(subcommand)]
        command: TemplatesCmd,
    },
}

#[derive(Args)]
struct ExecArgs {
    /// Console input line, e.g. "#默认分类1 代码解释".
    line: String,
}

#[derive(Subcommand)]
enum TemplatesCmd {
    List(TemplatesListArgs),
    Show(TemplatesShowArgs),
    Add(TemplatesAddArgs),
    Delete(TemplatesDeleteArgs),
}

#[derive(Args)]
struct TemplatesListArgs {
    category: String,
}

#[derive(Args)]
struct TemplatesShowArgs {
    category: String,
    title: String,
}

#[derive(Args)]
struct TemplatesAddArgs {
    category: String,
    title: String,
    content: String,
    /// Create the category first when it does not exist yet.
    #[arg(long, default_value_t = false, action = clap::ArgAction::SetTrue)]
    create_category: bool,
}

#[derive(Args)]
struct TemplatesDeleteArgs {
    category: String,
    /// Template title, looked up ignoring case. Omit when using --index.
    title: Option<String>,
    /// 1-based position in the category listing.
    #[arg(long)]
    index: Option<usize>,
}

fn main() -> Result<()> {
    let mut cli = Cli::parse();
    let cwd = std::env::current_dir()?;

    let command = cli.command.take().unwrap_or(Commands::Console);
    match command {
        Commands::Console => run_console(&cwd, &cli),
        Commands::Exec(args) => run_exec(&cwd, args, &cli),
        Commands::Categories => run_categories(&cwd, cli.json),
        Commands::Templates { command } => run_templates(&cwd, command, &cli),
    }
}
