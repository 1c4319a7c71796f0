//! Command line front end: upload a spreadsheet, send edit instructions,
//! and print the reconciled preview after each step.

use std::path::PathBuf;

use clap::Parser;
use sheet_sync::{ClientConfig, DocumentSession, SyncSnapshot};
use tracing::info;

#[derive(Parser, Debug)]
#[command(name = "sheet-sync")]
#[command(about = "Edit a spreadsheet through the agent and keep a local preview in sync")]
struct Args {
    /// Spreadsheet to upload (.xlsx or .xls)
    #[arg(value_name = "FILE")]
    file: PathBuf,

    /// Edit instruction; repeat to send several in order
    #[arg(short = 'm', long = "message", value_name = "INSTRUCTION")]
    messages: Vec<String>,

    /// Backend base URL, overrides the config file and environment
    #[arg(long, value_name = "URL")]
    base_url: Option<String>,

    /// Config file path
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Print the server-rendered HTML preview after each step
    #[arg(long)]
    html: bool,

    /// Verbose logging
    #[arg(short, long)]
    verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let args = Args::parse();
    setup_tracing(args.verbose);

    let mut config = ClientConfig::load(args.config.as_deref())?;
    if let Some(base_url) = args.base_url {
        config.base_url = base_url;
    }
    info!(base_url = %config.base_url, session = %config.session_id, "starting session");

    let mut session = DocumentSession::from_config(&config)?;
    let snapshot = session.open(&args.file).await?;
    if let Some(entry) = session.transcript().last() {
        println!("{}", entry.content);
    }
    print_snapshot(&snapshot);
    if args.html {
        println!("{}", session.preview_html());
    }

    for message in &args.messages {
        println!("> {}", message);
        match session.send_instruction(message).await {
            Ok(report) => {
                println!("{}", report.response);
                print_snapshot(&report.snapshot);
                if args.html {
                    println!("{}", session.preview_html());
                }
            }
            Err(e) => eprintln!("error: {}", e),
        }
    }

    session.close();
    Ok(())
}

fn print_snapshot(snapshot: &SyncSnapshot) {
    match &snapshot.key {
        Some(key) => println!("[{:?}] {}", snapshot.state, key),
        None => println!("[{:?}]", snapshot.state),
    }
    for sheet in snapshot.sheets() {
        println!("  {} ({} rows x {} cols)", sheet.name, sheet.row_count(), sheet.col_count());
    }
    if let Some(message) = snapshot.outcome.user_message() {
        println!("  {}", message);
    }
}

fn setup_tracing(verbose: bool) {
    use tracing_subscriber::EnvFilter;

    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| {
        if verbose {
            EnvFilter::new("sheet_sync=debug")
        } else {
            EnvFilter::new("sheet_sync=info")
        }
    });

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .init();
}
