use anyhow::{Context, Result};
use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use tokio::io::{AsyncBufReadExt, BufReader};
use tracing::{error, warn};

use qrshare::config::{format_config, Config};
use qrshare::display::{format_file_size, render_qr};
use qrshare::logging::{init_logging, LogConfig, Verbosity};
use qrshare::network::{AddressResolver, InterfaceResolver, StaticResolver};
use qrshare::server::shutdown_signal;
use qrshare::{FileDescriptor, FileId, FilePicker, PathPicker, ShareService};

#[derive(Parser)]
#[command(name = "qrshare")]
#[command(version)]
#[command(about = "Share local files with devices on your network")]
#[command(
    long_about = "Serve local files over HTTP on your local network and print a link and QR code for each one. Nothing is uploaded anywhere; the files stay reachable while qrshare runs."
)]
struct Cli {
    /// Increase log verbosity (-v info, -vv debug, -vvv trace)
    #[arg(short, long, action = ArgAction::Count, global = true)]
    verbose: u8,

    /// Write debug logs to this file
    #[arg(long, global = true)]
    log_file: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Share files and serve them until interrupted
    Share {
        /// Files to share
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// First port to try (default: 50001)
        #[arg(short, long)]
        port: Option<u16>,

        /// Host to advertise instead of the detected LAN address
        #[arg(long)]
        host: Option<String>,

        /// Don't print QR codes
        #[arg(long)]
        no_qr: bool,
    },
    /// Show or change the configuration
    Config {
        #[command(subcommand)]
        action: Option<ConfigAction>,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the current configuration
    Show,
    /// Set the first port the server tries
    SetPort { port: u16 },
    /// Go back to the default port
    UnsetPort,
    /// Always advertise this host in share URLs
    SetHost { host: String },
    /// Detect the LAN address again
    UnsetHost,
}

/// A line typed while files are being shared.
#[derive(Debug, PartialEq, Eq)]
enum ConsoleCommand {
    Add(PathBuf),
    Remove(FileId),
    List,
    Status,
    Help,
    Quit,
}

impl ConsoleCommand {
    fn parse(line: &str) -> Result<Self, String> {
        let line = line.trim();
        let (word, arg) = match line.split_once(char::is_whitespace) {
            Some((word, arg)) => (word, arg.trim()),
            None => (line, ""),
        };

        match (word, arg) {
            ("add", "") => Err("usage: add <path>".to_string()),
            ("add", path) => Ok(ConsoleCommand::Add(PathBuf::from(path))),
            ("rm" | "remove", "") => Err("usage: rm <id>".to_string()),
            ("rm" | "remove", id) => Ok(ConsoleCommand::Remove(FileId::from(id))),
            ("ls" | "list", _) => Ok(ConsoleCommand::List),
            ("status", _) => Ok(ConsoleCommand::Status),
            ("help" | "?", _) => Ok(ConsoleCommand::Help),
            ("quit" | "exit" | "q", _) => Ok(ConsoleCommand::Quit),
            (other, _) => Err(format!("unknown command: {}", other)),
        }
    }
}

const CONSOLE_HELP: &str = "Commands: add <path>, rm <id>, ls, status, quit";

/// Share one file and print its link.
async fn share_and_print(service: &ShareService, file: FileDescriptor, show_qr: bool) {
    let name = file.name.clone();
    let size = file.size;

    match service.share(file).await {
        Ok(info) => {
            println!();
            println!("Shared {} ({})", name, format_file_size(size));
            println!("  id:  {}", info.id);
            println!("  url: {}", info.url);
            if show_qr {
                match render_qr(&info.url) {
                    Ok(qr) => println!("{}", qr),
                    Err(e) => warn!(error = %e, "Could not render QR code"),
                }
            }
        }
        Err(e) => {
            error!(name = %name, error = %e, "Share failed");
            eprintln!("Could not share {}: {}", name, e);
        }
    }
}

async fn print_listing(service: &ShareService) {
    let files = service.list().await;
    if files.is_empty() {
        println!("No files shared");
        return;
    }

    for file in files {
        println!(
            "{}  {}  {}  {}",
            file.id,
            file.name,
            format_file_size(file.size),
            if file.kind.is_empty() { "-" } else { file.kind.as_str() }
        );
    }
}

/// Run a console command. Returns `false` when the user asked to quit.
async fn handle_command(service: &ShareService, command: ConsoleCommand, show_qr: bool) -> bool {
    match command {
        ConsoleCommand::Add(path) => match FileDescriptor::from_path(&path) {
            Ok(file) => share_and_print(service, file, show_qr).await,
            Err(e) => eprintln!("{}", e),
        },
        ConsoleCommand::Remove(id) => {
            if service.unshare(&id).await {
                println!("Removed {}", id);
            } else {
                println!("Not shared: {}", id);
            }
            println!("Server: {}", service.server_state());
        }
        ConsoleCommand::List => print_listing(service).await,
        ConsoleCommand::Status => println!("Server: {}", service.server_state()),
        ConsoleCommand::Help => println!("{}", CONSOLE_HELP),
        ConsoleCommand::Quit => return false,
    }
    true
}

async fn run_share(
    config: &Config,
    files: Vec<PathBuf>,
    port: Option<u16>,
    host: Option<String>,
    show_qr: bool,
) -> Result<()> {
    let resolver: Box<dyn AddressResolver> = match config.effective_host(host.as_deref()) {
        Some(host) => Box::new(StaticResolver(host)),
        None => Box::new(InterfaceResolver),
    };
    let service = ShareService::with_resolver(config.effective_port(port), resolver);

    let mut picker = PathPicker::new(files);
    loop {
        match picker.select_file() {
            Ok(Some(file)) => share_and_print(&service, file, show_qr).await,
            Ok(None) => break,
            Err(e) => eprintln!("{}", e),
        }
    }

    println!();
    println!("Server: {}", service.server_state());
    println!("{}", CONSOLE_HELP);
    println!("Press Ctrl+C to stop");

    let mut lines = BufReader::new(tokio::io::stdin()).lines();
    let mut stdin_open = true;
    let shutdown = shutdown_signal();
    tokio::pin!(shutdown);

    loop {
        tokio::select! {
            _ = &mut shutdown => break,
            line = lines.next_line(), if stdin_open => match line {
                Ok(Some(line)) if line.trim().is_empty() => {}
                Ok(Some(line)) => match ConsoleCommand::parse(&line) {
                    Ok(command) => {
                        if !handle_command(&service, command, show_qr).await {
                            break;
                        }
                    }
                    Err(msg) => eprintln!("{}", msg),
                },
                Ok(None) => stdin_open = false,
                Err(e) => {
                    warn!(error = %e, "Failed to read from stdin");
                    stdin_open = false;
                }
            },
        }
    }

    service.shutdown().await;
    println!("\nServer stopped");
    Ok(())
}

fn run_config(mut config: Config, action: Option<ConfigAction>) -> Result<()> {
    match action.unwrap_or(ConfigAction::Show) {
        ConfigAction::Show => {
            println!("{}", format_config(&config));
            return Ok(());
        }
        ConfigAction::SetPort { port } => config.set_default_port(Some(port)),
        ConfigAction::UnsetPort => config.set_default_port(None),
        ConfigAction::SetHost { host } => config.set_host(Some(host)),
        ConfigAction::UnsetHost => config.set_host(None),
    }

    config.save().context("Failed to save configuration")?;
    println!("{}", format_config(&config));
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = Config::load().context("Failed to load configuration")?;

    let _log_guard = init_logging(&LogConfig {
        verbosity: Verbosity::from_occurrences(cli.verbose),
        log_file: cli.log_file.or_else(|| config.log_file.clone()),
    });

    match cli.command {
        Commands::Share {
            files,
            port,
            host,
            no_qr,
        } => run_share(&config, files, port, host, !no_qr).await,
        Commands::Config { action } => run_config(config, action),
    }
}
