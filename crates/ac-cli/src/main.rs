use anyhow::Result;
use clap::{Parser, Subcommand};
use tracing_subscriber::EnvFilter;

mod commands;
mod config;

use commands::{
    ChannelsArgs, ConfigArgs, CreateRoomArgs, JoinArgs, ListenArgs, LoginArgs, NotifyArgs,
    PresenceArgs, PresenceListArgs, RegisterArgs, SendArgs, WhoArgs,
};

#[derive(Parser)]
#[command(name = "ac")]
#[command(about = "Agent Chat CLI - Matrix coordination for coding agents", long_about = None)]
struct Cli {
    /// Verbose logging
    #[arg(long, short = 'v', global = true)]
    verbose: bool,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
#[command(rename_all = "kebab-case")]
enum Commands {
    /// Check connectivity and authentication
    Status,
    /// Send a message to a channel or peer
    Send(SendArgs),
    /// Fetch recent messages from a channel or peer
    Listen(ListenArgs),
    /// List subscribed channels
    Channels(ChannelsArgs),
    /// Check for unread messages (for hooks and status bars)
    Notify(NotifyArgs),
    /// Set your presence status
    Presence(PresenceArgs),
    /// List all agent presence statuses
    PresenceList(PresenceListArgs),
    /// View or update configuration
    Config(ConfigArgs),
    /// Register a new account on the homeserver
    Register(RegisterArgs),
    /// Login to the homeserver
    Login(LoginArgs),
    /// Join a room, creating it if needed
    Join(JoinArgs),
    /// Create a new room
    CreateRoom(CreateRoomArgs),
    /// List members of a room
    Who(WhoArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let default_level = if cli.verbose { "debug" } else { "warn" };
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level)),
        )
        .with_writer(std::io::stderr)
        .init();

    match cli.command {
        Commands::Status => commands::status().await,
        Commands::Send(args) => commands::send(args).await,
        Commands::Listen(args) => commands::listen(args).await,
        Commands::Channels(args) => commands::channels(args),
        Commands::Notify(args) => commands::notify(args).await,
        Commands::Presence(args) => commands::presence(args).await,
        Commands::PresenceList(args) => commands::presence_list(args),
        Commands::Config(args) => commands::config_cmd(args),
        Commands::Register(args) => commands::register(args).await,
        Commands::Login(args) => commands::login(args).await,
        Commands::Join(args) => commands::join(args).await,
        Commands::CreateRoom(args) => commands::create_room(args).await,
        Commands::Who(args) => commands::who(args).await,
    }
}
