use crate::config::{self, AppConfig};
use ac_client::{check_unread, ChatBackend, MatrixClient};
use ac_core::nick::generate_nick;
use ac_core::{ChatMessage, PresenceStatus, Target};
use ac_state::{PresenceStore, StateDir, StateStore};
use anyhow::{bail, Context, Result};
use chrono::{Local, TimeZone};
use clap::Args;
use std::io::Write;
use tracing::warn;

const STALE_PRESENCE_MINUTES: i64 = 15;

#[derive(Args, Debug)]
pub struct SendArgs {
    /// Channel (#general) or peer (@BlueLake)
    pub target: String,
    pub message: String,
}

#[derive(Args, Debug)]
pub struct ListenArgs {
    /// Channel (#general) or peer (@BlueLake)
    pub target: Option<String>,
    /// Number of messages
    #[arg(long, default_value_t = 20)]
    pub last: usize,
    /// Listen to all subscribed channels
    #[arg(long)]
    pub all: bool,
}

#[derive(Args, Debug)]
pub struct ChannelsArgs {
    /// Subscribe to a channel
    #[arg(long)]
    pub subscribe: Option<String>,
    /// Unsubscribe from a channel
    #[arg(long, conflicts_with = "subscribe")]
    pub unsubscribe: Option<String>,
}

#[derive(Args, Debug)]
pub struct NotifyArgs {
    /// Output as JSON
    #[arg(long)]
    pub json: bool,
    /// One-line format for tmux status bars
    #[arg(long)]
    pub oneline: bool,
}

#[derive(Args, Debug)]
pub struct PresenceArgs {
    /// Status: online, busy, away, offline
    pub status: String,
    /// Status message
    #[arg(long, short = 'm', default_value = "")]
    pub message: String,
}

#[derive(Args, Debug)]
pub struct PresenceListArgs {
    /// Remove entries not seen recently
    #[arg(long)]
    pub clear_stale: bool,
}

#[derive(Args, Debug)]
pub struct ConfigArgs {
    /// key=value (server.url, server.server_name, identity.username, identity.display_name)
    #[arg(long = "set")]
    pub set_option: Option<String>,
}

#[derive(Args, Debug)]
pub struct RegisterArgs {
    /// Username; a random nick is generated when omitted
    pub username: Option<String>,
    #[arg(long, short = 'p')]
    pub password: Option<String>,
}

#[derive(Args, Debug)]
pub struct LoginArgs {
    pub username: String,
    #[arg(long, short = 'p')]
    pub password: Option<String>,
}

#[derive(Args, Debug)]
pub struct JoinArgs {
    /// Room alias (e.g. #my-project)
    pub room: String,
    /// Room topic if creating new
    #[arg(long, default_value = "")]
    pub topic: String,
}

#[derive(Args, Debug)]
pub struct CreateRoomArgs {
    /// Room alias (e.g. #general)
    pub alias: String,
    /// Create the room as private instead of public
    #[arg(long)]
    pub private: bool,
    #[arg(long, default_value = "")]
    pub topic: String,
}

#[derive(Args, Debug)]
pub struct WhoArgs {
    /// Room to list members of
    #[arg(default_value = "#general")]
    pub room: String,
}

fn client_for(config: &AppConfig, dir: &StateDir) -> Result<MatrixClient> {
    Ok(MatrixClient::new(
        &config.server.url,
        &config.server.server_name,
        config::load_credentials(dir),
    )?)
}

fn channel_key(name: &str) -> String {
    let trimmed = name.trim();
    if trimmed.starts_with('#') {
        trimmed.to_string()
    } else {
        format!("#{trimmed}")
    }
}

/// Parse input that must name a channel; a `@peer` is rejected rather than
/// silently turned into a channel named after the peer.
fn channel_target(raw: &str) -> Result<Target> {
    let trimmed = raw.trim();
    if trimmed.starts_with('@') {
        bail!("{trimmed} is a peer, not a channel");
    }
    Ok(Target::parse(&channel_key(trimmed))?)
}

fn prompt_password(label: &str) -> Result<String> {
    print!("{label}: ");
    std::io::stdout().flush()?;
    let mut line = String::new();
    std::io::stdin().read_line(&mut line)?;
    Ok(line.trim_end().to_string())
}

pub async fn status() -> Result<()> {
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let client = client_for(&config, &dir)?;

    match client.check_status().await {
        Ok(status) => {
            println!("Connected");
            println!("  User: {}", status.user_id);
            println!("  Rooms: {}", status.rooms);
            Ok(())
        }
        Err(err) => bail!("not connected: {err}"),
    }
}

pub async fn send(args: SendArgs) -> Result<()> {
    let target = Target::parse_lenient(&args.target)?;
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let client = client_for(&config, &dir)?;
    let store = StateStore::new(dir.clone());

    client
        .send_message(&target, &args.message)
        .await
        .with_context(|| format!("failed to send to {target}"))?;

    // We just wrote the newest message ourselves, so a plain touch (no
    // marker) is accurate here.
    match &target {
        Target::Channel(name) => {
            store.ensure_subscription(name)?;
            store.touch_channel(name, None)?;
        }
        Target::Direct(name) => {
            store.ensure_direct(name)?;
            store.touch_direct(name, None)?;
        }
    }

    println!("Sent to {target}");
    Ok(())
}

pub async fn listen(args: ListenArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let client = client_for(&config, &dir)?;
    let store = StateStore::new(dir.clone());
    let state = store.load()?;

    let targets: Vec<Target> = if args.all {
        state
            .subscribed_channels
            .iter()
            .map(|name| Target::Channel(name.clone()))
            .collect()
    } else if let Some(raw) = &args.target {
        vec![Target::parse_lenient(raw)?]
    } else {
        bail!("specify a channel or use --all");
    };

    for target in targets {
        let messages = client
            .fetch_history(&target, args.last)
            .await
            .with_context(|| format!("failed to fetch history for {target}"))?;

        println!("--- {target} ---");
        for msg in &messages {
            println!("{:>5}  {:<16} {}", format_time(msg), msg.sender_nick(), msg.text);
        }
        if messages.is_empty() {
            println!("(no messages)");
        }

        if let Some(marker) = messages.last().and_then(|msg| msg.event_id.as_deref()) {
            match &target {
                Target::Channel(name) => store.touch_channel(name, Some(marker))?,
                Target::Direct(name) => store.touch_direct(name, Some(marker))?,
            };
        }
    }
    Ok(())
}

fn format_time(msg: &ChatMessage) -> String {
    msg.timestamp_ms
        .and_then(|ms| Local.timestamp_millis_opt(ms).single())
        .map(|dt| dt.format("%H:%M").to_string())
        .unwrap_or_default()
}

pub fn channels(args: ChannelsArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let store = StateStore::new(dir);

    if let Some(raw) = &args.subscribe {
        let channel = channel_key(raw);
        store.ensure_subscription(&channel)?;
        println!("Subscribed to {channel}");
    }
    if let Some(raw) = &args.unsubscribe {
        let channel = channel_key(raw);
        store.remove_subscription(&channel)?;
        println!("Unsubscribed from {channel}");
    }

    let state = store.load()?;
    println!("Subscribed channels:");
    for channel in &state.subscribed_channels {
        println!("  {channel}");
    }
    Ok(())
}

pub async fn notify(args: NotifyArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let store = StateStore::new(dir.clone());

    // Bulk status check: degrade to empty rather than failing the caller
    // (hooks and status bars run this constantly).
    let results = match client_for(&config, &dir) {
        Ok(client) => check_unread(&client, &store).await?,
        Err(err) => {
            warn!("notify check skipped: {err}");
            Default::default()
        }
    };

    if args.json {
        println!("{}", serde_json::to_string(&results)?);
    } else if args.oneline {
        let parts: Vec<String> = results
            .iter()
            .filter(|(_, summary)| summary.count > 0)
            .map(|(key, summary)| {
                format!("{key}({}{})", summary.count, if summary.urgent { "!" } else { "" })
            })
            .collect();
        if !parts.is_empty() {
            println!("[chat] {}", parts.join(" "));
        }
    } else {
        for (key, summary) in &results {
            if summary.count > 0 {
                let urgent = if summary.urgent { " (URGENT)" } else { "" };
                println!("{key}: {} new messages{urgent}", summary.count);
            }
        }
    }
    Ok(())
}

pub async fn presence(args: PresenceArgs) -> Result<()> {
    let status: PresenceStatus = args
        .status
        .parse()
        .map_err(|err| anyhow::anyhow!("{err}; use one of: online, busy, away, offline"))?;

    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let nick = if config.identity.username.is_empty() {
        "agent".to_string()
    } else {
        config.identity.username.clone()
    };

    PresenceStore::new(dir.clone()).update(&nick, status.as_str(), &args.message)?;

    // Best-effort announcement; local presence is already recorded.
    let announce = format!(
        "[{}] @{nick}{}",
        status.as_str().to_uppercase(),
        if args.message.is_empty() {
            String::new()
        } else {
            format!(" - {}", args.message)
        }
    );
    match client_for(&config, &dir) {
        Ok(client) => {
            let status_channel = Target::Channel("#status".to_string());
            if let Err(err) = client.send_message(&status_channel, &announce).await {
                warn!("could not announce presence: {err}");
            }
        }
        Err(err) => warn!("could not announce presence: {err}"),
    }

    println!("Status set to {status}");
    if !args.message.is_empty() {
        println!("  Message: {}", args.message);
    }
    Ok(())
}

pub fn presence_list(args: PresenceListArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let store = PresenceStore::new(dir);

    if args.clear_stale {
        let removed = store.clear_stale(STALE_PRESENCE_MINUTES)?;
        if removed > 0 {
            println!("Cleared {removed} stale entries");
        }
    }

    let agents = store.all();
    if agents.is_empty() {
        println!("No agents currently tracked");
        return Ok(());
    }

    println!("{:<16} {:<8} {:<6} MESSAGE", "AGENT", "STATUS", "SEEN");
    for (nick, entry) in &agents {
        let seen = entry.last_seen.with_timezone(&Local).format("%H:%M");
        println!("{nick:<16} {:<8} {seen:<6} {}", entry.status, entry.message);
    }
    Ok(())
}

pub fn config_cmd(args: ConfigArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let mut config = AppConfig::load(&dir)?;

    if let Some(option) = &args.set_option {
        let Some((key, value)) = option.split_once('=') else {
            bail!("use key=value with --set");
        };
        config.set(key, value)?;
        config.save(&dir)?;
    }

    println!("{}", serde_json::to_string_pretty(&config)?);
    Ok(())
}

pub async fn register(args: RegisterArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let mut config = AppConfig::load(&dir)?;

    let username = args
        .username
        .unwrap_or_else(|| generate_nick().to_lowercase());
    let password = match args.password {
        Some(password) => password,
        None => prompt_password("Password")?,
    };

    let client = client_for(&config, &dir)?;
    let creds = client
        .register(&username, &password)
        .await
        .context("registration failed")?;
    config::save_credentials(&dir, &creds)?;
    config.identity.username = username;
    config.save(&dir)?;

    // Welcome message doubles as the first join of #general.
    let authed = client_for(&config, &dir)?;
    let general = Target::Channel("#general".to_string());
    let welcome = format!("Welcome {} to the chat!", creds.user_id);
    if let Err(err) = authed.send_message(&general, &welcome).await {
        warn!("could not announce in #general: {err}");
    }

    println!("Registered as {}", creds.user_id);
    Ok(())
}

pub async fn login(args: LoginArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let mut config = AppConfig::load(&dir)?;

    let password = match args.password {
        Some(password) => password,
        None => prompt_password("Password")?,
    };

    let client = client_for(&config, &dir)?;
    let creds = client
        .login(&args.username, &password)
        .await
        .context("login failed")?;
    config::save_credentials(&dir, &creds)?;
    config.identity.username = args.username;
    config.save(&dir)?;

    println!("Logged in as {}", creds.user_id);
    Ok(())
}

pub async fn join(args: JoinArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let client = client_for(&config, &dir)?;
    let channel = channel_target(&args.room)?.to_string();

    let room_id = client
        .join_or_create_room(&channel, &args.topic)
        .await
        .with_context(|| format!("failed to join {channel}"))?;
    StateStore::new(dir).ensure_subscription(&channel)?;

    println!("Joined {channel}");
    println!("  Room ID: {room_id}");
    Ok(())
}

pub async fn create_room(args: CreateRoomArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let client = client_for(&config, &dir)?;
    let channel = channel_target(&args.alias)?.to_string();

    let room_id = client
        .create_room(&channel, !args.private, &args.topic)
        .await
        .with_context(|| format!("failed to create {channel}"))?;

    println!("Created {channel}");
    println!("  Room ID: {room_id}");
    Ok(())
}

pub async fn who(args: WhoArgs) -> Result<()> {
    let dir = StateDir::from_env();
    let config = AppConfig::load(&dir)?;
    let client = client_for(&config, &dir)?;
    let target = channel_target(&args.room)?;

    let members = client.room_members(&target).await?;
    println!("Users in {target}:");
    for member in &members {
        let nick = member.display_name.clone().unwrap_or_else(|| {
            let local = member.user_id.split(':').next().unwrap_or(&member.user_id);
            local.strip_prefix('@').unwrap_or(local).to_string()
        });
        println!("  {nick}");
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn channel_key_normalizes_prefix() {
        assert_eq!(channel_key("dev"), "#dev");
        assert_eq!(channel_key("#dev"), "#dev");
        assert_eq!(channel_key("  #dev "), "#dev");
    }

    #[test]
    fn channel_target_rejects_peers() {
        assert_eq!(
            channel_target("#dev").unwrap(),
            Target::Channel("#dev".to_string())
        );
        assert_eq!(
            channel_target("dev").unwrap(),
            Target::Channel("#dev".to_string())
        );
        assert!(channel_target("@BlueLake").is_err());
        assert!(channel_target("").is_err());
    }
}
