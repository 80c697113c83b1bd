use anyhow::{Context, Result};
use clap::{Parser, Subcommand};

/// Struct that gets generated from `RawOpt`.
#[derive(Debug, PartialEq, Eq)]
pub struct Opt {
    pub log_debug: bool,
    pub config_path: Option<std::path::PathBuf>,
    pub database_path: Option<std::path::PathBuf>,
    pub system_bus: bool,
    pub action: Action,
}

#[derive(Parser, Debug, PartialEq, Eq)]
#[command(version, about, long_about = None)]
pub(super) struct RawOpt {
    /// Write out debug logs.
    #[arg(long = "debug", global = true)]
    log_debug: bool,

    /// Override the path to the configuration directory (the directory containing notificationd.json).
    #[arg(short, long, global = true)]
    config: Option<std::path::PathBuf>,

    /// Override the path of the notification database.
    #[arg(long, global = true)]
    database: Option<std::path::PathBuf>,

    /// Use the system bus instead of the session bus.
    #[arg(long, global = true)]
    system: bool,

    #[command(subcommand)]
    action: Action,
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum Action {
    /// Generate a shell completion script
    ShellCompletions {
        #[arg(short, long)]
        shell: clap_complete::shells::Shell,
    },

    /// Start the notification daemon.
    #[command(name = "daemon", alias = "d")]
    Daemon {
        /// Stay in the foreground instead of detaching from the terminal.
        #[arg(long = "no-daemonize", alias = "no-daemonise")]
        no_daemonize: bool,

        /// Treat this start as an update: drop expired notifications and limit how many are restored.
        #[arg(long)]
        update: bool,
    },

    #[command(flatten)]
    Client(ClientAction),
}

#[derive(Subcommand, Debug, PartialEq, Eq)]
pub enum ClientAction {
    /// Send a notification to the running daemon.
    #[command(name = "send", alias = "s")]
    Send(SendArgs),

    /// List the notifications of an application.
    #[command(name = "list", alias = "l")]
    List {
        /// Owner (or application name) whose notifications to list.
        #[arg(required_unless_present = "category")]
        owner: Option<String>,

        /// List all notifications of a category instead. Requires a privileged caller.
        #[arg(long, conflicts_with = "owner")]
        category: Option<String>,
    },

    /// Close a notification.
    #[command(name = "close", alias = "c")]
    Close { id: u32 },
}

#[derive(clap::Args, Debug, PartialEq, Eq)]
pub struct SendArgs {
    pub summary: String,

    #[arg(default_value = "")]
    pub body: String,

    #[arg(short, long, default_value = "notificationd")]
    pub app_name: String,

    #[arg(short, long, default_value = "")]
    pub icon: String,

    #[arg(long)]
    pub category: Option<String>,

    /// 0 (low), 1 (normal) or 2 (critical)
    #[arg(short, long, value_parser = clap::value_parser!(u8).range(0..=2))]
    pub urgency: Option<u8>,

    /// Milliseconds until the notification expires once displayed. -1 uses the server default, 0 never expires.
    #[arg(short = 't', long, default_value_t = -1, allow_negative_numbers = true)]
    pub expire_timeout: i32,

    /// Id of a notification to replace.
    #[arg(short, long, default_value_t = 0)]
    pub replaces: u32,

    /// Action in the shape `key=label`. May be given multiple times.
    #[arg(long = "action", value_parser = parse_key_value)]
    pub actions: Vec<(String, String)>,

    /// String hint in the shape `name=value`. May be given multiple times.
    #[arg(long = "hint", value_parser = parse_key_value)]
    pub hints: Vec<(String, String)>,
}

impl Opt {
    pub fn from_env() -> Self {
        let raw: RawOpt = RawOpt::parse();
        raw.into()
    }
}

impl From<RawOpt> for Opt {
    fn from(other: RawOpt) -> Self {
        let RawOpt { log_debug, config, database, system, action } = other;
        Opt { log_debug, config_path: config, database_path: database, system_bus: system, action }
    }
}

fn parse_key_value(s: &str) -> Result<(String, String)> {
    let (key, value) =
        s.split_once('=').with_context(|| format!("arguments must be in the shape `key=value`, but got: {}", s))?;
    Ok((key.to_owned(), value.to_owned()))
}
