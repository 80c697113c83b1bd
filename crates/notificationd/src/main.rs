use anyhow::{Context, Result};
use clap::CommandFactory as _;
use paths::NotificationdPaths;

mod application_lifecycle;
mod client;
mod config;
mod opts;
mod paths;
mod server;
mod util;

fn main() {
    let opts: opts::Opt = opts::Opt::from_env();

    let log_level_filter = if opts.log_debug { log::LevelFilter::Debug } else { log::LevelFilter::Info };
    if std::env::var("RUST_LOG").is_ok() {
        pretty_env_logger::init_timed();
    } else {
        pretty_env_logger::formatted_timed_builder()
            .filter(Some("notificationd"), log_level_filter)
            .filter(Some("notification_server"), log_level_filter)
            .init();
    }

    if let opts::Action::ShellCompletions { shell } = opts.action {
        clap_complete::generate(shell, &mut opts::RawOpt::command(), "notificationd", &mut std::io::stdout());
        return;
    }

    if let Err(err) = run(opts) {
        eprintln!("Error: {:?}", err);
        std::process::exit(1);
    }
}

fn run(opts: opts::Opt) -> Result<()> {
    match opts.action {
        opts::Action::ShellCompletions { .. } => unreachable!(),
        opts::Action::Client(action) => client::handle_client_action(opts.system_bus, action),
        opts::Action::Daemon { no_daemonize, update } => {
            let mut paths = NotificationdPaths::from_env(opts.config_path).context("Failed to initialize notificationd paths")?;
            if let Some(database) = opts.database_path {
                paths = paths.with_database_file(database);
            }
            let options = server::DaemonOptions { system_bus: opts.system_bus, update, daemonize: !no_daemonize };
            let fork_result = server::initialize_server(paths.clone(), options)?;
            if fork_result == server::ForkResult::Parent {
                println!("notificationd started, logging to {}", paths.get_log_file().display());
            }
            Ok(())
        }
    }
}
