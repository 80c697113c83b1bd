use std::{
    os::unix::io::AsRawFd,
    path::Path,
    sync::{atomic::Ordering, Arc},
};

use anyhow::{Context, Result};
use notification_server::{
    dbus,
    identify::BusTransport,
    process::{PrivilegePolicy, SystemProcesses},
    service, CallerIdentifier, NotificationManager, ServerConfig, ServiceHandle, Store, StoreOptions,
};
use tokio::sync::broadcast;

use crate::{
    application_lifecycle,
    config::{self, Categories},
    paths::NotificationdPaths,
    util,
};

#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    pub system_bus: bool,
    pub update: bool,
    pub daemonize: bool,
}

pub fn initialize_server(paths: NotificationdPaths, options: DaemonOptions) -> Result<ForkResult> {
    log::info!("Loading paths: {}", &paths);

    let server_config = match config::read_from_file(&paths.get_config_file()) {
        Ok(config) => config,
        Err(err) => {
            log::error!("{:?}", err);
            ServerConfig::default()
        }
    };
    let categories = load_categories(&paths, &server_config).unwrap_or_else(|err| {
        log::error!("{:?}", err);
        server_config.categories.clone()
    });

    if options.daemonize {
        let fork_result = do_detach(paths.get_log_file())?;

        if fork_result == ForkResult::Parent {
            return Ok(ForkResult::Parent);
        }
    }

    simple_signal::set_handler(&[simple_signal::Signal::Int, simple_signal::Signal::Term], move |_| {
        application_lifecycle::request_exit();
    });

    let rt = tokio::runtime::Builder::new_multi_thread()
        .thread_name("notificationd")
        .enable_all()
        .build()
        .context("Failed to initialize tokio runtime")?;
    rt.block_on(run(paths, server_config, categories, options))?;
    log::info!("notificationd finished");

    Ok(ForkResult::Child)
}

fn load_categories(paths: &NotificationdPaths, server_config: &ServerConfig) -> Result<Categories> {
    Ok(config::merge_categories(server_config, config::read_categories(&paths.get_categories_file())?))
}

async fn run(paths: NotificationdPaths, server_config: ServerConfig, categories: Categories, options: DaemonOptions) -> Result<()> {
    let con = if options.system_bus { zbus::Connection::system().await } else { zbus::Connection::session().await }
        .context("Failed to connect to the message bus")?;

    let store = Store::open(
        paths.get_database_file(),
        StoreOptions { commit_delay: server_config.commit_delay(), min_free_space: server_config.min_free_space_bytes },
    );
    let identifier = CallerIdentifier::new(
        Arc::new(BusTransport::new(con.clone())),
        Arc::new(SystemProcesses::new()),
        PrivilegePolicy::for_current_process(server_config.privileged_group.as_deref()),
        server_config.sandbox_proxy_executables.clone(),
    );

    let (events, event_recv) = broadcast::channel(256);
    let mut manager = NotificationManager::new(server_config.clone(), store, events)
        .with_image_dir(paths.get_image_dir())
        .with_categories(Box::new(categories.clone()));
    if !manager.is_persistent() {
        log::warn!("Notifications will not persist across restarts");
    }
    manager.restore_notifications(options.update);
    log::info!("Restored {} notifications", manager.len());

    let shutdown = application_lifecycle::exit_token();
    let (handle, service_task) = service::spawn(manager, shutdown.clone());

    dbus::attach_to(&con, handle.clone(), identifier).await.context("Failed to serve org.freedesktop.Notifications")?;
    log::info!("Serving org.freedesktop.Notifications on the {} bus", if options.system_bus { "system" } else { "session" });

    tokio::spawn(dbus::forward_events(con.clone(), event_recv));
    tokio::spawn(async move {
        let result = run_filewatch(paths, server_config, categories, handle).await;
        crate::print_result_err!("while watching category definitions", result);
    });

    shutdown.cancelled().await;
    service_task.await.context("Notification service task failed")?;
    Ok(())
}

/// Watch the category definitions, reloading them and updating the affected notifications on change.
async fn run_filewatch(
    paths: NotificationdPaths,
    server_config: ServerConfig,
    mut categories: Categories,
    handle: ServiceHandle,
) -> Result<()> {
    use notify::{RecommendedWatcher, RecursiveMode, Watcher};

    if !paths.get_config_dir().is_dir() {
        log::info!("{} does not exist, not watching for category changes", paths.get_config_dir().display());
        return Ok(());
    }

    let categories_file = paths.get_categories_file();
    let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();
    let watched_file = categories_file.clone();
    let mut watcher: RecommendedWatcher = Watcher::new(
        move |res: notify::Result<notify::Event>| match res {
            Ok(notify::Event { kind: notify::EventKind::Modify(_) | notify::EventKind::Create(_) | notify::EventKind::Remove(_), paths, .. }) => {
                if paths.iter().any(|path| path.file_name() == watched_file.file_name()) {
                    if let Err(err) = tx.send(()) {
                        log::warn!("Error forwarding file update event: {:?}", err);
                    }
                }
            }
            Ok(_) => {}
            Err(e) => log::error!("Encountered Error While Watching Files: {}", e),
        },
        notify::Config::default(),
    )?;
    watcher.watch(paths.get_config_dir(), RecursiveMode::NonRecursive)?;

    // only accept one reload every 500ms
    let debounce_done = Arc::new(std::sync::atomic::AtomicBool::new(true));

    crate::loop_select_exiting! {
        Some(()) = rx.recv() => {
            let debounce_done = debounce_done.clone();
            if debounce_done.swap(false, Ordering::SeqCst) {
                tokio::spawn(async move {
                    tokio::time::sleep(std::time::Duration::from_millis(500)).await;
                    debounce_done.store(true, Ordering::SeqCst);
                });

                // editors may truncate the file before writing it
                tokio::time::sleep(std::time::Duration::from_millis(50)).await;
                match load_categories(&paths, &server_config) {
                    Ok(new_categories) => {
                        let changed = util::changed_keys(&categories, &new_categories);
                        if !changed.is_empty() {
                            handle.reload_categories(new_categories.clone(), changed)?;
                            categories = new_categories;
                        }
                    }
                    Err(err) => log::error!("{:?}", err),
                }
            }
        },
        else => break
    };
    Ok(())
}

#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ForkResult {
    Parent,
    Child,
}

/// detach the process from the terminal, also redirecting stdout and stderr to the log file
fn do_detach(log_file_path: impl AsRef<Path>) -> Result<ForkResult> {
    // detach from terminal
    match unsafe { nix::unistd::fork()? } {
        nix::unistd::ForkResult::Child => {
            nix::unistd::setsid()?;
            match unsafe { nix::unistd::fork()? } {
                nix::unistd::ForkResult::Parent { .. } => std::process::exit(0),
                nix::unistd::ForkResult::Child => {}
            }
        }
        nix::unistd::ForkResult::Parent { .. } => {
            return Ok(ForkResult::Parent);
        }
    }

    let file = std::fs::OpenOptions::new()
        .create(true)
        .append(true)
        .open(&log_file_path)
        .with_context(|| format!("Error opening log file ({}) for writing", log_file_path.as_ref().display()))?;
    let fd = file.as_raw_fd();

    if nix::unistd::isatty(1)? {
        nix::unistd::dup2(fd, std::io::stdout().as_raw_fd())?;
    }
    if nix::unistd::isatty(2)? {
        nix::unistd::dup2(fd, std::io::stderr().as_raw_fd())?;
    }

    Ok(ForkResult::Child)
}
