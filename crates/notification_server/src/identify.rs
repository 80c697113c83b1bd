//! Identification of the process behind an inbound request.
//!
//! Resolution is a small state machine: first the bus is asked for the pid of the immediate caller. If that process
//! turns out to be a sandboxing proxy, a second hop asks the proxy which client it is forwarding. Any failure in the
//! second hop leaves the proxy's own pid as the answer.

use std::{path::PathBuf, sync::Arc};

use crate::process::{base_name, PrivilegePolicy, ProcessInspector};

#[derive(thiserror::Error, Debug)]
pub enum IdentifyError {
    #[error("Dbus connection error")]
    Dbus(#[from] zbus::Error),
    #[error("Dbus call failed: {0}")]
    Fdo(#[from] zbus::fdo::Error),
    #[error("{0:?} is not a valid bus name")]
    InvalidSender(String),
}

/// The resolved identity of a caller.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallerIdentity {
    /// `None` if the process could not be determined.
    pub pid: Option<u32>,
    pub privileged: bool,
    pub process_name: Option<String>,
}

impl CallerIdentity {
    /// Identity of requests originating inside this process. Always fully privileged.
    pub fn own_process() -> Self {
        CallerIdentity { pid: Some(std::process::id()), privileged: true, process_name: None }
    }

    pub fn unresolved() -> Self {
        CallerIdentity { pid: None, privileged: false, process_name: None }
    }

    pub fn is_resolved(&self) -> bool {
        self.pid.is_some()
    }

    /// The pid as reported to observers, -1 when unresolved.
    pub fn raw_pid(&self) -> i64 {
        self.pid.map(i64::from).unwrap_or(-1)
    }
}

/// Queries the transport for process ids of bus connections.
#[async_trait::async_trait]
pub trait CallerTransport: Send + Sync {
    /// Pid of the process owning the connection `sender`.
    async fn connection_pid(&self, sender: &str) -> Result<u32, IdentifyError>;

    /// Ask the sandboxing proxy behind `sender` for the pid of the client it is forwarding.
    async fn proxied_client_pid(&self, sender: &str) -> Result<u32, IdentifyError>;
}

/// [`CallerTransport`] talking to the message bus.
#[derive(Debug, Clone)]
pub struct BusTransport {
    con: zbus::Connection,
}

impl BusTransport {
    pub fn new(con: zbus::Connection) -> Self {
        BusTransport { con }
    }
}

#[async_trait::async_trait]
impl CallerTransport for BusTransport {
    async fn connection_pid(&self, sender: &str) -> Result<u32, IdentifyError> {
        let busname: zbus::names::BusName =
            sender.try_into().map_err(|_| IdentifyError::InvalidSender(sender.to_owned()))?;
        let dbus = zbus::fdo::DBusProxy::new(&self.con).await?;
        Ok(dbus.get_connection_unix_process_id(busname).await?)
    }

    async fn proxied_client_pid(&self, sender: &str) -> Result<u32, IdentifyError> {
        let busname: zbus::names::BusName =
            sender.try_into().map_err(|_| IdentifyError::InvalidSender(sender.to_owned()))?;
        // the proxy answers bus queries on behalf of its client on its own connection
        let proxy = zbus::fdo::DBusProxy::builder(&self.con)
            .destination(busname.to_owned())?
            .path(crate::names::SANDBOX_PROXY_OBJECT)?
            .build()
            .await?;
        Ok(proxy.get_connection_unix_process_id(busname).await?)
    }
}

/// Where an identification currently stands.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum IdentifyState {
    ResolvingPid,
    ResolvingProxyIdentity { proxy_pid: u32 },
    Finished(Option<u32>),
}

/// Resolves [`CallerIdentity`]s for bus senders.
#[derive(Clone)]
pub struct CallerIdentifier {
    transport: Arc<dyn CallerTransport>,
    inspector: Arc<dyn ProcessInspector>,
    policy: PrivilegePolicy,
    proxy_executables: Vec<PathBuf>,
}

impl std::fmt::Debug for CallerIdentifier {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CallerIdentifier")
            .field("policy", &self.policy)
            .field("proxy_executables", &self.proxy_executables)
            .finish()
    }
}

impl CallerIdentifier {
    pub fn new(
        transport: Arc<dyn CallerTransport>,
        inspector: Arc<dyn ProcessInspector>,
        policy: PrivilegePolicy,
        proxy_executables: Vec<PathBuf>,
    ) -> Self {
        CallerIdentifier { transport, inspector, policy, proxy_executables }
    }

    /// Identify the process behind `sender`. A request without a sender originates from this process.
    ///
    /// The returned future may be dropped at any point; no state outlives it.
    pub async fn identify(&self, sender: Option<&str>) -> CallerIdentity {
        let Some(sender) = sender else {
            return CallerIdentity::own_process();
        };

        let mut state = IdentifyState::ResolvingPid;
        loop {
            state = match state {
                IdentifyState::ResolvingPid => self.resolve_pid(sender).await,
                IdentifyState::ResolvingProxyIdentity { proxy_pid } => {
                    match self.transport.proxied_client_pid(sender).await {
                        Ok(pid) => {
                            log::debug!("{} is proxied by {} for process {}", sender, proxy_pid, pid);
                            IdentifyState::Finished(Some(pid))
                        }
                        Err(e) => {
                            log::warn!("Failed to resolve client behind sandbox proxy {}: {}", proxy_pid, e);
                            IdentifyState::Finished(Some(proxy_pid))
                        }
                    }
                }
                IdentifyState::Finished(pid) => return self.identity_of(pid),
            };
        }
    }

    async fn resolve_pid(&self, sender: &str) -> IdentifyState {
        match self.transport.connection_pid(sender).await {
            Ok(pid) if pid != self.policy.own_pid && self.is_sandbox_proxy(pid) => {
                IdentifyState::ResolvingProxyIdentity { proxy_pid: pid }
            }
            Ok(pid) => IdentifyState::Finished(Some(pid)),
            Err(e) => {
                log::warn!("Failed to identify caller {}: {}", sender, e);
                IdentifyState::Finished(None)
            }
        }
    }

    fn is_sandbox_proxy(&self, pid: u32) -> bool {
        match self.inspector.executable(pid) {
            Some(exe) => self.proxy_executables.contains(&exe),
            None => {
                let name = self
                    .inspector
                    .name(pid)
                    .or_else(|| self.inspector.command_line(pid).into_iter().next().map(|cmd| base_name(&cmd).to_owned()));
                name.is_some_and(|name| {
                    self.proxy_executables.iter().any(|exe| exe.file_name().is_some_and(|file| file == name.as_str()))
                })
            }
        }
    }

    /// Resolve privilege and process name for an already known pid.
    pub fn identity_of(&self, pid: Option<u32>) -> CallerIdentity {
        match pid {
            Some(pid) if pid == self.policy.own_pid => CallerIdentity::own_process(),
            Some(pid) => CallerIdentity {
                pid: Some(pid),
                privileged: self.policy.is_privileged(self.inspector.as_ref(), pid),
                process_name: self.process_name(pid),
            },
            None => CallerIdentity::unresolved(),
        }
    }

    fn process_name(&self, pid: u32) -> Option<String> {
        self.inspector
            .command_line(pid)
            .into_iter()
            .next()
            .map(|cmd| base_name(&cmd).to_owned())
            .or_else(|| self.inspector.name(pid))
    }
}
