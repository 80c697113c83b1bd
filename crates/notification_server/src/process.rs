//! Inspection of OS processes: executable, name, command line and credentials.

use std::{
    path::{Path, PathBuf},
    sync::{Mutex, PoisonError},
};

use sysinfo::{Pid, Process, ProcessRefreshKind, System, UpdateKind};

/// Credentials of a running process.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Credentials {
    pub uid: u32,
    pub gid: u32,
    pub groups: Vec<u32>,
}

impl Credentials {
    pub fn in_group(&self, gid: u32) -> bool {
        self.gid == gid || self.groups.contains(&gid)
    }
}

pub trait ProcessInspector: Send + Sync {
    fn executable(&self, pid: u32) -> Option<PathBuf>;
    fn name(&self, pid: u32) -> Option<String>;
    fn command_line(&self, pid: u32) -> Vec<String>;
    fn credentials(&self, pid: u32) -> Option<Credentials>;
}

/// [`ProcessInspector`] backed by [`sysinfo`].
pub struct SystemProcesses {
    system: Mutex<System>,
}

impl std::fmt::Debug for SystemProcesses {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SystemProcesses").finish_non_exhaustive()
    }
}

impl Default for SystemProcesses {
    fn default() -> Self {
        Self::new()
    }
}

impl SystemProcesses {
    pub fn new() -> Self {
        SystemProcesses { system: Mutex::new(System::new()) }
    }

    /// Refresh `pid` and read from it, or `None` if the process doesn't exist.
    fn with_process<T>(&self, pid: u32, f: impl FnOnce(&Process) -> T) -> Option<T> {
        let pid = Pid::from_u32(pid);
        let mut system = self.system.lock().unwrap_or_else(PoisonError::into_inner);
        let refresh_kind = ProcessRefreshKind::new()
            .with_exe(UpdateKind::Always)
            .with_cmd(UpdateKind::Always)
            .with_user(UpdateKind::Always);
        if !system.refresh_process_specifics(pid, refresh_kind) {
            return None;
        }
        system.process(pid).map(f)
    }
}

impl ProcessInspector for SystemProcesses {
    fn executable(&self, pid: u32) -> Option<PathBuf> {
        self.with_process(pid, |process| process.exe().map(Path::to_path_buf)).flatten()
    }

    fn name(&self, pid: u32) -> Option<String> {
        self.with_process(pid, |process| process.name().to_owned()).filter(|name| !name.is_empty())
    }

    fn command_line(&self, pid: u32) -> Vec<String> {
        self.with_process(pid, |process| process.cmd().iter().filter(|arg| !arg.is_empty()).cloned().collect())
            .unwrap_or_default()
    }

    fn credentials(&self, pid: u32) -> Option<Credentials> {
        let (uid, gid) = self.with_process(pid, |process| Some((**process.user_id()?, *process.group_id()?))).flatten()?;
        let groups = std::fs::read_to_string(format!("/proc/{}/status", pid))
            .map(|status| parse_status_groups(&status))
            .unwrap_or_else(|e| {
                log::debug!("Could not read supplementary groups of process {}: {}", pid, e);
                Vec::new()
            });
        Some(Credentials { uid, gid, groups })
    }
}

/// Parse the supplementary groups out of `/proc/<pid>/status`.
fn parse_status_groups(status: &str) -> Vec<u32> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("Groups:"))
        .map(|groups| groups.split_whitespace().filter_map(|g| g.parse().ok()).collect())
        .unwrap_or_default()
}

/// The last path component of an executable path or command name.
pub fn base_name(path: &str) -> &str {
    Path::new(path).file_name().and_then(|name| name.to_str()).unwrap_or(path)
}

/// Decides which processes are trusted to create and close notifications that users can't remove.
#[derive(Debug, Clone)]
pub struct PrivilegePolicy {
    pub own_pid: u32,
    pub privileged_gid: Option<u32>,
}

impl PrivilegePolicy {
    /// Build the policy for the current process, resolving the privileged group by name.
    pub fn for_current_process(privileged_group: Option<&str>) -> Self {
        let privileged_gid = privileged_group.and_then(|name| match nix::unistd::Group::from_name(name) {
            Ok(Some(group)) => Some(group.gid.as_raw()),
            Ok(None) => {
                log::warn!("Privileged group {:?} does not exist", name);
                None
            }
            Err(e) => {
                log::warn!("Failed to look up group {:?}: {}", name, e);
                None
            }
        });
        PrivilegePolicy { own_pid: std::process::id(), privileged_gid }
    }

    pub fn is_privileged(&self, inspector: &dyn ProcessInspector, pid: u32) -> bool {
        if pid == self.own_pid {
            return true;
        }
        match inspector.credentials(pid) {
            Some(creds) => creds.uid == 0 || self.privileged_gid.is_some_and(|gid| creds.in_group(gid)),
            None => {
                log::debug!("Could not read credentials of process {}", pid);
                false
            }
        }
    }
}
