//! Process table read from procfs

use std::collections::BTreeMap;
use std::fs;
use std::path::Path;

use nsweep_core::{Error, NAMESPACE_TYPES, NamespaceId, NamespaceType, ProcessId, Result};
use serde::Serialize;
use tracing::{debug, trace};

/// A process as seen at discovery time
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Process {
    /// Process ID, in the PID namespace of procfs
    pub pid: ProcessId,
    /// Parent process ID
    pub ppid: ProcessId,
    /// Parent process, if it is in the table
    pub parent: Option<ProcessId>,
    /// Child processes in the table
    pub children: Vec<ProcessId>,
    /// Command name from `stat`
    pub name: String,
    /// Command line arguments
    pub cmdline: Vec<String>,
    /// Start time in clock ticks after boot
    pub starttime: u64,
    /// PIDs of this process in its PID namespaces, outermost first
    pub nspid: Vec<ProcessId>,
    /// Joined namespaces, indexed by species slot
    pub namespaces: [Option<NamespaceId>; NAMESPACE_TYPES],
    /// Container this process belongs to
    pub container: Option<String>,
}

impl Process {
    /// Create a process without any namespace information
    #[must_use]
    pub fn new(pid: ProcessId, ppid: ProcessId, name: impl Into<String>, starttime: u64) -> Self {
        Self {
            pid,
            ppid,
            parent: None,
            children: Vec::new(),
            name: name.into(),
            cmdline: Vec::new(),
            starttime,
            nspid: Vec::new(),
            namespaces: [None; NAMESPACE_TYPES],
            container: None,
        }
    }

    /// Parse a `/proc/<pid>/stat` line.
    ///
    /// The command name sits between the first `(` and the last `)` and
    /// may itself contain parentheses and spaces.
    ///
    /// # Errors
    /// Returns [`Error::Parse`] on malformed input.
    pub fn from_stat(line: &str) -> Result<Self> {
        let malformed = |message: &str| Error::Parse {
            what: "process stat",
            message: format!("{message}: {line:?}"),
        };
        let open = line.find('(').ok_or_else(|| malformed("missing '('"))?;
        let close = line.rfind(')').ok_or_else(|| malformed("missing ')'"))?;
        if close < open {
            return Err(malformed("unbalanced name"));
        }
        let pid: ProcessId = line[..open].trim().parse()?;
        let name = &line[open + 1..close];
        // Fields after the name start with field 3 (state).
        let fields: Vec<&str> = line[close + 1..].split_whitespace().collect();
        if fields.len() < 20 {
            return Err(malformed("too few fields"));
        }
        let ppid: ProcessId = fields[1].parse()?;
        let starttime = fields[19]
            .parse()
            .map_err(|_| malformed("invalid starttime"))?;
        Ok(Self::new(pid, ppid, name, starttime))
    }

    /// Joined namespace of a species
    #[must_use]
    pub const fn namespace(&self, ns_type: NamespaceType) -> Option<NamespaceId> {
        self.namespaces[ns_type.index()]
    }

    /// Command line if known, else the command name
    #[must_use]
    pub fn display_name(&self) -> String {
        if self.cmdline.is_empty() {
            self.name.clone()
        } else {
            self.cmdline.join(" ")
        }
    }
}

/// Parse `NSpid:` from `/proc/<pid>/status`.
#[must_use]
pub fn parse_nspid(status: &str) -> Vec<ProcessId> {
    status
        .lines()
        .find_map(|line| line.strip_prefix("NSpid:"))
        .map(|rest| {
            rest.split_whitespace()
                .filter_map(|p| p.parse().ok())
                .collect()
        })
        .unwrap_or_default()
}

/// Split a NUL-separated `/proc/<pid>/cmdline`.
#[must_use]
pub fn parse_cmdline(raw: &[u8]) -> Vec<String> {
    raw.split(|b| *b == 0)
        .filter(|arg| !arg.is_empty())
        .map(|arg| String::from_utf8_lossy(arg).into_owned())
        .collect()
}

/// All processes of one discovery run
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
#[serde(transparent)]
pub struct ProcessTable {
    processes: BTreeMap<ProcessId, Process>,
}

impl ProcessTable {
    /// Read the process table from `/proc`
    #[must_use]
    pub fn new() -> Self {
        Self::from_procfs(Path::new("/proc"))
    }

    /// Read the process table from a procfs mounted at `procfs`.
    ///
    /// Processes vanishing while being read are skipped.
    #[must_use]
    pub fn from_procfs(procfs: &Path) -> Self {
        let entries = match fs::read_dir(procfs) {
            Ok(entries) => entries,
            Err(e) => {
                debug!(procfs = %procfs.display(), error = %e, "Cannot list processes");
                return Self::default();
            }
        };
        let processes = entries
            .filter_map(std::result::Result::ok)
            .filter_map(|entry| entry.file_name().to_str()?.parse::<i32>().ok())
            .filter_map(|pid| read_process(procfs, ProcessId::from_raw(pid)))
            .collect::<Vec<_>>();
        Self::from_processes(processes)
    }

    /// Build a table from processes, wiring parents and children
    #[must_use]
    pub fn from_processes(processes: impl IntoIterator<Item = Process>) -> Self {
        let mut processes: BTreeMap<ProcessId, Process> =
            processes.into_iter().map(|p| (p.pid, p)).collect();
        let links: Vec<(ProcessId, ProcessId)> = processes
            .values()
            .filter(|p| p.ppid != p.pid && processes.contains_key(&p.ppid))
            .map(|p| (p.pid, p.ppid))
            .collect();
        for (pid, ppid) in links {
            if let Some(child) = processes.get_mut(&pid) {
                child.parent = Some(ppid);
            }
            if let Some(parent) = processes.get_mut(&ppid) {
                parent.children.push(pid);
            }
        }
        Self { processes }
    }

    /// Look up a process
    #[must_use]
    pub fn get(&self, pid: ProcessId) -> Option<&Process> {
        self.processes.get(&pid)
    }

    pub(crate) fn get_mut(&mut self, pid: ProcessId) -> Option<&mut Process> {
        self.processes.get_mut(&pid)
    }

    /// Parent of a process, if still in the table
    #[must_use]
    pub fn parent_of(&self, process: &Process) -> Option<&Process> {
        process.parent.and_then(|ppid| self.get(ppid))
    }

    /// Number of processes
    #[must_use]
    pub fn len(&self) -> usize {
        self.processes.len()
    }

    /// Whether the table is empty
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.processes.is_empty()
    }

    /// Processes in ascending PID order
    pub fn iter(&self) -> impl Iterator<Item = &Process> {
        self.processes.values()
    }

    /// PIDs in ascending order
    #[must_use]
    pub fn pids(&self) -> Vec<ProcessId> {
        self.processes.keys().copied().collect()
    }

    /// Processes joined to a namespace
    pub fn joined(&self, ns_type: NamespaceType, id: NamespaceId) -> impl Iterator<Item = &Process> {
        self.processes
            .values()
            .filter(move |p| p.namespace(ns_type) == Some(id))
    }

    /// Drop a process from this run; its relatives stop referring to it.
    pub(crate) fn remove(&mut self, pid: ProcessId) -> Option<Process> {
        let process = self.processes.remove(&pid)?;
        if let Some(parent) = process.parent.and_then(|ppid| self.processes.get_mut(&ppid)) {
            parent.children.retain(|c| *c != pid);
        }
        for child in &process.children {
            if let Some(child) = self.processes.get_mut(child) {
                child.parent = None;
            }
        }
        Some(process)
    }
}

fn read_process(procfs: &Path, pid: ProcessId) -> Option<Process> {
    let dir = procfs.join(pid.to_string());
    // The kernel does not escape the command name, which may hold any bytes.
    let stat = match fs::read(dir.join("stat")) {
        Ok(stat) => String::from_utf8_lossy(&stat).into_owned(),
        Err(e) => {
            trace!(%pid, error = %e, "Process vanished");
            return None;
        }
    };
    let mut process = match Process::from_stat(&stat) {
        Ok(process) => process,
        Err(e) => {
            debug!(%pid, error = %e, "Skipping process");
            return None;
        }
    };
    if let Ok(raw) = fs::read(dir.join("cmdline")) {
        process.cmdline = parse_cmdline(&raw);
    }
    if let Ok(status) = fs::read(dir.join("status")) {
        process.nspid = parse_nspid(&String::from_utf8_lossy(&status));
    }
    Some(process)
}
