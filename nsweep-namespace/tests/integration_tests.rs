use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use std::process::{Command, Stdio};
use std::thread::sleep;
use std::time::Duration;

use nsweep_core::{NamespaceRef, NamespaceType, ProcessId};
use nsweep_namespace::*;

const TIMEOUT: Duration = Duration::from_secs(5);

/// Fake `/proc/<pid>` entry whose `ns/net` points at one of our own
/// namespace files.
fn fake_process(procfs: &Path, pid: i32, ppid: i32, net_from: Option<&str>) {
    let dir = procfs.join(pid.to_string());
    fs::create_dir_all(dir.join("ns")).unwrap();
    fs::write(
        dir.join("stat"),
        format!("{pid} (p{pid}) S {ppid} {pid} {pid} 0 -1 0 0 0 0 0 1 2 0 0 20 0 1 0 {pid}00 1000 200 0"),
    )
    .unwrap();
    fs::write(dir.join("cmdline"), format!("p{pid}\0--flag\0")).unwrap();
    fs::write(dir.join("status"), format!("Name:\tp{pid}\nNSpid:\t{pid}\n")).unwrap();
    if let Some(source) = net_from {
        symlink(format!("/proc/self/ns/{source}"), dir.join("ns/net")).unwrap();
    }
}

fn net_only(procfs: &Path) -> DiscoverOptions {
    DiscoverOptions::none()
        .with_processes(true)
        .with_namespace_types(NamespaceFlags::NET)
        .with_procfs(procfs)
}

#[test]
fn test_fixture_leaders_and_pruning() {
    let dir = tempfile::tempdir().unwrap();
    let procfs = dir.path();
    // 1 sits in a namespace of its own, 2 and 3 share ours, 4 is unreadable.
    fake_process(procfs, 1, 0, Some("ipc"));
    fake_process(procfs, 2, 1, Some("net"));
    fake_process(procfs, 3, 2, Some("net"));
    fake_process(procfs, 4, 1, None);

    let result = discover(&net_only(procfs)).unwrap();

    assert_eq!(result.processes().len(), 3);
    assert!(result.processes().get(ProcessId::from_raw(4)).is_none());
    assert_eq!(result.diagnostics().skipped_processes, 1);
    assert_eq!(
        result.processes().get(ProcessId::from_raw(3)).unwrap().cmdline,
        ["p3", "--flag"]
    );

    let own_net = result.own_namespace(NamespaceType::Net).unwrap();
    let ns = result.namespace(NamespaceType::Net, own_net).unwrap();
    assert_eq!(ns.leaders(), [ProcessId::from_raw(2)]);
    assert_eq!(ns.reference(), &NamespaceRef::new(procfs.join("2/ns/net")));
    assert_eq!(
        ns.ealdorman(result.processes()).map(|p| p.pid),
        Some(ProcessId::from_raw(2))
    );
    assert_eq!(result.namespaces().of_type(NamespaceType::Net).len(), 2);
    assert!(result.namespaces().of_type(NamespaceType::Uts).is_empty());
}

#[test]
fn test_fixture_discovery_is_repeatable() {
    let dir = tempfile::tempdir().unwrap();
    fake_process(dir.path(), 10, 1, Some("net"));
    fake_process(dir.path(), 11, 10, Some("net"));

    let first = discover(&net_only(dir.path())).unwrap();
    let second = discover(&net_only(dir.path())).unwrap();
    assert_eq!(first.namespaces(), second.namespaces());
    assert_eq!(first.processes(), second.processes());
}

#[test]
fn test_pruned_process_no_longer_leads() {
    let dir = tempfile::tempdir().unwrap();
    let procfs = dir.path();
    // 5 has a readable uts but no net namespace; 6 has both.
    fake_process(procfs, 5, 0, None);
    fake_process(procfs, 6, 5, Some("net"));
    for pid in [5, 6] {
        symlink("/proc/self/ns/uts", procfs.join(format!("{pid}/ns/uts"))).unwrap();
    }

    let options = DiscoverOptions::none()
        .with_processes(true)
        .with_namespace_types(NamespaceFlags::UTS | NamespaceFlags::NET)
        .with_procfs(procfs);
    let result = discover(&options).unwrap();
    assert_eq!(result.diagnostics().skipped_processes, 1);

    let own_uts = result.own_namespace(NamespaceType::Uts).unwrap();
    let uts = result.namespace(NamespaceType::Uts, own_uts).unwrap();
    assert_eq!(uts.leaders(), [ProcessId::from_raw(6)]);
    assert_eq!(uts.reference(), &NamespaceRef::new(procfs.join("6/ns/uts")));
    for ns_type in [NamespaceType::Uts, NamespaceType::Net] {
        for ns in result.namespaces().of_type(ns_type).values() {
            assert!(ns.leaders().iter().all(|pid| result.processes().get(*pid).is_some()));
        }
    }
}

#[test]
fn test_dangling_fd_link_is_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let procfs = dir.path();
    fake_process(procfs, 100, 1, Some("net"));
    fs::create_dir(procfs.join("100/fd")).unwrap();
    symlink("net:[12345]", procfs.join("100/fd/3")).unwrap();

    let options = DiscoverOptions::none()
        .with_fds(true)
        .with_namespace_types(NamespaceFlags::NET)
        .with_procfs(procfs);
    let result = discover(&options).unwrap();

    assert!(result.namespaces().of_type(NamespaceType::Net).is_empty());
    assert_eq!(result.diagnostics().skipped_fds, 1);
}

#[test]
fn test_fd_references() {
    let file = fs::File::open("/proc/self/ns/uts").unwrap();
    let options = DiscoverOptions::none()
        .with_fds(true)
        .with_namespace_types(NamespaceFlags::UTS);
    let result = discover(&options).unwrap();

    let own_uts = result.own_namespace(NamespaceType::Uts).unwrap();
    let ns = result.namespace(NamespaceType::Uts, own_uts).unwrap();
    let fd_path = ns.reference().last().unwrap();
    assert!(fd_path.starts_with("/proc"));
    assert!(fd_path.parent().unwrap().ends_with("fd"));
    assert!(ns.leaders().is_empty());
    drop(file);
}

#[test]
fn test_ownership_links_to_own_user_namespace() {
    let options = DiscoverOptions::none()
        .with_processes(true)
        .with_ownership(true)
        .with_namespace_types(NamespaceFlags::USER | NamespaceFlags::NET);
    let result = discover(&options).unwrap();

    let own_user = result.own_namespace(NamespaceType::User).unwrap();
    let own_net = result.own_namespace(NamespaceType::Net).unwrap();
    let net = result.namespace(NamespaceType::Net, own_net).unwrap();
    assert_eq!(net.owner(), Some(own_user));
    let user = result.namespace(NamespaceType::User, own_user).unwrap();
    assert!(user.owned(NamespaceType::Net).contains(&own_net));
}

#[test]
fn test_pid_map_for_own_process() {
    let options = DiscoverOptions::none()
        .with_processes(true)
        .with_hierarchy(true)
        .with_pid_map(true)
        .with_namespace_types(NamespaceFlags::PID);
    let result = discover(&options).unwrap();
    let map = result.pid_map().unwrap();
    let own_pidns = result.own_namespace(NamespaceType::Pid).unwrap();
    let me = ProcessId::current();
    assert_eq!(map.translate(me, own_pidns, own_pidns), Some(me));
}

#[test]
#[ignore] // Requires unprivileged user namespaces
fn test_hidden_intermediate_user_namespace() {
    // Each unshare execs the next, so the child PID ends up two user
    // namespaces below ours with nobody in the middle one.
    let mut child = Command::new("unshare")
        .args(["--user", "unshare", "--user", "sleep", "10"])
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    sleep(Duration::from_millis(500));
    let pid = ProcessId::from_raw(i32::try_from(child.id()).unwrap());

    let options = DiscoverOptions::none()
        .with_processes(true)
        .with_hierarchy(true)
        .with_namespace_types(NamespaceFlags::USER);
    let result = discover(&options);
    child.kill().unwrap();
    child.wait().unwrap();
    let result = result.unwrap();

    let leaf = result
        .processes()
        .get(pid)
        .and_then(|p| p.namespace(NamespaceType::User))
        .unwrap();
    let chain = result.namespaces().ancestors(NamespaceType::User, leaf);
    let own_user = result.own_namespace(NamespaceType::User).unwrap();
    assert!(chain.len() >= 2);
    assert!(result.namespace(NamespaceType::User, chain[0]).unwrap().is_hidden());
    assert_eq!(chain[1], own_user);
    assert!(result.diagnostics().hidden_namespaces >= 1);

    let uid = nix::unistd::getuid().as_raw();
    assert_eq!(result.namespace(NamespaceType::User, leaf).unwrap().owner_uid(), Some(uid));
}

#[test]
#[ignore] // Requires unprivileged user namespaces
fn test_ownership_in_nested_user_namespace() {
    let mut child = Command::new("unshare")
        .args(["--user", "unshare", "--user", "--net", "--uts", "sleep", "10"])
        .stdout(Stdio::null())
        .spawn()
        .unwrap();
    sleep(Duration::from_millis(500));
    let pid = ProcessId::from_raw(i32::try_from(child.id()).unwrap());

    let options = DiscoverOptions::none()
        .with_processes(true)
        .with_hierarchy(true)
        .with_ownership(true)
        .with_namespace_types(NamespaceFlags::USER | NamespaceFlags::NET | NamespaceFlags::UTS);
    let result = discover(&options);
    child.kill().unwrap();
    child.wait().unwrap();
    let result = result.unwrap();

    let process = result.processes().get(pid).unwrap();
    let leaf_user = process.namespace(NamespaceType::User).unwrap();
    assert_ne!(Some(leaf_user), result.own_namespace(NamespaceType::User));
    assert_eq!(result.namespaces().ancestors(NamespaceType::User, leaf_user).len(), 2);

    let user = result.namespace(NamespaceType::User, leaf_user).unwrap();
    for ns_type in [NamespaceType::Net, NamespaceType::Uts] {
        let id = process.namespace(ns_type).unwrap();
        assert_eq!(result.namespace(ns_type, id).unwrap().owner(), Some(leaf_user));
        assert!(user.owned(ns_type).contains(&id));
    }
}

fn sh(script: &str) {
    let status = Command::new("sh").args(["-ec", script]).status().unwrap();
    assert!(status.success(), "{script}");
}

/// Private tmpfs to hold namespace bind mounts, unmounted on drop
struct MountDir(tempfile::TempDir);

impl MountDir {
    fn new() -> Self {
        let dir = tempfile::tempdir().unwrap();
        sh(&format!(
            "mount -t tmpfs none {0} && mount --make-private {0}",
            dir.path().display()
        ));
        Self(dir)
    }

    fn path(&self) -> &Path {
        self.0.path()
    }
}

impl Drop for MountDir {
    fn drop(&mut self) {
        let _ = Command::new("umount").arg("-R").arg("-l").arg(self.path()).status();
    }
}

fn children_of_self() -> usize {
    fs::read_dir("/proc/self/task")
        .unwrap()
        .filter_map(Result::ok)
        .filter_map(|task| fs::read_to_string(task.path().join("children")).ok())
        .map(|children| children.split_whitespace().count())
        .sum()
}

#[test]
#[ignore] // Requires root
fn test_bind_mounted_namespace_without_processes() {
    let dir = MountDir::new();
    let net = dir.path().join("net");
    sh(&format!("touch {0} && unshare --net={0} true", net.display()));

    let with = discover(&DiscoverOptions::default().with_namespace_types(NamespaceFlags::NET)).unwrap();
    let found: Vec<&Namespace> = with
        .sorted_namespaces(NamespaceType::Net)
        .into_iter()
        .filter(|ns| ns.reference().last() == Some(net.as_path()))
        .collect();
    assert_eq!(found.len(), 1);
    assert!(found[0].leaders().is_empty());

    let id = found[0].id();
    let without = discover(
        &DiscoverOptions::default()
            .with_namespace_types(NamespaceFlags::NET)
            .with_bind_mounts(false),
    )
    .unwrap();
    assert!(without.namespace(NamespaceType::Net, id).is_none());
}

#[test]
#[ignore] // Requires root
fn test_gateway_chain_spawns_and_releases() {
    let dir = MountDir::new();
    let outer = dir.path().join("outer");
    let inner = dir.path().join("inner");
    // The inner mount namespace is only bind-mounted inside the outer one.
    sh(&format!(
        "touch {outer} {inner} && unshare --mount={outer} --propagation private unshare --mount={inner} true",
        outer = outer.display(),
        inner = inner.display(),
    ));

    let before = children_of_self();
    let reference: NamespaceRef = [outer.clone(), inner.clone()].into_iter().collect();
    let gateway = MountGateway::open(&reference, TIMEOUT).unwrap();
    assert_eq!(gateway.spawned(), 2);
    let pid = gateway.pid().unwrap();
    assert!(Path::new(&format!("/proc/{pid}")).exists());
    assert!(gateway.read_to_string(Path::new("/proc/self/mountinfo")).is_ok());
    gateway.close();

    assert!(!Path::new(&format!("/proc/{pid}")).exists());
    assert_eq!(children_of_self(), before);
}

#[test]
fn test_invalid_reference_spawns_nothing() {
    let before = children_of_self();
    let reference: NamespaceRef = ["/proc/self/ns/mnt", "/proc/self/ns/mnt"].into_iter().collect();
    assert!(matches!(
        MountGateway::open(&reference, TIMEOUT),
        Err(nsweep_core::Error::InvalidReference { .. })
    ));
    assert_eq!(children_of_self(), before);
}
