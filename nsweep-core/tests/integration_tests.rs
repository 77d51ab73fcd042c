use nsweep_core::*;

#[test]
fn test_namespace_type_names() {
    let names: Vec<&str> = NamespaceType::ALL.iter().map(|t| t.name()).collect();
    assert_eq!(
        names,
        ["mnt", "cgroup", "uts", "ipc", "user", "pid", "net", "time"]
    );

    assert_eq!("net".parse::<NamespaceType>().unwrap(), NamespaceType::Net);
    assert!("network".parse::<NamespaceType>().is_err());
}

#[test]
fn test_only_user_and_pid_are_hierarchical() {
    let hierarchical: Vec<NamespaceType> = NamespaceType::ALL
        .into_iter()
        .filter(|t| t.is_hierarchical())
        .collect();
    assert_eq!(hierarchical, [NamespaceType::User, NamespaceType::Pid]);
}

#[test]
fn test_clone_flags_are_distinct() {
    let mut flags: Vec<u64> = NamespaceType::ALL.iter().map(|t| t.clone_flag()).collect();
    flags.sort_unstable();
    flags.dedup();
    assert_eq!(flags.len(), NAMESPACE_TYPES);
}

#[test]
fn test_namespace_id_serde() {
    let id = NamespaceId::new(4, 4_026_531_836);
    let json = serde_json::to_string(&id).unwrap();
    let back: NamespaceId = serde_json::from_str(&json).unwrap();
    assert_eq!(id, back);
}

#[test]
fn test_namespace_ref_serde() {
    let r = NamespaceRef::new("/proc/1/ns/mnt").join("/run/mnt2");
    let json = serde_json::to_string(&r).unwrap();
    assert_eq!(json, r#"["/proc/1/ns/mnt","/run/mnt2"]"#);
}

#[test]
fn test_process_id_current() {
    let pid = ProcessId::current();
    assert!(pid.as_raw() > 0);
}
