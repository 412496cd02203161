// End-to-end driver tests against a fake cgroup v1 tree

use resgroup_core::cgroup::fixture::FakeCgroupFs;
use resgroup_core::cgroup::{CgroupError, HostResources};
use resgroup_core::{CgroupOps, CgroupV1, ChunkAccounting, Controller, GroupId, ProcessRole};

const HOST: HostResources = HostResources {
    ncores: 8,
    total_ram: 16 << 30,
    total_swap: 4 << 30,
};

fn coordinator(fs: &FakeCgroupFs) -> Box<dyn CgroupOps> {
    let mut ops = CgroupV1::new(fs.config()).with_host(HOST);
    assert!(ops.probe());
    Box::new(ops)
}

#[test]
fn test_full_group_lifecycle() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
    for group in [GroupId::DEFAULT, GroupId::SYSTEM] {
        fs.populate_group(group).unwrap();
    }

    let ops = coordinator(&fs);
    ops.check().unwrap();
    ops.init().unwrap();

    let group = GroupId(20001);
    fs.populate_group(group).unwrap();
    ops.create(group).unwrap();

    ops.set_cpu_limit(group, 20).unwrap();
    let shares = fs.group_file(group, Controller::Cpu, "cpu.shares");
    // root shares are 1024 * 10 after init
    assert_eq!(fs.read(&shares).unwrap(), "2048");

    ops.set_memory_limit_by_chunks(group, 256).unwrap();
    let limit = fs.group_file(group, Controller::Memory, "memory.limit_in_bytes");
    assert_eq!(fs.read(&limit).unwrap(), (256u64 << 20).to_string());
    assert_eq!(ops.get_memory_limit_chunks(group).unwrap(), 256);

    ops.set_cpuset(group, "2-3").unwrap();
    assert_eq!(ops.get_cpuset(group).unwrap().as_deref(), Some("2-3"));

    // one full core for one second on an eight core host
    let usage = fs.group_file(group, Controller::CpuAcct, "cpuacct.usage");
    fs.set(&usage, "1000000000").unwrap();
    let ns = ops.get_cpu_usage(group).unwrap();
    let percent = ops.convert_cpu_usage(ns, 1_000_000).unwrap();
    assert!((percent - 12.5).abs() < 1e-9);

    // processes of the group end up in the default group
    let procs = fs.group_file(group, Controller::Cpu, "cgroup.procs");
    fs.set(&procs, "501\n502\n").unwrap();
    let lock = ops.lock(group, Controller::Cpu, true).unwrap().unwrap();
    ops.detach(group, Controller::Cpu, &lock).unwrap();
    drop(lock);

    let default_procs = fs.group_file(GroupId::DEFAULT, Controller::Cpu, "cgroup.procs");
    let moved = std::fs::read_to_string(default_procs).unwrap();
    assert!(moved.ends_with("501\n502\n"));
}

#[test]
fn test_create_then_destroy_leaves_no_trace() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FakeCgroupFs::new(dir.path()).build().unwrap();
    for group in [GroupId::DEFAULT, GroupId::SYSTEM] {
        fs.populate_group(group).unwrap();
    }

    let mut driver = CgroupV1::new(fs.config())
        .with_host(HOST)
        .with_rmdir(FakeCgroupFs::rmdir);
    assert!(driver.probe());
    let ops: Box<dyn CgroupOps> = Box::new(driver);
    ops.check().unwrap();
    ops.init().unwrap();

    let group = GroupId(20010);
    fs.populate_group(group).unwrap();
    ops.create(group).unwrap();
    ops.attach(group, 777, false).unwrap();
    ops.destroy(group, true).unwrap();

    for controller in Controller::ALL {
        assert!(!fs.group_dir(group, controller).exists());
    }
    let default_procs = fs.group_file(GroupId::DEFAULT, Controller::Cpu, "cgroup.procs");
    let migrated = std::fs::read_to_string(default_procs).unwrap();
    assert!(migrated.lines().any(|pid| pid == "777"));

    // destroying again is a no-op
    ops.destroy(group, true).unwrap();
}

#[test]
fn test_nested_container_layout() {
    let dir = tempfile::tempdir().unwrap();
    let mut builder = FakeCgroupFs::new(dir.path()).with_parent_quota(400_000);
    for controller in Controller::ALL {
        builder = builder.with_component_dir(controller, "/docker/3f2a");
    }
    let fs = builder.build().unwrap();

    let mut config = fs.config();
    config.mount_dir = None;
    let mut ops = CgroupV1::new(config).with_host(HOST);
    assert!(ops.probe());

    let layout = ops.layout().unwrap();
    for controller in Controller::ALL {
        assert_eq!(layout.component_dir(controller), "docker/3f2a");
        assert!(layout.engine_dir(controller).ends_with("docker/3f2a/gpdb"));
    }

    ops.check().unwrap();
    let info = ops.system_info().unwrap();
    assert_eq!(info.parent_cfs_quota_us, 400_000);
    assert_eq!(info.system_cfs_quota_us, 800_000);

    // the container owns half the host: a full core reads as 25%
    let percent = CgroupOps::convert_cpu_usage(&ops, 1_000_000_000, 1_000_000).unwrap();
    assert!((percent - 25.0).abs() < 1e-9);
}

#[test]
fn test_optional_cpuset_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FakeCgroupFs::new(dir.path())
        .without_controller(Controller::Cpuset)
        .build()
        .unwrap();
    fs.populate_group(GroupId::DEFAULT).unwrap();

    let mut config = fs.config();
    config.cpuset_is_optional = true;
    let mut ops = CgroupV1::new(config)
        .with_host(HOST)
        .with_role(ProcessRole::worker())
        .with_accounting(ChunkAccounting::default());
    assert!(ops.probe());
    ops.check().unwrap();
    assert!(!ops.capabilities().cpuset);

    // cpuset operations quietly do nothing
    assert_eq!(ops.get_cpuset(GroupId::DEFAULT).unwrap(), None);
    ops.set_cpuset(GroupId::DEFAULT, "0").unwrap();
    ops.attach(GroupId::DEFAULT, 601, true).unwrap();
}

#[test]
fn test_mandatory_cpuset_unavailable() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FakeCgroupFs::new(dir.path())
        .without_controller(Controller::Cpuset)
        .build()
        .unwrap();

    let ops = coordinator_unprobed(&fs);
    let err = ops.check().unwrap_err();
    assert!(err.is_config());
    assert!(err.to_string().contains("cpuset"));
}

fn coordinator_unprobed(fs: &FakeCgroupFs) -> CgroupV1 {
    let mut ops = CgroupV1::new(fs.config()).with_host(HOST);
    assert!(!ops.probe());
    ops
}

#[test]
fn test_destroy_of_unknown_group_is_noop() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FakeCgroupFs::new(dir.path()).build().unwrap();

    let ops = coordinator(&fs);
    ops.destroy(GroupId(20002), true).unwrap();
    ops.destroy(GroupId(20002), false).unwrap();
}

#[test]
fn test_operations_need_probe() {
    let dir = tempfile::tempdir().unwrap();
    let fs = FakeCgroupFs::new(dir.path()).build().unwrap();

    let ops = CgroupV1::new(fs.config());
    assert!(matches!(
        ops.create(GroupId(20003)),
        Err(CgroupError::MountNotFound)
    ));
}
