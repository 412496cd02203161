//! Permission probing of group directories and control files

use nix::unistd::access;
use std::io;

use super::error::{CgroupError, Result};
use super::layout::MountLayout;
use super::types::{Access, BaseDir, Capabilities, Capability, Controller, GroupId, PROCS_FILE};

/// One required access on a directory (`file` empty) or control file
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PermRule {
    pub controller: Controller,
    pub file: &'static str,
    pub access: Access,
}

const fn rule(controller: Controller, file: &'static str, access: Access) -> PermRule {
    PermRule {
        controller,
        file,
        access,
    }
}

// Keep in sync with the operator-side environment check.
pub const CPU_RULES: &[PermRule] = &[
    rule(Controller::Cpu, "", Access::RWX),
    rule(Controller::Cpu, PROCS_FILE, Access::RW),
    rule(Controller::Cpu, "cpu.cfs_period_us", Access::RW),
    rule(Controller::Cpu, "cpu.cfs_quota_us", Access::RW),
    rule(Controller::Cpu, "cpu.shares", Access::RW),
];

pub const CPUACCT_RULES: &[PermRule] = &[
    rule(Controller::CpuAcct, "", Access::RWX),
    rule(Controller::CpuAcct, PROCS_FILE, Access::RW),
    rule(Controller::CpuAcct, "cpuacct.usage", Access::R),
    rule(Controller::CpuAcct, "cpuacct.stat", Access::R),
];

pub const CPUSET_RULES: &[PermRule] = &[
    rule(Controller::Cpuset, "", Access::RWX),
    rule(Controller::Cpuset, PROCS_FILE, Access::RW),
    rule(Controller::Cpuset, "cpuset.cpus", Access::RW),
    rule(Controller::Cpuset, "cpuset.mems", Access::RW),
];

pub const MEMORY_RULES: &[PermRule] = &[
    rule(Controller::Memory, "", Access::RWX),
    rule(Controller::Memory, "memory.limit_in_bytes", Access::RW),
    rule(Controller::Memory, "memory.usage_in_bytes", Access::R),
];

// Only present with CONFIG_MEMCG_SWAP_ENABLED or swapaccount=1.
pub const SWAP_RULES: &[PermRule] = &[
    rule(Controller::Memory, "", Access::RWX),
    rule(Controller::Memory, "memory.memsw.limit_in_bytes", Access::RW),
    rule(Controller::Memory, "memory.memsw.usage_in_bytes", Access::R),
];

/// A list of rules that is satisfied or failed as a whole
#[derive(Debug, Clone)]
pub struct PermSet {
    pub name: &'static str,
    pub rules: &'static [PermRule],
    /// Failures of an optional set are never reported
    pub optional: bool,
    /// Capability flag that records the outcome when probing the root group
    pub capability: Option<Capability>,
    /// Sets switched off by configuration are skipped
    pub enabled: bool,
}

impl PermSet {
    /// Check every rule of the set against `group`
    ///
    /// Returns `Ok(false)` on the first failing rule unless `report` is on
    /// and the set is mandatory, in which case the failure is an error.
    pub fn check(
        &self,
        layout: &MountLayout,
        caps: &Capabilities,
        group: GroupId,
        report: bool,
    ) -> Result<bool> {
        let records = group.is_root() && self.capability.is_some();
        if records {
            self.record(caps, false);
        }

        for rule in self.rules {
            let failure = match layout.path(group, BaseDir::Engine, rule.controller, rule.file) {
                Ok(path) => match access(&path, rule.access.flags()) {
                    Ok(()) => None,
                    Err(errno) => Some(CgroupError::config(
                        path,
                        rule.file,
                        io::Error::from(errno),
                    )),
                },
                Err(too_long) => Some(too_long),
            };

            if let Some(err) = failure {
                if report && !self.optional {
                    return Err(err);
                }
                return Ok(false);
            }
        }

        if records {
            self.record(caps, true);
        }
        Ok(true)
    }

    fn record(&self, caps: &Capabilities, on: bool) {
        if let Some(cap) = self.capability {
            caps.set(cap, on);
        }
    }
}

/// The configured permission sets, in check order
#[derive(Debug, Clone)]
pub struct Permissions {
    sets: Vec<PermSet>,
}

impl Permissions {
    pub fn new(
        memory_enabled: bool,
        swap_enabled: bool,
        cpuset_enabled: bool,
        memory_optional: bool,
        cpuset_optional: bool,
    ) -> Self {
        let sets = vec![
            PermSet {
                name: "swap",
                rules: SWAP_RULES,
                optional: true,
                capability: Some(Capability::Swap),
                enabled: memory_enabled && swap_enabled,
            },
            PermSet {
                name: "memory",
                rules: MEMORY_RULES,
                optional: memory_optional,
                capability: Some(Capability::Memory),
                enabled: memory_enabled,
            },
            PermSet {
                name: "cpu",
                rules: CPU_RULES,
                optional: false,
                capability: None,
                enabled: true,
            },
            PermSet {
                name: "cpuacct",
                rules: CPUACCT_RULES,
                optional: false,
                capability: None,
                enabled: true,
            },
            PermSet {
                name: "cpuset",
                rules: CPUSET_RULES,
                optional: cpuset_optional,
                capability: Some(Capability::Cpuset),
                enabled: cpuset_enabled,
            },
        ];

        Self { sets }
    }

    pub fn sets(&self) -> &[PermSet] {
        &self.sets
    }

    fn cpuset_set(&self) -> Option<&PermSet> {
        self.sets.iter().find(|s| s.capability == Some(Capability::Cpuset))
    }

    /// Check the group against every enabled set
    ///
    /// A failing optional set does not fail the whole check.
    pub fn check(
        &self,
        layout: &MountLayout,
        caps: &Capabilities,
        group: GroupId,
        report: bool,
    ) -> Result<bool> {
        for set in self.sets.iter().filter(|s| s.enabled) {
            if !set.check(layout, caps, group, report)? && !set.optional {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Same as [`check`](Self::check), restricted to the cpuset set
    pub fn check_cpuset(
        &self,
        layout: &MountLayout,
        caps: &Capabilities,
        group: GroupId,
        report: bool,
    ) -> Result<bool> {
        if !caps.cpuset() {
            return Ok(true);
        }

        match self.cpuset_set() {
            Some(set) => Ok(set.check(layout, caps, group, report)? || set.optional),
            None => Ok(true),
        }
    }
}
