//! Process identity as seen by the driver

use serde::{Deserialize, Serialize};

/// Who is calling into the driver
///
/// The coordinator runs the check and init phases; workers only attach
/// themselves and adjust groups.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessRole {
    pub pid: u32,
    pub is_coordinator: bool,
}

impl ProcessRole {
    /// The current process acting as coordinator
    pub fn coordinator() -> Self {
        Self {
            pid: std::process::id(),
            is_coordinator: true,
        }
    }

    /// The current process acting as a worker
    pub fn worker() -> Self {
        Self {
            pid: std::process::id(),
            is_coordinator: false,
        }
    }
}
