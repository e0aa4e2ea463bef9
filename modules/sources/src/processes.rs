//! PID to process name resolution through the OS process list.

use sysinfo::{Pid, System};

/// Snapshot of running processes, taken once per enumeration.
pub struct ProcessTable {
    sys: System,
}

impl ProcessTable {
    /// Blocking: walks every process on the host.
    pub fn snapshot() -> Self {
        ProcessTable { sys: System::new_all() }
    }

    pub fn name(&self, pid: u32) -> Option<String> {
        let process = self.sys.process(Pid::from_u32(pid))?;
        let name = process.name().to_string_lossy().trim().to_string();
        if name.is_empty() { None } else { Some(name) }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn own_process_has_a_name() {
        let table = ProcessTable::snapshot();
        assert!(table.name(std::process::id()).is_some());
        assert_eq!(table.name(u32::MAX), None);
    }
}
