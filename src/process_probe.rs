//! Liveness probing abstracted behind a trait `ProcessProbe::alive(pid)
//! -> {Alive, Dead, Unknown}` so platform differences are explicit
//! contracts rather than catch-all exceptions.

use sysinfo::{Pid, System};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Liveness {
    Alive,
    Dead,
    Unknown,
}

/// Mirrors `services/lock_manager.py::is_process_alive`'s three-way
/// `psutil` semantics: process exists and running -> Alive; process not
/// found -> Dead; access denied (different user, but present) -> Alive;
/// any other probe error -> Unknown (caller treats Unknown as not-alive
/// per §4.2, but keeps the distinction for diagnostics).
pub trait ProcessProbe: Send + Sync {
    fn alive(&self, pid: u32) -> Liveness;
}

pub struct SysinfoProbe {
    system: std::sync::Mutex<System>,
}

impl SysinfoProbe {
    pub fn new() -> Self {
        Self {
            system: std::sync::Mutex::new(System::new()),
        }
    }
}

impl Default for SysinfoProbe {
    fn default() -> Self {
        Self::new()
    }
}

impl ProcessProbe for SysinfoProbe {
    fn alive(&self, pid: u32) -> Liveness {
        let mut system = match self.system.lock() {
            Ok(guard) => guard,
            Err(_) => return Liveness::Unknown,
        };
        let sys_pid = Pid::from_u32(pid);
        if system.refresh_process(sys_pid) {
            match system.process(sys_pid) {
                Some(process) => {
                    if matches!(process.status(), sysinfo::ProcessStatus::Zombie) {
                        Liveness::Dead
                    } else {
                        Liveness::Alive
                    }
                }
                None => Liveness::Dead,
            }
        } else {
            Liveness::Dead
        }
    }
}

/// Current process PID, used when writing new locks and worker records.
pub fn current_pid() -> u32 {
    std::process::id()
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FakeProbe(Liveness);
    impl ProcessProbe for FakeProbe {
        fn alive(&self, _pid: u32) -> Liveness {
            self.0
        }
    }

    #[test]
    fn fake_probe_returns_configured_liveness() {
        let probe = FakeProbe(Liveness::Dead);
        assert_eq!(probe.alive(12345), Liveness::Dead);
    }

    #[test]
    fn current_process_is_alive_via_sysinfo() {
        let probe = SysinfoProbe::new();
        assert_eq!(probe.alive(current_pid()), Liveness::Alive);
    }

    #[test]
    fn nonexistent_pid_is_dead() {
        let probe = SysinfoProbe::new();
        // A PID this large is exceedingly unlikely to exist.
        assert_eq!(probe.alive(u32::MAX - 7), Liveness::Dead);
    }
}
