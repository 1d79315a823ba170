//! Construction-time security posture probes and the policy that gates
//! them. Pure policy hooks: run once, at `Vault` construction, never on the
//! data path (spec.md §1, §6, §9).

use std::sync::Arc;

use crate::error::{SecurityViolationKind, VaultError};
use crate::types::{PostureAction, SecurityPolicy};

/// A violation callback invoked once per tripped `warn` check, before
/// construction proceeds.
pub type ViolationCallback = Arc<dyn Fn(SecurityViolationKind) + Send + Sync>;

/// The four posture checks. Genuine root/debugger/emulator detection is
/// platform-specific and partly unimplementable from a portable desktop/
/// server Rust crate; `debug_build` and (on Linux) `debugger_attached` are
/// real, the rest default to "not detected" but remain overridable so a
/// host application can supply its own detection — the hook stays real and
/// testable even where the built-in heuristic structurally cannot fire.
pub struct SecurityProbes {
    debugger_attached: Box<dyn Fn() -> bool + Send + Sync>,
    rooted_device: Box<dyn Fn() -> bool + Send + Sync>,
    emulator: Box<dyn Fn() -> bool + Send + Sync>,
}

impl Default for SecurityProbes {
    fn default() -> Self {
        Self {
            debugger_attached: Box::new(debugger_attached_heuristic),
            rooted_device: Box::new(|| false),
            emulator: Box::new(|| false),
        }
    }
}

impl SecurityProbes {
    pub fn debug_build(&self) -> bool {
        cfg!(debug_assertions)
    }

    pub fn debugger_attached(&self) -> bool {
        (self.debugger_attached)()
    }

    pub fn rooted_device(&self) -> bool {
        (self.rooted_device)()
    }

    pub fn emulator(&self) -> bool {
        (self.emulator)()
    }

    pub fn with_debugger_probe(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.debugger_attached = Box::new(probe);
        self
    }

    pub fn with_rooted_probe(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.rooted_device = Box::new(probe);
        self
    }

    pub fn with_emulator_probe(mut self, probe: impl Fn() -> bool + Send + Sync + 'static) -> Self {
        self.emulator = Box::new(probe);
        self
    }
}

#[cfg(target_os = "linux")]
fn debugger_attached_heuristic() -> bool {
    std::fs::read_to_string("/proc/self/status")
        .ok()
        .and_then(|status| {
            status
                .lines()
                .find_map(|line| line.strip_prefix("TracerPid:"))
                .map(|pid| pid.trim() != "0")
        })
        .unwrap_or(false)
}

#[cfg(not(target_os = "linux"))]
fn debugger_attached_heuristic() -> bool {
    false
}

/// Evaluates every posture check against its configured action. A `block`
/// on a satisfied check fails construction; a `warn` invokes `on_warn`
/// before proceeding; `ignore` (the default) never runs the probe's action.
pub fn enforce(
    policy: &SecurityPolicy,
    probes: &SecurityProbes,
    on_warn: Option<&ViolationCallback>,
) -> Result<(), VaultError> {
    let checks: [(SecurityViolationKind, PostureAction, bool); 4] = [
        (SecurityViolationKind::DebugBuild, policy.debug_build, probes.debug_build()),
        (
            SecurityViolationKind::DebuggerAttached,
            policy.debugger_attached,
            probes.debugger_attached(),
        ),
        (SecurityViolationKind::RootedDevice, policy.rooted_device, probes.rooted_device()),
        (SecurityViolationKind::Emulator, policy.emulator, probes.emulator()),
    ];

    for (kind, action, satisfied) in checks {
        if !satisfied {
            continue;
        }
        match action {
            PostureAction::Ignore => {}
            PostureAction::Warn => {
                if let Some(cb) = on_warn {
                    cb(kind);
                }
            }
            PostureAction::Block => return Err(VaultError::SecurityViolation(kind)),
        }
    }
    Ok(())
}
