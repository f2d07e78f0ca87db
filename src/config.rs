// Builder pattern for the small set of knobs this collector needs to be
// both configurable and testable: which collection phases run, how a
// reentrant allocation is reported, whether fresh payload gets zeroed.

/// What a finalizer re-entering `allocate` should do. Spec §7 mandates a
/// process abort; `Panic` exists purely so `#[test]`s can observe the
/// reentrancy guard firing without killing the test binary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReentrancyPolicy {
    Abort,
    Panic,
}

impl Default for ReentrancyPolicy {
    fn default() -> Self {
        ReentrancyPolicy::Abort
    }
}

#[derive(Debug, Clone, Copy)]
pub struct GcConfig {
    /// Run the mark phase during `collect()`. Disabling this is only useful
    /// for tests that want to observe sweep/coalesce in isolation.
    pub mark_phase: bool,
    /// Run the sweep phase during `collect()`.
    pub sweep_phase: bool,
    /// Run the coalesce phase during `collect()`.
    pub coalesce_phase: bool,
    /// How a reentrant `allocate` call (from within a finalizer) is reported.
    pub reentrancy_policy: ReentrancyPolicy,
    /// Zero fresh payload bytes on allocation. Spec §4.2 only guarantees
    /// payload is *not* zeroed by default; this does not change reachability
    /// or any other observable collector behavior, so it's safe to offer as
    /// an opt-in for hosts that want it.
    pub zero_on_alloc: bool,
}

impl Default for GcConfig {
    fn default() -> Self {
        Self {
            mark_phase: true,
            sweep_phase: true,
            coalesce_phase: true,
            reentrancy_policy: ReentrancyPolicy::default(),
            zero_on_alloc: false,
        }
    }
}

static CONFIG: std::sync::OnceLock<parking_lot::RwLock<GcConfig>> = std::sync::OnceLock::new();

fn cell() -> &'static parking_lot::RwLock<GcConfig> {
    CONFIG.get_or_init(|| parking_lot::RwLock::new(GcConfig::default()))
}

/// Install a new global configuration, replacing whatever was set before.
pub fn configure(config: GcConfig) {
    *cell().write() = config;
}

pub(crate) fn current() -> GcConfig {
    *cell().read()
}

impl GcConfig {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn mark_phase(mut self, val: bool) -> Self {
        self.mark_phase = val;
        self
    }

    pub fn sweep_phase(mut self, val: bool) -> Self {
        self.sweep_phase = val;
        self
    }

    pub fn coalesce_phase(mut self, val: bool) -> Self {
        self.coalesce_phase = val;
        self
    }

    pub fn reentrancy_policy(mut self, val: ReentrancyPolicy) -> Self {
        self.reentrancy_policy = val;
        self
    }

    pub fn zero_on_alloc(mut self, val: bool) -> Self {
        self.zero_on_alloc = val;
        self
    }
}
