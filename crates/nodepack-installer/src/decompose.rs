use nodepack_resolver::{Action, ActionKind};

/// The install stages, in execution order. `finalize`, `install` and
/// `postinstall` mutate the live `node_modules` and run serially; the rest
/// work on independent staging slots or disk targets and run in parallel.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Phase {
    Fetch,
    Extract,
    Preinstall,
    Build,
    Remove,
    Finalize,
    Install,
    Postinstall,
    Test,
}

impl Phase {
    pub const ORDER: [Phase; 9] = [
        Phase::Fetch,
        Phase::Extract,
        Phase::Preinstall,
        Phase::Build,
        Phase::Remove,
        Phase::Finalize,
        Phase::Install,
        Phase::Postinstall,
        Phase::Test,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Fetch => "fetch",
            Self::Extract => "extract",
            Self::Preinstall => "preinstall",
            Self::Build => "build",
            Self::Remove => "remove",
            Self::Finalize => "finalize",
            Self::Install => "install",
            Self::Postinstall => "postinstall",
            Self::Test => "test",
        }
    }

    pub fn is_serial(self) -> bool {
        matches!(self, Self::Finalize | Self::Install | Self::Postinstall)
    }

    /// The lifecycle script this phase invokes, if any.
    pub fn script_name(self) -> Option<&'static str> {
        match self {
            Self::Preinstall => Some("preinstall"),
            Self::Build => Some("build"),
            Self::Install => Some("install"),
            Self::Postinstall => Some("postinstall"),
            Self::Test => Some("test"),
            _ => None,
        }
    }

    pub fn applies_to(self, kind: ActionKind) -> bool {
        match self {
            Self::Remove => matches!(kind, ActionKind::Remove | ActionKind::Update),
            Self::Finalize => matches!(
                kind,
                ActionKind::Add | ActionKind::Update | ActionKind::Move
            ),
            _ => matches!(kind, ActionKind::Add | ActionKind::Update),
        }
    }
}

/// One lifecycle entry of the plan: a phase applied to the action at
/// `action` (an index into the differ's action list).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlanStep {
    pub phase: Phase,
    pub action: usize,
}

#[derive(Debug, Clone, Default)]
pub struct InstallPlan {
    pub steps: Vec<PlanStep>,
}

impl InstallPlan {
    pub fn entries_for(&self, phase: Phase) -> Vec<usize> {
        self.steps
            .iter()
            .filter(|step| step.phase == phase)
            .map(|step| step.action)
            .collect()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Expands every action into its per-phase entries, preserving the differ's
/// action order within each phase. The test phase only exists when enabled.
pub fn decompose(actions: &[Action], npat: bool) -> InstallPlan {
    let mut steps = Vec::new();
    for phase in Phase::ORDER {
        if phase == Phase::Test && !npat {
            continue;
        }
        for (index, action) in actions.iter().enumerate() {
            if phase.applies_to(action.kind) {
                steps.push(PlanStep {
                    phase,
                    action: index,
                });
            }
        }
    }
    InstallPlan { steps }
}
