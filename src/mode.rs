use crate::types::OperatingMode;

/// Resolves the process-wide operating mode and the simulate-vs-commit flag.
#[derive(Debug, Clone, Copy)]
pub struct ModePolicy {
    mode: OperatingMode,
}

impl ModePolicy {
    pub fn new(mode: OperatingMode) -> Self {
        Self { mode }
    }

    pub fn current_mode(&self) -> OperatingMode {
        self.mode
    }

    /// TEST never commits. Other modes commit only on an explicit `Some(false)`.
    pub fn effective_dry_run(mode: OperatingMode, requested: Option<bool>) -> bool {
        match mode {
            OperatingMode::Test => true,
            OperatingMode::SafeTest | OperatingMode::Prod => requested.unwrap_or(true),
        }
    }

    pub fn resolve_dry_run(&self, requested: Option<bool>) -> bool {
        Self::effective_dry_run(self.mode, requested)
    }
}
