//! Playground configuration.

use crate::assemble::Theme;
use crate::host::HostConfig;
use crate::scheduler::RunPolicy;

/// Top-level configuration for one playground instance.
#[derive(Clone, Debug, Default)]
pub struct PlaygroundConfig {
    /// Preview theme baked into assembled documents.
    pub theme: Theme,
    /// When edits turn into loads.
    pub run_policy: RunPolicy,
    /// Execution host limits.
    pub host: HostConfig,
}
