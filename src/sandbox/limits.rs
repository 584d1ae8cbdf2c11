use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// A resource-limit dimension for a sandboxed test process.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ExecLimit {
    CpuTimeSec,
    StackSizeKb,
    AddressSpaceKb,
    FileSizeKb,
    /// Maximum number of processes the test process may create.
    Processes,
    OutputMaxBytes,
    OutputMaxLines,
    OutputLineMaxChars,
}

/// A sparse map of resource limits; an absent key means that
/// dimension is unbounded.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ExecutionPreferences {
    limits: HashMap<ExecLimit, u64>,
}

impl ExecutionPreferences {
    /// No limits at all. Suitable only for trusted commands
    /// (e.g. running the compiler).
    pub fn unbounded() -> Self {
        Self::default()
    }

    /// Default limits for an untrusted test process.
    pub fn limited() -> Self {
        let mut prefs = Self::default();
        prefs.set(ExecLimit::CpuTimeSec, 10);
        prefs.set(ExecLimit::StackSizeKb, 128);
        prefs.set(ExecLimit::AddressSpaceKb, 32 * 1024);
        prefs.set(ExecLimit::FileSizeKb, 0);
        prefs.set(ExecLimit::Processes, 0);
        prefs.set(ExecLimit::OutputMaxBytes, 10_000);
        prefs.set(ExecLimit::OutputMaxLines, 50);
        prefs.set(ExecLimit::OutputLineMaxChars, 200);
        prefs
    }

    /// Default limits for an untrusted interpreted test process. The
    /// interpreter itself needs far more address space and stack than
    /// a small native binary, so those two limits are raised.
    pub fn limited_script() -> Self {
        let mut prefs = Self::limited();
        prefs.set(ExecLimit::StackSizeKb, 8 * 1024);
        prefs.set(ExecLimit::AddressSpaceKb, 512 * 1024);
        prefs
    }

    pub fn set(&mut self, limit: ExecLimit, value: u64) -> &mut Self {
        self.limits.insert(limit, value);
        self
    }

    pub fn get(&self, limit: ExecLimit) -> Option<u64> {
        self.limits.get(&limit).copied()
    }

    /// Overlay another preference set on top of this one.
    pub fn merge(&mut self, other: &ExecutionPreferences) {
        for (k, v) in &other.limits {
            self.limits.insert(*k, *v);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unset_limit_is_unbounded() {
        let prefs = ExecutionPreferences::unbounded();
        assert_eq!(prefs.get(ExecLimit::CpuTimeSec), None);
    }

    #[test]
    fn test_limited_defaults() {
        let prefs = ExecutionPreferences::limited();
        assert_eq!(prefs.get(ExecLimit::CpuTimeSec), Some(10));
        assert_eq!(prefs.get(ExecLimit::Processes), Some(0));
        assert_eq!(prefs.get(ExecLimit::OutputMaxLines), Some(50));
    }

    #[test]
    fn test_script_profile_keeps_output_caps() {
        let prefs = ExecutionPreferences::limited_script();
        assert!(prefs.get(ExecLimit::AddressSpaceKb).unwrap() > 32 * 1024);
        assert_eq!(prefs.get(ExecLimit::OutputMaxBytes), Some(10_000));
        assert_eq!(prefs.get(ExecLimit::Processes), Some(0));
    }

    #[test]
    fn test_merge_overrides() {
        let mut prefs = ExecutionPreferences::limited();
        let mut overrides = ExecutionPreferences::unbounded();
        overrides.set(ExecLimit::CpuTimeSec, 30);
        prefs.merge(&overrides);
        assert_eq!(prefs.get(ExecLimit::CpuTimeSec), Some(30));
        assert_eq!(prefs.get(ExecLimit::StackSizeKb), Some(128));
    }
}
