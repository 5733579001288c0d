//! Bounded self-repair
//!
//! When the pre-render gate fails, the orchestrator walks the three
//! strategies below in order and stops at the first one whose re-evaluation
//! passes. Strategies that perturb the request do so through a
//! `TunablesGuard`, which puts the original values back when it goes out of
//! scope, whether the attempt succeeded, failed, or returned early.

use serde::{Deserialize, Serialize};
use std::ops::{Deref, DerefMut};
use tracing::debug;

use sdk::{RunRequest, ToolKind};

/// Knobs of the repair strategies
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairSettings {
    /// Added to the temporal expansion factor by the second strategy
    pub expansion_increment: u32,

    /// Upper bound of the widened expansion factor
    pub expansion_cap: u32,

    /// Percentage cut from the target length by the third strategy
    pub trim_reduction_percent: u32,
}

impl Default for RepairSettings {
    fn default() -> Self {
        Self {
            expansion_increment: 2,
            expansion_cap: 30,
            trim_reduction_percent: 10,
        }
    }
}

/// One repair attempt, in the order they are tried
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RepairStrategy {
    /// Re-run trim unchanged
    RetryTrim,
    /// Widen temporal expansion, re-run expansion and trim
    WidenExpansion,
    /// Shorten the target length, re-run trim
    ShortenTarget,
}

impl RepairStrategy {
    pub const ORDER: [RepairStrategy; 3] = [
        RepairStrategy::RetryTrim,
        RepairStrategy::WidenExpansion,
        RepairStrategy::ShortenTarget,
    ];

    /// 1-based attempt number
    pub fn attempt(&self) -> u8 {
        match self {
            RepairStrategy::RetryTrim => 1,
            RepairStrategy::WidenExpansion => 2,
            RepairStrategy::ShortenTarget => 3,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            RepairStrategy::RetryTrim => "retry_trim",
            RepairStrategy::WidenExpansion => "widen_expansion",
            RepairStrategy::ShortenTarget => "shorten_target",
        }
    }

    /// Tools re-invoked by the attempt, in order
    pub fn tools(&self) -> &'static [ToolKind] {
        match self {
            RepairStrategy::RetryTrim | RepairStrategy::ShortenTarget => {
                &[ToolKind::TrimToLength]
            }
            RepairStrategy::WidenExpansion => {
                &[ToolKind::TemporalExpansion, ToolKind::TrimToLength]
            }
        }
    }

    /// Perturb the request for this attempt and describe the change.
    pub fn adjust(&self, request: &mut RunRequest, settings: &RepairSettings) -> String {
        match self {
            RepairStrategy::RetryTrim => "no parameter change".to_string(),
            RepairStrategy::WidenExpansion => {
                let before = request.brief.temporal_expansion;
                let after = widened_expansion(
                    before,
                    settings.expansion_increment,
                    settings.expansion_cap,
                );
                request.brief.temporal_expansion = after;
                format!("temporal_expansion {} -> {}", before, after)
            }
            RepairStrategy::ShortenTarget => {
                let before = request.target_minutes;
                let after = shortened_target(before, settings.trim_reduction_percent);
                request.target_minutes = after;
                format!("target_minutes {} -> {}", before, after)
            }
        }
    }
}

/// Expansion factor raised by `increment`, capped at `cap`; never lowered.
pub fn widened_expansion(current: u32, increment: u32, cap: u32) -> u32 {
    current.saturating_add(increment).min(cap).max(current)
}

/// Target length cut by `percent`, rounded down, at least one minute.
pub fn shortened_target(minutes: u32, percent: u32) -> u32 {
    let kept = 100u64.saturating_sub(u64::from(percent.min(100)));
    let cut = u64::from(minutes) * kept / 100;
    (cut as u32).max(1)
}

/// Scope guard over the request's tunable fields.
///
/// Dereferences to the request so attempts can read and perturb it; on drop
/// the temporal expansion factor and target length are restored.
pub struct TunablesGuard<'a> {
    request: &'a mut RunRequest,
    saved_expansion: u32,
    saved_minutes: u32,
}

impl<'a> TunablesGuard<'a> {
    pub fn new(request: &'a mut RunRequest) -> Self {
        let saved_expansion = request.brief.temporal_expansion;
        let saved_minutes = request.target_minutes;
        Self {
            request,
            saved_expansion,
            saved_minutes,
        }
    }
}

impl Deref for TunablesGuard<'_> {
    type Target = RunRequest;

    fn deref(&self) -> &RunRequest {
        self.request
    }
}

impl DerefMut for TunablesGuard<'_> {
    fn deref_mut(&mut self) -> &mut RunRequest {
        self.request
    }
}

impl Drop for TunablesGuard<'_> {
    fn drop(&mut self) {
        if self.request.brief.temporal_expansion != self.saved_expansion
            || self.request.target_minutes != self.saved_minutes
        {
            debug!(
                "Restoring tunables: temporal_expansion={}, target_minutes={}",
                self.saved_expansion, self.saved_minutes
            );
        }
        self.request.brief.temporal_expansion = self.saved_expansion;
        self.request.target_minutes = self.saved_minutes;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use sdk::{CreativeBrief, GenerationTuning, QualityWeights, RunMode};
    use std::path::PathBuf;

    fn request(expansion: u32, minutes: u32) -> RunRequest {
        RunRequest {
            project: "p".to_string(),
            project_root: PathBuf::from("/p"),
            render_dir: PathBuf::from("/r"),
            brief: CreativeBrief {
                prompt: "x".to_string(),
                weights: QualityWeights::default(),
                temporal_expansion: expansion,
                tuning: GenerationTuning::default(),
            },
            target_minutes: minutes,
            mode: RunMode::Full,
        }
    }

    #[test]
    fn test_widened_expansion() {
        assert_eq!(widened_expansion(4, 2, 30), 6);
        assert_eq!(widened_expansion(29, 2, 30), 30);
        assert_eq!(widened_expansion(30, 2, 30), 30);
        assert_eq!(widened_expansion(40, 2, 30), 40);
    }

    #[test]
    fn test_shortened_target() {
        assert_eq!(shortened_target(10, 10), 9);
        assert_eq!(shortened_target(5, 10), 4);
        assert_eq!(shortened_target(1, 10), 1);
        assert_eq!(shortened_target(3, 90), 1);
    }

    #[test]
    fn test_strategy_order_and_tools() {
        let attempts: Vec<u8> = RepairStrategy::ORDER.iter().map(|s| s.attempt()).collect();
        assert_eq!(attempts, vec![1, 2, 3]);
        assert_eq!(
            RepairStrategy::WidenExpansion.tools(),
            &[ToolKind::TemporalExpansion, ToolKind::TrimToLength]
        );
        assert_eq!(RepairStrategy::RetryTrim.tools(), &[ToolKind::TrimToLength]);
    }

    #[test]
    fn test_guard_restores_on_drop() {
        let mut req = request(4, 10);
        {
            let mut guard = TunablesGuard::new(&mut req);
            RepairStrategy::WidenExpansion.adjust(&mut guard, &RepairSettings::default());
            RepairStrategy::ShortenTarget.adjust(&mut guard, &RepairSettings::default());
            assert_eq!(guard.brief.temporal_expansion, 6);
            assert_eq!(guard.target_minutes, 9);
        }
        assert_eq!(req.brief.temporal_expansion, 4);
        assert_eq!(req.target_minutes, 10);
    }

    #[test]
    fn test_guard_restores_on_early_return() {
        fn failing_attempt(req: &mut RunRequest) -> Result<(), String> {
            let mut guard = TunablesGuard::new(req);
            guard.target_minutes = 1;
            if guard.target_minutes == 1 {
                return Err("tool fault".to_string());
            }
            Ok(())
        }

        let mut req = request(4, 10);
        assert!(failing_attempt(&mut req).is_err());
        assert_eq!(req.target_minutes, 10);
    }
}
