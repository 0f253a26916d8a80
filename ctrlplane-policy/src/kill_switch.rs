//! Kill switches: env-driven, one per action family, read fresh on
//! every decision (never cached at startup) so an operator flipping one
//! takes effect without a restart.

/// Source of kill-switch state. A trait rather than a bare function so
/// tests can substitute a fixed set without touching process env vars.
pub trait KillSwitchSource: Send + Sync {
    fn is_active(&self, switch_name: &str) -> bool;
}

/// Reads `{switch_name}=1|true` from the process environment on every
/// call.
pub struct EnvKillSwitches;

impl KillSwitchSource for EnvKillSwitches {
    fn is_active(&self, switch_name: &str) -> bool {
        matches!(
            std::env::var(switch_name).ok().as_deref(),
            Some("1") | Some("true") | Some("TRUE")
        )
    }
}

#[cfg(test)]
pub struct FixedKillSwitches(pub Vec<String>);

#[cfg(test)]
impl KillSwitchSource for FixedKillSwitches {
    fn is_active(&self, switch_name: &str) -> bool {
        self.0.iter().any(|s| s == switch_name)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fixed_switches_report_only_named_ones_active() {
        let switches = FixedKillSwitches(vec!["KILL_SWITCH_EGRESS".to_string()]);
        assert!(switches.is_active("KILL_SWITCH_EGRESS"));
        assert!(!switches.is_active("KILL_SWITCH_TOOL_INVOCATION"));
    }
}
