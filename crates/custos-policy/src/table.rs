use custos_core::{ActionType, AutonomyMode, Decision};
use serde::{Deserialize, Serialize};

/// Value limits the table is evaluated against.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Limits {
    /// Copilot runs mutating actions unattended strictly below this value.
    pub copilot_ceiling_usd: f64,
}

impl Default for Limits {
    fn default() -> Self {
        Self {
            copilot_ceiling_usd: 1_000.0,
        }
    }
}

/// The parts of an action the table looks at.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PolicyRequest {
    pub action_type: ActionType,
    pub value_usd: f64,
    /// The action is an emergency exit raised in response to a limit breach.
    pub breach_triggered: bool,
}

impl PolicyRequest {
    pub fn new(action_type: ActionType, value_usd: f64) -> Self {
        Self {
            action_type,
            value_usd,
            breach_triggered: false,
        }
    }

    pub fn breach(mut self) -> Self {
        self.breach_triggered = true;
        self
    }

    /// Breach-triggered emergency exits must never wait on a confirmation.
    pub fn is_breach_exit(&self) -> bool {
        self.action_type == ActionType::EmergencyExit && self.breach_triggered
    }
}

/// The autonomy policy table. Pure: identical inputs always give the identical decision.
///
/// Rows, first match wins:
/// 1. `analyze` / `report` are allowed in every mode.
/// 2. `observer` denies every mutating action.
/// 3. A breach-triggered `emergency_exit` is allowed.
/// 4. `other` always needs confirmation.
/// 5. `advisor` needs confirmation for every mutating action.
/// 6. `copilot` allows values strictly below the ceiling; at or above needs confirmation.
/// 7. `full_auto` allows.
pub fn decide(mode: AutonomyMode, request: &PolicyRequest, limits: &Limits) -> Decision {
    if !request.action_type.is_mutating() {
        return Decision::Allow;
    }
    match mode {
        AutonomyMode::Observer => Decision::Deny,
        _ if request.is_breach_exit() => Decision::Allow,
        _ if request.action_type == ActionType::Other => Decision::RequireConfirm,
        AutonomyMode::Advisor => Decision::RequireConfirm,
        AutonomyMode::Copilot => {
            // NaN compares false, so it lands on the stricter side.
            if request.value_usd < limits.copilot_ceiling_usd {
                Decision::Allow
            } else {
                Decision::RequireConfirm
            }
        }
        AutonomyMode::FullAuto => Decision::Allow,
    }
}
