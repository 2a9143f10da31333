use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

use crate::error::CustosError;

/// Four autonomy modes, ordered by increasing permissiveness:
///
/// - **Observer**: The agent may only analyze and report. Every mutating action is denied.
/// - **Advisor**: Every mutating action waits for the owner's confirmation.
/// - **Copilot**: Mutating actions below the value ceiling run unattended, the rest wait.
/// - **Full Auto**: Mutating actions run unattended within the configured limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum AutonomyMode {
    Observer = 0,
    Advisor = 1,
    Copilot = 2,
    FullAuto = 3,
}

impl AutonomyMode {
    pub const ALL: [AutonomyMode; 4] = [
        Self::Observer,
        Self::Advisor,
        Self::Copilot,
        Self::FullAuto,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Observer => "observer",
            Self::Advisor => "advisor",
            Self::Copilot => "copilot",
            Self::FullAuto => "full_auto",
        }
    }

    /// Whether any mutating action can ever proceed in this mode.
    pub fn permits_mutation(&self) -> bool {
        *self >= Self::Advisor
    }

    /// Whether some mutating actions can run without the owner confirming.
    pub fn allows_unattended_execution(&self) -> bool {
        *self >= Self::Copilot
    }

    pub fn description(&self) -> &'static str {
        match self {
            Self::Observer => "Analysis and reports only, every mutating action denied",
            Self::Advisor => "Every mutating action requires owner confirmation",
            Self::Copilot => "Small actions run unattended, large ones need confirmation",
            Self::FullAuto => "Mutating actions run unattended within configured limits",
        }
    }
}

impl fmt::Display for AutonomyMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for AutonomyMode {
    type Err = CustosError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "observer" => Ok(Self::Observer),
            "advisor" => Ok(Self::Advisor),
            "copilot" => Ok(Self::Copilot),
            "full_auto" | "fullauto" | "full-auto" => Ok(Self::FullAuto),
            other => Err(CustosError::Validation(format!(
                "unknown autonomy mode '{other}'"
            ))),
        }
    }
}
