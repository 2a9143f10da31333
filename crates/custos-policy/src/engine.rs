use custos_core::{ActionType, AutonomyMode, Decision};
use tracing::{debug, info};

use crate::table::{Limits, PolicyRequest, decide};

/// On what grounds the action is being authorized.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Authorization {
    /// The account's autonomy mode governs.
    Mode,
    /// A scheduler renewal paying the pre-agreed subscription fee. The owner's opt-in to
    /// auto-renewal authorizes exactly this amount as if the account were `full_auto`.
    StandingRenewal { approved_amount_usd: f64 },
}

/// Everything the engine needs to rule on one action.
#[derive(Debug, Clone, Copy)]
pub struct PolicyContext {
    pub mode: AutonomyMode,
    pub request: PolicyRequest,
    pub credential_valid: bool,
    pub spent_today_usd: f64,
    pub authorization: Authorization,
}

impl PolicyContext {
    pub fn new(mode: AutonomyMode, request: PolicyRequest, credential_valid: bool) -> Self {
        Self {
            mode,
            request,
            credential_valid,
            spent_today_usd: 0.0,
            authorization: Authorization::Mode,
        }
    }

    pub fn with_spent_today(mut self, usd: f64) -> Self {
        self.spent_today_usd = usd;
        self
    }

    pub fn with_authorization(mut self, authorization: Authorization) -> Self {
        self.authorization = authorization;
        self
    }

    /// Whether the standing renewal authorization applies to this request.
    pub fn standing_renewal_applies(&self) -> bool {
        match self.authorization {
            Authorization::Mode => false,
            Authorization::StandingRenewal {
                approved_amount_usd,
            } => {
                self.mode != AutonomyMode::Observer
                    && self.request.action_type == ActionType::Trade
                    && (self.request.value_usd - approved_amount_usd).abs() < 1e-9
            }
        }
    }

    /// The mode the table is consulted with.
    pub fn effective_mode(&self) -> AutonomyMode {
        if self.standing_renewal_applies() {
            AutonomyMode::FullAuto
        } else {
            self.mode
        }
    }
}

/// The engine's ruling, with the rule that produced it.
#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub decision: Decision,
    pub rule: String,
    pub reason: String,
    /// Denied because the account has no usable session credential.
    pub credential_override: bool,
}

impl Verdict {
    fn from_rule(decision: Decision, rule: &str, reason: String) -> Self {
        Self {
            decision,
            rule: rule.to_string(),
            reason,
            credential_override: false,
        }
    }
}

/// A single policy rule. Returns `None` when it has no objection.
pub trait PolicyRule: Send + Sync {
    fn name(&self) -> &str;
    fn evaluate(&self, ctx: &PolicyContext) -> Option<(Decision, String)>;
}

/// Applies the credential override, then every registered rule in order, keeping the
/// strictest outcome. Earlier rules win ties.
pub struct PolicyEngine {
    rules: Vec<Box<dyn PolicyRule>>,
}

impl PolicyEngine {
    pub fn new(limits: Limits, daily_limit_usd: Option<f64>) -> Self {
        let mut engine = Self { rules: Vec::new() };
        engine.add_rule(Box::new(ModeTableRule { limits }));
        if let Some(limit) = daily_limit_usd {
            engine.add_rule(Box::new(DailyLimitRule {
                daily_limit_usd: limit,
            }));
        }
        engine
    }

    pub fn add_rule(&mut self, rule: Box<dyn PolicyRule>) {
        self.rules.push(rule);
    }

    pub fn evaluate(&self, ctx: &PolicyContext) -> Verdict {
        // Hard override, not a table row: no usable credential, no mutation.
        if ctx.request.action_type.is_mutating() && !ctx.credential_valid {
            info!(
                action_type = %ctx.request.action_type,
                "policy denied: no valid session credential"
            );
            return Verdict {
                decision: Decision::Deny,
                rule: "credential".into(),
                reason: "no valid session credential for account".into(),
                credential_override: true,
            };
        }

        let mut verdict = Verdict::from_rule(Decision::Allow, "default", "no rule objected".into());
        for rule in &self.rules {
            if let Some((decision, reason)) = rule.evaluate(ctx) {
                if decision.strictness() > verdict.decision.strictness()
                    || verdict.rule == "default"
                {
                    verdict = Verdict::from_rule(decision, rule.name(), reason);
                }
            }
        }

        debug!(
            mode = %ctx.mode,
            effective_mode = %ctx.effective_mode(),
            action_type = %ctx.request.action_type,
            value_usd = ctx.request.value_usd,
            decision = verdict.decision.as_str(),
            rule = %verdict.rule,
            "policy evaluated"
        );
        verdict
    }
}

// ── Built-in rules ─────────────────────────────────────────────

/// The autonomy mode table.
struct ModeTableRule {
    limits: Limits,
}

impl PolicyRule for ModeTableRule {
    fn name(&self) -> &str {
        "mode_table"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<(Decision, String)> {
        let mode = ctx.effective_mode();
        let decision = decide(mode, &ctx.request, &self.limits);
        let reason = match decision {
            Decision::Allow if ctx.standing_renewal_applies() => {
                "standing auto-renewal authorization for the subscription fee".to_string()
            }
            Decision::Allow => format!("{} allows {}", mode, ctx.request.action_type),
            Decision::RequireConfirm => match mode {
                AutonomyMode::Copilot if ctx.request.action_type != ActionType::Other => format!(
                    "value ${:.2} is at or above the copilot ceiling ${:.2}",
                    ctx.request.value_usd, self.limits.copilot_ceiling_usd
                ),
                _ => format!("{} requires confirmation for {}", mode, ctx.request.action_type),
            },
            Decision::Deny => format!("{} forbids {}", mode, ctx.request.action_type),
        };
        Some((decision, reason))
    }
}

/// Escalates mutating actions that would push the day's executed value past the cap.
struct DailyLimitRule {
    daily_limit_usd: f64,
}

impl PolicyRule for DailyLimitRule {
    fn name(&self) -> &str {
        "daily_limit"
    }

    fn evaluate(&self, ctx: &PolicyContext) -> Option<(Decision, String)> {
        if !ctx.request.action_type.is_mutating()
            || ctx.request.is_breach_exit()
            || ctx.standing_renewal_applies()
        {
            return None;
        }
        let projected = ctx.spent_today_usd + ctx.request.value_usd;
        if projected > self.daily_limit_usd {
            Some((
                Decision::RequireConfirm,
                format!(
                    "daily spend would reach ${:.2}, above the ${:.2} limit",
                    projected, self.daily_limit_usd
                ),
            ))
        } else {
            None
        }
    }
}
