use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// Root configuration — maps to `custos.toml`.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CustosConfig {
    pub policy: PolicyConfig,
    pub execution: ExecutionConfig,
    pub credentials: CredentialsConfig,
    pub renewal: RenewalConfig,
    pub store: StoreConfig,
    pub server: ServerConfig,
    pub logging: LoggingConfig,
}

// ── Policy ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Copilot accounts run mutating actions unattended strictly below this value.
    pub copilot_ceiling_usd: f64,
    /// Optional per-account daily cap on executed mutating value. Actions that would
    /// exceed it need owner confirmation.
    pub daily_limit_usd: Option<f64>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            copilot_ceiling_usd: 1_000.0,
            daily_limit_usd: None,
        }
    }
}

// ── Execution ──────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ExecutionConfig {
    /// Upper bound on a single vault `execute` call.
    pub timeout_secs: u64,
    /// Upper bound on a credential validity lookup.
    pub credential_lookup_timeout_secs: u64,
    /// Simulate vault calls instead of failing them when no chain backend is wired in.
    pub dry_run: bool,
}

impl Default for ExecutionConfig {
    fn default() -> Self {
        Self {
            timeout_secs: 30,
            credential_lookup_timeout_secs: 5,
            dry_run: false,
        }
    }
}

// ── Credentials ────────────────────────────────────────────────

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct CredentialsConfig {
    /// Lifetime given to new session keys. None = no expiry until revoked.
    pub default_ttl_secs: Option<u64>,
}

// ── Renewal ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RenewalConfig {
    /// Run the renewal scheduler at all.
    pub enabled: bool,
    /// Seconds between scheduler ticks.
    pub tick_interval_secs: u64,
    /// Wait after the Nth consecutive failure, indexed by attempt. The last entry
    /// repeats for attempts beyond the list.
    pub backoff_secs: Vec<u64>,
    /// Consecutive failures after which the subscription is marked expired.
    pub max_attempts: u32,
    /// Length of one renewal period.
    pub period_days: u32,
    /// How long a scheduler process holds its claim on a subscription.
    pub claim_lease_secs: u64,
}

impl Default for RenewalConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            tick_interval_secs: 300,
            backoff_secs: vec![3_600, 14_400, 57_600],
            max_attempts: 4,
            period_days: 30,
            claim_lease_secs: 600,
        }
    }
}

// ── Store ──────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct StoreConfig {
    /// Path to the SQLite database.
    pub db_path: PathBuf,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            db_path: PathBuf::from("custos.db"),
        }
    }
}

// ── Server ─────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// HTTP listen address.
    pub listen: String,
    /// Optional bearer key for the API.
    pub api_key: Option<String>,
    /// Enable permissive CORS (for UI development).
    pub cors: bool,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            listen: "127.0.0.1:3710".into(),
            api_key: None,
            cors: false,
        }
    }
}

// ── Logging ────────────────────────────────────────────────────

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level: "trace", "debug", "info", "warn", "error".
    pub level: String,
    /// Output format: "pretty", "json", "compact".
    pub format: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".into(),
            format: "pretty".into(),
        }
    }
}

// ── Validation ─────────────────────────────────────────────────

/// A single config validation issue.
#[derive(Debug)]
pub struct ConfigWarning {
    pub field: String,
    pub message: String,
    pub severity: WarningSeverity,
    pub hint: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WarningSeverity {
    Error,
    Warning,
    Info,
}

impl std::fmt::Display for ConfigWarning {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let label = match self.severity {
            WarningSeverity::Error => "error",
            WarningSeverity::Warning => "warning",
            WarningSeverity::Info => "info",
        };
        write!(f, "[{}] {}: {}", label, self.field, self.message)?;
        if let Some(ref h) = self.hint {
            write!(f, " ({})", h)?;
        }
        Ok(())
    }
}

/// Upper bound for any configured time span, in seconds (ten years).
pub const MAX_SPAN_SECS: u64 = 10 * 365 * 86_400;

impl CustosConfig {
    /// Validate the config and return a list of warnings/errors.
    /// Returns `Err` with all messages joined if any severity is Error.
    pub fn validate(&self) -> Result<Vec<ConfigWarning>, String> {
        let mut warnings = Vec::new();

        // ── Policy ───
        if self.policy.copilot_ceiling_usd <= 0.0 || !self.policy.copilot_ceiling_usd.is_finite() {
            warnings.push(ConfigWarning {
                field: "policy.copilot_ceiling_usd".into(),
                message: format!("ceiling {} must be a positive amount", self.policy.copilot_ceiling_usd),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 1000.0".into()),
            });
        }
        if let Some(limit) = self.policy.daily_limit_usd {
            if limit <= 0.0 {
                warnings.push(ConfigWarning {
                    field: "policy.daily_limit_usd".into(),
                    message: "daily limit is zero or negative — every mutating action would need confirmation".into(),
                    severity: WarningSeverity::Warning,
                    hint: Some("Remove the key to disable the daily cap".into()),
                });
            } else if limit < self.policy.copilot_ceiling_usd {
                warnings.push(ConfigWarning {
                    field: "policy.daily_limit_usd".into(),
                    message: format!(
                        "daily limit ${:.2} is below the copilot ceiling ${:.2}",
                        limit, self.policy.copilot_ceiling_usd
                    ),
                    severity: WarningSeverity::Info,
                    hint: None,
                });
            }
        }

        // ── Execution ───
        if self.execution.timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "execution.timeout_secs".into(),
                message: "timeout is 0 — every vault call would time out".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        if self.execution.credential_lookup_timeout_secs == 0 {
            warnings.push(ConfigWarning {
                field: "execution.credential_lookup_timeout_secs".into(),
                message: "credential lookup timeout is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 5".into()),
            });
        }

        // ── Renewal ───
        if self.renewal.backoff_secs.is_empty() {
            warnings.push(ConfigWarning {
                field: "renewal.backoff_secs".into(),
                message: "backoff schedule is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Use e.g. [3600, 14400, 57600]".into()),
            });
        } else if self.renewal.backoff_secs.windows(2).any(|w| w[1] < w[0]) {
            warnings.push(ConfigWarning {
                field: "renewal.backoff_secs".into(),
                message: "backoff schedule must be non-decreasing".into(),
                severity: WarningSeverity::Error,
                hint: None,
            });
        }
        if self.renewal.max_attempts == 0 {
            warnings.push(ConfigWarning {
                field: "renewal.max_attempts".into(),
                message: "max_attempts is 0 — renewals would never be tried".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 4".into()),
            });
        }
        if self.renewal.period_days == 0 {
            warnings.push(ConfigWarning {
                field: "renewal.period_days".into(),
                message: "renewal period is 0 days".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 30".into()),
            });
        }
        if self.renewal.tick_interval_secs == 0 {
            warnings.push(ConfigWarning {
                field: "renewal.tick_interval_secs".into(),
                message: "tick interval is 0".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. 300".into()),
            });
        } else if self.renewal.tick_interval_secs < 60 {
            warnings.push(ConfigWarning {
                field: "renewal.tick_interval_secs".into(),
                message: format!(
                    "tick interval {}s is very short for a billing loop",
                    self.renewal.tick_interval_secs
                ),
                severity: WarningSeverity::Warning,
                hint: Some("Renewals run on a cadence of minutes".into()),
            });
        }
        let longest_backoff = self.renewal.backoff_secs.iter().copied().max().unwrap_or(0);
        // A lease that lapses mid-renewal lets a second scheduler claim and pay again.
        let longest_renewal = self
            .execution
            .timeout_secs
            .saturating_add(self.execution.credential_lookup_timeout_secs);
        if self.renewal.claim_lease_secs <= longest_renewal {
            warnings.push(ConfigWarning {
                field: "renewal.claim_lease_secs".into(),
                message: format!(
                    "claim lease {}s does not outlast a renewal ({}s execution + {}s credential lookup)",
                    self.renewal.claim_lease_secs,
                    self.execution.timeout_secs,
                    self.execution.credential_lookup_timeout_secs
                ),
                severity: WarningSeverity::Error,
                hint: Some(format!("Use more than {longest_renewal}")),
            });
        }
        if longest_backoff > u64::from(self.renewal.period_days) * 86_400 {
            warnings.push(ConfigWarning {
                field: "renewal.backoff_secs".into(),
                message: "a backoff step is longer than a whole renewal period".into(),
                severity: WarningSeverity::Info,
                hint: None,
            });
        }

        // ── Durations ───
        let spans = [
            ("renewal.claim_lease_secs", self.renewal.claim_lease_secs),
            ("renewal.backoff_secs", longest_backoff),
            ("renewal.period_days", u64::from(self.renewal.period_days).saturating_mul(86_400)),
            ("credentials.default_ttl_secs", self.credentials.default_ttl_secs.unwrap_or(0)),
        ];
        for (field, secs) in spans {
            if secs > MAX_SPAN_SECS {
                warnings.push(ConfigWarning {
                    field: field.into(),
                    message: format!("{secs}s is longer than ten years"),
                    severity: WarningSeverity::Error,
                    hint: None,
                });
            }
        }

        // ── Server ───
        if self.server.listen.is_empty() {
            warnings.push(ConfigWarning {
                field: "server.listen".into(),
                message: "listen address is empty".into(),
                severity: WarningSeverity::Error,
                hint: Some("Set to e.g. '127.0.0.1:3710'".into()),
            });
        } else if self.server.listen.starts_with("0.0.0.0") && self.server.api_key.is_none() {
            warnings.push(ConfigWarning {
                field: "server.api_key".into(),
                message: "no API key set while server is network-accessible".into(),
                severity: WarningSeverity::Warning,
                hint: Some("Set server.api_key or bind to 127.0.0.1".into()),
            });
        }

        // ── Logging ───
        let valid_formats = ["pretty", "json", "compact"];
        if !valid_formats.contains(&self.logging.format.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.format".into(),
                message: format!("unknown log format '{}'", self.logging.format),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_formats.join(", "))),
            });
        }
        let valid_levels = ["trace", "debug", "info", "warn", "error"];
        if !valid_levels.contains(&self.logging.level.as_str()) {
            warnings.push(ConfigWarning {
                field: "logging.level".into(),
                message: format!("unknown log level '{}'", self.logging.level),
                severity: WarningSeverity::Warning,
                hint: Some(format!("Valid values: {}", valid_levels.join(", "))),
            });
        }

        let errors: Vec<String> = warnings
            .iter()
            .filter(|w| w.severity == WarningSeverity::Error)
            .map(|w| format!("{}: {}", w.field, w.message))
            .collect();

        if !errors.is_empty() {
            return Err(format!("Configuration errors:\n  • {}", errors.join("\n  • ")));
        }

        Ok(warnings)
    }
}
