#[cfg(test)]
mod tests {
    // ── Mode table ─────────────────────────────────────────────

    mod table {
        use custos_core::{ActionType, AutonomyMode, Decision};
        use custos_policy::{Limits, PolicyRequest, decide};

        fn run(mode: AutonomyMode, ty: ActionType, value: f64) -> Decision {
            decide(mode, &PolicyRequest::new(ty, value), &Limits::default())
        }

        #[test]
        fn test_read_only_allowed_everywhere() {
            for mode in AutonomyMode::ALL {
                for ty in [ActionType::Analyze, ActionType::Report] {
                    assert_eq!(run(mode, ty, 1e9), Decision::Allow, "{mode} {ty}");
                }
            }
        }

        #[test]
        fn test_observer_denies_every_mutation() {
            let values = [0.0, 0.01, 999.99, 1_000.0, 1e12, f64::NAN];
            for ty in ActionType::ALL.into_iter().filter(|t| t.is_mutating()) {
                for value in values {
                    assert_eq!(run(AutonomyMode::Observer, ty, value), Decision::Deny);
                    let breach = PolicyRequest::new(ty, value).breach();
                    assert_eq!(
                        decide(AutonomyMode::Observer, &breach, &Limits::default()),
                        Decision::Deny
                    );
                }
            }
        }

        #[test]
        fn test_advisor_confirms_every_mutation() {
            for ty in [ActionType::Suggest, ActionType::Trade, ActionType::Exit] {
                assert_eq!(run(AutonomyMode::Advisor, ty, 1.0), Decision::RequireConfirm);
            }
        }

        #[test]
        fn test_copilot_ceiling_is_exclusive() {
            assert_eq!(
                run(AutonomyMode::Copilot, ActionType::Trade, 999.99),
                Decision::Allow
            );
            assert_eq!(
                run(AutonomyMode::Copilot, ActionType::Trade, 1_000.0),
                Decision::RequireConfirm
            );
            assert_eq!(
                run(AutonomyMode::Copilot, ActionType::Exit, 50_000.0),
                Decision::RequireConfirm
            );
        }

        #[test]
        fn test_copilot_nan_value_is_strict() {
            assert_eq!(
                run(AutonomyMode::Copilot, ActionType::Trade, f64::NAN),
                Decision::RequireConfirm
            );
        }

        #[test]
        fn test_custom_ceiling() {
            let limits = Limits {
                copilot_ceiling_usd: 100.0,
            };
            let req = PolicyRequest::new(ActionType::Trade, 100.0);
            assert_eq!(decide(AutonomyMode::Copilot, &req, &limits), Decision::RequireConfirm);
            let req = PolicyRequest::new(ActionType::Trade, 99.0);
            assert_eq!(decide(AutonomyMode::Copilot, &req, &limits), Decision::Allow);
        }

        #[test]
        fn test_full_auto_allows() {
            assert_eq!(
                run(AutonomyMode::FullAuto, ActionType::Trade, 1e9),
                Decision::Allow
            );
        }

        #[test]
        fn test_other_always_confirms() {
            for mode in [
                AutonomyMode::Advisor,
                AutonomyMode::Copilot,
                AutonomyMode::FullAuto,
            ] {
                assert_eq!(run(mode, ActionType::Other, 0.0), Decision::RequireConfirm);
            }
        }

        #[test]
        fn test_breach_exit_never_waits() {
            for mode in [
                AutonomyMode::Advisor,
                AutonomyMode::Copilot,
                AutonomyMode::FullAuto,
            ] {
                let req = PolicyRequest::new(ActionType::EmergencyExit, 1e7).breach();
                assert_eq!(decide(mode, &req, &Limits::default()), Decision::Allow);
            }
        }

        #[test]
        fn test_emergency_exit_without_breach_uses_mode() {
            assert_eq!(
                run(AutonomyMode::Advisor, ActionType::EmergencyExit, 10.0),
                Decision::RequireConfirm
            );
            assert_eq!(
                run(AutonomyMode::Copilot, ActionType::EmergencyExit, 5_000.0),
                Decision::RequireConfirm
            );
        }

        #[test]
        fn test_decide_is_deterministic() {
            for mode in AutonomyMode::ALL {
                for ty in ActionType::ALL {
                    let a = run(mode, ty, 500.0);
                    let b = run(mode, ty, 500.0);
                    assert_eq!(a, b);
                }
            }
        }
    }

    // ── Engine ─────────────────────────────────────────────────

    mod engine {
        use custos_core::{ActionType, AutonomyMode, Decision};
        use custos_policy::{
            Authorization, Limits, PolicyContext, PolicyEngine, PolicyRequest, PolicyRule,
        };

        fn engine() -> PolicyEngine {
            PolicyEngine::new(Limits::default(), None)
        }

        #[test]
        fn test_missing_credential_denies_mutation() {
            let ctx = PolicyContext::new(
                AutonomyMode::FullAuto,
                PolicyRequest::new(ActionType::Trade, 1.0),
                false,
            );
            let verdict = engine().evaluate(&ctx);
            assert_eq!(verdict.decision, Decision::Deny);
            assert!(verdict.credential_override);
            assert_eq!(verdict.rule, "credential");
        }

        #[test]
        fn test_missing_credential_still_allows_analysis() {
            let ctx = PolicyContext::new(
                AutonomyMode::Observer,
                PolicyRequest::new(ActionType::Analyze, 0.0),
                false,
            );
            let verdict = engine().evaluate(&ctx);
            assert_eq!(verdict.decision, Decision::Allow);
            assert!(!verdict.credential_override);
        }

        #[test]
        fn test_breach_exit_needs_credential() {
            let ctx = PolicyContext::new(
                AutonomyMode::FullAuto,
                PolicyRequest::new(ActionType::EmergencyExit, 10.0).breach(),
                false,
            );
            assert_eq!(engine().evaluate(&ctx).decision, Decision::Deny);
        }

        #[test]
        fn test_mode_table_reason_mentions_ceiling() {
            let ctx = PolicyContext::new(
                AutonomyMode::Copilot,
                PolicyRequest::new(ActionType::Trade, 1_500.0),
                true,
            );
            let verdict = engine().evaluate(&ctx);
            assert_eq!(verdict.decision, Decision::RequireConfirm);
            assert_eq!(verdict.rule, "mode_table");
            assert!(verdict.reason.contains("ceiling"));
        }

        #[test]
        fn test_standing_renewal_runs_as_full_auto() {
            let ctx = PolicyContext::new(
                AutonomyMode::Advisor,
                PolicyRequest::new(ActionType::Trade, 99.0),
                true,
            )
            .with_authorization(Authorization::StandingRenewal {
                approved_amount_usd: 99.0,
            });
            assert!(ctx.standing_renewal_applies());
            assert_eq!(ctx.effective_mode(), AutonomyMode::FullAuto);
            assert_eq!(engine().evaluate(&ctx).decision, Decision::Allow);
        }

        #[test]
        fn test_standing_renewal_requires_exact_amount() {
            let ctx = PolicyContext::new(
                AutonomyMode::Advisor,
                PolicyRequest::new(ActionType::Trade, 150.0),
                true,
            )
            .with_authorization(Authorization::StandingRenewal {
                approved_amount_usd: 99.0,
            });
            assert!(!ctx.standing_renewal_applies());
            assert_eq!(engine().evaluate(&ctx).decision, Decision::RequireConfirm);
        }

        #[test]
        fn test_standing_renewal_never_applies_in_observer() {
            let ctx = PolicyContext::new(
                AutonomyMode::Observer,
                PolicyRequest::new(ActionType::Trade, 99.0),
                true,
            )
            .with_authorization(Authorization::StandingRenewal {
                approved_amount_usd: 99.0,
            });
            assert_eq!(engine().evaluate(&ctx).decision, Decision::Deny);
        }

        #[test]
        fn test_daily_limit_escalates() {
            let engine = PolicyEngine::new(Limits::default(), Some(500.0));
            let ctx = PolicyContext::new(
                AutonomyMode::FullAuto,
                PolicyRequest::new(ActionType::Trade, 200.0),
                true,
            )
            .with_spent_today(400.0);
            let verdict = engine.evaluate(&ctx);
            assert_eq!(verdict.decision, Decision::RequireConfirm);
            assert_eq!(verdict.rule, "daily_limit");
        }

        #[test]
        fn test_daily_limit_within_cap() {
            let engine = PolicyEngine::new(Limits::default(), Some(500.0));
            let ctx = PolicyContext::new(
                AutonomyMode::FullAuto,
                PolicyRequest::new(ActionType::Trade, 100.0),
                true,
            )
            .with_spent_today(400.0);
            assert_eq!(engine.evaluate(&ctx).decision, Decision::Allow);
        }

        #[test]
        fn test_daily_limit_exempts_breach_exit_and_renewal() {
            let engine = PolicyEngine::new(Limits::default(), Some(10.0));
            let exit = PolicyContext::new(
                AutonomyMode::Copilot,
                PolicyRequest::new(ActionType::EmergencyExit, 5_000.0).breach(),
                true,
            )
            .with_spent_today(100.0);
            assert_eq!(engine.evaluate(&exit).decision, Decision::Allow);

            let renewal = PolicyContext::new(
                AutonomyMode::Copilot,
                PolicyRequest::new(ActionType::Trade, 99.0),
                true,
            )
            .with_spent_today(100.0)
            .with_authorization(Authorization::StandingRenewal {
                approved_amount_usd: 99.0,
            });
            assert_eq!(engine.evaluate(&renewal).decision, Decision::Allow);
        }

        #[test]
        fn test_daily_limit_cannot_relax_observer() {
            let engine = PolicyEngine::new(Limits::default(), Some(1e9));
            let ctx = PolicyContext::new(
                AutonomyMode::Observer,
                PolicyRequest::new(ActionType::Trade, 1.0),
                true,
            );
            assert_eq!(engine.evaluate(&ctx).decision, Decision::Deny);
        }

        struct AlwaysDeny;

        impl PolicyRule for AlwaysDeny {
            fn name(&self) -> &str {
                "always_deny"
            }

            fn evaluate(&self, _ctx: &PolicyContext) -> Option<(Decision, String)> {
                Some((Decision::Deny, "blocked".into()))
            }
        }

        #[test]
        fn test_custom_rule_strictest_wins() {
            let mut engine = engine();
            engine.add_rule(Box::new(AlwaysDeny));
            let ctx = PolicyContext::new(
                AutonomyMode::FullAuto,
                PolicyRequest::new(ActionType::Trade, 1.0),
                true,
            );
            let verdict = engine.evaluate(&ctx);
            assert_eq!(verdict.decision, Decision::Deny);
            assert_eq!(verdict.rule, "always_deny");
            assert_eq!(verdict.reason, "blocked");
        }
    }

    // ── Spend tracking ─────────────────────────────────────────

    mod spend {
        use chrono::{Duration, TimeZone, Utc};
        use custos_policy::SpendTracker;
        use uuid::Uuid;

        #[test]
        fn test_record_accumulates() {
            let tracker = SpendTracker::new();
            let account = Uuid::new_v4();
            let now = Utc.with_ymd_and_hms(2026, 3, 1, 10, 0, 0).unwrap();
            tracker.record(account, 100.0, now);
            tracker.record(account, 50.5, now + Duration::hours(2));
            assert!((tracker.spent_today(account, now) - 150.5).abs() < 1e-9);
        }

        #[test]
        fn test_rolls_over_at_utc_midnight() {
            let tracker = SpendTracker::new();
            let account = Uuid::new_v4();
            let day1 = Utc.with_ymd_and_hms(2026, 3, 1, 23, 59, 0).unwrap();
            tracker.record(account, 300.0, day1);
            let day2 = day1 + Duration::minutes(2);
            assert_eq!(tracker.spent_today(account, day2), 0.0);
            tracker.record(account, 10.0, day2);
            let snap = tracker.snapshot(account).unwrap();
            assert_eq!(snap.spent_usd, 10.0);
            assert_eq!(snap.total_usd, 310.0);
        }

        #[test]
        fn test_accounts_are_isolated() {
            let tracker = SpendTracker::new();
            let a = Uuid::new_v4();
            let b = Uuid::new_v4();
            let now = Utc::now();
            tracker.record(a, 42.0, now);
            assert_eq!(tracker.spent_today(b, now), 0.0);
        }

        #[test]
        fn test_seed() {
            let tracker = SpendTracker::new();
            let account = Uuid::new_v4();
            let now = Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0).unwrap();
            tracker.seed(account, now.date_naive(), 75.0);
            assert_eq!(tracker.spent_today(account, now), 75.0);
        }
    }
}
