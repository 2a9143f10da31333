#[cfg(test)]
mod tests {
    use custos_core::*;

    fn addr(n: u8) -> Address {
        Address::from_bytes(&[n; 20])
    }

    // ── Address tests ──────────────────────────────────────────

    mod address {
        use super::*;

        #[test]
        fn test_parse_normalizes_case() {
            let a = Address::parse("0xABCDEFabcdef0123456789ABCDEFabcdef012345").unwrap();
            assert_eq!(a.as_str(), "0xabcdefabcdef0123456789abcdefabcdef012345");
        }

        #[test]
        fn test_parse_rejects_missing_prefix() {
            let err = Address::parse("abcdefabcdef0123456789abcdefabcdef012345").unwrap_err();
            assert!(matches!(err, CustosError::Validation(_)));
        }

        #[test]
        fn test_parse_rejects_wrong_length() {
            assert!(Address::parse("0x1234").is_err());
            assert!(Address::parse("0xzzcdefabcdef0123456789abcdefabcdef012345").is_err());
        }

        #[test]
        fn test_from_bytes() {
            let a = addr(0xab);
            assert_eq!(a.as_str().len(), 42);
            assert!(a.as_str().starts_with("0xabab"));
        }

        #[test]
        fn test_serde_rejects_invalid() {
            let result: std::result::Result<Address, _> = serde_json::from_str("\"0xnothex\"");
            assert!(result.is_err());
        }
    }

    // ── Autonomy mode tests ────────────────────────────────────

    mod mode {
        use super::*;

        #[test]
        fn test_ordering() {
            assert!(AutonomyMode::Observer < AutonomyMode::Advisor);
            assert!(AutonomyMode::Advisor < AutonomyMode::Copilot);
            assert!(AutonomyMode::Copilot < AutonomyMode::FullAuto);
        }

        #[test]
        fn test_permits_mutation() {
            assert!(!AutonomyMode::Observer.permits_mutation());
            assert!(AutonomyMode::Advisor.permits_mutation());
            assert!(AutonomyMode::FullAuto.permits_mutation());
        }

        #[test]
        fn test_parse() {
            assert_eq!("full_auto".parse::<AutonomyMode>().unwrap(), AutonomyMode::FullAuto);
            assert_eq!(" Copilot ".parse::<AutonomyMode>().unwrap(), AutonomyMode::Copilot);
            assert!("yolo".parse::<AutonomyMode>().is_err());
        }

        #[test]
        fn test_serde_snake_case() {
            let json = serde_json::to_string(&AutonomyMode::FullAuto).unwrap();
            assert_eq!(json, "\"full_auto\"");
        }
    }

    // ── Action tests ───────────────────────────────────────────

    mod action {
        use super::*;
        use chrono::Utc;
        use uuid::Uuid;

        fn call() -> VaultCall {
            VaultCall {
                target: addr(7),
                value: 1_000_000_000_000_000_000,
                data: vec![0xde, 0xad],
            }
        }

        #[test]
        fn test_mutating_types() {
            assert!(!ActionType::Analyze.is_mutating());
            assert!(!ActionType::Report.is_mutating());
            for t in [
                ActionType::Suggest,
                ActionType::Trade,
                ActionType::Exit,
                ActionType::EmergencyExit,
                ActionType::Other,
            ] {
                assert!(t.is_mutating(), "{t} should be mutating");
            }
        }

        #[test]
        fn test_details_type_and_call() {
            let trade = ActionDetails::Trade {
                protocol: "aave".into(),
                pool: Some("USDC".into()),
                call: call(),
            };
            assert_eq!(trade.action_type(), ActionType::Trade);
            assert!(trade.vault_call().is_some());

            let report = ActionDetails::Report {
                period: "weekly".into(),
                summary: "ok".into(),
            };
            assert_eq!(report.action_type(), ActionType::Report);
            assert!(report.vault_call().is_none());
        }

        #[test]
        fn test_details_tagged_json() {
            let json = r#"{
                "type": "emergency_exit",
                "protocol": "compound",
                "breach": {"metric": "health_factor", "observed": 1.02, "threshold": 1.1},
                "call": {"target": "0x0707070707070707070707070707070707070707", "value": "5"}
            }"#;
            let details: ActionDetails = serde_json::from_str(json).unwrap();
            assert_eq!(details.action_type(), ActionType::EmergencyExit);
            assert_eq!(details.breach().unwrap().metric, "health_factor");
            assert_eq!(details.vault_call().unwrap().value, 5);
        }

        #[test]
        fn test_new_action_is_proposed() {
            let a = Action::new(
                Uuid::new_v4(),
                ActionOrigin::Agent,
                ActionDetails::Trade {
                    protocol: "uniswap".into(),
                    pool: None,
                    call: call(),
                },
                250.0,
                Utc::now(),
            );
            assert_eq!(a.state, ActionState::Proposed);
            assert_eq!(a.action_type, ActionType::Trade);
            assert!(!a.confirmed);
            assert!(!a.is_terminal());
        }

        #[test]
        fn test_decision_stricter() {
            assert_eq!(Decision::Allow.stricter(Decision::RequireConfirm), Decision::RequireConfirm);
            assert_eq!(Decision::Deny.stricter(Decision::Allow), Decision::Deny);
            assert_eq!(Decision::RequireConfirm.stricter(Decision::Allow), Decision::RequireConfirm);
        }

        #[test]
        fn test_terminal_states() {
            assert!(ActionState::Executed.is_terminal());
            assert!(ActionState::Failed.is_terminal());
            assert!(ActionState::Cancelled.is_terminal());
            assert!(!ActionState::Gated.is_terminal());
            assert_eq!("gated".parse::<ActionState>().unwrap(), ActionState::Gated);
        }
    }

    // ── Credential & subscription tests ────────────────────────

    mod account {
        use super::*;
        use chrono::{Duration, Utc};
        use uuid::Uuid;

        #[test]
        fn test_credential_validity() {
            let now = Utc::now();
            let mut cred = SessionCredential {
                account_id: Uuid::new_v4(),
                address: addr(1),
                created_at: now,
                expires_at: Some(now + Duration::hours(1)),
                revoked: false,
                revoked_at: None,
            };
            assert!(cred.is_valid(now));
            assert!(!cred.is_valid(now + Duration::hours(1)));
            cred.revoked = true;
            assert!(!cred.is_valid(now));
        }

        #[test]
        fn test_subscription_due() {
            let now = Utc::now();
            let mut sub = Subscription::new(
                Uuid::new_v4(),
                "pro",
                addr(9),
                99.0,
                10,
                now - Duration::days(1),
            );
            // Auto-renewal defaults to off.
            assert!(!sub.auto_renewal_enabled);
            assert!(!sub.is_due(now));
            sub.auto_renewal_enabled = true;
            assert!(sub.is_due(now));
            sub.status = SubscriptionStatus::Cancelled;
            assert!(!sub.is_due(now));
        }

        #[test]
        fn test_payment_call_targets_payee() {
            let sub = Subscription::new(Uuid::new_v4(), "pro", addr(9), 99.0, 42, Utc::now());
            let call = sub.payment_call();
            assert_eq!(call.target, addr(9));
            assert_eq!(call.value, 42);
        }

        #[test]
        fn test_owner_check() {
            let acct = VaultAccount::new(addr(1), addr(2), Some(addr(3)), AutonomyMode::Advisor);
            assert!(acct.is_owner(&addr(2)));
            assert!(!acct.is_owner(&addr(3)));
        }
    }

    // ── Error tests ────────────────────────────────────────────

    mod error {
        use super::*;
        use uuid::Uuid;

        #[test]
        fn test_error_kinds_are_distinct() {
            let id = Uuid::new_v4();
            let denied = CustosError::PolicyDenied {
                action_id: id,
                reason: "observer".into(),
            };
            let cred = CustosError::CredentialInvalid { account_id: id };
            let reverted = CustosError::ExecutionReverted {
                reason: "STF".into(),
            };
            assert_eq!(denied.kind(), "policy_denied");
            assert_eq!(cred.kind(), "credential_invalid");
            assert_eq!(reverted.kind(), "execution_reverted");
            assert!(reverted.to_string().contains("STF"));
        }

        #[test]
        fn test_execution_error_transient() {
            assert!(ExecutionError::Timeout { after_secs: 5 }.is_transient());
            assert!(ExecutionError::Transport("reset".into()).is_transient());
            assert!(!ExecutionError::Reverted("nope".into()).is_transient());
            // Revert reasons are preserved verbatim.
            assert_eq!(ExecutionError::Reverted("ERC20: low".into()).to_string(), "ERC20: low");
        }

        #[test]
        fn test_execution_error_into_custos_error() {
            let reverted: CustosError = ExecutionError::Reverted("no vault".into()).into();
            assert!(matches!(reverted, CustosError::ExecutionReverted { ref reason } if reason == "no vault"));
            let timeout: CustosError = ExecutionError::Timeout { after_secs: 5 }.into();
            assert_eq!(timeout.kind(), "scheduler_transient");
        }
    }

    // ── Event bus tests ────────────────────────────────────────

    mod event {
        use super::*;
        use uuid::Uuid;

        #[tokio::test]
        async fn test_publish_subscribe() {
            let bus = EventBus::default();
            let mut rx = bus.subscribe();
            let account_id = Uuid::new_v4();
            bus.publish(Event::CredentialRevoked {
                account_id,
                address: addr(4),
            });
            match rx.recv().await.unwrap() {
                Event::CredentialRevoked { account_id: got, .. } => assert_eq!(got, account_id),
                other => panic!("unexpected event {other:?}"),
            }
        }

        #[test]
        fn test_publish_without_subscribers() {
            let bus = EventBus::new(4);
            bus.publish(Event::Shutdown);
        }
    }
}
