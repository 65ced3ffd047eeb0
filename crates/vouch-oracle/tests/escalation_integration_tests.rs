/// ESCALATION INTEGRATION TESTS
///
/// These tests verify:
/// - Engines stack on top of each other as authorities
/// - Bonds reach the real proposer and disputer through every layer
/// - Escrow conservation across many concurrent requests
/// - Superseded fees never leak value
/// - Stacked engines only accept requests every layer can escalate

#[cfg(test)]
mod escalation_integration_tests {
    use vouch_core::*;
    use vouch_oracle::*;

    fn usdc() -> Currency {
        Currency::from("USDC")
    }

    fn addr(name: &str) -> Address {
        Address::from(name)
    }

    fn funded_ledger(spender: &str) -> TokenLedger {
        let mut ledger = TokenLedger::new();
        for who in ["requester", "alice", "bob", "carol"] {
            ledger.mint(&usdc(), &addr(who), 10_000).unwrap();
            ledger.approve(&usdc(), &addr(who), &addr(spender), 10_000);
        }
        ledger
    }

    fn support() -> SupportRegistry {
        SupportRegistry::new()
            .with_identifier(YES_OR_NO_QUERY)
            .with_collateral("USDC")
    }

    fn question(timestamp: Timestamp, reward: Amount) -> PriceRequest {
        PriceRequest {
            identifier: Identifier::from(YES_OR_NO_QUERY),
            timestamp,
            ancillary: yes_or_no_question("Launch", "Did the launch happen?"),
            currency: usdc(),
            reward,
            bond: 500,
            liveness: 600,
        }
    }

    #[test_log::test]
    fn test_nested_engines_resolve_through_every_layer() {
        let mut ledger = funded_ledger("outer");
        let mut fees = FeeSchedule::new();
        fees.set_final_fee(&usdc(), 20, 0);
        let support = support();

        let inner = EscalationEngine::new(
            addr("inner"),
            OracleConfig::default(),
            VotingAuthority::new(addr("dvm"), addr("store")),
        );
        let mut outer = EscalationEngine::new(addr("outer"), OracleConfig::default(), inner);

        let mut env = Env::new(&mut ledger, &fees, &support, 1_000);
        let key = outer
            .request_price(&mut env, &addr("requester"), question(900, 50))
            .unwrap();
        outer
            .propose_price(&mut env, &addr("alice"), &key, Outcome::yes())
            .unwrap();
        outer.dispute_price(&mut env, &addr("bob"), &key).unwrap();

        let middle = outer.get_request(&key).unwrap().escalation.clone().unwrap();
        assert_eq!(middle.requester, addr("outer"));
        assert_eq!(child_request_digest(&middle.ancillary), Some(key.digest_hex()));

        let bottom = outer
            .authority()
            .get_request(&middle)
            .unwrap()
            .escalation
            .clone()
            .unwrap();
        assert_eq!(bottom.requester, addr("inner"));

        // Everything except the reward moved to the terminal layer
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("outer")), 50);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("inner")), 0);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("dvm")), 2 * 520);
        assert_eq!(outer.get_state(&env, &key), RequestState::Disputed);

        outer
            .authority_mut()
            .authority_mut()
            .push_price(Question::from(&bottom), Outcome::no());
        assert_eq!(outer.get_state(&env, &key), RequestState::Resolved);

        let value = outer
            .settle_and_get_price(&mut env, &addr("carol"), &key)
            .unwrap();
        assert_eq!(value, Outcome::no());
        assert_eq!(outer.authority().get_price(&middle), Ok(Outcome::no()));

        // bob: own stake + alice's bond + reward
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("bob")), 10_000 + 500 + 50);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("alice")), 10_000 - 520);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("store")), 20);
        for layer in ["outer", "inner", "dvm"] {
            assert_eq!(env.ledger.balance_of(&usdc(), &addr(layer)), 0, "{} not drained", layer);
        }
        assert!(outer.verify_escrow(&env).is_ok());
        assert!(outer.authority().verify_escrow(&env).is_ok());
    }

    #[test]
    fn test_stacked_engines_accept_only_escalatable_ancillary() {
        let mut ledger = funded_ledger("outer");
        let mut fees = FeeSchedule::new();
        fees.set_final_fee(&usdc(), 20, 0);
        let support = support();

        let inner = EscalationEngine::new(
            addr("inner"),
            OracleConfig::default(),
            VotingAuthority::new(addr("dvm"), addr("store")),
        );
        let mut outer = EscalationEngine::new(addr("outer"), OracleConfig::default(), inner);
        let limit = OracleConfig::default().ancillary_bytes_limit;
        assert_eq!(outer.authority().ancillary_capacity(), limit - CHILD_STAMP_LEN);
        assert_eq!(outer.ancillary_capacity(), limit - 2 * CHILD_STAMP_LEN);

        let sized = |len: usize, fill: u8| PriceRequest {
            ancillary: AncillaryData::new(vec![fill; len]),
            ..question(900, 0)
        };

        let mut env = Env::new(&mut ledger, &fees, &support, 1_000);
        for len in [outer.ancillary_capacity() + 1, 8_100] {
            let err = outer
                .request_price(&mut env, &addr("requester"), sized(len, b'y'))
                .unwrap_err();
            assert_eq!(
                err,
                OracleError::AncillaryTooLong {
                    len: len + CHILD_STAMP_LEN,
                    limit: limit - CHILD_STAMP_LEN,
                }
            );
        }

        // Right at capacity the dispute makes it through both layers
        let key = outer
            .request_price(&mut env, &addr("requester"), sized(outer.ancillary_capacity(), b'x'))
            .unwrap();
        outer
            .propose_price(&mut env, &addr("alice"), &key, Outcome::yes())
            .unwrap();
        outer.dispute_price(&mut env, &addr("bob"), &key).unwrap();

        let middle = outer.get_request(&key).unwrap().escalation.clone().unwrap();
        let bottom = outer
            .authority()
            .get_request(&middle)
            .unwrap()
            .escalation
            .clone()
            .unwrap();
        assert_eq!(bottom.ancillary.len(), limit);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("dvm")), 2 * 520);
        assert_eq!(outer.get_state(&env, &key), RequestState::Disputed);
    }

    #[test]
    fn test_escrow_conserved_across_requests() {
        let mut ledger = funded_ledger("oo");
        let mut fees = FeeSchedule::new();
        fees.set_final_fee(&usdc(), 35, 0);
        let support = support();
        let mut engine = EscalationEngine::new(
            addr("oo"),
            OracleConfig::default(),
            VotingAuthority::new(addr("dvm"), addr("store")),
        );

        let mut keys = Vec::new();
        {
            let mut env = Env::new(&mut ledger, &fees, &support, 1_000);
            for ts in 1..=5 {
                let key = engine
                    .request_price(&mut env, &addr("requester"), question(ts, ts as Amount * 10))
                    .unwrap();
                engine
                    .propose_price(&mut env, &addr("alice"), &key, Outcome::yes())
                    .unwrap();
                keys.push(key);
                assert!(engine.verify_escrow(&env).is_ok());
            }
            for key in keys.iter().step_by(2) {
                engine.dispute_price(&mut env, &addr("bob"), key).unwrap();
                assert!(engine.verify_escrow(&env).is_ok());
            }
        }

        let held: Amount = keys.iter().map(|k| engine.escrow_of(k)).sum();
        assert_eq!(ledger.balance_of(&usdc(), &addr("oo")), held);

        let mut env = Env::new(&mut ledger, &fees, &support, 1_000 + 601);
        for key in keys.iter().skip(1).step_by(2) {
            engine
                .settle_and_get_price(&mut env, &addr("carol"), key)
                .unwrap();
        }
        assert!(engine.verify_escrow(&env).is_ok());

        // Only the rewards of the disputed requests are still held
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("oo")), 10 + 30 + 50);
    }

    #[test]
    fn test_fee_changes_between_requests_do_not_leak() {
        let mut ledger = funded_ledger("oo");
        let mut fees = FeeSchedule::new();
        fees.set_final_fee(&usdc(), 100, 0);
        let support = support();
        let mut engine = EscalationEngine::new(
            addr("oo"),
            OracleConfig::default(),
            VotingAuthority::new(addr("dvm"), addr("store")),
        );

        let key = {
            let mut env = Env::new(&mut ledger, &fees, &support, 1_000);
            let key = engine
                .request_price(&mut env, &addr("requester"), question(1, 0))
                .unwrap();
            engine
                .propose_price(&mut env, &addr("alice"), &key, Outcome::yes())
                .unwrap();
            key
        };

        fees.set_final_fee(&usdc(), 40, 1_100);
        let mut env = Env::new(&mut ledger, &fees, &support, 1_200);
        engine.dispute_price(&mut env, &addr("bob"), &key).unwrap();

        let total: Amount = ["requester", "alice", "bob", "carol", "oo", "dvm", "store"]
            .iter()
            .map(|who| env.ledger.balance_of(&usdc(), &addr(who)))
            .sum();
        assert_eq!(total, 40_000);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("alice")), 10_000 - 540);
        assert_eq!(env.ledger.balance_of(&usdc(), &addr("dvm")), 2 * 540);
    }
}
