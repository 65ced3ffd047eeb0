/// END-TO-END PROTOCOL SCENARIOS
///
/// These tests verify, through the host runtime:
/// - Request key uniqueness
/// - Fee increase and decrease handling on dispute
/// - Prediction market settlement and re-request on dispute
/// - Insurance claim rejection and re-claim
/// - Whole-transaction rollback when a callback fails
/// - Assert-and-ratify escalation

use proptest::prelude::*;
use vouch_consumers::{MarketTerms, PolicyId};
use vouch_core::{
    Address, AncillaryData, Amount, Currency, Identifier, OracleConfig, Outcome, RequestKey,
    CANONICAL_FALSE, FIXED_POINT_SCALE, YES_OR_NO_QUERY,
};
use vouch_oracle::{ErrorKind, OracleError, PriceRequest, RequestState};
use vouch_root::{Deployment, HostError, Protocol};

const START: u64 = 10_000;

fn usdc() -> Currency {
    Currency::from("USDC")
}

fn addr(name: &str) -> Address {
    Address::from(name)
}

fn protocol() -> Protocol {
    vouch_root::init_tracing();
    let mut protocol = Protocol::new(OracleConfig::default(), Deployment::default()).unwrap();
    protocol.support_identifier(YES_OR_NO_QUERY);
    protocol.support_collateral("USDC");
    protocol.set_time(START);
    protocol
}

fn fund(protocol: &mut Protocol, who: &str, amount: Amount, spender: &Address) {
    protocol.mint(&usdc(), &addr(who), amount).unwrap();
    protocol.approve(&usdc(), &addr(who), spender, amount);
}

fn question(ancillary: &str, reward: Amount, bond: Amount) -> PriceRequest {
    PriceRequest {
        identifier: Identifier::from(YES_OR_NO_QUERY),
        timestamp: START,
        ancillary: AncillaryData::from(ancillary),
        currency: usdc(),
        reward,
        bond,
        liveness: 0,
    }
}

fn rain_market() -> MarketTerms {
    MarketTerms {
        name: "RAIN".to_string(),
        title: "Rain".to_string(),
        description: "Will it rain in Lisbon on 1 May?".to_string(),
        collateral: usdc(),
        reward: 10,
        bond: 100,
        liveness: 0,
    }
}

#[test_log::test]
fn test_request_keys_are_unique_per_ancillary() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    fund(&mut protocol, "requester", 100, &engine);

    protocol
        .request_price(&addr("requester"), question("q: a", 0, 10))
        .unwrap();
    let err = protocol
        .request_price(&addr("requester"), question("q: a", 0, 10))
        .unwrap_err();
    assert!(matches!(&err, HostError::Oracle(e) if e.kind() == ErrorKind::KeyConflict));

    protocol
        .request_price(&addr("requester"), question("q: b", 0, 10))
        .unwrap();
    assert_eq!(protocol.engine().request_count(), 2);
}

#[test]
fn test_unsettled_price_is_unavailable_and_settled_price_is_stable() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    fund(&mut protocol, "requester", 100, &engine);
    fund(&mut protocol, "alice", 1_000, &engine);

    let key = protocol
        .request_price(&addr("requester"), question("q: stable", 5, 50))
        .unwrap();
    assert!(matches!(
        protocol.get_price(&key),
        Err(HostError::Oracle(OracleError::NotSettled))
    ));

    protocol
        .propose_price(&addr("alice"), &key, Outcome::Value(42))
        .unwrap();
    protocol.advance_time(7_201);
    assert_eq!(protocol.settle(&addr("anyone"), &key).unwrap(), Outcome::Value(42));
    for _ in 0..3 {
        assert_eq!(protocol.get_price(&key).unwrap(), Outcome::Value(42));
    }
    assert_eq!(protocol.get_state(&key), RequestState::Settled);
    protocol.verify_escrow().unwrap();
}

#[test_log::test]
fn test_fee_increase_charges_bond_fee_and_double_delta() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    protocol.set_final_fee(&usdc(), 10);
    fund(&mut protocol, "requester", 100, &engine);
    fund(&mut protocol, "alice", 1_000, &engine);
    fund(&mut protocol, "bob", 1_000, &engine);

    let key = protocol
        .request_price(&addr("requester"), question("q: fee up", 0, 100))
        .unwrap();
    assert_eq!(protocol.propose_price(&addr("alice"), &key, Outcome::yes()).unwrap(), 110);

    protocol.advance_time(60);
    protocol.set_final_fee(&usdc(), 110);
    assert_eq!(protocol.dispute_price(&addr("bob"), &key).unwrap(), 100 + 10 + 200);
    protocol.verify_escrow().unwrap();

    let authority = Deployment::default().authority;
    assert_eq!(protocol.balance_of(&usdc(), &authority), 2 * 210);
}

#[test]
fn test_fee_decrease_refunds_proposer() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    protocol.set_final_fee(&usdc(), 50);
    fund(&mut protocol, "requester", 100, &engine);
    fund(&mut protocol, "alice", 1_000, &engine);
    fund(&mut protocol, "bob", 1_000, &engine);

    let key = protocol
        .request_price(&addr("requester"), question("q: fee down", 0, 100))
        .unwrap();
    protocol.propose_price(&addr("alice"), &key, Outcome::yes()).unwrap();
    protocol.set_final_fee(&usdc(), 20);
    assert_eq!(protocol.dispute_price(&addr("bob"), &key).unwrap(), 120);

    // Both sides end up carrying bond + the new fee
    assert_eq!(protocol.balance_of(&usdc(), &addr("alice")), 1_000 - 120);
    assert_eq!(protocol.balance_of(&usdc(), &addr("bob")), 1_000 - 120);
}

#[test_log::test]
fn test_prediction_market_pays_long_holders() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    let market = addr("rain-market");
    protocol.register_market(market.clone(), rain_market()).unwrap();
    fund(&mut protocol, "creator", 10, &market);
    fund(&mut protocol, "alice", 100, &market);
    fund(&mut protocol, "carol", 1_000, &engine);

    let key = protocol.initialize_market(&market, &addr("creator")).unwrap();
    protocol.create_pairs(&market, &addr("alice"), 100).unwrap();
    let long = protocol.market(&market).unwrap().long_token().clone();
    protocol.transfer(&long, &addr("alice"), &addr("bob"), 50).unwrap();
    protocol.redeem_pairs(&market, &addr("alice"), 25).unwrap();
    assert_eq!(protocol.balance_of(&usdc(), &market), 75);

    protocol.propose_price(&addr("carol"), &key, Outcome::yes()).unwrap();
    protocol.advance_time(protocol.config().market_liveness + 1);
    protocol.settle(&addr("anyone"), &key).unwrap();
    assert_eq!(
        protocol.market(&market).unwrap().settled_fraction(),
        Some(FIXED_POINT_SCALE as Amount)
    );

    assert_eq!(protocol.settle_tokens(&market, &addr("alice"), 25, 0).unwrap(), 25);
    assert_eq!(protocol.settle_tokens(&market, &addr("alice"), 0, 75).unwrap(), 0);
    assert_eq!(protocol.settle_tokens(&market, &addr("bob"), 50, 0).unwrap(), 50);
    assert_eq!(protocol.balance_of(&usdc(), &market), 0);
    assert_eq!(protocol.balance_of(&usdc(), &addr("alice")), 50);
    assert_eq!(protocol.balance_of(&usdc(), &addr("carol")), 1_010);
}

#[test_log::test]
fn test_prediction_market_reasks_after_dispute_and_ignores_stale_answer() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    let market = addr("rain-market");
    protocol.register_market(market.clone(), rain_market()).unwrap();
    fund(&mut protocol, "creator", 10, &market);
    fund(&mut protocol, "carol", 1_000, &engine);
    fund(&mut protocol, "dave", 1_000, &engine);

    let first = protocol.initialize_market(&market, &addr("creator")).unwrap();
    protocol.propose_price(&addr("carol"), &first, Outcome::yes()).unwrap();
    protocol.advance_time(100);
    protocol.dispute_price(&addr("dave"), &first).unwrap();

    let second = protocol.market(&market).unwrap().current_request().unwrap();
    assert_ne!(second, first);
    assert_eq!(second.timestamp, START + 100);
    assert_eq!(protocol.engine().escrow_of(&second), 10);
    protocol.market(&market).unwrap().verify_collateral(&protocol.world().ledger).unwrap();

    // The superseded request resolves, but the market keeps waiting
    assert_eq!(protocol.pending_votes().len(), 1);
    protocol.resolve_escalation(&first, Outcome::no()).unwrap();
    assert!(protocol.pending_votes().is_empty());
    assert_eq!(protocol.settle(&addr("anyone"), &first).unwrap(), Outcome::no());
    assert!(!protocol.market(&market).unwrap().is_settled());

    protocol.propose_price(&addr("carol"), &second, Outcome::Value(FIXED_POINT_SCALE / 4)).unwrap();
    protocol.advance_time(protocol.config().market_liveness + 1);
    protocol.settle(&addr("anyone"), &second).unwrap();
    assert_eq!(
        protocol.market(&market).unwrap().settled_fraction(),
        Some(FIXED_POINT_SCALE as Amount / 4)
    );
    assert_eq!(protocol.get_price(&first).unwrap(), Outcome::no());
}

#[test]
fn test_failed_callback_rolls_back_dispute() {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    let market = addr("rain-market");
    protocol.register_market(market.clone(), rain_market()).unwrap();
    fund(&mut protocol, "creator", 10, &market);
    fund(&mut protocol, "carol", 1_000, &engine);
    fund(&mut protocol, "dave", 1_000, &engine);

    let key = protocol.initialize_market(&market, &addr("creator")).unwrap();
    protocol.propose_price(&addr("carol"), &key, Outcome::yes()).unwrap();

    // Same second as the original request: the market cannot re-ask
    let err = protocol.dispute_price(&addr("dave"), &key).unwrap_err();
    assert!(matches!(err, HostError::Market(_)));

    assert_eq!(protocol.balance_of(&usdc(), &addr("dave")), 1_000);
    assert_eq!(protocol.get_state(&key), RequestState::Proposed);
    assert_eq!(protocol.engine().escrow_of(&key), 110);
    protocol.verify_escrow().unwrap();
}

fn claim_setup() -> (Protocol, Address, PolicyId) {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    let insurer = addr("insurer");
    protocol.register_insurance(insurer.clone(), usdc()).unwrap();
    protocol.set_final_fee(&usdc(), 5);
    fund(&mut protocol, "sponsor", 10_000, &insurer);
    fund(&mut protocol, "claimant", 1_000, &insurer);
    fund(&mut protocol, "bob", 1_000, &engine);

    let policy = protocol
        .issue_insurance(&insurer, &addr("sponsor"), "flood", &addr("ben"), 10_000)
        .unwrap();
    (protocol, insurer, policy)
}

#[test_log::test]
fn test_rejected_claim_can_be_claimed_again() {
    let (mut protocol, insurer, policy) = claim_setup();

    let first = protocol.submit_claim(&insurer, &addr("claimant"), &policy).unwrap();
    // 0.1% of 10_000 plus the final fee
    assert_eq!(protocol.balance_of(&usdc(), &addr("claimant")), 1_000 - 15);
    assert!(protocol.insurer(&insurer).unwrap().policy(&policy).unwrap().claim_in_flight);

    protocol.dispute_price(&addr("bob"), &first).unwrap();
    protocol.resolve_escalation(&first, Outcome::Value(CANONICAL_FALSE)).unwrap();
    protocol.settle(&addr("anyone"), &first).unwrap();
    assert!(!protocol.insurer(&insurer).unwrap().policy(&policy).unwrap().claim_in_flight);

    // Same timestamp collides with the first claim; nothing is charged
    let err = protocol
        .submit_claim(&insurer, &addr("claimant"), &policy)
        .unwrap_err();
    assert!(matches!(&err, HostError::Insurance(_)));
    let claimant_before = protocol.balance_of(&usdc(), &addr("claimant"));

    protocol.advance_time(1);
    let second = protocol.submit_claim(&insurer, &addr("claimant"), &policy).unwrap();
    assert_eq!(protocol.balance_of(&usdc(), &addr("claimant")), claimant_before - 15);

    protocol.advance_time(protocol.config().insurance_liveness + 1);
    assert_eq!(protocol.settle(&addr("anyone"), &second).unwrap(), Outcome::yes());
    assert_eq!(protocol.balance_of(&usdc(), &addr("ben")), 10_000);
    assert!(protocol.insurer(&insurer).unwrap().policy(&policy).is_none());
    // Claimant's stake comes back with the undisputed proposal
    assert_eq!(protocol.balance_of(&usdc(), &addr("claimant")), claimant_before);
    protocol.verify_escrow().unwrap();
}

#[test]
fn test_assert_and_ratify_reaches_authority() {
    let mut protocol = protocol();
    let ratifier = addr("ratifier");
    protocol.register_ratifier(ratifier.clone()).unwrap();
    protocol.set_final_fee(&usdc(), 7);
    fund(&mut protocol, "alice", 100, &ratifier);

    let key = protocol
        .assert_and_ratify(&ratifier, &addr("alice"), question("q: ratify", 50, 50), Outcome::yes())
        .unwrap();
    assert_eq!(protocol.balance_of(&usdc(), &addr("alice")), 100 - 14);
    assert_eq!(protocol.get_state(&key), RequestState::Disputed);

    protocol.resolve_escalation(&key, Outcome::yes()).unwrap();
    assert_eq!(protocol.get_state(&key), RequestState::Resolved);
    assert_eq!(protocol.settle(&addr("anyone"), &key).unwrap(), Outcome::yes());
}

#[test]
fn test_protocol_loads_default_config() {
    let protocol = Protocol::load(None).unwrap();
    assert_eq!(protocol.config(), &OracleConfig::default());
}

fn settle_disputed(fee_at_proposal: Amount, fee_at_dispute: Amount, proposer_wins: bool) -> (Protocol, RequestKey) {
    let mut protocol = protocol();
    let engine = protocol.engine_address().clone();
    protocol.set_final_fee(&usdc(), fee_at_proposal);
    for who in ["requester", "alice", "bob"] {
        fund(&mut protocol, who, 100_000, &engine);
    }
    let key = protocol
        .request_price(&addr("requester"), question("q: fuzz", 30, 500))
        .unwrap();
    protocol.propose_price(&addr("alice"), &key, Outcome::yes()).unwrap();
    protocol.set_final_fee(&usdc(), fee_at_dispute);
    protocol.dispute_price(&addr("bob"), &key).unwrap();
    protocol
        .resolve_escalation(&key, if proposer_wins { Outcome::yes() } else { Outcome::no() })
        .unwrap();
    protocol.settle(&addr("anyone"), &key).unwrap();
    (protocol, key)
}

proptest! {
    #[test]
    fn prop_disputed_settlement_conserves_value(
        fee_at_proposal in 0u128..1_000,
        fee_at_dispute in 0u128..1_000,
        proposer_wins in any::<bool>(),
    ) {
        let (protocol, key) = settle_disputed(fee_at_proposal, fee_at_dispute, proposer_wins);
        let store = Deployment::default().fee_collector;

        let total: Amount = ["requester", "alice", "bob"]
            .iter()
            .map(|who| protocol.balance_of(&usdc(), &addr(who)))
            .sum::<Amount>()
            + protocol.balance_of(&usdc(), &store);
        prop_assert_eq!(total, 300_000);
        prop_assert_eq!(protocol.engine().escrow_of(&key), 0);

        // An increase is covered entirely by the disputer; a decrease is
        // refunded to the proposer
        let (alice_paid, bob_paid) = if fee_at_dispute >= fee_at_proposal {
            (500 + fee_at_proposal, 500 + 2 * fee_at_dispute - fee_at_proposal)
        } else {
            (500 + fee_at_dispute, 500 + fee_at_dispute)
        };
        let (winner, winner_paid, loser, loser_paid) = if proposer_wins {
            ("alice", alice_paid, "bob", bob_paid)
        } else {
            ("bob", bob_paid, "alice", alice_paid)
        };
        // Winner: own stake back, loser's bond, the reward
        prop_assert_eq!(
            protocol.balance_of(&usdc(), &addr(winner)),
            100_000 - winner_paid + (500 + fee_at_dispute) + 500 + 30
        );
        prop_assert_eq!(protocol.balance_of(&usdc(), &addr(loser)), 100_000 - loser_paid);
        prop_assert_eq!(protocol.balance_of(&usdc(), &store), fee_at_dispute);
    }
}
