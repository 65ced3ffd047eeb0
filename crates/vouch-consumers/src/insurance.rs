/// INSURANCE CLAIM ARBITRATOR
///
/// Policies escrow their full coverage at issuance. A claim is an assertion that
/// the insured event happened: the arbitrator asks the engine a yes/no question
/// and proposes "yes" on the claimant's behalf. If the answer settles as yes the
/// beneficiary is paid and the policy closes; any other answer leaves the policy
/// open for another claim.

use log::{info, warn};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::fmt;
use thiserror::Error;
use vouch_core::{
    Address, AncillaryData, Amount, CoreError, Currency, Identifier, OracleConfig, Outcome,
    RequestKey, TokenLedger, YES_OR_NO_QUERY,
};
use vouch_oracle::{
    yes_or_no_question, CallbackSettings, EscalationAuthority, EscalationEngine, Env,
    OracleError, PriceRequest,
};

/// Deterministic policy identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct PolicyId(pub [u8; 32]);

impl PolicyId {
    /// SHA-256 over the bincode encoding of (block, event, beneficiary, amount)
    pub fn derive(block: u64, event: &str, beneficiary: &Address, amount: Amount) -> Self {
        let encoded = bincode::serialize(&(block, event, beneficiary, amount)).unwrap_or_default();
        let mut hasher = Sha256::new();
        hasher.update(&encoded);
        PolicyId(hasher.finalize().into())
    }

    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }
}

impl fmt::Display for PolicyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Policy {
    pub event: String,
    pub beneficiary: Address,
    pub amount: Amount,
    pub claim_in_flight: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InsuranceArbitrator {
    address: Address,
    engine: Address,
    currency: Currency,
    config: OracleConfig,
    policies: BTreeMap<PolicyId, Policy>,
    /// Open claim requests and the policy each one is for
    claims: BTreeMap<RequestKey, PolicyId>,
}

impl InsuranceArbitrator {
    pub fn new(address: Address, engine: Address, currency: Currency, config: &OracleConfig) -> Self {
        InsuranceArbitrator {
            address,
            engine,
            currency,
            config: config.clone(),
            policies: BTreeMap::new(),
            claims: BTreeMap::new(),
        }
    }

    pub fn address(&self) -> &Address {
        &self.address
    }

    pub fn policy(&self, id: &PolicyId) -> Option<&Policy> {
        self.policies.get(id)
    }

    pub fn claim_for(&self, key: &RequestKey) -> Option<&PolicyId> {
        self.claims.get(key)
    }

    /// Claim bond for a policy covering `amount`
    pub fn claim_bond(&self, amount: Amount) -> InsuranceResult<Amount> {
        Ok(self.config.insurance_bond(amount)?)
    }

    /// Escrow `amount` from `caller` as coverage for `event`
    pub fn issue_insurance(
        &mut self,
        ledger: &mut TokenLedger,
        block: u64,
        caller: &Address,
        event: &str,
        beneficiary: &Address,
        amount: Amount,
    ) -> InsuranceResult<PolicyId> {
        let id = PolicyId::derive(block, event, beneficiary, amount);
        if self.policies.contains_key(&id) {
            return Err(InsuranceError::PolicyExists(id.to_hex()));
        }

        ledger.transfer_from(&self.currency, &self.address, caller, &self.address, amount)?;
        self.policies.insert(
            id,
            Policy {
                event: event.to_string(),
                beneficiary: beneficiary.clone(),
                amount,
                claim_in_flight: false,
            },
        );
        info!("Policy {} issued: {} covering {:?}", id, amount, event);
        Ok(id)
    }

    /// Assert that the insured event happened. The claimant funds
    /// bond + final fee.
    pub fn submit_claim<A: EscalationAuthority + Clone>(
        &mut self,
        engine: &mut EscalationEngine<A>,
        env: &mut Env<'_>,
        caller: &Address,
        policy_id: &PolicyId,
    ) -> InsuranceResult<RequestKey> {
        let policy = self
            .policies
            .get(policy_id)
            .ok_or_else(|| InsuranceError::UnknownPolicy(policy_id.to_hex()))?;
        if policy.claim_in_flight {
            return Err(InsuranceError::ClaimInFlight);
        }

        let bond = self.claim_bond(policy.amount)?;
        let stake = bond
            .checked_add(env.fees.final_fee(&self.currency))
            .ok_or(InsuranceError::Overflow("claim stake"))?;
        let ancillary = claim_question(policy_id, policy);

        env.ledger
            .transfer_from(&self.currency, &self.address, caller, &self.address, stake)?;

        let key = engine.request_price(
            env,
            &self.address,
            PriceRequest {
                identifier: Identifier::from(YES_OR_NO_QUERY),
                timestamp: env.now,
                ancillary,
                currency: self.currency.clone(),
                reward: 0,
                bond,
                liveness: self.config.insurance_liveness,
            },
        )?;
        engine.set_callbacks(
            &self.address,
            &key,
            CallbackSettings {
                on_settled: true,
                ..CallbackSettings::default()
            },
        )?;

        env.ledger
            .approve(&self.currency, &self.address, engine.address(), stake);
        engine.propose_price_for(env, &self.address, caller, &key, Outcome::yes())?;
        env.ledger
            .approve(&self.currency, &self.address, engine.address(), 0);

        if let Some(policy) = self.policies.get_mut(policy_id) {
            policy.claim_in_flight = true;
        }
        self.claims.insert(key.clone(), *policy_id);
        info!("Claim {} submitted against policy {} by {}", key, policy_id, caller);
        Ok(key)
    }

    /// Settlement notification from the engine
    pub fn price_settled(
        &mut self,
        ledger: &mut TokenLedger,
        caller: &Address,
        key: &RequestKey,
        outcome: Outcome,
    ) -> InsuranceResult<()> {
        if caller != &self.engine {
            return Err(InsuranceError::Unauthorized(caller.to_string()));
        }
        let policy_id = self
            .claims
            .remove(key)
            .ok_or_else(|| InsuranceError::UnknownClaim(key.to_string()))?;

        if outcome.is_canonical_true() {
            let policy = self
                .policies
                .remove(&policy_id)
                .ok_or_else(|| InsuranceError::UnknownPolicy(policy_id.to_hex()))?;
            ledger.transfer(&self.currency, &self.address, &policy.beneficiary, policy.amount)?;
            info!(
                "Policy {} paid {} to {} and closed",
                policy_id, policy.amount, policy.beneficiary
            );
        } else if let Some(policy) = self.policies.get_mut(&policy_id) {
            policy.claim_in_flight = false;
            warn!("Claim {} against policy {} rejected ({})", key, policy_id, outcome);
        }
        Ok(())
    }
}

fn claim_question(policy_id: &PolicyId, policy: &Policy) -> AncillaryData {
    yes_or_no_question("Insurance Claim", &policy.event)
        .append_key_value("policyId", &policy_id.to_hex())
}

pub type InsuranceResult<T> = Result<T, InsuranceError>;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum InsuranceError {
    #[error("Policy already exists: {0}")]
    PolicyExists(String),
    #[error("Unknown policy: {0}")]
    UnknownPolicy(String),
    #[error("A claim is already in flight for this policy")]
    ClaimInFlight,
    #[error("No open claim for request {0}")]
    UnknownClaim(String),
    #[error("Callback from unexpected caller: {0}")]
    Unauthorized(String),
    #[error("Arithmetic overflow in {0}")]
    Overflow(&'static str),
    #[error("Oracle error: {0}")]
    Oracle(#[from] OracleError),
    #[error("Funds error: {0}")]
    Funds(#[from] CoreError),
}
