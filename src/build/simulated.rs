use std::{thread, time::Duration};

use hashbrown::HashMap;
use parking_lot::Mutex;
use uuid::Uuid;

use crate::{
    operation::{OperationKind, OperationRequest},
    types::{Amount, Height, PoolType},
};

use super::traits::{BuiltTransaction, ConstructionError, TransactionBuilder};

/// Builder that moves value between per-pool balances instead of proving.
///
/// Balances are debited and credited atomically per build, so concurrent
/// operations never spend the same value twice.
#[derive(Debug, Default)]
pub struct SimulatedBuilder {
    balances: Mutex<HashMap<PoolType, Amount>>,
    proving_delay: Duration,
}

impl SimulatedBuilder {
    /// Builder with empty balances and no delay.
    pub fn new() -> Self {
        Self::default()
    }

    /// Sleeps this long per build to stand in for proof generation.
    pub fn with_proving_delay(mut self, delay: Duration) -> Self {
        self.proving_delay = delay;
        self
    }

    /// Adds `amount` to `pool`, saturating at `Amount::MAX`.
    pub fn fund(&self, pool: PoolType, amount: Amount) {
        let mut balances = self.balances.lock();
        let bal = balances.entry(pool).or_insert(0);
        *bal = bal.saturating_add(amount);
    }

    /// Current balance of `pool`.
    pub fn balance(&self, pool: PoolType) -> Amount {
        self.balances.lock().get(&pool).copied().unwrap_or(0)
    }
}

impl TransactionBuilder for SimulatedBuilder {
    fn build(&self, request: &OperationRequest, _inclusion_height: Height) -> Result<BuiltTransaction, ConstructionError> {
        if !self.proving_delay.is_zero() {
            thread::sleep(self.proving_delay);
        }

        let mut balances = self.balances.lock();
        let mut sources = request.sources.clone();
        sources.sort();
        sources.dedup();

        // All arithmetic happens on a staged copy; nothing is written back
        // unless every debit and credit fits.
        let mut staged: HashMap<PoolType, Amount> = sources
            .iter()
            .map(|p| (*p, balances.get(p).copied().unwrap_or(0)))
            .collect();
        let available = sources
            .iter()
            .try_fold(0, |acc: Amount, p| acc.checked_add(staged[p]))
            .ok_or(ConstructionError::AmountOutOfRange)?;

        let value = match request.kind {
            OperationKind::ShieldCoinbase | OperationKind::MergeToAddress => {
                if available == 0 {
                    return Err(if request.kind == OperationKind::ShieldCoinbase {
                        ConstructionError::NothingToShield
                    } else {
                        ConstructionError::NothingToMerge
                    });
                }
                let to = request
                    .recipients
                    .first()
                    .map(|r| r.pool)
                    .ok_or_else(|| ConstructionError::Proof("no destination".to_string()))?;
                for pool in &sources {
                    staged.insert(*pool, 0);
                }
                credit(&mut staged, &balances, to, available)?;
                available
            }
            OperationKind::SendMany => {
                let required = request
                    .recipients
                    .iter()
                    .try_fold(0, |acc: Amount, r| acc.checked_add(r.amount.unwrap_or(0)))
                    .ok_or(ConstructionError::AmountOutOfRange)?;
                if required > available {
                    return Err(ConstructionError::InsufficientFunds { available, required });
                }
                let mut remaining = required;
                for pool in &sources {
                    let bal = staged.entry(*pool).or_insert(0);
                    let debit = (*bal).min(remaining);
                    *bal -= debit;
                    remaining -= debit;
                }
                for recipient in &request.recipients {
                    credit(&mut staged, &balances, recipient.pool, recipient.amount.unwrap_or(0))?;
                }
                required
            }
        };

        balances.extend(staged);
        Ok(BuiltTransaction {
            txid: format!("{}{}", Uuid::new_v4().simple(), Uuid::new_v4().simple()),
            value,
        })
    }
}

fn credit(
    staged: &mut HashMap<PoolType, Amount>,
    committed: &HashMap<PoolType, Amount>,
    pool: PoolType,
    amount: Amount,
) -> Result<(), ConstructionError> {
    let bal = staged
        .entry(pool)
        .or_insert_with(|| committed.get(&pool).copied().unwrap_or(0));
    *bal = bal.checked_add(amount).ok_or(ConstructionError::AmountOutOfRange)?;
    Ok(())
}
