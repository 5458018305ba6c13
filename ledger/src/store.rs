//! Store traits and the atomic unit-of-work runner.

use std::collections::{BTreeMap, BTreeSet};
use std::time::Duration;

use async_trait::async_trait;
use bankcore_common::{AccountNumber, Currency, PrincipalId, MAX_MONEY};
use futures::stream::BoxStream;
use rust_decimal::Decimal;
use tracing::{debug, warn};

use crate::account::{Account, AccountType};
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{NewTransaction, TransactionFilter, TransactionRecord};
use crate::lock_manager::LockStats;

/// Lazy, finite sequence of journal records. Each call to
/// [`LedgerStore::query_transactions`] re-executes the query.
pub type TransactionStream<'a> = BoxStream<'a, LedgerResult<TransactionRecord>>;

/// Durable storage for accounts and the transaction journal.
#[async_trait]
pub trait LedgerStore: Send + Sync {
    /// Load one account.
    async fn get_account(&self, number: &AccountNumber) -> LedgerResult<Account>;

    /// Open an account under a freshly allocated account number.
    async fn create_account(
        &self,
        owner: PrincipalId,
        account_type: AccountType,
        currency: Currency,
    ) -> LedgerResult<Account>;

    /// Accounts owned by a principal, oldest first.
    async fn accounts_owned_by(&self, owner: &PrincipalId) -> LedgerResult<Vec<Account>>;

    /// Every account, oldest first.
    async fn list_accounts(&self) -> LedgerResult<Vec<Account>>;

    /// Start a unit of work holding exclusive access to `accounts`.
    ///
    /// Rows are locked in ascending account-number order regardless of the
    /// order given. Fails with `AccountNotFound` if any account is missing.
    async fn begin(&self, accounts: &[AccountNumber]) -> LedgerResult<Box<dyn UnitOfWork>>;

    /// Stream journal records matching `filter`, newest first.
    fn query_transactions(&self, filter: TransactionFilter) -> TransactionStream<'_>;

    /// Count records matching `filter`, ignoring its offset and limit.
    async fn count_transactions(&self, filter: &TransactionFilter) -> LedgerResult<u64>;

    /// Drop process-local lock state for idle accounts. Returns how many
    /// entries went. Stores that lock in the database have nothing to prune.
    fn prune_idle_locks(&self) -> usize {
        0
    }

    /// Process-local lock counters, if the store keeps any.
    fn lock_stats(&self) -> Option<LockStats> {
        None
    }
}

/// A transactional view over a set of locked accounts.
///
/// Mutations are staged in memory and only reach the store on
/// [`UnitOfWork::commit`]. Dropping a unit without committing rolls it back.
#[async_trait]
pub trait UnitOfWork: Send {
    /// Current (staged) state of a locked account.
    fn account(&self, number: &AccountNumber) -> LedgerResult<&Account>;

    /// Increase a locked account's balance.
    fn credit(&mut self, number: &AccountNumber, amount: Decimal) -> LedgerResult<()>;

    /// Decrease a locked account's balance. Fails rather than go negative.
    fn debit(&mut self, number: &AccountNumber, amount: Decimal) -> LedgerResult<()>;

    /// Stage an append-only journal record.
    fn append_transaction(&mut self, record: NewTransaction);

    /// Apply every staged change atomically and return the persisted records.
    async fn commit(self: Box<Self>) -> LedgerResult<Vec<TransactionRecord>>;
}

/// Staged state shared by the store implementations' units of work.
#[derive(Debug, Default)]
pub(crate) struct StagedChanges {
    accounts: BTreeMap<AccountNumber, Account>,
    dirty: BTreeSet<AccountNumber>,
    records: Vec<NewTransaction>,
}

impl StagedChanges {
    pub(crate) fn new(accounts: impl IntoIterator<Item = Account>) -> Self {
        Self {
            accounts: accounts
                .into_iter()
                .map(|a| (a.account_number.clone(), a))
                .collect(),
            ..Default::default()
        }
    }

    pub(crate) fn account(&self, number: &AccountNumber) -> LedgerResult<&Account> {
        self.accounts
            .get(number)
            .ok_or_else(|| LedgerError::AccountNotFound(number.clone()))
    }

    pub(crate) fn credit(&mut self, number: &AccountNumber, amount: Decimal) -> LedgerResult<()> {
        let account = self
            .accounts
            .get_mut(number)
            .ok_or_else(|| LedgerError::AccountNotFound(number.clone()))?;
        account.balance = account
            .balance
            .checked_add(amount)
            .filter(|balance| *balance <= MAX_MONEY)
            .ok_or_else(|| LedgerError::BalanceLimit {
                account: number.clone(),
                limit: MAX_MONEY,
            })?;
        account.updated_at = bankcore_common::now();
        self.dirty.insert(number.clone());
        Ok(())
    }

    pub(crate) fn debit(&mut self, number: &AccountNumber, amount: Decimal) -> LedgerResult<()> {
        let account = self
            .accounts
            .get_mut(number)
            .ok_or_else(|| LedgerError::AccountNotFound(number.clone()))?;
        if account.balance < amount {
            return Err(LedgerError::InsufficientFunds {
                account: number.clone(),
                required: amount,
                available: account.balance,
            });
        }
        account.balance = account
            .balance
            .checked_sub(amount)
            .ok_or_else(|| LedgerError::BalanceLimit {
                account: number.clone(),
                limit: MAX_MONEY,
            })?;
        account.updated_at = bankcore_common::now();
        self.dirty.insert(number.clone());
        Ok(())
    }

    pub(crate) fn append(&mut self, record: NewTransaction) {
        self.records.push(record);
    }

    /// Every changed account must be explained by a staged record and every
    /// staged record must explain a changed account.
    pub(crate) fn validate(&self) -> LedgerResult<()> {
        for number in &self.dirty {
            let explained = self.records.iter().any(|r| {
                r.account == *number || r.reference_account.as_ref() == Some(number)
            });
            if !explained {
                return Err(LedgerError::UnbalancedUnit(format!(
                    "balance of {} changed without a journal record",
                    number.masked()
                )));
            }
        }

        for record in &self.records {
            if !self.dirty.contains(&record.account) {
                return Err(LedgerError::UnbalancedUnit(format!(
                    "{} record for {} without a balance change",
                    record.kind,
                    record.account.masked()
                )));
            }
            if record.amount <= Decimal::ZERO {
                return Err(LedgerError::UnbalancedUnit(
                    "journal amounts must be positive".to_string(),
                ));
            }
        }

        if let Some(account) = self.accounts.values().find(|a| a.balance < Decimal::ZERO) {
            return Err(LedgerError::UnbalancedUnit(format!(
                "negative balance staged for {}",
                account.account_number.masked()
            )));
        }

        Ok(())
    }

    pub(crate) fn dirty_accounts(&self) -> impl Iterator<Item = &Account> {
        self.dirty.iter().filter_map(|n| self.accounts.get(n))
    }

    pub(crate) fn into_records(self) -> Vec<NewTransaction> {
        self.records
    }
}

/// Bounded retry for transient store conflicts.
#[derive(Debug, Clone)]
pub struct RetryPolicy {
    /// Total attempts, including the first.
    pub max_attempts: u32,
    /// Base backoff; attempt `n` waits `n * backoff`.
    pub backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 5,
            backoff: Duration::from_millis(10),
        }
    }
}

/// Outcome of a committed unit of work.
#[derive(Debug)]
pub struct Committed<T> {
    pub value: T,
    pub records: Vec<TransactionRecord>,
    pub attempts: u32,
}

/// Run `work` inside an atomic unit over `accounts`, committing on success.
///
/// `work` is synchronous: it reads and stages changes against the locked
/// view and may be invoked again if the store reports a conflict. Errors
/// returned by `work` abort the unit without retry.
pub async fn with_atomic_unit<T, E, F>(
    store: &dyn LedgerStore,
    accounts: &[AccountNumber],
    policy: &RetryPolicy,
    mut work: F,
) -> Result<Committed<T>, E>
where
    F: FnMut(&mut dyn UnitOfWork) -> Result<T, E> + Send,
    E: From<LedgerError> + Send,
    T: Send,
{
    let max_attempts = policy.max_attempts.max(1);
    let mut attempt = 0;

    loop {
        attempt += 1;

        let outcome = match store.begin(accounts).await {
            Ok(mut unit) => {
                let value = work(unit.as_mut())?;
                unit.commit().await.map(|records| (value, records))
            }
            Err(e) => Err(e),
        };

        match outcome {
            Ok((value, records)) => {
                debug!(attempt, records = records.len(), "Unit of work committed");
                return Ok(Committed {
                    value,
                    records,
                    attempts: attempt,
                });
            }
            Err(e) if e.is_conflict() && attempt < max_attempts => {
                warn!(attempt, error = %e, "Ledger conflict, retrying unit of work");
                tokio::time::sleep(policy.backoff * attempt).await;
            }
            Err(e) if e.is_conflict() => {
                warn!(attempt, error = %e, "Ledger conflict retries exhausted");
                return Err(LedgerError::RetriesExhausted { attempts: attempt }.into());
            }
            Err(e) => return Err(e.into()),
        }
    }
}
