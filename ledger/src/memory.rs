//! In-memory ledger store.

use std::collections::HashMap;
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::RwLock;
use rust_decimal::Decimal;
use tracing::{debug, info, instrument};

use bankcore_common::{AccountNumber, Currency, PrincipalId, TransactionId};

use crate::account::{Account, AccountType};
use crate::account_number::AccountNumberGenerator;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{NewTransaction, TransactionFilter, TransactionRecord};
use crate::lock_manager::{AccountLockManager, AccountLocks, LockStats};
use crate::store::{LedgerStore, StagedChanges, TransactionStream, UnitOfWork};

struct Inner {
    accounts: RwLock<HashMap<AccountNumber, Account>>,
    journal: RwLock<Vec<TransactionRecord>>,
    next_id: AtomicI64,
    locks: AccountLockManager,
    numbers: AccountNumberGenerator,
}

/// Ledger store held entirely in process memory.
///
/// Units of work hold per-account locks for their lifetime; commit applies
/// every staged change inside a single write section.
#[derive(Clone)]
pub struct InMemoryLedgerStore {
    inner: Arc<Inner>,
}

impl InMemoryLedgerStore {
    pub fn new(lock_timeout: Duration, numbers: AccountNumberGenerator) -> Self {
        Self {
            inner: Arc::new(Inner {
                accounts: RwLock::new(HashMap::new()),
                journal: RwLock::new(Vec::new()),
                next_id: AtomicI64::new(1),
                locks: AccountLockManager::new(lock_timeout),
                numbers,
            }),
        }
    }

    /// Insert an account as-is. Used to seed fixtures.
    pub fn insert_account(&self, account: Account) {
        self.inner
            .accounts
            .write()
            .insert(account.account_number.clone(), account);
    }

    /// Number of records in the journal.
    pub fn journal_len(&self) -> usize {
        self.inner.journal.read().len()
    }
}

impl Default for InMemoryLedgerStore {
    fn default() -> Self {
        Self::new(Duration::from_secs(5), AccountNumberGenerator::default())
    }
}

#[async_trait]
impl LedgerStore for InMemoryLedgerStore {
    async fn get_account(&self, number: &AccountNumber) -> LedgerResult<Account> {
        self.inner
            .accounts
            .read()
            .get(number)
            .cloned()
            .ok_or_else(|| LedgerError::AccountNotFound(number.clone()))
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn create_account(
        &self,
        owner: PrincipalId,
        account_type: AccountType,
        currency: Currency,
    ) -> LedgerResult<Account> {
        let mut accounts = self.inner.accounts.write();
        for candidate in self.inner.numbers.candidates() {
            if accounts.contains_key(&candidate) {
                continue;
            }
            let account = Account::open(candidate.clone(), owner, account_type, currency);
            accounts.insert(candidate, account.clone());
            info!(account = %account.account_number.masked(), "Account opened");
            return Ok(account);
        }
        Err(LedgerError::AccountNumbersExhausted)
    }

    async fn accounts_owned_by(&self, owner: &PrincipalId) -> LedgerResult<Vec<Account>> {
        let mut owned: Vec<Account> = self
            .inner
            .accounts
            .read()
            .values()
            .filter(|a| a.is_owned_by(owner))
            .cloned()
            .collect();
        owned.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(owned)
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        let mut all: Vec<Account> = self.inner.accounts.read().values().cloned().collect();
        all.sort_by(|a, b| a.created_at.cmp(&b.created_at));
        Ok(all)
    }

    async fn begin(&self, accounts: &[AccountNumber]) -> LedgerResult<Box<dyn UnitOfWork>> {
        let locks = self.inner.locks.acquire(accounts).await?;

        let snapshot = {
            let map = self.inner.accounts.read();
            accounts
                .iter()
                .map(|n| {
                    map.get(n)
                        .cloned()
                        .ok_or_else(|| LedgerError::AccountNotFound(n.clone()))
                })
                .collect::<LedgerResult<Vec<Account>>>()?
        };

        Ok(Box::new(MemoryUnit {
            inner: Arc::clone(&self.inner),
            staged: StagedChanges::new(snapshot),
            _locks: locks,
        }))
    }

    fn query_transactions(&self, filter: TransactionFilter) -> TransactionStream<'_> {
        let matching: Vec<TransactionRecord> = {
            let journal = self.inner.journal.read();
            journal
                .iter()
                .rev()
                .filter(|r| filter.matches(r))
                .skip(usize::try_from(filter.offset).unwrap_or(usize::MAX))
                .take(filter.limit.map_or(usize::MAX, |l| usize::try_from(l).unwrap_or(usize::MAX)))
                .cloned()
                .collect()
        };
        stream::iter(matching.into_iter().map(Ok)).boxed()
    }

    async fn count_transactions(&self, filter: &TransactionFilter) -> LedgerResult<u64> {
        let journal = self.inner.journal.read();
        Ok(journal.iter().filter(|r| filter.matches(r)).count() as u64)
    }

    fn prune_idle_locks(&self) -> usize {
        self.inner.locks.prune_idle()
    }

    fn lock_stats(&self) -> Option<LockStats> {
        Some(self.inner.locks.stats())
    }
}

struct MemoryUnit {
    inner: Arc<Inner>,
    staged: StagedChanges,
    _locks: AccountLocks,
}

#[async_trait]
impl UnitOfWork for MemoryUnit {
    fn account(&self, number: &AccountNumber) -> LedgerResult<&Account> {
        self.staged.account(number)
    }

    fn credit(&mut self, number: &AccountNumber, amount: Decimal) -> LedgerResult<()> {
        self.staged.credit(number, amount)
    }

    fn debit(&mut self, number: &AccountNumber, amount: Decimal) -> LedgerResult<()> {
        self.staged.debit(number, amount)
    }

    fn append_transaction(&mut self, record: NewTransaction) {
        self.staged.append(record);
    }

    async fn commit(self: Box<Self>) -> LedgerResult<Vec<TransactionRecord>> {
        let MemoryUnit {
            inner,
            staged,
            _locks,
        } = *self;
        staged.validate()?;

        let mut accounts = inner.accounts.write();
        let mut journal = inner.journal.write();

        for account in staged.dirty_accounts() {
            accounts.insert(account.account_number.clone(), account.clone());
        }

        let timestamp = bankcore_common::now();
        let committed: Vec<TransactionRecord> = staged
            .into_records()
            .into_iter()
            .map(|record| {
                let id = inner.next_id.fetch_add(1, Ordering::SeqCst);
                record.into_record(TransactionId::new(id), timestamp)
            })
            .collect();
        journal.extend(committed.iter().cloned());

        debug!(records = committed.len(), "In-memory unit committed");
        Ok(committed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::journal::TransactionType;
    use crate::store::{with_atomic_unit, RetryPolicy};
    use futures::TryStreamExt;
    use rust_decimal_macros::dec;

    async fn funded(store: &InMemoryLedgerStore, balance: Decimal) -> AccountNumber {
        let mut account = store
            .create_account(PrincipalId::new(), AccountType::Savings, Currency::INR)
            .await
            .unwrap();
        account.balance = balance;
        let number = account.account_number.clone();
        store.insert_account(account);
        number
    }

    #[tokio::test]
    async fn test_create_account_allocates_unique_numbers() {
        let store = InMemoryLedgerStore::default();
        let owner = PrincipalId::new();

        let a = store
            .create_account(owner, AccountType::Savings, Currency::INR)
            .await
            .unwrap();
        let b = store
            .create_account(owner, AccountType::Current, Currency::USD)
            .await
            .unwrap();

        assert_ne!(a.account_number, b.account_number);
        assert_eq!(store.accounts_owned_by(&owner).await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_commit_applies_balance_and_record_together() {
        let store = InMemoryLedgerStore::default();
        let number = funded(&store, dec!(1000.00)).await;

        let committed = with_atomic_unit(&store, &[number.clone()], &RetryPolicy::default(), |unit| {
            unit.credit(&number, dec!(200.00))?;
            unit.append_transaction(NewTransaction::deposit(
                number.clone(),
                dec!(200.00),
                Currency::INR,
            ));
            Ok::<_, LedgerError>(())
        })
        .await
        .unwrap();

        assert_eq!(committed.records.len(), 1);
        assert_eq!(committed.records[0].kind, TransactionType::Deposit);
        assert_eq!(store.get_account(&number).await.unwrap().balance, dec!(1200.00));
    }

    #[tokio::test]
    async fn test_dropped_unit_rolls_back() {
        let store = InMemoryLedgerStore::default();
        let number = funded(&store, dec!(50.00)).await;

        {
            let mut unit = store.begin(&[number.clone()]).await.unwrap();
            unit.credit(&number, dec!(10.00)).unwrap();
        }

        assert_eq!(store.get_account(&number).await.unwrap().balance, dec!(50.00));
        assert_eq!(store.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_unbalanced_commit_changes_nothing() {
        let store = InMemoryLedgerStore::default();
        let number = funded(&store, dec!(50.00)).await;

        let mut unit = store.begin(&[number.clone()]).await.unwrap();
        unit.debit(&number, dec!(10.00)).unwrap();
        assert!(matches!(
            unit.commit().await,
            Err(LedgerError::UnbalancedUnit(_))
        ));

        assert_eq!(store.get_account(&number).await.unwrap().balance, dec!(50.00));
    }

    #[tokio::test]
    async fn test_begin_unknown_account() {
        let store = InMemoryLedgerStore::default();
        let missing = AccountNumber::from_digits("123412341234");

        assert!(matches!(
            store.begin(&[missing]).await,
            Err(LedgerError::AccountNotFound(_))
        ));
    }

    #[tokio::test]
    async fn test_query_is_newest_first_and_restartable() {
        let store = InMemoryLedgerStore::default();
        let number = funded(&store, dec!(0.00)).await;

        for amount in [dec!(1.00), dec!(2.00), dec!(3.00)] {
            with_atomic_unit(&store, &[number.clone()], &RetryPolicy::default(), |unit| {
                unit.credit(&number, amount)?;
                unit.append_transaction(NewTransaction::deposit(number.clone(), amount, Currency::INR));
                Ok::<_, LedgerError>(())
            })
            .await
            .unwrap();
        }

        let filter = TransactionFilter {
            offset: 1,
            limit: Some(5),
            ..TransactionFilter::for_account(number.clone())
        };
        let first: Vec<TransactionRecord> =
            store.query_transactions(filter.clone()).try_collect().await.unwrap();
        let second: Vec<TransactionRecord> =
            store.query_transactions(filter.clone()).try_collect().await.unwrap();

        assert_eq!(first, second);
        assert_eq!(
            first.iter().map(|r| r.amount).collect::<Vec<_>>(),
            vec![dec!(2.00), dec!(1.00)]
        );
        assert!(first[0].id > first[1].id);
        assert_eq!(store.count_transactions(&filter).await.unwrap(), 3);
    }

    #[tokio::test]
    async fn test_lock_contention_is_retried_as_conflict() {
        let store = InMemoryLedgerStore::new(
            Duration::from_millis(10),
            AccountNumberGenerator::default(),
        );
        let number = funded(&store, dec!(10.00)).await;
        let _held = store.begin(&[number.clone()]).await.unwrap();

        let policy = RetryPolicy {
            max_attempts: 2,
            backoff: Duration::from_millis(1),
        };
        let result = with_atomic_unit(&store, &[number.clone()], &policy, |_| {
            Ok::<_, LedgerError>(())
        })
        .await;

        assert!(matches!(
            result,
            Err(LedgerError::RetriesExhausted { attempts: 2 })
        ));
    }

    #[tokio::test]
    async fn test_idle_locks_pruned_through_store() {
        let store = InMemoryLedgerStore::default();
        let held = funded(&store, dec!(10.00)).await;
        let idle = funded(&store, dec!(10.00)).await;

        drop(store.begin(&[idle]).await.unwrap());
        let _unit = store.begin(&[held]).await.unwrap();

        assert_eq!(store.lock_stats().map(|s| s.tracked), Some(2));
        assert_eq!(store.prune_idle_locks(), 1);
        let stats = store.lock_stats().unwrap();
        assert_eq!(stats.tracked, 1);
        assert_eq!(stats.acquired, 2);
    }
}
