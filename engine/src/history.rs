//! Read-only views over the journal.

use std::sync::Arc;

use bankcore_common::permissions::VIEW_ALL_TRANSACTIONS;
use bankcore_common::{AccountNumber, BankError, DateRange, Principal, Result};
use bankcore_ledger::{LedgerStore, TransactionFilter, TransactionRecord, TransactionType};
use futures::TryStreamExt;
use serde::Serialize;
use tracing::{debug, instrument};

use crate::gate::AuthorizationGate;

/// Row indices are signed 64-bit in SQL stores.
const MAX_ROWS: u64 = i64::MAX as u64;

/// Filters and pagination for a journal listing.
#[derive(Debug, Clone, Default)]
pub struct HistoryQuery {
    /// Required by [`History::history`]; optional for [`History::all_transactions`].
    pub account: Option<AccountNumber>,
    pub range: DateRange,
    pub kind: Option<TransactionType>,
    /// Page size. Zero returns every matching record.
    pub count: u64,
    /// Zero-based page index.
    pub page: u64,
    /// Also list transfers into the account.
    pub include_incoming: bool,
}

impl HistoryQuery {
    /// Reject pages that start or end beyond the largest row index a store
    /// can address.
    pub fn validate(&self) -> Result<()> {
        page_offset(self.count, self.page).map(|_| ())
    }

    fn filter(&self, account: Option<AccountNumber>) -> Result<TransactionFilter> {
        Ok(TransactionFilter {
            account,
            include_incoming: self.include_incoming,
            range: self.range,
            kind: self.kind,
            offset: page_offset(self.count, self.page)?,
            limit: (self.count > 0).then_some(self.count),
        })
    }
}

/// First row of a zero-based page of `count` rows. A zero count is one
/// page holding everything.
fn page_offset(count: u64, page: u64) -> Result<u64> {
    if count == 0 {
        return Ok(0);
    }
    count
        .checked_mul(page)
        .filter(|offset| offset.checked_add(count).map_or(false, |end| end <= MAX_ROWS))
        .ok_or_else(|| BankError::InvalidRequest {
            message: format!("count and page must select rows below {}", MAX_ROWS),
            field: Some("page".to_string()),
        })
}

/// One page of a listing.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Page<T> {
    pub data: Vec<T>,
    /// One-based index of the first item, or 0 for an empty page.
    pub page_start: u64,
    /// One-based index of the last item, capped at the total.
    pub page_end: u64,
    pub total_count: u64,
}

impl<T> Page<T> {
    /// Cut one page out of a listing already held in memory.
    pub fn slice(items: Vec<T>, count: u64, page: u64) -> Result<Self> {
        let offset = page_offset(count, page)?;
        let total_count = items.len() as u64;
        let skip = usize::try_from(offset).unwrap_or(usize::MAX);
        let take = match count {
            0 => usize::MAX,
            n => usize::try_from(n).unwrap_or(usize::MAX),
        };
        let data = items.into_iter().skip(skip).take(take).collect();
        Ok(Self::new(data, offset, count, total_count))
    }

    fn new(data: Vec<T>, offset: u64, count: u64, total_count: u64) -> Self {
        let page_start = if data.is_empty() { 0 } else { offset + 1 };
        let page_end = if count > 0 {
            offset.saturating_add(count).min(total_count)
        } else {
            total_count
        };
        Self {
            data,
            page_start,
            page_end,
            total_count,
        }
    }
}

/// Transaction history, newest first.
pub struct History {
    store: Arc<dyn LedgerStore>,
    gate: AuthorizationGate,
}

impl History {
    pub fn new(store: Arc<dyn LedgerStore>, gate: AuthorizationGate) -> Self {
        Self { store, gate }
    }

    /// History of one account. Accounts the caller neither owns nor may
    /// audit are reported as not found.
    #[instrument(skip(self, principal, query), fields(principal_id = %principal.id))]
    pub async fn history(
        &self,
        principal: &Principal,
        query: &HistoryQuery,
    ) -> Result<Page<TransactionRecord>> {
        let number = query.account.clone().ok_or_else(|| BankError::InvalidRequest {
            message: "account is required".to_string(),
            field: Some("account".to_string()),
        })?;

        let account = self.store.get_account(&number).await?;
        if !account.is_owned_by(&principal.id)
            && !self.gate.has_permission(principal, VIEW_ALL_TRANSACTIONS)
        {
            debug!(account = %number.masked(), "History requested for a foreign account");
            return Err(BankError::AccountNotFound(number));
        }

        self.page(query, Some(number)).await
    }

    /// Every account's records. Requires `view_all_transactions`.
    #[instrument(skip(self, principal, query), fields(principal_id = %principal.id))]
    pub async fn all_transactions(
        &self,
        principal: &Principal,
        query: &HistoryQuery,
    ) -> Result<Page<TransactionRecord>> {
        self.gate.require_permission(principal, VIEW_ALL_TRANSACTIONS)?;
        self.page(query, query.account.clone()).await
    }

    async fn page(
        &self,
        query: &HistoryQuery,
        account: Option<AccountNumber>,
    ) -> Result<Page<TransactionRecord>> {
        let filter = query.filter(account)?;
        let total_count = self.store.count_transactions(&filter).await?;
        let data: Vec<TransactionRecord> = self
            .store
            .query_transactions(filter.clone())
            .try_collect()
            .await?;
        Ok(Page::new(data, filter.offset, query.count, total_count))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankcore_common::{Currency, PermissionResolver, PrincipalId};
    use bankcore_ledger::{with_atomic_unit, Account, AccountType, InMemoryLedgerStore, NewTransaction, RetryPolicy};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;

    struct Auditors(PrincipalId);

    impl PermissionResolver for Auditors {
        fn has_permission(&self, principal: &PrincipalId, code: &str) -> bool {
            *principal == self.0 && code == VIEW_ALL_TRANSACTIONS
        }
    }

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        history: History,
        alice: Principal,
        auditor: Principal,
        a: AccountNumber,
        b: AccountNumber,
    }

    async fn fixture() -> Fixture {
        let store = Arc::new(InMemoryLedgerStore::default());
        let alice = Principal::new(PrincipalId::new(), "alice");
        let auditor = Principal::new(PrincipalId::new(), "audit");
        let history = History::new(
            store.clone(),
            AuthorizationGate::new(Arc::new(Auditors(auditor.id))),
        );

        let a = AccountNumber::from_digits("100000000001");
        let b = AccountNumber::from_digits("100000000002");
        store.insert_account(Account::open(a.clone(), alice.id, AccountType::Savings, Currency::INR));
        store.insert_account(Account::open(b.clone(), PrincipalId::new(), AccountType::Savings, Currency::INR));

        for amount in [dec!(10.00), dec!(20.00), dec!(30.00)] {
            deposit(&store, &a, amount).await;
        }
        deposit(&store, &b, dec!(50.00)).await;
        transfer(&store, &b, &a, dec!(5.00)).await;

        Fixture {
            store,
            history,
            alice,
            auditor,
            a,
            b,
        }
    }

    async fn deposit(store: &InMemoryLedgerStore, number: &AccountNumber, amount: Decimal) {
        with_atomic_unit(store, std::slice::from_ref(number), &RetryPolicy::default(), |unit| {
            unit.credit(number, amount)?;
            unit.append_transaction(NewTransaction::deposit(number.clone(), amount, Currency::INR));
            Ok::<_, bankcore_ledger::LedgerError>(())
        })
        .await
        .unwrap();
    }

    async fn transfer(store: &InMemoryLedgerStore, from: &AccountNumber, to: &AccountNumber, amount: Decimal) {
        let accounts = [from.clone(), to.clone()];
        with_atomic_unit(store, &accounts, &RetryPolicy::default(), |unit| {
            unit.debit(from, amount)?;
            unit.credit(to, amount)?;
            unit.append_transaction(NewTransaction::transfer(
                from.clone(),
                to.clone(),
                amount,
                Currency::INR,
                amount,
            ));
            Ok::<_, bankcore_ledger::LedgerError>(())
        })
        .await
        .unwrap();
    }

    fn query(account: &AccountNumber) -> HistoryQuery {
        HistoryQuery {
            account: Some(account.clone()),
            ..Default::default()
        }
    }

    #[tokio::test]
    async fn test_history_newest_first() {
        let fx = fixture().await;

        let page = fx.history.history(&fx.alice, &query(&fx.a)).await.unwrap();

        let amounts: Vec<Decimal> = page.data.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![dec!(30.00), dec!(20.00), dec!(10.00)]);
        assert_eq!((page.page_start, page.page_end, page.total_count), (1, 3, 3));
    }

    #[tokio::test]
    async fn test_history_is_idempotent() {
        let fx = fixture().await;
        let q = query(&fx.a);

        let first = fx.history.history(&fx.alice, &q).await.unwrap();
        let second = fx.history.history(&fx.alice, &q).await.unwrap();

        assert_eq!(first, second);
        assert_eq!(fx.store.journal_len(), 5);
    }

    #[tokio::test]
    async fn test_history_pagination() {
        let fx = fixture().await;
        let q = HistoryQuery {
            count: 2,
            page: 1,
            ..query(&fx.a)
        };

        let page = fx.history.history(&fx.alice, &q).await.unwrap();

        assert_eq!(page.data.len(), 1);
        assert_eq!(page.data[0].amount, dec!(10.00));
        assert_eq!((page.page_start, page.page_end, page.total_count), (3, 3, 3));

        let past_end = HistoryQuery { page: 5, ..q };
        let empty = fx.history.history(&fx.alice, &past_end).await.unwrap();
        assert!(empty.data.is_empty());
        assert_eq!((empty.page_start, empty.page_end), (0, 3));
    }

    #[tokio::test]
    async fn test_pagination_beyond_addressable_rows() {
        let fx = fixture().await;

        for (count, page) in [(u64::MAX, 0), (1u64 << 40, 1u64 << 40), (MAX_ROWS, 1)] {
            let q = HistoryQuery {
                count,
                page,
                ..query(&fx.a)
            };
            let err = fx.history.history(&fx.alice, &q).await.unwrap_err();
            assert!(matches!(err, BankError::InvalidRequest { .. }));
            assert_eq!(err.status_code(), 400);
        }

        let widest = HistoryQuery {
            count: MAX_ROWS,
            page: 0,
            ..query(&fx.a)
        };
        assert_eq!(fx.history.history(&fx.alice, &widest).await.unwrap().data.len(), 3);
    }

    #[tokio::test]
    async fn test_history_filters() {
        let fx = fixture().await;

        let transfers = HistoryQuery {
            kind: Some(TransactionType::Transfer),
            include_incoming: true,
            ..query(&fx.a)
        };
        let page = fx.history.history(&fx.alice, &transfers).await.unwrap();
        assert_eq!(page.total_count, 1);
        assert_eq!(page.data[0].account, fx.b);

        let tomorrow = bankcore_common::now() + chrono::Duration::days(1);
        let future = HistoryQuery {
            range: DateRange::new(Some(tomorrow), None).unwrap(),
            ..query(&fx.a)
        };
        assert_eq!(fx.history.history(&fx.alice, &future).await.unwrap().total_count, 0);
    }

    #[tokio::test]
    async fn test_foreign_account_is_not_found() {
        let fx = fixture().await;

        assert!(matches!(
            fx.history.history(&fx.alice, &query(&fx.b)).await,
            Err(BankError::AccountNotFound(_))
        ));
        assert_eq!(
            fx.history.history(&fx.auditor, &query(&fx.b)).await.unwrap().total_count,
            2
        );
    }

    #[tokio::test]
    async fn test_all_transactions_requires_permission() {
        let fx = fixture().await;

        assert!(matches!(
            fx.history.all_transactions(&fx.alice, &HistoryQuery::default()).await,
            Err(BankError::Forbidden(_))
        ));
        let page = fx
            .history
            .all_transactions(&fx.auditor, &HistoryQuery::default())
            .await
            .unwrap();
        assert_eq!(page.total_count, 5);
    }

    #[test]
    fn test_page_slice() {
        let names = || vec!["ann", "bob", "cat", "dan", "eve"];

        let page = Page::slice(names(), 2, 1).unwrap();
        assert_eq!(page.data, vec!["cat", "dan"]);
        assert_eq!((page.page_start, page.page_end, page.total_count), (3, 4, 5));

        let last = Page::slice(names(), 2, 2).unwrap();
        assert_eq!((last.data.len(), last.page_end), (1, 5));

        let everything = Page::slice(names(), 0, 7).unwrap();
        assert_eq!(everything.data.len(), 5);

        let past = Page::slice(names(), 10, 3).unwrap();
        assert!(past.data.is_empty());
        assert_eq!(past.page_start, 0);

        assert!(Page::slice(names(), u64::MAX, 1).is_err());
    }
}
