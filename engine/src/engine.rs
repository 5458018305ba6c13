//! The transaction engine: the only code that changes account balances.

use std::sync::Arc;

use bankcore_common::{validate_amount, AccountNumber, BankError, Principal, Result};
use bankcore_fx::CurrencyConverter;
use bankcore_ledger::{
    with_atomic_unit, Committed, LedgerStore, NewTransaction, RetryPolicy, TransactionRecord,
};
use rust_decimal::Decimal;
use tracing::{info, instrument, warn};

use crate::gate::AuthorizationGate;
use crate::metrics::{Operation, SharedMetrics};

/// Orchestrates deposits, withdrawals and transfers.
///
/// Every operation checks the acting principal, the amount, the account(s)
/// and ownership before touching the store, then applies its balance
/// change(s) and exactly one journal record inside a single atomic unit.
pub struct TransactionEngine {
    store: Arc<dyn LedgerStore>,
    converter: Arc<CurrencyConverter>,
    gate: AuthorizationGate,
    metrics: SharedMetrics,
    retry: RetryPolicy,
}

impl TransactionEngine {
    pub fn new(
        store: Arc<dyn LedgerStore>,
        converter: Arc<CurrencyConverter>,
        gate: AuthorizationGate,
        metrics: SharedMetrics,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            store,
            converter,
            gate,
            metrics,
            retry,
        }
    }

    /// Credit an owned account.
    #[instrument(skip(self, principal, account), fields(principal_id = %principal.id, account = %account.masked()))]
    pub async fn deposit(
        &self,
        principal: &Principal,
        account: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        let result = self.apply_deposit(principal, account, amount).await;
        self.metrics.observe(Operation::Deposit, &result);
        result
    }

    /// Debit an owned account.
    #[instrument(skip(self, principal, account), fields(principal_id = %principal.id, account = %account.masked()))]
    pub async fn withdraw(
        &self,
        principal: &Principal,
        account: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        let result = self.apply_withdraw(principal, account, amount).await;
        self.metrics.observe(Operation::Withdraw, &result);
        result
    }

    /// Move funds from an owned account to any other account, converting
    /// into the destination's currency when they differ.
    #[instrument(
        skip(self, principal, from, to),
        fields(principal_id = %principal.id, from = %from.masked(), to = %to.masked())
    )]
    pub async fn transfer(
        &self,
        principal: &Principal,
        from: &AccountNumber,
        to: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        let result = self.apply_transfer(principal, from, to, amount).await;
        self.metrics.observe(Operation::Transfer, &result);
        result
    }

    async fn apply_deposit(
        &self,
        principal: &Principal,
        number: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        self.gate.require_active_principal(principal)?;
        let amount = validate_amount(amount)?;
        let account = self.store.get_account(number).await?;
        self.gate.require_ownership(principal, &account)?;

        let committed = with_atomic_unit(
            self.store.as_ref(),
            std::slice::from_ref(number),
            &self.retry,
            |unit| {
                let currency = unit.account(number)?.currency;
                unit.credit(number, amount)?;
                unit.append_transaction(NewTransaction::deposit(number.clone(), amount, currency));
                Ok::<_, BankError>(())
            },
        )
        .await?;

        let record = self.single_record(committed)?;
        info!(id = %record.id, %amount, "Deposit committed");
        Ok(record)
    }

    async fn apply_withdraw(
        &self,
        principal: &Principal,
        number: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        self.gate.require_active_principal(principal)?;
        let amount = validate_amount(amount)?;
        let account = self.store.get_account(number).await?;
        self.gate.require_ownership(principal, &account)?;
        if !account.has_sufficient_funds(amount) {
            return Err(insufficient(amount, account.balance));
        }

        let committed = with_atomic_unit(
            self.store.as_ref(),
            std::slice::from_ref(number),
            &self.retry,
            |unit| {
                let currency = unit.account(number)?.currency;
                unit.debit(number, amount)?;
                unit.append_transaction(NewTransaction::withdrawal(number.clone(), amount, currency));
                Ok::<_, BankError>(())
            },
        )
        .await?;

        let record = self.single_record(committed)?;
        info!(id = %record.id, %amount, "Withdrawal committed");
        Ok(record)
    }

    async fn apply_transfer(
        &self,
        principal: &Principal,
        from: &AccountNumber,
        to: &AccountNumber,
        amount: Decimal,
    ) -> Result<TransactionRecord> {
        self.gate.require_active_principal(principal)?;
        let amount = validate_amount(amount)?;
        if from == to {
            return Err(BankError::InvalidRequest {
                message: "Cannot transfer to the same account".to_string(),
                field: Some("to_account".to_string()),
            });
        }

        let source = self.store.get_account(from).await?;
        let destination = self.store.get_account(to).await?;
        self.gate.require_ownership(principal, &source)?;
        if !source.has_sufficient_funds(amount) {
            return Err(insufficient(amount, source.balance));
        }

        // Rate lookup happens before any account is locked.
        let cross_currency = source.currency != destination.currency;
        let credited = self
            .converter
            .convert(amount, source.currency, destination.currency)
            .await;
        if cross_currency {
            self.metrics.conversion(credited.is_ok());
        }
        let credited = credited.map_err(|e| {
            warn!(error = %e, "Transfer aborted, conversion unavailable");
            BankError::from(e)
        })?;

        let accounts = [from.clone(), to.clone()];
        let committed = with_atomic_unit(self.store.as_ref(), &accounts, &self.retry, |unit| {
            let currency = unit.account(from)?.currency;
            unit.debit(from, amount)?;
            unit.credit(to, credited)?;
            unit.append_transaction(NewTransaction::transfer(
                from.clone(),
                to.clone(),
                amount,
                currency,
                credited,
            ));
            Ok::<_, BankError>(())
        })
        .await?;

        let record = self.single_record(committed)?;
        info!(id = %record.id, %amount, %credited, "Transfer committed");
        Ok(record)
    }

    fn single_record(&self, committed: Committed<()>) -> Result<TransactionRecord> {
        self.metrics.store_retries(committed.attempts.saturating_sub(1));
        committed
            .records
            .into_iter()
            .next()
            .ok_or_else(|| BankError::Internal("unit committed without a journal record".to_string()))
    }
}

fn insufficient(required: Decimal, available: Decimal) -> BankError {
    BankError::InsufficientBalance {
        required: required.to_string(),
        available: available.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::metrics::Metrics;
    use bankcore_common::{Currency, PermissionResolver, PrincipalId, MAX_MONEY};
    use bankcore_fx::{ConverterConfig, MockRateSource};
    use bankcore_ledger::{Account, AccountType, InMemoryLedgerStore, TransactionType};
    use proptest::prelude::*;
    use rust_decimal_macros::dec;
    use std::time::Duration;

    struct NoGrants;

    impl PermissionResolver for NoGrants {
        fn has_permission(&self, _principal: &PrincipalId, _code: &str) -> bool {
            false
        }
    }

    struct Fixture {
        store: Arc<InMemoryLedgerStore>,
        rates: Arc<MockRateSource>,
        metrics: SharedMetrics,
        engine: Arc<TransactionEngine>,
        alice: Principal,
    }

    impl Fixture {
        fn new() -> Self {
            let store = Arc::new(InMemoryLedgerStore::default());
            let rates = Arc::new(MockRateSource::new());
            let metrics = Arc::new(Metrics::new());
            let converter = Arc::new(CurrencyConverter::new(
                rates.clone(),
                ConverterConfig {
                    timeout: Duration::from_millis(50),
                    ..Default::default()
                },
            ));
            let engine = Arc::new(TransactionEngine::new(
                store.clone(),
                converter,
                AuthorizationGate::new(Arc::new(NoGrants)),
                metrics.clone(),
                RetryPolicy::default(),
            ));
            Self {
                store,
                rates,
                metrics,
                engine,
                alice: Principal::new(PrincipalId::new(), "alice"),
            }
        }

        fn account(&self, owner: &Principal, number: &str, balance: Decimal, currency: Currency) -> AccountNumber {
            let number = AccountNumber::from_digits(number);
            let mut account = Account::open(number.clone(), owner.id, AccountType::Savings, currency);
            account.balance = balance;
            self.store.insert_account(account);
            number
        }

        async fn balance(&self, number: &AccountNumber) -> Decimal {
            self.store.get_account(number).await.unwrap().balance
        }
    }

    #[tokio::test]
    async fn test_deposit() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(1000.00), Currency::INR);

        let record = fx.engine.deposit(&fx.alice, &a, dec!(200)).await.unwrap();

        assert_eq!(fx.balance(&a).await, dec!(1200.00));
        assert_eq!(record.kind, TransactionType::Deposit);
        assert_eq!(record.amount, dec!(200.00));
        assert_eq!(record.account, a);
        assert_eq!(fx.store.journal_len(), 1);
    }

    #[tokio::test]
    async fn test_withdraw_more_than_balance() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(1000.00), Currency::INR);

        let err = fx.engine.withdraw(&fx.alice, &a, dec!(1500)).await.unwrap_err();

        assert!(matches!(err, BankError::InsufficientBalance { .. }));
        assert_eq!(fx.balance(&a).await, dec!(1000.00));
        assert_eq!(fx.store.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_withdraw() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(100.00), Currency::USD);

        let record = fx.engine.withdraw(&fx.alice, &a, dec!(60.00)).await.unwrap();

        assert_eq!(record.kind, TransactionType::Withdraw);
        assert_eq!(record.currency, Currency::USD);
        assert_eq!(fx.balance(&a).await, dec!(40.00));
    }

    #[tokio::test]
    async fn test_same_currency_transfer() {
        let fx = Fixture::new();
        let bob = Principal::new(PrincipalId::new(), "bob");
        let a = fx.account(&fx.alice, "100000000001", dec!(1000.00), Currency::INR);
        let b = fx.account(&bob, "100000000002", dec!(500.00), Currency::INR);

        let record = fx.engine.transfer(&fx.alice, &a, &b, dec!(400)).await.unwrap();

        assert_eq!(fx.balance(&a).await, dec!(600.00));
        assert_eq!(fx.balance(&b).await, dec!(900.00));
        assert_eq!(record.kind, TransactionType::Transfer);
        assert_eq!(record.account, a);
        assert_eq!(record.reference_account, Some(b));
        assert_eq!(record.credited_amount, Some(dec!(400.00)));
        assert_eq!(fx.store.journal_len(), 1);
        assert_eq!(fx.rates.calls(), 0);
    }

    #[tokio::test]
    async fn test_cross_currency_transfer_applies_spread() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(1000.00), Currency::USD);
        let b = fx.account(&fx.alice, "100000000002", dec!(0.00), Currency::INR);
        fx.rates.set_rate(Currency::USD, Currency::INR, dec!(83.00));

        let record = fx.engine.transfer(&fx.alice, &a, &b, dec!(10.00)).await.unwrap();

        // 10 * 83 * 1.01
        assert_eq!(fx.balance(&b).await, dec!(838.30));
        assert_eq!(fx.balance(&a).await, dec!(990.00));
        assert_eq!(record.credited_amount, Some(dec!(838.30)));
        assert_eq!(record.currency, Currency::USD);
        assert_eq!(fx.metrics.snapshot().conversions, 1);
    }

    #[tokio::test]
    async fn test_conversion_failure_changes_nothing() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(1000.00), Currency::USD);
        let b = fx.account(&fx.alice, "100000000002", dec!(0.00), Currency::EUR);
        fx.rates.set_failing(true);

        let err = fx.engine.transfer(&fx.alice, &a, &b, dec!(10.00)).await.unwrap_err();

        assert!(matches!(err, BankError::ConversionUnavailable(_)));
        assert_eq!(err.status_code(), 502);
        assert_eq!(fx.balance(&a).await, dec!(1000.00));
        assert_eq!(fx.balance(&b).await, dec!(0.00));
        assert_eq!(fx.store.journal_len(), 0);
        assert_eq!(fx.metrics.snapshot().conversions_failed, 1);
    }

    #[tokio::test]
    async fn test_deposit_past_balance_limit_is_refused() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(0.00), Currency::INR);

        fx.engine.deposit(&fx.alice, &a, MAX_MONEY).await.unwrap();
        let err = fx.engine.deposit(&fx.alice, &a, Decimal::ONE).await.unwrap_err();
        assert!(matches!(err, BankError::InvalidAmount(_)));
        assert_eq!(err.status_code(), 400);

        let err = fx.engine.deposit(&fx.alice, &a, Decimal::MAX).await.unwrap_err();
        assert!(matches!(err, BankError::InvalidAmount(_)));

        assert_eq!(fx.balance(&a).await, MAX_MONEY);
        assert_eq!(fx.store.journal_len(), 1);
        assert_eq!(fx.metrics.snapshot().operation(Operation::Deposit).success, 1);
    }

    #[tokio::test]
    async fn test_transfer_credit_past_balance_limit_is_refused() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(10.00), Currency::INR);
        let b = fx.account(&fx.alice, "100000000002", MAX_MONEY, Currency::INR);

        let err = fx.engine.transfer(&fx.alice, &a, &b, dec!(1.00)).await.unwrap_err();

        assert!(matches!(err, BankError::InvalidAmount(_)));
        assert_eq!(fx.balance(&a).await, dec!(10.00));
        assert_eq!(fx.balance(&b).await, MAX_MONEY);
        assert_eq!(fx.store.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_oversized_rate_fails_transfer_cleanly() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(100.00), Currency::USD);
        let b = fx.account(&fx.alice, "100000000002", dec!(0.00), Currency::INR);
        fx.rates.set_rate(Currency::USD, Currency::INR, Decimal::MAX);

        let err = fx.engine.transfer(&fx.alice, &a, &b, dec!(1.00)).await.unwrap_err();

        assert!(matches!(err, BankError::ConversionUnavailable(_)));
        assert_eq!(err.status_code(), 502);
        assert_eq!(fx.balance(&a).await, dec!(100.00));
        assert_eq!(fx.balance(&b).await, dec!(0.00));
        assert_eq!(fx.store.journal_len(), 0);
    }

    #[tokio::test]
    async fn test_validation_order() {
        let fx = Fixture::new();
        let mallory = Principal::new(PrincipalId::new(), "mallory");
        let a = fx.account(&fx.alice, "100000000001", dec!(10.00), Currency::INR);
        let missing = AccountNumber::from_digits("999999999999");

        let mut frozen = fx.alice.clone();
        frozen.frozen = true;
        assert!(matches!(
            fx.engine.deposit(&frozen, &missing, dec!(-1)).await,
            Err(BankError::AccountFrozenOrInactive)
        ));
        assert!(matches!(
            fx.engine.deposit(&fx.alice, &missing, dec!(0)).await,
            Err(BankError::InvalidAmount(_))
        ));
        assert!(matches!(
            fx.engine.deposit(&fx.alice, &a, dec!(1.005)).await,
            Err(BankError::InvalidAmount(_))
        ));
        assert!(matches!(
            fx.engine.deposit(&fx.alice, &missing, dec!(5)).await,
            Err(BankError::AccountNotFound(_))
        ));
        assert!(matches!(
            fx.engine.withdraw(&mallory, &a, dec!(5000)).await,
            Err(BankError::Forbidden(_))
        ));
        assert!(matches!(
            fx.engine.transfer(&fx.alice, &a, &a, dec!(1)).await,
            Err(BankError::InvalidRequest { .. })
        ));
        assert_eq!(fx.store.journal_len(), 0);
        assert_eq!(fx.metrics.snapshot().operation(Operation::Deposit).rejected, 4);
    }

    #[tokio::test]
    async fn test_transfer_to_missing_account() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(10.00), Currency::INR);
        let missing = AccountNumber::from_digits("999999999999");

        assert!(matches!(
            fx.engine.transfer(&fx.alice, &a, &missing, dec!(1)).await,
            Err(BankError::AccountNotFound(_))
        ));
        assert_eq!(fx.balance(&a).await, dec!(10.00));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_concurrent_withdrawals_never_overdraw() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(100.00), Currency::INR);

        let first = {
            let (engine, alice, a) = (fx.engine.clone(), fx.alice.clone(), a.clone());
            tokio::spawn(async move { engine.withdraw(&alice, &a, dec!(60)).await })
        };
        let second = {
            let (engine, alice, a) = (fx.engine.clone(), fx.alice.clone(), a.clone());
            tokio::spawn(async move { engine.withdraw(&alice, &a, dec!(60)).await })
        };
        let results = [first.await.unwrap(), second.await.unwrap()];

        assert_eq!(results.iter().filter(|r| r.is_ok()).count(), 1);
        assert!(results
            .iter()
            .any(|r| matches!(r, Err(BankError::InsufficientBalance { .. }))));
        assert_eq!(fx.balance(&a).await, dec!(40.00));
        assert_eq!(fx.store.journal_len(), 1);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 4)]
    async fn test_opposing_transfers_do_not_deadlock() {
        let fx = Fixture::new();
        let a = fx.account(&fx.alice, "100000000001", dec!(500.00), Currency::INR);
        let b = fx.account(&fx.alice, "100000000002", dec!(500.00), Currency::INR);

        let mut handles = Vec::new();
        for i in 0..20 {
            let (engine, alice) = (fx.engine.clone(), fx.alice.clone());
            let (from, to) = if i % 2 == 0 { (a.clone(), b.clone()) } else { (b.clone(), a.clone()) };
            handles.push(tokio::spawn(async move {
                engine.transfer(&alice, &from, &to, dec!(10)).await
            }));
        }
        for handle in handles {
            handle.await.unwrap().unwrap();
        }

        assert_eq!(fx.balance(&a).await + fx.balance(&b).await, dec!(1000.00));
        assert_eq!(fx.store.journal_len(), 20);
    }

    proptest! {
        #![proptest_config(ProptestConfig::with_cases(32))]

        #[test]
        fn prop_balances_stay_non_negative_and_conserved(
            ops in proptest::collection::vec((0u8..3, 1i64..50_000), 1..40)
        ) {
            let runtime = tokio::runtime::Builder::new_current_thread()
                .enable_time()
                .build()
                .unwrap();
            runtime.block_on(async {
                let fx = Fixture::new();
                let a = fx.account(&fx.alice, "100000000001", dec!(100.00), Currency::INR);
                let b = fx.account(&fx.alice, "100000000002", dec!(100.00), Currency::INR);
                let mut expected_total = dec!(200.00);

                for (kind, cents) in ops {
                    let amount = Decimal::new(cents, 2);
                    match kind {
                        0 => {
                            if fx.engine.deposit(&fx.alice, &a, amount).await.is_ok() {
                                expected_total += amount;
                            }
                        }
                        1 => {
                            if fx.engine.withdraw(&fx.alice, &b, amount).await.is_ok() {
                                expected_total -= amount;
                            }
                        }
                        _ => {
                            let _ = fx.engine.transfer(&fx.alice, &a, &b, amount).await;
                        }
                    }
                    let (balance_a, balance_b) = (fx.balance(&a).await, fx.balance(&b).await);
                    assert!(balance_a >= Decimal::ZERO);
                    assert!(balance_b >= Decimal::ZERO);
                    assert_eq!(balance_a + balance_b, expected_total);
                }
            });
        }
    }
}
