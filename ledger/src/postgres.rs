//! PostgreSQL ledger store.

use std::collections::BTreeSet;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::StreamExt;
use rust_decimal::Decimal;
use sqlx::postgres::{PgPool, PgPoolOptions};
use sqlx::{Postgres, Transaction};
use tracing::{debug, info, instrument};
use uuid::Uuid;

use bankcore_common::{AccountNumber, Currency, PrincipalId, TransactionId};

use crate::account::{Account, AccountType};
use crate::account_number::AccountNumberGenerator;
use crate::error::{LedgerError, LedgerResult};
use crate::journal::{NewTransaction, TransactionFilter, TransactionRecord, TransactionType};
use crate::store::{LedgerStore, StagedChanges, TransactionStream, UnitOfWork};

const ACCOUNT_COLUMNS: &str =
    "account_number, owner_id, balance, account_type, currency, created_at, updated_at";

const SELECT_TRANSACTIONS: &str = "\
    SELECT id, account_number, transaction_type, amount, currency, \
           reference_account, credited_amount, created_at \
    FROM transactions \
    WHERE ($1::text IS NULL OR account_number = $1 \
           OR ($2::boolean AND reference_account = $1)) \
      AND ($3::timestamptz IS NULL OR created_at >= $3) \
      AND ($4::timestamptz IS NULL OR created_at <= $4) \
      AND ($5::text IS NULL OR transaction_type = $5) \
    ORDER BY created_at DESC, id DESC \
    OFFSET $6 LIMIT $7";

const COUNT_TRANSACTIONS: &str = "\
    SELECT COUNT(*) FROM transactions \
    WHERE ($1::text IS NULL OR account_number = $1 \
           OR ($2::boolean AND reference_account = $1)) \
      AND ($3::timestamptz IS NULL OR created_at >= $3) \
      AND ($4::timestamptz IS NULL OR created_at <= $4) \
      AND ($5::text IS NULL OR transaction_type = $5)";

const INSERT_TRANSACTION: &str = "\
    INSERT INTO transactions \
        (account_number, transaction_type, amount, currency, reference_account, credited_amount) \
    VALUES ($1, $2, $3, $4, $5, $6) \
    RETURNING id, account_number, transaction_type, amount, currency, \
              reference_account, credited_amount, created_at";

/// PostgreSQL connection settings for the ledger.
#[derive(Debug, Clone)]
pub struct PgLedgerConfig {
    pub url: String,
    pub max_connections: u32,
    /// Upper bound on waiting for a row lock before reporting a conflict.
    pub lock_timeout: Duration,
}

/// Ledger store backed by PostgreSQL.
///
/// Each unit of work is a SERIALIZABLE transaction that locks its accounts
/// `FOR UPDATE` in account-number order. Serialization failures, deadlocks
/// and lock timeouts are reported as [`LedgerError::Conflict`].
#[derive(Clone)]
pub struct PgLedgerStore {
    pool: PgPool,
    lock_timeout: Duration,
    numbers: AccountNumberGenerator,
}

impl PgLedgerStore {
    /// Connect and bring the schema up to date.
    pub async fn connect(config: &PgLedgerConfig, numbers: AccountNumberGenerator) -> LedgerResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .connect(&config.url)
            .await
            .map_err(map_sqlx)?;

        let store = Self::from_pool(pool, config.lock_timeout, numbers);
        store.migrate().await?;
        Ok(store)
    }

    pub fn from_pool(pool: PgPool, lock_timeout: Duration, numbers: AccountNumberGenerator) -> Self {
        Self {
            pool,
            lock_timeout,
            numbers,
        }
    }

    /// Apply pending schema migrations.
    pub async fn migrate(&self) -> LedgerResult<()> {
        sqlx::migrate!("./migrations")
            .run(&self.pool)
            .await
            .map_err(|e| LedgerError::Database(e.to_string()))?;
        info!("Ledger schema up to date");
        Ok(())
    }
}

#[async_trait]
impl LedgerStore for PgLedgerStore {
    async fn get_account(&self, number: &AccountNumber) -> LedgerResult<Account> {
        let sql = format!("SELECT {} FROM accounts WHERE account_number = $1", ACCOUNT_COLUMNS);
        let row = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(number.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(map_sqlx)?;

        row.ok_or_else(|| LedgerError::AccountNotFound(number.clone()))?
            .try_into()
    }

    #[instrument(skip(self), fields(owner = %owner))]
    async fn create_account(
        &self,
        owner: PrincipalId,
        account_type: AccountType,
        currency: Currency,
    ) -> LedgerResult<Account> {
        let sql = format!(
            "INSERT INTO accounts (account_number, owner_id, balance, account_type, currency) \
             VALUES ($1, $2, 0, $3, $4) \
             ON CONFLICT (account_number) DO NOTHING \
             RETURNING {}",
            ACCOUNT_COLUMNS
        );

        for candidate in self.numbers.candidates() {
            let row = sqlx::query_as::<_, AccountRow>(&sql)
                .bind(candidate.as_str())
                .bind(*owner.as_uuid())
                .bind(account_type.as_str())
                .bind(currency.code())
                .fetch_optional(&self.pool)
                .await
                .map_err(map_sqlx)?;

            if let Some(row) = row {
                let account = Account::try_from(row)?;
                info!(account = %account.account_number.masked(), "Account opened");
                return Ok(account);
            }
            debug!("Account number taken, drawing another");
        }

        Err(LedgerError::AccountNumbersExhausted)
    }

    async fn accounts_owned_by(&self, owner: &PrincipalId) -> LedgerResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts WHERE owner_id = $1 ORDER BY created_at, account_number",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .bind(*owner.as_uuid())
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    async fn list_accounts(&self) -> LedgerResult<Vec<Account>> {
        let sql = format!(
            "SELECT {} FROM accounts ORDER BY created_at, account_number",
            ACCOUNT_COLUMNS
        );
        sqlx::query_as::<_, AccountRow>(&sql)
            .fetch_all(&self.pool)
            .await
            .map_err(map_sqlx)?
            .into_iter()
            .map(Account::try_from)
            .collect()
    }

    #[instrument(skip(self, accounts), fields(accounts = accounts.len()))]
    async fn begin(&self, accounts: &[AccountNumber]) -> LedgerResult<Box<dyn UnitOfWork>> {
        let wanted: BTreeSet<&AccountNumber> = accounts.iter().collect();
        let numbers: Vec<String> = wanted.iter().map(|n| n.as_str().to_string()).collect();

        let mut tx = self.pool.begin().await.map_err(map_sqlx)?;
        sqlx::query("SET TRANSACTION ISOLATION LEVEL SERIALIZABLE")
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        let lock_timeout = format!("SET LOCAL lock_timeout = '{}ms'", self.lock_timeout.as_millis());
        sqlx::query(&lock_timeout)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let sql = format!(
            "SELECT {} FROM accounts WHERE account_number = ANY($1) \
             ORDER BY account_number FOR UPDATE",
            ACCOUNT_COLUMNS
        );
        let rows = sqlx::query_as::<_, AccountRow>(&sql)
            .bind(numbers)
            .fetch_all(&mut *tx)
            .await
            .map_err(map_sqlx)?;

        let locked = rows
            .into_iter()
            .map(Account::try_from)
            .collect::<LedgerResult<Vec<Account>>>()?;

        if let Some(missing) = wanted
            .into_iter()
            .find(|n| !locked.iter().any(|a| a.account_number == **n))
        {
            return Err(LedgerError::AccountNotFound(missing.clone()));
        }

        Ok(Box::new(PgUnit {
            tx,
            staged: StagedChanges::new(locked),
        }))
    }

    fn query_transactions(&self, filter: TransactionFilter) -> TransactionStream<'_> {
        sqlx::query_as::<_, TransactionRow>(SELECT_TRANSACTIONS)
            .bind(filter.account.map(AccountNumber::into_string))
            .bind(filter.include_incoming)
            .bind(filter.range.start)
            .bind(filter.range.end)
            .bind(filter.kind.map(|k| k.as_str()))
            .bind(sql_bigint(filter.offset))
            .bind(filter.limit.map(sql_bigint))
            .fetch(&self.pool)
            .map(|row| row.map_err(map_sqlx).and_then(TransactionRecord::try_from))
            .boxed()
    }

    async fn count_transactions(&self, filter: &TransactionFilter) -> LedgerResult<u64> {
        let count: i64 = sqlx::query_scalar(COUNT_TRANSACTIONS)
            .bind(filter.account.as_ref().map(|a| a.as_str()))
            .bind(filter.include_incoming)
            .bind(filter.range.start)
            .bind(filter.range.end)
            .bind(filter.kind.map(|k| k.as_str()))
            .fetch_one(&self.pool)
            .await
            .map_err(map_sqlx)?;
        Ok(count.max(0) as u64)
    }
}

struct PgUnit {
    tx: Transaction<'static, Postgres>,
    staged: StagedChanges,
}

#[async_trait]
impl UnitOfWork for PgUnit {
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
        let PgUnit { mut tx, staged } = *self;
        staged.validate()?;

        for account in staged.dirty_accounts() {
            sqlx::query(
                "UPDATE accounts SET balance = $2, updated_at = now() WHERE account_number = $1",
            )
            .bind(account.account_number.as_str())
            .bind(account.balance)
            .execute(&mut *tx)
            .await
            .map_err(map_sqlx)?;
        }

        let mut committed = Vec::new();
        for record in staged.into_records() {
            let row = sqlx::query_as::<_, TransactionRow>(INSERT_TRANSACTION)
                .bind(record.account.as_str())
                .bind(record.kind.as_str())
                .bind(record.amount)
                .bind(record.currency.code())
                .bind(record.reference_account.as_ref().map(|a| a.as_str()))
                .bind(record.credited_amount)
                .fetch_one(&mut *tx)
                .await
                .map_err(map_sqlx)?;
            committed.push(TransactionRecord::try_from(row)?);
        }

        tx.commit().await.map_err(map_sqlx)?;
        debug!(records = committed.len(), "Postgres unit committed");
        Ok(committed)
    }
}

#[derive(sqlx::FromRow)]
struct AccountRow {
    account_number: String,
    owner_id: Uuid,
    balance: Decimal,
    account_type: String,
    currency: String,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
}

impl TryFrom<AccountRow> for Account {
    type Error = LedgerError;

    fn try_from(row: AccountRow) -> LedgerResult<Self> {
        Ok(Account {
            account_number: AccountNumber::from_digits(row.account_number),
            owner_id: PrincipalId::from_uuid(row.owner_id),
            balance: row.balance,
            account_type: row
                .account_type
                .parse::<AccountType>()
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            currency: row
                .currency
                .parse::<Currency>()
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            created_at: row.created_at,
            updated_at: row.updated_at,
        })
    }
}

#[derive(sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    account_number: String,
    transaction_type: String,
    amount: Decimal,
    currency: String,
    reference_account: Option<String>,
    credited_amount: Option<Decimal>,
    created_at: DateTime<Utc>,
}

impl TryFrom<TransactionRow> for TransactionRecord {
    type Error = LedgerError;

    fn try_from(row: TransactionRow) -> LedgerResult<Self> {
        Ok(TransactionRecord {
            id: TransactionId::new(row.id),
            account: AccountNumber::from_digits(row.account_number),
            kind: row
                .transaction_type
                .parse::<TransactionType>()
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            amount: row.amount,
            currency: row
                .currency
                .parse::<Currency>()
                .map_err(|e| LedgerError::Corrupt(e.to_string()))?,
            reference_account: row.reference_account.map(AccountNumber::from_digits),
            credited_amount: row.credited_amount,
            timestamp: row.created_at,
        })
    }
}

/// SQLSTATE codes that mean "try the unit again".
const CONFLICT_STATES: [&str; 3] = [
    "40001", // serialization_failure
    "40P01", // deadlock_detected
    "55P03", // lock_not_available
];

/// OFFSET and LIMIT are BIGINT. Values past its range select nothing more
/// than `i64::MAX` would.
fn sql_bigint(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(i64::MAX)
}

fn map_sqlx(err: sqlx::Error) -> LedgerError {
    match &err {
        sqlx::Error::Database(db) => match db.code() {
            Some(code) if CONFLICT_STATES.iter().any(|state| code == *state) => {
                LedgerError::Conflict(db.message().to_string())
            }
            _ => LedgerError::Database(err.to_string()),
        },
        sqlx::Error::PoolTimedOut | sqlx::Error::PoolClosed | sqlx::Error::Io(_) => {
            LedgerError::Unavailable(err.to_string())
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            LedgerError::Corrupt(err.to_string())
        }
        _ => LedgerError::Database(err.to_string()),
    }
}
