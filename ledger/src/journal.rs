//! Journal records: the append-only explanation of every balance change.

use bankcore_common::{
    AccountNumber, BankError, Currency, DateRange, Timestamp, TransactionId,
};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Kind of balance movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum TransactionType {
    Deposit,
    Withdraw,
    Transfer,
}

impl TransactionType {
    pub fn as_str(&self) -> &'static str {
        match self {
            TransactionType::Deposit => "DEPOSIT",
            TransactionType::Withdraw => "WITHDRAW",
            TransactionType::Transfer => "TRANSFER",
        }
    }
}

impl fmt::Display for TransactionType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

impl FromStr for TransactionType {
    type Err = BankError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_uppercase().as_str() {
            "DEPOSIT" => Ok(TransactionType::Deposit),
            "WITHDRAW" => Ok(TransactionType::Withdraw),
            "TRANSFER" => Ok(TransactionType::Transfer),
            other => Err(BankError::InvalidRequest {
                message: format!("Unknown transaction type: {}", other),
                field: Some("type".to_string()),
            }),
        }
    }
}

/// A committed journal record. Never updated or deleted once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    pub id: TransactionId,
    /// Account whose balance this record explains (the source of a transfer).
    pub account: AccountNumber,
    #[serde(rename = "transaction_type")]
    pub kind: TransactionType,
    /// Positive amount in the source account's currency.
    pub amount: Decimal,
    pub currency: Currency,
    /// Destination of a transfer. Weak reference: may be cleared, never cascades.
    pub reference_account: Option<AccountNumber>,
    /// Amount credited to the destination, in its own currency.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credited_amount: Option<Decimal>,
    pub timestamp: Timestamp,
}

impl TransactionRecord {
    /// Check if this record touches the account on either side.
    pub fn involves(&self, account: &AccountNumber) -> bool {
        self.account == *account || self.reference_account.as_ref() == Some(account)
    }
}

/// A record staged inside a unit of work, before the store assigns its id
/// and timestamp.
#[derive(Debug, Clone, PartialEq)]
pub struct NewTransaction {
    pub account: AccountNumber,
    pub kind: TransactionType,
    pub amount: Decimal,
    pub currency: Currency,
    pub reference_account: Option<AccountNumber>,
    pub credited_amount: Option<Decimal>,
}

impl NewTransaction {
    pub fn deposit(account: AccountNumber, amount: Decimal, currency: Currency) -> Self {
        Self {
            account,
            kind: TransactionType::Deposit,
            amount,
            currency,
            reference_account: None,
            credited_amount: None,
        }
    }

    pub fn withdrawal(account: AccountNumber, amount: Decimal, currency: Currency) -> Self {
        Self {
            account,
            kind: TransactionType::Withdraw,
            amount,
            currency,
            reference_account: None,
            credited_amount: None,
        }
    }

    pub fn transfer(
        from: AccountNumber,
        to: AccountNumber,
        amount: Decimal,
        currency: Currency,
        credited_amount: Decimal,
    ) -> Self {
        Self {
            account: from,
            kind: TransactionType::Transfer,
            amount,
            currency,
            reference_account: Some(to),
            credited_amount: Some(credited_amount),
        }
    }

    /// Materialise into a committed record.
    pub fn into_record(self, id: TransactionId, timestamp: Timestamp) -> TransactionRecord {
        TransactionRecord {
            id,
            account: self.account,
            kind: self.kind,
            amount: self.amount,
            currency: self.currency,
            reference_account: self.reference_account,
            credited_amount: self.credited_amount,
            timestamp,
        }
    }
}

/// Filter for journal queries. Results are ordered newest first.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct TransactionFilter {
    /// Restrict to one account; `None` means every account.
    pub account: Option<AccountNumber>,
    /// Also match transfers whose destination is `account`.
    pub include_incoming: bool,
    /// Inclusive timestamp bounds.
    pub range: DateRange,
    pub kind: Option<TransactionType>,
    /// Records to skip.
    pub offset: u64,
    /// Maximum records to return; `None` means no limit.
    pub limit: Option<u64>,
}

impl TransactionFilter {
    pub fn for_account(account: AccountNumber) -> Self {
        Self {
            account: Some(account),
            ..Default::default()
        }
    }

    /// Check if a record passes every filter except pagination.
    pub fn matches(&self, record: &TransactionRecord) -> bool {
        let account_ok = match &self.account {
            None => true,
            Some(account) if self.include_incoming => record.involves(account),
            Some(account) => record.account == *account,
        };

        account_ok
            && self.range.contains(record.timestamp)
            && self.kind.map_or(true, |k| record.kind == k)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    fn transfer_record() -> TransactionRecord {
        NewTransaction::transfer(
            AccountNumber::from_digits("100000000001"),
            AccountNumber::from_digits("100000000002"),
            dec!(400.00),
            Currency::INR,
            dec!(400.00),
        )
        .into_record(TransactionId::new(1), bankcore_common::now())
    }

    #[test]
    fn test_transaction_type_parse_is_case_insensitive() {
        assert_eq!("deposit".parse::<TransactionType>().unwrap(), TransactionType::Deposit);
        assert_eq!("Transfer".parse::<TransactionType>().unwrap(), TransactionType::Transfer);
        assert!("refund".parse::<TransactionType>().is_err());
    }

    #[test]
    fn test_filter_matches_incoming_only_when_requested() {
        let record = transfer_record();
        let destination = AccountNumber::from_digits("100000000002");

        let mut filter = TransactionFilter::for_account(destination);
        assert!(!filter.matches(&record));

        filter.include_incoming = true;
        assert!(filter.matches(&record));
    }

    #[test]
    fn test_filter_by_type() {
        let record = transfer_record();
        let filter = TransactionFilter {
            kind: Some(TransactionType::Deposit),
            ..Default::default()
        };
        assert!(!filter.matches(&record));
    }

    #[test]
    fn test_record_json_shape() {
        let json = serde_json::to_value(transfer_record()).unwrap();

        assert_eq!(json["transaction_type"], "TRANSFER");
        assert_eq!(json["account"], "100000000001");
        assert_eq!(json["reference_account"], "100000000002");
        assert_eq!(json["amount"], "400.00");
    }
}
