//! Opening and listing accounts.

use std::sync::Arc;

use bankcore_common::permissions::VIEW_ALL_ACCOUNTS;
use bankcore_common::{Currency, Principal, Result};
use bankcore_ledger::{Account, AccountType, LedgerStore};
use tracing::{info, instrument};

use crate::gate::AuthorizationGate;

pub struct AccountService {
    store: Arc<dyn LedgerStore>,
    gate: AuthorizationGate,
}

impl AccountService {
    pub fn new(store: Arc<dyn LedgerStore>, gate: AuthorizationGate) -> Self {
        Self { store, gate }
    }

    /// Open a zero-balance account for the caller.
    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    pub async fn open(
        &self,
        principal: &Principal,
        account_type: AccountType,
        currency: Currency,
    ) -> Result<Account> {
        self.gate.require_active_principal(principal)?;
        let account = self
            .store
            .create_account(principal.id, account_type, currency)
            .await?;
        info!(account = %account.account_number.masked(), "Account opened");
        Ok(account)
    }

    pub async fn list_own(&self, principal: &Principal) -> Result<Vec<Account>> {
        self.gate.require_active_principal(principal)?;
        Ok(self.store.accounts_owned_by(&principal.id).await?)
    }

    pub async fn list_all(&self, principal: &Principal) -> Result<Vec<Account>> {
        self.gate.require_permission(principal, VIEW_ALL_ACCOUNTS)?;
        Ok(self.store.list_accounts().await?)
    }
}
