//! Authorization checks run before any engine work.

use std::sync::Arc;

use bankcore_common::{BankError, PermissionResolver, Principal, Result};
use bankcore_ledger::Account;
use tracing::warn;

/// Pure predicate checks over the acting principal.
#[derive(Clone)]
pub struct AuthorizationGate {
    resolver: Arc<dyn PermissionResolver>,
}

impl AuthorizationGate {
    pub fn new(resolver: Arc<dyn PermissionResolver>) -> Self {
        Self { resolver }
    }

    /// The principal must be active and not frozen.
    pub fn require_active_principal(&self, principal: &Principal) -> Result<()> {
        if principal.in_good_standing() {
            Ok(())
        } else {
            warn!(principal_id = %principal.id, "Rejected inactive or frozen principal");
            Err(BankError::AccountFrozenOrInactive)
        }
    }

    /// The principal must own the account.
    pub fn require_ownership(&self, principal: &Principal, account: &Account) -> Result<()> {
        if account.is_owned_by(&principal.id) {
            Ok(())
        } else {
            warn!(
                principal_id = %principal.id,
                account = %account.account_number.masked(),
                "Rejected operation on account owned by another principal"
            );
            Err(BankError::Forbidden(
                "You can only operate on your own accounts.".to_string(),
            ))
        }
    }

    /// The principal must hold the permission code.
    pub fn require_permission(&self, principal: &Principal, code: &str) -> Result<()> {
        if self.has_permission(principal, code) {
            Ok(())
        } else {
            Err(BankError::Forbidden(format!("Missing permission: {}", code)))
        }
    }

    pub fn has_permission(&self, principal: &Principal, code: &str) -> bool {
        self.resolver.has_permission(&principal.id, code)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bankcore_common::{permissions, AccountNumber, Currency, PrincipalId};
    use bankcore_ledger::AccountType;

    struct Grants(Vec<(PrincipalId, &'static str)>);

    impl PermissionResolver for Grants {
        fn has_permission(&self, principal: &PrincipalId, code: &str) -> bool {
            self.0.iter().any(|(p, c)| p == principal && *c == code)
        }
    }

    #[test]
    fn test_frozen_principal_is_rejected() {
        let gate = AuthorizationGate::new(Arc::new(Grants(vec![])));
        let mut principal = Principal::new(PrincipalId::new(), "alice");
        assert!(gate.require_active_principal(&principal).is_ok());

        principal.frozen = true;
        let err = gate.require_active_principal(&principal).unwrap_err();
        assert_eq!(err.status_code(), 403);
        assert_eq!(err.to_string(), "Your account is inactive or frozen.");
    }

    #[test]
    fn test_ownership() {
        let gate = AuthorizationGate::new(Arc::new(Grants(vec![])));
        let owner = Principal::new(PrincipalId::new(), "alice");
        let stranger = Principal::new(PrincipalId::new(), "mallory");
        let account = Account::open(
            AccountNumber::from_digits("100000000001"),
            owner.id,
            AccountType::Savings,
            Currency::INR,
        );

        assert!(gate.require_ownership(&owner, &account).is_ok());
        assert!(matches!(
            gate.require_ownership(&stranger, &account),
            Err(BankError::Forbidden(_))
        ));
    }

    #[test]
    fn test_permission() {
        let auditor = Principal::new(PrincipalId::new(), "audit");
        let gate = AuthorizationGate::new(Arc::new(Grants(vec![(
            auditor.id,
            permissions::VIEW_ALL_TRANSACTIONS,
        )])));

        assert!(gate
            .require_permission(&auditor, permissions::VIEW_ALL_TRANSACTIONS)
            .is_ok());
        assert!(gate
            .require_permission(&auditor, permissions::VIEW_ALL_ACCOUNTS)
            .is_err());
    }
}
