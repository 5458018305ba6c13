//! User administration over the principal directory.

use std::sync::Arc;

use bankcore_auth::{NewPrincipal, PrincipalDirectory, PrincipalSummary, PrincipalUpdate, RoleRecord};
use bankcore_common::permissions::{CREATE_USERS, MANAGE_ROLES, MANAGE_USERS, VIEW_USERS};
use bankcore_common::{Principal, Result};
use bankcore_engine::{AuthorizationGate, Page};
use tracing::{info, instrument};

pub struct UserAdmin {
    directory: Arc<PrincipalDirectory>,
    gate: AuthorizationGate,
}

impl UserAdmin {
    pub fn new(directory: Arc<PrincipalDirectory>, gate: AuthorizationGate) -> Self {
        Self { directory, gate }
    }

    /// Active users, by username. Requires `view_users`.
    pub fn list(
        &self,
        principal: &Principal,
        search: Option<&str>,
        count: u64,
        page: u64,
    ) -> Result<Page<PrincipalSummary>> {
        self.authorize(principal, VIEW_USERS)?;
        Page::slice(self.directory.principals(search), count, page)
    }

    #[instrument(skip(self, principal, new), fields(principal_id = %principal.id))]
    pub fn create(&self, principal: &Principal, new: NewPrincipal) -> Result<PrincipalSummary> {
        self.authorize(principal, CREATE_USERS)?;
        Ok(self.directory.create(new)?)
    }

    pub fn get(&self, principal: &Principal, username: &str) -> Result<PrincipalSummary> {
        self.authorize(principal, VIEW_USERS)?;
        Ok(self.directory.summary(username)?)
    }

    /// Change email, password, roles, or the active and frozen flags.
    /// Takes effect on the target's next request.
    #[instrument(skip(self, principal, update), fields(principal_id = %principal.id))]
    pub fn update(
        &self,
        principal: &Principal,
        username: &str,
        update: PrincipalUpdate,
    ) -> Result<PrincipalSummary> {
        self.authorize(principal, MANAGE_USERS)?;
        Ok(self.directory.update(username, update)?)
    }

    #[instrument(skip(self, principal), fields(principal_id = %principal.id))]
    pub fn deactivate(&self, principal: &Principal, username: &str) -> Result<PrincipalSummary> {
        self.authorize(principal, MANAGE_USERS)?;
        Ok(self.directory.deactivate(username)?)
    }

    pub fn roles(&self, principal: &Principal) -> Result<Vec<RoleRecord>> {
        self.authorize(principal, MANAGE_ROLES)?;
        Ok(self.directory.roles())
    }

    /// Re-read roles and principals from the directory file.
    pub fn reload(&self, principal: &Principal) -> Result<usize> {
        self.authorize(principal, MANAGE_ROLES)?;
        self.directory.reload()?;
        let principals = self.directory.len();
        info!(principal_id = %principal.id, principals, "Directory reload requested");
        Ok(principals)
    }

    fn authorize(&self, principal: &Principal, code: &str) -> Result<()> {
        self.gate.require_active_principal(principal)?;
        self.gate.require_permission(principal, code)
    }
}
