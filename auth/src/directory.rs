//! Principal directory: who may log in and what each role may do.

use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};

use bankcore_common::permissions::*;
use bankcore_common::{PermissionResolver, Principal, PrincipalId};
use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{AuthError, AuthResult};
use crate::hash::{digest_eq, sha256_hex};

/// A role and the permission codes it grants.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoleRecord {
    pub name: String,
    pub permissions: Vec<String>,
    #[serde(default = "enabled")]
    pub active: bool,
}

/// A principal as stored in the directory file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PrincipalRecord {
    pub id: PrincipalId,
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    /// Lowercase hex SHA-256 of the password.
    pub password_sha256: String,
    #[serde(default = "enabled")]
    pub active: bool,
    #[serde(default)]
    pub frozen: bool,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// A principal as shown to administrators. Carries no credentials.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct PrincipalSummary {
    pub id: PrincipalId,
    pub username: String,
    pub email: Option<String>,
    pub active: bool,
    pub frozen: bool,
    pub roles: Vec<String>,
}

impl From<&PrincipalRecord> for PrincipalSummary {
    fn from(record: &PrincipalRecord) -> Self {
        Self {
            id: record.id,
            username: record.username.clone(),
            email: record.email.clone(),
            active: record.active,
            frozen: record.frozen,
            roles: record.roles.clone(),
        }
    }
}

/// A principal registered at runtime.
#[derive(Debug, Clone, Deserialize)]
pub struct NewPrincipal {
    pub username: String,
    #[serde(default)]
    pub email: Option<String>,
    pub password: String,
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Partial update of a principal. Absent fields are left unchanged.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct PrincipalUpdate {
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default)]
    pub active: Option<bool>,
    #[serde(default)]
    pub frozen: Option<bool>,
    #[serde(default)]
    pub roles: Option<Vec<String>>,
}

fn enabled() -> bool {
    true
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct DirectoryFile {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    roles: Option<Vec<RoleRecord>>,
    principals: Vec<PrincipalRecord>,
}

/// Roles every deployment starts with.
///
/// Customers act on their own accounts through ownership alone, so their
/// role grants nothing beyond logging in.
pub fn default_roles() -> Vec<RoleRecord> {
    let role = |name: &str, permissions: &[&str]| RoleRecord {
        name: name.to_string(),
        permissions: permissions.iter().map(|p| p.to_string()).collect(),
        active: true,
    };

    vec![
        role(
            "Admin",
            &[
                CREATE_USERS,
                MANAGE_USERS,
                VIEW_USERS,
                VIEW_ALL_TRANSACTIONS,
                VIEW_ALL_ACCOUNTS,
                MANAGE_ROLES,
            ],
        ),
        role(
            "Service Executive",
            &[VIEW_USERS, VIEW_ALL_TRANSACTIONS, VIEW_ALL_ACCOUNTS],
        ),
        role(
            "Auditor",
            &[VIEW_USERS, VIEW_ALL_TRANSACTIONS, VIEW_ALL_ACCOUNTS],
        ),
        role("Customer", &[]),
    ]
}

struct Snapshot {
    file: DirectoryFile,
    roles: Vec<RoleRecord>,
    by_id: HashMap<PrincipalId, PrincipalRecord>,
    by_username: HashMap<String, PrincipalId>,
    permissions: HashMap<PrincipalId, HashSet<String>>,
}

impl Snapshot {
    fn build(file: DirectoryFile) -> AuthResult<Self> {
        let roles = file.roles.clone().unwrap_or_else(default_roles);
        let role_permissions: HashMap<&str, &[String]> = roles
            .iter()
            .filter(|r| r.active)
            .map(|r| (r.name.as_str(), r.permissions.as_slice()))
            .collect();

        let mut by_id = HashMap::new();
        let mut by_username = HashMap::new();
        let mut permissions = HashMap::new();
        for record in &file.principals {
            if by_username.contains_key(&record.username) {
                return Err(AuthError::Directory(format!(
                    "duplicate username {}",
                    record.username
                )));
            }

            let granted: HashSet<String> = record
                .roles
                .iter()
                .filter_map(|name| {
                    let found = role_permissions.get(name.as_str());
                    if found.is_none() {
                        warn!(username = %record.username, role = %name, "Unknown or inactive role");
                    }
                    found
                })
                .flat_map(|perms| perms.iter().cloned())
                .collect();

            by_username.insert(record.username.clone(), record.id);
            permissions.insert(record.id, granted);
            by_id.insert(record.id, record.clone());
        }

        Ok(Self {
            file,
            roles,
            by_id,
            by_username,
            permissions,
        })
    }

    fn record(&self, username: &str) -> Option<&PrincipalRecord> {
        self.by_username
            .get(username)
            .and_then(|id| self.by_id.get(id))
    }

    fn check_roles(&self, names: &[String]) -> AuthResult<()> {
        match names
            .iter()
            .find(|name| !self.roles.iter().any(|r| r.active && &r.name == *name))
        {
            Some(unknown) => Err(AuthError::Rejected {
                message: format!("Unknown role: {}", unknown),
                field: "roles",
            }),
            None => Ok(()),
        }
    }
}

/// In-memory principal directory with explicit reload.
///
/// Runtime changes are written back to the backing file, so a later
/// [`PrincipalDirectory::reload`] keeps them.
pub struct PrincipalDirectory {
    source: Option<PathBuf>,
    snapshot: RwLock<Snapshot>,
}

impl PrincipalDirectory {
    /// Build from a JSON document.
    pub fn from_json(json: &str) -> AuthResult<Self> {
        Ok(Self {
            source: None,
            snapshot: RwLock::new(parse(json)?),
        })
    }

    /// Load from a JSON file; [`PrincipalDirectory::reload`] re-reads it.
    pub fn load(path: impl AsRef<Path>) -> AuthResult<Self> {
        let path = path.as_ref().to_path_buf();
        let snapshot = read_file(&path)?;
        info!(path = %path.display(), principals = snapshot.by_id.len(), "Principal directory loaded");
        Ok(Self {
            source: Some(path),
            snapshot: RwLock::new(snapshot),
        })
    }

    /// Re-read the backing file and swap in the new role and principal
    /// mapping. Directories built from a string keep their contents.
    pub fn reload(&self) -> AuthResult<()> {
        let Some(path) = &self.source else {
            return Ok(());
        };
        let fresh = read_file(path)?;
        info!(principals = fresh.by_id.len(), "Principal directory reloaded");
        *self.snapshot.write() = fresh;
        Ok(())
    }

    /// Check a username and password.
    pub fn authenticate(&self, username: &str, password: &str) -> AuthResult<Principal> {
        let snapshot = self.snapshot.read();
        let record = snapshot.record(username).ok_or(AuthError::InvalidCredentials)?;

        if !digest_eq(&record.password_sha256.to_ascii_lowercase(), &sha256_hex(password.as_bytes())) {
            return Err(AuthError::InvalidCredentials);
        }
        Ok(to_principal(record))
    }

    pub fn principal(&self, id: &PrincipalId) -> Option<Principal> {
        self.snapshot.read().by_id.get(id).map(to_principal)
    }

    pub fn principal_by_username(&self, username: &str) -> Option<Principal> {
        self.snapshot.read().record(username).map(to_principal)
    }

    /// Active principals whose username contains `search`, by username.
    pub fn principals(&self, search: Option<&str>) -> Vec<PrincipalSummary> {
        let needle = search.map(str::to_lowercase);
        let snapshot = self.snapshot.read();
        let mut found: Vec<PrincipalSummary> = snapshot
            .file
            .principals
            .iter()
            .filter(|r| r.active)
            .filter(|r| {
                needle
                    .as_deref()
                    .map_or(true, |n| r.username.to_lowercase().contains(n))
            })
            .map(PrincipalSummary::from)
            .collect();
        found.sort_by(|a, b| a.username.cmp(&b.username));
        found
    }

    pub fn summary(&self, username: &str) -> AuthResult<PrincipalSummary> {
        self.snapshot
            .read()
            .record(username)
            .map(PrincipalSummary::from)
            .ok_or_else(|| AuthError::UnknownPrincipal(username.to_string()))
    }

    /// Roles currently in force, inactive ones included.
    pub fn roles(&self) -> Vec<RoleRecord> {
        self.snapshot.read().roles.clone()
    }

    /// Register a principal.
    pub fn create(&self, new: NewPrincipal) -> AuthResult<PrincipalSummary> {
        let username = new.username.trim().to_string();
        if username.is_empty() {
            return Err(AuthError::Rejected {
                message: "Username is required".to_string(),
                field: "username",
            });
        }
        check_password(&new.password)?;

        self.modify(|snapshot, file| {
            if snapshot.by_username.contains_key(&username) {
                return Err(AuthError::Rejected {
                    message: format!("Username {} is taken", username),
                    field: "username",
                });
            }
            snapshot.check_roles(&new.roles)?;

            let record = PrincipalRecord {
                id: PrincipalId::new(),
                username: username.clone(),
                email: new.email.clone(),
                password_sha256: sha256_hex(new.password.as_bytes()),
                active: true,
                frozen: false,
                roles: new.roles.clone(),
            };
            let summary = PrincipalSummary::from(&record);
            file.principals.push(record);
            info!(principal_id = %summary.id, "Principal registered");
            Ok(summary)
        })
    }

    /// Apply a partial update to an existing principal.
    pub fn update(&self, username: &str, update: PrincipalUpdate) -> AuthResult<PrincipalSummary> {
        if let Some(password) = &update.password {
            check_password(password)?;
        }

        self.modify(|snapshot, file| {
            if let Some(roles) = &update.roles {
                snapshot.check_roles(roles)?;
            }
            let record = file
                .principals
                .iter_mut()
                .find(|r| r.username == username)
                .ok_or_else(|| AuthError::UnknownPrincipal(username.to_string()))?;

            if let Some(email) = &update.email {
                record.email = Some(email.clone());
            }
            if let Some(password) = &update.password {
                record.password_sha256 = sha256_hex(password.as_bytes());
            }
            if let Some(active) = update.active {
                record.active = active;
            }
            if let Some(frozen) = update.frozen {
                record.frozen = frozen;
            }
            if let Some(roles) = &update.roles {
                record.roles = roles.clone();
            }
            info!(
                principal_id = %record.id,
                active = record.active,
                frozen = record.frozen,
                "Principal updated"
            );
            Ok(PrincipalSummary::from(&*record))
        })
    }

    /// Mark a principal inactive. Records are never removed.
    pub fn deactivate(&self, username: &str) -> AuthResult<PrincipalSummary> {
        self.update(
            username,
            PrincipalUpdate {
                active: Some(false),
                ..Default::default()
            },
        )
    }

    pub fn len(&self) -> usize {
        self.snapshot.read().by_id.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Change a copy of the directory, rebuild it, persist it and swap it in.
    /// Nothing changes if any step fails.
    fn modify<T>(
        &self,
        change: impl FnOnce(&Snapshot, &mut DirectoryFile) -> AuthResult<T>,
    ) -> AuthResult<T> {
        let mut snapshot = self.snapshot.write();
        let mut file = snapshot.file.clone();
        let value = change(&*snapshot, &mut file)?;
        let fresh = Snapshot::build(file)?;
        if let Some(path) = &self.source {
            write_file(path, &fresh.file)?;
        }
        *snapshot = fresh;
        Ok(value)
    }
}

impl PermissionResolver for PrincipalDirectory {
    fn has_permission(&self, principal: &PrincipalId, code: &str) -> bool {
        self.snapshot
            .read()
            .permissions
            .get(principal)
            .map_or(false, |granted| granted.contains(code))
    }
}

fn check_password(password: &str) -> AuthResult<()> {
    if password.chars().count() < 8 {
        return Err(AuthError::Rejected {
            message: "Password must be at least 8 characters".to_string(),
            field: "password",
        });
    }
    Ok(())
}

fn to_principal(record: &PrincipalRecord) -> Principal {
    Principal {
        id: record.id,
        username: record.username.clone(),
        active: record.active,
        frozen: record.frozen,
    }
}

fn parse(json: &str) -> AuthResult<Snapshot> {
    let file: DirectoryFile =
        serde_json::from_str(json).map_err(|e| AuthError::Directory(e.to_string()))?;
    Snapshot::build(file)
}

fn read_file(path: &Path) -> AuthResult<Snapshot> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| AuthError::Directory(format!("{}: {}", path.display(), e)))?;
    parse(&json)
}

/// Replace the file in one rename so readers never see a partial document.
fn write_file(path: &Path, file: &DirectoryFile) -> AuthResult<()> {
    let json = serde_json::to_vec_pretty(file).map_err(|e| AuthError::Directory(e.to_string()))?;
    let staging = path.with_extension("json.tmp");
    std::fs::write(&staging, json)
        .and_then(|()| std::fs::rename(&staging, path))
        .map_err(|e| AuthError::Directory(format!("{}: {}", path.display(), e)))
}
