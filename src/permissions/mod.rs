//! Permissions and roles
//!
//! A permission row grants a user rights over one object class, optionally
//! scoped by product and by action through its options. The `admin`
//! permission grants everything, though it too may be product-scoped.
//! Roles are plain (user, role) pairs; the signoff workflow only accepts a
//! signoff in a role the user actually holds.

mod errors;

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::store::Clock;
use crate::versioned::{Record, VersionedTable};

pub use errors::{PermissionsError, PermissionsResult};

/// Object classes a permission can be granted on.
pub const KNOWN_PERMISSIONS: &[&str] = &[
    "admin",
    "release",
    "release_locale",
    "release_read_only",
    "rule",
    "permission",
    "required_signoff",
    "scheduled_change",
];

/// One granted permission.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Permission {
    /// Who holds the permission
    pub username: String,
    /// Which object class it covers
    pub permission: String,
    /// Optional scoping: `{"products": [...], "actions": [...]}`
    pub options: Option<Value>,
    /// Optimistic-concurrency counter
    pub data_version: u64,
}

impl Record for Permission {
    type Key = (String, String);

    fn key(&self) -> (String, String) {
        (self.username.clone(), self.permission.clone())
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }
}

/// A role held by a user.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserRole {
    pub username: String,
    pub role: String,
    /// Optimistic-concurrency counter
    pub data_version: u64,
}

impl Record for UserRole {
    type Key = (String, String);

    fn key(&self) -> (String, String) {
        (self.username.clone(), self.role.clone())
    }

    fn data_version(&self) -> u64 {
        self.data_version
    }

    fn set_data_version(&mut self, version: u64) {
        self.data_version = version;
    }
}

fn option_list_contains(options: &Option<Value>, list: &str, item: &str) -> bool {
    match options.as_ref().and_then(|o| o.get(list)) {
        // No restriction recorded means everything is allowed
        None => true,
        Some(values) => values
            .as_array()
            .map(|v| v.iter().any(|entry| entry.as_str() == Some(item)))
            .unwrap_or(false),
    }
}

/// The permissions and user-roles tables.
pub struct PermissionsTable {
    permissions: Arc<VersionedTable<Permission>>,
    roles: Arc<VersionedTable<UserRole>>,
}

impl PermissionsTable {
    pub fn new(clock: Arc<dyn Clock>) -> Self {
        Self {
            permissions: Arc::new(VersionedTable::new("permissions", clock.clone())),
            roles: Arc::new(VersionedTable::new("user_roles", clock)),
        }
    }

    pub fn permissions(&self) -> &VersionedTable<Permission> {
        &self.permissions
    }

    pub fn roles(&self) -> &VersionedTable<UserRole> {
        &self.roles
    }

    /// Whether `username` may perform `action` on the `object` class,
    /// optionally narrowed to one product.
    pub fn has_permission(
        &self,
        username: &str,
        object: &str,
        action: &str,
        product: Option<&str>,
    ) -> bool {
        let held = self
            .permissions
            .select_where(|p: &Permission| p.username == username);
        for perm in held {
            let scoped_ok = match product {
                Some(product) => option_list_contains(&perm.options, "products", product),
                None => true,
            };
            if !scoped_ok {
                continue;
            }
            if perm.permission == "admin" {
                return true;
            }
            if perm.permission == object
                && option_list_contains(&perm.options, "actions", action)
            {
                return true;
            }
        }
        false
    }

    /// Grants a permission. The grantor needs rights on the "permission"
    /// object, except when the table is empty: the first grant bootstraps
    /// the initial admin.
    pub fn grant(
        &self,
        username: &str,
        permission: &str,
        options: Option<Value>,
        changed_by: &str,
    ) -> PermissionsResult<Permission> {
        if !KNOWN_PERMISSIONS.contains(&permission) {
            return Err(PermissionsError::UnknownPermission(permission.to_string()));
        }
        if !self.permissions.is_empty()
            && !self.has_permission(changed_by, "permission", "create", None)
        {
            return Err(PermissionsError::Denied {
                username: changed_by.to_string(),
                action: format!("grant '{}' to '{}'", permission, username),
            });
        }
        let row = Permission {
            username: username.to_string(),
            permission: permission.to_string(),
            options,
            data_version: 0,
        };
        Ok(self.permissions.insert(row, changed_by)?)
    }

    /// Revokes a permission, version-checked.
    pub fn revoke(
        &self,
        username: &str,
        permission: &str,
        old_data_version: u64,
        changed_by: &str,
    ) -> PermissionsResult<()> {
        if !self.has_permission(changed_by, "permission", "delete", None) {
            return Err(PermissionsError::Denied {
                username: changed_by.to_string(),
                action: format!("revoke '{}' from '{}'", permission, username),
            });
        }
        let key = (username.to_string(), permission.to_string());
        Ok(self.permissions.delete(&key, old_data_version, changed_by)?)
    }

    /// Records that a user holds a role.
    pub fn grant_role(
        &self,
        username: &str,
        role: &str,
        changed_by: &str,
    ) -> PermissionsResult<UserRole> {
        let row = UserRole {
            username: username.to_string(),
            role: role.to_string(),
            data_version: 0,
        };
        Ok(self.roles.insert(row, changed_by)?)
    }

    /// Removes a role from a user, version-checked.
    pub fn revoke_role(
        &self,
        username: &str,
        role: &str,
        old_data_version: u64,
        changed_by: &str,
    ) -> PermissionsResult<()> {
        let key = (username.to_string(), role.to_string());
        Ok(self.roles.delete(&key, old_data_version, changed_by)?)
    }

    /// All roles held by a user.
    pub fn user_roles(&self, username: &str) -> Vec<String> {
        self.roles
            .select_where(|r: &UserRole| r.username == username)
            .into_iter()
            .map(|r| r.role)
            .collect()
    }

    /// Whether a user holds one specific role.
    pub fn has_role(&self, username: &str, role: &str) -> bool {
        self.roles
            .get(&(username.to_string(), role.to_string()))
            .is_some()
    }
}
