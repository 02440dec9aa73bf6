// ABOUTME: Per-worker in-memory authorization graph of users, groups, roles, and resources
// ABOUTME: Pure data structure; handlers encrypt sensitive fields before they land here
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::collections::{BTreeMap, BTreeSet, HashMap};

use chrono::{DateTime, Utc};

use crate::encryption::EncryptedField;
use crate::errors::{AppError, AppResult};

/// A user node; sensitive fields are held encrypted
#[derive(Debug, Clone)]
pub struct UserNode {
    /// Monotonic id
    pub id: u64,
    /// Display name
    pub name: String,
    /// Creation time
    pub created_at: DateTime<Utc>,
    /// Encrypted at-rest fields keyed by field name
    pub encrypted: HashMap<String, EncryptedField>,
}

/// A group node
#[derive(Debug, Clone)]
pub struct GroupNode {
    /// Monotonic id
    pub id: u64,
    /// Group name
    pub name: String,
    /// Member user ids
    pub members: BTreeSet<u64>,
}

/// A role node
#[derive(Debug, Clone)]
pub struct RoleNode {
    /// Monotonic id
    pub id: u64,
    /// Role name
    pub name: String,
}

/// A resource node
#[derive(Debug, Clone)]
pub struct ResourceNode {
    /// Monotonic id
    pub id: u64,
    /// Resource name
    pub name: String,
}

/// The tenant's in-memory authorization graph.
///
/// Only the command buffer's consumer touches an instance, so mutation is
/// single-threaded by construction.
#[derive(Default)]
pub struct AuthorizationGraph {
    next_id: u64,
    users: BTreeMap<u64, UserNode>,
    groups: BTreeMap<u64, GroupNode>,
    roles: BTreeMap<u64, RoleNode>,
    resources: BTreeMap<u64, ResourceNode>,
    user_roles: BTreeMap<u64, BTreeSet<u64>>,
    group_roles: BTreeMap<u64, BTreeSet<u64>>,
    grants: BTreeMap<(u64, u64), BTreeSet<String>>,
    fields: HashMap<(String, String), EncryptedField>,
}

impl AuthorizationGraph {
    /// Empty graph
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn allocate_id(&mut self) -> u64 {
        self.next_id += 1;
        self.next_id
    }

    /// Insert a user; ids start at 1 and increase in creation order
    pub fn create_user(&mut self, name: String) -> &UserNode {
        let id = self.allocate_id();
        let node = UserNode {
            id,
            name,
            created_at: Utc::now(),
            encrypted: HashMap::new(),
        };
        self.users.entry(id).or_insert(node)
    }

    /// Attach an encrypted field to a user.
    ///
    /// # Errors
    /// `NotFound` when the user does not exist.
    pub fn attach_user_field(&mut self, user_id: u64, field: EncryptedField) -> AppResult<()> {
        let user = self
            .users
            .get_mut(&user_id)
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))?;
        user.encrypted.insert(field.field_name.clone(), field);
        Ok(())
    }

    /// Look up a user.
    ///
    /// # Errors
    /// `NotFound` when the user does not exist.
    pub fn user(&self, user_id: u64) -> AppResult<&UserNode> {
        self.users
            .get(&user_id)
            .ok_or_else(|| AppError::not_found(format!("user {user_id}")))
    }

    /// All users in creation order
    #[must_use]
    pub fn users(&self) -> Vec<&UserNode> {
        self.users.values().collect()
    }

    /// Remove a user and every membership and role assignment; idempotent
    pub fn delete_user(&mut self, user_id: u64) {
        self.users.remove(&user_id);
        self.user_roles.remove(&user_id);
        for group in self.groups.values_mut() {
            group.members.remove(&user_id);
        }
    }

    /// Insert a group
    pub fn create_group(&mut self, name: String) -> &GroupNode {
        let id = self.allocate_id();
        let node = GroupNode {
            id,
            name,
            members: BTreeSet::new(),
        };
        self.groups.entry(id).or_insert(node)
    }

    /// Group lookup.
    ///
    /// # Errors
    /// `NotFound` when the group does not exist.
    pub fn group(&self, group_id: u64) -> AppResult<&GroupNode> {
        self.groups
            .get(&group_id)
            .ok_or_else(|| AppError::not_found(format!("group {group_id}")))
    }

    /// Add a user to a group.
    ///
    /// # Errors
    /// `NotFound` when either side does not exist.
    pub fn add_member(&mut self, group_id: u64, user_id: u64) -> AppResult<()> {
        if !self.users.contains_key(&user_id) {
            return Err(AppError::not_found(format!("user {user_id}")));
        }
        let group = self
            .groups
            .get_mut(&group_id)
            .ok_or_else(|| AppError::not_found(format!("group {group_id}")))?;
        group.members.insert(user_id);
        Ok(())
    }

    /// Insert a role
    pub fn create_role(&mut self, name: String) -> &RoleNode {
        let id = self.allocate_id();
        let node = RoleNode { id, name };
        self.roles.entry(id).or_insert(node)
    }

    /// Assign a role directly to a user.
    ///
    /// # Errors
    /// `NotFound` when either side does not exist.
    pub fn assign_role_to_user(&mut self, role_id: u64, user_id: u64) -> AppResult<()> {
        if !self.roles.contains_key(&role_id) {
            return Err(AppError::not_found(format!("role {role_id}")));
        }
        if !self.users.contains_key(&user_id) {
            return Err(AppError::not_found(format!("user {user_id}")));
        }
        self.user_roles.entry(user_id).or_default().insert(role_id);
        Ok(())
    }

    /// Assign a role to a group (every member inherits it).
    ///
    /// # Errors
    /// `NotFound` when either side does not exist.
    pub fn assign_role_to_group(&mut self, role_id: u64, group_id: u64) -> AppResult<()> {
        if !self.roles.contains_key(&role_id) {
            return Err(AppError::not_found(format!("role {role_id}")));
        }
        if !self.groups.contains_key(&group_id) {
            return Err(AppError::not_found(format!("group {group_id}")));
        }
        self.group_roles.entry(group_id).or_default().insert(role_id);
        Ok(())
    }

    /// Insert a resource
    pub fn create_resource(&mut self, name: String) -> &ResourceNode {
        let id = self.allocate_id();
        let node = ResourceNode { id, name };
        self.resources.entry(id).or_insert(node)
    }

    /// Grant an action on a resource to a role.
    ///
    /// # Errors
    /// `NotFound` when either side does not exist.
    pub fn grant(&mut self, role_id: u64, resource_id: u64, action: String) -> AppResult<()> {
        if !self.roles.contains_key(&role_id) {
            return Err(AppError::not_found(format!("role {role_id}")));
        }
        if !self.resources.contains_key(&resource_id) {
            return Err(AppError::not_found(format!("resource {resource_id}")));
        }
        self.grants
            .entry((role_id, resource_id))
            .or_default()
            .insert(action);
        Ok(())
    }

    /// Revoke an action; idempotent for absent grants.
    ///
    /// # Errors
    /// `NotFound` when either side does not exist.
    pub fn revoke(&mut self, role_id: u64, resource_id: u64, action: &str) -> AppResult<()> {
        if !self.roles.contains_key(&role_id) {
            return Err(AppError::not_found(format!("role {role_id}")));
        }
        if !self.resources.contains_key(&resource_id) {
            return Err(AppError::not_found(format!("resource {resource_id}")));
        }
        if let Some(actions) = self.grants.get_mut(&(role_id, resource_id)) {
            actions.remove(action);
        }
        Ok(())
    }

    /// Effective access decision for a user: direct roles plus roles
    /// inherited through group membership. Returns the granting role's name.
    ///
    /// # Errors
    /// `NotFound` when the user or resource does not exist.
    pub fn check_access(
        &self,
        user_id: u64,
        resource_id: u64,
        action: &str,
    ) -> AppResult<Option<&str>> {
        if !self.users.contains_key(&user_id) {
            return Err(AppError::not_found(format!("user {user_id}")));
        }
        if !self.resources.contains_key(&resource_id) {
            return Err(AppError::not_found(format!("resource {resource_id}")));
        }

        let mut effective: BTreeSet<u64> = self
            .user_roles
            .get(&user_id)
            .cloned()
            .unwrap_or_default();
        for group in self.groups.values() {
            if group.members.contains(&user_id) {
                if let Some(roles) = self.group_roles.get(&group.id) {
                    effective.extend(roles);
                }
            }
        }

        for role_id in effective {
            if self
                .grants
                .get(&(role_id, resource_id))
                .is_some_and(|actions| actions.contains(action))
            {
                return Ok(self.roles.get(&role_id).map(|r| r.name.as_str()));
            }
        }
        Ok(None)
    }

    /// Store an encrypted field on an arbitrary entity
    pub fn put_field(&mut self, field: EncryptedField) {
        self.fields
            .insert((field.entity_id.clone(), field.field_name.clone()), field);
    }

    /// Fetch a stored field.
    ///
    /// # Errors
    /// `NotFound` when no such field exists.
    pub fn field(&self, entity_id: &str, field_name: &str) -> AppResult<&EncryptedField> {
        self.fields
            .get(&(entity_id.to_owned(), field_name.to_owned()))
            .ok_or_else(|| {
                AppError::not_found(format!("field {field_name} of entity {entity_id}"))
            })
    }
}
