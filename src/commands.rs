// ABOUTME: Domain command structs with stable type ids and typed results
// ABOUTME: The shared vocabulary between the gateway dispatcher and worker handlers
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::encryption::EncryptedField;

/// A dispatchable domain command.
///
/// `TYPE_ID` is the stable wire identifier; it never changes once shipped.
/// Void commands produce no result bytes.
pub trait Command: Serialize + DeserializeOwned + Send + Sync + 'static {
    /// Stable wire identifier
    const TYPE_ID: &'static str;
    /// Whether the command produces no result bytes
    const IS_VOID: bool = false;
    /// Result produced by the worker-side handler
    type Output: Serialize + DeserializeOwned + Send + 'static;
}

/// Result of a void command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Void;

/// A user in the authorization graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UserRecord {
    /// Monotonic id, starting at 1
    pub id: u64,
    /// Display name
    pub name: String,
    /// Decrypted email, when one was stored
    pub email: Option<String>,
    /// Decrypted SSN, when one was stored
    pub ssn: Option<String>,
    /// Creation time
    pub created_at: DateTime<Utc>,
}

/// A group in the authorization graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GroupRecord {
    /// Monotonic id
    pub id: u64,
    /// Group name
    pub name: String,
    /// Member user ids in insertion order
    pub members: Vec<u64>,
}

/// A role in the authorization graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RoleRecord {
    /// Monotonic id
    pub id: u64,
    /// Role name
    pub name: String,
}

/// A protected resource in the authorization graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResourceRecord {
    /// Monotonic id
    pub id: u64,
    /// Resource name
    pub name: String,
}

/// Outcome of an access check
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AccessDecision {
    /// Whether the user may perform the action
    pub allowed: bool,
    /// Name of the role that granted access, when allowed
    pub via_role: Option<String>,
}

/// Outcome of storing an encrypted field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoredField {
    /// Entity the field belongs to
    pub entity_id: String,
    /// Field name
    pub field_name: String,
    /// Key version that encrypted the value
    pub key_version: String,
}

/// Decrypted field value plus the version that protected it
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FieldValue {
    /// Decrypted plaintext
    pub value: String,
    /// Key version embedded in the stored field
    pub key_version: String,
}

/// Outcome of a key rotation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RotationOutcome {
    /// Version now active for new encryptions
    pub new_version: String,
}

/// Identity report from a worker (routing/isolation probes)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// Tenant this worker is dedicated to
    pub tenant_id: String,
    /// RPC port the worker is bound to
    pub port: u16,
    /// Worker process id
    pub pid: u32,
    /// Seconds since worker start
    pub uptime_seconds: i64,
    /// Commands processed since start
    pub commands_processed: u64,
}

/// Create a user; `email` and `ssn` are stored encrypted at rest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateUser {
    /// Display name
    pub name: String,
    /// Optional email, encrypted before it touches the graph
    #[serde(default)]
    pub email: Option<String>,
    /// Optional SSN, encrypted before it touches the graph
    #[serde(default)]
    pub ssn: Option<String>,
}

impl Command for CreateUser {
    const TYPE_ID: &'static str = "user.create";
    type Output = UserRecord;
}

/// Fetch one user by id
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetUser {
    /// User id
    pub user_id: u64,
}

impl Command for GetUser {
    const TYPE_ID: &'static str = "user.get";
    type Output = UserRecord;
}

/// List all users in creation order
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetUsers {}

impl Command for GetUsers {
    const TYPE_ID: &'static str = "user.list";
    type Output = Vec<UserRecord>;
}

/// Delete a user and their memberships
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeleteUser {
    /// User id
    pub user_id: u64,
}

impl Command for DeleteUser {
    const TYPE_ID: &'static str = "user.delete";
    const IS_VOID: bool = true;
    type Output = Void;
}

/// Create a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateGroup {
    /// Group name
    pub name: String,
}

impl Command for CreateGroup {
    const TYPE_ID: &'static str = "group.create";
    type Output = GroupRecord;
}

/// Add a user to a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AddUserToGroup {
    /// User id
    pub user_id: u64,
    /// Group id
    pub group_id: u64,
}

impl Command for AddUserToGroup {
    const TYPE_ID: &'static str = "group.add_member";
    const IS_VOID: bool = true;
    type Output = Void;
}

/// Create a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRole {
    /// Role name
    pub name: String,
}

impl Command for CreateRole {
    const TYPE_ID: &'static str = "role.create";
    type Output = RoleRecord;
}

/// Assign a role directly to a user
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRole {
    /// Role id
    pub role_id: u64,
    /// User id
    pub user_id: u64,
}

impl Command for AssignRole {
    const TYPE_ID: &'static str = "role.assign";
    const IS_VOID: bool = true;
    type Output = Void;
}

/// Assign a role to every member of a group
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AssignRoleToGroup {
    /// Role id
    pub role_id: u64,
    /// Group id
    pub group_id: u64,
}

impl Command for AssignRoleToGroup {
    const TYPE_ID: &'static str = "role.assign_group";
    const IS_VOID: bool = true;
    type Output = Void;
}

/// Create a protected resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateResource {
    /// Resource name
    pub name: String,
}

impl Command for CreateResource {
    const TYPE_ID: &'static str = "resource.create";
    type Output = ResourceRecord;
}

/// Grant an action on a resource to a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GrantPermission {
    /// Role id
    pub role_id: u64,
    /// Resource id
    pub resource_id: u64,
    /// Action name (`read`, `write`, …)
    pub action: String,
}

impl Command for GrantPermission {
    const TYPE_ID: &'static str = "permission.grant";
    const IS_VOID: bool = true;
    type Output = Void;
}

/// Revoke an action on a resource from a role
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RevokePermission {
    /// Role id
    pub role_id: u64,
    /// Resource id
    pub resource_id: u64,
    /// Action name
    pub action: String,
}

impl Command for RevokePermission {
    const TYPE_ID: &'static str = "permission.revoke";
    const IS_VOID: bool = true;
    type Output = Void;
}

/// Check whether a user may perform an action on a resource
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CheckAccess {
    /// User id
    pub user_id: u64,
    /// Resource id
    pub resource_id: u64,
    /// Action name
    pub action: String,
}

impl Command for CheckAccess {
    const TYPE_ID: &'static str = "access.check";
    type Output = AccessDecision;
}

/// Store an encrypted field on an arbitrary entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PutEncryptedField {
    /// Entity id
    pub entity_id: String,
    /// Field name
    pub field_name: String,
    /// Plaintext value to protect
    pub value: String,
}

impl Command for PutEncryptedField {
    const TYPE_ID: &'static str = "field.put";
    type Output = StoredField;
}

/// Fetch and decrypt a stored field
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetEncryptedField {
    /// Entity id
    pub entity_id: String,
    /// Field name
    pub field_name: String,
}

impl Command for GetEncryptedField {
    const TYPE_ID: &'static str = "field.get";
    type Output = FieldValue;
}

/// Fetch the raw stored field without decrypting (diagnostics)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetRawEncryptedField {
    /// Entity id
    pub entity_id: String,
    /// Field name
    pub field_name: String,
}

impl Command for GetRawEncryptedField {
    const TYPE_ID: &'static str = "field.get_raw";
    type Output = EncryptedField;
}

/// Rotate the tenant's encryption key
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RotateTenantKeys {}

impl Command for RotateTenantKeys {
    const TYPE_ID: &'static str = "keys.rotate";
    type Output = RotationOutcome;
}

/// Ask the worker to identify itself
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkerProbe {}

impl Command for WorkerProbe {
    const TYPE_ID: &'static str = "worker.probe";
    type Output = WorkerIdentity;
}
