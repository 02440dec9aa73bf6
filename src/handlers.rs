// ABOUTME: Worker-side command handler registry keyed by stable command type ids
// ABOUTME: Each entry decodes its payload, runs against the authorization graph, and encodes the result
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

//! # Worker command handlers
//!
//! A static registry populated at startup replaces reflective dispatch: each
//! entry holds a function that deserializes the payload into its command
//! struct, runs the handler, and serializes the result. The command buffer's
//! consumer is the only caller, so no two handlers for one worker ever run
//! concurrently.

use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;

use futures_util::future::BoxFuture;
use tokio::sync::Mutex;

use crate::buffer::BufferMetrics;
use crate::commands::{
    AccessDecision, AddUserToGroup, AssignRole, AssignRoleToGroup, CheckAccess, Command,
    CreateGroup, CreateResource, CreateRole, CreateUser, DeleteUser, FieldValue,
    GetEncryptedField, GetRawEncryptedField, GetUser, GetUsers, GrantPermission, GroupRecord,
    PutEncryptedField, ResourceRecord, RevokePermission, RoleRecord, RotateTenantKeys,
    RotationOutcome, StoredField, UserRecord, Void, WorkerIdentity, WorkerProbe,
};
use crate::encryption::EncryptionEngine;
use crate::errors::{AppError, AppResult};
use crate::graph::{AuthorizationGraph, UserNode};
use crate::rpc;

/// Shared state every handler runs against
pub struct WorkerState {
    /// Tenant this worker serves
    pub tenant_id: String,
    /// RPC port the worker is bound to
    pub port: u16,
    /// Worker start instant (uptime reporting)
    pub started_at: Instant,
    /// The tenant's authorization graph
    pub graph: Mutex<AuthorizationGraph>,
    /// Field-level encryption engine
    pub encryption: EncryptionEngine,
    /// Buffer metrics, shared with the health RPC
    pub metrics: Arc<BufferMetrics>,
}

type HandlerFn = Arc<dyn Fn(Arc<WorkerState>, Vec<u8>) -> BoxFuture<'static, AppResult<Vec<u8>>> + Send + Sync>;

struct HandlerEntry {
    handler: HandlerFn,
    is_void: bool,
}

/// Command-type-id → handler table
pub struct HandlerRegistry {
    handlers: HashMap<&'static str, HandlerEntry>,
}

impl HandlerRegistry {
    fn empty() -> Self {
        Self {
            handlers: HashMap::new(),
        }
    }

    fn register<C, F, Fut>(&mut self, handler: F)
    where
        C: Command,
        F: Fn(Arc<WorkerState>, C) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = AppResult<C::Output>> + Send + 'static,
    {
        let handler = Arc::new(handler);
        let erased: HandlerFn = Arc::new(move |state, payload| {
            let handler = Arc::clone(&handler);
            Box::pin(async move {
                let command: C = rpc::decode(&payload)?;
                let output = handler(state, command).await?;
                if C::IS_VOID {
                    Ok(Vec::new())
                } else {
                    rpc::encode(&output)
                }
            })
        });
        self.handlers.insert(
            C::TYPE_ID,
            HandlerEntry {
                handler: erased,
                is_void: C::IS_VOID,
            },
        );
    }

    /// Run the handler registered for `command_type`.
    ///
    /// # Errors
    /// `UnknownCommandType` when nothing is registered under the id;
    /// otherwise whatever the handler returns.
    pub async fn dispatch(
        &self,
        state: Arc<WorkerState>,
        command_type: &str,
        payload: Vec<u8>,
    ) -> AppResult<Vec<u8>> {
        let entry = self
            .handlers
            .get(command_type)
            .ok_or_else(|| AppError::UnknownCommandType(command_type.to_owned()))?;
        (entry.handler)(state, payload).await
    }

    /// Whether the command under this id produces result bytes
    #[must_use]
    pub fn is_void(&self, command_type: &str) -> Option<bool> {
        self.handlers.get(command_type).map(|e| e.is_void)
    }

    /// Registered command type ids
    #[must_use]
    pub fn command_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.handlers.keys().copied().collect();
        types.sort_unstable();
        types
    }
}

/// Build the full registry of domain handlers
#[must_use]
pub fn builtin_registry() -> HandlerRegistry {
    let mut registry = HandlerRegistry::empty();

    registry.register::<CreateUser, _, _>(|state, command| async move {
        let (user_id, name, created_at) = {
            let mut graph = state.graph.lock().await;
            let user = graph.create_user(command.name.clone());
            (user.id, user.name.clone(), user.created_at)
        };

        // Sensitive fields are encrypted before they land in the graph
        let entity_id = user_entity_id(user_id);
        for (field_name, value) in [("email", &command.email), ("ssn", &command.ssn)] {
            let Some(value) = value else { continue };
            let field = state
                .encryption
                .encrypt_field(value, field_name, &entity_id, &state.tenant_id)
                .await?;
            state.graph.lock().await.attach_user_field(user_id, field)?;
        }

        Ok(UserRecord {
            id: user_id,
            name,
            email: command.email,
            ssn: command.ssn,
            created_at,
        })
    });

    registry.register::<GetUser, _, _>(|state, command| async move {
        let node = {
            let graph = state.graph.lock().await;
            graph.user(command.user_id)?.clone()
        };
        decrypt_user_record(&state, node).await
    });

    registry.register::<GetUsers, _, _>(|state, _command| async move {
        let nodes: Vec<UserNode> = {
            let graph = state.graph.lock().await;
            graph.users().into_iter().cloned().collect()
        };
        let mut records = Vec::with_capacity(nodes.len());
        for node in nodes {
            records.push(decrypt_user_record(&state, node).await?);
        }
        Ok(records)
    });

    registry.register::<DeleteUser, _, _>(|state, command| async move {
        state.graph.lock().await.delete_user(command.user_id);
        Ok(Void)
    });

    registry.register::<CreateGroup, _, _>(|state, command| async move {
        let mut graph = state.graph.lock().await;
        let group = graph.create_group(command.name);
        Ok(GroupRecord {
            id: group.id,
            name: group.name.clone(),
            members: group.members.iter().copied().collect(),
        })
    });

    registry.register::<AddUserToGroup, _, _>(|state, command| async move {
        state
            .graph
            .lock()
            .await
            .add_member(command.group_id, command.user_id)?;
        Ok(Void)
    });

    registry.register::<CreateRole, _, _>(|state, command| async move {
        let mut graph = state.graph.lock().await;
        let role = graph.create_role(command.name);
        Ok(RoleRecord {
            id: role.id,
            name: role.name.clone(),
        })
    });

    registry.register::<AssignRole, _, _>(|state, command| async move {
        state
            .graph
            .lock()
            .await
            .assign_role_to_user(command.role_id, command.user_id)?;
        Ok(Void)
    });

    registry.register::<AssignRoleToGroup, _, _>(|state, command| async move {
        state
            .graph
            .lock()
            .await
            .assign_role_to_group(command.role_id, command.group_id)?;
        Ok(Void)
    });

    registry.register::<CreateResource, _, _>(|state, command| async move {
        let mut graph = state.graph.lock().await;
        let resource = graph.create_resource(command.name);
        Ok(ResourceRecord {
            id: resource.id,
            name: resource.name.clone(),
        })
    });

    registry.register::<GrantPermission, _, _>(|state, command| async move {
        state
            .graph
            .lock()
            .await
            .grant(command.role_id, command.resource_id, command.action)?;
        Ok(Void)
    });

    registry.register::<RevokePermission, _, _>(|state, command| async move {
        state
            .graph
            .lock()
            .await
            .revoke(command.role_id, command.resource_id, &command.action)?;
        Ok(Void)
    });

    registry.register::<CheckAccess, _, _>(|state, command| async move {
        let graph = state.graph.lock().await;
        let via_role = graph
            .check_access(command.user_id, command.resource_id, &command.action)?
            .map(str::to_owned);
        Ok(AccessDecision {
            allowed: via_role.is_some(),
            via_role,
        })
    });

    registry.register::<PutEncryptedField, _, _>(|state, command| async move {
        let field = state
            .encryption
            .encrypt_field(
                &command.value,
                &command.field_name,
                &command.entity_id,
                &state.tenant_id,
            )
            .await?;
        let stored = StoredField {
            entity_id: field.entity_id.clone(),
            field_name: field.field_name.clone(),
            key_version: field.key_version.clone(),
        };
        state.graph.lock().await.put_field(field);
        Ok(stored)
    });

    registry.register::<GetEncryptedField, _, _>(|state, command| async move {
        let field = {
            let graph = state.graph.lock().await;
            graph.field(&command.entity_id, &command.field_name)?.clone()
        };
        let value = state
            .encryption
            .decrypt_field(&field, &state.tenant_id)
            .await?;
        Ok(FieldValue {
            value,
            key_version: field.key_version,
        })
    });

    registry.register::<GetRawEncryptedField, _, _>(|state, command| async move {
        let graph = state.graph.lock().await;
        Ok(graph.field(&command.entity_id, &command.field_name)?.clone())
    });

    registry.register::<RotateTenantKeys, _, _>(|state, _command| async move {
        let new_version = state.encryption.rotate_keys(&state.tenant_id).await?;
        Ok(RotationOutcome { new_version })
    });

    registry.register::<WorkerProbe, _, _>(|state, _command| async move {
        Ok(WorkerIdentity {
            tenant_id: state.tenant_id.clone(),
            port: state.port,
            pid: std::process::id(),
            uptime_seconds: state.started_at.elapsed().as_secs() as i64,
            commands_processed: state.metrics.commands_processed(),
        })
    });

    registry
}

fn user_entity_id(user_id: u64) -> String {
    format!("user:{user_id}")
}

async fn decrypt_user_record(state: &Arc<WorkerState>, node: UserNode) -> AppResult<UserRecord> {
    let mut email = None;
    let mut ssn = None;
    for (field_name, slot) in [("email", &mut email), ("ssn", &mut ssn)] {
        if let Some(field) = node.encrypted.get(field_name) {
            *slot = Some(state.encryption.decrypt_field(field, &state.tenant_id).await?);
        }
    }
    Ok(UserRecord {
        id: node.id,
        name: node.name,
        email,
        ssn,
        created_at: node.created_at,
    })
}
