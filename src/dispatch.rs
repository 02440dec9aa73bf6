// ABOUTME: Gateway-side command dispatch over the binary RPC channel
// ABOUTME: Static codec registry, envelope send, and retry-once on worker unavailability
//
// SPDX-License-Identifier: MIT OR Apache-2.0
// Copyright (c) 2025 ACS Platform

use std::collections::HashMap;
use std::sync::Arc;

use serde_json::Value;
use tracing::{debug, warn};

use crate::commands::{
    AddUserToGroup, AssignRole, AssignRoleToGroup, CheckAccess, Command, CreateGroup,
    CreateResource, CreateRole, CreateUser, DeleteUser, GetEncryptedField, GetRawEncryptedField,
    GetUser, GetUsers, GrantPermission, PutEncryptedField, RevokePermission, RotateTenantKeys,
    WorkerProbe,
};
use crate::correlation;
use crate::errors::{AppError, AppResult};
use crate::process::TenantProcessManager;
use crate::rpc::{self, CommandEnvelope};
use crate::tenant::TenantId;

type EncodeFn = Box<dyn Fn(Value) -> AppResult<Vec<u8>> + Send + Sync>;
type DecodeFn = Box<dyn Fn(&[u8]) -> AppResult<Value> + Send + Sync>;

struct CommandCodec {
    encode: EncodeFn,
    decode: DecodeFn,
    is_void: bool,
}

/// Serializes commands, calls the worker, and maps transport failures
pub struct CommandDispatcher {
    manager: Arc<TenantProcessManager>,
    codecs: HashMap<&'static str, CommandCodec>,
}

impl CommandDispatcher {
    /// Build a dispatcher with every domain command registered
    #[must_use]
    pub fn new(manager: Arc<TenantProcessManager>) -> Self {
        let mut dispatcher = Self {
            manager,
            codecs: HashMap::new(),
        };
        dispatcher.register::<CreateUser>();
        dispatcher.register::<GetUser>();
        dispatcher.register::<GetUsers>();
        dispatcher.register::<DeleteUser>();
        dispatcher.register::<CreateGroup>();
        dispatcher.register::<AddUserToGroup>();
        dispatcher.register::<CreateRole>();
        dispatcher.register::<AssignRole>();
        dispatcher.register::<AssignRoleToGroup>();
        dispatcher.register::<CreateResource>();
        dispatcher.register::<GrantPermission>();
        dispatcher.register::<RevokePermission>();
        dispatcher.register::<CheckAccess>();
        dispatcher.register::<PutEncryptedField>();
        dispatcher.register::<GetEncryptedField>();
        dispatcher.register::<GetRawEncryptedField>();
        dispatcher.register::<RotateTenantKeys>();
        dispatcher.register::<WorkerProbe>();
        dispatcher
    }

    fn register<C: Command>(&mut self) {
        let encode: EncodeFn = Box::new(|json| {
            let command: C = serde_json::from_value(json)
                .map_err(|e| AppError::bad_payload(format!("{}: {e}", C::TYPE_ID)))?;
            rpc::encode(&command)
        });
        let decode: DecodeFn = Box::new(|bytes| {
            if C::IS_VOID {
                return Ok(Value::Null);
            }
            let output: C::Output = rpc::decode(bytes)?;
            serde_json::to_value(output)
                .map_err(|e| AppError::internal(format!("result to JSON: {e}")))
        });
        self.codecs.insert(
            C::TYPE_ID,
            CommandCodec {
                encode,
                decode,
                is_void: C::IS_VOID,
            },
        );
    }

    /// Registered command type ids, sorted
    #[must_use]
    pub fn command_types(&self) -> Vec<&'static str> {
        let mut types: Vec<&'static str> = self.codecs.keys().copied().collect();
        types.sort_unstable();
        types
    }

    /// Dispatch a JSON-shaped command from the HTTP surface.
    ///
    /// # Errors
    /// `UnknownCommandType`, `BadCommandPayload`, transport errors mapped to
    /// `WorkerUnavailable`/`Timeout`, or whatever the handler returned.
    pub async fn dispatch_json(
        &self,
        tenant_id: &TenantId,
        command_type: &str,
        payload: Value,
    ) -> AppResult<Value> {
        let codec = self
            .codecs
            .get(command_type)
            .ok_or_else(|| AppError::UnknownCommandType(command_type.to_owned()))?;
        let command_data = (codec.encode)(payload)?;
        let result_data = self.send(tenant_id, command_type, command_data).await?;
        if codec.is_void {
            return Ok(Value::Null);
        }
        (codec.decode)(&result_data)
    }

    /// Dispatch a typed command (internal callers and tests).
    ///
    /// # Errors
    /// Same mapping as [`Self::dispatch_json`].
    pub async fn dispatch<C: Command>(
        &self,
        tenant_id: &TenantId,
        command: &C,
    ) -> AppResult<C::Output> {
        let command_data = rpc::encode(command)?;
        let result_data = self.send(tenant_id, C::TYPE_ID, command_data).await?;
        rpc::decode(&result_data)
    }

    async fn send(
        &self,
        tenant_id: &TenantId,
        command_type: &str,
        command_data: Vec<u8>,
    ) -> AppResult<Vec<u8>> {
        let correlation_id = correlation::current().correlation_id;
        let envelope = CommandEnvelope {
            command_type: command_type.to_owned(),
            command_data,
            correlation_id: correlation_id.clone(),
        };

        let lease = self.manager.get_or_start(tenant_id).await?;
        match lease.channel.call(&envelope).await {
            Ok(response) => response.into_result(),
            Err(AppError::WorkerUnavailable(first)) => {
                // One retry after forcing a health recheck; the recheck marks
                // the worker degraded so get_or_start replaces it
                warn!(
                    tenant_id = %tenant_id,
                    command_type,
                    correlation_id = %correlation_id,
                    error = %first,
                    "worker unavailable; rechecking health and retrying once"
                );
                self.manager.force_health_check(tenant_id).await;
                let lease = self.manager.get_or_start(tenant_id).await?;
                let response = lease.channel.call(&envelope).await?;
                debug!(tenant_id = %tenant_id, command_type, "retry after recheck succeeded");
                response.into_result()
            }
            Err(other) => Err(other),
        }
    }
}
