//! Typed handle for calling one remote actor

use crate::error::{ClientError, Result};
use crate::manager::ConnectionManager;
use crate::subscription::Subscription;
use codec::{
    decode_value, ActorId, Arguments, CallResult, CodecError, InvocationEnvelope, StreamFilter,
    CREDENTIALS_KEY, EXISTS_TARGET,
};
use serde::de::DeserializeOwned;
use std::collections::BTreeMap;

/// Addresses one actor through a connection manager
///
/// Creating a proxy costs nothing; the first call connects if needed.
#[derive(Debug, Clone)]
pub struct ActorProxy {
    actor_id: ActorId,
    manager: ConnectionManager,
    metadata: BTreeMap<String, String>,
}

impl ActorProxy {
    pub(crate) fn new(actor_id: ActorId, manager: ConnectionManager) -> Self {
        Self {
            actor_id,
            manager,
            metadata: BTreeMap::new(),
        }
    }

    pub fn id(&self) -> &ActorId {
        &self.actor_id
    }

    pub fn manager(&self) -> &ConnectionManager {
        &self.manager
    }

    /// Send `Bearer <token>` with every call and subscription
    pub fn with_credentials(self, token: &str) -> Self {
        self.with_metadata(CREDENTIALS_KEY, format!("Bearer {}", token))
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    fn envelope(&self, target: &str, args: Arguments) -> InvocationEnvelope {
        let mut envelope = InvocationEnvelope::new(self.actor_id.clone(), target, args);
        envelope.metadata = self.metadata.clone();
        envelope
    }

    /// Raw result, error descriptors included
    pub async fn invoke(&self, target: &str, args: Arguments) -> Result<CallResult> {
        self.manager.invoke(self.envelope(target, args)).await
    }

    /// Call a method returning a value
    pub async fn call<T: DeserializeOwned>(&self, target: &str, args: Arguments) -> Result<T> {
        into_value(self.invoke(target, args).await?)
    }

    /// Call a method for its effect; any success payload is ignored
    pub async fn call_void(&self, target: &str, args: Arguments) -> Result<()> {
        match self.invoke(target, args).await? {
            CallResult::Value(_) | CallResult::Void => Ok(()),
            CallResult::Error(descriptor) => Err(ClientError::from_descriptor(descriptor)),
        }
    }

    /// Call a generic method with ordered type tags
    pub async fn call_generic<T: DeserializeOwned>(
        &self,
        target: &str,
        generics: Vec<String>,
        args: Arguments,
    ) -> Result<T> {
        let envelope = self.envelope(target, args).with_generics(generics);
        into_value(self.manager.invoke(envelope).await?)
    }

    /// Whether the node currently exposes this actor
    pub async fn exists(&self) -> Result<bool> {
        match self.call_void(EXISTS_TARGET, Arguments::empty()).await {
            Ok(()) => Ok(true),
            Err(ClientError::UnknownActor { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Stream an observable property
    pub async fn subscribe(&self, property: &str, filter: StreamFilter) -> Result<Subscription> {
        self.manager
            .subscribe(self.actor_id.clone(), property, filter, self.metadata.clone())
            .await
    }
}

fn into_value<T: DeserializeOwned>(result: CallResult) -> Result<T> {
    match result {
        CallResult::Value(bytes) => Ok(decode_value(&bytes)?),
        // Lets `call::<()>` accept void methods
        CallResult::Void => serde_json::from_value(serde_json::Value::Null)
            .map_err(|e| ClientError::Codec(CodecError::decoding(std::any::type_name::<T>(), e))),
        CallResult::Error(descriptor) => Err(ClientError::from_descriptor(descriptor)),
    }
}
