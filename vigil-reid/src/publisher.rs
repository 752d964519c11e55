//! Scope-addressed publishing
//!
//! The outbox dispatcher hands each decoded row to a [`ScopePublisher`]. The in-process
//! [`BroadcastPublisher`] turns calls into [`PushEnvelope`]s on the shared [`EventBus`],
//! which the `/events` SSE endpoint streams to clients.

use async_trait::async_trait;
use serde_json::Value;
use thiserror::Error;
use tracing::debug;
use vigil_common::events::{EventBus, PushEnvelope, Scope, Topic};

/// Publish failures; recorded on the outbox row and retried
#[derive(Debug, Error, Clone, PartialEq)]
pub enum PublishError {
    #[error("no subscribers for {0}")]
    NoSubscribers(String),

    #[error("publish rejected: {0}")]
    Rejected(String),

    #[error("publish transport error: {0}")]
    Transport(String),
}

/// Fan-out by delivery scope
#[async_trait]
pub trait ScopePublisher: Send + Sync {
    async fn to_global(&self, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError>;

    async fn to_user(
        &self,
        user_id: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError>;

    async fn to_operator(
        &self,
        operator_id: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError>;

    async fn to_camera(
        &self,
        camera_id: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError>;

    async fn to_role(
        &self,
        role: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError>;

    async fn to_incident(
        &self,
        incident_id: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError>;
}

/// Route to the publish call matching `scope`
pub async fn publish_to_scope(
    publisher: &dyn ScopePublisher,
    scope: &Scope,
    topic: Topic,
    event: &str,
    payload: Value,
) -> Result<(), PublishError> {
    match scope {
        Scope::Global => publisher.to_global(topic, event, payload).await,
        Scope::User(id) => publisher.to_user(id, topic, event, payload).await,
        Scope::Operator(id) => publisher.to_operator(id, topic, event, payload).await,
        Scope::Camera(id) => publisher.to_camera(id, topic, event, payload).await,
        Scope::Role(name) => publisher.to_role(name, topic, event, payload).await,
        Scope::Incident(id) => publisher.to_incident(id, topic, event, payload).await,
    }
}

/// In-process publisher over the [`EventBus`]
#[derive(Clone)]
pub struct BroadcastPublisher {
    bus: EventBus,
    require_subscribers: bool,
}

impl BroadcastPublisher {
    /// Publishing with nobody listening counts as delivered
    pub fn new(bus: EventBus) -> Self {
        Self {
            bus,
            require_subscribers: false,
        }
    }

    /// Fail with [`PublishError::NoSubscribers`] when nobody is listening,
    /// leaving the row for a later pass
    pub fn requiring_subscribers(mut self) -> Self {
        self.require_subscribers = true;
        self
    }

    fn send(&self, scope: Scope, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        let envelope = PushEnvelope {
            topic,
            event: event.to_string(),
            scope: scope.clone(),
            payload,
            published_at: vigil_common::time::now(),
        };

        match self.bus.emit(envelope) {
            Ok(receivers) => {
                debug!(%scope, topic = topic.as_str(), event, receivers, "Published envelope");
                Ok(())
            }
            Err(_) if self.require_subscribers => Err(PublishError::NoSubscribers(scope.to_string())),
            Err(_) => {
                debug!(%scope, topic = topic.as_str(), event, "Published envelope with no subscribers");
                Ok(())
            }
        }
    }
}

#[async_trait]
impl ScopePublisher for BroadcastPublisher {
    async fn to_global(&self, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.send(Scope::Global, topic, event, payload)
    }

    async fn to_user(&self, user_id: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.send(Scope::User(user_id.to_string()), topic, event, payload)
    }

    async fn to_operator(
        &self,
        operator_id: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError> {
        self.send(Scope::Operator(operator_id.to_string()), topic, event, payload)
    }

    async fn to_camera(&self, camera_id: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.send(Scope::Camera(camera_id.to_string()), topic, event, payload)
    }

    async fn to_role(&self, role: &str, topic: Topic, event: &str, payload: Value) -> Result<(), PublishError> {
        self.send(Scope::Role(role.to_string()), topic, event, payload)
    }

    async fn to_incident(
        &self,
        incident_id: &str,
        topic: Topic,
        event: &str,
        payload: Value,
    ) -> Result<(), PublishError> {
        self.send(Scope::Incident(incident_id.to_string()), topic, event, payload)
    }
}
