//! Gateway hacia la cola de mensajes.
//!
//! Semántica: entrega at-least-once, sin orden garantizado entre llamadas.
//! Cada llamada publica un lote completo (un solo ida y vuelta por lote,
//! no por mensaje).

use std::collections::{HashMap, HashSet};
use std::sync::Mutex as StdMutex;

use async_trait::async_trait;
use lapin::options::{BasicPublishOptions, ConfirmSelectOptions, QueueDeclareOptions};
use lapin::publisher_confirm::Confirmation;
use lapin::types::FieldTable;
use lapin::{BasicProperties, Channel, Connection, ConnectionProperties};
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::error::QueueError;

#[async_trait]
pub trait QueueGateway: Send + Sync {
    /// Declara la cola como durable (si hace falta) y publica todos los
    /// mensajes como persistentes.
    async fn publish(&self, queue: &str, messages: &[Value]) -> Result<(), QueueError>;
}

/// Serializa un lote de mensajes tipados y lo publica.
pub async fn publish_json<T: Serialize>(
    gateway: &dyn QueueGateway,
    queue: &str,
    messages: &[T],
) -> Result<(), QueueError> {
    let values = messages
        .iter()
        .map(serde_json::to_value)
        .collect::<Result<Vec<_>, _>>()?;
    gateway.publish(queue, &values).await
}

/* ---------------- RabbitMQ ---------------- */

struct Session {
    // la conexión tiene que vivir mientras se use el canal
    _connection: Connection,
    channel: Channel,
}

/// Gateway AMQP con una conexión perezosa y reutilizada.
///
/// La conexión se abre en la primera publicación. Si una publicación
/// falla se descarta la sesión y la próxima llamada reconecta.
pub struct RabbitMqGateway {
    url: String,
    session: Mutex<Option<Session>>,
    declared: StdMutex<HashSet<String>>,
}

impl RabbitMqGateway {
    pub fn new(url: impl Into<String>) -> Self {
        Self {
            url: url.into(),
            session: Mutex::new(None),
            declared: StdMutex::new(HashSet::new()),
        }
    }

    async fn channel(&self) -> Result<Channel, QueueError> {
        let mut session = self.session.lock().await;

        if let Some(s) = session.as_ref() {
            if s.channel.status().connected() {
                return Ok(s.channel.clone());
            }
        }

        let connection = Connection::connect(
            &self.url,
            ConnectionProperties::default().with_connection_name("master-queue-gateway".into()),
        )
        .await
        .map_err(|e| QueueError::Connection(e.to_string()))?;

        let channel = connection
            .create_channel()
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        // confirms del broker: publish() no vuelve hasta que el lote quedó aceptado
        channel
            .confirm_select(ConfirmSelectOptions::default())
            .await
            .map_err(|e| QueueError::Connection(e.to_string()))?;

        info!("conectado al broker AMQP");
        self.forget_declared();

        *session = Some(Session {
            _connection: connection,
            channel: channel.clone(),
        });
        Ok(channel)
    }

    async fn reset(&self) {
        *self.session.lock().await = None;
        self.forget_declared();
    }

    fn forget_declared(&self) {
        if let Ok(mut declared) = self.declared.lock() {
            declared.clear();
        }
    }

    fn is_declared(&self, queue: &str) -> bool {
        self.declared
            .lock()
            .map(|d| d.contains(queue))
            .unwrap_or(false)
    }

    async fn declare(&self, channel: &Channel, queue: &str) -> Result<(), QueueError> {
        if self.is_declared(queue) {
            return Ok(());
        }

        channel
            .queue_declare(
                queue,
                QueueDeclareOptions {
                    durable: true,
                    ..Default::default()
                },
                FieldTable::default(),
            )
            .await
            .map_err(|e| QueueError::Declare {
                queue: queue.to_string(),
                reason: e.to_string(),
            })?;

        if let Ok(mut declared) = self.declared.lock() {
            declared.insert(queue.to_string());
        }
        Ok(())
    }

    async fn publish_batch(
        &self,
        channel: &Channel,
        queue: &str,
        messages: &[Value],
    ) -> Result<(), QueueError> {
        self.declare(channel, queue).await?;

        let mut confirms = Vec::with_capacity(messages.len());
        for message in messages {
            let body = serde_json::to_vec(message)?;
            let confirm = channel
                .basic_publish(
                    "",
                    queue,
                    BasicPublishOptions::default(),
                    &body,
                    BasicProperties::default()
                        .with_delivery_mode(2) // persistente
                        .with_content_type("application/json".into()),
                )
                .await
                .map_err(|e| QueueError::publish(queue, e))?;
            confirms.push(confirm);
        }

        for confirm in confirms {
            let confirmation = confirm.await.map_err(|e| QueueError::publish(queue, e))?;
            if matches!(confirmation, Confirmation::Nack(_)) {
                return Err(QueueError::publish(queue, "el broker rechazó el mensaje (nack)"));
            }
        }

        Ok(())
    }
}

#[async_trait]
impl QueueGateway for RabbitMqGateway {
    async fn publish(&self, queue: &str, messages: &[Value]) -> Result<(), QueueError> {
        if messages.is_empty() {
            return Ok(());
        }

        let channel = self.channel().await?;

        match self.publish_batch(&channel, queue, messages).await {
            Ok(()) => {
                debug!("publicados {} mensajes en la cola {}", messages.len(), queue);
                Ok(())
            }
            Err(e) => {
                warn!("falló la publicación en {}: {}", queue, e);
                self.reset().await;
                Err(e)
            }
        }
    }
}

/* ---------------- En memoria ---------------- */

/// Cola en memoria: guarda lo publicado por cola. Sirve para correr el
/// master sin broker y para los tests.
#[derive(Debug, Default)]
pub struct MemoryQueue {
    messages: StdMutex<HashMap<String, Vec<Value>>>,
    failing: StdMutex<HashSet<String>>,
}

impl MemoryQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Mensajes publicados en `queue`, en orden de publicación.
    pub fn messages(&self, queue: &str) -> Vec<Value> {
        self.messages
            .lock()
            .map(|m| m.get(queue).cloned().unwrap_or_default())
            .unwrap_or_default()
    }

    /// A partir de ahora las publicaciones en `queue` fallan.
    pub fn fail_on(&self, queue: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.insert(queue.to_string());
        }
    }

    pub fn recover(&self, queue: &str) {
        if let Ok(mut failing) = self.failing.lock() {
            failing.remove(queue);
        }
    }
}

#[async_trait]
impl QueueGateway for MemoryQueue {
    async fn publish(&self, queue: &str, messages: &[Value]) -> Result<(), QueueError> {
        let failing = self
            .failing
            .lock()
            .map(|f| f.contains(queue))
            .unwrap_or(false);
        if failing {
            return Err(QueueError::publish(queue, "cola no disponible"));
        }

        let mut all = self
            .messages
            .lock()
            .map_err(|_| QueueError::publish(queue, "lock envenenado"))?;
        all.entry(queue.to_string())
            .or_default()
            .extend(messages.iter().cloned());
        debug!("publicados {} mensajes en la cola {}", messages.len(), queue);
        Ok(())
    }
}
