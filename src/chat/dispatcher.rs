use std::sync::{
    Arc,
    atomic::{AtomicUsize, Ordering},
};

use thiserror::Error;
use tokio::sync::mpsc;

use crate::model::{Message, UserId};

use super::{
    participants::ParticipantResolver,
    registry::{CloseReason, ConnectionRegistry},
};

#[derive(Debug, Error)]
#[error("dispatcher has stopped")]
pub struct DispatcherClosed(pub Message);

/// Producer side of the submission queue. Cheap to clone, one per ingest loop.
#[derive(Clone)]
pub struct Submitter {
    tx: mpsc::UnboundedSender<Message>,
    backlog: Arc<AtomicUsize>,
    backlog_warn: usize,
}

impl Submitter {
    /// Queue a persisted message for delivery. Never blocks.
    pub fn submit(&self, message: Message) -> Result<(), DispatcherClosed> {
        let depth = self.backlog.fetch_add(1, Ordering::AcqRel) + 1;
        if let Err(mpsc::error::SendError(message)) = self.tx.send(message) {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            return Err(DispatcherClosed(message));
        }
        if depth >= self.backlog_warn && depth % self.backlog_warn == 0 {
            tracing::warn!(backlog = depth, "dispatch backlog growing");
        }
        Ok(())
    }

    pub fn backlog(&self) -> usize {
        self.backlog.load(Ordering::Acquire)
    }
}

/// What happened to one message.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct DeliveryReport {
    pub delivered: Vec<UserId>,
    pub offline: Vec<UserId>,
    pub evicted: Vec<UserId>,
}

/// Single consumer of the submission queue. Messages are delivered one at a
/// time in submission order, which keeps each sender's messages in order for
/// every recipient.
pub struct Dispatcher {
    rx: mpsc::UnboundedReceiver<Message>,
    backlog: Arc<AtomicUsize>,
    resolver: ParticipantResolver,
    registry: ConnectionRegistry,
}

pub fn channel(
    resolver: ParticipantResolver,
    registry: ConnectionRegistry,
    backlog_warn: usize,
) -> (Submitter, Dispatcher) {
    let (tx, rx) = mpsc::unbounded_channel();
    let backlog = Arc::new(AtomicUsize::new(0));
    (
        Submitter {
            tx,
            backlog: backlog.clone(),
            backlog_warn: backlog_warn.max(1),
        },
        Dispatcher {
            rx,
            backlog,
            resolver,
            registry,
        },
    )
}

impl Dispatcher {
    /// Runs until every `Submitter` is dropped and the queue is drained.
    pub async fn run(mut self) {
        tracing::info!("dispatcher started");
        while let Some(message) = self.rx.recv().await {
            self.backlog.fetch_sub(1, Ordering::AcqRel);
            self.deliver(&message).await;
        }
        tracing::info!("dispatcher stopped");
    }

    /// Push one message to every online recipient. Failures are contained:
    /// an unreachable store drops this delivery, a broken connection is evicted.
    pub async fn deliver(&self, message: &Message) -> DeliveryReport {
        let mut report = DeliveryReport::default();

        let recipients = match self.resolver.resolve(message.conversation_id, message.sender_id).await {
            Ok(recipients) => recipients,
            Err(e) => {
                tracing::warn!(
                    message_id = message.id,
                    conversation_id = %message.conversation_id,
                    error = %e,
                    "dropping delivery, participants unavailable"
                );
                return report;
            }
        };

        let mut recipients: Vec<UserId> = recipients.into_iter().collect();
        recipients.sort();

        for recipient in recipients {
            let Some(connection) = self.registry.lookup(recipient) else {
                report.offline.push(recipient);
                continue;
            };

            match connection.push(message).await {
                Ok(()) => report.delivered.push(recipient),
                Err(e) => {
                    tracing::warn!(
                        user_id = %recipient,
                        message_id = message.id,
                        error = %e,
                        "push failed, evicting connection"
                    );
                    connection.close(CloseReason::Evicted).await;
                    self.registry.deregister_connection(recipient, &connection);
                    report.evicted.push(recipient);
                }
            }
        }

        tracing::debug!(
            message_id = message.id,
            conversation_id = %message.conversation_id,
            delivered = report.delivered.len(),
            offline = report.offline.len(),
            evicted = report.evicted.len(),
            "message dispatched"
        );
        report
    }
}
