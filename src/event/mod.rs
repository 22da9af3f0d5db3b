//! Typed publish/subscribe for workflow events
//!
//! Every topic owns a bounded broadcast channel. Publishing never waits on
//! subscribers: a subscriber that falls behind by more than the channel
//! capacity skips the oldest events and is told how many it missed.

use std::{collections::HashMap, fmt, sync::Arc};

use async_trait::async_trait;
use log::{debug, info, warn};
use serde::Serialize;
use tokio::{
    sync::{broadcast, watch},
    task::JoinHandle,
};
use uuid::Uuid;

use crate::{core::WorkflowKind, orchestration::OperationResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum EventTopic {
    OperationSucceeded,
    OperationFailed,
    DependencyMilestone,
}

impl EventTopic {
    pub const ALL: [EventTopic; 3] = [
        EventTopic::OperationSucceeded,
        EventTopic::OperationFailed,
        EventTopic::DependencyMilestone,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            EventTopic::OperationSucceeded => "operationSucceeded",
            EventTopic::OperationFailed => "operationFailed",
            EventTopic::DependencyMilestone => "dependencyMilestone",
        }
    }
}

impl fmt::Display for EventTopic {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Breaker transitions worth telling the outside world about
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum BreakerMilestone {
    /// Closed breaker reached its failure threshold
    Opened,
    /// Cooldown elapsed and a trial call was let through
    HalfOpened,
    /// Trial call failed
    Reopened,
    /// Trial call succeeded
    Closed,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DependencyMilestone {
    pub key: String,
    pub milestone: BreakerMilestone,
    pub failure_count: u32,
}

/// Terminal failure of one workflow invocation
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct FailedOperation {
    pub operation_id: Uuid,
    pub workflow: WorkflowKind,
    pub user_id: String,
    pub reason: String,
}

#[derive(Debug, Clone)]
pub enum WorkflowEvent {
    OperationSucceeded(Arc<OperationResult>),
    OperationFailed(FailedOperation),
    DependencyMilestone(DependencyMilestone),
}

impl WorkflowEvent {
    pub fn topic(&self) -> EventTopic {
        match self {
            WorkflowEvent::OperationSucceeded(_) => EventTopic::OperationSucceeded,
            WorkflowEvent::OperationFailed(_) => EventTopic::OperationFailed,
            WorkflowEvent::DependencyMilestone(_) => EventTopic::DependencyMilestone,
        }
    }
}

/// Consumer attached to a topic with [`EventBus::attach`]
#[async_trait]
pub trait EventSubscriber: Send + Sync {
    fn name(&self) -> &str;

    async fn on_event(&self, event: WorkflowEvent);
}

/// Cheap to clone; all clones publish to the same channels
#[derive(Clone)]
pub struct EventBus {
    channels: Arc<HashMap<EventTopic, broadcast::Sender<WorkflowEvent>>>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let channels = EventTopic::ALL
            .iter()
            .map(|topic| {
                let (tx, _rx) = broadcast::channel(capacity.max(1));
                (*topic, tx)
            })
            .collect();

        Self {
            channels: Arc::new(channels),
        }
    }

    pub fn subscribe(&self, topic: EventTopic) -> broadcast::Receiver<WorkflowEvent> {
        self.sender(topic).subscribe()
    }

    /// Publish an event, returning how many subscribers will see it
    pub fn publish(&self, event: WorkflowEvent) -> usize {
        let topic = event.topic();
        match self.sender(topic).send(event) {
            Ok(receivers) => receivers,
            Err(_) => {
                debug!("No subscribers for topic '{topic}', event dropped");
                0
            }
        }
    }

    pub fn subscriber_count(&self, topic: EventTopic) -> usize {
        self.sender(topic).receiver_count()
    }

    /// Drive a subscriber from its own task until shutdown or the bus is dropped
    pub fn attach(
        &self,
        topic: EventTopic,
        subscriber: Arc<dyn EventSubscriber>,
        mut shutdown: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let mut receiver = self.subscribe(topic);

        tokio::spawn(async move {
            info!("Subscriber '{}' attached to '{topic}'", subscriber.name());
            loop {
                tokio::select! {
                    biased;
                    _ = shutdown.changed() => {
                        if *shutdown.borrow() {
                            break;
                        }
                    }
                    event = receiver.recv() => match event {
                        Ok(event) => subscriber.on_event(event).await,
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            warn!(
                                "Subscriber '{}' lagged on '{topic}', skipped {skipped} events",
                                subscriber.name()
                            );
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                    },
                }
            }
            info!("Subscriber '{}' detached from '{topic}'", subscriber.name());
        })
    }

    fn sender(&self, topic: EventTopic) -> &broadcast::Sender<WorkflowEvent> {
        // every topic is created in `new`
        &self.channels[&topic]
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    fn milestone(key: &str) -> WorkflowEvent {
        WorkflowEvent::DependencyMilestone(DependencyMilestone {
            key: key.to_string(),
            milestone: BreakerMilestone::Opened,
            failure_count: 3,
        })
    }

    #[tokio::test]
    async fn test_publish_without_subscribers() {
        let bus = EventBus::new(4);
        assert_eq!(bus.publish(milestone("analytics")), 0);
    }

    #[tokio::test]
    async fn test_topics_are_isolated() {
        let bus = EventBus::new(4);
        let mut milestones = bus.subscribe(EventTopic::DependencyMilestone);
        let mut failures = bus.subscribe(EventTopic::OperationFailed);

        assert_eq!(bus.publish(milestone("analytics")), 1);

        match milestones.recv().await.unwrap() {
            WorkflowEvent::DependencyMilestone(m) => assert_eq!(m.key, "analytics"),
            other => panic!("unexpected event {other:?}"),
        }
        assert!(failures.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_slow_subscriber_lags_instead_of_blocking() {
        let bus = EventBus::new(2);
        let mut receiver = bus.subscribe(EventTopic::DependencyMilestone);

        for i in 0..5 {
            bus.publish(milestone(&format!("dep-{i}")));
        }

        assert!(matches!(
            receiver.recv().await,
            Err(broadcast::error::RecvError::Lagged(3))
        ));
        match receiver.recv().await.unwrap() {
            WorkflowEvent::DependencyMilestone(m) => assert_eq!(m.key, "dep-3"),
            other => panic!("unexpected event {other:?}"),
        }
    }

    struct Collector {
        keys: Mutex<Vec<String>>,
    }

    #[async_trait]
    impl EventSubscriber for Collector {
        fn name(&self) -> &str {
            "collector"
        }

        async fn on_event(&self, event: WorkflowEvent) {
            if let WorkflowEvent::DependencyMilestone(m) = event {
                self.keys.lock().unwrap().push(m.key);
            }
        }
    }

    #[tokio::test]
    async fn test_attached_subscriber_stops_on_shutdown() {
        let bus = EventBus::new(8);
        let collector = Arc::new(Collector {
            keys: Mutex::new(Vec::new()),
        });
        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handle = bus.attach(
            EventTopic::DependencyMilestone,
            collector.clone(),
            shutdown_rx,
        );

        bus.publish(milestone("certification"));
        for _ in 0..50 {
            if !collector.keys.lock().unwrap().is_empty() {
                break;
            }
            tokio::task::yield_now().await;
        }

        shutdown_tx.send(true).unwrap();
        handle.await.unwrap();
        assert_eq!(*collector.keys.lock().unwrap(), vec!["certification"]);
    }
}
