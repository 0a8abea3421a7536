use serde::Serialize;
use tokio::sync::broadcast;

use crate::agent_engine::history::ActionHistory;
use crate::agent_engine::state::EngineState;
use crate::agent_engine::task::Task;
use crate::executor::safety::SafetyVerdict;

/// Progress notifications for observers (CLI, UI). Observers get owned snapshots.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    StateChanged { state: EngineState },
    StepStarted { step: u32 },
    StepRetrying { step: u32, attempt: u32, error: String },
    SafetyFlagged { step: u32, verdict: SafetyVerdict },
    StepRecorded { entry: ActionHistory },
    TaskUpdated { task: Task },
}

/// Fan-out channel. Publishing never blocks and never fails the publisher; slow
/// observers lag and lose old events.
#[derive(Clone)]
pub struct EventBus {
    tx: broadcast::Sender<EngineEvent>,
}

impl EventBus {
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity.max(1));
        Self { tx }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.tx.subscribe()
    }

    pub fn publish(&self, event: EngineEvent) {
        if self.tx.send(event).is_err() {
            tracing::trace!("engine event dropped: no subscribers");
        }
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new(100)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn subscribers_receive_published_events() {
        let bus = EventBus::default();
        let mut rx = bus.subscribe();
        bus.publish(EngineEvent::StepStarted { step: 1 });
        match rx.recv().await.unwrap() {
            EngineEvent::StepStarted { step } => assert_eq!(step, 1),
            other => panic!("unexpected event {other:?}"),
        }
    }

    #[test]
    fn publishing_without_subscribers_is_fine() {
        EventBus::new(4).publish(EngineEvent::StateChanged {
            state: EngineState::Idle,
        });
    }
}
