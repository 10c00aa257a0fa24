use async_trait::async_trait;
use serde::Serialize;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

/// Progress notification, one per reasoning step.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum AgentEvent {
    /// The model picked a tool and the observation came back.
    ToolStep {
        step: usize,
        thought: String,
        tool: String,
        input: String,
        observation: String,
    },
    /// The model output could not be read; the hint was fed back to it.
    ParseError {
        step: usize,
        output: String,
        observation: String,
    },
    Finish {
        step: usize,
        thought: String,
        answer: String,
    },
    IterationLimit { steps: usize },
}

#[async_trait]
pub trait AgentObserver: Send + Sync {
    async fn on_event(&self, event: &AgentEvent);
}

pub struct NoopObserver;

#[async_trait]
impl AgentObserver for NoopObserver {
    async fn on_event(&self, _event: &AgentEvent) {}
}

/// Writes each step to the `tracing` subscriber.
pub struct TracingObserver;

#[async_trait]
impl AgentObserver for TracingObserver {
    async fn on_event(&self, event: &AgentEvent) {
        match event {
            AgentEvent::ToolStep {
                step, tool, input, ..
            } => info!(step, %tool, %input, "tool step"),
            AgentEvent::ParseError { step, observation, .. } => {
                warn!(step, %observation, "unparseable model output")
            }
            AgentEvent::Finish { step, .. } => info!(step, "final answer"),
            AgentEvent::IterationLimit { steps } => warn!(steps, "iteration limit reached"),
        }
    }
}

/// Forwards events to a channel, e.g. the SSE stream of the browser that asked.
#[async_trait]
impl AgentObserver for mpsc::UnboundedSender<AgentEvent> {
    async fn on_event(&self, event: &AgentEvent) {
        if self.send(event.clone()).is_err() {
            debug!("progress receiver dropped");
        }
    }
}

#[async_trait]
impl<A, B> AgentObserver for (A, B)
where
    A: AgentObserver,
    B: AgentObserver,
{
    async fn on_event(&self, event: &AgentEvent) {
        self.0.on_event(event).await;
        self.1.on_event(event).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn pair_notifies_both() {
        let (first, mut first_rx) = mpsc::unbounded_channel();
        let (second, mut second_rx) = mpsc::unbounded_channel();
        let pair = (first, second);
        pair.on_event(&AgentEvent::IterationLimit { steps: 1 }).await;
        assert!(first_rx.recv().await.is_some());
        assert!(second_rx.recv().await.is_some());
    }

    #[tokio::test]
    async fn channel_observer_forwards_events() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        tx.on_event(&AgentEvent::IterationLimit { steps: 3 }).await;
        assert_eq!(rx.recv().await, Some(AgentEvent::IterationLimit { steps: 3 }));

        drop(rx);
        tx.on_event(&AgentEvent::IterationLimit { steps: 4 }).await;
    }

    #[test]
    fn events_serialize_with_type_tag() {
        let json = serde_json::to_value(AgentEvent::Finish {
            step: 2,
            thought: "I now know the final answer".into(),
            answer: "Paris".into(),
        })
        .unwrap();
        assert_eq!(json["type"], "finish");
        assert_eq!(json["answer"], "Paris");
    }
}
