//! ActionExecutor - performs publications after the lock is released

use std::sync::Arc;

use tracing::debug;

use super::action::Action;
use super::sequencer::DataHandoffSequencer;
use crate::transport::Publisher;

#[derive(Clone)]
pub struct ActionExecutor {
    publisher: Publisher,
    sequencer: Arc<DataHandoffSequencer>,
}

impl ActionExecutor {
    pub fn new(publisher: Publisher, sequencer: Arc<DataHandoffSequencer>) -> Self {
        Self { publisher, sequencer }
    }

    pub async fn execute(&self, action: Action) {
        match action {
            Action::Publish(msg) => {
                // failures are logged by the publisher and never retried here
                if let Err(e) = self.publisher.publish(&msg).await {
                    debug!(kind = msg.kind(), error = %e, "ActionExecutor::execute: publish dropped");
                }
            }
            Action::SendHandoff(req) => {
                self.sequencer.send(req).await;
            }
        }
    }

    /// Run `actions` in order on a task of their own so the caller never waits on I/O
    pub fn spawn(&self, actions: Vec<Action>) {
        if actions.is_empty() {
            return;
        }
        let this = self.clone();
        tokio::spawn(async move {
            for action in actions {
                this.execute(action).await;
            }
        });
    }
}
