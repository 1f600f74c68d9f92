//! Gate button actuation.

use std::sync::Mutex;
use std::time::Duration;

use async_trait::async_trait;
use tracing::info;

use gate_protocol::GateAction;

/// How long a button is held.
pub const DEFAULT_PRESS_DURATION: Duration = Duration::from_secs(1);

/// Errors from the actuator hardware.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ActuatorError {
    #[error("GPIO error: {0}")]
    Gpio(String),

    #[error("actuator unavailable")]
    Unavailable,
}

/// Drives the gate controller's buttons.
#[async_trait]
pub trait Actuator: Send + Sync {
    /// Presses and releases the button for `action`.
    async fn press(&self, action: GateAction) -> Result<(), ActuatorError>;
}

/// Actuator without hardware: logs and records each press.
#[derive(Debug)]
pub struct MockActuator {
    press_duration: Duration,
    presses: Mutex<Vec<GateAction>>,
    failure: Mutex<Option<ActuatorError>>,
}

impl Default for MockActuator {
    fn default() -> Self {
        Self::new(DEFAULT_PRESS_DURATION)
    }
}

impl MockActuator {
    pub fn new(press_duration: Duration) -> Self {
        Self {
            press_duration,
            presses: Mutex::new(Vec::new()),
            failure: Mutex::new(None),
        }
    }

    /// Makes every following press fail with `err`. `None` restores success.
    pub fn fail_with(&self, err: Option<ActuatorError>) {
        *self.failure.lock().unwrap_or_else(|e| e.into_inner()) = err;
    }

    /// Buttons pressed so far, in order.
    pub fn presses(&self) -> Vec<GateAction> {
        self.presses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone()
    }
}

#[async_trait]
impl Actuator for MockActuator {
    async fn press(&self, action: GateAction) -> Result<(), ActuatorError> {
        let failure = self
            .failure
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .clone();
        if let Some(err) = failure {
            return Err(err);
        }

        info!(%action, "mock: pressing button");
        tokio::time::sleep(self.press_duration).await;
        self.presses
            .lock()
            .unwrap_or_else(|e| e.into_inner())
            .push(action);
        info!(%action, "mock: released button");
        Ok(())
    }
}
