//! Device side of the gate remote.
//!
//! Listens for commands on `gate/control`, presses the matching actuator
//! button, answers on the requester's response topic, and publishes a
//! periodic heartbeat on `gate/status`. Optionally serves the signed HTTP
//! control API as well.

pub mod actuator;
pub mod device;
pub mod handler;
pub mod heartbeat;
pub mod http_api;

pub use actuator::{Actuator, ActuatorError, MockActuator};
pub use device::{DeviceConfig, DeviceError, GateDevice};
pub use handler::CommandHandler;
pub use heartbeat::heartbeat_message;
pub use http_api::{HttpApi, HttpApiConfig};
