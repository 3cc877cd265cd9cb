use crate::registry::Channel;
use shared::{DEFAULT_CONNECT_TIMEOUT_MS, DEFAULT_KEEP_ALIVE_MS};
use std::time::Duration;

/// Pins driven continuously by the control dispatcher
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ControlPins {
    pub steering: Channel,
    pub throttle: Channel,
}

/// Everything needed to open a session with a servo server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub address: String,
    pub port: u16,
    pub password: Option<Vec<u8>>,
    /// `None` waits for the socket connect indefinitely
    pub connect_timeout: Option<Duration>,
    pub keep_alive: Duration,
    /// Starts the control dispatcher on connect when set
    pub control_pins: Option<ControlPins>,
    /// Liveness window pushed to the server with SET_TIMEOUT after connecting
    pub server_timeout: Option<Duration>,
}

impl ClientConfig {
    pub fn new(address: impl Into<String>, port: u16) -> Self {
        Self {
            address: address.into(),
            port,
            password: None,
            connect_timeout: Some(Duration::from_millis(DEFAULT_CONNECT_TIMEOUT_MS)),
            keep_alive: Duration::from_millis(DEFAULT_KEEP_ALIVE_MS),
            control_pins: None,
            server_timeout: None,
        }
    }

    pub fn with_password(mut self, password: impl Into<Vec<u8>>) -> Self {
        let password = password.into();
        self.password = if password.is_empty() {
            None
        } else {
            Some(password)
        };
        self
    }

    pub fn with_control_pins(mut self, steering: Channel, throttle: Channel) -> Self {
        self.control_pins = Some(ControlPins { steering, throttle });
        self
    }
}
