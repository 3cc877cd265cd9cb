//! # RC Client Library
//!
//! Client side of the servo remote-control protocol. A single server drives
//! the physical servos; this library keeps a persistent, authenticated
//! connection to it and turns local intent (steering, throttle and servo
//! configuration changes) into fixed-size binary frames.
//!
//! ## Architecture Overview
//!
//! ### Servo State Cache
//! [`servo::ServoConfig`] models one output channel and enforces its limits
//! (steering in [0, 1], minimum pulse width below maximum).
//! [`registry::ServoRegistry`] maps channels to configs. It is the client's
//! belief about server state and may go stale after a network fault.
//!
//! ### Connection
//! [`connection::Connection`] owns the transport, runs the password
//! handshake and sends or receives single 12-byte frames. Commands are
//! fire-and-forget; the server only replies during the handshake.
//!
//! ### Control Dispatcher
//! [`dispatcher::Dispatcher`] is a background task for continuous input.
//! Setters only record the latest value per channel, the task forwards it
//! and sends keep-alives when input pauses. Send errors are swallowed so the
//! control stream survives dropped frames.
//!
//! ### Session Façade
//! [`rc_client::RcClient`] combines cache and connection: each servo
//! operation updates the cache, then sends the matching frames. After an
//! I/O error the caller either calls `rebuild()` to replay the cache onto a
//! freshly reset server, or disconnects.
//!
//! ## Usage Example
//!
//! ```rust,no_run
//! use client::config::ClientConfig;
//! use client::rc_client::RcClient;
//! use client::servo::ServoConfig;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let config = ClientConfig::new("192.168.0.10", 5000)
//!         .with_password("secret")
//!         .with_control_pins(17, 18);
//!
//!     let mut client = RcClient::new();
//!     client.connect(&config).await?;
//!     client.add_servo(17, ServoConfig::default()).await?;
//!     client.add_servo(18, ServoConfig::default()).await?;
//!
//!     if let Some(controls) = client.dispatcher() {
//!         controls.set_steering(0.3);
//!         controls.set_throttle(0.6);
//!     }
//!
//!     if let Err(e) = client.set_min_width(17, 950.0).await {
//!         log::warn!("servo update failed: {}", e);
//!         client.rebuild().await?;
//!     }
//!
//!     client.quit().await;
//!     Ok(())
//! }
//! ```

pub mod config;
pub mod connection;
pub mod dispatcher;
pub mod error;
pub mod input;
pub mod rc_client;
pub mod registry;
pub mod servo;

#[cfg(test)]
mod testing;
