//! Background task forwarding continuous steering and throttle input
//!
//! Input arrives at UI-event rate, far faster than the server needs it. The
//! producer side only records the latest value per channel, so the setters
//! never wait on the network. The worker forwards whatever is newest and
//! emits KEEP_ALIVE whenever a full keep-alive interval passes without input,
//! satisfying the server's liveness timeout.

use crate::config::ControlPins;
use crate::connection::SharedConnection;
use crate::servo::DEFAULT_STEERING;
use log::{debug, info, warn};
use shared::{Instruction, Message};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{oneshot, watch};
use tokio::task::JoinHandle;
use tokio::time::sleep;

/// Handle to a running control worker
///
/// Dropping the handle also ends the worker, but only [`Dispatcher::stop`]
/// waits for it to exit.
#[derive(Debug)]
pub struct Dispatcher {
    pins: ControlPins,
    steering_tx: watch::Sender<f32>,
    throttle_tx: watch::Sender<f32>,
    keep_alive_ms: Arc<AtomicU64>,
    stop_tx: Option<oneshot::Sender<()>>,
    worker: Option<JoinHandle<()>>,
}

impl Dispatcher {
    /// Spawns the worker on the current tokio runtime
    pub fn start(connection: SharedConnection, pins: ControlPins, keep_alive: Duration) -> Self {
        let (steering_tx, steering_rx) = watch::channel(DEFAULT_STEERING);
        let (throttle_tx, throttle_rx) = watch::channel(DEFAULT_STEERING);
        let (stop_tx, stop_rx) = oneshot::channel();
        let keep_alive_ms = Arc::new(AtomicU64::new(keep_alive_millis(keep_alive)));

        let worker = ControlWorker {
            connection,
            pins,
            steering_rx,
            throttle_rx,
            keep_alive_ms: Arc::clone(&keep_alive_ms),
            stop_rx,
            link_failing: false,
        };

        info!(
            "Starting control dispatcher (steering pin {}, throttle pin {}, keep-alive {:?})",
            pins.steering, pins.throttle, keep_alive
        );
        let worker = tokio::spawn(worker.run());

        Self {
            pins,
            steering_tx,
            throttle_tx,
            keep_alive_ms,
            stop_tx: Some(stop_tx),
            worker: Some(worker),
        }
    }

    /// Records the latest steering value in [0, 1]; never blocks
    pub fn set_steering(&self, value: f32) {
        if let Some(value) = control_value(value) {
            self.steering_tx.send_replace(value);
        }
    }

    /// Records the latest throttle value in [0, 1]; never blocks
    pub fn set_throttle(&self, value: f32) {
        if let Some(value) = control_value(value) {
            self.throttle_tx.send_replace(value);
        }
    }

    /// Takes effect from the next wait onwards
    pub fn set_keep_alive_timeout(&self, timeout: Duration) {
        self.keep_alive_ms
            .store(keep_alive_millis(timeout), Ordering::Relaxed);
    }

    pub fn keep_alive_timeout(&self) -> Duration {
        Duration::from_millis(self.keep_alive_ms.load(Ordering::Relaxed))
    }

    pub fn pins(&self) -> ControlPins {
        self.pins
    }

    pub fn is_running(&self) -> bool {
        self.worker
            .as_ref()
            .map_or(false, |worker| !worker.is_finished())
    }

    /// Signals the worker and waits until it has exited
    pub async fn stop(mut self) {
        if let Some(stop_tx) = self.stop_tx.take() {
            let _ = stop_tx.send(());
        }

        if let Some(worker) = self.worker.take() {
            if let Err(e) = worker.await {
                warn!("Control dispatcher exited abnormally: {}", e);
            }
        }
        info!("Control dispatcher stopped");
    }
}

fn control_value(value: f32) -> Option<f32> {
    if value.is_nan() {
        None
    } else {
        Some(value.clamp(0.0, 1.0))
    }
}

fn keep_alive_millis(timeout: Duration) -> u64 {
    u64::try_from(timeout.as_millis()).unwrap_or(u64::MAX).max(1)
}

struct ControlWorker {
    connection: SharedConnection,
    pins: ControlPins,
    steering_rx: watch::Receiver<f32>,
    throttle_rx: watch::Receiver<f32>,
    keep_alive_ms: Arc<AtomicU64>,
    stop_rx: oneshot::Receiver<()>,
    link_failing: bool,
}

impl ControlWorker {
    async fn run(mut self) {
        loop {
            let keep_alive = Duration::from_millis(self.keep_alive_ms.load(Ordering::Relaxed));

            let message = tokio::select! {
                _ = &mut self.stop_rx => break,
                changed = self.steering_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    let value = *self.steering_rx.borrow_and_update();
                    Message::with_float(Instruction::SetSteering, self.pins.steering, value)
                }
                changed = self.throttle_rx.changed() => {
                    if changed.is_err() {
                        break;
                    }
                    // throttle is driven like any other steering channel
                    let value = *self.throttle_rx.borrow_and_update();
                    Message::with_float(Instruction::SetSteering, self.pins.throttle, value)
                }
                _ = sleep(keep_alive) => Message::new(Instruction::KeepAlive),
            };

            self.dispatch(&message).await;
        }
        debug!("Control worker exiting");
    }

    /// Send failures are dropped; the next tick tries again
    async fn dispatch(&mut self, message: &Message) {
        let result = self.connection.lock().await.send(message).await;

        match result {
            Ok(()) => {
                if self.link_failing {
                    info!("Control frames are being delivered again");
                }
                self.link_failing = false;
            }
            Err(e) => {
                if self.link_failing {
                    debug!("Dropped {:?} frame: {}", message.instruction, e);
                } else {
                    warn!("Dropping control frames: {}", e);
                }
                self.link_failing = true;
            }
        }
    }
}
