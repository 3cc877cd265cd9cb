//! Session façade combining the servo cache with the server connection
//!
//! Every discrete operation updates the local cache first and then sends the
//! matching frames, always carrying the clamped values from the cache rather
//! than the caller's raw input. When a send fails the cache keeps the change,
//! so it may now disagree with the server. The caller decides whether to
//! [`RcClient::rebuild`] or to disconnect; nothing here reconnects or
//! rebuilds on its own.

use crate::config::{ClientConfig, ControlPins};
use crate::connection::{Connection, SharedConnection};
use crate::dispatcher::Dispatcher;
use crate::error::RcError;
use crate::registry::{Channel, ServoRegistry};
use crate::servo::ServoConfig;
use log::{debug, info, warn};
use shared::{Instruction, Message};
use std::sync::Arc;
use std::time::Duration;

#[derive(Debug)]
pub struct RcClient {
    connection: SharedConnection,
    servos: ServoRegistry,
    dispatcher: Option<Dispatcher>,
}

impl RcClient {
    pub fn new() -> Self {
        Self::with_connection(Connection::new())
    }

    /// Uses an existing, possibly already authenticated, connection
    pub fn with_connection(connection: Connection) -> Self {
        Self {
            connection: connection.shared(),
            servos: ServoRegistry::new(),
            dispatcher: None,
        }
    }

    /// Connects, pushes the server timeout and starts the dispatcher as configured
    ///
    /// If a step after the handshake fails, the session is closed again
    /// before the error is returned.
    pub async fn connect(&mut self, config: &ClientConfig) -> Result<(), RcError> {
        self.connection
            .lock()
            .await
            .connect(
                &config.address,
                config.port,
                config.password.as_deref(),
                config.connect_timeout,
            )
            .await?;

        if let Err(e) = self.configure_session(config).await {
            warn!("Session setup failed, disconnecting: {}", e);
            self.disconnect().await;
            return Err(e);
        }

        Ok(())
    }

    async fn configure_session(&mut self, config: &ClientConfig) -> Result<(), RcError> {
        if let Some(timeout) = config.server_timeout {
            self.set_server_timeout(timeout).await?;
        }

        if let Some(pins) = config.control_pins {
            self.start_dispatcher(pins, config.keep_alive).await?;
        }

        Ok(())
    }

    pub async fn is_connected(&self) -> bool {
        self.connection.lock().await.is_connected()
    }

    /// Handle to the underlying connection, e.g. for a custom dispatcher
    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.connection)
    }

    pub async fn start_dispatcher(
        &mut self,
        pins: ControlPins,
        keep_alive: Duration,
    ) -> Result<&Dispatcher, RcError> {
        if self.dispatcher.is_some() {
            return Err(RcError::IllegalState("control dispatcher already running"));
        }
        if !self.is_connected().await {
            return Err(RcError::IllegalState("not connected"));
        }

        let dispatcher = self
            .dispatcher
            .insert(Dispatcher::start(self.connection(), pins, keep_alive));
        Ok(&*dispatcher)
    }

    pub fn dispatcher(&self) -> Option<&Dispatcher> {
        self.dispatcher.as_ref()
    }

    /// Waits for the dispatcher to exit; no-op when none is running
    pub async fn stop_dispatcher(&mut self) {
        if let Some(dispatcher) = self.dispatcher.take() {
            dispatcher.stop().await;
        }
    }

    /// Stops the dispatcher, then releases the connection
    pub async fn disconnect(&mut self) {
        self.stop_dispatcher().await;
        self.connection.lock().await.close().await;
    }

    /// Tells the server the session is over before disconnecting
    pub async fn quit(&mut self) {
        self.stop_dispatcher().await;

        let mut connection = self.connection.lock().await;
        if let Err(e) = connection.send(&Message::new(Instruction::Quit)).await {
            debug!("Could not deliver QUIT: {}", e);
        }
        connection.close().await;
    }

    pub async fn add_servo(&mut self, channel: Channel, config: ServoConfig) -> Result<(), RcError> {
        self.servos.add(channel, config);

        self.send_all(&[
            Message::with_param(Instruction::AddServo, channel),
            Message::with_float(Instruction::SetMinWidth, channel, config.min_width()),
            Message::with_float(Instruction::SetMaxWidth, channel, config.max_width()),
            Message::with_float(Instruction::SetSteering, channel, config.steering()),
        ])
        .await
    }

    /// Adds a servo with the server's default settings
    pub async fn add_default_servo(&mut self, channel: Channel) -> Result<(), RcError> {
        self.servos.add(channel, ServoConfig::default());
        self.send(Message::with_param(Instruction::AddServo, channel))
            .await
    }

    /// Returns false without sending anything when the channel is unknown
    pub async fn remove_servo(&mut self, channel: Channel) -> Result<bool, RcError> {
        if self.servos.remove(channel).is_none() {
            debug!("Ignoring removal of unknown channel {}", channel);
            return Ok(false);
        }

        self.send(Message::with_params(Instruction::RmServo, channel, 0))
            .await?;
        Ok(true)
    }

    pub async fn set_steering(
        &mut self,
        channel: Channel,
        steering: f32,
    ) -> Result<Option<ServoConfig>, RcError> {
        self.update_and_send(
            channel,
            Instruction::SetSteering,
            |servo| servo.set_steering(steering),
            ServoConfig::steering,
        )
        .await
    }

    pub async fn set_min_width(
        &mut self,
        channel: Channel,
        min_width_us: f32,
    ) -> Result<Option<ServoConfig>, RcError> {
        self.update_and_send(
            channel,
            Instruction::SetMinWidth,
            |servo| servo.set_min_width(min_width_us),
            ServoConfig::min_width,
        )
        .await
    }

    pub async fn set_max_width(
        &mut self,
        channel: Channel,
        max_width_us: f32,
    ) -> Result<Option<ServoConfig>, RcError> {
        self.update_and_send(
            channel,
            Instruction::SetMaxWidth,
            |servo| servo.set_max_width(max_width_us),
            ServoConfig::max_width,
        )
        .await
    }

    /// Sets the position the server falls back to when the link goes quiet
    pub async fn set_default_steering(
        &mut self,
        channel: Channel,
        idle_steering: f32,
    ) -> Result<Option<ServoConfig>, RcError> {
        self.update_and_send(
            channel,
            Instruction::SetDefaultSteering,
            |servo| servo.set_idle_steering(idle_steering),
            ServoConfig::idle_steering,
        )
        .await
    }

    pub async fn set_smoothing(
        &mut self,
        channel: Channel,
        smoothing: f32,
    ) -> Result<Option<ServoConfig>, RcError> {
        self.update_and_send(
            channel,
            Instruction::SetSmoothing,
            |servo| servo.set_smoothing(smoothing),
            ServoConfig::smoothing,
        )
        .await
    }

    async fn update_and_send<F>(
        &mut self,
        channel: Channel,
        instruction: Instruction,
        mutator: F,
        value: fn(&ServoConfig) -> f32,
    ) -> Result<Option<ServoConfig>, RcError>
    where
        F: FnOnce(&mut ServoConfig),
    {
        let Some(config) = self.servos.update(channel, mutator) else {
            debug!("Ignoring {:?} for unknown channel {}", instruction, channel);
            return Ok(None);
        };

        self.send(Message::with_float(instruction, channel, value(&config)))
            .await?;
        Ok(Some(config))
    }

    /// Changes how long the server waits for traffic before idling the servos
    pub async fn set_server_timeout(&self, timeout: Duration) -> Result<(), RcError> {
        let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
        self.send(Message::with_param(Instruction::SetTimeout, millis))
            .await
    }

    /// Removes every servo on both sides; the cache is kept if RESET fails
    pub async fn reset(&mut self) -> Result<(), RcError> {
        self.send(Message::new(Instruction::Reset)).await?;
        self.servos.clear();
        Ok(())
    }

    /// Resets the server and replays the full cached state
    ///
    /// Channel order follows the cache and is unspecified; the six frames for
    /// one channel always go out together and in a fixed order.
    pub async fn rebuild(&mut self) -> Result<(), RcError> {
        let mut messages = Vec::with_capacity(1 + self.servos.len() * 6);
        messages.push(Message::new(Instruction::Reset));

        for (channel, servo) in self.servos.iter() {
            messages.extend([
                Message::with_param(Instruction::AddServo, channel),
                Message::with_float(Instruction::SetMinWidth, channel, servo.min_width()),
                Message::with_float(Instruction::SetMaxWidth, channel, servo.max_width()),
                Message::with_float(Instruction::SetSteering, channel, servo.steering()),
                Message::with_float(
                    Instruction::SetDefaultSteering,
                    channel,
                    servo.idle_steering(),
                ),
                Message::with_float(Instruction::SetSmoothing, channel, servo.smoothing()),
            ]);
        }

        info!("Rebuilding server state for {} servos", self.servos.len());
        self.send_all(&messages).await
    }

    pub fn servo(&self, channel: Channel) -> Option<ServoConfig> {
        self.servos.get(channel).copied()
    }

    pub fn servo_count(&self) -> usize {
        self.servos.len()
    }

    pub fn servos(&self) -> &ServoRegistry {
        &self.servos
    }

    async fn send(&self, message: Message) -> Result<(), RcError> {
        self.connection.lock().await.send(&message).await
    }

    /// Holds the connection for the whole batch so dispatcher frames stay out of it
    async fn send_all(&self, messages: &[Message]) -> Result<(), RcError> {
        let mut connection = self.connection.lock().await;
        for message in messages {
            connection.send(message).await?;
        }
        Ok(())
    }
}

impl Default for RcClient {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{connected_pair, drain_frames};
    use assert_approx_eq::assert_approx_eq;
    use tokio::io::DuplexStream;

    async fn connected_client() -> (RcClient, DuplexStream) {
        let (connection, server_end) = connected_pair().await;
        (RcClient::with_connection(connection), server_end)
    }

    /// Loopback server that accepts `sessions` clients and approves each handshake
    async fn approving_server(sessions: usize) -> u16 {
        use tokio::io::{AsyncReadExt, AsyncWriteExt};
        use tokio::net::TcpListener;

        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let port = listener.local_addr().unwrap().port();
        let success = shared::encode(&Message::new(Instruction::Success)).unwrap();

        tokio::spawn(async move {
            let mut streams = Vec::new();
            for _ in 0..sessions {
                let (mut stream, _) = listener.accept().await.unwrap();
                let mut auth = [0u8; shared::FRAME_LEN];
                stream.read_exact(&mut auth).await.unwrap();
                stream.write_all(&success).await.unwrap();
                stream.write_all(&success).await.unwrap();
                streams.push(stream);
            }
            // keep every session open until the test runtime shuts down
            std::future::pending::<()>().await;
        });

        port
    }

    async fn finish(mut client: RcClient, mut server_end: DuplexStream) -> Vec<Message> {
        client.disconnect().await;
        drain_frames(&mut server_end).await
    }

    fn instructions(frames: &[Message]) -> Vec<Instruction> {
        frames.iter().map(|frame| frame.instruction).collect()
    }

    #[tokio::test]
    async fn test_add_servo_sends_four_frames_in_order() {
        let (mut client, server_end) = connected_client().await;
        let config = ServoConfig::new(0.25, 900.0, 2100.0, 0.5);

        client.add_servo(3, config).await.unwrap();
        assert_eq!(client.servo(3), Some(config));

        let frames = finish(client, server_end).await;
        assert_eq!(
            instructions(&frames),
            vec![
                Instruction::AddServo,
                Instruction::SetMinWidth,
                Instruction::SetMaxWidth,
                Instruction::SetSteering,
            ]
        );
        assert!(frames.iter().all(|frame| frame.param1 == 3));
        assert_eq!(frames[0].param2, 0);
        assert_approx_eq!(frames[1].float_param(), 900.0, 0.001);
        assert_approx_eq!(frames[2].float_param(), 2100.0, 0.001);
        assert_approx_eq!(frames[3].float_param(), 0.25, f32::EPSILON);
    }

    #[tokio::test]
    async fn test_setter_sends_clamped_value() {
        let (mut client, server_end) = connected_client().await;
        client.add_default_servo(5).await.unwrap();

        let updated = client.set_steering(5, 1.8).await.unwrap().unwrap();
        assert_eq!(updated.steering(), 1.0);

        let updated = client.set_default_steering(5, -2.0).await.unwrap().unwrap();
        assert_eq!(updated.idle_steering(), 0.0);

        let frames = finish(client, server_end).await;
        assert_eq!(
            instructions(&frames),
            vec![
                Instruction::AddServo,
                Instruction::SetSteering,
                Instruction::SetDefaultSteering,
            ]
        );
        assert_eq!(frames[1].float_param(), 1.0);
        assert_eq!(frames[2].float_param(), 0.0);
    }

    #[tokio::test]
    async fn test_width_setters_keep_invariant() {
        let (mut client, server_end) = connected_client().await;
        client.add_default_servo(1).await.unwrap();

        let updated = client.set_min_width(1, 2500.0).await.unwrap().unwrap();
        assert_eq!(updated.min_width(), 2500.0);
        assert_eq!(updated.max_width(), 2501.0);

        let updated = client.set_max_width(1, 100.0).await.unwrap().unwrap();
        assert_eq!(updated.max_width(), 100.0);
        assert_eq!(updated.min_width(), 99.0);

        let frames = finish(client, server_end).await;
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[1].instruction, Instruction::SetMinWidth);
        assert_eq!(frames[1].float_param(), 2500.0);
        assert_eq!(frames[2].instruction, Instruction::SetMaxWidth);
        assert_eq!(frames[2].float_param(), 100.0);
    }

    #[tokio::test]
    async fn test_unknown_channel_setters_are_noops() {
        let (mut client, server_end) = connected_client().await;

        assert!(client.set_steering(9, 0.5).await.unwrap().is_none());
        assert!(client.set_min_width(9, 900.0).await.unwrap().is_none());
        assert!(client.set_max_width(9, 2100.0).await.unwrap().is_none());
        assert!(client.set_default_steering(9, 0.5).await.unwrap().is_none());
        assert!(client.set_smoothing(9, 0.2).await.unwrap().is_none());
        assert!(!client.remove_servo(9).await.unwrap());

        assert!(client.servo(9).is_none());
        assert_eq!(client.servo_count(), 0);
        assert!(finish(client, server_end).await.is_empty());
    }

    #[tokio::test]
    async fn test_remove_servo() {
        let (mut client, server_end) = connected_client().await;
        client.add_default_servo(2).await.unwrap();

        assert!(client.remove_servo(2).await.unwrap());
        assert!(client.servo(2).is_none());

        let frames = finish(client, server_end).await;
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1], Message::with_params(Instruction::RmServo, 2, 0));
    }

    #[tokio::test]
    async fn test_smoothing_is_sent_as_stored() {
        let (mut client, server_end) = connected_client().await;
        client.add_default_servo(2).await.unwrap();

        let updated = client.set_smoothing(2, 0.35).await.unwrap().unwrap();
        assert_eq!(updated.smoothing(), 0.35);

        let frames = finish(client, server_end).await;
        assert_eq!(frames[1].instruction, Instruction::SetSmoothing);
        assert_eq!(frames[1].float_param(), 0.35);
    }

    #[tokio::test]
    async fn test_reset_clears_cache() {
        let (mut client, server_end) = connected_client().await;
        client.add_default_servo(1).await.unwrap();
        client.add_default_servo(2).await.unwrap();

        client.reset().await.unwrap();
        assert_eq!(client.servo_count(), 0);

        let frames = finish(client, server_end).await;
        assert_eq!(frames.last(), Some(&Message::new(Instruction::Reset)));
    }

    #[tokio::test]
    async fn test_rebuild_replays_every_channel() {
        let (mut client, server_end) = connected_client().await;
        let cfg_a = ServoConfig::new(0.1, 1100.0, 1900.0, 0.4);
        let cfg_b = ServoConfig::new(0.9, 800.0, 2200.0, 0.6);
        client.add_servo(3, cfg_a).await.unwrap();
        client.add_servo(7, cfg_b).await.unwrap();
        client.set_smoothing(7, 0.5).await.unwrap();

        client.rebuild().await.unwrap();

        let frames = finish(client, server_end).await;
        // 4 + 4 frames from add_servo, 1 from set_smoothing
        let rebuild = &frames[9..];
        assert_eq!(rebuild.len(), 13);
        assert_eq!(rebuild[0], Message::new(Instruction::Reset));

        let expected_order = [
            Instruction::AddServo,
            Instruction::SetMinWidth,
            Instruction::SetMaxWidth,
            Instruction::SetSteering,
            Instruction::SetDefaultSteering,
            Instruction::SetSmoothing,
        ];
        let mut seen = Vec::new();
        for block in rebuild[1..].chunks(6) {
            let channel = block[0].param1;
            assert!(block.iter().all(|frame| frame.param1 == channel));
            assert_eq!(instructions(block), expected_order.to_vec());

            let config = if channel == 3 { cfg_a } else { cfg_b };
            assert_eq!(block[1].float_param(), config.min_width());
            assert_eq!(block[2].float_param(), config.max_width());
            assert_eq!(block[3].float_param(), config.steering());
            assert_eq!(block[4].float_param(), config.idle_steering());
            seen.push(channel);
        }
        seen.sort();
        assert_eq!(seen, vec![3, 7]);

        let smoothing_7 = rebuild[1..]
            .iter()
            .find(|frame| frame.param1 == 7 && frame.instruction == Instruction::SetSmoothing)
            .unwrap();
        assert_eq!(smoothing_7.float_param(), 0.5);
    }

    #[tokio::test]
    async fn test_rebuild_with_empty_cache_sends_reset_only() {
        let (mut client, server_end) = connected_client().await;
        client.rebuild().await.unwrap();

        let frames = finish(client, server_end).await;
        assert_eq!(frames, vec![Message::new(Instruction::Reset)]);
    }

    #[tokio::test]
    async fn test_failed_send_leaves_cache_mutated() {
        let mut client = RcClient::new();

        let result = client.add_servo(4, ServoConfig::default()).await;
        assert!(matches!(result, Err(RcError::IllegalState(_))));
        assert!(client.servo(4).is_some());

        let result = client.set_steering(4, 0.8).await;
        assert!(matches!(result, Err(RcError::IllegalState(_))));
        assert_eq!(client.servo(4).unwrap().steering(), 0.8);
    }

    #[tokio::test]
    async fn test_failed_reset_keeps_cache() {
        let mut client = RcClient::new();
        let _ = client.add_servo(4, ServoConfig::default()).await;

        assert!(client.reset().await.is_err());
        assert_eq!(client.servo_count(), 1);
    }

    #[tokio::test]
    async fn test_server_timeout_frame() {
        let (client, server_end) = connected_client().await;
        client
            .set_server_timeout(Duration::from_millis(750))
            .await
            .unwrap();

        let frames = finish(client, server_end).await;
        assert_eq!(
            frames,
            vec![Message::with_param(Instruction::SetTimeout, 750)]
        );
    }

    #[tokio::test]
    async fn test_dispatcher_requires_connection() {
        let mut client = RcClient::new();
        let pins = ControlPins {
            steering: 1,
            throttle: 2,
        };

        let result = client.start_dispatcher(pins, Duration::from_millis(200)).await;
        assert!(matches!(result, Err(RcError::IllegalState(_))));
        assert!(client.dispatcher().is_none());
    }

    #[tokio::test]
    async fn test_dispatcher_lifecycle() {
        let (mut client, server_end) = connected_client().await;
        let pins = ControlPins {
            steering: 1,
            throttle: 2,
        };

        client
            .start_dispatcher(pins, Duration::from_secs(10))
            .await
            .unwrap()
            .set_throttle(0.6);
        assert!(client
            .start_dispatcher(pins, Duration::from_secs(10))
            .await
            .is_err());

        tokio::time::sleep(Duration::from_millis(50)).await;

        let frames = finish(client, server_end).await;
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].param1, 2);
        assert_approx_eq!(frames[0].float_param(), 0.6, f32::EPSILON);
    }

    #[tokio::test]
    async fn test_quit_sends_quit_and_closes() {
        let (mut client, server_end) = connected_client().await;
        client.quit().await;
        assert!(!client.is_connected().await);

        let frames = finish(client, server_end).await;
        assert_eq!(frames, vec![Message::new(Instruction::Quit)]);
    }

    #[tokio::test]
    async fn test_failed_session_setup_closes_connection() {
        let port = approving_server(2).await;
        let (connection, _server_end) = connected_pair().await;
        let mut client = RcClient::with_connection(connection);
        let pins = ControlPins {
            steering: 0,
            throttle: 1,
        };

        // a dispatcher left over from an earlier session blocks the new one
        client
            .start_dispatcher(pins, Duration::from_secs(10))
            .await
            .unwrap();
        client.connection().lock().await.close().await;

        let config = ClientConfig::new("127.0.0.1", port).with_control_pins(0, 1);
        let result = client.connect(&config).await;

        assert!(matches!(result, Err(RcError::IllegalState(_))));
        assert!(!client.is_connected().await);
        assert!(client.dispatcher().is_none());

        client.connect(&config).await.unwrap();
        assert!(client.is_connected().await);
        assert!(client.dispatcher().is_some());
        client.disconnect().await;
    }
}
