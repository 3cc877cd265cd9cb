//! Servo state cache keyed by channel
//!
//! The registry is the client's belief about what the server currently
//! drives. It performs no I/O; the session façade turns every change into
//! outbound messages. After a network fault the registry may disagree with
//! the server until it is replayed with a rebuild.

use crate::servo::ServoConfig;
use log::debug;
use std::collections::HashMap;

/// Integer pin identifying one servo output on the remote device
pub type Channel = i32;

#[derive(Debug, Default, Clone)]
pub struct ServoRegistry {
    servos: HashMap<Channel, ServoConfig>,
}

impl ServoRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Stores a config for the channel, returning the one it replaced
    pub fn add(&mut self, channel: Channel, config: ServoConfig) -> Option<ServoConfig> {
        let previous = self.servos.insert(channel, config);
        if previous.is_some() {
            debug!("Replaced cached config for channel {}", channel);
        }
        previous
    }

    pub fn remove(&mut self, channel: Channel) -> Option<ServoConfig> {
        self.servos.remove(&channel)
    }

    pub fn get(&self, channel: Channel) -> Option<&ServoConfig> {
        self.servos.get(&channel)
    }

    pub fn contains(&self, channel: Channel) -> bool {
        self.servos.contains_key(&channel)
    }

    /// Applies `mutator` to a known channel and returns the resulting config
    ///
    /// Unknown channels are left absent; the mutator is not called.
    pub fn update<F>(&mut self, channel: Channel, mutator: F) -> Option<ServoConfig>
    where
        F: FnOnce(&mut ServoConfig),
    {
        let config = self.servos.get_mut(&channel)?;
        mutator(config);
        Some(*config)
    }

    pub fn clear(&mut self) {
        self.servos.clear();
    }

    pub fn iter(&self) -> impl Iterator<Item = (Channel, &ServoConfig)> {
        self.servos.iter().map(|(channel, config)| (*channel, config))
    }

    pub fn len(&self) -> usize {
        self.servos.len()
    }

    pub fn is_empty(&self) -> bool {
        self.servos.is_empty()
    }
}
