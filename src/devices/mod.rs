//! Routing of telemetry and link state to device drivers.
//!
//! Frames are matched by their dispatch key (`name:id[:switch]`), compared
//! case-insensitively against the device id each driver registered with.

use std::collections::HashMap;
use std::sync::Arc;

use crate::error::{Error, Result};
use crate::event::{Event, Subscription};
use crate::types::RadioFrame;

/// A driver for one radio device.
pub trait DeviceDriver: Send + Sync {
    /// Device id in `Protocol:ID[:SWITCH]` notation.
    fn dispatch_key(&self) -> &str;

    /// Called for every frame addressed to this device.
    fn on_telemetry(&self, frame: &RadioFrame);

    /// Called when the link becomes active or inactive.
    fn on_link_state(&self, active: bool);
}

/// Dispatch table of registered drivers.
#[derive(Default)]
pub struct DeviceRegistry {
    devices: HashMap<String, Arc<dyn DeviceDriver>>,
    dispatch_count: u64,
}

impl DeviceRegistry {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds a driver. Dispatch keys must be unique.
    pub fn register(&mut self, driver: Arc<dyn DeviceDriver>) -> Result<()> {
        let key = driver.dispatch_key().to_ascii_lowercase();
        if self.devices.contains_key(&key) {
            return Err(Error::DuplicateDevice {
                device_id: driver.dispatch_key().to_owned(),
            });
        }
        tracing::debug!("registered device '{}'", driver.dispatch_key());
        self.devices.insert(key, driver);
        Ok(())
    }

    /// Number of registered drivers.
    #[must_use]
    pub fn len(&self) -> usize {
        self.devices.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.devices.is_empty()
    }

    /// Frames delivered to a driver so far.
    #[must_use]
    pub const fn dispatch_count(&self) -> u64 {
        self.dispatch_count
    }

    /// Hands a frame to its driver. Returns false if no driver matched.
    pub fn dispatch(&mut self, frame: &RadioFrame) -> bool {
        let Some(key) = frame.dispatch_key() else {
            return false;
        };
        match self.devices.get(&key.to_ascii_lowercase()) {
            Some(driver) => {
                self.dispatch_count += 1;
                driver.on_telemetry(frame);
                true
            }
            None => {
                tracing::trace!("no device for '{key}'");
                false
            }
        }
    }

    /// Tells every driver whether the link is up.
    pub fn set_link_active(&self, active: bool) {
        for driver in self.devices.values() {
            driver.on_link_state(active);
        }
    }

    /// Feeds link events to the drivers until the link is dropped.
    pub async fn run(mut self, mut events: Subscription) -> Self {
        while let Some(event) = events.recv().await {
            match event {
                Event::Telemetry(frame) => {
                    self.dispatch(&frame);
                }
                Event::ActiveChanged(status) => self.set_link_active(status.active),
                _ => {}
            }
        }
        self
    }
}
