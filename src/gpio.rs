use std::sync::Arc;

use log::debug;

use crate::config::{Direction, EdgeDetect, NumberingMode};
use crate::error::PideeError;
use crate::events::InterruptHandler;
use crate::registry::PinRegistry;

/// Low level GPIO primitives. Pin numbers are passed through unchanged, so
/// their meaning depends on the numbering mode the caller resolved them with.
pub trait GpioBackend: Send + Sync {
    fn export_pin(&self, pin: u32, direction: Direction) -> Result<(), PideeError>;
    fn configure_pull_up(&self, pin: u32) -> Result<(), PideeError>;
    fn digital_read(&self, pin: u32) -> Result<bool, PideeError>;
    fn digital_write(&self, pin: u32, value: bool) -> Result<(), PideeError>;
    fn register_interrupt(
        &self,
        pin: u32,
        edge: EdgeDetect,
        handler: InterruptHandler,
    ) -> Result<(), PideeError>;
    fn setup_sys_mode(&self) -> Result<(), PideeError>;
}

/// Feature-name level reads and writes on top of a [`GpioBackend`].
pub struct PinIo<B: GpioBackend> {
    registry: Arc<PinRegistry>,
    mode: NumberingMode,
    backend: Arc<B>,
}

impl<B: GpioBackend> PinIo<B> {
    pub fn new(registry: Arc<PinRegistry>, mode: NumberingMode, backend: Arc<B>) -> Self {
        Self {
            registry,
            mode,
            backend,
        }
    }

    pub fn mode(&self) -> NumberingMode {
        self.mode
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }

    pub fn backend(&self) -> &Arc<B> {
        &self.backend
    }

    pub fn resolve(&self, name: &str) -> Result<u32, PideeError> {
        self.registry.resolve(name, self.mode)
    }

    pub fn read(&self, name: &str) -> Result<bool, PideeError> {
        let feature = self.registry.get(name)?;
        if feature.direction() != Direction::Input {
            return Err(PideeError::DirectionMismatch {
                feature: name.to_string(),
                direction: feature.direction(),
            });
        }

        self.backend.digital_read(feature.pin(self.mode))
    }

    pub fn write(&self, name: &str, value: bool) -> Result<(), PideeError> {
        let feature = self.registry.get(name)?;
        if feature.direction() != Direction::Output {
            return Err(PideeError::DirectionMismatch {
                feature: name.to_string(),
                direction: feature.direction(),
            });
        }

        self.backend.digital_write(feature.pin(self.mode), value)
    }

    /// Exports every feature's BCM line, with pull-ups on inputs, then
    /// switches the backend to sys mode.
    pub fn setup(&self) -> Result<(), PideeError> {
        if self.mode != NumberingMode::Bcm {
            return Err(PideeError::NumberingModeUnsupported(self.mode));
        }

        for feature in self.registry.iter() {
            let pin = feature.bcm();
            debug!(
                "exporting {} on bcm {pin} as {:?}",
                feature.name(),
                feature.direction()
            );
            self.backend.export_pin(pin, feature.direction())?;
            if feature.direction() == Direction::Input {
                self.backend.configure_pull_up(pin)?;
            }
        }

        self.backend.setup_sys_mode()
    }
}
