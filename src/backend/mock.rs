use std::collections::HashMap;
use std::sync::{Mutex, RwLock};

use crate::config::{Direction, EdgeDetect};
use crate::error::PideeError;
use crate::events::InterruptHandler;
use crate::gpio::GpioBackend;

/// Every call the mock received, in order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum GpioCall {
    Export(u32, Direction),
    PullUp(u32),
    Read(u32),
    Write(u32, bool),
    Interrupt(u32, EdgeDetect),
    SysMode,
}

/// In-memory backend. The `set_level*` and `trigger_edge` hooks fire the
/// registered interrupt handler from the calling thread.
#[derive(Default)]
pub struct MockGpioBackend {
    pins: RwLock<HashMap<u32, Mutex<MockPinState>>>, // keyed by pin number
    calls: Mutex<Vec<GpioCall>>,
}

#[derive(Clone, Default)]
struct MockPinState {
    direction: Option<Direction>,
    value: bool,
    edge: EdgeDetect,
    handler: Option<InterruptHandler>,
    fail_reads: bool,
}

impl MockGpioBackend {
    fn record(&self, call: GpioCall) -> Result<(), PideeError> {
        self.calls
            .lock()
            .map_err(|e| PideeError::Gpio(format!("lock poisoned: {e}")))?
            .push(call);
        Ok(())
    }

    fn with_pin<T>(
        &self,
        pin: u32,
        f: impl FnOnce(&mut MockPinState) -> Result<T, PideeError>,
    ) -> Result<T, PideeError> {
        let mut pins = self
            .pins
            .write()
            .map_err(|e| PideeError::Gpio(format!("lock poisoned: {e}")))?;
        let entry = pins.entry(pin).or_default();
        let mut state = entry
            .lock()
            .map_err(|e| PideeError::Gpio(format!("lock poisoned: {e}")))?;
        f(&mut state)
    }

    pub fn calls(&self) -> Vec<GpioCall> {
        self.calls.lock().map(|c| c.clone()).unwrap_or_default()
    }

    pub fn clear_calls(&self) {
        if let Ok(mut calls) = self.calls.lock() {
            calls.clear();
        }
    }

    pub fn level(&self, pin: u32) -> Option<bool> {
        let pins = self.pins.read().ok()?;
        let state = pins.get(&pin)?.lock().ok()?;
        Some(state.value)
    }

    pub fn has_interrupt(&self, pin: u32) -> bool {
        let Ok(pins) = self.pins.read() else {
            return false;
        };
        let Some(state) = pins.get(&pin).and_then(|p| p.lock().ok()) else {
            return false;
        };
        state.handler.is_some()
    }

    /// Makes reads of `pin` fail until called again with `false`.
    pub fn set_read_failure(&self, pin: u32, fail: bool) -> Result<(), PideeError> {
        self.with_pin(pin, |p| {
            p.fail_reads = fail;
            Ok(())
        })
    }

    /// Sets the line level without raising an edge.
    pub fn set_level(&self, pin: u32, value: bool) -> Result<(), PideeError> {
        self.with_pin(pin, |p| {
            p.value = value;
            Ok(())
        })
    }

    /// Fires the pin's interrupt handler unconditionally, as a glitch would.
    pub fn trigger_edge(&self, pin: u32) -> Result<(), PideeError> {
        let handler = self.with_pin(pin, |p| Ok(p.handler.clone()))?;
        if let Some(h) = handler {
            h.on_edge(pin);
        }
        Ok(())
    }

    /// Sets the line level and fires the interrupt handler if the transition
    /// matches the registered edge.
    pub fn set_level_with_edge(&self, pin: u32, value: bool) -> Result<(), PideeError> {
        let handler = self.with_pin(pin, |p| {
            let observed = match (p.value, value) {
                (false, true) => EdgeDetect::Rising,
                (true, false) => EdgeDetect::Falling,
                _ => EdgeDetect::None,
            };
            p.value = value;
            Ok(if edge_matches(p.edge, observed) {
                p.handler.clone()
            } else {
                None
            })
        })?;

        if let Some(h) = handler {
            h.on_edge(pin);
        }
        Ok(())
    }
}

impl GpioBackend for MockGpioBackend {
    fn export_pin(&self, pin: u32, direction: Direction) -> Result<(), PideeError> {
        self.record(GpioCall::Export(pin, direction))?;
        self.with_pin(pin, |p| {
            p.direction = Some(direction);
            Ok(())
        })
    }

    fn configure_pull_up(&self, pin: u32) -> Result<(), PideeError> {
        self.record(GpioCall::PullUp(pin))?;
        self.with_pin(pin, |p| {
            if p.direction == Some(Direction::Output) {
                return Err(PideeError::Gpio(format!(
                    "pin {pin} is an output, cannot pull up"
                )));
            }
            p.value = true;
            Ok(())
        })
    }

    fn digital_read(&self, pin: u32) -> Result<bool, PideeError> {
        self.record(GpioCall::Read(pin))?;
        self.with_pin(pin, |p| {
            if p.fail_reads {
                return Err(PideeError::Gpio(format!("read of pin {pin} failed")));
            }
            Ok(p.value)
        })
    }

    fn digital_write(&self, pin: u32, value: bool) -> Result<(), PideeError> {
        self.record(GpioCall::Write(pin, value))?;
        self.with_pin(pin, |p| {
            if p.direction == Some(Direction::Input) {
                return Err(PideeError::Gpio(format!(
                    "pin {pin} is exported as input"
                )));
            }
            p.value = value;
            Ok(())
        })
    }

    fn register_interrupt(
        &self,
        pin: u32,
        edge: EdgeDetect,
        handler: InterruptHandler,
    ) -> Result<(), PideeError> {
        self.record(GpioCall::Interrupt(pin, edge))?;
        self.with_pin(pin, |p| {
            p.edge = edge;
            p.handler = if edge == EdgeDetect::None {
                None
            } else {
                Some(handler)
            };
            Ok(())
        })
    }

    fn setup_sys_mode(&self) -> Result<(), PideeError> {
        self.record(GpioCall::SysMode)
    }
}

fn edge_matches(configured: EdgeDetect, observed: EdgeDetect) -> bool {
    match configured {
        EdgeDetect::None => false,
        EdgeDetect::Rising => observed == EdgeDetect::Rising,
        EdgeDetect::Falling => observed == EdgeDetect::Falling,
        EdgeDetect::Both => matches!(observed, EdgeDetect::Rising | EdgeDetect::Falling),
    }
}
