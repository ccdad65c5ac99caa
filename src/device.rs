use std::sync::Arc;

use log::debug;
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::config::{DeviceConfig, EdgeDetect, FeatureType, NumberingMode};
use crate::error::PideeError;
use crate::events::{
    ChangeFlags, DipChange, FeatureClass, InterruptFlags, InterruptHandler, InterruptRouter,
    ListenerHandle, ListenerSet, invoke_isolated,
};
use crate::gpio::{GpioBackend, PinIo};
use crate::registry::{
    BUTTON, DIP_COUNT, FeatureDescriptor, LED_BLUE, LED_GREEN, LED_RED, PinRegistry, dip_name,
};

#[derive(Debug, Clone, Serialize)]
pub struct FeatureInfo {
    #[serde(flatten)]
    pub descriptor: FeatureDescriptor,
    pub pin: u32,
}

/// A Pidee board: named button, dip switch and LED features on top of a GPIO
/// backend, with change listeners fed by edge interrupts.
///
/// Interrupts only mark a class as pending. Listeners run from
/// [`Pidee::poll_and_dispatch`] on the caller's thread, with no lock held.
pub struct Pidee<B: GpioBackend> {
    settings: DeviceConfig,
    io: PinIo<B>,
    flags: Arc<InterruptFlags>,
    router: Option<InterruptHandler>,
    listeners: Mutex<ListenerSet>,
    last_dip: Mutex<u8>,
}

impl<B: GpioBackend> Pidee<B> {
    pub fn new(settings: DeviceConfig, backend: Arc<B>) -> Result<Self, PideeError> {
        let registry = Arc::new(PinRegistry::with_overrides(&settings.pin_map));
        let io = PinIo::new(registry, settings.numbering_mode, backend);

        if settings.enable_auto_setup {
            io.setup()?;
        }

        let mut device = Self {
            settings,
            io,
            flags: Arc::new(InterruptFlags::default()),
            router: None,
            listeners: Mutex::new(ListenerSet::default()),
            last_dip: Mutex::new(0),
        };

        if device.settings.enable_events {
            device.enable_events()?;
        }

        Ok(device)
    }

    fn enable_events(&mut self) -> Result<(), PideeError> {
        let mode = self.io.mode();
        let monitored: Vec<(&str, u32, FeatureClass)> = self
            .io
            .registry()
            .iter()
            .filter_map(|f| {
                let class = match f.feature_type() {
                    FeatureType::Button => FeatureClass::Button,
                    FeatureType::Dip => FeatureClass::Dip,
                    FeatureType::Led => return None,
                };
                Some((f.name(), f.pin(mode), class))
            })
            .collect();

        let mut table: FxHashMap<u32, FeatureClass> = FxHashMap::default();
        for (name, pin, class) in &monitored {
            if table.insert(*pin, *class).is_some() {
                return Err(PideeError::Config(format!(
                    "{name} shares interrupt pin {pin} with another input"
                )));
            }
        }
        let router = Arc::new(InterruptRouter::new(table, self.flags.clone()));

        for (name, pin, class) in &monitored {
            debug!("registering {class:?} interrupt for {name} on pin {pin}");
            self.io
                .backend()
                .register_interrupt(*pin, EdgeDetect::Both, router.clone())?;
        }

        let baseline = self.get_dip_switch_value()?;
        *self.last_dip.get_mut() = baseline;
        self.router = Some(router);

        Ok(())
    }

    pub fn settings(&self) -> &DeviceConfig {
        &self.settings
    }

    pub fn registry(&self) -> &PinRegistry {
        self.io.registry()
    }

    pub fn numbering_mode(&self) -> NumberingMode {
        self.io.mode()
    }

    pub fn events_enabled(&self) -> bool {
        self.router.is_some()
    }

    pub fn resolve(&self, name: &str) -> Result<u32, PideeError> {
        self.io.resolve(name)
    }

    pub fn features(&self) -> Vec<FeatureInfo> {
        let mode = self.io.mode();
        self.io
            .registry()
            .iter()
            .map(|f| FeatureInfo {
                descriptor: f.clone(),
                pin: f.pin(mode),
            })
            .collect()
    }

    pub fn get(&self, name: &str) -> Result<bool, PideeError> {
        self.io.read(name)
    }

    pub fn set(&self, name: &str, value: bool) -> Result<(), PideeError> {
        self.io.write(name, value)
    }

    pub fn get_button_value(&self) -> Result<bool, PideeError> {
        self.get(BUTTON)
    }

    /// Aggregate of all dip switches, bit `i` holding `dip-(i+1)`.
    pub fn get_dip_switch_value(&self) -> Result<u8, PideeError> {
        let mut value = 0u8;
        for index in 0..DIP_COUNT {
            if self.get(&dip_name(index))? {
                value |= 1 << index;
            }
        }
        Ok(value)
    }

    pub fn get_dip_switch_at_index(&self, index: usize) -> Result<bool, PideeError> {
        if index >= DIP_COUNT {
            return Err(PideeError::InvalidIndex(index));
        }
        self.get(&dip_name(index))
    }

    pub fn set_led_red(&self, value: bool) -> Result<(), PideeError> {
        self.set(LED_RED, value)
    }

    pub fn set_led_green(&self, value: bool) -> Result<(), PideeError> {
        self.set(LED_GREEN, value)
    }

    pub fn set_led_blue(&self, value: bool) -> Result<(), PideeError> {
        self.set(LED_BLUE, value)
    }

    pub fn add_button_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(bool) + Send + Sync + 'static,
    {
        self.listeners.lock().add_button(Arc::new(listener))
    }

    pub fn add_dip_listener<F>(&self, listener: F) -> ListenerHandle
    where
        F: Fn(&DipChange) + Send + Sync + 'static,
    {
        self.listeners.lock().add_dip(None, Arc::new(listener))
    }

    /// Like [`Pidee::add_dip_listener`], but only invoked when switch `index`
    /// is among the changed bits.
    pub fn add_dip_index_listener<F>(
        &self,
        index: usize,
        listener: F,
    ) -> Result<ListenerHandle, PideeError>
    where
        F: Fn(&DipChange) + Send + Sync + 'static,
    {
        if index >= DIP_COUNT {
            return Err(PideeError::InvalidIndex(index));
        }
        Ok(self.listeners.lock().add_dip(Some(index), Arc::new(listener)))
    }

    pub fn remove_listener(&self, handle: ListenerHandle) -> Result<(), PideeError> {
        self.listeners.lock().remove(handle)
    }

    pub fn pending(&self) -> ChangeFlags {
        self.flags.peek()
    }

    /// Drains the pending flags and notifies listeners of every class that
    /// had one. Returns the flags that were drained.
    ///
    /// Each class is handled on its own: if reading a class's current value
    /// fails, that class is marked pending again so the next poll retries it,
    /// the other class is still dispatched, and the first error is returned.
    pub fn poll_and_dispatch(&self) -> Result<ChangeFlags, PideeError> {
        let pending = self.flags.drain();
        let mut first_err = None;

        if pending.button {
            match self.get_button_value() {
                Ok(value) => self.dispatch_button(value),
                Err(e) => {
                    self.flags.signal(FeatureClass::Button);
                    first_err.get_or_insert(e);
                }
            }
        }

        if pending.dip {
            match self.get_dip_switch_value() {
                Ok(value) => {
                    let change = {
                        let mut last = self.last_dip.lock();
                        let change = DipChange::new(*last, value);
                        *last = value;
                        change
                    };
                    self.dispatch_dip(&change);
                }
                Err(e) => {
                    self.flags.signal(FeatureClass::Dip);
                    first_err.get_or_insert(e);
                }
            }
        }

        match first_err {
            Some(e) => Err(e),
            None => Ok(pending),
        }
    }

    fn dispatch_button(&self, value: bool) {
        let snapshot = self.listeners.lock().button_snapshot();
        for (handle, listener) in snapshot {
            // skip anything removed by an earlier listener in this pass
            if !self.listeners.lock().contains(handle) {
                continue;
            }
            invoke_isolated(handle, || listener(value));
        }
    }

    fn dispatch_dip(&self, change: &DipChange) {
        let snapshot = self.listeners.lock().dip_snapshot();
        for (handle, entry) in snapshot {
            if !entry.wants(change) || !self.listeners.lock().contains(handle) {
                continue;
            }
            invoke_isolated(handle, || (entry.callback)(change));
        }
    }
}
