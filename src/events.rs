use std::panic::{self, AssertUnwindSafe};
use std::sync::Arc;

use log::{trace, warn};
use parking_lot::Mutex;
use rustc_hash::FxHashMap;
use serde::Serialize;

use crate::error::PideeError;

/// Input classes that raise change notifications.
#[derive(Debug, Hash, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum FeatureClass {
    Button,
    Dip,
}

#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
pub struct ChangeFlags {
    pub button: bool,
    pub dip: bool,
}

impl ChangeFlags {
    pub fn is_pending(&self, class: FeatureClass) -> bool {
        match class {
            FeatureClass::Button => self.button,
            FeatureClass::Dip => self.dip,
        }
    }
}

/// Pending-change flags shared between the interrupt side and the poller.
///
/// Any number of `signal` calls for a class between two `drain` calls
/// collapse into a single pending flag. The lock is only ever held for the
/// flag update itself.
#[derive(Debug, Default)]
pub struct InterruptFlags {
    flags: Mutex<ChangeFlags>,
}

impl InterruptFlags {
    pub fn signal(&self, class: FeatureClass) {
        let mut flags = self.flags.lock();
        match class {
            FeatureClass::Button => flags.button = true,
            FeatureClass::Dip => flags.dip = true,
        }
    }

    /// Returns the pending flags and resets both to idle.
    pub fn drain(&self) -> ChangeFlags {
        std::mem::take(&mut *self.flags.lock())
    }

    pub fn peek(&self) -> ChangeFlags {
        *self.flags.lock()
    }
}

/// Single interrupt entry point: maps the pin that fired to its class.
#[derive(Debug)]
pub struct InterruptRouter {
    table: FxHashMap<u32, FeatureClass>,
    flags: Arc<InterruptFlags>,
}

impl InterruptRouter {
    pub fn new(table: FxHashMap<u32, FeatureClass>, flags: Arc<InterruptFlags>) -> Self {
        Self { table, flags }
    }

    pub fn on_edge(&self, pin: u32) {
        match self.table.get(&pin) {
            Some(class) => {
                trace!("edge on pin {pin}, marking {class:?} pending");
                self.flags.signal(*class);
            }
            None => warn!("edge on unmonitored pin {pin} ignored"),
        }
    }
}

pub type InterruptHandler = Arc<InterruptRouter>;

/// Dip switch change, diffed against the last dispatched aggregate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct DipChange {
    pub value: u8,
    pub previous: u8,
    pub changed: u8,
}

impl DipChange {
    pub fn new(previous: u8, value: u8) -> Self {
        Self {
            value,
            previous,
            changed: previous ^ value,
        }
    }

    /// Lowest switch index that changed, if any did.
    pub fn index(&self) -> Option<usize> {
        self.changed_indices().next()
    }

    pub fn changed_indices(&self) -> impl Iterator<Item = usize> + '_ {
        (0..8).filter(|i| self.changed & (1 << i) != 0)
    }

    pub fn has_changed(&self, index: usize) -> bool {
        index < 8 && self.changed & (1 << index) != 0
    }

    pub fn is_set(&self, index: usize) -> bool {
        index < 8 && self.value & (1 << index) != 0
    }
}

pub type ButtonListener = Arc<dyn Fn(bool) + Send + Sync>;
pub type DipListener = Arc<dyn Fn(&DipChange) + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ListenerHandle {
    class: FeatureClass,
    id: u64,
}

impl ListenerHandle {
    pub fn class(&self) -> FeatureClass {
        self.class
    }

    pub fn id(&self) -> u64 {
        self.id
    }
}

#[derive(Clone)]
pub struct DipEntry {
    pub index: Option<usize>,
    pub callback: DipListener,
}

impl DipEntry {
    pub fn wants(&self, change: &DipChange) -> bool {
        self.index.is_none_or(|i| change.has_changed(i))
    }
}

/// Registered callbacks per class, in registration order.
#[derive(Default)]
pub struct ListenerSet {
    next_id: u64,
    button: Vec<(ListenerHandle, ButtonListener)>,
    dip: Vec<(ListenerHandle, DipEntry)>,
}

impl ListenerSet {
    fn next_handle(&mut self, class: FeatureClass) -> ListenerHandle {
        self.next_id += 1;
        ListenerHandle {
            class,
            id: self.next_id,
        }
    }

    pub fn add_button(&mut self, callback: ButtonListener) -> ListenerHandle {
        let handle = self.next_handle(FeatureClass::Button);
        self.button.push((handle, callback));
        handle
    }

    pub fn add_dip(&mut self, index: Option<usize>, callback: DipListener) -> ListenerHandle {
        let handle = self.next_handle(FeatureClass::Dip);
        self.dip.push((handle, DipEntry { index, callback }));
        handle
    }

    pub fn remove(&mut self, handle: ListenerHandle) -> Result<(), PideeError> {
        let removed = match handle.class {
            FeatureClass::Button => remove_entry(&mut self.button, handle),
            FeatureClass::Dip => remove_entry(&mut self.dip, handle),
        };
        if removed {
            Ok(())
        } else {
            Err(PideeError::ListenerNotFound(handle.id))
        }
    }

    pub fn contains(&self, handle: ListenerHandle) -> bool {
        match handle.class {
            FeatureClass::Button => self.button.iter().any(|(h, _)| *h == handle),
            FeatureClass::Dip => self.dip.iter().any(|(h, _)| *h == handle),
        }
    }

    pub fn button_snapshot(&self) -> Vec<(ListenerHandle, ButtonListener)> {
        self.button.clone()
    }

    pub fn dip_snapshot(&self) -> Vec<(ListenerHandle, DipEntry)> {
        self.dip.clone()
    }
}

fn remove_entry<T>(entries: &mut Vec<(ListenerHandle, T)>, handle: ListenerHandle) -> bool {
    let before = entries.len();
    entries.retain(|(h, _)| *h != handle);
    entries.len() != before
}

/// Runs one listener, containing any panic so later listeners still run.
pub(crate) fn invoke_isolated<F: FnOnce()>(handle: ListenerHandle, f: F) {
    if panic::catch_unwind(AssertUnwindSafe(f)).is_err() {
        warn!(
            "{:?} listener {} panicked, continuing dispatch",
            handle.class, handle.id
        );
    }
}
