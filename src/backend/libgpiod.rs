use log::{debug, warn};
use std::path::PathBuf;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread::{JoinHandle, yield_now};
use std::time::Duration;

use libgpiod::{chip::Chip, line, request};
use parking_lot::{FairMutex, RwLock, RwLockUpgradableReadGuard};
use rustc_hash::FxHashMap;

use crate::config::{Direction, EdgeDetect};
use crate::error::PideeError;
use crate::events::InterruptHandler;
use crate::gpio::GpioBackend;

const LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY: usize = 64;
const LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS: Duration = Duration::from_millis(10);

/// Character-device backend. Pin numbers are line offsets on one chip,
/// which on a Raspberry Pi are the BCM numbers.
pub struct LibgpiodBackend {
    chip: String,
    lines: RwLock<FxHashMap<u32, LineHandle>>, // keyed by line offset
}

#[derive(Debug, Clone, Copy)]
struct LineState {
    direction: Direction,
    pull_up: bool,
    edge: EdgeDetect,
}

struct LineHandle {
    state: LineState,
    gpiod_handle: Arc<FairMutex<GpiodHandle>>,
    listener: Option<EdgeListener>, // drop in reverse order
}

struct GpiodHandle {
    request: request::Request,
}

impl GpiodHandle {
    fn new(chip: &str, line_cfg: &line::Config) -> Result<Self, PideeError> {
        let chip = open_chip(chip)?;
        let mut req_cfg = request::Config::new()
            .map_err(|e| PideeError::Gpio(format!("request config: {e}")))?;
        req_cfg
            .set_consumer(env!("CARGO_PKG_NAME"))
            .map_err(|e| PideeError::Gpio(format!("request consumer: {e}")))?;
        let request = chip
            .request_lines(Some(&req_cfg), line_cfg)
            .map_err(|e| PideeError::Gpio(format!("request lines: {e}")))?;
        Ok(Self { request })
    }
}

fn open_chip(path: &str) -> Result<Chip, PideeError> {
    let p = PathBuf::from(path);
    Chip::open(&p).map_err(|e| PideeError::Gpio(format!("open chip {path}: {e}")))
}

/// Waits for edges on one line and forwards each to the interrupt handler.
struct EdgeListener {
    cancel: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl EdgeListener {
    fn new(
        offset: u32,
        gpiod_handle: Arc<FairMutex<GpiodHandle>>,
        handler: InterruptHandler,
    ) -> Result<Self, PideeError> {
        let cancel = Arc::new(AtomicBool::new(false));
        let cancel_flag = cancel.clone();
        let mut buffer = request::Buffer::new(LIBGPIOD_BACKEND_EVENT_BUFFER_CAPACITY)
            .map_err(|e| PideeError::Gpio(format!("event buffer: {e}")))?;

        let handle = std::thread::spawn(move || {
            while !cancel_flag.load(Ordering::Relaxed) {
                let hdl = gpiod_handle.lock();
                let req = &hdl.request;

                let has_event =
                    match req.wait_edge_events(Some(LIBGPIOD_BACKEND_EVENT_WAIT_TIMEOUT_MS)) {
                        Ok(v) => v,
                        Err(e) => {
                            warn!("wait edge events error for line {offset}: {e}");
                            drop(hdl);
                            yield_now();
                            continue;
                        }
                    };
                if !has_event {
                    continue;
                }

                let fired = match req.read_edge_events(&mut buffer) {
                    Ok(events) => events.filter(|evt| evt.is_ok()).count() > 0,
                    Err(e) => {
                        warn!("read edge events error for line {offset}: {e}");
                        false
                    }
                };
                drop(hdl);

                if fired {
                    handler.on_edge(offset);
                } else {
                    yield_now();
                }
            }
        });

        Ok(Self {
            cancel,
            handle: Some(handle),
        })
    }
}

impl Drop for EdgeListener {
    fn drop(&mut self) {
        self.cancel.store(true, Ordering::Relaxed);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}

impl LibgpiodBackend {
    pub fn new(chip: impl Into<String>) -> Result<Self, PideeError> {
        Ok(Self {
            chip: chip.into(),
            lines: RwLock::new(FxHashMap::default()),
        })
    }

    fn make_line_settings(state: &LineState) -> Result<line::Settings, PideeError> {
        let mut ls = line::Settings::new()
            .map_err(|e| PideeError::Gpio(format!("libgpiod settings: {e}")))?;

        match state.direction {
            Direction::Output => {
                ls.set_direction(line::Direction::Output)
                    .map_err(|e| PideeError::Gpio(format!("set direction: {e}")))?;
                ls.set_drive(line::Drive::PushPull)
                    .map_err(|e| PideeError::Gpio(format!("set drive: {e}")))?;
            }
            Direction::Input => {
                ls.set_direction(line::Direction::Input)
                    .map_err(|e| PideeError::Gpio(format!("set direction: {e}")))?;
                let bias = state.pull_up.then_some(line::Bias::PullUp);
                ls.set_bias(bias)
                    .map_err(|e| PideeError::Gpio(format!("set bias: {e}")))?;

                let edge = match state.edge {
                    EdgeDetect::None => None,
                    EdgeDetect::Rising => Some(line::Edge::Rising),
                    EdgeDetect::Falling => Some(line::Edge::Falling),
                    EdgeDetect::Both => Some(line::Edge::Both),
                };
                ls.set_edge_detection(edge)
                    .map_err(|e| PideeError::Gpio(format!("set edge detection: {e}")))?;
            }
        }

        Ok(ls)
    }

    fn make_line_config(offset: u32, state: &LineState) -> Result<line::Config, PideeError> {
        let settings = Self::make_line_settings(state)?;
        let mut cfg =
            line::Config::new().map_err(|e| PideeError::Gpio(format!("line config: {e}")))?;
        cfg.add_line_settings(&[offset], settings)
            .map_err(|e| PideeError::Gpio(format!("line config add settings: {e}")))?;
        Ok(cfg)
    }

    /// Requests the line with `state`, or reconfigures it if already held.
    fn apply(&self, offset: u32, state: LineState) -> Result<(), PideeError> {
        let lines = self.lines.upgradable_read();
        let line_cfg = Self::make_line_config(offset, &state)?;

        match lines.get(&offset) {
            Some(handle) => {
                handle
                    .gpiod_handle
                    .lock()
                    .request
                    .reconfigure_lines(&line_cfg)
                    .map_err(|e| PideeError::Gpio(format!("reconfigure lines: {e}")))?;

                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                if let Some(handle) = lines.get_mut(&offset) {
                    // a listener only makes sense while edge detection is on
                    if state.edge == EdgeDetect::None {
                        handle.listener = None;
                    }
                    handle.state = state;
                }
            }
            None => {
                // upgradable read lock is exclusive, so no one else can insert this line
                let gpiod_handle =
                    Arc::new(FairMutex::new(GpiodHandle::new(&self.chip, &line_cfg)?));
                let mut lines = RwLockUpgradableReadGuard::upgrade(lines);
                lines.insert(
                    offset,
                    LineHandle {
                        state,
                        gpiod_handle,
                        listener: None,
                    },
                );
            }
        }

        Ok(())
    }

    fn line_state(&self, offset: u32) -> Option<LineState> {
        self.lines.read().get(&offset).map(|h| h.state)
    }

    fn ensure_line(&self, offset: u32, direction: Direction) -> Result<(), PideeError> {
        match self.line_state(offset) {
            Some(state) if state.direction == direction => Ok(()),
            Some(state) => Err(PideeError::Gpio(format!(
                "line {offset} is requested as {:?}",
                state.direction
            ))),
            None => {
                debug!("requesting line {offset} as {direction:?} on first use");
                self.export_pin(offset, direction)
            }
        }
    }
}

impl GpioBackend for LibgpiodBackend {
    fn export_pin(&self, pin: u32, direction: Direction) -> Result<(), PideeError> {
        let state = match self.line_state(pin) {
            Some(current) if current.direction == direction => current,
            _ => LineState {
                direction,
                pull_up: false,
                edge: EdgeDetect::None,
            },
        };
        self.apply(pin, state)
    }

    fn configure_pull_up(&self, pin: u32) -> Result<(), PideeError> {
        let mut state = self
            .line_state(pin)
            .ok_or_else(|| PideeError::Gpio(format!("line {pin} not exported")))?;
        if state.direction != Direction::Input {
            return Err(PideeError::Gpio(format!(
                "line {pin} is an output, cannot pull up"
            )));
        }
        state.pull_up = true;
        self.apply(pin, state)
    }

    fn digital_read(&self, pin: u32) -> Result<bool, PideeError> {
        self.ensure_line(pin, Direction::Input)?;
        let lines = self.lines.read();
        let handle = lines
            .get(&pin)
            .ok_or_else(|| PideeError::Gpio(format!("line {pin} not exported")))?;

        let value = handle
            .gpiod_handle
            .lock()
            .request
            .value(pin)
            .map_err(|e| PideeError::Gpio(format!("get value: {e}")))?;
        Ok(matches!(value, line::Value::Active))
    }

    fn digital_write(&self, pin: u32, value: bool) -> Result<(), PideeError> {
        self.ensure_line(pin, Direction::Output)?;
        let lines = self.lines.read();
        let handle = lines
            .get(&pin)
            .ok_or_else(|| PideeError::Gpio(format!("line {pin} not exported")))?;

        handle
            .gpiod_handle
            .lock()
            .request
            .set_value(
                pin,
                if value {
                    line::Value::Active
                } else {
                    line::Value::InActive
                },
            )
            .map_err(|e| PideeError::Gpio(format!("set value: {e}")))?;
        Ok(())
    }

    fn register_interrupt(
        &self,
        pin: u32,
        edge: EdgeDetect,
        handler: InterruptHandler,
    ) -> Result<(), PideeError> {
        self.ensure_line(pin, Direction::Input)?;
        let mut state = self
            .line_state(pin)
            .ok_or_else(|| PideeError::Gpio(format!("line {pin} not exported")))?;
        state.edge = edge;
        self.apply(pin, state)?;

        if edge == EdgeDetect::None {
            return Ok(());
        }

        let mut lines = self.lines.write();
        let handle = lines
            .get_mut(&pin)
            .ok_or_else(|| PideeError::Gpio(format!("line {pin} not exported")))?;
        // replacing the listener joins the old thread first
        handle.listener = None;
        handle.listener = Some(EdgeListener::new(
            pin,
            handle.gpiod_handle.clone(),
            handler,
        )?);
        Ok(())
    }

    fn setup_sys_mode(&self) -> Result<(), PideeError> {
        let chip = open_chip(&self.chip)?;
        let info = chip
            .info()
            .map_err(|e| PideeError::Gpio(format!("chip info {}: {e}", self.chip)))?;
        debug!("using {} with {} lines", self.chip, info.num_lines());
        Ok(())
    }
}
