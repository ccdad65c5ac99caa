pub mod backend;
pub mod config;
pub mod device;
pub mod error;
pub mod events;
pub mod gpio;
pub mod registry;
pub mod routes;

pub use config::{
    AppConfig, DeviceConfig, Direction, EdgeDetect, FeatureOverride, FeatureType, HttpConfig,
    NumberingMode,
};
pub use device::{FeatureInfo, Pidee};
pub use error::PideeError;
pub use events::{
    ChangeFlags, DipChange, FeatureClass, InterruptFlags, InterruptRouter, ListenerHandle,
};
pub use gpio::{GpioBackend, PinIo};
pub use registry::{FeatureDescriptor, PinRegistry};
pub use routes::{AppState, ChangeEvent};

#[cfg(feature = "hardware-gpio")]
pub use backend::LibgpiodBackend;
pub use backend::MockGpioBackend;
