pub mod classify;
pub mod config;
pub mod engine;
pub mod region;
pub mod registry;
pub mod topics;
pub mod types;
pub mod window;

pub use classify::classify;
pub use config::{LightingConfig, NetworkConfig, RuntimeConfig};
pub use engine::LightingEngine;
pub use region::Region;
pub use registry::{validate_device_name, Device, DeviceRegistry, InvalidDeviceName};
pub use topics::*;
pub use types::{
    Control, EngineAction, EngineStatus, Publish, RegionCommand, RegionStatus, Switch, Update,
};
pub use window::TimeSpecError;
