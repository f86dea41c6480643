//! Device model: capability descriptions, enumeration and selection

mod info;
mod platform;
mod selector;

pub use info::{Aspect, DeviceInfo, DeviceType};
pub use platform::{EmulatedPlatform, Platform};
pub use selector::{
    select_device, AspectSelector, CpuSelector, DefaultSelector, DeviceSelector, GpuSelector,
    UsmSelector,
};
