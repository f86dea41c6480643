//! Device enumeration
//!
//! A [`Platform`] is the boundary to whatever actually enumerates devices. The
//! queue only ever sees the [`DeviceInfo`] list it returns. [`EmulatedPlatform`]
//! describes devices whose kernels run on host worker threads.

use super::info::{Aspect, DeviceInfo, DeviceType};

/// Source of device capability descriptions
pub trait Platform: Send + Sync {
    /// Platform identifier used in logs
    fn name(&self) -> &str;

    /// Enumerate devices in a stable order. Selection ties are broken by
    /// this order.
    fn devices(&self) -> Vec<DeviceInfo>;
}

/// Platform backed by host worker threads
#[derive(Debug, Clone)]
pub struct EmulatedPlatform {
    name: String,
    devices: Vec<DeviceInfo>,
}

impl EmulatedPlatform {
    /// Platform reporting exactly `devices`, in order
    pub fn new(name: impl Into<String>, devices: Vec<DeviceInfo>) -> Self {
        Self {
            name: name.into(),
            devices,
        }
    }

    /// A single host device without unified shared memory
    pub fn host_only() -> Self {
        Self::new(
            "host",
            vec![DeviceInfo::new(0, "host", DeviceType::Host)
                .with_compute_units(host_parallelism())],
        )
    }
}

impl Default for EmulatedPlatform {
    /// An emulated GPU followed by the host CPU, both USM-capable
    fn default() -> Self {
        let lanes = host_parallelism();
        Self::new(
            "emulated",
            vec![
                DeviceInfo::new(0, "emulated-gpu", DeviceType::Gpu)
                    .with_aspects([
                        Aspect::UsmDeviceAllocations,
                        Aspect::UsmSharedAllocations,
                        Aspect::Fp16,
                        Aspect::QueueProfiling,
                    ])
                    .with_memory(4 << 30)
                    .with_compute_units(lanes),
                DeviceInfo::new(1, "host-cpu", DeviceType::Cpu)
                    .with_aspects([
                        Aspect::UsmDeviceAllocations,
                        Aspect::UsmHostAllocations,
                        Aspect::UsmSharedAllocations,
                        Aspect::Fp64,
                        Aspect::QueueProfiling,
                    ])
                    .with_memory(8 << 30)
                    .with_compute_units(lanes),
            ],
        )
    }
}

impl Platform for EmulatedPlatform {
    fn name(&self) -> &str {
        &self.name
    }

    fn devices(&self) -> Vec<DeviceInfo> {
        self.devices.clone()
    }
}

fn host_parallelism() -> usize {
    std::thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(4)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_platform_lists_gpu_first() {
        let platform = EmulatedPlatform::default();
        let devices = platform.devices();
        assert_eq!(devices.len(), 2);
        assert!(devices[0].is_gpu());
        assert!(devices.iter().all(|d| d.supports_usm()));
        assert_eq!(platform.name(), "emulated");
    }

    #[test]
    fn test_host_only_has_no_usm() {
        let devices = EmulatedPlatform::host_only().devices();
        assert_eq!(devices.len(), 1);
        assert!(!devices[0].supports_usm());
        assert!(devices[0].compute_units >= 1);
    }
}
