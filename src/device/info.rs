//! Device capability descriptions

use std::collections::BTreeSet;
use std::fmt;

use serde::Serialize;

/// Class of a compute device
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum DeviceType {
    Gpu,
    Cpu,
    Accelerator,
    /// The host itself, used when nothing else is enumerated
    Host,
}

impl fmt::Display for DeviceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceType::Gpu => write!(f, "gpu"),
            DeviceType::Cpu => write!(f, "cpu"),
            DeviceType::Accelerator => write!(f, "accelerator"),
            DeviceType::Host => write!(f, "host"),
        }
    }
}

/// Queryable capability flag of a device
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Aspect {
    Gpu,
    Cpu,
    Accelerator,
    /// `malloc_device` style pointer allocations
    UsmDeviceAllocations,
    UsmHostAllocations,
    UsmSharedAllocations,
    Fp16,
    Fp64,
    /// Event profiling timestamps
    QueueProfiling,
}

impl Aspect {
    pub fn as_str(&self) -> &'static str {
        match self {
            Aspect::Gpu => "gpu",
            Aspect::Cpu => "cpu",
            Aspect::Accelerator => "accelerator",
            Aspect::UsmDeviceAllocations => "usm_device_allocations",
            Aspect::UsmHostAllocations => "usm_host_allocations",
            Aspect::UsmSharedAllocations => "usm_shared_allocations",
            Aspect::Fp16 => "fp16",
            Aspect::Fp64 => "fp64",
            Aspect::QueueProfiling => "queue_profiling",
        }
    }
}

impl fmt::Display for Aspect {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Device information as reported by a [`Platform`](super::Platform)
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeviceInfo {
    pub device_id: u32,
    pub name: String,
    pub device_type: DeviceType,
    pub aspects: BTreeSet<Aspect>,
    /// Global memory in bytes
    pub memory: usize,
    /// Parallel execution lanes; the emulated device runs this many workers
    pub compute_units: usize,
}

impl DeviceInfo {
    /// Create a device description. The aspect matching `device_type` is
    /// added automatically.
    pub fn new(device_id: u32, name: impl Into<String>, device_type: DeviceType) -> Self {
        let mut aspects = BTreeSet::new();
        match device_type {
            DeviceType::Gpu => {
                aspects.insert(Aspect::Gpu);
            }
            DeviceType::Cpu | DeviceType::Host => {
                aspects.insert(Aspect::Cpu);
            }
            DeviceType::Accelerator => {
                aspects.insert(Aspect::Accelerator);
            }
        }
        Self {
            device_id,
            name: name.into(),
            device_type,
            aspects,
            memory: 0,
            compute_units: 1,
        }
    }

    pub fn with_aspect(mut self, aspect: Aspect) -> Self {
        self.aspects.insert(aspect);
        self
    }

    pub fn with_aspects(mut self, aspects: impl IntoIterator<Item = Aspect>) -> Self {
        self.aspects.extend(aspects);
        self
    }

    pub fn with_memory(mut self, memory: usize) -> Self {
        self.memory = memory;
        self
    }

    pub fn with_compute_units(mut self, compute_units: usize) -> Self {
        self.compute_units = compute_units.max(1);
        self
    }

    pub fn has(&self, aspect: Aspect) -> bool {
        self.aspects.contains(&aspect)
    }

    pub fn is_gpu(&self) -> bool {
        self.device_type == DeviceType::Gpu
    }

    pub fn supports_usm(&self) -> bool {
        self.has(Aspect::UsmDeviceAllocations)
    }
}

impl fmt::Display for DeviceInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} [{}:{}]", self.name, self.device_type, self.device_id)
    }
}
