//! Device selection by capability ranking
//!
//! A selector scores each candidate device. Negative scores reject the device;
//! among the rest the highest score wins and ties go to the device enumerated
//! first.

use crate::error::{OffloadError, OffloadResult};

use super::info::{Aspect, DeviceInfo, DeviceType};

/// Ranking function over device capabilities
pub trait DeviceSelector {
    /// Score a device; negative means "reject"
    fn rank(&self, device: &DeviceInfo) -> i32;

    /// Selector identifier used in logs and errors
    fn name(&self) -> &str {
        "custom"
    }
}

impl<F> DeviceSelector for F
where
    F: Fn(&DeviceInfo) -> i32,
{
    fn rank(&self, device: &DeviceInfo) -> i32 {
        self(device)
    }
}

/// Prefers GPUs, then other accelerators, then CPUs, then the host
#[derive(Debug, Clone, Copy, Default)]
pub struct DefaultSelector;

impl DeviceSelector for DefaultSelector {
    fn rank(&self, device: &DeviceInfo) -> i32 {
        match device.device_type {
            DeviceType::Gpu => 3,
            DeviceType::Accelerator => 2,
            DeviceType::Cpu => 1,
            DeviceType::Host => 0,
        }
    }

    fn name(&self) -> &str {
        "default"
    }
}

/// Accepts GPUs only
#[derive(Debug, Clone, Copy, Default)]
pub struct GpuSelector;

impl DeviceSelector for GpuSelector {
    fn rank(&self, device: &DeviceInfo) -> i32 {
        if device.is_gpu() {
            1
        } else {
            -1
        }
    }

    fn name(&self) -> &str {
        "gpu"
    }
}

/// Accepts CPU-class devices (including the host)
#[derive(Debug, Clone, Copy, Default)]
pub struct CpuSelector;

impl DeviceSelector for CpuSelector {
    fn rank(&self, device: &DeviceInfo) -> i32 {
        match device.device_type {
            DeviceType::Cpu => 1,
            DeviceType::Host => 0,
            _ => -1,
        }
    }

    fn name(&self) -> &str {
        "cpu"
    }
}

/// Requires device USM allocations: USM + GPU scores 2, other USM devices 1
#[derive(Debug, Clone, Copy, Default)]
pub struct UsmSelector;

impl DeviceSelector for UsmSelector {
    fn rank(&self, device: &DeviceInfo) -> i32 {
        if device.has(Aspect::UsmDeviceAllocations) {
            if device.has(Aspect::Gpu) {
                return 2;
            }
            return 1;
        }
        -1
    }

    fn name(&self) -> &str {
        "usm"
    }
}

/// Filters on required and denied aspects, then defers to [`DefaultSelector`]
#[derive(Debug, Clone, Default)]
pub struct AspectSelector {
    required: Vec<Aspect>,
    denied: Vec<Aspect>,
}

impl AspectSelector {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn require(mut self, aspect: Aspect) -> Self {
        self.required.push(aspect);
        self
    }

    pub fn deny(mut self, aspect: Aspect) -> Self {
        self.denied.push(aspect);
        self
    }
}

impl DeviceSelector for AspectSelector {
    fn rank(&self, device: &DeviceInfo) -> i32 {
        let satisfied = self.required.iter().all(|a| device.has(*a))
            && !self.denied.iter().any(|a| device.has(*a));
        if satisfied {
            DefaultSelector.rank(device)
        } else {
            -1
        }
    }

    fn name(&self) -> &str {
        "aspect"
    }
}

/// Pick the highest ranked device; first-seen wins ties.
pub fn select_device<S>(devices: &[DeviceInfo], selector: &S) -> OffloadResult<DeviceInfo>
where
    S: DeviceSelector + ?Sized,
{
    let mut best: Option<(i32, &DeviceInfo)> = None;
    for device in devices {
        let score = selector.rank(device);
        tracing::trace!(device = %device, score, selector = selector.name(), "ranked device");
        if score < 0 {
            continue;
        }
        match best {
            Some((best_score, _)) if best_score >= score => {}
            _ => best = Some((score, device)),
        }
    }

    match best {
        Some((score, device)) => {
            tracing::debug!(device = %device, score, selector = selector.name(), "selected device");
            Ok(device.clone())
        }
        None => Err(OffloadError::NoSuitableDevice(format!(
            "selector '{}' rejected all {} candidate device(s)",
            selector.name(),
            devices.len()
        ))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn devices() -> Vec<DeviceInfo> {
        vec![
            DeviceInfo::new(0, "cpu0", DeviceType::Cpu).with_aspect(Aspect::UsmDeviceAllocations),
            DeviceInfo::new(1, "gpu0", DeviceType::Gpu),
            DeviceInfo::new(2, "gpu1", DeviceType::Gpu).with_aspect(Aspect::UsmDeviceAllocations),
            DeviceInfo::new(3, "gpu2", DeviceType::Gpu).with_aspect(Aspect::UsmDeviceAllocations),
        ]
    }

    #[test]
    fn test_usm_selector_prefers_usm_gpu() {
        let selected = select_device(&devices(), &UsmSelector).unwrap();
        assert_eq!(selected.name, "gpu1");
    }

    #[test]
    fn test_ties_go_to_first_seen() {
        let selected = select_device(&devices(), &GpuSelector).unwrap();
        assert_eq!(selected.name, "gpu0");
    }

    #[test]
    fn test_usm_selector_falls_back_to_usm_cpu() {
        let devs = vec![
            DeviceInfo::new(0, "gpu0", DeviceType::Gpu),
            DeviceInfo::new(1, "cpu0", DeviceType::Cpu).with_aspect(Aspect::UsmDeviceAllocations),
        ];
        assert_eq!(select_device(&devs, &UsmSelector).unwrap().name, "cpu0");
    }

    #[test]
    fn test_rejection_is_an_error() {
        let devs = vec![DeviceInfo::new(0, "gpu0", DeviceType::Gpu)];
        let err = select_device(&devs, &UsmSelector).unwrap_err();
        assert!(matches!(err, OffloadError::NoSuitableDevice(_)));

        let err = select_device(&[], &DefaultSelector).unwrap_err();
        assert!(matches!(err, OffloadError::NoSuitableDevice(_)));
    }

    #[test]
    fn test_closure_selector() {
        let by_name = |d: &DeviceInfo| if d.name == "gpu2" { 10 } else { 0 };
        assert_eq!(select_device(&devices(), &by_name).unwrap().name, "gpu2");
    }

    #[test]
    fn test_aspect_selector() {
        let selector = AspectSelector::new()
            .require(Aspect::UsmDeviceAllocations)
            .deny(Aspect::Gpu);
        assert_eq!(select_device(&devices(), &selector).unwrap().name, "cpu0");
    }

    #[test]
    fn test_cpu_selector_rejects_gpu() {
        let devs = vec![DeviceInfo::new(0, "gpu0", DeviceType::Gpu)];
        assert!(select_device(&devs, &CpuSelector).is_err());
        let devs = vec![DeviceInfo::new(0, "host", DeviceType::Host)];
        assert_eq!(select_device(&devs, &CpuSelector).unwrap().name, "host");
    }
}
