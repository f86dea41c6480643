//! Common test utilities for queue tests
//!
//! - Installs logging once for the whole test binary
//! - Builds queues on the emulated platform with a collecting async handler,
//!   so faults never reach the panicking default handler

#![allow(dead_code)]

use std::sync::{Arc, Mutex};

use once_cell::sync::Lazy;
use offloadforge::logging::{init_with_config, LogLevel, LoggingConfig};
use offloadforge::{
    Aspect, DefaultSelector, DeviceInfo, DeviceSelector, DeviceType, EmulatedPlatform,
    OffloadError, Queue, QueueConfig,
};
pub use serial_test::serial;

/// Element count used by the vector scenarios
pub const DATA_SIZE: usize = 1024;

static LOGGING: Lazy<()> = Lazy::new(|| {
    init_with_config(&LoggingConfig::new().with_level(LogLevel::Warn));
});

pub fn init_logging() {
    Lazy::force(&LOGGING);
}

/// Faults handed to a queue's async handler
#[derive(Clone, Default)]
pub struct FaultSink {
    faults: Arc<Mutex<Vec<OffloadError>>>,
}

impl FaultSink {
    pub fn take(&self) -> Vec<OffloadError> {
        std::mem::take(&mut *self.faults.lock().unwrap())
    }

    pub fn len(&self) -> usize {
        self.faults.lock().unwrap().len()
    }
}

/// Queue on the default emulated platform
pub fn test_queue(config: QueueConfig) -> anyhow::Result<(Queue, FaultSink)> {
    test_queue_with(&EmulatedPlatform::default(), &DefaultSelector, config)
}

pub fn test_queue_with<S: DeviceSelector + ?Sized>(
    platform: &EmulatedPlatform,
    selector: &S,
    config: QueueConfig,
) -> anyhow::Result<(Queue, FaultSink)> {
    init_logging();
    let sink = FaultSink::default();
    let collector = sink.faults.clone();
    let queue = Queue::with_platform(platform, selector, config, move |errors| {
        collector.lock().unwrap().extend(errors);
    })?;
    Ok((queue, sink))
}

/// GPU and CPU devices, none of which can allocate device USM
pub fn platform_without_usm() -> EmulatedPlatform {
    EmulatedPlatform::new(
        "no-usm",
        vec![
            DeviceInfo::new(0, "gpu0", DeviceType::Gpu).with_aspect(Aspect::Fp16),
            DeviceInfo::new(1, "cpu0", DeviceType::Cpu).with_aspect(Aspect::UsmHostAllocations),
        ],
    )
}

/// 0, 1, 2, ... as f32
pub fn iota(n: usize) -> Vec<f32> {
    (0..n).map(|i| i as f32).collect()
}
