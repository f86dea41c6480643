//! Execution queue: hazard inference, dependency counting and dispatch onto
//! the emulated device's worker lanes
//!
//! # Lifecycle of a task
//!
//! 1. `submit` runs the command group, infers hazard edges and registers a
//!    completion callback on every unfinished predecessor
//! 2. Each finished predecessor decrements the task's pending count; at zero
//!    the task is spawned on the thread pool
//! 3. The worker locks the task's memory, runs the kernel and completes the
//!    event, which in turn releases its dependents
//!
//! Faults never unwind out of a worker. They are queued on the error channel
//! and handed out by [`Queue::drain_async_errors`] or the async handler.

use std::collections::{BTreeSet, HashMap};
// std locks so a poisoned scheduler surfaces as `OffloadError::LockPoisoned`
use std::sync::{Arc, Condvar, Mutex, PoisonError};

use rayon::{ThreadPool, ThreadPoolBuilder};

use super::config::QueueConfig;
use super::event::Event;
use super::hazard::{self, HazardEdge};
use super::stats::QueueStats;
use crate::device::{select_device, Aspect, DeviceInfo, DeviceSelector, EmulatedPlatform, Platform};
use crate::error::{OffloadError, OffloadResult};
use crate::kernel::{Handler, KernelArgs, KernelTask, TaskId, TaskState};
use crate::memory::usm::elements_for_bytes;
use crate::memory::{DevicePtr, Element, ReadOnly, WriteOnly};

/// Receives asynchronous faults handed over by the queue
pub type AsyncHandler = Box<dyn Fn(Vec<OffloadError>) + Send + Sync>;

/// Log every fault and abort the caller with a panic
///
/// Used when no handler is supplied. Does not panic while the thread is
/// already unwinding.
pub fn default_async_handler(errors: Vec<OffloadError>) {
    for err in &errors {
        tracing::error!(error = %err, "unhandled asynchronous fault");
    }
    if !std::thread::panicking() {
        panic!("{} unhandled asynchronous fault(s)", errors.len());
    }
}

struct TaskRecord {
    event: Event,
    pending: usize,
    failed_predecessor: Option<TaskId>,
    work: Option<KernelTask>,
}

#[derive(Default)]
struct SchedulerState {
    tasks: HashMap<TaskId, TaskRecord>,
    last_submitted: Option<Event>,
    shutting_down: bool,
    stats: QueueStats,
}

/// A task whose predecessors have all finished
struct Ready {
    task: KernelTask,
    event: Event,
    failed_predecessor: Option<TaskId>,
}

struct Shared {
    pool: ThreadPool,
    state: Mutex<SchedulerState>,
    drained: Condvar,
    errors: Mutex<Vec<OffloadError>>,
    profiling: bool,
}

impl Shared {
    fn lock_state(&self) -> std::sync::MutexGuard<'_, SchedulerState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn push_fault(&self, fault: OffloadError) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(fault);
    }

    /// Called when predecessor `pred` of `task` finishes
    fn predecessor_finished(
        self: &Arc<Self>,
        task: TaskId,
        pred: TaskId,
        status: TaskState,
        carries_failure: bool,
    ) {
        let ready = {
            let mut state = self.lock_state();
            let Some(record) = state.tasks.get_mut(&task) else {
                return;
            };
            if carries_failure && status == TaskState::Failed {
                record.failed_predecessor.get_or_insert(pred);
            }
            record.pending -= 1;
            take_if_ready(record)
        };
        if let Some(ready) = ready {
            self.dispatch(ready);
        }
    }

    fn dispatch(self: &Arc<Self>, ready: Ready) {
        let shared = Arc::clone(self);
        tracing::trace!(task = %ready.task.id, label = %ready.task.label, "dispatching task");
        self.pool.spawn_fifo(move || shared.execute(ready));
    }

    fn execute(&self, ready: Ready) {
        let Ready {
            task,
            event,
            failed_predecessor,
        } = ready;
        let KernelTask {
            id,
            label,
            tag,
            requests,
            command,
        } = task;

        let outcome = match failed_predecessor {
            Some(pred) => Err(format!("predecessor task {} failed", pred)),
            None => {
                event.set_status(TaskState::Dispatched);
                match KernelArgs::bind(tag, id, &requests) {
                    Ok(mut args) => KernelTask::run(command, &mut args),
                    Err(err) => Err(err.to_string()),
                }
            }
        };

        let status = match outcome {
            Ok(()) => TaskState::Completed,
            Err(message) => {
                tracing::warn!(task = %id, label = %label, %message, "task failed");
                self.push_fault(OffloadError::AsynchronousDeviceFault {
                    task: id,
                    label: label.clone(),
                    message,
                });
                TaskState::Failed
            }
        };

        // Dependents are released by the event callbacks; the record goes
        // afterwards so `wait` only returns once every event is final.
        event.complete(status);

        let mut state = self.lock_state();
        state.tasks.remove(&id);
        match status {
            TaskState::Completed => state.stats.completed += 1,
            _ => state.stats.failed += 1,
        }
        tracing::trace!(task = %id, ?status, "task finished");
        if state.tasks.is_empty() {
            self.drained.notify_all();
        }
    }
}

/// Add `edge` unless its event is already listed; failure propagation wins
fn merge_edge(edges: &mut Vec<HazardEdge>, edge: HazardEdge) {
    match edges.iter_mut().find(|e| e.event.same_as(&edge.event)) {
        Some(existing) => existing.carries_failure |= edge.carries_failure,
        None => edges.push(edge),
    }
}

fn take_if_ready(record: &mut TaskRecord) -> Option<Ready> {
    if record.pending > 0 {
        return None;
    }
    let task = record.work.take()?;
    Some(Ready {
        task,
        event: record.event.clone(),
        failed_predecessor: record.failed_predecessor,
    })
}

/// In-order or out-of-order queue bound to one device
pub struct Queue {
    device: DeviceInfo,
    config: QueueConfig,
    shared: Arc<Shared>,
    handler: AsyncHandler,
}

impl Queue {
    /// Queue on the default emulated platform, configured from the environment
    pub fn new<S>(selector: &S) -> OffloadResult<Self>
    where
        S: DeviceSelector + ?Sized,
    {
        Self::with_handler(selector, default_async_handler)
    }

    /// Like [`Queue::new`] with a custom async handler
    pub fn with_handler<S, H>(selector: &S, handler: H) -> OffloadResult<Self>
    where
        S: DeviceSelector + ?Sized,
        H: Fn(Vec<OffloadError>) + Send + Sync + 'static,
    {
        Self::with_platform(
            &EmulatedPlatform::default(),
            selector,
            QueueConfig::from_env()?,
            handler,
        )
    }

    /// Select a device from `platform` and start its worker lanes
    pub fn with_platform<P, S, H>(
        platform: &P,
        selector: &S,
        config: QueueConfig,
        handler: H,
    ) -> OffloadResult<Self>
    where
        P: Platform + ?Sized,
        S: DeviceSelector + ?Sized,
        H: Fn(Vec<OffloadError>) + Send + Sync + 'static,
    {
        config.validate()?;
        let device = select_device(&platform.devices(), selector)?;

        if config.enable_profiling && !device.has(Aspect::QueueProfiling) {
            return Err(OffloadError::UnsupportedAspect {
                device: device.name.clone(),
                aspect: Aspect::QueueProfiling.to_string(),
            });
        }

        let lanes = config.worker_threads.unwrap_or(device.compute_units).max(1);
        let prefix = config.thread_name_prefix.clone();
        let pool = ThreadPoolBuilder::new()
            .num_threads(lanes)
            .thread_name(move |i| format!("{}-{}", prefix, i))
            .build()
            .map_err(|e| crate::internal_error!("failed to start worker lanes: {}", e))?;

        tracing::info!(
            platform = platform.name(),
            device = %device,
            lanes,
            in_order = config.in_order,
            profiling = config.enable_profiling,
            "created queue"
        );

        Ok(Self {
            shared: Arc::new(Shared {
                pool,
                state: Mutex::new(SchedulerState::default()),
                drained: Condvar::new(),
                errors: Mutex::new(Vec::new()),
                profiling: config.enable_profiling,
            }),
            device,
            config,
            handler: Box::new(handler),
        })
    }

    pub fn device(&self) -> &DeviceInfo {
        &self.device
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn is_in_order(&self) -> bool {
        self.config.in_order
    }

    /// Run a command group and enqueue the task it describes
    ///
    /// The group declares accesses and at most one kernel on the [`Handler`].
    /// Errors from the group are returned here and nothing is enqueued.
    pub fn submit<F>(&self, cgf: F) -> OffloadResult<Event>
    where
        F: FnOnce(&mut Handler) -> OffloadResult<()>,
    {
        if self.shared.state.lock()?.shutting_down {
            return Err(OffloadError::ShutdownInProgress);
        }

        let mut handler = Handler::new();
        cgf(&mut handler)?;
        let group = handler.finish();

        let mut storages = Vec::with_capacity(group.requests.len());
        for request in &group.requests {
            match request.storage.upgrade() {
                Some(storage) if !storage.is_released() => storages.push(storage),
                _ => return Err(OffloadError::DanglingBufferReference(request.buffer.0)),
            }
        }

        let (event, ready) = {
            let _order = hazard::submission_order();
            let mut state = self.shared.state.lock()?;
            if state.shutting_down {
                return Err(OffloadError::ShutdownInProgress);
            }

            let id = TaskId::next();
            let label = group
                .label
                .unwrap_or_else(|| format!("{}{}", group.command.kind(), id));

            let mut edges: Vec<HazardEdge> = Vec::new();
            for (storage, request) in storages.iter().zip(&group.requests) {
                if !request.tracked {
                    continue;
                }
                for edge in storage.hazards().lock().edges(request.mode) {
                    merge_edge(&mut edges, edge);
                }
            }
            let hazard_edges = edges.len();

            let mut explicit = group.deps;
            if self.config.in_order {
                if let Some(last) = &state.last_submitted {
                    explicit.push(last.clone());
                }
            }
            for event in explicit {
                merge_edge(
                    &mut edges,
                    HazardEdge {
                        event,
                        carries_failure: true,
                    },
                );
            }
            let predecessor_ids: BTreeSet<TaskId> =
                edges.iter().map(|e| e.event.task_id()).collect();

            let event = Event::new(
                id,
                label.clone(),
                predecessor_ids.into_iter().collect(),
                self.shared.profiling,
            );
            for (storage, request) in storages.iter().zip(&group.requests) {
                if request.tracked {
                    storage.hazards().lock().commit(&event, request.mode);
                }
                storage.record_use(event.clone(), request.mode);
            }

            state.stats.submitted += 1;
            state.stats.hazard_edges += hazard_edges as u64;
            state.stats.explicit_edges += (edges.len() - hazard_edges) as u64;
            state.last_submitted = Some(event.clone());

            let mut record = TaskRecord {
                event: event.clone(),
                // guard so no callback can dispatch before registration ends
                pending: 1,
                failed_predecessor: None,
                work: Some(KernelTask {
                    id,
                    label: label.clone(),
                    tag: group.tag,
                    requests: group.requests,
                    command: group.command,
                }),
            };

            for edge in &edges {
                let shared = Arc::clone(&self.shared);
                let pred_id = edge.event.task_id();
                let carries_failure = edge.carries_failure;
                match edge.event.on_complete(move |status| {
                    shared.predecessor_finished(id, pred_id, status, carries_failure)
                }) {
                    Ok(()) => record.pending += 1,
                    Err(TaskState::Failed) if carries_failure => {
                        record.failed_predecessor.get_or_insert(pred_id);
                    }
                    Err(_) => {}
                }
            }
            record.pending -= 1;

            tracing::debug!(
                task = %id,
                label = %label,
                predecessors = ?event.predecessors(),
                pending = record.pending,
                "submitted task"
            );

            let ready = take_if_ready(&mut record);
            if ready.is_none() {
                event.set_status(TaskState::Waiting);
            }
            state.tasks.insert(id, record);
            (event, ready)
        };

        if let Some(ready) = ready {
            self.shared.dispatch(ready);
        }
        Ok(event)
    }

    /// Block until every submitted task has finished
    pub fn wait(&self) -> OffloadResult<()> {
        let mut state = self.shared.state.lock()?;
        while !state.tasks.is_empty() {
            state = self.shared.drained.wait(state)?;
        }
        Ok(())
    }

    /// Wait, then hand pending faults to the async handler
    pub fn wait_and_throw(&self) -> OffloadResult<()> {
        self.wait()?;
        self.throw_asynchronous()
    }

    /// Hand pending faults to the async handler without waiting
    pub fn throw_asynchronous(&self) -> OffloadResult<()> {
        let errors = self.drain_async_errors()?;
        if !errors.is_empty() {
            (self.handler)(errors);
        }
        Ok(())
    }

    /// Take every fault reported so far
    pub fn drain_async_errors(&self) -> OffloadResult<Vec<OffloadError>> {
        let mut errors = self.shared.errors.lock()?;
        Ok(std::mem::take(&mut *errors))
    }

    /// Refuse new submissions and wait for in-flight tasks
    pub fn shutdown(&self) -> OffloadResult<()> {
        {
            let mut state = self.shared.state.lock()?;
            if !state.shutting_down {
                tracing::debug!(in_flight = state.tasks.len(), "queue shutting down");
            }
            state.shutting_down = true;
        }
        self.wait()
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shared.lock_state().shutting_down
    }

    pub fn stats(&self) -> OffloadResult<QueueStats> {
        let state = self.shared.state.lock()?;
        let mut stats = state.stats.clone();
        stats.in_flight = state.tasks.len();
        Ok(stats)
    }

    // ========== Unified shared memory ==========

    /// Allocate `count` default-initialised elements on the device
    pub fn malloc_device<T: Element>(&self, count: usize) -> OffloadResult<DevicePtr<T>> {
        if !self.device.has(Aspect::UsmDeviceAllocations) {
            return Err(OffloadError::UnsupportedAspect {
                device: self.device.name.clone(),
                aspect: Aspect::UsmDeviceAllocations.to_string(),
            });
        }
        if count == 0 {
            return Err(crate::range_error!("device allocation of zero elements"));
        }
        let bytes = count
            .checked_mul(std::mem::size_of::<T>())
            .ok_or_else(|| crate::range_error!("allocation of {} elements overflows", count))?;
        if self.device.memory > 0 && bytes > self.device.memory {
            return Err(crate::range_error!(
                "allocation of {} bytes exceeds device memory of {} bytes",
                bytes,
                self.device.memory
            ));
        }

        let ptr = DevicePtr::alloc(count);
        tracing::debug!(ptr = %ptr.id(), count, bytes, "allocated device memory");
        Ok(ptr)
    }

    /// Copy `byte_count` bytes from host memory into `dst`
    ///
    /// The source is staged at call time, so `src` may be reused immediately.
    pub fn memcpy_to_device<T: Element>(
        &self,
        dst: &DevicePtr<T>,
        src: &[T],
        byte_count: usize,
        deps: &[Event],
    ) -> OffloadResult<Event> {
        dst.ensure_live()?;
        let count = elements_for_bytes::<T>(byte_count, src.len().min(dst.len()))?;
        let staged = src[..count].to_vec();

        self.submit(|h| {
            h.set_name("memcpy_to_device");
            h.depends_on_all(deps);
            if count == 0 {
                return Ok(());
            }
            let out = h.access_range::<T, WriteOnly, _>(dst, 0, count)?;
            h.single_task(move |args| args.slice_mut(out).copy_from_slice(&staged))
        })
    }

    /// Copy `byte_count` bytes from `src` into host memory
    ///
    /// Blocks until the copy has landed and returns its finished event. If
    /// the copy fails, `dst` is left untouched and the fault is queued.
    pub fn memcpy_to_host<T: Element>(
        &self,
        dst: &mut [T],
        src: &DevicePtr<T>,
        byte_count: usize,
        deps: &[Event],
    ) -> OffloadResult<Event> {
        src.ensure_live()?;
        let count = elements_for_bytes::<T>(byte_count, dst.len().min(src.len()))?;
        let staging = Arc::new(parking_lot::Mutex::new(Vec::new()));

        let event = {
            let staging = Arc::clone(&staging);
            self.submit(|h| {
                h.set_name("memcpy_to_host");
                h.depends_on_all(deps);
                if count == 0 {
                    return Ok(());
                }
                let input = h.access_range::<T, ReadOnly, _>(src, 0, count)?;
                h.single_task(move |args| *staging.lock() = args.slice(input).to_vec())
            })?
        };

        if event.wait() == TaskState::Completed {
            let staged = staging.lock();
            dst[..staged.len()].copy_from_slice(&staged);
        }
        Ok(event)
    }

    /// Copy `byte_count` bytes between two device allocations
    pub fn memcpy<T: Element>(
        &self,
        dst: &DevicePtr<T>,
        src: &DevicePtr<T>,
        byte_count: usize,
        deps: &[Event],
    ) -> OffloadResult<Event> {
        dst.ensure_live()?;
        src.ensure_live()?;
        let count = elements_for_bytes::<T>(byte_count, dst.len().min(src.len()))?;

        self.submit(|h| {
            h.set_name("memcpy");
            h.depends_on_all(deps);
            if count == 0 {
                return Ok(());
            }
            let input = h.access_range::<T, ReadOnly, _>(src, 0, count)?;
            let out = h.access_range::<T, WriteOnly, _>(dst, 0, count)?;
            h.single_task(move |args| {
                let staged = args.slice(input).to_vec();
                args.slice_mut(out).copy_from_slice(&staged);
            })
        })
    }

    /// Wait for every task using `ptr`, then release it
    pub fn free<T: Element>(&self, ptr: DevicePtr<T>) -> OffloadResult<()> {
        ptr.ensure_live()?;
        ptr.storage().wait_all();
        if ptr.storage().release() {
            tracing::debug!(ptr = %ptr.id(), "freed device memory");
        }
        Ok(())
    }
}

impl Drop for Queue {
    fn drop(&mut self) {
        if let Err(err) = self.shutdown() {
            tracing::error!(error = %err, "queue shutdown failed");
        }
        let errors = std::mem::take(
            &mut *self
                .shared
                .errors
                .lock()
                .unwrap_or_else(PoisonError::into_inner),
        );
        if !errors.is_empty() {
            tracing::error!(count = errors.len(), "queue dropped with undrained faults");
            (self.handler)(errors);
        }
    }
}

impl std::fmt::Debug for Queue {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Queue")
            .field("device", &self.device.name)
            .field("config", &self.config)
            .finish()
    }
}
