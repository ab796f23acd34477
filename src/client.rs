//! Localization client.
//!
//! One background worker owns the server connection and runs every exchange
//! and every trajectory mutation in submission order. The caller side only
//! enqueues tasks and polls the reply of the single outstanding request.
//!
//! ```text
//! submit_image ──► [Fuse | Invalidate]? ──► Localize ──► worker ──► server
//!      ▲                                                   │
//!      └──────────── reply (polled, never awaited) ◄───────┘
//! ```

use std::io::{Read, Write};
use std::net::{TcpStream, ToSocketAddrs};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::{self, JoinHandle};

use crossbeam::channel::{bounded, unbounded, Receiver, Sender, TryRecvError, TrySendError};

use crate::config::{ImageConfig, TrackerConfig};
use crate::error::{lock_poisoned, Result, TrackerError};
use crate::fuser::{FloorplanTrajectory, TrajectoryFuser, TrajectorySegment};
use crate::image_prep::prepare_image;
use crate::pose::{parse_pose, LocalizationReply, Pose};
use crate::protocol::{
    read_calibration_reply, read_pose_reply, write_calibration_request, write_localization_request,
    write_termination, CalibrationData,
};
use crate::transform::WorldTransform;
use crate::types::Vec3;

/// Fusion updates kept for the caller; older cycles stay in the trajectory
pub const UPDATE_QUEUE_CAPACITY: usize = 64;

/// State shared between the sensor thread (appends) and the worker (fusion)
struct FusionState {
    fuser: TrajectoryFuser,
    transform: WorldTransform,
}

/// Result of one fusion cycle, streamed to the caller
#[derive(Clone, Debug, PartialEq)]
pub struct FusionUpdate {
    pub segment: TrajectorySegment,
    pub transform: WorldTransform,
}

#[derive(Clone, Debug, PartialEq)]
pub enum SubmitOutcome {
    /// No request was outstanding; this image went out
    Dispatched,
    /// A request is still in flight; this image was discarded
    Dropped,
    /// The outstanding request finished and this image went out in its place
    Completed {
        localized_timestamp: i64,
        reply: LocalizationReply,
        pose: Option<Pose>,
    },
}

enum Task {
    Localize {
        image_timestamp: i64,
        jpeg: Vec<u8>,
        reply: Sender<Result<LocalizationReply>>,
    },
    Fuse {
        image_timestamp: i64,
        pose: Pose,
    },
    Invalidate,
    Calibrate {
        reply: Sender<Result<CalibrationData>>,
    },
    Terminate {
        done: Sender<Result<()>>,
    },
}

struct PendingRequest {
    image_timestamp: i64,
    reply: Receiver<Result<LocalizationReply>>,
}

/// Handle for the sensor thread to feed inertial positions into the fuser
#[derive(Clone)]
pub struct DeltaSink {
    fusion: Arc<Mutex<FusionState>>,
}

impl DeltaSink {
    pub fn append(&self, deltas: Vec<(i64, Vec3)>) -> Result<()> {
        if deltas.is_empty() {
            return Ok(());
        }
        let mut state = self.fusion.lock().map_err(|_| lock_poisoned("fusion"))?;
        state.fuser.append_deltas(deltas);
        Ok(())
    }
}

pub struct LocalizationClient {
    tasks: Option<Sender<Task>>,
    worker: Option<JoinHandle<()>>,
    fusion: Arc<Mutex<FusionState>>,
    pending: Option<PendingRequest>,
    updates: Receiver<FusionUpdate>,
    failure: Option<String>,
}

impl LocalizationClient {
    /// Connect to the localization server and start the worker.
    pub fn connect(config: &TrackerConfig) -> Result<Self> {
        let address = config.server.address();
        let socket_addr = address.to_socket_addrs()?.next().ok_or_else(|| {
            TrackerError::InvalidConfig(format!("{} does not resolve to an address", address))
        })?;

        let stream = TcpStream::connect_timeout(&socket_addr, config.server.connect_timeout())?;
        stream.set_read_timeout(config.server.io_timeout())?;
        stream.set_write_timeout(config.server.io_timeout())?;
        stream.set_nodelay(true)?;
        log::info!("Connected to localization server at {}", socket_addr);

        Self::with_stream(stream, config)
    }

    /// Start the worker on an already established stream.
    pub fn with_stream<S>(stream: S, config: &TrackerConfig) -> Result<Self>
    where
        S: Read + Write + Send + 'static,
    {
        let fusion = Arc::new(Mutex::new(FusionState {
            fuser: TrajectoryFuser::new(),
            transform: WorldTransform::identity(config.floorplan_scale),
        }));
        let (task_tx, task_rx) = unbounded();
        let (update_tx, update_rx) = bounded(UPDATE_QUEUE_CAPACITY);

        let worker = Worker {
            stream: Some(stream),
            broken: None,
            fusion: fusion.clone(),
            image: config.image.clone(),
            max_frame_bytes: config.server.max_frame_bytes,
            updates: update_tx,
        };
        let handle = thread::Builder::new()
            .name("localization-worker".to_string())
            .spawn(move || worker.run(task_rx))?;

        Ok(Self {
            tasks: Some(task_tx),
            worker: Some(handle),
            fusion,
            pending: None,
            updates: update_rx,
            failure: None,
        })
    }

    /// Buffers `new_deltas`, then applies the admission policy to the image:
    /// dispatch it when nothing is outstanding, drop it while a request is in
    /// flight, or consume the finished reply and dispatch it in its place.
    pub fn submit_image(
        &mut self,
        image_timestamp: i64,
        jpeg: Vec<u8>,
        new_deltas: Vec<(i64, Vec3)>,
    ) -> Result<SubmitOutcome> {
        self.ensure_running()?;
        self.lock_fusion()?.fuser.append_deltas(new_deltas);

        let Some(pending) = self.pending.as_ref() else {
            self.dispatch(image_timestamp, jpeg)?;
            return Ok(SubmitOutcome::Dispatched);
        };
        let localized_timestamp = pending.image_timestamp;

        let result = match pending.reply.try_recv() {
            Ok(result) => result,
            Err(TryRecvError::Empty) => {
                log::debug!(
                    "Dropping image {}: request for {} still in flight",
                    image_timestamp,
                    localized_timestamp
                );
                return Ok(SubmitOutcome::Dropped);
            }
            Err(TryRecvError::Disconnected) => {
                self.pending = None;
                return Err(self.mark_failed(TrackerError::WorkerUnavailable));
            }
        };
        self.pending = None;

        let reply = match result {
            Ok(reply) => reply,
            Err(e) if e.is_fatal() => return Err(self.mark_failed(e)),
            Err(e) => {
                log::warn!("Localization of image {} failed: {}", localized_timestamp, e);
                self.dispatch(image_timestamp, jpeg)?;
                return Err(e);
            }
        };

        let pose = match &reply {
            LocalizationReply::NoMatch => {
                log::info!("Image {} did not localize", localized_timestamp);
                self.send(Task::Invalidate)?;
                None
            }
            LocalizationReply::Matched(text) => match parse_pose(text) {
                Ok(pose) => {
                    log::info!("Image {} localized at {:?}", localized_timestamp, pose.values());
                    self.send(Task::Fuse { image_timestamp, pose })?;
                    Some(pose)
                }
                Err(e) => {
                    log::warn!("Discarding reply for image {}: {}", localized_timestamp, e);
                    self.dispatch(image_timestamp, jpeg)?;
                    return Err(e);
                }
            },
        };

        self.dispatch(image_timestamp, jpeg)?;
        Ok(SubmitOutcome::Completed {
            localized_timestamp,
            reply,
            pose,
        })
    }

    /// Outstanding localization requests, always 0 or 1
    pub fn in_flight(&self) -> usize {
        usize::from(self.pending.is_some())
    }

    /// Whether the outstanding request has a reply waiting to be consumed
    pub fn reply_ready(&self) -> bool {
        self.pending
            .as_ref()
            .map(|p| !p.reply.is_empty())
            .unwrap_or(false)
    }

    /// Runs a calibration exchange and installs the received transform.
    /// Blocks until the worker has processed every earlier task.
    pub fn fetch_calibration(&mut self) -> Result<CalibrationData> {
        self.ensure_running()?;
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Task::Calibrate { reply: reply_tx })?;
        match reply_rx.recv() {
            Ok(Ok(data)) => Ok(data),
            Ok(Err(e)) if e.is_fatal() => Err(self.mark_failed(e)),
            Ok(Err(e)) => Err(e),
            Err(_) => Err(self.mark_failed(TrackerError::WorkerUnavailable)),
        }
    }

    pub fn delta_sink(&self) -> DeltaSink {
        DeltaSink {
            fusion: self.fusion.clone(),
        }
    }

    /// Fusion results in the order the worker produced them. Holds at most
    /// `UPDATE_QUEUE_CAPACITY` undrained updates.
    pub fn updates(&self) -> &Receiver<FusionUpdate> {
        &self.updates
    }

    pub fn trajectory(&self) -> Result<FloorplanTrajectory> {
        Ok(self.lock_fusion()?.fuser.trajectory().clone())
    }

    pub fn transform(&self) -> Result<WorldTransform> {
        Ok(self.lock_fusion()?.transform)
    }

    pub fn is_failed(&self) -> bool {
        self.failure.is_some()
    }

    /// Sends the termination opcode after all queued work, waits for it and
    /// stops the worker. Later calls are no-ops.
    pub fn shutdown(&mut self) -> Result<()> {
        let Some(tasks) = self.tasks.take() else {
            return Ok(());
        };

        let (done_tx, done_rx) = bounded(1);
        let result = match tasks.send(Task::Terminate { done: done_tx }) {
            Ok(()) => done_rx.recv().unwrap_or(Err(TrackerError::WorkerUnavailable)),
            Err(_) => Err(TrackerError::WorkerUnavailable),
        };
        drop(tasks);

        if let Some(handle) = self.worker.take() {
            if handle.join().is_err() {
                log::error!("Localization worker panicked");
            }
        }
        self.pending = None;
        log::info!("Localization client shut down");
        result
    }

    fn dispatch(&mut self, image_timestamp: i64, jpeg: Vec<u8>) -> Result<()> {
        let (reply_tx, reply_rx) = bounded(1);
        self.send(Task::Localize {
            image_timestamp,
            jpeg,
            reply: reply_tx,
        })?;
        self.pending = Some(PendingRequest {
            image_timestamp,
            reply: reply_rx,
        });
        log::debug!("Dispatched image {}", image_timestamp);
        Ok(())
    }

    fn send(&mut self, task: Task) -> Result<()> {
        let sent = match &self.tasks {
            Some(tasks) => tasks.send(task).is_ok(),
            None => false,
        };
        if sent {
            Ok(())
        } else {
            Err(self.mark_failed(TrackerError::WorkerUnavailable))
        }
    }

    fn ensure_running(&self) -> Result<()> {
        if let Some(reason) = &self.failure {
            return Err(TrackerError::SessionFailed(reason.clone()));
        }
        if self.tasks.is_none() {
            return Err(TrackerError::InvalidState(
                "localization client is shut down".to_string(),
            ));
        }
        Ok(())
    }

    fn mark_failed(&mut self, err: TrackerError) -> TrackerError {
        log::error!("Localization session failed: {}", err);
        if self.failure.is_none() {
            self.failure = Some(err.to_string());
        }
        err
    }

    fn lock_fusion(&self) -> Result<MutexGuard<'_, FusionState>> {
        self.fusion.lock().map_err(|_| lock_poisoned("fusion"))
    }
}

impl Drop for LocalizationClient {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("Localization client shutdown failed: {}", e);
        }
    }
}

struct Worker<S> {
    stream: Option<S>,
    /// Set by the first fatal I/O error; no further exchanges are attempted
    broken: Option<String>,
    fusion: Arc<Mutex<FusionState>>,
    image: ImageConfig,
    max_frame_bytes: usize,
    updates: Sender<FusionUpdate>,
}

impl<S: Read + Write> Worker<S> {
    fn run(mut self, tasks: Receiver<Task>) {
        log::info!("Localization worker started");
        for task in tasks.iter() {
            match task {
                Task::Localize {
                    image_timestamp,
                    jpeg,
                    reply,
                } => {
                    let result = self.localize(image_timestamp, &jpeg);
                    let _ = reply.send(result);
                }
                Task::Fuse {
                    image_timestamp,
                    pose,
                } => {
                    if let Err(e) = self.fuse(image_timestamp, &pose) {
                        log::error!("Fusion at {} failed: {}", image_timestamp, e);
                    }
                }
                Task::Invalidate => match self.fusion.lock() {
                    Ok(mut state) => state.fuser.invalidate_reference(),
                    Err(_) => log::error!("{}", lock_poisoned("fusion")),
                },
                Task::Calibrate { reply } => {
                    let result = self.calibrate();
                    let _ = reply.send(result);
                }
                Task::Terminate { done } => {
                    let _ = done.send(self.terminate());
                    break;
                }
            }
        }
        log::info!("Localization worker stopped");
    }

    fn localize(&mut self, image_timestamp: i64, jpeg: &[u8]) -> Result<LocalizationReply> {
        let prepared = prepare_image(jpeg, &self.image)?;
        let max_frame_bytes = self.max_frame_bytes;
        let reply = self.exchange(|stream| {
            write_localization_request(stream, &prepared)?;
            read_pose_reply(stream, max_frame_bytes)
        })?;
        log::debug!(
            "Reply for image {} ({} bytes sent): {:?}",
            image_timestamp,
            prepared.len(),
            reply
        );
        Ok(reply)
    }

    fn fuse(&self, image_timestamp: i64, pose: &Pose) -> Result<()> {
        let mut state = self.fusion.lock().map_err(|_| lock_poisoned("fusion"))?;
        let FusionState { fuser, transform } = &mut *state;

        let segment = fuser.consume_up_to(image_timestamp, pose, transform);
        if let Some(rotation) = pose.rotation() {
            transform.recompute(&rotation);
            log::debug!("World transform recomputed from rotation {:?}", rotation);
        }
        let update = FusionUpdate {
            segment,
            transform: *transform,
        };
        drop(state);

        if let Err(TrySendError::Full(update)) = self.updates.try_send(update) {
            log::debug!(
                "Update queue full, dropping update for image {}",
                update.segment.image_timestamp
            );
        }
        Ok(())
    }

    fn calibrate(&mut self) -> Result<CalibrationData> {
        let max_frame_bytes = self.max_frame_bytes;
        let data = self.exchange(|stream| {
            write_calibration_request(stream)?;
            read_calibration_reply(stream, max_frame_bytes)
        })?;
        if !(data.floorplan_scale.is_finite() && data.floorplan_scale > 0.0) {
            return Err(TrackerError::Protocol(format!(
                "invalid floorplan scale {}",
                data.floorplan_scale
            )));
        }

        let mut state = self.fusion.lock().map_err(|_| lock_poisoned("fusion"))?;
        state.transform = WorldTransform::new(data.transform, data.floorplan_scale);
        log::info!(
            "Calibration received: floorplan {} bytes, scale {}",
            data.floorplan_image.len(),
            data.floorplan_scale
        );
        Ok(data)
    }

    fn terminate(&mut self) -> Result<()> {
        let result = if self.broken.is_none() {
            self.exchange(|stream| write_termination(stream))
        } else {
            Ok(())
        };
        // Dropping the stream closes the connection
        self.stream = None;
        result
    }

    fn exchange<T>(&mut self, exchange: impl FnOnce(&mut S) -> Result<T>) -> Result<T> {
        if let Some(reason) = &self.broken {
            return Err(TrackerError::SessionFailed(reason.clone()));
        }
        let stream = self
            .stream
            .as_mut()
            .ok_or_else(|| TrackerError::InvalidState("connection already closed".to_string()))?;

        let result = exchange(stream);
        if let Err(e) = &result {
            if e.is_fatal() {
                log::error!("Localization link failed: {}", e);
                self.broken = Some(e.to_string());
            }
        }
        result
    }
}
