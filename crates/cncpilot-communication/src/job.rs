//! G-code job streamer.
//!
//! Two-stage pipeline. The read phase starts as soon as the job is
//! installed: it line-scans the input, drops blanks and `;` comments,
//! wraps chunks of lines into wire payloads and buffers them. The send
//! phase starts on demand: a producer submits chunks and hands their
//! completion handles to a consumer through a bounded window, which is
//! what bounds the work in flight; the consumer turns Write/Complete
//! acknowledgements into progress counts. The first error latches into
//! the job status and cancels everything.

use crate::firmware::Driver;
use crate::spjs::{CommandHandle, PortBinding};
use cncpilot_core::{Error, JobStatus, Result};
use std::sync::Arc;
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

/// Program lines wrapped into one command chunk.
const JOB_CHUNK_LINES: usize = 100;
/// Prepared chunks buffered between the read and send phases.
const JOB_CHUNK_BUFFER: usize = 100_000;
/// Command chunks allowed in flight at once.
const JOB_INFLIGHT_CHUNKS: usize = 3;
/// Chunks per `sendjson` frame. Must not exceed the in-flight window, or
/// the batch would never fill and emission would starve.
const SPJS_JOB_BATCH: usize = JOB_INFLIGHT_CHUNKS;

/// One installed job: shared progress state plus the tasks moving it.
pub(crate) struct JobStream {
    shared: Arc<JobShared>,
    binding: Arc<PortBinding>,
    /// Taken by `start`; `None` once the send phase is running.
    chunks: parking_lot::Mutex<Option<mpsc::Receiver<String>>>,
    tasks: parking_lot::Mutex<Vec<JoinHandle<()>>>,
}

struct JobShared {
    status: parking_lot::Mutex<JobStatus>,
    publish: watch::Sender<JobStatus>,
    cancel: CancellationToken,
}

impl JobShared {
    /// Apply `mutate` and publish, unless the job already failed (the
    /// error and the counters under it are frozen). Returns the status
    /// after the call.
    fn update(&self, mutate: impl FnOnce(&mut JobStatus)) -> JobStatus {
        let mut status = self.status.lock();
        if status.err.is_none() {
            mutate(&mut status);
            self.publish.send_replace(status.clone());
        }
        status.clone()
    }

    fn fail(&self, err: Error) {
        self.update(|status| status.err = Some(err));
        self.cancel.cancel();
    }

    fn snapshot(&self) -> JobStatus {
        self.status.lock().clone()
    }
}

impl JobStream {
    /// Install a job and start its read phase.
    pub(crate) fn new(
        name: &str,
        reader: impl AsyncRead + Send + Unpin + 'static,
        binding: Arc<PortBinding>,
        publish: watch::Sender<JobStatus>,
    ) -> Self {
        let shared = Arc::new(JobShared {
            status: parking_lot::Mutex::new(JobStatus::new(name)),
            publish,
            cancel: CancellationToken::new(),
        });
        shared.publish.send_replace(shared.snapshot());

        let (chunk_tx, chunk_rx) = mpsc::channel(JOB_CHUNK_BUFFER);
        let read_task = tokio::spawn(read_phase(
            shared.clone(),
            binding.driver().clone(),
            reader,
            chunk_tx,
        ));

        Self {
            shared,
            binding,
            chunks: parking_lot::Mutex::new(Some(chunk_rx)),
            tasks: parking_lot::Mutex::new(vec![read_task]),
        }
    }

    /// Start the send phase. Rejects a second start and a job that has
    /// already failed.
    pub(crate) fn start(&self) -> Result<()> {
        let mut was_active = false;
        let status = self.shared.update(|status| {
            was_active = status.active;
            status.active = true;
        });
        if let Some(err) = status.err {
            return Err(err);
        }
        if was_active {
            return Err(Error::JobAlreadyStarted);
        }
        let Some(chunks) = self.chunks.lock().take() else {
            return Err(Error::JobAlreadyStarted);
        };

        let (window_tx, window_rx) = mpsc::channel(JOB_INFLIGHT_CHUNKS);
        let producer = tokio::spawn(send_phase(
            self.shared.clone(),
            self.binding.clone(),
            chunks,
            window_tx,
        ));
        let consumer = tokio::spawn(track_phase(self.shared.clone(), window_rx));
        self.tasks.lock().extend([producer, consumer]);
        Ok(())
    }

    /// Cancel the job, wait for its tasks, and flush the port pipeline.
    pub(crate) async fn close(self) {
        self.shared.cancel.cancel();
        let tasks: Vec<JoinHandle<()>> = self.tasks.lock().drain(..).collect();
        for task in tasks {
            let _ = task.await;
        }
        self.binding.flush().await;
    }
}

/// Read phase: line-scan, filter, chunk, wrap. Runs from installation.
async fn read_phase(
    shared: Arc<JobShared>,
    driver: Arc<dyn Driver>,
    reader: impl AsyncRead + Send + Unpin + 'static,
    chunks: mpsc::Sender<String>,
) {
    let mut lines = BufReader::new(reader).lines();
    let mut chunk: Vec<String> = Vec::with_capacity(JOB_CHUNK_LINES);

    loop {
        let next = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            next = lines.next_line() => next,
        };
        match next {
            Ok(Some(line)) => {
                let trimmed = line.trim();
                if trimmed.is_empty() || trimmed.starts_with(';') {
                    continue;
                }
                shared.update(|status| status.read += 1);
                chunk.push(line);
                if chunk.len() >= JOB_CHUNK_LINES
                    && !push_chunk(&shared, &driver, &mut chunk, &chunks).await
                {
                    return;
                }
            }
            Ok(None) => break,
            Err(err) => {
                shared.fail(Error::JobRead(err.to_string()));
                return;
            }
        }
    }

    if !chunk.is_empty() && !push_chunk(&shared, &driver, &mut chunk, &chunks).await {
        return;
    }
    shared.update(|status| status.read_complete = true);
}

/// Wrap the accumulated chunk and queue it for the send phase. Returns
/// false when the read phase should stop.
async fn push_chunk(
    shared: &Arc<JobShared>,
    driver: &Arc<dyn Driver>,
    chunk: &mut Vec<String>,
    chunks: &mpsc::Sender<String>,
) -> bool {
    let lines = std::mem::take(chunk);
    let Some(payload) = driver.wrap_gcode(&lines) else {
        shared.fail(Error::UnsupportedByDriver);
        return false;
    };
    tokio::select! {
        _ = shared.cancel.cancelled() => false,
        sent = chunks.send(payload) => sent.is_ok(),
    }
}

/// Producer: submit prepared chunks, handing each completion handle to
/// the consumer through the bounded in-flight window. Always flushes the
/// port pipeline on the way out so a partial batch is not stranded.
async fn send_phase(
    shared: Arc<JobShared>,
    binding: Arc<PortBinding>,
    mut chunks: mpsc::Receiver<String>,
    window: mpsc::Sender<CommandHandle>,
) {
    loop {
        let payload = tokio::select! {
            _ = shared.cancel.cancelled() => break,
            payload = chunks.recv() => match payload {
                Some(payload) => payload,
                None => break,
            },
        };

        let handle = match binding.submit(payload, SPJS_JOB_BATCH).await {
            Ok(handle) => handle,
            Err(err) => {
                shared.fail(err);
                break;
            }
        };

        let queued = tokio::select! {
            _ = shared.cancel.cancelled() => false,
            sent = window.send(handle) => sent.is_ok(),
        };
        if !queued {
            break;
        }
    }
    binding.flush().await;
}

/// Consumer: account for each in-flight chunk. A `Write` bumps `sent`; a
/// terminal acknowledgement bumps `completed` (and `sent` too on the
/// fast path where `Complete` arrives before `Write` is observed).
async fn track_phase(shared: Arc<JobShared>, mut window: mpsc::Receiver<CommandHandle>) {
    loop {
        let mut handle = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            handle = window.recv() => match handle {
                Some(handle) => handle,
                None => return,
            },
        };

        let wrote = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            wrote = handle.written() => wrote,
        };
        if wrote {
            shared.update(|status| status.sent += 1);
        }

        let result = tokio::select! {
            _ = shared.cancel.cancelled() => return,
            result = handle.done() => result,
        };
        match result {
            Ok(()) => {
                shared.update(|status| {
                    if !wrote {
                        status.sent += 1;
                    }
                    status.completed += 1;
                });
            }
            Err(err) => {
                shared.fail(err);
                return;
            }
        }
    }
}
