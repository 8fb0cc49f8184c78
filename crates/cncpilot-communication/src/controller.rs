//! Controller facade: typed machine operations over one port binding,
//! backed by driver capability probes, plus the job lifecycle.

use crate::firmware::ControllerStatus;
use crate::job::JobStream;
use crate::spjs::PortBinding;
use cncpilot_core::{Error, JobStatus, Result};
use std::sync::Arc;
use tokio::io::AsyncRead;
use tokio::sync::{watch, Mutex};
use tokio_util::sync::CancellationToken;

/// Typed operations for one machine. Each capability method probes the
/// driver; absent capabilities surface as `UnsupportedByDriver`. Owns at
/// most one job streamer; installing a new job closes the previous one.
pub struct Controller {
    binding: Arc<PortBinding>,
    job: Mutex<Option<JobStream>>,
    job_status_tx: watch::Sender<JobStatus>,
}

impl Controller {
    pub fn new(binding: Arc<PortBinding>) -> Self {
        let (job_status_tx, _) = watch::channel(JobStatus::default());
        Self {
            binding,
            job: Mutex::new(None),
            job_status_tx,
        }
    }

    /// The bound driver's name.
    pub fn name(&self) -> &str {
        self.binding.driver().name()
    }

    /// True while the machine's serial port is matched and open.
    pub fn connected(&self) -> bool {
        self.binding.connected()
    }

    async fn dispatch(
        &self,
        payload: Option<String>,
        wait: bool,
        cancel: CancellationToken,
    ) -> Result<()> {
        let payload = payload.ok_or(Error::UnsupportedByDriver)?;
        self.binding.send_command(payload, wait, cancel).await
    }

    /// Run the homing cycle.
    pub async fn command_home(&self, wait: bool, cancel: CancellationToken) -> Result<()> {
        self.dispatch(self.binding.driver().home_command(), wait, cancel)
            .await
    }

    /// Pause motion at the next planned stop.
    pub async fn command_feed_hold(&self, cancel: CancellationToken) -> Result<()> {
        self.dispatch(self.binding.driver().feed_hold_command(), false, cancel)
            .await
    }

    /// Resume motion after a feed hold.
    pub async fn command_cycle_start(&self, cancel: CancellationToken) -> Result<()> {
        self.dispatch(self.binding.driver().cycle_start_command(), false, cancel)
            .await
    }

    /// Reset the controller. An installed job is abandoned first and an
    /// empty status is published on the job-status stream.
    pub async fn command_reset(&self, cancel: CancellationToken) -> Result<()> {
        {
            let mut job = self.job.lock().await;
            if let Some(stream) = job.take() {
                stream.close().await;
                self.job_status_tx.send_replace(JobStatus::default());
            }
        }
        self.dispatch(self.binding.driver().reset_command(), false, cancel)
            .await
    }

    /// Emergency stop. Never waits.
    pub async fn command_estop(&self) -> Result<()> {
        self.dispatch(
            self.binding.driver().estop_command(),
            false,
            CancellationToken::new(),
        )
        .await
    }

    /// Jog `axis` by `mm` millimetres, relative.
    pub async fn command_jog(
        &self,
        axis: char,
        mm: f64,
        wait: bool,
        cancel: CancellationToken,
    ) -> Result<()> {
        self.dispatch(self.binding.driver().jog_command(axis, mm), wait, cancel)
            .await
    }

    /// Set the work coordinate of `axis` to `mm`.
    pub async fn set_wpos(&self, axis: char, mm: f64, cancel: CancellationToken) -> Result<()> {
        self.dispatch(self.binding.driver().wpos_command(axis, mm), true, cancel)
            .await
    }

    /// The driver's status stream, when it reports status.
    pub fn status(&self) -> Option<watch::Receiver<ControllerStatus>> {
        self.binding.driver().status_stream()
    }

    /// Latest status snapshot, when the driver reports status.
    pub fn last_status(&self) -> Option<ControllerStatus> {
        self.binding
            .driver()
            .status_stream()
            .map(|rx| rx.borrow().clone())
    }

    /// Job progress stream. Single-slot; starts out empty/invalid.
    pub fn job_status(&self) -> watch::Receiver<JobStatus> {
        self.job_status_tx.subscribe()
    }

    /// Install a new job from `reader`, replacing (and closing) any
    /// previous one. Reading starts immediately; sending waits for
    /// [`Controller::start_job`].
    pub async fn set_job(
        &self,
        name: &str,
        reader: impl AsyncRead + Send + Unpin + 'static,
    ) -> Result<()> {
        if self.binding.driver().wrap_gcode(&[]).is_none() {
            return Err(Error::UnsupportedByDriver);
        }

        let mut job = self.job.lock().await;
        if let Some(previous) = job.take() {
            previous.close().await;
        }
        *job = Some(JobStream::new(
            name,
            reader,
            self.binding.clone(),
            self.job_status_tx.clone(),
        ));
        Ok(())
    }

    /// Start streaming the installed job to the machine.
    pub async fn start_job(&self) -> Result<()> {
        let job = self.job.lock().await;
        match job.as_ref() {
            Some(stream) => stream.start(),
            None => Err(Error::NoLoadedJob),
        }
    }
}
