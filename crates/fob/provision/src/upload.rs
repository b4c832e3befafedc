//! Upload pipeline
//!
//! Moves initialized fobs to the registry. A single upload asks the operator
//! before each retry; a batch upload fans out over every pending fob at once.
//! Nothing here retries on its own.
//!
//! Interactive uploads are tracked while they run: a batch skips the fobs they
//! hold, and [`UploadPipeline::close`] abandons their prompts and waits for
//! them, so no serial/secret pair is sent twice.

use std::collections::BTreeSet;
use std::fmt;
use std::sync::Arc;

use async_trait::async_trait;
use futures::future::join_all;
use tokio::runtime::Handle;
use tokio::sync::watch;
use tracing::{debug, error, info, instrument, warn};

use crate::fob::{Fob, FobPatch};
use crate::notice::{Notice, Notifier};
use crate::registry::Registry;
use crate::store::FobStore;
use crate::{Error, Result};

/// Operator decisions the pipeline waits on
#[async_trait]
pub trait Operator: Send + Sync + fmt::Debug {
    /// The upload of `fob` failed with `message`; `true` retries it
    async fn confirm_retry(&self, fob: &Fob, message: &str) -> bool;

    /// `fob` is initialized but not uploaded; `true` uploads it now
    async fn confirm_upload(&self, fob: &Fob) -> bool;

    /// `pending` display numbers are not uploaded at exit; `true` uploads
    /// them. `failures` holds the per-fob messages of the previous round.
    async fn confirm_batch(&self, pending: &[String], failures: Option<&str>) -> bool;
}

/// Result of an interactive upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum UploadResult {
    /// The registry accepted the fob
    Uploaded {
        /// Number of records created before this one
        ordinal: usize,
    },
    /// The operator gave up, or the pipeline closed
    Cancelled,
    /// Another upload got the fob accepted first
    AlreadyUploaded,
}

/// Result of a batch upload
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchOutcome {
    /// Fobs the registry accepted
    pub succeeded: Vec<Fob>,
    /// Fobs that failed, with the registry message
    pub failures: Vec<(Fob, String)>,
}

impl BatchOutcome {
    /// Whether every fob was accepted
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    /// One `displayNumber:message` line per failed fob
    pub fn failure_message(&self) -> String {
        self.failures
            .iter()
            .map(|(fob, message)| format!("{}:{message}", fob.display_number()))
            .collect::<Vec<_>>()
            .join("\n")
    }
}

/// Result of the exit flow
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ShutdownOutcome {
    /// Fobs left unuploaded, as recorded in the store
    pub remaining: usize,
    /// Batch rounds run
    pub rounds: usize,
}

/// Uploads fobs and records the outcome in the store
#[derive(Debug, Clone)]
pub struct UploadPipeline {
    registry: Arc<dyn Registry>,
    store: Arc<dyn FobStore>,
    notifier: Notifier,
    operator: Arc<dyn Operator>,
    closing: Arc<watch::Sender<bool>>,
    active: Arc<watch::Sender<BTreeSet<u64>>>,
}

/// Marks a fob as held by an interactive upload until dropped
struct ActiveUpload<'a> {
    active: &'a watch::Sender<BTreeSet<u64>>,
    id: u64,
}

impl<'a> ActiveUpload<'a> {
    /// `None` when another interactive upload already holds the fob
    fn claim(active: &'a watch::Sender<BTreeSet<u64>>, id: u64) -> Option<Self> {
        active
            .send_if_modified(|ids| ids.insert(id))
            .then_some(Self { active, id })
    }
}

impl Drop for ActiveUpload<'_> {
    fn drop(&mut self) {
        self.active.send_if_modified(|ids| ids.remove(&self.id));
    }
}

impl UploadPipeline {
    /// Create a pipeline
    pub fn new(
        registry: Arc<dyn Registry>,
        store: Arc<dyn FobStore>,
        notifier: Notifier,
        operator: Arc<dyn Operator>,
    ) -> Self {
        Self {
            registry,
            store,
            notifier,
            operator,
            closing: Arc::new(watch::Sender::new(false)),
            active: Arc::new(watch::Sender::new(BTreeSet::new())),
        }
    }

    /// Whether [`Self::close`] has been called
    pub fn is_closing(&self) -> bool {
        *self.closing.borrow()
    }

    /// Resolves once the pipeline starts closing
    async fn closed(&self) {
        let mut closing = self.closing.subscribe();
        let _ = closing.wait_for(|closing| *closing).await;
    }

    /// Run `question` unless the pipeline closes first, which counts as a no
    async fn ask(&self, question: impl Future<Output = bool>) -> bool {
        tokio::select! {
            answer = question => answer,
            () = self.closed() => {
                info!("Question abandoned, the pipeline is closing");
                false
            }
        }
    }

    /// Stop interactive uploads from starting new attempts and wait for the
    /// ones in flight to settle
    pub async fn close(&self) {
        self.closing.send_replace(true);
        let mut active = self.active.subscribe();
        let _ = active.wait_for(BTreeSet::is_empty).await;
        debug!("Interactive uploads settled");
    }

    /// Upload `fob`, asking the operator after every failure
    ///
    /// The record is read again before every attempt; a fob some other upload
    /// got accepted in the meantime is not sent again.
    #[instrument(skip_all, fields(serial = %fob.serial))]
    pub async fn upload_interactive(&self, fob: Fob) -> Result<UploadResult> {
        if fob.secret.is_none() {
            return Err(Error::NeverInitialized);
        }
        let Some(_active) = ActiveUpload::claim(&self.active, fob.id) else {
            debug!("Fob already being uploaded");
            return Ok(UploadResult::Cancelled);
        };

        loop {
            if self.is_closing() {
                info!("Upload left to the exit flow");
                return Ok(UploadResult::Cancelled);
            }
            let current = self
                .store
                .find_by_serial(&fob.serial)?
                .ok_or(Error::NeverInitialized)?;
            if current.uploaded {
                debug!("Fob was uploaded elsewhere");
                return Ok(UploadResult::AlreadyUploaded);
            }
            let secret = current.secret.clone().ok_or(Error::NeverInitialized)?;

            self.notifier.notify(Notice::UploadInProgress(true));
            let outcome = self.registry.upload(&current.serial, &secret).await;
            self.notifier.notify(Notice::UploadInProgress(false));

            if outcome.success {
                let fob = self.store.update(current.id, FobPatch::uploaded())?;
                let ordinal = self.store.count_before(fob.id)?;
                info!(display = %fob.display_number(), ordinal, "Fob uploaded");
                self.notifier.notify(Notice::Fob(fob.clone()));
                self.notifier.notify(Notice::Uploaded { fob, ordinal });
                return Ok(UploadResult::Uploaded { ordinal });
            }

            warn!(message = %outcome.message, "Upload failed");
            if !self
                .ask(self.operator.confirm_retry(&current, &outcome.message))
                .await
            {
                info!("Upload cancelled");
                return Ok(UploadResult::Cancelled);
            }
        }
    }

    /// Ask the operator, then upload `fob` if confirmed
    pub async fn offer(&self, fob: Fob) -> Result<UploadResult> {
        if !self.is_closing() && self.ask(self.operator.confirm_upload(&fob)).await {
            self.upload_interactive(fob).await
        } else {
            Ok(UploadResult::Cancelled)
        }
    }

    /// Upload every initialized, not yet uploaded fob concurrently
    ///
    /// Fobs held by an interactive upload are left to it.
    #[instrument(skip(self))]
    pub async fn upload_all(&self) -> Result<BatchOutcome> {
        let pending = {
            let active = self.active.borrow();
            let mut pending = self.store.find_not_uploaded()?;
            pending.retain(|fob| !active.contains(&fob.id));
            pending
        };
        debug!(count = pending.len(), "Uploading pending fobs");

        self.notifier.notify(Notice::UploadInProgress(true));
        let outcomes = join_all(pending.iter().map(|fob| {
            let secret = fob.secret.as_deref().unwrap_or_default();
            self.registry.upload(&fob.serial, secret)
        }))
        .await;
        self.notifier.notify(Notice::UploadInProgress(false));

        let mut batch = BatchOutcome::default();
        for (fob, outcome) in pending.into_iter().zip(outcomes) {
            if outcome.success {
                let fob = self.store.update(fob.id, FobPatch::uploaded())?;
                self.notifier.notify(Notice::Fob(fob.clone()));
                batch.succeeded.push(fob);
            } else {
                batch.failures.push((fob, outcome.message));
            }
        }
        info!(
            succeeded = batch.succeeded.len(),
            failed = batch.failures.len(),
            "Batch upload finished"
        );
        Ok(batch)
    }

    /// Exit flow: close the pipeline, offer to upload what is pending and
    /// record what is left
    #[instrument(skip(self))]
    pub async fn shutdown(&self) -> Result<ShutdownOutcome> {
        self.close().await;

        let mut rounds = 0;
        let mut last_failures: Option<BatchOutcome> = None;

        let remaining = loop {
            let pending = self.store.find_not_uploaded()?;
            if pending.is_empty() {
                break 0;
            }

            let numbers: Vec<_> = pending.iter().map(Fob::display_number).collect();
            let failures = last_failures.as_ref().map(BatchOutcome::failure_message);
            if !self
                .operator
                .confirm_batch(&numbers, failures.as_deref())
                .await
            {
                break last_failures
                    .as_ref()
                    .map_or(pending.len(), |batch| batch.failures.len());
            }

            rounds += 1;
            let batch = self.upload_all().await?;
            if batch.is_complete() {
                break 0;
            }
            last_failures = Some(batch);
        };

        self.store.record_unuploaded(remaining)?;
        info!(remaining, rounds, "Upload state recorded at exit");
        Ok(ShutdownOutcome { remaining, rounds })
    }
}

/// Hands initialized fobs to the upload pipeline without blocking the caller
pub trait UploadDispatch: Send + Sync + fmt::Debug {
    /// Upload a freshly initialized fob
    fn dispatch(&self, fob: Fob);

    /// Offer to upload a fob found initialized but not uploaded
    fn offer(&self, fob: Fob);
}

/// Runs uploads as tasks on a tokio runtime
#[derive(Debug, Clone)]
pub struct TokioDispatch {
    runtime: Handle,
    pipeline: Arc<UploadPipeline>,
}

impl TokioDispatch {
    /// Dispatch onto `runtime`
    pub const fn new(runtime: Handle, pipeline: Arc<UploadPipeline>) -> Self {
        Self { runtime, pipeline }
    }

    fn spawn<F, Fut>(&self, fob: Fob, run: F)
    where
        F: FnOnce(Arc<UploadPipeline>, Fob) -> Fut,
        Fut: Future<Output = Result<UploadResult>> + Send + 'static,
    {
        let notifier = self.pipeline.notifier.clone();
        let task = run(self.pipeline.clone(), fob);
        self.runtime.spawn(async move {
            if let Err(e) = task.await {
                error!(error = %e, "Upload task failed");
                notifier.failure(e.to_string());
            }
        });
    }
}

impl UploadDispatch for TokioDispatch {
    fn dispatch(&self, fob: Fob) {
        self.spawn(fob, |pipeline, fob| async move {
            pipeline.upload_interactive(fob).await
        });
    }

    fn offer(&self, fob: Fob) {
        self.spawn(fob, |pipeline, fob| async move { pipeline.offer(fob).await });
    }
}
