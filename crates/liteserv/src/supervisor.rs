//! Lifecycle supervisor
//!
//! Drives one backend through download, install, start, verification and
//! stop, recording where it is in [`LifecycleState`]. Each supervisor owns
//! its backend outright; supervisors for different endpoints share nothing.

use crate::backend::PlatformBackend;
use crate::poller::ReachabilityPoller;
use std::future::Future;
use std::path::Path;
use testkit_common::{reconcile, Error, LifecycleState, Result, ServerTarget};
use tracing::{debug, error, info, warn};

pub struct LifecycleSupervisor {
    backend: Box<dyn PlatformBackend>,
    poller: ReachabilityPoller,
    state: LifecycleState,
}

impl LifecycleSupervisor {
    pub fn new(backend: Box<dyn PlatformBackend>, poller: ReachabilityPoller) -> Self {
        Self {
            backend,
            poller,
            state: LifecycleState::default(),
        }
    }

    pub fn state(&self) -> LifecycleState {
        self.state
    }

    pub fn target(&self) -> &ServerTarget {
        self.backend.target()
    }

    /// Management endpoint of the supervised server
    pub fn url(&self) -> String {
        self.backend.target().url()
    }

    pub fn backend(&self) -> &dyn PlatformBackend {
        self.backend.as_ref()
    }

    fn transition(&mut self, next: LifecycleState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: next.to_string(),
            });
        }
        debug!("{}: {} -> {}", self.url(), self.state, next);
        self.state = next;
        Ok(())
    }

    /// Release whatever the backend holds and record the failure.
    ///
    /// A failing stop is logged and `err` is returned unchanged.
    async fn fail(&mut self, err: Error) -> Error {
        error!("LiteServ at {} failed: {}", self.url(), err);

        if self.backend.is_started() {
            if let Err(stop_err) = self.backend.stop().await {
                warn!("Cleanup stop after failure also failed: {}", stop_err);
            }
        }

        if let Err(e) = self.transition(LifecycleState::Failed) {
            warn!("{}", e);
        }
        err
    }

    /// Download, install and start the server, then verify that it is the
    /// expected build.
    ///
    /// Accepted from `Uninitialized` and from `Stopped` (restart). Returns
    /// the management URL once the server is running.
    pub async fn start(&mut self, log_path: &Path) -> Result<String> {
        if !matches!(
            self.state,
            LifecycleState::Uninitialized | LifecycleState::Stopped
        ) {
            return Err(Error::InvalidStateTransition {
                from: self.state.to_string(),
                to: LifecycleState::Starting.to_string(),
            });
        }

        match self.bring_up(log_path).await {
            Ok(url) => Ok(url),
            Err(e) => Err(self.fail(e).await),
        }
    }

    async fn bring_up(&mut self, log_path: &Path) -> Result<String> {
        let url = self.url();
        let target = self.backend.target().clone();

        self.backend.download().await?;
        self.transition(LifecycleState::Downloaded)?;

        self.backend.install().await?;
        self.transition(LifecycleState::Installed)?;

        // Never launch over something that already answers on this endpoint
        if self.poller.is_reachable(&url).await? {
            return Err(Error::AlreadyRunning { url });
        }

        self.transition(LifecycleState::Starting)?;
        info!(
            "Starting {} LiteServ {} at {}",
            target.platform,
            target.version_build(),
            url
        );
        self.backend.start(log_path).await?;

        self.poller.poll(&url).await?;
        let status = self.backend.fetch_status().await?;
        debug!("Status payload: {}", status.raw_payload);

        let running = reconcile(
            target.platform,
            &target.version,
            target.build.as_deref(),
            &status.raw_payload,
        )?;
        info!(
            "LiteServ {} running at {} (build {:?})",
            running.version, url, running.build
        );

        self.transition(LifecycleState::Running)?;
        Ok(url)
    }

    /// Stop the server and verify that the endpoint no longer answers.
    ///
    /// Calling this when nothing is running is a no-op.
    pub async fn stop(&mut self) -> Result<()> {
        if self.state != LifecycleState::Running {
            if self.backend.is_started() {
                if let Err(e) = self.backend.stop().await {
                    warn!("Releasing {} in state {} failed: {}", self.url(), self.state, e);
                }
            }
            debug!("Nothing running at {} ({})", self.url(), self.state);
            return Ok(());
        }

        let url = self.url();
        self.transition(LifecycleState::Stopping)?;
        info!("Stopping LiteServ at {}", url);

        if let Err(e) = self.backend.stop().await {
            self.state = LifecycleState::Failed;
            return Err(e);
        }

        if let Err(e) = self.poller.wait_until_unreachable(&url).await {
            self.state = LifecycleState::Failed;
            return Err(e);
        }

        self.transition(LifecycleState::Stopped)?;
        info!("LiteServ at {} stopped", url);
        Ok(())
    }

    /// Start the server, run `test` against its URL, and always stop it.
    ///
    /// An error from `test` is returned ahead of any error from stopping.
    pub async fn run_scoped<F, Fut, T>(&mut self, log_path: &Path, test: F) -> Result<T>
    where
        F: FnOnce(String) -> Fut,
        Fut: Future<Output = Result<T>>,
    {
        let url = self.start(log_path).await?;
        let outcome = test(url).await;
        let stopped = self.stop().await;

        match (outcome, stopped) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(stop_err)) => Err(stop_err),
            (Err(test_err), Ok(())) => Err(test_err),
            (Err(test_err), Err(stop_err)) => {
                warn!("Stop after failed test also failed: {}", stop_err);
                Err(test_err)
            }
        }
    }
}
