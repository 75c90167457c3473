//! Process runner with graceful shutdown.
//!
//! Named app processes run concurrently, each with a clone of one
//! [`CancellationToken`]. The token is cancelled on SIGINT/SIGTERM, when any
//! process fails, or when every process has finished. Closers then run one
//! at a time in registration order, all bounded by a single timeout.
//!
//! ```no_run
//! use tracker_runner::{RunOutcome, Runner};
//! use std::time::Duration;
//!
//! #[tokio::main]
//! async fn main() {
//!     let outcome = Runner::new()
//!         .with_app_process("ticker", |ctx| async move {
//!             ctx.cancelled().await;
//!             Ok(())
//!         })
//!         .with_closer("flush", || async move { Ok(()) })
//!         .with_closer_timeout(Duration::from_secs(5))
//!         .run()
//!         .await;
//!
//!     std::process::exit(outcome.exit_code());
//! }
//! ```

use std::future::Future;
use std::pin::Pin;
use std::time::Duration;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

type BoxedFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

pub type AppProcess = Box<dyn FnOnce(CancellationToken) -> BoxedFuture + Send>;

pub type Closer = Box<dyn FnOnce() -> BoxedFuture + Send>;

/// How a [`Runner::run`] ended
#[derive(Debug)]
pub enum RunOutcome {
    /// Every process stopped without error
    Clean,
    /// The named process failed first
    Failed(String, anyhow::Error),
}

impl RunOutcome {
    pub fn is_clean(&self) -> bool {
        matches!(self, RunOutcome::Clean)
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            RunOutcome::Clean => 0,
            RunOutcome::Failed(..) => 1,
        }
    }
}

pub struct Runner {
    app_processes: Vec<(String, AppProcess)>,
    closers: Vec<(String, Closer)>,
    closer_timeout: Duration,
    cancellation_token: CancellationToken,
    handle_signals: bool,
}

impl Default for Runner {
    fn default() -> Self {
        Self::new()
    }
}

impl Runner {
    /// Runner with a 10 second closer timeout that listens for OS signals
    pub fn new() -> Self {
        Self {
            app_processes: Vec::new(),
            closers: Vec::new(),
            closer_timeout: Duration::from_secs(10),
            cancellation_token: CancellationToken::new(),
            handle_signals: true,
        }
    }

    pub fn with_app_process<F, Fut>(mut self, name: impl Into<String>, process: F) -> Self
    where
        F: FnOnce(CancellationToken) -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.app_processes
            .push((name.into(), Box::new(|token| Box::pin(process(token)))));
        self
    }

    /// Add an already boxed process, as produced by service wiring
    pub fn with_boxed_process(mut self, name: impl Into<String>, process: AppProcess) -> Self {
        self.app_processes.push((name.into(), process));
        self
    }

    /// Closers run after all processes stop, in the order they were added
    pub fn with_closer<F, Fut>(mut self, name: impl Into<String>, closer: F) -> Self
    where
        F: FnOnce() -> Fut + Send + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        self.closers
            .push((name.into(), Box::new(|| Box::pin(closer()))));
        self
    }

    pub fn with_closer_timeout(mut self, timeout: Duration) -> Self {
        self.closer_timeout = timeout;
        self
    }

    pub fn with_cancellation_token(mut self, token: CancellationToken) -> Self {
        self.cancellation_token = token;
        self
    }

    /// Disable SIGINT/SIGTERM handling; shutdown then only follows the token
    pub fn without_signal_handlers(mut self) -> Self {
        self.handle_signals = false;
        self
    }

    pub async fn run(self) -> RunOutcome {
        let token = self.cancellation_token;
        let mut join_set = JoinSet::new();

        for (name, process) in self.app_processes {
            let process_token = token.clone();
            info!(process = %name, "starting app process");
            join_set.spawn(async move { (name, process(process_token).await) });
        }

        if self.handle_signals {
            spawn_signal_handlers(token.clone());
        }

        let mut first_error = None;
        while let Some(joined) = join_set.join_next().await {
            match joined {
                Ok((name, Ok(()))) => debug!(process = %name, "app process finished"),
                Ok((name, Err(err))) => {
                    if first_error.is_none() && !token.is_cancelled() {
                        error!(process = %name, error = format!("{:#}", err), "app process failed");
                        first_error = Some((name, err));
                    } else {
                        warn!(process = %name, error = format!("{:#}", err), "app process failed during shutdown");
                    }
                    token.cancel();
                }
                Err(err) => {
                    error!(error = %err, "app process panicked");
                    if first_error.is_none() && !token.is_cancelled() {
                        first_error = Some(("<panicked>".to_string(), anyhow::anyhow!("{}", err)));
                    }
                    token.cancel();
                }
            }
        }
        token.cancel();

        if !self.closers.is_empty() {
            info!(
                closer_timeout_ms = self.closer_timeout.as_millis(),
                "running closers"
            );
            if tokio::time::timeout(self.closer_timeout, run_closers(self.closers))
                .await
                .is_err()
            {
                error!(
                    closer_timeout_ms = self.closer_timeout.as_millis(),
                    "closers timed out"
                );
            }
        }

        match first_error {
            Some((name, err)) => {
                error!(process = %name, "exiting with error");
                RunOutcome::Failed(name, err)
            }
            None => {
                info!("exiting normally");
                RunOutcome::Clean
            }
        }
    }
}

async fn run_closers(closers: Vec<(String, Closer)>) {
    for (name, closer) in closers {
        match closer().await {
            Ok(()) => debug!(closer = %name, "closer completed"),
            Err(err) => error!(closer = %name, error = format!("{:#}", err), "closer failed"),
        }
    }
}

fn spawn_signal_handlers(token: CancellationToken) {
    let ctrl_c_token = token.clone();
    tokio::spawn(async move {
        tokio::select! {
            _ = ctrl_c_token.cancelled() => {}
            signal = tokio::signal::ctrl_c() => match signal {
                Ok(()) => {
                    info!("received SIGINT");
                    ctrl_c_token.cancel();
                }
                Err(err) => error!(error = %err, "failed to listen for SIGINT"),
            },
        }
    });

    #[cfg(unix)]
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};
        let mut sigterm = match signal(SignalKind::terminate()) {
            Ok(sigterm) => sigterm,
            Err(err) => {
                error!(error = %err, "failed to listen for SIGTERM");
                return;
            }
        };
        tokio::select! {
            _ = token.cancelled() => {}
            _ = sigterm.recv() => {
                info!("received SIGTERM");
                token.cancel();
            }
        }
    });
}
