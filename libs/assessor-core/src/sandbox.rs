/// Invocation Sandbox - Bounded Execution of Submission Code
///
/// **Core Responsibility:**
/// Run a single operation or constructor on a shared worker pool and hand the
/// outcome back to the caller, or a timeout once the wall-clock limit passes.
///
/// **Critical Architectural Boundary:**
/// - Sandbox knows HOW to run a call (pool, timeout, panic capture)
/// - Sandbox does NOT log Results or judge correctness
/// - A timed-out worker is abandoned, never killed; it keeps its thread
///
/// The pool is the blocking pool of a dedicated tokio runtime, separate from
/// whatever runtime drives the batch. It is shut down in the background on drop
/// so stuck workers never hold up process exit.
use crate::error::{kinds, FailureCause, Fault};
use crate::unit::{ConstructorHandle, OperationHandle};
use crate::value::{Instance, Value};
use assessor_common::config::SandboxConfig;
use std::any::Any;
use std::io;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::{Arc, OnceLock};
use std::time::{Duration, Instant};
use tokio::runtime::{Builder, Handle, Runtime};
use tracing::{debug, warn};

pub const DEFAULT_CALL_TIMEOUT: Duration = Duration::from_millis(5_000);
pub const DEFAULT_MAX_WORKERS: usize = 512;

static SHARED: OnceLock<Arc<Sandbox>> = OnceLock::new();

pub struct Sandbox {
    runtime: Option<Runtime>,
    handle: Handle,
    timeout: Duration,
    max_workers: usize,
    abandoned: AtomicUsize,
}

impl Sandbox {
    pub fn new(timeout: Duration, max_workers: usize) -> io::Result<Self> {
        let max_workers = max_workers.max(1);
        let runtime = Builder::new_multi_thread()
            .worker_threads(1)
            .max_blocking_threads(max_workers)
            .thread_name("assessor-sandbox")
            .enable_time()
            .build()?;
        let handle = runtime.handle().clone();

        debug!(timeout_ms = timeout.as_millis() as u64, max_workers, "Sandbox pool started");
        Ok(Self {
            runtime: Some(runtime),
            handle,
            timeout,
            max_workers,
            abandoned: AtomicUsize::new(0),
        })
    }

    pub fn from_config(config: &SandboxConfig) -> io::Result<Self> {
        Self::new(config.call_timeout(), config.max_workers)
    }

    /// Process-wide pool with default limits, created on first use.
    pub fn shared() -> io::Result<Arc<Sandbox>> {
        if let Some(sandbox) = SHARED.get() {
            return Ok(sandbox.clone());
        }
        let sandbox = Arc::new(Self::new(DEFAULT_CALL_TIMEOUT, DEFAULT_MAX_WORKERS)?);
        Ok(SHARED.get_or_init(|| sandbox).clone())
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Workers still running a call whose caller gave up.
    pub fn abandoned(&self) -> usize {
        self.abandoned.load(Ordering::SeqCst)
    }

    /// Run `task` on the pool and wait for it, at most `timeout`.
    ///
    /// Panics inside the task come back as a `Panic` fault.
    pub fn run<T, F>(&self, task: F) -> Result<T, FailureCause>
    where
        T: Send + 'static,
        F: FnOnce() -> Result<T, Fault> + Send + 'static,
    {
        let (tx, rx) = mpsc::sync_channel(1);
        let started = Instant::now();

        self.handle.spawn_blocking(move || {
            let outcome = panic::catch_unwind(AssertUnwindSafe(task))
                .unwrap_or_else(|payload| Err(Fault::panic(panic_message(payload.as_ref()))));
            // the caller may have timed out and dropped the receiver
            let _ = tx.send(outcome);
        });

        match rx.recv_timeout(self.timeout) {
            Ok(outcome) => outcome.map_err(FailureCause::Raised),
            Err(RecvTimeoutError::Timeout) => {
                let abandoned = self.abandoned.fetch_add(1, Ordering::SeqCst) + 1;
                warn!(
                    elapsed_ms = started.elapsed().as_millis() as u64,
                    abandoned,
                    "Sandboxed call timed out, abandoning worker"
                );
                if abandoned * 2 >= self.max_workers {
                    warn!(abandoned, max_workers = self.max_workers, "Over half of the sandbox pool is stuck");
                }
                Err(FailureCause::Timeout { limit: self.timeout })
            }
            Err(RecvTimeoutError::Disconnected) => Err(FailureCause::Raised(Fault::new(
                kinds::WORKER_LOST,
                "sandbox worker exited without a result",
            ))),
        }
    }

    pub fn invoke(
        &self,
        operation: &OperationHandle,
        receiver: Option<&Instance>,
        args: &[Value],
    ) -> Result<Value, FailureCause> {
        let operation = operation.clone();
        let receiver = receiver.cloned();
        let args = args.to_vec();
        self.run(move || operation.invoke(receiver.as_ref(), &args))
    }

    pub fn instantiate(&self, constructor: &ConstructorHandle, args: &[Value]) -> Result<Instance, FailureCause> {
        let constructor = constructor.clone();
        let args = args.to_vec();
        self.run(move || constructor.instantiate(&args))
    }
}

impl Drop for Sandbox {
    fn drop(&mut self) {
        if let Some(runtime) = self.runtime.take() {
            // never wait for abandoned workers
            runtime.shutdown_background();
        }
    }
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "panic with non-string payload".to_string()
    }
}
