//! The worker execution context: a dedicated rayon pool reused for the
//! lifetime of the service.

use std::panic::{catch_unwind, AssertUnwindSafe};

use reelkit_core::config::ComputeConfig;
use reelkit_core::{ReelkitError, ReelkitResult};

pub struct WorkerContext {
    pool: rayon::ThreadPool,
}

impl WorkerContext {
    /// Build the pool. Failure here is the "compute unavailable" condition.
    pub fn new(config: &ComputeConfig) -> ReelkitResult<Self> {
        let prefix = config.thread_name.clone();
        let pool = rayon::ThreadPoolBuilder::new()
            .num_threads(config.worker_threads.max(1))
            .thread_name(move |index| format!("{}-{}", prefix, index))
            .build()
            .map_err(|e| ReelkitError::ComputeUnavailable(e.to_string()))?;
        Ok(Self { pool })
    }

    pub fn threads(&self) -> usize {
        self.pool.current_num_threads()
    }

    /// Run `job` on the pool and hand its outcome to `done`. A panic inside
    /// `job` is caught and reported as `Err(message)`; the pool keeps running.
    pub fn execute<T, F, D>(&self, job: F, done: D)
    where
        T: Send + 'static,
        F: FnOnce() -> T + Send + 'static,
        D: FnOnce(Result<T, String>) + Send + 'static,
    {
        self.pool.spawn(move || done(run_caught(job)));
    }
}

impl std::fmt::Debug for WorkerContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerContext")
            .field("threads", &self.threads())
            .finish()
    }
}

/// Run `job`, converting a panic into its message.
pub(crate) fn run_caught<T, F: FnOnce() -> T>(job: F) -> Result<T, String> {
    catch_unwind(AssertUnwindSafe(job)).map_err(|payload| {
        if let Some(s) = payload.downcast_ref::<&str>() {
            s.to_string()
        } else if let Some(s) = payload.downcast_ref::<String>() {
            s.clone()
        } else {
            "worker task panicked".to_string()
        }
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::mpsc;

    #[test]
    fn test_pool_uses_configured_threads() {
        let cfg = ComputeConfig {
            worker_threads: 3,
            ..ComputeConfig::default()
        };
        let ctx = WorkerContext::new(&cfg).unwrap();
        assert_eq!(ctx.threads(), 3);
    }

    #[test]
    fn test_panic_is_contained() {
        let ctx = WorkerContext::new(&ComputeConfig::default()).unwrap();
        let (tx, rx) = mpsc::channel();
        let tx2 = tx.clone();
        ctx.execute(|| -> u32 { panic!("bad pixels") }, move |r| tx.send(r).unwrap());
        assert_eq!(rx.recv().unwrap(), Err("bad pixels".to_string()));
        ctx.execute(|| 41 + 1, move |r| tx2.send(r).unwrap());
        assert_eq!(rx.recv().unwrap(), Ok(42));
    }
}
