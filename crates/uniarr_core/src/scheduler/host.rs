//! Recurring job hosts.

use crate::error::{CoreError, CoreResult};
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, info};

/// Result code a job reports back to its host.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobOutcome {
    /// The job ran and produced new data.
    NewData,
    /// The job ran with nothing to do.
    NoData,
    /// The job failed.
    Failed,
}

/// A recurring job body.
pub type Job = Arc<dyn Fn() -> JobOutcome + Send + Sync>;

/// Runs named jobs on an interval.
pub trait JobHost: Send + Sync {
    /// Registers `job` under `name`, replacing any job with that name.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Scheduler`] if the host refuses the job.
    fn register(&self, name: &str, interval: Duration, job: Job) -> CoreResult<()>;

    /// Removes the job named `name`. Unknown names are ignored.
    fn unregister(&self, name: &str);

    /// Returns true if a job named `name` is registered.
    fn is_registered(&self, name: &str) -> bool;
}

fn check_interval(name: &str, interval: Duration) -> CoreResult<()> {
    if interval.is_zero() {
        return Err(CoreError::scheduler(format!(
            "job '{name}' needs a non-zero interval"
        )));
    }
    Ok(())
}

/// A host that only runs jobs when asked.
#[derive(Default)]
pub struct ManualJobHost {
    jobs: Mutex<HashMap<String, (Duration, Job)>>,
}

impl ManualJobHost {
    /// Creates an empty host.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Runs the job named `name` once.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Scheduler`] if no such job is registered.
    pub fn run_now(&self, name: &str) -> CoreResult<JobOutcome> {
        let job = self
            .jobs
            .lock()
            .get(name)
            .map(|(_, job)| Arc::clone(job))
            .ok_or_else(|| CoreError::scheduler(format!("no job registered as '{name}'")))?;
        Ok(job())
    }

    /// Returns the interval of the job named `name`.
    #[must_use]
    pub fn interval(&self, name: &str) -> Option<Duration> {
        self.jobs.lock().get(name).map(|(interval, _)| *interval)
    }
}

impl JobHost for ManualJobHost {
    fn register(&self, name: &str, interval: Duration, job: Job) -> CoreResult<()> {
        check_interval(name, interval)?;
        self.jobs.lock().insert(name.to_string(), (interval, job));
        Ok(())
    }

    fn unregister(&self, name: &str) {
        self.jobs.lock().remove(name);
    }

    fn is_registered(&self, name: &str) -> bool {
        self.jobs.lock().contains_key(name)
    }
}

impl std::fmt::Debug for ManualJobHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let jobs = self.jobs.lock();
        f.debug_struct("ManualJobHost")
            .field("jobs", &jobs.keys().collect::<Vec<_>>())
            .finish()
    }
}

/// A host that spawns one interval task per job on a tokio runtime.
///
/// The first run happens one interval after registration. Job bodies run on
/// the blocking pool.
pub struct TokioJobHost {
    handle: Handle,
    tasks: Mutex<HashMap<String, JoinHandle<()>>>,
}

impl TokioJobHost {
    /// Creates a host spawning onto `handle`.
    #[must_use]
    pub fn new(handle: Handle) -> Self {
        Self {
            handle,
            tasks: Mutex::new(HashMap::new()),
        }
    }

    /// Creates a host on the runtime of the calling thread.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::Scheduler`] outside a tokio runtime.
    pub fn current() -> CoreResult<Self> {
        Handle::try_current()
            .map(Self::new)
            .map_err(|e| CoreError::scheduler(e.to_string()))
    }
}

impl JobHost for TokioJobHost {
    fn register(&self, name: &str, interval: Duration, job: Job) -> CoreResult<()> {
        check_interval(name, interval)?;

        let task_name = name.to_string();
        let task = self.handle.spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            // The first tick completes immediately.
            ticker.tick().await;
            loop {
                ticker.tick().await;
                let job = Arc::clone(&job);
                match tokio::task::spawn_blocking(move || job()).await {
                    Ok(outcome) => debug!(task = %task_name, ?outcome, "job finished"),
                    Err(e) => error!(task = %task_name, error = %e, "job panicked"),
                }
            }
        });

        if let Some(previous) = self.tasks.lock().insert(name.to_string(), task) {
            previous.abort();
        }
        info!(task = name, interval_secs = interval.as_secs(), "job registered");
        Ok(())
    }

    fn unregister(&self, name: &str) {
        if let Some(task) = self.tasks.lock().remove(name) {
            task.abort();
            info!(task = name, "job unregistered");
        }
    }

    fn is_registered(&self, name: &str) -> bool {
        self.tasks.lock().contains_key(name)
    }
}

impl Drop for TokioJobHost {
    fn drop(&mut self) {
        for (_, task) in self.tasks.get_mut().drain() {
            task.abort();
        }
    }
}

impl std::fmt::Debug for TokioJobHost {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let tasks = self.tasks.lock();
        f.debug_struct("TokioJobHost")
            .field("tasks", &tasks.keys().collect::<Vec<_>>())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    fn counting_job(counter: &Arc<AtomicUsize>) -> Job {
        let counter = Arc::clone(counter);
        Arc::new(move || {
            counter.fetch_add(1, Ordering::SeqCst);
            JobOutcome::NewData
        })
    }

    #[test]
    fn manual_host_runs_on_demand() {
        let host = ManualJobHost::new();
        let counter = Arc::new(AtomicUsize::new(0));

        assert!(host.run_now("backup").is_err());
        host.register("backup", Duration::from_secs(60), counting_job(&counter))
            .unwrap();
        assert!(host.is_registered("backup"));
        assert_eq!(host.interval("backup"), Some(Duration::from_secs(60)));

        assert_eq!(host.run_now("backup").unwrap(), JobOutcome::NewData);
        assert_eq!(counter.load(Ordering::SeqCst), 1);

        host.unregister("backup");
        assert!(!host.is_registered("backup"));
    }

    #[test]
    fn zero_interval_rejected() {
        let host = ManualJobHost::new();
        let err = host
            .register("x", Duration::ZERO, Arc::new(|| JobOutcome::NoData))
            .unwrap_err();
        assert!(matches!(err, CoreError::Scheduler { .. }));
    }

    #[tokio::test]
    async fn tokio_host_runs_periodically() {
        let host = TokioJobHost::current().unwrap();
        let counter = Arc::new(AtomicUsize::new(0));

        host.register("tick", Duration::from_millis(10), counting_job(&counter))
            .unwrap();
        tokio::time::sleep(Duration::from_millis(150)).await;
        assert!(counter.load(Ordering::SeqCst) >= 1);

        host.unregister("tick");
        assert!(!host.is_registered("tick"));
        tokio::time::sleep(Duration::from_millis(30)).await;
        let after = counter.load(Ordering::SeqCst);
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert_eq!(counter.load(Ordering::SeqCst), after);
    }

    #[test]
    fn current_requires_runtime() {
        assert!(TokioJobHost::current().is_err());
    }
}
