//! Parallel scheduling of per-file jobs under a fixed core budget
//!
//! Jobs are queued on a channel followed by one [`WorkItem::Stop`] marker
//! per worker. Workers pull one item at a time and run each job to
//! completion; a worker exits on its stop marker. Every job is delivered to
//! exactly one worker, and because all jobs are queued ahead of the markers
//! the queue is always drained before anyone stops.
//!
//! The scheduler waits for every worker before returning. A failed job does
//! not stop its siblings; the first failure in job order is returned once
//! all workers have exited.

use crossbeam_channel::{unbounded, Receiver};
use tracing::{debug, info};

use crate::{
    error::{KrispError, Result},
    external_sort::MemoryLimit,
};

/// How the core budget is split across jobs
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobAllocation {
    /// Cores given to each job, in job order
    pub cores: Vec<usize>,
    /// Number of jobs running at once (and of workers)
    pub concurrency: usize,
    /// Sort memory ceiling of each job, in percent of available memory
    pub memory_percent: u8,
}

/// Split `parallel` cores across `num_jobs` jobs
///
/// With fewer cores than jobs every job gets one core and `parallel` jobs
/// run at once. Otherwise all jobs run at once and the cores are spread as
/// evenly as possible, the first `parallel % num_jobs` jobs taking one
/// extra. The memory ceiling is divided by the number of concurrent jobs.
pub fn allocate(num_jobs: usize, parallel: usize, memory_ceiling_percent: u8) -> JobAllocation {
    let parallel = parallel.max(1);
    if num_jobs == 0 {
        return JobAllocation {
            cores: Vec::new(),
            concurrency: 0,
            memory_percent: memory_ceiling_percent,
        };
    }

    let cores = if parallel < num_jobs {
        vec![1; num_jobs]
    } else {
        (0..num_jobs)
            .map(|i| parallel / num_jobs + usize::from(i < parallel % num_jobs))
            .collect()
    };
    let concurrency = parallel.min(num_jobs);
    let memory_percent = (usize::from(memory_ceiling_percent) / concurrency).max(1) as u8;

    JobAllocation {
        cores,
        concurrency,
        memory_percent,
    }
}

/// A job as handed to a worker
#[derive(Debug)]
pub struct ScheduledJob<J> {
    /// Position of the job in the submitted list
    pub index: usize,
    /// Cores the job may use
    pub cores: usize,
    /// Memory ceiling for the job's sort buffer
    pub memory: MemoryLimit,
    /// Caller's job description
    pub payload: J,
}

/// Item on the work queue
enum WorkItem<J> {
    Job(ScheduledJob<J>),
    Stop,
}

/// Runs jobs on a fixed pool of worker threads
#[derive(Debug, Clone, Copy)]
pub struct JobScheduler {
    parallel: usize,
    memory_ceiling_percent: u8,
}

impl JobScheduler {
    /// Scheduler for a total budget of `parallel` cores
    pub fn new(parallel: usize, memory_ceiling_percent: u8) -> Self {
        Self {
            parallel: parallel.max(1),
            memory_ceiling_percent,
        }
    }

    /// Run every job, blocking until all workers have exited
    ///
    /// Results come back in job order.
    pub fn run<J, R, F>(&self, jobs: Vec<J>, runner: F) -> Result<Vec<R>>
    where
        J: Send,
        R: Send,
        F: Fn(&ScheduledJob<J>) -> Result<R> + Sync,
    {
        let num_jobs = jobs.len();
        let allocation = allocate(num_jobs, self.parallel, self.memory_ceiling_percent);
        if num_jobs == 0 {
            return Ok(Vec::new());
        }
        info!(
            "Scheduling {} jobs on {} workers ({}% memory per job)",
            num_jobs, allocation.concurrency, allocation.memory_percent
        );

        let (tx, rx) = unbounded::<WorkItem<J>>();
        let queue_closed = |_| KrispError::Worker("work queue closed unexpectedly".into());
        for (index, (payload, cores)) in jobs.into_iter().zip(allocation.cores.iter().copied()).enumerate() {
            tx.send(WorkItem::Job(ScheduledJob {
                index,
                cores,
                memory: MemoryLimit::Percent(allocation.memory_percent),
                payload,
            }))
            .map_err(queue_closed)?;
        }
        for _ in 0..allocation.concurrency {
            tx.send(WorkItem::Stop).map_err(queue_closed)?;
        }
        drop(tx);

        let mut slots: Vec<Option<Result<R>>> = (0..num_jobs).map(|_| None).collect();
        let mut failures: Vec<String> = Vec::new();

        std::thread::scope(|scope| {
            let handles: Vec<_> = (0..allocation.concurrency)
                .map(|worker| {
                    let rx = rx.clone();
                    let runner = &runner;
                    std::thread::Builder::new()
                        .name(format!("krisp-worker-{worker}"))
                        .spawn_scoped(scope, move || worker_loop(worker, rx, runner))
                })
                .collect();

            for handle in handles {
                match handle {
                    Ok(handle) => match handle.join() {
                        Ok(done) => {
                            for (index, result) in done {
                                slots[index] = Some(result);
                            }
                        }
                        Err(panic) => failures.push(panic_message(panic.as_ref())),
                    },
                    Err(e) => failures.push(format!("could not spawn worker: {e}")),
                }
            }
        });

        let mut results = Vec::with_capacity(num_jobs);
        for (index, slot) in slots.into_iter().enumerate() {
            match slot {
                Some(Ok(result)) => results.push(result),
                Some(Err(e)) => return Err(e),
                None => {
                    let cause = failures
                        .first()
                        .cloned()
                        .unwrap_or_else(|| "no worker completed it".to_string());
                    return Err(KrispError::Worker(format!("job {index} did not complete: {cause}")));
                }
            }
        }
        Ok(results)
    }
}

/// Pull and run jobs until a stop marker arrives
fn worker_loop<J, R, F>(worker: usize, rx: Receiver<WorkItem<J>>, runner: &F) -> Vec<(usize, Result<R>)>
where
    F: Fn(&ScheduledJob<J>) -> Result<R>,
{
    let mut done = Vec::new();
    while let Ok(WorkItem::Job(job)) = rx.recv() {
        debug!("Worker {} starting job {} with {} cores", worker, job.index, job.cores);
        let result = runner(&job);
        if let Err(e) = &result {
            debug!("Worker {} job {} failed: {}", worker, job.index, e);
        }
        done.push((job.index, result));
    }
    done
}

fn panic_message(panic: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = panic.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = panic.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::{Barrier, Mutex};
    use std::time::Duration;

    #[test]
    fn test_allocate_fewer_cores_than_jobs() {
        let a = allocate(5, 2, 80);
        assert_eq!(a.cores, vec![1; 5]);
        assert_eq!(a.concurrency, 2);
        assert_eq!(a.memory_percent, 40);
    }

    #[test]
    fn test_allocate_more_cores_than_jobs() {
        let a = allocate(2, 5, 80);
        assert_eq!(a.cores, vec![3, 2]);
        assert_eq!(a.concurrency, 2);

        let a = allocate(3, 8, 80);
        assert_eq!(a.cores, vec![3, 3, 2]);
        assert!(a.cores.iter().sum::<usize>() <= 8);
    }

    #[test]
    fn test_allocate_serial() {
        let a = allocate(4, 1, 80);
        assert_eq!(a.cores, vec![1; 4]);
        assert_eq!(a.concurrency, 1);
        assert_eq!(a.memory_percent, 80);
    }

    #[test]
    fn test_allocate_memory_never_zero() {
        let a = allocate(200, 200, 80);
        assert_eq!(a.memory_percent, 1);
    }

    #[test]
    fn test_five_jobs_two_cores() {
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);
        let cores = Mutex::new(Vec::new());

        let results = JobScheduler::new(2, 80)
            .run((0..5).collect(), |job: &ScheduledJob<u32>| {
                let now = active.fetch_add(1, Ordering::SeqCst) + 1;
                peak.fetch_max(now, Ordering::SeqCst);
                cores.lock().unwrap().push(job.cores);
                std::thread::sleep(Duration::from_millis(30));
                active.fetch_sub(1, Ordering::SeqCst);
                Ok(job.payload * 10)
            })
            .unwrap();

        assert_eq!(results, vec![0, 10, 20, 30, 40]);
        assert_eq!(peak.load(Ordering::SeqCst), 2);
        assert_eq!(*cores.lock().unwrap(), vec![1; 5]);
    }

    #[test]
    fn test_two_jobs_five_cores_run_together() {
        // Each job waits for the other, so this only finishes if both run at once
        let barrier = Barrier::new(2);
        let results = JobScheduler::new(5, 80)
            .run(vec!["a", "b"], |job: &ScheduledJob<&str>| {
                barrier.wait();
                Ok((job.payload, job.cores))
            })
            .unwrap();
        assert_eq!(results, vec![("a", 3), ("b", 2)]);
    }

    #[test]
    fn test_memory_split_reaches_jobs() {
        let results = JobScheduler::new(4, 80)
            .run(vec![(); 8], |job: &ScheduledJob<()>| Ok(job.memory))
            .unwrap();
        assert!(results.iter().all(|m| *m == MemoryLimit::Percent(20)));
    }

    #[test]
    fn test_first_failure_after_all_jobs_finish() {
        let completed = AtomicUsize::new(0);
        let result = JobScheduler::new(2, 80).run((0..6).collect(), |job: &ScheduledJob<usize>| {
            completed.fetch_add(1, Ordering::SeqCst);
            if job.payload == 1 || job.payload == 4 {
                Err(KrispError::input(format!("genome{}.fa", job.payload), "bad record"))
            } else {
                Ok(job.payload)
            }
        });

        assert_eq!(completed.load(Ordering::SeqCst), 6);
        match result {
            Err(KrispError::Input { path, .. }) => assert_eq!(path, std::path::PathBuf::from("genome1.fa")),
            other => panic!("expected input error, got {other:?}"),
        }
    }

    #[test]
    fn test_worker_panic_is_reported() {
        let result = JobScheduler::new(2, 80).run(vec![0, 1, 2], |job: &ScheduledJob<i32>| {
            if job.payload == 1 {
                panic!("boom");
            }
            Ok(job.payload)
        });
        assert!(matches!(result, Err(KrispError::Worker(_))));
    }

    #[test]
    fn test_no_jobs() {
        let results: Vec<()> = JobScheduler::new(4, 80)
            .run(Vec::<()>::new(), |_job: &ScheduledJob<()>| Ok(()))
            .unwrap();
        assert!(results.is_empty());
    }
}
