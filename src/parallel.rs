//! Data parallel execution of independent tasks: section decoding and row
//! conversion.

use std::sync::Mutex;

/// Runs `num_tasks` independent tasks and returns once all of them finished.
/// The task closure receives `(task_index, thread_id)` with
/// `thread_id < num_threads()`.
pub trait ParallelRunner: Send + Sync {
    fn num_threads(&self) -> usize;

    fn run(&self, num_tasks: usize, task: &(dyn Fn(usize, usize) + Sync));
}

/// Runs every task on the calling thread.
#[derive(Debug, Default, Clone, Copy)]
pub struct SequentialRunner;

impl ParallelRunner for SequentialRunner {
    fn num_threads(&self) -> usize {
        1
    }

    fn run(&self, num_tasks: usize, task: &(dyn Fn(usize, usize) + Sync)) {
        for i in 0..num_tasks {
            task(i, 0);
        }
    }
}

/// Runs tasks on the global rayon thread pool.
#[cfg(feature = "rayon")]
#[derive(Debug, Default, Clone, Copy)]
pub struct RayonRunner;

#[cfg(feature = "rayon")]
impl ParallelRunner for RayonRunner {
    fn num_threads(&self) -> usize {
        rayon::current_num_threads()
    }

    fn run(&self, num_tasks: usize, task: &(dyn Fn(usize, usize) + Sync)) {
        use rayon::prelude::*;
        (0..num_tasks)
            .into_par_iter()
            .for_each(|i| task(i, rayon::current_thread_index().unwrap_or(0)));
    }
}

/// Maps `f` over `0..num_tasks` on `runner`, keeping results in task order.
pub(crate) fn run_on_pool<T, F>(runner: &dyn ParallelRunner, num_tasks: usize, f: F) -> Vec<T>
where
    T: Send,
    F: Fn(usize) -> T + Sync,
{
    let results: Vec<Mutex<Option<T>>> = (0..num_tasks).map(|_| Mutex::new(None)).collect();
    runner.run(num_tasks, &|i, _thread| {
        let value = f(i);
        if let Ok(mut slot) = results[i].lock() {
            *slot = Some(value);
        }
    });
    results
        .into_iter()
        .filter_map(|slot| slot.into_inner().ok().flatten())
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_results_keep_task_order() {
        let squares = run_on_pool(&SequentialRunner, 5, |i| i * i);
        assert_eq!(squares, vec![0, 1, 4, 9, 16]);
    }

    #[cfg(feature = "rayon")]
    #[test]
    fn test_rayon_runner() {
        let values = run_on_pool(&RayonRunner, 100, |i| i + 1);
        assert_eq!(values.len(), 100);
        assert_eq!(values[99], 100);
    }
}
