// src/parallel.rs
//
// Flat fork/join over contiguous ranges of an output buffer.
//
// - get_splits / get_chunks: partition [0, total) into contiguous ranges
// - parallel_compute: one scoped OS thread per range, all joined before return
// - ProgressSignal: shared flags an optional reporter thread can watch
//
// Failures are cooperative: a failing worker raises the error flag but its
// siblings run to completion. After the join the error of the lowest failing
// worker index is returned; a panicking worker becomes EngineError::Worker.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicBool, Ordering};
use std::thread;

use crate::error::{EngineError, Result};

/// Half-open index range `(start, end)`.
pub type Split = (usize, usize);

/// `n` contiguous ranges covering `[0, total)`; the first `total % n` ranges
/// hold one extra element.
pub fn get_splits(total: usize, n: usize) -> Result<Vec<Split>> {
    if n == 0 {
        return Err(EngineError::config("get_splits: number of splits must be positive"));
    }
    if total == 0 {
        return Err(EngineError::config("get_splits: nothing to split (total == 0)"));
    }
    if n > total {
        return Err(EngineError::config(format!(
            "get_splits: cannot split {total} items into {n} non-empty ranges"
        )));
    }

    let base = total / n;
    let extra = total % n;
    let mut splits = Vec::with_capacity(n);
    let mut start = 0;
    for i in 0..n {
        let len = base + usize::from(i < extra);
        splits.push((start, start + len));
        start += len;
    }
    Ok(splits)
}

/// Fewest ranges such that none is longer than `max_size`.
pub fn get_chunks(total: usize, max_size: usize) -> Result<Vec<Split>> {
    if max_size == 0 {
        return Err(EngineError::config("get_chunks: max_size must be positive"));
    }
    get_splits(total, total.div_ceil(max_size))
}

pub fn available_threads() -> usize {
    thread::available_parallelism()
        .map(|n| n.get())
        .unwrap_or(1)
}

#[derive(Debug, Default)]
pub struct ProgressSignal {
    error_occurred: AtomicBool,
    finished: AtomicBool,
}

impl ProgressSignal {
    pub fn error_occurred(&self) -> bool {
        self.error_occurred.load(Ordering::SeqCst)
    }

    pub fn finished(&self) -> bool {
        self.finished.load(Ordering::SeqCst)
    }

    /// Reporters should stop once this is true.
    pub fn should_stop(&self) -> bool {
        self.error_occurred() || self.finished()
    }
}

/// Runs on its own thread for the duration of a `parallel_compute` call.
pub type ProgressReporter<'a> = Box<dyn FnOnce(&ProgressSignal) + Send + 'a>;

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "worker panicked".to_string()
    }
}

/// Split `out` into `min(num_threads, out.len())` ranges and call
/// `work(range, global_offset)` for each on its own thread.
pub fn parallel_compute<T, F>(
    out: &mut [T],
    work: F,
    num_threads: usize,
    reporter: Option<ProgressReporter<'_>>,
) -> Result<()>
where
    T: Send,
    F: Fn(&mut [T], usize) -> Result<()> + Sync,
{
    if num_threads == 0 {
        return Err(EngineError::config("parallel_compute: num_threads must be positive"));
    }
    if out.is_empty() {
        return Ok(());
    }

    let splits = get_splits(out.len(), num_threads.min(out.len()))?;
    let signal = ProgressSignal::default();
    let mut results: Vec<Result<()>> = Vec::with_capacity(splits.len());

    thread::scope(|scope| {
        let signal = &signal;
        let work = &work;

        let reporter_handle = reporter.map(|report| scope.spawn(move || report(signal)));

        let mut handles = Vec::with_capacity(splits.len());
        let mut rest: &mut [T] = out;
        for (worker, &(start, end)) in splits.iter().enumerate() {
            let (chunk, tail) = std::mem::take(&mut rest).split_at_mut(end - start);
            rest = tail;
            handles.push(scope.spawn(move || {
                let res = match panic::catch_unwind(AssertUnwindSafe(|| work(chunk, start))) {
                    Ok(res) => res,
                    Err(payload) => Err(EngineError::Worker {
                        worker,
                        message: panic_message(payload.as_ref()),
                    }),
                };
                if res.is_err() {
                    signal.error_occurred.store(true, Ordering::SeqCst);
                }
                res
            }));
        }

        for (worker, handle) in handles.into_iter().enumerate() {
            results.push(handle.join().unwrap_or_else(|payload| {
                Err(EngineError::Worker {
                    worker,
                    message: panic_message(payload.as_ref()),
                })
            }));
        }

        signal.finished.store(true, Ordering::SeqCst);
        if let Some(handle) = reporter_handle {
            // A crashed reporter must not mask the workers' outcome.
            let _ = handle.join();
        }
    });

    results.into_iter().find(|r| r.is_err()).unwrap_or(Ok(()))
}
