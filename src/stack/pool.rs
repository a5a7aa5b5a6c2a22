//! Scoped worker pool for per-target reductions.

use std::thread;

use crossbeam_channel::bounded;

use crate::error::{GfError, GfResult};

/// Runs `job(i)` for every `i < count` on up to `workers` threads.
///
/// Results are returned in index order regardless of which worker ran which
/// index. If any job fails, the error of the lowest failing index is returned.
pub(crate) fn run_indexed<T, F>(count: usize, workers: usize, job: F) -> GfResult<Vec<T>>
where
    T: Send,
    F: Fn(usize) -> GfResult<T> + Sync,
{
    let workers = workers.clamp(1, count.max(1));
    if workers == 1 {
        return (0..count).map(&job).collect();
    }

    let (task_tx, task_rx) = bounded::<usize>(count);
    for index in 0..count {
        task_tx
            .send(index)
            .map_err(|_| GfError::internal("stacking task queue closed early"))?;
    }
    drop(task_tx);

    let (result_tx, result_rx) = bounded::<(usize, GfResult<T>)>(count);
    thread::scope(|scope| -> GfResult<()> {
        for idx in 0..workers {
            let task_rx = task_rx.clone();
            let result_tx = result_tx.clone();
            let job = &job;
            thread::Builder::new()
                .name(format!("gfstore-stack-{idx}"))
                .spawn_scoped(scope, move || {
                    while let Ok(index) = task_rx.recv() {
                        if result_tx.send((index, job(index))).is_err() {
                            break;
                        }
                    }
                })?;
        }
        Ok(())
    })?;
    drop(result_tx);

    let mut slots: Vec<Option<GfResult<T>>> = (0..count).map(|_| None).collect();
    for (index, result) in result_rx.try_iter() {
        slots[index] = Some(result);
    }
    slots
        .into_iter()
        .enumerate()
        .map(|(index, slot)| {
            slot.unwrap_or_else(|| {
                Err(GfError::internal(format!(
                    "target {index} produced no result"
                )))
            })
        })
        .collect()
}
