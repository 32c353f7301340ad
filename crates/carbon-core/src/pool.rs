//! Bounded per-tile parallelism.
//!
//! Every tile gets its own `Result`, so one bad tile never hides the others.
//! `run` returns only after the last tile finishes.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};

use log::error;
use rayon::prelude::*;
use rayon::{ThreadPool, ThreadPoolBuilder};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::tile_id::TileId;

#[derive(Debug)]
pub struct TileOutcome<T> {
    pub tile_id: TileId,
    pub result: Result<T>,
}

/// A tile that failed, with the error rendered for the run manifest.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FailedTile {
    pub tile_id: TileId,
    pub error: String,
}

/// Splits outcomes into successes and failures, keeping tile order.
pub fn partition<T>(outcomes: Vec<TileOutcome<T>>) -> (Vec<(TileId, T)>, Vec<FailedTile>) {
    let mut ok = Vec::new();
    let mut failed = Vec::new();
    for TileOutcome { tile_id, result } in outcomes {
        match result {
            Ok(v) => ok.push((tile_id, v)),
            Err(e) => failed.push(FailedTile { tile_id, error: e.to_string() }),
        }
    }
    (ok, failed)
}

fn panic_message(payload: &(dyn Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_owned()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic payload".to_owned()
    }
}

pub struct WorkerPool {
    pool: ThreadPool,
}

impl WorkerPool {
    pub fn new(workers: usize) -> Result<Self> {
        let workers = workers.max(1);
        let pool = ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("tile-worker-{i}"))
            .build()?;
        Ok(Self { pool })
    }

    /// Applies `f` to every tile, at most `workers` at a time. Outcomes come
    /// back in the order of `tiles`.
    pub fn run<T, F>(&self, tiles: &[TileId], f: F) -> Vec<TileOutcome<T>>
    where
        T: Send,
        F: Fn(&TileId) -> Result<T> + Sync,
    {
        self.pool.install(|| {
            tiles
                .par_iter()
                .map(|tile| {
                    let result = panic::catch_unwind(AssertUnwindSafe(|| f(tile))).unwrap_or_else(|payload| {
                        Err(Error::WorkerPanic(format!("{tile} ({})", panic_message(&*payload))))
                    });
                    if let Err(e) = &result {
                        error!("{tile}: {e}");
                    }
                    TileOutcome { tile_id: tile.clone(), result }
                })
                .collect()
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;
    use std::thread;
    use std::time::Duration;

    fn ten_tiles() -> Vec<TileId> {
        (0..10)
            .map(|i| TileId::parse(&format!("{:02}N_{:03}E", i * 10 % 80, i * 10)).unwrap())
            .collect()
    }

    #[test]
    fn ten_tiles_on_three_workers_each_run_once() {
        let tiles = ten_tiles();
        let pool = WorkerPool::new(3).unwrap();
        let seen = Mutex::new(HashMap::<TileId, usize>::new());
        let active = AtomicUsize::new(0);
        let peak = AtomicUsize::new(0);

        let outcomes = pool.run(&tiles, |tile| {
            let now = active.fetch_add(1, Ordering::SeqCst) + 1;
            peak.fetch_max(now, Ordering::SeqCst);
            thread::sleep(Duration::from_millis(5));
            *seen.lock().unwrap().entry(tile.clone()).or_default() += 1;
            active.fetch_sub(1, Ordering::SeqCst);
            Ok(tile.as_str().len())
        });

        let seen = seen.into_inner().unwrap();
        assert_eq!(seen.len(), 10);
        assert!(seen.values().all(|&n| n == 1));
        assert!(peak.load(Ordering::SeqCst) <= 3);
        let order: Vec<&TileId> = outcomes.iter().map(|o| &o.tile_id).collect();
        assert_eq!(order, tiles.iter().collect::<Vec<_>>());
    }

    #[test]
    fn failures_and_panics_are_isolated_per_tile() {
        let tiles = ten_tiles();
        let pool = WorkerPool::new(2).unwrap();
        let outcomes = pool.run(&tiles, |tile| match tile.as_str() {
            "10N_010E" => Err(Error::MissingInput("10N_010E_biomass.tif".into())),
            "20N_020E" => panic!("boom"),
            _ => Ok(()),
        });

        let (ok, failed) = partition(outcomes);
        assert_eq!(ok.len(), 8);
        assert_eq!(failed.len(), 2);
        assert!(failed[0].error.contains("10N_010E_biomass.tif"));
        assert!(failed[1].error.contains("boom"));
    }

    #[test]
    fn zero_workers_means_one() {
        assert_eq!(WorkerPool::new(0).unwrap().pool.current_num_threads(), 1);
    }
}
