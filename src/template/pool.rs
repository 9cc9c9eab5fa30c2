//
// slicetemplate - Unbiased group template construction from slice images
// Copyright (c) 2020 Filip Szczerek <ga.software@yahoo.com>
//
// This project is licensed under the terms of the MIT license
// (see the LICENSE file for details).
//

//!
//! Bounded worker pool for per-slice units of work.
//!

use crate::error::{Error, Result};
use rayon::prelude::*;
use super::{SliceIndex, SliceIndexRange};

pub struct WorkerPool {
    pool: rayon::ThreadPool
}

impl WorkerPool {
    /// Creates a pool of `threads` workers (default: number of logical CPUs).
    pub fn new(threads: Option<usize>) -> Result<WorkerPool> {
        let mut builder = rayon::ThreadPoolBuilder::new();
        if let Some(threads) = threads {
            if threads == 0 {
                return Err(Error::configuration("number of threads must be positive"));
            }
            builder = builder.num_threads(threads);
        }
        let pool = builder.build()
            .map_err(|e| Error::configuration(format!("cannot create worker pool: {}", e)))?;

        Ok(WorkerPool{ pool })
    }

    pub fn num_threads(&self) -> usize { self.pool.current_num_threads() }

    /// Runs `unit` for every slice of `range` and returns the results in slice order.
    ///
    /// Returns only after all started units have finished; the first error stops scheduling of further units.
    ///
    pub fn map_slices<T, F>(&self, range: &SliceIndexRange, unit: F) -> Result<Vec<T>>
    where T: Send,
          F: Fn(SliceIndex) -> Result<T> + Sync + Send
    {
        let slices = range.to_vec();
        self.pool.install(|| slices.into_par_iter().map(|slice| unit(slice)).collect())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn given_all_units_succeed_return_results_in_slice_order() {
        let pool = WorkerPool::new(Some(3)).unwrap();
        assert_eq!(3, pool.num_threads());
        let results = pool.map_slices(&SliceIndexRange::new(2, 9).unwrap(), |slice| Ok(slice * 10)).unwrap();
        assert_eq!(vec![20, 30, 40, 50, 60, 70, 80, 90], results);
    }

    #[test]
    fn when_unit_fails_return_error() {
        let pool = WorkerPool::new(Some(2)).unwrap();
        let executed = AtomicUsize::new(0);
        let result = pool.map_slices(&SliceIndexRange::new(0, 99).unwrap(), |slice| {
            executed.fetch_add(1, Ordering::SeqCst);
            if slice == 0 { Err(Error::tool("test", "injected")) } else { Ok(()) }
        });

        assert!(matches!(result, Err(Error::ExternalTool{ .. })));
        assert!(executed.load(Ordering::SeqCst) >= 1);
    }

    #[test]
    fn when_zero_threads_fail() {
        assert!(matches!(WorkerPool::new(Some(0)), Err(Error::Configuration(_))));
    }
}
