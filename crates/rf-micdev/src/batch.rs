//! Batch correction of many speaker pairs
//!
//! Every pass reads its own pair plus the shared, immutable corrector.
//! Results are collected by input position, never by completion order.

use std::sync::Arc;

use rayon::prelude::*;
use rayon::ThreadPool;
use serde::{Deserialize, Serialize};

use crate::config::CorrectorConfig;
use crate::corrector::{CorrectOptions, CorrectionOutput, MicrophoneDeviationCorrector};
use crate::MicDevResult;

/// One speaker's binaural impulse response pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SpeakerPair {
    /// Speaker label, e.g. "FL"
    pub label: String,
    pub left: Vec<f64>,
    pub right: Vec<f64>,
}

impl SpeakerPair {
    pub fn new(label: impl Into<String>, left: Vec<f64>, right: Vec<f64>) -> Self {
        Self {
            label: label.into(),
            left,
            right,
        }
    }
}

/// Outcome for one speaker
#[derive(Debug)]
pub struct SpeakerCorrection {
    pub label: String,
    pub result: MicDevResult<CorrectionOutput>,
}

impl SpeakerCorrection {
    pub fn is_ok(&self) -> bool {
        self.result.is_ok()
    }
}

/// Corrects many speaker pairs in parallel against one corrector
#[derive(Debug, Clone)]
pub struct BatchCorrector {
    corrector: Arc<MicrophoneDeviationCorrector>,
    options: CorrectOptions,
    max_parallel: usize,
    /// Built once per `max_parallel`; `None` falls back to the global pool
    pool: Option<Arc<ThreadPool>>,
}

impl BatchCorrector {
    /// Create new batch corrector
    pub fn new(config: CorrectorConfig) -> MicDevResult<Self> {
        Ok(Self::from_corrector(Arc::new(MicrophoneDeviationCorrector::new(
            config,
        )?)))
    }

    /// Share an existing corrector
    pub fn from_corrector(corrector: Arc<MicrophoneDeviationCorrector>) -> Self {
        let max_parallel = rayon::current_num_threads();
        Self {
            corrector,
            options: CorrectOptions::default(),
            max_parallel,
            pool: build_pool(max_parallel),
        }
    }

    /// Set per-pass options
    pub fn with_options(mut self, options: CorrectOptions) -> Self {
        self.options = options;
        self
    }

    /// Set max parallel passes
    pub fn with_max_parallel(mut self, max: usize) -> Self {
        let max = max.max(1);
        if max != self.max_parallel || self.pool.is_none() {
            self.max_parallel = max;
            self.pool = build_pool(max);
        }
        self
    }

    pub fn max_parallel(&self) -> usize {
        self.max_parallel
    }

    pub fn corrector(&self) -> &MicrophoneDeviationCorrector {
        &self.corrector
    }

    /// Correct all pairs; output order matches `pairs`
    pub fn correct_all(&self, pairs: &[SpeakerPair]) -> Vec<SpeakerCorrection> {
        log::debug!(
            "Correcting {} speaker pairs, up to {} in parallel",
            pairs.len(),
            self.max_parallel
        );

        self.install(|| {
            pairs
                .par_iter()
                .map(|pair| {
                    let result = self.corrector.correct_with_options(
                        &pair.left,
                        &pair.right,
                        &self.options,
                    );
                    if let Err(e) = &result {
                        log::warn!("Speaker {}: correction failed: {e}", pair.label);
                    }
                    SpeakerCorrection {
                        label: pair.label.clone(),
                        result,
                    }
                })
                .collect()
        })
    }

    /// Run `op` on the pool bounded by `max_parallel`
    pub(crate) fn install<R, F>(&self, op: F) -> R
    where
        R: Send,
        F: FnOnce() -> R + Send,
    {
        match &self.pool {
            Some(pool) => pool.install(op),
            None => op(),
        }
    }
}

fn build_pool(num_threads: usize) -> Option<Arc<ThreadPool>> {
    match rayon::ThreadPoolBuilder::new()
        .num_threads(num_threads)
        .build()
    {
        Ok(pool) => Some(Arc::new(pool)),
        Err(e) => {
            log::warn!("Could not build a {num_threads}-thread pool ({e}), using the global pool");
            None
        }
    }
}
