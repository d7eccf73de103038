//! Learning rate scheduling.
//!
//! The classifier uses step decay: the rate is multiplied by `gamma` every
//! `step_size` epochs. A constant schedule is kept for experiments.

use serde::{Deserialize, Serialize};

/// Learning rate scheduler type
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize, Default)]
pub enum SchedulerType {
    /// Constant learning rate (no scheduling)
    #[default]
    Constant,

    /// Step decay: multiply LR by gamma every step_size epochs
    StepLR { step_size: usize, gamma: f64 },
}

/// Epoch-level learning rate scheduler
#[derive(Debug, Clone)]
pub struct LearningRateScheduler {
    scheduler_type: SchedulerType,
    current_lr: f64,
    current_epoch: usize,
}

impl LearningRateScheduler {
    pub fn new(scheduler_type: SchedulerType, base_lr: f64) -> Self {
        Self {
            scheduler_type,
            current_lr: base_lr,
            current_epoch: 0,
        }
    }

    /// Step decay schedule
    pub fn step_lr(base_lr: f64, step_size: usize, gamma: f64) -> Self {
        Self::new(SchedulerType::StepLR { step_size, gamma }, base_lr)
    }

    /// Learning rate for the current epoch
    pub fn get_lr(&self) -> f64 {
        self.current_lr
    }

    /// Advance one epoch (call at the end of each epoch)
    pub fn step(&mut self) {
        self.current_epoch += 1;

        match self.scheduler_type {
            SchedulerType::Constant => {}
            SchedulerType::StepLR { step_size, gamma } => {
                if step_size > 0 && self.current_epoch % step_size == 0 {
                    self.current_lr *= gamma;
                }
            }
        }
    }
}
