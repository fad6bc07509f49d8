//! Learning-rate decay on a validation-loss plateau

use tracing::debug;

use super::{EpochMetrics, Monitor, MonitorAction, MonitorContext, Phase, PlateauTracker};
use crate::utils::error::Result;

/// Multiplies the learning rate by `factor` after `patience` epochs without a
/// `val_loss` improvement of more than `min_delta`, never going below `min_lr`
#[derive(Debug, Clone)]
pub struct ReduceLrOnPlateau {
    patience: usize,
    factor: f64,
    min_lr: f64,
    tracker: PlateauTracker,
    reductions: usize,
}

impl ReduceLrOnPlateau {
    pub fn new(patience: usize, factor: f64, min_lr: f64, min_delta: f64) -> Self {
        Self {
            patience,
            factor,
            min_lr,
            tracker: PlateauTracker::new(min_delta),
            reductions: 0,
        }
    }

    /// Number of reductions applied so far in the run
    pub fn reductions(&self) -> usize {
        self.reductions
    }
}

impl<M> Monitor<M> for ReduceLrOnPlateau {
    fn name(&self) -> &'static str {
        "reduce_lr_on_plateau"
    }

    fn on_phase_start(&mut self, _phase: Phase) {
        self.tracker.reset();
    }

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        ctx: &mut MonitorContext<'_, M>,
    ) -> Result<MonitorAction> {
        if self.tracker.update(metrics.val_loss) || self.tracker.wait() < self.patience {
            return Ok(MonitorAction::Continue);
        }

        let current = *ctx.learning_rate;
        let reduced = (current * self.factor).max(self.min_lr);
        if reduced < current {
            *ctx.learning_rate = reduced;
            self.reductions += 1;
            ctx.logger.log_lr_reduced(current, reduced);
        } else {
            debug!("Learning rate already at floor {:.2e}", self.min_lr);
        }
        self.tracker.reset_wait();

        Ok(MonitorAction::Continue)
    }
}
