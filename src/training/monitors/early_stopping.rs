//! Early stopping on validation loss with best-weight restoration

use tracing::debug;

use super::{EpochMetrics, Monitor, MonitorAction, MonitorContext, Phase, PlateauTracker};
use crate::utils::error::Result;

/// Halts a phase once `val_loss` has not improved for `patience` epochs
///
/// The weights of the best epoch are kept and swapped back in when the phase is
/// halted. State resets at every phase start.
pub struct EarlyStopping<M> {
    patience: usize,
    tracker: PlateauTracker,
    best_weights: Option<M>,
    best_epoch: usize,
    stopped: bool,
}

impl<M: Clone> EarlyStopping<M> {
    pub fn new(patience: usize) -> Self {
        Self {
            patience,
            tracker: PlateauTracker::new(0.0),
            best_weights: None,
            best_epoch: 0,
            stopped: false,
        }
    }

    /// Whether the current phase was halted
    pub fn stopped(&self) -> bool {
        self.stopped
    }

    /// Global epoch of the best val_loss in the current phase
    pub fn best_epoch(&self) -> usize {
        self.best_epoch
    }
}

impl<M: Clone> Monitor<M> for EarlyStopping<M> {
    fn name(&self) -> &'static str {
        "early_stopping"
    }

    fn on_phase_start(&mut self, _phase: Phase) {
        self.tracker.reset();
        self.best_weights = None;
        self.stopped = false;
    }

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        ctx: &mut MonitorContext<'_, M>,
    ) -> Result<MonitorAction> {
        if self.tracker.update(metrics.val_loss) {
            self.best_weights = Some(ctx.model.clone());
            self.best_epoch = metrics.epoch;
            return Ok(MonitorAction::Continue);
        }

        debug!(
            "val_loss did not improve from {:.4} ({}/{})",
            self.tracker.best(),
            self.tracker.wait(),
            self.patience
        );

        if self.tracker.wait() >= self.patience {
            self.stopped = true;
            ctx.logger.log_early_stop(self.tracker.wait(), self.best_epoch);
            return Ok(MonitorAction::Stop);
        }

        Ok(MonitorAction::Continue)
    }

    fn on_phase_end(&mut self, model: M) -> M {
        if !self.stopped {
            return model;
        }
        match self.best_weights.take() {
            Some(best) => best,
            None => model,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::monitors::testing::{metrics, step};

    /// Stand-in "model": the epoch whose weights it holds
    type Weights = usize;

    fn run(losses: &[f64], patience: usize) -> (Option<usize>, Weights) {
        let mut monitor = EarlyStopping::<Weights>::new(patience);
        monitor.on_phase_start(Phase::FeatureExtraction);
        let mut lr = 1e-3;

        for (epoch, &loss) in losses.iter().enumerate() {
            let action = step(&mut monitor, &epoch, &mut lr, &metrics(epoch, loss, 0.5));
            if action == MonitorAction::Stop {
                return (Some(epoch), monitor.on_phase_end(epoch));
            }
        }
        let last = losses.len() - 1;
        (None, monitor.on_phase_end(last))
    }

    #[test]
    fn test_halts_within_patience_after_last_improvement() {
        // improves until epoch 2, then stagnates
        let losses = [1.0, 0.8, 0.6, 0.7, 0.65, 0.9, 0.61, 0.6];
        let (stopped_at, restored) = run(&losses, 3);

        assert_eq!(stopped_at, Some(5));
        assert!(stopped_at.unwrap() - 2 <= 3);
        assert_eq!(restored, 2);
    }

    #[test]
    fn test_no_stop_keeps_final_weights() {
        let losses = [1.0, 0.9, 0.8, 0.85];
        let (stopped_at, weights) = run(&losses, 3);

        assert_eq!(stopped_at, None);
        assert_eq!(weights, 3);
    }

    #[test]
    fn test_state_resets_between_phases() {
        let mut monitor = EarlyStopping::<Weights>::new(1);
        let mut lr = 1e-3;

        monitor.on_phase_start(Phase::FeatureExtraction);
        step(&mut monitor, &0, &mut lr, &metrics(0, 0.1, 0.5));
        assert_eq!(step(&mut monitor, &1, &mut lr, &metrics(1, 0.2, 0.5)), MonitorAction::Stop);
        assert!(monitor.stopped());

        monitor.on_phase_start(Phase::FineTuning);
        assert!(!monitor.stopped());
        // a worse loss than phase 1's best still counts as the first improvement
        assert_eq!(step(&mut monitor, &2, &mut lr, &metrics(2, 0.5, 0.5)), MonitorAction::Continue);
        assert_eq!(monitor.best_epoch(), 2);
    }
}
