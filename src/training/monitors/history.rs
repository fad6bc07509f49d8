//! Training history and the monitor that records it

use std::cell::RefCell;
use std::fs;
use std::path::Path;
use std::rc::Rc;

use serde::{Deserialize, Serialize};

use super::{EpochMetrics, Monitor, MonitorAction, MonitorContext, Phase};
use crate::utils::error::Result;

/// Append-only per-epoch record of a run
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrainingHistory {
    pub epochs: Vec<EpochMetrics>,
}

/// History shared between the orchestrator and its [`HistoryLogger`]
pub type SharedHistory = Rc<RefCell<TrainingHistory>>;

impl TrainingHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, metrics: EpochMetrics) {
        self.epochs.push(metrics);
    }

    pub fn len(&self) -> usize {
        self.epochs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.epochs.is_empty()
    }

    /// Epochs recorded for one phase
    pub fn phase(&self, phase: Phase) -> impl Iterator<Item = &EpochMetrics> {
        self.epochs.iter().filter(move |m| m.phase == phase)
    }

    pub fn phase_len(&self, phase: Phase) -> usize {
        self.phase(phase).count()
    }

    /// Best validation accuracy over the whole run
    pub fn best_val_accuracy(&self) -> Option<f64> {
        self.epochs
            .iter()
            .map(|m| m.val_accuracy)
            .fold(None, |best, acc| match best {
                Some(b) if b >= acc => Some(b),
                _ => Some(acc),
            })
    }

    /// Global epoch at which fine-tuning started, if it did
    pub fn phase_boundary(&self) -> Option<usize> {
        self.phase(Phase::FineTuning).next().map(|m| m.epoch)
    }

    /// `(epoch, value)` pairs for charting, epochs printed 1-based
    pub fn series<F: Fn(&EpochMetrics) -> f64>(&self, value: F) -> Vec<(f64, f64)> {
        self.epochs
            .iter()
            .map(|m| ((m.epoch + 1) as f64, value(m)))
            .collect()
    }

    /// Save as CSV, one row per epoch
    pub fn save_csv(&self, path: &Path) -> Result<()> {
        let mut content = String::from(
            "epoch,phase,train_loss,train_acc,val_loss,val_acc,val_auc,val_precision,learning_rate\n",
        );
        for m in &self.epochs {
            content.push_str(&format!(
                "{},{},{:.6},{:.6},{:.6},{:.6},{:.6},{:.6},{:e}\n",
                m.epoch + 1,
                m.phase.label(),
                m.loss,
                m.accuracy,
                m.val_loss,
                m.val_accuracy,
                m.val_auc,
                m.val_precision,
                m.learning_rate
            ));
        }
        fs::write(path, content)?;
        Ok(())
    }

    pub fn save_json(&self, path: &Path) -> Result<()> {
        fs::write(path, serde_json::to_string_pretty(self)?)?;
        Ok(())
    }
}

/// Appends every epoch's metrics to the shared history
pub struct HistoryLogger {
    history: SharedHistory,
}

impl HistoryLogger {
    pub fn new(history: SharedHistory) -> Self {
        Self { history }
    }
}

impl<M> Monitor<M> for HistoryLogger {
    fn name(&self) -> &'static str {
        "history_logger"
    }

    fn on_epoch_end(
        &mut self,
        metrics: &EpochMetrics,
        _ctx: &mut MonitorContext<'_, M>,
    ) -> Result<MonitorAction> {
        self.history.borrow_mut().push(metrics.clone());
        Ok(MonitorAction::Continue)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::training::monitors::testing::{metrics, step};
    use tempfile::TempDir;

    fn two_phase_history() -> TrainingHistory {
        let mut history = TrainingHistory::new();
        history.push(metrics(0, 1.0, 0.4));
        history.push(metrics(1, 0.8, 0.6));
        let mut fine = metrics(2, 0.7, 0.55);
        fine.phase = Phase::FineTuning;
        history.push(fine);
        history
    }

    #[test]
    fn test_logger_appends_in_order() {
        let shared: SharedHistory = Rc::new(RefCell::new(TrainingHistory::new()));
        let mut logger = HistoryLogger::new(Rc::clone(&shared));
        let mut lr = 1e-3;

        for epoch in 0..3 {
            step::<()>(&mut logger, &(), &mut lr, &metrics(epoch, 1.0, 0.5));
        }

        let epochs: Vec<usize> = shared.borrow().epochs.iter().map(|m| m.epoch).collect();
        assert_eq!(epochs, vec![0, 1, 2]);
    }

    #[test]
    fn test_phase_queries() {
        let history = two_phase_history();
        assert_eq!(history.phase_len(Phase::FeatureExtraction), 2);
        assert_eq!(history.phase_len(Phase::FineTuning), 1);
        assert_eq!(history.phase_boundary(), Some(2));
        assert_eq!(history.best_val_accuracy(), Some(0.6));
        assert_eq!(TrainingHistory::new().best_val_accuracy(), None);
    }

    #[test]
    fn test_save_csv_and_json() {
        let dir = TempDir::new().unwrap();
        let history = two_phase_history();

        let csv = dir.path().join("training_history.csv");
        history.save_csv(&csv).unwrap();
        let content = fs::read_to_string(&csv).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 4);
        assert!(lines[0].starts_with("epoch,phase,train_loss"));
        assert!(lines[3].starts_with("3,phase2,"));

        let json = dir.path().join("training_history.json");
        history.save_json(&json).unwrap();
        let parsed: TrainingHistory = serde_json::from_str(&fs::read_to_string(&json).unwrap()).unwrap();
        assert_eq!(parsed, history);
    }
}
