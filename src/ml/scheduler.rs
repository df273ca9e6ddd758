//! 検証損失が改善しないときに学習率を下げるスケジューラ

use serde::{Deserialize, Serialize};
use tracing::info;

/// 改善とみなす相対しきい値
pub const DEFAULT_THRESHOLD: f64 = 1e-4;

/// ReduceLROnPlateau（mode = min）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PlateauScheduler {
    lr: f64,
    factor: f64,
    patience: usize,
    threshold: f64,
    min_lr: f64,
    best: f64,
    bad_epochs: usize,
}

impl PlateauScheduler {
    /// 係数0.5、待機3エポック
    pub fn new(initial_lr: f64) -> Self {
        Self::with_params(initial_lr, 0.5, 3)
    }

    pub fn with_params(initial_lr: f64, factor: f64, patience: usize) -> Self {
        Self {
            lr: initial_lr,
            factor,
            patience,
            threshold: DEFAULT_THRESHOLD,
            min_lr: 0.0,
            best: f64::INFINITY,
            bad_epochs: 0,
        }
    }

    pub fn lr(&self) -> f64 {
        self.lr
    }

    /// エポック終了時の指標を渡し、次エポックの学習率を返す
    pub fn step(&mut self, metric: f64) -> f64 {
        if metric < self.best * (1.0 - self.threshold) {
            self.best = metric;
            self.bad_epochs = 0;
        } else {
            self.bad_epochs += 1;
        }

        if self.bad_epochs > self.patience {
            let new_lr = (self.lr * self.factor).max(self.min_lr);
            if new_lr < self.lr {
                info!("学習率を下げます: {:.6} -> {:.6}", self.lr, new_lr);
                self.lr = new_lr;
            }
            self.bad_epochs = 0;
        }

        self.lr
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_improving_metric_keeps_lr() {
        let mut s = PlateauScheduler::new(0.001);
        for loss in [1.0, 0.9, 0.8, 0.7, 0.6, 0.5] {
            assert_eq!(s.step(loss), 0.001);
        }
    }

    #[test]
    fn test_plateau_halves_after_patience() {
        let mut s = PlateauScheduler::new(0.001);
        s.step(0.5);
        // 3エポックまでは待つ
        for _ in 0..3 {
            assert_eq!(s.step(0.6), 0.001);
        }
        assert!((s.step(0.6) - 0.0005).abs() < 1e-12);
        // カウンタはリセットされる
        for _ in 0..3 {
            assert!((s.step(0.6) - 0.0005).abs() < 1e-12);
        }
        assert!((s.step(0.6) - 0.00025).abs() < 1e-12);
    }

    #[test]
    fn test_tiny_improvement_counts_as_plateau() {
        let mut s = PlateauScheduler::with_params(1.0, 0.5, 0);
        s.step(1.0);
        assert_eq!(s.step(0.99999), 0.5);
    }
}
