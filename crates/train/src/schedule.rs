//! Validation-driven schedules: plateau learning-rate decay and early stopping
//!
//! Both track a metric where lower is better.

use ptts_config::PlateauConfig;

/// Multiply the learning rate by `factor` once more than `patience` passes go without improvement
#[derive(Debug, Clone)]
pub struct PlateauScheduler {
    factor: f64,
    patience: usize,
    min_lr: f64,
    best: Option<f64>,
    bad_passes: usize,
}

impl PlateauScheduler {
    pub fn new(config: &PlateauConfig) -> Self {
        Self {
            factor: config.factor,
            patience: config.patience,
            min_lr: config.min_lr,
            best: None,
            bad_passes: 0,
        }
    }

    /// Feed one validation value; returns the learning rate to use next
    pub fn step(&mut self, value: f64, lr: f64) -> f64 {
        if self.best.map_or(true, |best| value < best) {
            self.best = Some(value);
            self.bad_passes = 0;
            return lr;
        }

        self.bad_passes += 1;
        if self.bad_passes <= self.patience {
            return lr;
        }
        self.bad_passes = 0;
        let reduced = (lr * self.factor).max(self.min_lr);
        if reduced < lr {
            tracing::info!(from = lr, to = reduced, "Reducing learning rate on plateau");
        }
        reduced
    }
}

/// Outcome of one early-stopping check
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Verdict {
    /// New best value: checkpoint now
    Improved,
    /// No improvement for this many consecutive passes
    Waiting(usize),
    Stop,
}

#[derive(Debug, Clone)]
pub struct EarlyStopping {
    patience: usize,
    best: Option<(usize, f64)>,
    bad_passes: usize,
}

impl EarlyStopping {
    pub fn new(patience: usize) -> Self {
        Self {
            patience: patience.max(1),
            best: None,
            bad_passes: 0,
        }
    }

    pub fn update(&mut self, epoch: usize, value: f64) -> Verdict {
        if self.best.map_or(true, |(_, best)| value < best) {
            self.best = Some((epoch, value));
            self.bad_passes = 0;
            return Verdict::Improved;
        }
        self.bad_passes += 1;
        if self.bad_passes >= self.patience {
            Verdict::Stop
        } else {
            Verdict::Waiting(self.bad_passes)
        }
    }

    /// `(epoch, value)` of the best pass so far
    pub fn best(&self) -> Option<(usize, f64)> {
        self.best
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_early_stopping_sequence() {
        let mut stopper = EarlyStopping::new(3);
        let verdicts: Vec<Verdict> = [5.0, 4.0, 4.1, 4.2, 4.3]
            .iter()
            .enumerate()
            .map(|(i, v)| stopper.update(i + 1, *v))
            .collect();
        assert_eq!(
            verdicts,
            vec![
                Verdict::Improved,
                Verdict::Improved,
                Verdict::Waiting(1),
                Verdict::Waiting(2),
                Verdict::Stop
            ]
        );
        assert_eq!(stopper.best(), Some((2, 4.0)));
    }

    #[test]
    fn test_equal_value_is_not_improvement() {
        let mut stopper = EarlyStopping::new(2);
        assert_eq!(stopper.update(1, 1.0), Verdict::Improved);
        assert_eq!(stopper.update(2, 1.0), Verdict::Waiting(1));
    }

    #[test]
    fn test_plateau_reduces_after_patience() {
        let mut scheduler = PlateauScheduler::new(&PlateauConfig {
            factor: 0.5,
            patience: 2,
            min_lr: 0.1,
        });
        let mut lr = 1.0;
        lr = scheduler.step(3.0, lr);
        assert_eq!(lr, 1.0);
        lr = scheduler.step(3.5, lr);
        assert_eq!(lr, 1.0);
        lr = scheduler.step(3.5, lr);
        assert_eq!(lr, 1.0);
        lr = scheduler.step(3.5, lr);
        assert_eq!(lr, 0.5);
        lr = scheduler.step(2.0, lr);
        assert_eq!(lr, 0.5);

        let mut rates = Vec::new();
        for _ in 0..9 {
            lr = scheduler.step(9.0, lr);
            rates.push(lr);
        }
        assert_eq!(rates[2], 0.25);
        assert_eq!(rates[5], 0.125);
        assert_eq!(rates[8], 0.1);
    }
}
