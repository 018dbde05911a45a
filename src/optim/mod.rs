//! Gradient-ascent optimizers for Boltzmann machine training.
//!
//! Both training procedures estimate a log-likelihood gradient as
//! `positive statistics - negative statistics` and climb it. The optimizer
//! decides how that estimate turns into a parameter step:
//!
//! ```text
//! Sgd:      v = lr * g
//! Momentum: v = m * v + (1 - m) * lr * g
//! then:     θ += v
//! ```
//!
//! One velocity accumulator is kept per learnable tensor, with the same shape.

use crate::core::{EbmError, EbmResult};
use ndarray::{Array, Dimension, Zip};
use serde::{Deserialize, Serialize};

/// Parameter update rule, selectable per training configuration.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Optimizer {
    /// Plain scaled gradient ascent.
    Sgd { learning_rate: f64 },
    /// Exponentially decayed gradient history.
    Momentum { learning_rate: f64, momentum: f64 },
}

impl Optimizer {
    /// `Sgd` when `momentum` is exactly zero, `Momentum` for any other value.
    ///
    /// Out-of-range momentum is kept so that [`Optimizer::validate`] reports it.
    pub fn with_momentum(learning_rate: f64, momentum: f64) -> Self {
        if momentum == 0.0 {
            Optimizer::Sgd { learning_rate }
        } else {
            Optimizer::Momentum {
                learning_rate,
                momentum,
            }
        }
    }

    pub fn learning_rate(&self) -> f64 {
        match *self {
            Optimizer::Sgd { learning_rate } | Optimizer::Momentum { learning_rate, .. } => {
                learning_rate
            }
        }
    }

    /// Check hyperparameter ranges.
    ///
    /// # Errors
    /// `InvalidConfig` unless `learning_rate` is finite and positive and
    /// `momentum` lies in `[0, 1)`.
    pub fn validate(&self) -> EbmResult<()> {
        let lr = self.learning_rate();
        if !(lr.is_finite() && lr > 0.0) {
            return Err(EbmError::InvalidConfig(format!(
                "Learning rate must be finite and > 0, got {lr}"
            )));
        }
        if let Optimizer::Momentum { momentum, .. } = *self {
            if !(0.0..1.0).contains(&momentum) {
                return Err(EbmError::InvalidConfig(format!(
                    "Momentum must be in [0, 1), got {momentum}"
                )));
            }
        }
        Ok(())
    }

    /// Apply one ascent step to `param` using `grad`, updating `velocity`.
    ///
    /// All three arrays must share a shape.
    pub fn update<D: Dimension>(
        &self,
        param: &mut Array<f64, D>,
        velocity: &mut Array<f64, D>,
        grad: &Array<f64, D>,
    ) {
        match *self {
            Optimizer::Sgd { learning_rate } => {
                Zip::from(&mut *velocity)
                    .and(grad)
                    .for_each(|v, &g| *v = learning_rate * g);
            }
            Optimizer::Momentum {
                learning_rate,
                momentum,
            } => {
                let scale = (1.0 - momentum) * learning_rate;
                Zip::from(&mut *velocity)
                    .and(grad)
                    .for_each(|v, &g| *v = momentum * *v + scale * g);
            }
        }
        *param += &*velocity;
    }
}

impl Default for Optimizer {
    fn default() -> Self {
        Optimizer::Sgd {
            learning_rate: 0.01,
        }
    }
}

/// A named set of tensors that can be stepped as a unit.
///
/// Implemented by each model's parameter bundle so that gradients, velocity
/// and best-checkpoint copies all reuse the same type.
pub trait ParamSet: Clone {
    /// Same shapes, all zeros.
    fn zeros_like(&self) -> Self;

    /// `self += optimizer step(grads)`, updating `velocity` in place.
    fn apply(&mut self, velocity: &mut Self, grads: &Self, optimizer: &Optimizer);
}

#[cfg(test)]
mod tests {
    use super::*;
    use ndarray::{arr1, Array1};

    #[test]
    fn test_sgd_step() {
        let opt = Optimizer::Sgd { learning_rate: 0.5 };
        let mut p = arr1(&[1.0, 2.0]);
        let mut v = Array1::zeros(2);
        opt.update(&mut p, &mut v, &arr1(&[2.0, -4.0]));
        assert_eq!(p, arr1(&[2.0, 0.0]));
        assert_eq!(v, arr1(&[1.0, -2.0]));
    }

    #[test]
    fn test_momentum_accumulates() {
        let opt = Optimizer::Momentum {
            learning_rate: 1.0,
            momentum: 0.5,
        };
        let mut p = arr1(&[0.0]);
        let mut v = Array1::zeros(1);
        let g = arr1(&[1.0]);
        opt.update(&mut p, &mut v, &g);
        // v = 0.5 * 0 + 0.5 * 1 = 0.5
        assert!((v[0] - 0.5).abs() < 1e-12);
        assert!((p[0] - 0.5).abs() < 1e-12);
        opt.update(&mut p, &mut v, &g);
        // v = 0.25 + 0.5 = 0.75
        assert!((v[0] - 0.75).abs() < 1e-12);
        assert!((p[0] - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_with_momentum_selects_variant() {
        assert_eq!(
            Optimizer::with_momentum(0.1, 0.0),
            Optimizer::Sgd { learning_rate: 0.1 }
        );
        assert_eq!(
            Optimizer::with_momentum(0.1, 0.5),
            Optimizer::Momentum {
                learning_rate: 0.1,
                momentum: 0.5
            }
        );
        assert!(matches!(
            Optimizer::with_momentum(0.1, -0.2).validate(),
            Err(EbmError::InvalidConfig(_))
        ));
    }

    #[test]
    fn test_validate_ranges() {
        assert!(Optimizer::Sgd { learning_rate: 0.1 }.validate().is_ok());
        assert!(Optimizer::Sgd { learning_rate: 0.0 }.validate().is_err());
        assert!(Optimizer::Sgd {
            learning_rate: f64::NAN
        }
        .validate()
        .is_err());
        assert!(Optimizer::Momentum {
            learning_rate: 0.1,
            momentum: 1.0
        }
        .validate()
        .is_err());
        assert!(Optimizer::Momentum {
            learning_rate: 0.1,
            momentum: 0.0
        }
        .validate()
        .is_ok());
    }

    #[test]
    fn test_serde_tagged() {
        let opt = Optimizer::Momentum {
            learning_rate: 0.01,
            momentum: 0.9,
        };
        let json = serde_json::to_string(&opt).expect("serialize");
        assert!(json.contains("\"kind\":\"momentum\""));
        let back: Optimizer = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back, opt);
    }
}
