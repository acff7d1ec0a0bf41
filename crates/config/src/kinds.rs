//! Named choices: optimizers, losses and activations
//!
//! Names match the ones accepted on the command line and in config files.
//! Unknown names are configuration errors carrying the offending value.

use ptts_core::ConfigError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// Optimizer family
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum OptimizerKind {
    #[serde(rename = "SGD")]
    Sgd,
    #[serde(rename = "Adam")]
    Adam,
    #[serde(rename = "AdamW")]
    AdamW,
    #[serde(rename = "RMSprop")]
    RmsProp,
}

impl OptimizerKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Sgd => "SGD",
            Self::Adam => "Adam",
            Self::AdamW => "AdamW",
            Self::RmsProp => "RMSprop",
        }
    }
}

impl FromStr for OptimizerKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "SGD" | "sgd" => Ok(Self::Sgd),
            "Adam" | "adam" => Ok(Self::Adam),
            "AdamW" | "adamw" => Ok(Self::AdamW),
            "RMSprop" | "rmsprop" => Ok(Self::RmsProp),
            other => Err(ConfigError::unrecognized("optimizer", other)),
        }
    }
}

/// Training loss
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LossKind {
    Mse,
    Mae,
    Bce,
    Nll,
}

impl LossKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Mse => "mse",
            Self::Mae => "mae",
            Self::Bce => "bce",
            Self::Nll => "nll",
        }
    }

    /// Whether the loss can be paired with `activation`
    pub fn accepts(&self, activation: OutputActivation) -> bool {
        match self {
            Self::Mse | Self::Mae => activation != OutputActivation::LogSoftmax,
            Self::Bce => activation == OutputActivation::Sigmoid,
            Self::Nll => activation == OutputActivation::LogSoftmax,
        }
    }

    /// Reject a loss/activation pair that cannot train
    pub fn check(&self, activation: OutputActivation) -> Result<(), ConfigError> {
        if self.accepts(activation) {
            Ok(())
        } else {
            Err(ConfigError::LossActivationMismatch {
                loss: self.to_string(),
                activation: activation.to_string(),
            })
        }
    }
}

impl FromStr for LossKind {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "mse" => Ok(Self::Mse),
            "mae" => Ok(Self::Mae),
            "bce" => Ok(Self::Bce),
            "nll" => Ok(Self::Nll),
            other => Err(ConfigError::unrecognized("loss", other)),
        }
    }
}

/// Activation applied to the output projection
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OutputActivation {
    /// Raw regression output
    Linear,
    /// Regression bounded to (0, 1)
    Sigmoid,
    /// Log-probabilities over quantized classes
    LogSoftmax,
}

impl OutputActivation {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Linear => "linear",
            Self::Sigmoid => "sigmoid",
            Self::LogSoftmax => "log_softmax",
        }
    }
}

/// Activation applied after the input embedding
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum EmbActivation {
    Tanh,
    #[serde(rename = "ReLU")]
    Relu,
    Identity,
}

impl FromStr for EmbActivation {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "Tanh" | "tanh" => Ok(Self::Tanh),
            "ReLU" | "relu" => Ok(Self::Relu),
            "Identity" | "identity" | "Linear" | "linear" => Ok(Self::Identity),
            other => Err(ConfigError::unrecognized("embedding activation", other)),
        }
    }
}

/// Target normalization applied by the dataset
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Normalization {
    None,
    /// `(x - mean) / std`
    ZScore,
    /// `(x - min) / (max - min)`
    MinMax,
}

macro_rules! display_as_str {
    ($($ty:ty),*) => {
        $(impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        })*
    };
}

display_as_str!(OptimizerKind, LossKind, OutputActivation);

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_optimizer_names() {
        assert_eq!("RMSprop".parse::<OptimizerKind>().unwrap(), OptimizerKind::RmsProp);
        assert_eq!("SGD".parse::<OptimizerKind>().unwrap(), OptimizerKind::Sgd);
        assert!("Adagrad".parse::<OptimizerKind>().is_err());
    }

    #[test]
    fn test_unknown_loss_reports_value() {
        let err = "hinge".parse::<LossKind>().unwrap_err();
        assert!(err.to_string().contains("hinge"));
    }

    #[test]
    fn test_loss_activation_compatibility() {
        assert!(LossKind::Mse.accepts(OutputActivation::Linear));
        assert!(LossKind::Mse.accepts(OutputActivation::Sigmoid));
        assert!(!LossKind::Mse.accepts(OutputActivation::LogSoftmax));
        assert!(LossKind::Bce.check(OutputActivation::Linear).is_err());
        assert!(LossKind::Nll.check(OutputActivation::LogSoftmax).is_ok());
        assert!(LossKind::Nll.check(OutputActivation::Sigmoid).is_err());
    }

    #[test]
    fn test_serde_names() {
        let json = serde_json::to_string(&OptimizerKind::RmsProp).unwrap();
        assert_eq!(json, "\"RMSprop\"");
        let act: EmbActivation = serde_json::from_str("\"ReLU\"").unwrap();
        assert_eq!(act, EmbActivation::Relu);
    }
}
