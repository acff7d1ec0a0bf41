//! Training for duration and acoustic models
//!
//! - [`masked_loss`]: mse, mae, bce and nll over real steps only
//! - [`TrainOptimizer`]: SGD, Adam, AdamW, RMSprop
//! - [`PlateauScheduler`] and [`EarlyStopping`] driven by one validation metric
//! - [`Engine`]: the epoch loop, checkpointing the best model
//! - [`DurationEvaluator`] / [`AcousticEvaluator`]: named validation metrics
//! - [`JsonlSink`]: scalar metrics as JSON lines

pub mod engine;
pub mod error;
pub mod loss;
pub mod metrics;
pub mod optim;
pub mod schedule;
pub mod sink;

pub use engine::{train_epoch, Engine, EngineConfig, EpochContext, EpochStats, TrainEpochFn, TrainReport};
pub use error::{Result, TrainError};
pub use loss::masked_loss;
pub use metrics::{for_each_row, AcousticEvaluator, DurationEvaluator, Evaluate, RowView};
pub use optim::{ParamsRmsProp, RmsProp, TrainOptimizer};
pub use schedule::{EarlyStopping, PlateauScheduler, Verdict};
pub use sink::JsonlSink;
