pub mod classifiers;
pub mod data_loader;
pub mod elo_calculator;
pub mod ensemble;
pub mod feature_builder;
pub mod predictor;
pub mod simulator;
pub mod snapshot_store;
pub mod walk_forward;

pub use classifiers::{default_classifiers, ClassProbabilities, Classifier};
pub use data_loader::*;
pub use elo_calculator::*;
pub use ensemble::*;
pub use feature_builder::*;
pub use predictor::*;
pub use simulator::*;
pub use snapshot_store::*;
pub use walk_forward::*;
