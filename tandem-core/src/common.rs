//! Types shared between a learner and the node that drives it.

use std::fmt;

use serde::{Deserialize, Serialize};
use thiserror::Error;

/// The algorithms a learner can run. Carried in every training request so
/// the remote node routes the payload to its matching learner.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Algorithm {
    /// Two-party vertical logistic regression.
    LogicRegressionVl,
}

impl Algorithm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Algorithm::LogicRegressionVl => "LOGIC_REGRESSION_VL",
        }
    }
}

impl fmt::Display for Algorithm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An error for hyperparameters that cannot produce a meaningful model.
#[derive(Debug, Error)]
#[error("invalid training parameters: {0}")]
pub struct InvalidTrainParams(pub String);

/// Hyperparameters of a vertical training task.
///
/// Both parties must agree on everything except `label_name`: the party that
/// owns the labels names its label column, the other leaves it empty. Every
/// column that is neither the id nor the label is treated as a feature.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainParams {
    /// Gradient descent step size.
    pub learning_rate: f64,
    /// Convergence tolerance on the round-to-round cost difference.
    pub tolerance: f64,
    /// Hard cap on the number of training rounds.
    pub max_rounds: u64,
    /// L2 regularization strength.
    pub regularization: f64,
    /// Fixed-point precision: reals are scaled by `10^precision` before
    /// encryption.
    pub precision: u32,
    /// Rows per round. `0` selects the full batch.
    pub batch_size: usize,
    /// Paillier modulus size in bits. `0` selects the default.
    pub key_bits: usize,
    /// Name of the sample id column.
    pub id_name: String,
    /// Name of the label column; empty for the party without labels.
    pub label_name: String,
}

impl TrainParams {
    /// Whether this party owns the label column.
    pub fn has_labels(&self) -> bool {
        !self.label_name.is_empty()
    }

    pub fn validate(&self) -> Result<(), InvalidTrainParams> {
        if !(self.learning_rate.is_finite() && self.learning_rate > 0.0) {
            return Err(InvalidTrainParams(format!(
                "learning rate must be positive, got {}",
                self.learning_rate
            )));
        }
        if !(self.tolerance.is_finite() && self.tolerance > 0.0) {
            return Err(InvalidTrainParams(format!(
                "tolerance must be positive, got {}",
                self.tolerance
            )));
        }
        if self.max_rounds == 0 {
            return Err(InvalidTrainParams("max rounds must be at least 1".into()));
        }
        if !(self.regularization.is_finite() && self.regularization >= 0.0) {
            return Err(InvalidTrainParams(format!(
                "regularization must be non-negative, got {}",
                self.regularization
            )));
        }
        if self.precision == 0 || self.precision > 12 {
            return Err(InvalidTrainParams(format!(
                "precision must be within 1..=12, got {}",
                self.precision
            )));
        }
        if self.id_name.is_empty() {
            return Err(InvalidTrainParams("id column name must not be empty".into()));
        }
        Ok(())
    }
}

/// A request to advance the training protocol on a remote node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TrainRequest {
    pub task_id: String,
    pub algo: Algorithm,
    /// A serialized protocol [`Message`].
    ///
    /// [`Message`]: crate::message::Message
    pub payload: Vec<u8>,
}

/// The response to a [`TrainRequest`]. An empty payload is a bare
/// acknowledgement.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TrainResponse {
    pub task_id: String,
    pub payload: Vec<u8>,
}

/// The outcome of a training task, delivered exactly once per learner.
#[derive(Debug, Clone, PartialEq)]
pub struct TaskResult {
    pub task_id: String,
    pub success: bool,
    /// A bincode-serialized [`TrainModel`] on success, empty otherwise.
    pub model: Vec<u8>,
    /// Empty on success.
    pub err_msg: String,
}

/// The local portion of a trained model: the weights for this party's
/// feature columns plus enough metadata to use them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrainModel {
    /// The routable name of the party that owns these weights.
    pub party: String,
    /// Feature column names, in weight order. The label owner carries an
    /// extra trailing weight for the intercept.
    pub feature_names: Vec<String>,
    pub weights: Vec<f64>,
    /// Number of completed training rounds.
    pub rounds: u64,
    /// Echo of the hyperparameters the model was trained with.
    pub params: TrainParams,
}
