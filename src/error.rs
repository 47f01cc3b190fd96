use crate::{common::*, schedule::LossTerm};
use thiserror::Error;

#[derive(Debug, Error)]
pub enum PoseNdfError {
    #[error("invalid pose shape: expected {expected}, got {actual:?}")]
    InvalidPoseShape { expected: String, actual: Vec<i64> },
    #[error("distance field query failed: {0}")]
    ManifoldQueryFailure(String),
    #[error("non-finite {term} loss at iteration {iteration}, step {step}")]
    NonFiniteLoss {
        iteration: usize,
        step: usize,
        term: String,
    },
    #[error("no weight function registered for loss term {0}")]
    MissingLossWeight(LossTerm),
    #[error("unable to load {path:?}: {reason}")]
    AssetLoad { path: PathBuf, reason: String },
}

impl PoseNdfError {
    pub fn invalid_shape(expected: impl Display, tensor: &Tensor) -> Self {
        Self::InvalidPoseShape {
            expected: expected.to_string(),
            actual: tensor.size(),
        }
    }

    pub fn asset_load(path: impl AsRef<Path>, reason: impl Display) -> Self {
        Self::AssetLoad {
            path: path.as_ref().to_owned(),
            reason: reason.to_string(),
        }
    }
}

/// Non-fatal notice that the mean unweighted loss rose between two outer iterations.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ConvergenceWarning {
    pub iteration: usize,
    pub previous: f64,
    pub current: f64,
}

impl Display for ConvergenceWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "loss increased at iteration {}: {:.8} -> {:.8}",
            self.iteration, self.previous, self.current
        )
    }
}

/// Fails when any element of `tensor` is NaN or infinite.
pub fn ensure_finite(tensor: &Tensor, what: &str) -> Result<(), PoseNdfError> {
    let all_finite = tensor.isfinite().all().int64_value(&[]) == 1;
    if all_finite {
        Ok(())
    } else {
        Err(PoseNdfError::ManifoldQueryFailure(format!(
            "{} contains non-finite values",
            what
        )))
    }
}
