use crate::{common::*, error::PoseNdfError, params};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum LossTerm {
    #[serde(rename = "pose_pr")]
    PosePrior,
    #[serde(rename = "temp")]
    Temporal,
    #[serde(rename = "data")]
    Data,
}

impl LossTerm {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PosePrior => "pose_pr",
            Self::Temporal => "temp",
            Self::Data => "data",
        }
    }
}

impl Display for LossTerm {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Raw (unweighted) scalar losses of one optimization step.
pub type LossDict = HashMap<LossTerm, Tensor>;

pub type WeightFn = Box<dyn Fn(&Tensor, usize) -> Tensor + Send + Sync>;

/// Iteration-dependent weights of the denoising loss terms.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct WeightSchedule {
    #[derivative(Debug = "ignore")]
    weights: HashMap<LossTerm, WeightFn>,
}

impl WeightSchedule {
    pub fn new(weights: HashMap<LossTerm, WeightFn>) -> Self {
        Self { weights }
    }

    /// Annealing used for motion denoising.
    ///
    /// Smoothness gains weight as the iterations go on while the pull towards
    /// the noisy observation is released. The manifold term is quadratic in the
    /// predicted distance so it fades out close to the manifold.
    pub fn denoise() -> Self {
        let weights: HashMap<LossTerm, WeightFn> = hashmap! {
            LossTerm::Temporal => Box::new(|loss: &Tensor, it: usize| {
                loss * (params::TEMPORAL_WEIGHT * (1 + it) as f64)
            }) as WeightFn,
            LossTerm::Data => Box::new(|loss: &Tensor, it: usize| {
                loss * (params::DATA_WEIGHT / (1 + it) as f64)
            }) as WeightFn,
            LossTerm::PosePrior => Box::new(|loss: &Tensor, it: usize| {
                loss * loss * (params::POSE_PRIOR_WEIGHT / (1 + it) as f64)
            }) as WeightFn,
        };
        Self::new(weights)
    }

    pub fn weight(
        &self,
        term: LossTerm,
        loss: &Tensor,
        iteration: usize,
    ) -> Result<Tensor, PoseNdfError> {
        let weight_fn = self
            .weights
            .get(&term)
            .ok_or(PoseNdfError::MissingLossWeight(term))?;
        Ok(weight_fn(loss, iteration))
    }

    /// Weights every term present in `losses`.
    pub fn weigh_all(
        &self,
        losses: &LossDict,
        iteration: usize,
    ) -> Result<LossDict, PoseNdfError> {
        losses
            .iter()
            .map(|(&term, loss)| Ok((term, self.weight(term, loss, iteration)?)))
            .collect()
    }

    /// Total loss of one step: the sum of all weighted terms.
    pub fn weighted_sum(&self, losses: &LossDict, iteration: usize) -> Fallible<Tensor> {
        total_loss(&self.weigh_all(losses, iteration)?)
    }
}

/// Sums the terms of `losses` in a fixed term order.
pub fn total_loss(losses: &LossDict) -> Fallible<Tensor> {
    ensure!(!losses.is_empty(), "no loss term to optimize");
    let terms = losses
        .iter()
        .sorted_by_key(|(term, _)| **term)
        .map(|(_, loss)| loss)
        .collect::<Vec<_>>();
    Ok(Tensor::stack(&terms, 0).sum(terms[0].kind()))
}
