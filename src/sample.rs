//! Sampling of plausible poses by projecting arbitrary quaternions onto the
//! zero level set of a distance field.

use crate::{
    body_model::{self, BodyModel},
    common::*,
    config::SampleConfig,
    export::Visualizer,
    math,
    model::{self, DistanceField},
    params, quaternion,
};

/// Uniformly random `[B, 21, 4]` unit quaternions.
pub fn random_quaternions(batch_size: i64, device: Device) -> Tensor {
    let quaternions = Tensor::rand(
        &[
            batch_size,
            params::NUM_MANIFOLD_JOINTS,
            params::QUATERNION_CHANNELS,
        ],
        (Kind::Float, device),
    );
    quaternion::normalize(&quaternions)
}

#[derive(Debug)]
pub struct ProjectionOutput {
    /// `[B, 21, 4]` projected quaternions.
    pub poses: Tensor,
    /// Number of distance field queries performed.
    pub steps: usize,
    /// Mean predicted distance seen at each step, before the update.
    pub mean_distances: Vec<f64>,
}

impl ProjectionOutput {
    /// The projected poses as a `[B, 69]` axis-angle body pose.
    pub fn axis_angle(&self) -> Fallible<Tensor> {
        let (canonical, _) = quaternion::canonicalize(&quaternion::normalize(&self.poses));
        quaternion::quaternions_to_body_pose(&canonical)
    }
}

/// Fixed-point projection `q <- q - f(q) * df/dq` through a frozen distance field.
pub struct PoseProjectionSampler<'a> {
    distance_field: &'a dyn DistanceField,
    config: SampleConfig,
    display: Option<(&'a dyn BodyModel, &'a dyn Visualizer)>,
}

impl<'a> PoseProjectionSampler<'a> {
    pub fn new(distance_field: &'a dyn DistanceField, config: SampleConfig) -> Self {
        Self {
            distance_field,
            config,
            display: None,
        }
    }

    /// Exports `init` and `out` meshes of the projected batch.
    pub fn with_visualizer(
        mut self,
        body_model: &'a dyn BodyModel,
        visualizer: &'a dyn Visualizer,
    ) -> Self {
        self.display = Some((body_model, visualizer));
        self
    }

    pub fn project(&self, poses: &Tensor) -> Fallible<ProjectionOutput> {
        let SampleConfig {
            steps,
            renormalize,
            canonicalize,
            tolerance,
            ..
        } = self.config;
        quaternion::check_quaternion_pose(poses)?;
        let batch_size = poses.size()[0];

        let mut poses = poses.detach().to_kind(Kind::Float);
        self.visualize(&poses, "init")?;
        let mut mean_distances = Vec::with_capacity(steps);

        for step in 0..steps {
            if renormalize {
                poses = quaternion::normalize(&poses);
            }
            if canonicalize {
                poses = quaternion::canonicalize(&poses).0;
            }

            let (distance, gradient) = model::distance_and_gradient(self.distance_field, &poses)?;
            let mean_distance = math::scalar(&distance.mean(Kind::Double));
            debug!("projection step {}: mean distance {:.8}", step, mean_distance);
            mean_distances.push(mean_distance);

            if let Some(tolerance) = tolerance {
                if mean_distance < tolerance {
                    info!(
                        "mean distance {:.8} below tolerance after {} steps",
                        mean_distance, step
                    );
                    break;
                }
            }

            poses = &poses - distance.view([batch_size, 1, 1]) * gradient;
        }

        if renormalize {
            poses = quaternion::normalize(&poses);
        }
        self.visualize(&poses, "out")?;

        info!(
            "projected {} poses in {} steps",
            batch_size,
            mean_distances.len()
        );
        Ok(ProjectionOutput {
            poses,
            steps: mean_distances.len(),
            mean_distances,
        })
    }

    fn visualize(&self, quaternions: &Tensor, prefix: &str) -> Fallible<()> {
        let (body_model, visualizer) = match self.display {
            Some(display) => display,
            None => return Ok(()),
        };
        let (canonical, _) = quaternion::canonicalize(&quaternion::normalize(quaternions));
        let body_pose = quaternion::quaternions_to_body_pose(&canonical)?;
        let betas = body_model::zero_betas(body_pose.size()[0], body_pose.device());
        let mesh = tch::no_grad(|| body_model::pose_mesh(body_model, &betas, &body_pose))?;
        visualizer.visualize(&mesh.vertices, body_model.faces(), prefix)
    }
}
