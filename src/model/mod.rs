mod encoder;
mod posendf;
mod scripted;

pub use encoder::{Activation, Mlp, StructureEncoder, SMPL_BODY_PARENTS};
pub use posendf::{DecoderInit, EncoderInit, PoseNdf, PoseNdfInit};
pub use scripted::ScriptedDistanceField;

use crate::{
    common::*,
    config::DistanceFieldConfig,
    error::{ensure_finite, PoseNdfError},
    quaternion,
};

/// A frozen network predicting how far a pose is from the manifold of plausible poses.
pub trait DistanceField {
    /// Maps `[B, 21, 4]` unit quaternions to `[B]` distances.
    ///
    /// The result must stay differentiable with respect to `quaternions`.
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor>;
}

/// Queries `field` and validates the prediction.
///
/// Oracle errors, mis-shaped outputs, non-finite distances and distances
/// detached from a differentiable input are all reported as
/// [PoseNdfError::ManifoldQueryFailure].
pub fn query_distance<F>(field: &F, quaternions: &Tensor) -> Fallible<Tensor>
where
    F: DistanceField + ?Sized,
{
    quaternion::check_quaternion_pose(quaternions)?;
    let batch_size = quaternions.size()[0];

    let distance = field
        .predict(quaternions)
        .map_err(|err| PoseNdfError::ManifoldQueryFailure(format!("{:#}", err)))?;

    let distance = match distance.size().as_slice() {
        &[b] if b == batch_size => distance,
        &[b, 1] if b == batch_size => distance.squeeze_dim(1),
        shape => {
            return Err(PoseNdfError::ManifoldQueryFailure(format!(
                "expected {} distances, got shape {:?}",
                batch_size, shape
            ))
            .into())
        }
    };
    if quaternions.requires_grad() && !distance.requires_grad() {
        return Err(PoseNdfError::ManifoldQueryFailure(
            "the distance field is not differentiable with respect to its input".into(),
        )
        .into());
    }
    ensure_finite(&distance, "predicted distance")?;
    Ok(distance)
}

/// Per-frame distances and their gradient with respect to the quaternion input.
///
/// The returned tensors are detached from the autograd graph.
pub fn distance_and_gradient<F>(field: &F, quaternions: &Tensor) -> Fallible<(Tensor, Tensor)>
where
    F: DistanceField + ?Sized,
{
    let input = quaternions.detach().set_requires_grad(true);
    let distance = query_distance(field, &input)?;

    // frames are independent, so the gradient of the sum is the per-frame gradient
    let total = distance.sum(distance.kind());
    let gradient = match Tensor::f_run_backward(&[&total], &[&input], false, false)
        .map_err(|err| PoseNdfError::ManifoldQueryFailure(err.to_string()))?
        .pop()
    {
        Some(gradient) if gradient.defined() => gradient,
        _ => {
            return Err(PoseNdfError::ManifoldQueryFailure(
                "the distance field is not differentiable with respect to its input".into(),
            )
            .into())
        }
    };
    ensure_finite(&gradient, "distance gradient")?;

    Ok((distance.detach(), gradient.detach()))
}

/// Builds the distance field named by the run configuration and loads `checkpoint` into it.
pub fn load_distance_field<P>(
    config: &DistanceFieldConfig,
    checkpoint: P,
    device: Device,
) -> Fallible<Box<dyn DistanceField>>
where
    P: AsRef<Path>,
{
    let field: Box<dyn DistanceField> = match config {
        DistanceFieldConfig::PoseNdf(posendf) => {
            info!(
                "loading PoseNDF weights from {} ({})",
                checkpoint.as_ref().display(),
                posendf.architecture_file().display()
            );
            Box::new(PoseNdf::load(posendf.init.clone(), checkpoint, device)?)
        }
        DistanceFieldConfig::TorchScript => {
            info!(
                "loading TorchScript distance field from {}",
                checkpoint.as_ref().display()
            );
            Box::new(ScriptedDistanceField::load(checkpoint, device)?)
        }
    };
    Ok(field)
}
