//! Rotation conversions between axis-angle vectors and unit quaternions.
//!
//! Quaternions are stored real part first, `(w, x, y, z)`. Every function here
//! is batched over all leading dimensions and differentiable, including at the
//! identity rotation where the naive formulas divide by zero.

use crate::{common::*, error::PoseNdfError, math, params};

/// Converts `[..., 3]` axis-angle vectors into `[..., 4]` unit quaternions.
pub fn axis_angle_to_quaternion(axis_angle: &Tensor) -> Tensor {
    let kind = axis_angle.kind();
    let sq_angles = axis_angle
        .pow_tensor_scalar(2)
        .sum_dim_intlist(&[-1_i64][..], true, kind);
    let large = sq_angles.gt(params::SMALL_ANGLE_EPS.powi(2));

    // keep the masked-out branch away from zero, otherwise its gradient is NaN
    let angles = sq_angles.where_self(&large, &sq_angles.ones_like()).sqrt();
    let half_angles = &angles * 0.5;

    // sin(t/2)/t ~ 1/2 - t^2/48 and cos(t/2) ~ 1 - t^2/8 near zero
    let sin_half_over_angle = (half_angles.sin() / &angles)
        .where_self(&large, &(-(&sq_angles / 48.) + 0.5));
    let real = half_angles
        .cos()
        .where_self(&large, &(-(&sq_angles / 8.) + 1.));

    Tensor::cat(&[real, axis_angle * sin_half_over_angle], -1)
}

/// Converts `[..., 4]` quaternions into `[..., 3]` axis-angle vectors.
pub fn quaternion_to_axis_angle(quaternions: &Tensor) -> Tensor {
    let real = quaternions.narrow(-1, 0, 1);
    let imag = quaternions.narrow(-1, 1, 3);

    let norms = math::safe_norm(&imag, true);
    let half_angles = norms.atan2(&real);
    let angles = &half_angles * 2.;
    let large = angles.abs().gt(params::SMALL_ANGLE_EPS);

    let safe_angles = angles.where_self(&large, &angles.ones_like());
    let sin_half_over_angle = (half_angles.sin() / safe_angles).where_self(
        &large,
        &(-(angles.pow_tensor_scalar(2) / 48.) + 0.5),
    );

    imag / sin_half_over_angle
}

/// Flips every quaternion with a negative real part onto the `w >= 0` hemisphere.
///
/// `q` and `-q` encode the same rotation, and the distance field only knows one
/// of them. Returns the canonical quaternions and a boolean mask of the flipped
/// entries, shaped like the input without its last dimension.
pub fn canonicalize(quaternions: &Tensor) -> (Tensor, Tensor) {
    let flipped = quaternions.select(-1, 0).lt(0.);
    let canonical = quaternions
        .neg()
        .where_self(&flipped.unsqueeze(-1), quaternions);
    (canonical, flipped)
}

/// Rescales `[..., 4]` quaternions to unit norm.
pub fn normalize(quaternions: &Tensor) -> Tensor {
    quaternions / math::safe_norm(quaternions, true)
}

/// Maps a `[B, 69]` axis-angle body pose to `[B, 21, 4]` canonical unit quaternions.
pub fn body_pose_to_quaternions(body_pose: &Tensor) -> Fallible<Tensor> {
    check_body_pose(body_pose)?;
    let batch_size = body_pose.size()[0];
    let manifold_pose = body_pose
        .reshape(&[batch_size, params::NUM_BODY_JOINTS, params::AXIS_ANGLE_CHANNELS])
        .narrow(1, 0, params::NUM_MANIFOLD_JOINTS);
    let (quaternions, _) = canonicalize(&axis_angle_to_quaternion(&manifold_pose));
    Ok(normalize(&quaternions))
}

/// Maps `[B, 21, 4]` quaternions back to a `[B, 69]` body pose with the hand joints at zero.
pub fn quaternions_to_body_pose(quaternions: &Tensor) -> Fallible<Tensor> {
    check_quaternion_pose(quaternions)?;
    let batch_size = quaternions.size()[0];
    let manifold_pose = quaternion_to_axis_angle(quaternions);
    let free_joints = Tensor::zeros(
        &[
            batch_size,
            params::NUM_BODY_JOINTS - params::NUM_MANIFOLD_JOINTS,
            params::AXIS_ANGLE_CHANNELS,
        ],
        (manifold_pose.kind(), manifold_pose.device()),
    );
    Ok(Tensor::cat(&[manifold_pose, free_joints], 1).reshape(&[batch_size, params::BODY_POSE_SIZE]))
}

pub fn check_body_pose(body_pose: &Tensor) -> Result<(), PoseNdfError> {
    match body_pose.size().as_slice() {
        &[batch_size, params::BODY_POSE_SIZE] if batch_size > 0 => Ok(()),
        _ => Err(PoseNdfError::invalid_shape(
            format!("[frames, {}]", params::BODY_POSE_SIZE),
            body_pose,
        )),
    }
}

pub fn check_quaternion_pose(quaternions: &Tensor) -> Result<(), PoseNdfError> {
    match quaternions.size().as_slice() {
        &[batch_size, params::NUM_MANIFOLD_JOINTS, params::QUATERNION_CHANNELS]
            if batch_size > 0 =>
        {
            Ok(())
        }
        _ => Err(PoseNdfError::invalid_shape(
            format!(
                "[frames, {}, {}]",
                params::NUM_MANIFOLD_JOINTS,
                params::QUATERNION_CHANNELS
            ),
            quaternions,
        )),
    }
}
