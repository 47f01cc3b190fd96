//! Reading and writing of pose sequences stored in `.npz` archives.

use crate::{common::*, error::PoseNdfError, params};

pub const POSE_BODY_KEY: &str = "pose_body";
pub const OBSERVATIONS_FILE: &str = "observations.npz";
pub const GROUND_TRUTH_FILE: &str = "gt_results.npz";

/// Loads a `[N, 69]` body pose from the `pose_body` array of `path`.
///
/// Archives holding only the 21 body joints (`[N, 63]`) get zero hand joints appended.
pub fn load_motion<P>(path: P, device: Device) -> Fallible<Tensor>
where
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let pose_body = Tensor::read_npz(path)
        .map_err(|err| PoseNdfError::asset_load(path, err))?
        .into_iter()
        .find(|(name, _)| name == POSE_BODY_KEY)
        .map(|(_, tensor)| tensor)
        .ok_or_else(|| {
            PoseNdfError::asset_load(path, format!("missing \"{}\" array", POSE_BODY_KEY))
        })?
        .to_kind(Kind::Float);

    let pose_body = pad_body_pose(&pose_body)?.to_device(device);
    debug!(
        "loaded {} frames from {}",
        pose_body.size()[0],
        path.display()
    );
    Ok(pose_body)
}

/// Extends `[N, 63]` body poses to the `[N, 69]` layout with zero hand joints.
pub fn pad_body_pose(pose_body: &Tensor) -> Result<Tensor, PoseNdfError> {
    match pose_body.size().as_slice() {
        &[n, params::BODY_POSE_SIZE] if n > 0 => Ok(pose_body.shallow_clone()),
        &[n, params::MANIFOLD_POSE_SIZE] if n > 0 => {
            let hands = Tensor::zeros(
                &[n, params::BODY_POSE_SIZE - params::MANIFOLD_POSE_SIZE],
                (pose_body.kind(), pose_body.device()),
            );
            Ok(Tensor::cat(&[pose_body, &hands], 1))
        }
        _ => Err(PoseNdfError::invalid_shape(
            format!(
                "[frames, {}] or [frames, {}]",
                params::MANIFOLD_POSE_SIZE,
                params::BODY_POSE_SIZE
            ),
            pose_body,
        )),
    }
}

/// Stores poses under the `pose_body` key.
pub fn save_motion<P>(path: P, pose_body: &Tensor) -> Fallible<()>
where
    P: AsRef<Path>,
{
    let pose_body = pose_body.detach().to_device(Device::Cpu);
    Tensor::write_npz(&[(POSE_BODY_KEY, pose_body)], path.as_ref())?;
    Ok(())
}

/// One sequence of a denoising benchmark directory.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct MotionSequence {
    pub name: String,
    pub observations: PathBuf,
    pub ground_truth: Option<PathBuf>,
}

/// Lists `<data_dir>/<sequence>/observations.npz` entries, sorted by name.
pub fn find_sequences<P>(data_dir: P) -> Fallible<Vec<MotionSequence>>
where
    P: AsRef<Path>,
{
    let data_dir = data_dir.as_ref();
    let base = data_dir
        .to_str()
        .ok_or_else(|| format_err!("non UTF-8 path {}", data_dir.display()))?;
    let pattern = Path::new(&glob::Pattern::escape(base))
        .join("*")
        .join(OBSERVATIONS_FILE);
    let pattern = pattern
        .to_str()
        .ok_or_else(|| format_err!("non UTF-8 path {}", pattern.display()))?;

    let sequences = glob::glob(pattern)?
        .map(|entry| -> Fallible<MotionSequence> {
            let observations = entry?;
            let seq_dir = observations
                .parent()
                .ok_or_else(|| format_err!("invalid path {}", observations.display()))?;
            let name = seq_dir
                .file_name()
                .map(|name| name.to_string_lossy().into_owned())
                .ok_or_else(|| format_err!("invalid path {}", observations.display()))?;
            let ground_truth = Some(seq_dir.join(GROUND_TRUTH_FILE)).filter(|path| path.is_file());
            Ok(MotionSequence {
                name,
                observations,
                ground_truth,
            })
        })
        .collect::<Fallible<Vec<_>>>()?
        .into_iter()
        .sorted_by(|lhs, rhs| lhs.name.cmp(&rhs.name))
        .collect();
    Ok(sequences)
}
