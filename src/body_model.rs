use crate::{common::*, config::BodyModelConfig, error::PoseNdfError, params, quaternion};

#[derive(Debug)]
pub struct BodyModelOutput {
    /// `[B, V, 3]` mesh vertices.
    pub vertices: Tensor,
    /// `[B, J, 3]` joint locations.
    pub joints: Tensor,
}

impl BodyModelOutput {
    pub fn detach(&self) -> Self {
        Self {
            vertices: self.vertices.detach(),
            joints: self.joints.detach(),
        }
    }
}

/// A differentiable body mesh model shared read-only by the optimizers.
pub trait BodyModel {
    /// Poses the mesh from `[B, 10]` shape parameters and a `[B, 69]` axis-angle body pose.
    fn forward(&self, betas: &Tensor, body_pose: &Tensor) -> Fallible<BodyModelOutput>;

    /// `[F, 3]` triangle vertex indices.
    fn faces(&self) -> &Tensor;
}

/// Zero shape parameters for `batch_size` frames.
pub fn zero_betas(batch_size: i64, device: Device) -> Tensor {
    Tensor::zeros(&[batch_size, params::NUM_BETAS], (Kind::Float, device))
}

/// Runs `body_model` and checks the shapes it returns.
pub fn pose_mesh<M>(body_model: &M, betas: &Tensor, body_pose: &Tensor) -> Fallible<BodyModelOutput>
where
    M: BodyModel + ?Sized,
{
    quaternion::check_body_pose(body_pose)?;
    let batch_size = body_pose.size()[0];
    ensure!(
        betas.size() == [batch_size, params::NUM_BETAS],
        "expected betas of shape [{}, {}], got {:?}",
        batch_size,
        params::NUM_BETAS,
        betas.size()
    );

    let output = body_model.forward(betas, body_pose)?;
    for (name, points) in [("vertices", &output.vertices), ("joints", &output.joints)] {
        match points.size().as_slice() {
            &[b, _, 3] if b == batch_size => (),
            shape => bail!(
                "the body model returned {} of shape {:?} for {} frames",
                name,
                shape,
                batch_size
            ),
        }
    }
    Ok(output)
}

/// A body model exported with TorchScript, e.g. a traced SMPL layer.
///
/// The module maps `(betas, body_pose)` to a `(vertices, joints)` tuple; the
/// mesh topology is read from an `.npz` archive holding a `faces` array.
pub struct ScriptedBodyModel {
    module: CModule,
    faces: Tensor,
}

impl ScriptedBodyModel {
    pub fn load<P1, P2>(module_file: P1, faces_file: P2, device: Device) -> Fallible<Self>
    where
        P1: AsRef<Path>,
        P2: AsRef<Path>,
    {
        let module_file = module_file.as_ref();
        let faces_file = faces_file.as_ref();

        let mut module = CModule::load_on_device(module_file, device)
            .map_err(|err| PoseNdfError::asset_load(module_file, err))?;
        module.set_eval();
        for (_name, param) in module.named_parameters()? {
            let _ = param.set_requires_grad(false);
        }

        let faces = Tensor::read_npz(faces_file)
            .map_err(|err| PoseNdfError::asset_load(faces_file, err))?
            .into_iter()
            .find(|(name, _)| name == "faces")
            .map(|(_, faces)| faces.to_kind(Kind::Int64))
            .ok_or_else(|| PoseNdfError::asset_load(faces_file, "missing \"faces\" array"))?;
        match faces.size().as_slice() {
            &[_, 3] => (),
            shape => {
                return Err(PoseNdfError::asset_load(
                    faces_file,
                    format!("faces must have shape [F, 3], got {:?}", shape),
                )
                .into())
            }
        }

        Ok(Self { module, faces })
    }

    pub fn from_config(config: &BodyModelConfig, device: Device) -> Fallible<Self> {
        info!(
            "loading body model from {}",
            config.module_file.display()
        );
        Self::load(&config.module_file, &config.faces_file, device)
    }
}

impl BodyModel for ScriptedBodyModel {
    fn forward(&self, betas: &Tensor, body_pose: &Tensor) -> Fallible<BodyModelOutput> {
        let output = self.module.forward_is(&[
            IValue::Tensor(betas.shallow_clone()),
            IValue::Tensor(body_pose.shallow_clone()),
        ])?;
        scripted_output(output)
    }

    fn faces(&self) -> &Tensor {
        &self.faces
    }
}

/// Unpacks the `(vertices, joints)` pair returned by a scripted body model.
fn scripted_output(output: IValue) -> Fallible<BodyModelOutput> {
    let values = match output {
        IValue::Tuple(values) | IValue::GenericList(values) => values,
        other => bail!("the body model must return a tuple, got {:?}", other),
    };
    let mut values = values.into_iter();
    match (values.next(), values.next()) {
        (Some(IValue::Tensor(vertices)), Some(IValue::Tensor(joints))) => {
            Ok(BodyModelOutput { vertices, joints })
        }
        _ => bail!("the body model must return (vertices, joints) tensors"),
    }
}
