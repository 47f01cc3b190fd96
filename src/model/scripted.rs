use super::DistanceField;
use crate::{common::*, error::PoseNdfError};

/// A distance field exported with TorchScript.
///
/// The module takes a `[B, 21, 4]` quaternion tensor and returns `[B]` or
/// `[B, 1]` distances. All of its parameters are frozen on load.
pub struct ScriptedDistanceField {
    module: CModule,
}

impl ScriptedDistanceField {
    pub fn load<P>(module_file: P, device: Device) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let module_file = module_file.as_ref();
        let mut module = CModule::load_on_device(module_file, device)
            .map_err(|err| PoseNdfError::asset_load(module_file, err))?;
        module.set_eval();
        for (_name, param) in module.named_parameters()? {
            let _ = param.set_requires_grad(false);
        }
        Ok(Self { module })
    }
}

impl DistanceField for ScriptedDistanceField {
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        let distance = self.module.forward_ts(&[quaternions])?;
        Ok(distance)
    }
}
