use super::{
    encoder::{Activation, Mlp, StructureEncoder, SMPL_BODY_PARENTS},
    DistanceField,
};
use crate::{common::*, error::PoseNdfError};

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EncoderInit {
    pub hidden_channels: Vec<i64>,
    pub out_channels: i64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DecoderInit {
    pub hidden_channels: Vec<i64>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseNdfInit {
    pub encoder: EncoderInit,
    pub decoder: DecoderInit,
    pub activation: Activation,
}

impl PoseNdfInit {
    pub fn build<'p, P>(self, path: P) -> PoseNdfNet
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let Self {
            encoder,
            decoder,
            activation,
        } = self;

        let encoder = StructureEncoder::new(
            path / "enc",
            &SMPL_BODY_PARENTS,
            &encoder.hidden_channels,
            encoder.out_channels,
            activation,
        );
        let decoder = Mlp::new(
            path / "dfnet",
            encoder.out_channels(),
            &decoder.hidden_channels,
            1,
            activation,
        );

        PoseNdfNet { encoder, decoder }
    }
}

impl Default for PoseNdfInit {
    fn default() -> Self {
        Self {
            encoder: EncoderInit {
                hidden_channels: vec![64, 64],
                out_channels: 6,
            },
            decoder: DecoderInit {
                hidden_channels: vec![512, 512, 512],
            },
            activation: Activation::Softplus,
        }
    }
}

/// Hierarchical joint encoder followed by a distance regressor.
#[derive(Debug)]
pub struct PoseNdfNet {
    encoder: StructureEncoder,
    decoder: Mlp,
}

impl PoseNdfNet {
    pub fn forward(&self, quaternions: &Tensor) -> Tensor {
        let features = self.encoder.forward(quaternions);
        self.decoder.forward(&features).squeeze_dim(-1)
    }
}

/// The pose-manifold distance field with frozen weights.
#[derive(Derivative)]
#[derivative(Debug)]
pub struct PoseNdf {
    #[derivative(Debug = "ignore")]
    vs: VarStore,
    net: PoseNdfNet,
}

impl PoseNdf {
    /// Creates a randomly initialized, frozen network.
    pub fn new(init: PoseNdfInit, device: Device) -> Self {
        let mut vs = VarStore::new(device);
        let net = init.build(vs.root());
        vs.freeze();
        Self { vs, net }
    }

    /// Loads trained weights from `.ot` or `.safetensors` files.
    pub fn load<P>(init: PoseNdfInit, weights_file: P, device: Device) -> Fallible<Self>
    where
        P: AsRef<Path>,
    {
        let weights_file = weights_file.as_ref();
        let mut vs = VarStore::new(device);
        let net = init.build(vs.root());
        vs.load(weights_file)
            .map_err(|err| PoseNdfError::asset_load(weights_file, err))?;
        vs.freeze();
        Ok(Self { vs, net })
    }

    pub fn var_store(&self) -> &VarStore {
        &self.vs
    }
}

impl DistanceField for PoseNdf {
    fn predict(&self, quaternions: &Tensor) -> Fallible<Tensor> {
        let quaternions = quaternions.to_kind(Kind::Float);
        Ok(self.net.forward(&quaternions))
    }
}
