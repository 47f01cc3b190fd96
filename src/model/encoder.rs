use crate::{common::*, params};

/// Parent of each manifold joint inside the 21-joint body pose, `-1` for
/// joints hanging directly off the pelvis. Follows the SMPL kinematic tree.
pub const SMPL_BODY_PARENTS: [i64; params::NUM_MANIFOLD_JOINTS as usize] = [
    -1, -1, -1, 0, 1, 2, 3, 4, 5, 6, 7, 8, 8, 8, 11, 12, 13, 15, 16, 17, 18,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Activation {
    #[serde(rename = "relu")]
    Relu,
    #[serde(rename = "lrelu")]
    LeakyRelu,
    #[serde(rename = "softplus")]
    Softplus,
}

impl Activation {
    pub fn apply(&self, xs: &Tensor) -> Tensor {
        match self {
            Self::Relu => xs.relu(),
            Self::LeakyRelu => xs.leaky_relu(),
            Self::Softplus => xs.softplus(),
        }
    }
}

/// Fully connected stack with an activation after every hidden layer.
#[derive(Debug)]
pub struct Mlp {
    layers: Vec<nn::Linear>,
    activation: Activation,
}

impl Mlp {
    pub fn new<'p, P>(
        path: P,
        in_channels: i64,
        hidden_channels: &[i64],
        out_channels: i64,
        activation: Activation,
    ) -> Self
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let channels = iter::once(in_channels)
            .chain(hidden_channels.iter().copied())
            .chain(iter::once(out_channels))
            .collect::<Vec<_>>();
        let layers = channels
            .iter()
            .tuple_windows()
            .enumerate()
            .map(|(index, (&in_c, &out_c))| {
                nn::linear(
                    path / format!("layer_{}", index),
                    in_c,
                    out_c,
                    Default::default(),
                )
            })
            .collect();

        Self { layers, activation }
    }

    pub fn forward(&self, xs: &Tensor) -> Tensor {
        let last = self.layers.len() - 1;
        self.layers
            .iter()
            .enumerate()
            .fold(xs.shallow_clone(), |net, (index, layer)| {
                let net = net.apply(layer);
                if index < last {
                    self.activation.apply(&net)
                } else {
                    net
                }
            })
    }
}

/// Encodes every joint rotation together with the feature of its parent joint,
/// walking the kinematic tree from the pelvis outwards.
#[derive(Debug)]
pub struct StructureEncoder {
    out_channels: i64,
    parents: Vec<i64>,
    joint_encoders: Vec<Mlp>,
}

impl StructureEncoder {
    pub fn new<'p, P>(
        path: P,
        parents: &[i64],
        hidden_channels: &[i64],
        out_channels: i64,
        activation: Activation,
    ) -> Self
    where
        P: Borrow<nn::Path<'p>>,
    {
        let path = path.borrow();

        let joint_encoders = parents
            .iter()
            .enumerate()
            .map(|(joint, &parent)| {
                let in_channels = if parent < 0 {
                    params::QUATERNION_CHANNELS
                } else {
                    params::QUATERNION_CHANNELS + out_channels
                };
                Mlp::new(
                    path / format!("joint_{}", joint),
                    in_channels,
                    hidden_channels,
                    out_channels,
                    activation,
                )
            })
            .collect();

        Self {
            out_channels,
            parents: parents.to_vec(),
            joint_encoders,
        }
    }

    pub fn num_joints(&self) -> i64 {
        self.parents.len() as i64
    }

    pub fn out_channels(&self) -> i64 {
        self.out_channels * self.num_joints()
    }

    /// Encodes `[B, J, 4]` quaternions into `[B, J * out_channels]` features.
    pub fn forward(&self, quaternions: &Tensor) -> Tensor {
        let features = self.parents.iter().zip(self.joint_encoders.iter()).enumerate().fold(
            Vec::<Tensor>::with_capacity(self.parents.len()),
            |mut features, (joint, (&parent, encoder))| {
                let rotation = quaternions.select(1, joint as i64);
                let input = if parent < 0 {
                    rotation
                } else {
                    // parents always precede their children
                    Tensor::cat(&[&rotation, &features[parent as usize]], 1)
                };
                features.push(encoder.forward(&input));
                features
            },
        );
        Tensor::cat(&features, 1)
    }
}
