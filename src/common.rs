pub use anyhow::{bail, ensure, format_err, Context, Error, Result as Fallible};
pub use argh::FromArgs;
pub use derivative::Derivative;
pub use itertools::Itertools;
pub use log::{debug, error, info, warn};
pub use maplit::hashmap;
pub use serde::{
    de::Error as DeserializeError, ser::Error as SerializeError, Deserialize, Deserializer,
    Serialize, Serializer,
};
pub use std::{
    borrow::Borrow,
    collections::HashMap,
    fmt::{self, Display},
    fs::{self, File},
    io::{prelude::*, BufWriter},
    iter,
    path::{Path, PathBuf},
    sync::{
        atomic::{AtomicBool, Ordering},
        Arc,
    },
    time::Instant,
};
pub use tch::{
    nn::{self, Adam, OptimizerConfig, VarStore},
    CModule, Device, IValue, Kind, Tensor,
};
