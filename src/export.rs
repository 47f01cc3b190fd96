use crate::common::*;

/// Receives intermediate and final meshes of a run, tagged by a prefix
/// such as `init`, `gt` or `out`.
pub trait Visualizer {
    fn visualize(&self, vertices: &Tensor, faces: &Tensor, prefix: &str) -> Fallible<()>;
}

/// Discards every mesh.
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopVisualizer;

impl Visualizer for NoopVisualizer {
    fn visualize(&self, _vertices: &Tensor, _faces: &Tensor, _prefix: &str) -> Fallible<()> {
        Ok(())
    }
}

/// Writes one Wavefront OBJ file per frame to `<out_dir>/meshes/<prefix>_<frame>.obj`.
#[derive(Debug, Clone)]
pub struct MeshExporter {
    out_dir: PathBuf,
}

impl MeshExporter {
    pub fn new<P>(out_dir: P) -> Self
    where
        P: AsRef<Path>,
    {
        Self {
            out_dir: out_dir.as_ref().to_owned(),
        }
    }

    pub fn mesh_dir(&self) -> PathBuf {
        self.out_dir.join("meshes")
    }

    pub fn mesh_file(&self, prefix: &str, frame: usize) -> PathBuf {
        self.mesh_dir().join(format!("{}_{:04}.obj", prefix, frame))
    }
}

impl Visualizer for MeshExporter {
    fn visualize(&self, vertices: &Tensor, faces: &Tensor, prefix: &str) -> Fallible<()> {
        let (num_frames, num_vertices, _) = vertices.size3()?;
        let (num_faces, _) = faces.size2()?;
        fs::create_dir_all(self.mesh_dir())?;

        let vertices = Vec::<f32>::try_from(
            &vertices
                .detach()
                .to_device(Device::Cpu)
                .to_kind(Kind::Float)
                .flatten(0, -1),
        )?;
        let faces = Vec::<i64>::try_from(
            &faces
                .to_device(Device::Cpu)
                .to_kind(Kind::Int64)
                .flatten(0, -1),
        )?;

        let frame_size = (num_vertices * 3) as usize;
        for (frame, frame_vertices) in vertices.chunks(frame_size).enumerate() {
            let path = self.mesh_file(prefix, frame);
            let mut writer = BufWriter::new(File::create(&path)?);
            for vertex in frame_vertices.chunks(3) {
                writeln!(writer, "v {} {} {}", vertex[0], vertex[1], vertex[2])?;
            }
            // OBJ indices are one-based
            for face in faces.chunks(3) {
                writeln!(writer, "f {} {} {}", face[0] + 1, face[1] + 1, face[2] + 1)?;
            }
            writer.flush()?;
        }

        debug!(
            "exported {} {} meshes ({} faces) to {}",
            num_frames,
            prefix,
            num_faces,
            self.mesh_dir().display()
        );
        Ok(())
    }
}
