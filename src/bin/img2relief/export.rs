// export.rs - Write the depth asset and the mesh to disk
//
// depth_<stem>.png : 8-bit grayscale, same size as the source, 255 = nearest
// <stem>.obj       : positions, uvs, normals, CCW triangles (1-based indices)
//
// OBJ texture coordinates put v = 0 at the bottom, so v is flipped on write.

use anyhow::Context;
use std::fs::File;
use std::io::{BufWriter, Write};
use std::path::{Path, PathBuf};

use relief_engine::depth::DepthMap;
use relief_engine::mesh::Mesh;

pub fn write_depth_png(dir: &Path, stem: &str, depth: &DepthMap) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("depth_{stem}.png"));
    depth
        .to_gray_image()
        .save(&path)
        .with_context(|| format!("writing {}", path.display()))?;
    Ok(path)
}

pub fn write_obj(dir: &Path, stem: &str, mesh: &Mesh) -> anyhow::Result<PathBuf> {
    let path = dir.join(format!("{stem}.obj"));
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let mut f = BufWriter::new(file);

    writeln!(f, "# relief mesh {}x{}", mesh.resolution(), mesh.resolution())?;
    for i in 0..mesh.vertex_count() {
        let p = mesh.world_position(i);
        writeln!(f, "v {:.5} {:.5} {:.5}", p.x, p.y, p.z)?;
    }
    for v in mesh.vertices() {
        writeln!(f, "vt {:.5} {:.5}", v.uv.x, 1.0 - v.uv.y)?;
    }
    for i in 0..mesh.vertex_count() {
        let n = mesh.world_normal(i);
        writeln!(f, "vn {:.5} {:.5} {:.5}", n.x, n.y, n.z)?;
    }
    for tri in mesh.indices().chunks_exact(3) {
        let (a, b, c) = (tri[0] + 1, tri[1] + 1, tri[2] + 1);
        writeln!(f, "f {a}/{a}/{a} {b}/{b}/{b} {c}/{c}/{c}")?;
    }
    f.flush()?;
    Ok(path)
}
