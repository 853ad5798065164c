// mesh.rs - Displacement-mapped relief surface
//
// An R x R vertex grid on the XZ plane, displaced along +Y by the sampled
// depth. Layout and orientation:
//   - row-major, row 0 = top of the image = -Z edge, column 0 = -X edge
//   - uv = (col, row) / (R - 1), so v = 0 is the top row for both the texture
//     lookup and the depth lookup
//   - two CCW triangles per cell, front face +Y
//
// Normals are computed from the displaced positions. The whole mesh can be
// placed with an affine transform; displacement always follows the
// transformed local +Y, so "depth up" stays "model up".

use glam::{Affine3A, Vec2, Vec3};
use std::sync::Arc;
use tracing::debug;

use crate::config::{DisplacementBias, MeshConfig};
use crate::depth::DepthMap;
use crate::image_asset::ImageAsset;

pub const MIN_RESOLUTION: u32 = 2;
/// Keeps resolution^2 vertex indices well inside u32
pub const MAX_RESOLUTION: u32 = 4096;

/// Floats per vertex in the interleaved buffer: position, normal, uv
pub const VERTEX_STRIDE: usize = 8;

#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Vertex {
    /// Undisplaced grid position
    pub base: Vec3,
    pub uv: Vec2,
    /// Offset along local +Y
    pub displacement: f32,
    pub normal: Vec3,
}

impl Vertex {
    #[inline]
    pub fn position(&self) -> Vec3 {
        self.base + Vec3::Y * self.displacement
    }
}

#[derive(Clone, Debug)]
pub struct Mesh {
    resolution: u32,
    vertices: Vec<Vertex>,
    indices: Vec<u32>,
    texture: Arc<ImageAsset>,
    transform: Affine3A,
}

pub fn grid_resolution(requested: u32) -> u32 {
    requested.clamp(MIN_RESOLUTION, MAX_RESOLUTION)
}

/// Build a fresh mesh for one image + depth map pair.
///
/// Resolution is clamped to [MIN_RESOLUTION, MAX_RESOLUTION]. Each vertex is
/// displaced by `depth(u, v) * displacement_scale + bias`; `DisplacementBias::Centered`
/// picks the bias that makes the mean displacement zero for any scale.
pub fn build(image: Arc<ImageAsset>, depth: &DepthMap, config: &MeshConfig) -> Mesh {
    let r = grid_resolution(config.resolution) as usize;
    let extent_x = config.extent;
    let extent_z = config.extent / image.aspect();
    let step = 1.0 / (r - 1) as f32;

    let samples: Vec<f32> = (0..r * r)
        .map(|i| depth.sample_uv((i % r) as f32 * step, (i / r) as f32 * step))
        .collect();

    let bias = match config.bias {
        DisplacementBias::Fixed(bias) => bias,
        DisplacementBias::Centered => {
            let mean = samples.iter().map(|&s| s as f64).sum::<f64>() / samples.len() as f64;
            -(mean as f32) * config.displacement_scale
        }
    };

    let vertices: Vec<Vertex> = samples
        .iter()
        .enumerate()
        .map(|(i, &sample)| {
            let uv = Vec2::new((i % r) as f32 * step, (i / r) as f32 * step);
            Vertex {
                base: Vec3::new((uv.x - 0.5) * extent_x, 0.0, (uv.y - 0.5) * extent_z),
                uv,
                displacement: sample * config.displacement_scale + bias,
                normal: Vec3::Y,
            }
        })
        .collect();

    let mut mesh = Mesh {
        resolution: r as u32,
        vertices,
        indices: grid_indices(r),
        texture: image,
        transform: Affine3A::IDENTITY,
    };
    mesh.recompute_normals();

    debug!(
        resolution = r,
        bias,
        max = mesh.max_displacement(),
        "mesh reconstructed"
    );
    mesh
}

fn grid_indices(r: usize) -> Vec<u32> {
    let mut indices = Vec::with_capacity((r - 1) * (r - 1) * 6);
    for row in 0..r - 1 {
        for col in 0..r - 1 {
            let a = (row * r + col) as u32;
            let b = a + 1;
            let c = a + r as u32;
            let d = c + 1;
            indices.extend_from_slice(&[a, c, b, b, c, d]);
        }
    }
    indices
}

impl Mesh {
    /// Area-weighted vertex normals from the displaced positions
    fn recompute_normals(&mut self) {
        let mut acc = vec![Vec3::ZERO; self.vertices.len()];
        for tri in self.indices.chunks_exact(3) {
            let (i0, i1, i2) = (tri[0] as usize, tri[1] as usize, tri[2] as usize);
            let p0 = self.vertices[i0].position();
            let face = (self.vertices[i1].position() - p0).cross(self.vertices[i2].position() - p0);
            acc[i0] += face;
            acc[i1] += face;
            acc[i2] += face;
        }
        for (v, n) in self.vertices.iter_mut().zip(acc) {
            v.normal = n.try_normalize().unwrap_or(Vec3::Y);
        }
    }

    pub fn with_transform(mut self, transform: Affine3A) -> Self {
        self.transform = transform;
        self
    }

    pub fn transform(&self) -> Affine3A {
        self.transform
    }

    pub fn resolution(&self) -> u32 {
        self.resolution
    }

    pub fn vertex_count(&self) -> usize {
        self.vertices.len()
    }

    pub fn vertices(&self) -> &[Vertex] {
        &self.vertices
    }

    pub fn indices(&self) -> &[u32] {
        &self.indices
    }

    pub fn texture(&self) -> &ImageAsset {
        &self.texture
    }

    #[inline]
    pub fn vertex(&self, row: u32, col: u32) -> &Vertex {
        &self.vertices[(row * self.resolution + col) as usize]
    }

    pub fn world_position(&self, i: usize) -> Vec3 {
        self.transform.transform_point3(self.vertices[i].position())
    }

    pub fn world_normal(&self, i: usize) -> Vec3 {
        let normal_matrix = self.transform.matrix3.inverse().transpose();
        normal_matrix
            .mul_vec3(self.vertices[i].normal)
            .normalize_or_zero()
    }

    /// Direction displacement moves vertices in world space
    pub fn world_up(&self) -> Vec3 {
        self.transform.transform_vector3(Vec3::Y).normalize_or_zero()
    }

    /// Surface color at a vertex, through the same uv as its depth sample
    pub fn base_color(&self, i: usize) -> [u8; 3] {
        let uv = self.vertices[i].uv;
        self.texture.sample_uv(uv.x, uv.y)
    }

    pub fn mean_displacement(&self) -> f32 {
        let sum: f64 = self.vertices.iter().map(|v| v.displacement as f64).sum();
        (sum / self.vertices.len() as f64) as f32
    }

    pub fn max_displacement(&self) -> f32 {
        self.vertices
            .iter()
            .map(|v| v.displacement.abs())
            .fold(0.0, f32::max)
    }

    /// Interleaved [px, py, pz, nx, ny, nz, u, v] in local space
    pub fn vertex_buffer(&self) -> Vec<f32> {
        let mut out = Vec::with_capacity(self.vertices.len() * VERTEX_STRIDE);
        for v in &self.vertices {
            let p = v.position();
            out.extend_from_slice(&[p.x, p.y, p.z, v.normal.x, v.normal.y, v.normal.z, v.uv.x, v.uv.y]);
        }
        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::image_asset::ColorFormat;
    use glam::Quat;
    use ndarray::Array2;

    fn gray_image(w: u32, h: u32) -> Arc<ImageAsset> {
        Arc::new(ImageAsset::from_raw(w, h, ColorFormat::Rgb, vec![128; (w * h * 3) as usize]).unwrap())
    }

    fn depth_from(f: impl Fn(usize, usize) -> f32, w: usize, h: usize) -> DepthMap {
        DepthMap::from_normalized(Array2::from_shape_fn((h, w), |(y, x)| f(x, y)))
    }

    fn config(resolution: u32, scale: f32, bias: DisplacementBias) -> MeshConfig {
        MeshConfig {
            resolution,
            extent: 4.0,
            displacement_scale: scale,
            bias,
        }
    }

    #[test]
    fn grid_has_resolution_squared_vertices() {
        let depth = depth_from(|_, _| 0.5, 8, 8);
        let mesh = build(gray_image(8, 8), &depth, &config(17, 1.0, DisplacementBias::Fixed(0.0)));
        assert_eq!(mesh.vertex_count(), 17 * 17);
        assert_eq!(mesh.indices().len(), 16 * 16 * 6);
        assert_eq!(mesh.vertex_buffer().len(), 17 * 17 * VERTEX_STRIDE);
    }

    #[test]
    fn resolution_is_raised_to_minimum() {
        let depth = depth_from(|_, _| 0.5, 4, 4);
        let mesh = build(gray_image(4, 4), &depth, &config(0, 1.0, DisplacementBias::Fixed(0.0)));
        assert_eq!(mesh.resolution(), MIN_RESOLUTION);
        assert_eq!(mesh.vertex_count(), 4);
    }

    #[test]
    fn resolution_is_capped_so_indices_fit_u32() {
        assert_eq!(grid_resolution(u32::MAX), MAX_RESOLUTION);
        assert_eq!(grid_resolution(70_000), MAX_RESOLUTION);
        assert_eq!(grid_resolution(300), 300);
        let r = MAX_RESOLUTION as u64;
        assert!(r * r <= u32::MAX as u64);
    }

    #[test]
    fn centered_bias_zeroes_mean_for_any_scale() {
        let depth = depth_from(|x, y| ((x * 7 + y * 3) % 11) as f32 / 10.0, 32, 24);
        for scale in [0.1, 1.0, 3.5, 25.0] {
            let mesh = build(gray_image(32, 24), &depth, &config(33, scale, DisplacementBias::Centered));
            assert!(
                mesh.mean_displacement().abs() < 1e-4 * scale.max(1.0),
                "scale {scale}: mean {}",
                mesh.mean_displacement()
            );
            assert!(mesh.max_displacement() > 0.0);
        }
    }

    #[test]
    fn fixed_bias_is_added_verbatim() {
        let depth = depth_from(|_, _| 0.25, 4, 4);
        let mesh = build(gray_image(4, 4), &depth, &config(3, 2.0, DisplacementBias::Fixed(-1.0)));
        assert!(mesh.vertices().iter().all(|v| (v.displacement + 0.5).abs() < 1e-6));
    }

    #[test]
    fn flat_field_keeps_up_normals() {
        let depth = depth_from(|_, _| 0.7, 6, 6);
        let mesh = build(gray_image(6, 6), &depth, &config(6, 1.0, DisplacementBias::Centered));
        assert!(mesh.vertices().iter().all(|v| (v.normal - Vec3::Y).length() < 1e-5));
    }

    #[test]
    fn normals_follow_displaced_slope() {
        // Depth rising toward +X tilts normals toward -X
        let depth = depth_from(|x, _| x as f32 / 15.0, 16, 16);
        let mesh = build(gray_image(16, 16), &depth, &config(16, 2.0, DisplacementBias::Centered));
        let n = mesh.vertex(8, 8).normal;
        assert!(n.x < -0.05, "normal {n:?}");
        assert!(n.y > 0.0);
        assert!(n.z.abs() < 1e-4);
    }

    #[test]
    fn plane_follows_image_aspect() {
        let depth = depth_from(|_, _| 0.0, 20, 10);
        let mesh = build(gray_image(20, 10), &depth, &config(5, 1.0, DisplacementBias::Fixed(0.0)));
        let first = mesh.vertex(0, 0).base;
        let last = mesh.vertex(4, 4).base;
        assert_eq!(first, Vec3::new(-2.0, 0.0, -1.0));
        assert_eq!(last, Vec3::new(2.0, 0.0, 1.0));
    }

    #[test]
    fn displacement_follows_transformed_up() {
        let depth = depth_from(|x, y| if x == 0 && y == 0 { 1.0 } else { 0.0 }, 4, 4);
        let mesh = build(gray_image(4, 4), &depth, &config(4, 1.0, DisplacementBias::Fixed(0.0)));
        let rotation = Quat::from_rotation_z(std::f32::consts::FRAC_PI_2);
        let mesh = mesh.with_transform(Affine3A::from_rotation_translation(rotation, Vec3::new(1.0, 2.0, 3.0)));

        let base_world = mesh.transform().transform_point3(mesh.vertices()[0].base);
        let offset = mesh.world_position(0) - base_world;
        let up = mesh.world_up();
        assert!((offset - up).length() < 1e-5, "offset {offset:?} up {up:?}");
        assert!((up - Vec3::new(-1.0, 0.0, 0.0)).length() < 1e-5);
        assert!(mesh.world_normal(5).dot(up) > 0.99);
    }
}
