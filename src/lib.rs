use std::sync::Arc;
use wasm_bindgen::prelude::*;

pub mod camera;
pub mod config;
pub mod depth;
pub mod error;
pub mod image_asset;
pub mod mesh;
pub mod viewer;

#[cfg(not(target_arch = "wasm32"))]
pub mod logger;
#[cfg(not(target_arch = "wasm32"))]
pub mod pipeline;

use camera::{InputEvent, Modifiers, PointerButton};
use config::{CameraConfig, MeshConfig};
use depth::DepthMap;
use image_asset::{ColorFormat, ImageAsset};
use viewer::Viewer;

// ============================================================================
// RELIEF VIEW - Orbitable displacement mesh over an {image, depth map} pair
// ============================================================================

#[wasm_bindgen]
pub struct ReliefView {
    image: Arc<ImageAsset>,
    mesh_config: MeshConfig,
    viewer: Viewer,

    // Buffers handed to JS by pointer
    vertices: Vec<f32>,
    indices: Vec<u32>,
    view_proj: [f32; 16],
}

#[wasm_bindgen]
impl ReliefView {
    /// `rgba` is width * height * 4 bytes, `depth` is width * height gray bytes
    #[wasm_bindgen(constructor)]
    pub fn new(
        rgba: &[u8],
        depth: &[u8],
        width: u32,
        height: u32,
        resolution: u32,
    ) -> Result<ReliefView, JsValue> {
        let image = ImageAsset::from_raw(width, height, ColorFormat::Rgba, rgba.to_vec())
            .map_err(|e| JsValue::from_str(&e.to_string()))?;
        let mesh_config = MeshConfig {
            resolution,
            ..Default::default()
        };
        let mut view = Self {
            image: Arc::new(image),
            mesh_config,
            viewer: Viewer::mount(CameraConfig::default(), width as f32 / height.max(1) as f32),
            vertices: Vec::new(),
            indices: Vec::new(),
            view_proj: [0.0; 16],
        };
        view.rebuild(depth).map_err(|e| JsValue::from_str(&e))?;
        view.tick(0.0);
        Ok(view)
    }

    /// Swap in a new depth map for the same image; the camera is kept
    pub fn set_depth(&mut self, depth: &[u8]) -> Result<(), JsValue> {
        self.rebuild(depth).map_err(|e| JsValue::from_str(&e))
    }

    pub fn set_displacement_scale(&mut self, scale: f32, depth: &[u8]) -> Result<(), JsValue> {
        if scale.is_finite() {
            self.mesh_config.displacement_scale = scale;
        }
        self.set_depth(depth)
    }

    fn rebuild(&mut self, depth: &[u8]) -> Result<(), String> {
        let map = DepthMap::from_gray_bytes(self.image.width(), self.image.height(), depth)
            .map_err(|e| e.to_string())?;
        let mesh = mesh::build(Arc::clone(&self.image), &map, &self.mesh_config);
        self.vertices = mesh.vertex_buffer();
        self.indices = mesh.indices().to_vec();
        self.viewer.set_mesh(Arc::new(mesh));
        Ok(())
    }

    /// button: 0 primary, 1 middle, 2 secondary (DOM numbering)
    pub fn pointer_down(&mut self, x: f32, y: f32, button: u8, shift: bool, ctrl: bool) {
        let button = match button {
            0 => PointerButton::Primary,
            1 => PointerButton::Middle,
            _ => PointerButton::Secondary,
        };
        self.viewer.handle_input(InputEvent::PointerDown {
            x,
            y,
            button,
            modifiers: Modifiers {
                shift,
                ctrl,
                alt: false,
            },
        });
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        self.viewer.handle_input(InputEvent::PointerMove { x, y });
    }

    pub fn pointer_up(&mut self) {
        self.viewer.handle_input(InputEvent::PointerUp);
    }

    pub fn scroll(&mut self, delta: f32) {
        self.viewer.handle_input(InputEvent::Scroll { delta });
    }

    pub fn tick(&mut self, dt: f32) {
        let frame = self.viewer.tick(dt);
        self.view_proj = frame.view_proj.to_cols_array();
    }

    pub fn resize(&mut self, w: u32, h: u32) {
        self.viewer.resize(w, h);
    }

    pub fn vertices_ptr(&self) -> *const f32 { self.vertices.as_ptr() }
    pub fn vertices_len(&self) -> usize { self.vertices.len() }
    pub fn indices_ptr(&self) -> *const u32 { self.indices.as_ptr() }
    pub fn indices_len(&self) -> usize { self.indices.len() }
    pub fn view_proj_ptr(&self) -> *const f32 { self.view_proj.as_ptr() }
    pub fn vertex_stride(&self) -> usize { mesh::VERTEX_STRIDE }
    pub fn width(&self) -> u32 { self.image.width() }
    pub fn height(&self) -> u32 { self.image.height() }
}
