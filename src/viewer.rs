// viewer.rs - Render-loop side of the engine
//
// A Viewer is one mounted view. It owns the camera for as long as it lives and
// holds the latest completed mesh. tick() never waits on reconstruction: it
// picks up a newer Ready mesh if one was published, otherwise keeps drawing
// the one it has. The camera survives mesh swaps.

use glam::{Mat4, Vec3};
use std::sync::Arc;

#[cfg(not(target_arch = "wasm32"))]
use tokio::sync::watch;
#[cfg(not(target_arch = "wasm32"))]
use tracing::debug;

use crate::camera::{CameraController, CameraState, InputEvent};
use crate::config::CameraConfig;
use crate::mesh::Mesh;
#[cfg(not(target_arch = "wasm32"))]
use crate::pipeline::PipelineState;

/// What the renderer needs for one frame
#[derive(Clone, Debug)]
pub struct Frame {
    pub view_proj: Mat4,
    pub eye: Vec3,
    pub mesh: Option<Arc<Mesh>>,
}

pub struct Viewer {
    controller: CameraController,
    aspect: f32,
    mesh: Option<Arc<Mesh>>,
    #[cfg(not(target_arch = "wasm32"))]
    source: Option<watch::Receiver<PipelineState>>,
}

impl Viewer {
    pub fn mount(config: CameraConfig, aspect: f32) -> Self {
        Self {
            controller: CameraController::new(config),
            aspect,
            mesh: None,
            #[cfg(not(target_arch = "wasm32"))]
            source: None,
        }
    }

    /// Track a pipeline; every tick swaps in its latest Ready mesh
    #[cfg(not(target_arch = "wasm32"))]
    pub fn follow(&mut self, source: watch::Receiver<PipelineState>) {
        self.source = Some(source);
    }

    pub fn set_mesh(&mut self, mesh: Arc<Mesh>) {
        self.mesh = Some(mesh);
    }

    pub fn mesh(&self) -> Option<&Arc<Mesh>> {
        self.mesh.as_ref()
    }

    pub fn camera(&self) -> &CameraState {
        self.controller.state()
    }

    pub fn resize(&mut self, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.aspect = width as f32 / height as f32;
        }
    }

    pub fn handle_input(&mut self, event: InputEvent) {
        self.controller.handle(event);
    }

    pub fn tick(&mut self, dt: f32) -> Frame {
        #[cfg(not(target_arch = "wasm32"))]
        self.poll_source();

        self.controller.update(dt);
        let camera = self.controller.state();
        Frame {
            view_proj: camera.view_projection(self.aspect),
            eye: camera.position(),
            mesh: self.mesh.clone(),
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    fn poll_source(&mut self) {
        let Some(source) = self.source.as_mut() else { return };
        if !source.has_changed().unwrap_or(false) {
            return;
        }
        if let PipelineState::Ready(reconstruction) = &*source.borrow_and_update() {
            debug!(token = reconstruction.result.token, "viewer picked up new mesh");
            self.mesh = Some(Arc::clone(&reconstruction.mesh));
        }
    }
}
