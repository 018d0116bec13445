//! Ember demo viewer.
//!
//! Renders two spinning, lit cubes. Resizing, minimizing and restoring the
//! window exercise the swapchain rebuild path.
//!
//! ## Usage
//!
//! ```bash
//! glslc apps/ember-viewer/shaders/simple.vert -o apps/ember-viewer/shaders/simple.vert.spv
//! glslc apps/ember-viewer/shaders/simple.frag -o apps/ember-viewer/shaders/simple.frag.spv
//! cargo run -p ember-viewer
//! ```
//!
//! An `assets/cube.png` in the working directory textures the first cube.
//!
//! ## Environment Variables
//!
//! - `RUST_LOG`: Set log level (e.g., info, debug, trace)

mod app;
mod cube;

use ember_app::{run_app, AppConfig};

use crate::app::Viewer;

const WIDTH: u32 = 800;
const HEIGHT: u32 = 600;

const VERTEX_SHADER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/simple.vert.spv");
const FRAGMENT_SHADER: &str = concat!(env!("CARGO_MANIFEST_DIR"), "/shaders/simple.frag.spv");

fn main() -> anyhow::Result<()> {
    run_app::<Viewer>(
        AppConfig::new("Ember Viewer")
            .with_size(WIDTH, HEIGHT)
            .with_shaders(VERTEX_SHADER, FRAGMENT_SHADER),
    )
}
