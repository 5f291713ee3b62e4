// Garment mesh rendering
// Provides the renderer seam the session draws through and the headless
// software rasterizer used when no GPU surface is attached

pub mod mesh_renderer;
pub mod overlay;

pub use mesh_renderer::MeshRenderer;
pub use overlay::overlay_landmarks;

use crate::models::garment::{GarmentTexture, GridPoint, GRID_POINTS};
use image::RgbaImage;

/// Renderer trait
/// Consumes drape positions in renderer vertex order and keeps its own output
/// surface, handed back explicitly for compositing
pub trait Renderer: Send {
    /// Draw the garment with the given vertex positions (world units)
    fn draw(&mut self, positions: &[GridPoint; GRID_POINTS], texture: &GarmentTexture);

    /// Stop drawing the garment until the next `draw`
    fn hide(&mut self);

    fn is_visible(&self) -> bool;

    /// The last drawn output, or `None` if the surface is unavailable
    fn surface(&self) -> Option<RgbaImage>;
}
