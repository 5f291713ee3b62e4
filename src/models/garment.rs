// Garment mesh topology, control points and textures

use image::RgbaImage;
use nalgebra::{Point3, Vector3};
use std::sync::Arc;
use uuid::Uuid;

/// Control points per row
pub const GRID_COLUMNS: usize = 10;
/// Control points per column
pub const GRID_ROWS: usize = 10;
/// Total control points; the deformation state always holds exactly this many
pub const GRID_POINTS: usize = GRID_COLUMNS * GRID_ROWS;

/// A control point position in world units
pub type GridPoint = Point3<f32>;
/// A direction or offset in world units
pub type GridVector = Vector3<f32>;

// ==============================================================================
// Index Remapping
// ==============================================================================

/// Logical grid columns run from the visual right edge (0) to the left edge (9);
/// renderer vertices run left to right. The mapping is its own inverse.
pub fn geom_col(col: usize) -> usize {
    GRID_COLUMNS - 1 - col
}

/// Renderer vertex index for a logical `(row, col)`
pub fn logical_to_geometry_index(row: usize, col: usize) -> usize {
    row * GRID_COLUMNS + geom_col(col)
}

// ==============================================================================
// Plane Geometry
// ==============================================================================

/// Renderer-ordered vertex buffer for a 9x9-segment plane: row-major, top row
/// first, columns left to right. UVs put the texture's top-left at vertex 0.
#[derive(Debug, Clone)]
pub struct PlaneGeometry {
    positions: [GridPoint; GRID_POINTS],
    uvs: [[f32; 2]; GRID_POINTS],
}

impl PlaneGeometry {
    /// A unit plane centered on the origin, the mesh's rest topology
    pub fn new() -> Self {
        let mut positions = [GridPoint::origin(); GRID_POINTS];
        let mut uvs = [[0.0; 2]; GRID_POINTS];

        for row in 0..GRID_ROWS {
            for col in 0..GRID_COLUMNS {
                let u = col as f32 / (GRID_COLUMNS - 1) as f32;
                let v = 1.0 - row as f32 / (GRID_ROWS - 1) as f32;
                let i = row * GRID_COLUMNS + col;
                positions[i] = GridPoint::new(u - 0.5, v - 0.5, 0.0);
                uvs[i] = [u, v];
            }
        }

        Self { positions, uvs }
    }

    /// Replace every vertex position; the buffer must already be in renderer order
    pub fn set_positions(&mut self, positions: &[GridPoint; GRID_POINTS]) {
        self.positions = *positions;
    }

    pub fn positions(&self) -> &[GridPoint; GRID_POINTS] {
        &self.positions
    }

    pub fn uv(&self, index: usize) -> [f32; 2] {
        self.uvs[index]
    }

    /// Vertex indices of each quad as (top-left, top-right, bottom-left, bottom-right)
    pub fn quads(&self) -> impl Iterator<Item = [usize; 4]> {
        (0..GRID_ROWS - 1).flat_map(|row| {
            (0..GRID_COLUMNS - 1).map(move |col| {
                let top_left = row * GRID_COLUMNS + col;
                let bottom_left = top_left + GRID_COLUMNS;
                [top_left, top_left + 1, bottom_left, bottom_left + 1]
            })
        })
    }
}

impl Default for PlaneGeometry {
    fn default() -> Self {
        Self::new()
    }
}

// ==============================================================================
// Garment Texture
// ==============================================================================

/// A decoded garment image ready for the renderer
#[derive(Debug, Clone)]
pub struct GarmentTexture {
    pub id: Uuid,
    pub image: Arc<RgbaImage>,
    pub degraded: bool, // True when preprocessing failed and the original upload is used
}

impl GarmentTexture {
    pub fn new(image: RgbaImage) -> Self {
        Self {
            id: Uuid::new_v4(),
            image: Arc::new(image),
            degraded: false,
        }
    }

    /// Decode an encoded image in any format the `image` crate recognises
    pub fn from_bytes(bytes: &[u8], degraded: bool) -> image::ImageResult<Self> {
        let image = image::load_from_memory(bytes)?.to_rgba8();
        Ok(Self {
            degraded,
            ..Self::new(image)
        })
    }

    pub fn width(&self) -> u32 {
        self.image.width()
    }

    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
