// Headless garment mesh rasterizer
// Draws the textured 9x9-quad plane onto a transparent canvas the size of the video

use super::Renderer;
use crate::models::garment::{GarmentTexture, GridPoint, PlaneGeometry, GRID_POINTS};
use image::{Rgba, RgbaImage};
use tracing::debug;

type ScreenPoint = (f32, f32);

pub struct MeshRenderer {
    width: u32,
    height: u32,
    visible_height: f32,
    visible_width: f32,
    geometry: PlaneGeometry,
    canvas: RgbaImage,
    visible: bool,
}

impl MeshRenderer {
    /// `visible_height` is the world height spanned by the canvas; the width
    /// follows from the canvas aspect ratio
    pub fn new(width: u32, height: u32, visible_height: f32) -> Self {
        let aspect = if height == 0 {
            1.0
        } else {
            width as f32 / height as f32
        };
        Self {
            width,
            height,
            visible_height,
            visible_width: visible_height * aspect,
            geometry: PlaneGeometry::new(),
            canvas: RgbaImage::new(width, height),
            visible: false,
        }
    }

    /// World to canvas pixels. Depth is dropped; the plane is drawn flat.
    pub fn project(&self, point: &GridPoint) -> ScreenPoint {
        let sx = (point.x / self.visible_width + 0.5) * self.width as f32;
        let sy = (0.5 - point.y / self.visible_height) * self.height as f32;
        (sx, sy)
    }

    fn clear(&mut self) {
        for pixel in self.canvas.pixels_mut() {
            *pixel = Rgba([0, 0, 0, 0]);
        }
    }

    /// Fill one triangle with barycentric UV interpolation and nearest texel
    /// sampling. Later triangles overwrite earlier ones where they overlap.
    fn rasterize_triangle(&mut self, screen: [ScreenPoint; 3], uv: [[f32; 2]; 3], texture: &RgbaImage) {
        let area = edge(screen[0], screen[1], screen[2]);
        if area.abs() < f32::EPSILON || !area.is_finite() {
            return;
        }

        let min_x = screen.iter().map(|p| p.0).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let min_y = screen.iter().map(|p| p.1).fold(f32::INFINITY, f32::min).floor().max(0.0);
        let max_x = screen
            .iter()
            .map(|p| p.0)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(self.width as f32 - 1.0);
        let max_y = screen
            .iter()
            .map(|p| p.1)
            .fold(f32::NEG_INFINITY, f32::max)
            .ceil()
            .min(self.height as f32 - 1.0);
        if min_x > max_x || min_y > max_y {
            return;
        }

        let (tw, th) = (texture.width(), texture.height());
        if tw == 0 || th == 0 {
            return;
        }

        for y in (min_y as u32)..=(max_y as u32) {
            for x in (min_x as u32)..=(max_x as u32) {
                let p = (x as f32 + 0.5, y as f32 + 0.5);
                let w0 = edge(screen[1], screen[2], p) / area;
                let w1 = edge(screen[2], screen[0], p) / area;
                let w2 = edge(screen[0], screen[1], p) / area;
                if w0 < 0.0 || w1 < 0.0 || w2 < 0.0 {
                    continue;
                }

                let u = (w0 * uv[0][0] + w1 * uv[1][0] + w2 * uv[2][0]).clamp(0.0, 1.0);
                let v = (w0 * uv[0][1] + w1 * uv[1][1] + w2 * uv[2][1]).clamp(0.0, 1.0);
                let tx = (u * (tw - 1) as f32).round() as u32;
                let ty = ((1.0 - v) * (th - 1) as f32).round() as u32;

                let texel = *texture.get_pixel(tx, ty);
                if texel.0[3] > 0 {
                    self.canvas.put_pixel(x, y, texel);
                }
            }
        }
    }
}

fn edge(a: ScreenPoint, b: ScreenPoint, p: ScreenPoint) -> f32 {
    (b.0 - a.0) * (p.1 - a.1) - (b.1 - a.1) * (p.0 - a.0)
}

impl Renderer for MeshRenderer {
    fn draw(&mut self, positions: &[GridPoint; GRID_POINTS], texture: &GarmentTexture) {
        self.geometry.set_positions(positions);
        self.clear();

        let quads: Vec<[usize; 4]> = self.geometry.quads().collect();
        for [tl, tr, bl, br] in quads {
            let screen = |i: usize| self.project(&self.geometry.positions()[i]);
            let (s_tl, s_tr, s_bl, s_br) = (screen(tl), screen(tr), screen(bl), screen(br));
            let uv = |i: usize| self.geometry.uv(i);
            let (u_tl, u_tr, u_bl, u_br) = (uv(tl), uv(tr), uv(bl), uv(br));

            self.rasterize_triangle([s_tl, s_bl, s_tr], [u_tl, u_bl, u_tr], &texture.image);
            self.rasterize_triangle([s_tr, s_bl, s_br], [u_tr, u_bl, u_br], &texture.image);
        }

        if !self.visible {
            debug!("Mesh renderer drawing garment {}", texture.id);
        }
        self.visible = true;
    }

    fn hide(&mut self) {
        if self.visible {
            self.clear();
            self.visible = false;
        }
    }

    fn is_visible(&self) -> bool {
        self.visible
    }

    fn surface(&self) -> Option<RgbaImage> {
        Some(self.canvas.clone())
    }
}
