use glam::DVec2;
use image::{imageops, Rgba, RgbaImage};

pub const SPRITE_SIZE: u32 = 32;

/// Capability implemented by every host entity that scripts may reposition.
pub trait Movable {
    fn move_to(&mut self, x: f64, y: f64);
    fn position(&self) -> DVec2;
}

/// Per-draw placement, rebuilt from scratch every time the sprite is drawn.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct DrawParams {
    pub translation: DVec2,
}

impl DrawParams {
    pub fn reset(&mut self) {
        self.translation = DVec2::ZERO;
    }

    pub fn translate(&mut self, offset: DVec2) {
        self.translation += offset;
    }
}

#[derive(Debug, Clone)]
pub struct Sprite {
    pub position: DVec2,
    pub image: RgbaImage,
    pub draw_params: DrawParams,
}

pub type SpriteSet = Vec<Sprite>;

impl Sprite {
    pub fn new() -> Self {
        Self::with_color(Rgba([255, 255, 255, 255]))
    }

    pub fn with_color(color: Rgba<u8>) -> Self {
        Self {
            position: DVec2::ZERO,
            image: RgbaImage::from_pixel(SPRITE_SIZE, SPRITE_SIZE, color),
            draw_params: DrawParams::default(),
        }
    }

    pub fn at(mut self, x: f64, y: f64) -> Self {
        self.position = DVec2::new(x, y);
        self
    }

    /// Draws the sprite centred on its position, clipping at the surface edges.
    pub fn draw(&mut self, screen: &mut RgbaImage) {
        let half = DVec2::new(self.image.width() as f64, self.image.height() as f64) * 0.5;
        self.draw_params.reset();
        self.draw_params.translate(-half);
        self.draw_params.translate(self.position);
        let origin = self.draw_params.translation.round();
        imageops::overlay(screen, &self.image, origin.x as i64, origin.y as i64);
    }
}

impl Default for Sprite {
    fn default() -> Self {
        Self::new()
    }
}

impl Movable for Sprite {
    fn move_to(&mut self, x: f64, y: f64) {
        self.position = DVec2::new(x, y);
    }

    fn position(&self) -> DVec2 {
        self.position
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn draw_centres_sprite_on_position() {
        let mut screen = RgbaImage::new(64, 64);
        let mut sprite = Sprite::new().at(32.0, 32.0);
        sprite.draw(&mut screen);
        assert_eq!(sprite.draw_params.translation, DVec2::new(16.0, 16.0));
        assert_eq!(screen.get_pixel(16, 16).0, [255, 255, 255, 255]);
        assert_eq!(screen.get_pixel(47, 47).0, [255, 255, 255, 255]);
        assert_eq!(screen.get_pixel(15, 15).0, [0, 0, 0, 0]);
        assert_eq!(screen.get_pixel(48, 48).0, [0, 0, 0, 0]);
    }

    #[test]
    fn draw_clips_at_surface_origin() {
        let mut screen = RgbaImage::new(32, 32);
        let mut sprite = Sprite::new();
        sprite.draw(&mut screen);
        assert_eq!(screen.get_pixel(0, 0).0, [255, 255, 255, 255]);
        assert_eq!(screen.get_pixel(15, 15).0, [255, 255, 255, 255]);
        assert_eq!(screen.get_pixel(16, 16).0, [0, 0, 0, 0]);
    }
}
