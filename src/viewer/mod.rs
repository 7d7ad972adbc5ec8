//! Raster rendering of game states: single frames to PNG, episodes to GIF.
//!
//! ```
//! use env_2048::env::{Game2048, Key};
//! use env_2048::viewer::{Viewer, ViewerConfig};
//!
//! let (state, _) = Game2048::new().reset(Key::new(0));
//! let viewer = Viewer::new(ViewerConfig { cell_px: 40, ..Default::default() });
//! let img = viewer.render(&state);
//! assert_eq!(img.dimensions(), viewer.dimensions());
//! ```

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::Path;

use image::codecs::gif::{GifEncoder, Repeat};
use image::{Delay, DynamicImage, Frame, ImageFormat, Rgb, RgbImage};

use crate::engine::Board;
use crate::env::State;

mod font;

use font::{draw_text_centered, fill_rect, text_width, GLYPH_H};

#[derive(thiserror::Error, Debug)]
pub enum RenderError {
    #[error("io error: {0}")]
    Io(#[from] io::Error),
    #[error("image error: {0}")]
    Image(#[from] image::ImageError),
    #[error("nothing to animate")]
    NoFrames,
}

const fn rgb(hex: u32) -> Rgb<u8> {
    Rgb([(hex >> 16) as u8, (hex >> 8) as u8, hex as u8])
}

pub const LIGHT_TEXT: Rgb<u8> = rgb(0xf9f6f2);
pub const DARK_TEXT: Rgb<u8> = rgb(0x766d64);
pub const EDGE: Rgb<u8> = rgb(0xbbada0);
pub const BACKGROUND: Rgb<u8> = rgb(0xfaf8ef);
pub const OTHER: Rgb<u8> = rgb(0xf8251d);

/// Fill colour for a tile value (0 for an empty cell).
pub fn tile_color(value: u32) -> Rgb<u8> {
    match value {
        0 => rgb(0xccc0b3),
        2 => rgb(0xeee4da),
        4 => rgb(0xede0c8),
        8 | 16 => rgb(0xf59563),
        32 => rgb(0xf67c5f),
        64 => rgb(0xf65e3b),
        128 => rgb(0xedcf72),
        256 => rgb(0xedcc61),
        512 => rgb(0xedc651),
        1024 => rgb(0xeec744),
        2048 => rgb(0xecc22e),
        4096 | 8192 => rgb(0xb784ab),
        16384 => rgb(0xaa60a6),
        _ => OTHER,
    }
}

/// Text colour and nominal point size for a tile value.
pub fn text_style(value: u32) -> (Rgb<u8>, u32) {
    match value {
        2 | 4 => (DARK_TEXT, 30),
        v if v < 1024 => (LIGHT_TEXT, 30),
        v if v < 16384 => (LIGHT_TEXT, 25),
        _ => (LIGHT_TEXT, 20),
    }
}

#[derive(Debug, Clone)]
pub struct ViewerConfig {
    /// Identifies the viewer in log lines; the rendered title is always `2048`.
    pub name: String,
    /// Side of one tile in pixels.
    pub cell_px: u32,
    /// Width of the grid lines between tiles.
    pub gap_px: u32,
    /// Blank border around the figure.
    pub margin_px: u32,
    /// Height of the title strip above the board.
    pub title_px: u32,
}

impl Default for ViewerConfig {
    fn default() -> Self {
        Self { name: "2048".to_string(), cell_px: 100, gap_px: 7, margin_px: 24, title_px: 56 }
    }
}

pub struct Viewer {
    config: ViewerConfig,
}

impl Viewer {
    pub fn new(config: ViewerConfig) -> Self { Self { config } }

    #[inline]
    pub fn config(&self) -> &ViewerConfig { &self.config }

    fn board_px(&self) -> u32 { 4 * self.config.cell_px + 5 * self.config.gap_px }

    /// Width and height of every rendered frame.
    pub fn dimensions(&self) -> (u32, u32) {
        let c = &self.config;
        let side = self.board_px() + 2 * c.margin_px;
        (side, side + c.title_px)
    }

    pub fn render(&self, state: &State) -> RgbImage { self.render_board(state.board, state.score) }

    /// Draw the title and the board.
    pub fn render_board(&self, board: Board, score: u64) -> RgbImage {
        let c = &self.config;
        let (w, h) = self.dimensions();
        let mut img = RgbImage::from_pixel(w, h, BACKGROUND);

        let title = format!("2048    Score: {score}");
        let mut title_scale = (c.title_px / (2 * GLYPH_H)).max(1);
        while title_scale > 1 && text_width(&title, title_scale) > w - 2 * c.margin_px {
            title_scale -= 1;
        }
        draw_text_centered(&mut img, &title, (w / 2) as i64, (c.margin_px + c.title_px / 2) as i64, title_scale, DARK_TEXT);

        let top = (c.margin_px + c.title_px) as i64;
        let left = c.margin_px as i64;
        let side = self.board_px();
        fill_rect(&mut img, left, top, side, side, EDGE);
        for row in 0..4 {
            for col in 0..4 {
                let x = left + (c.gap_px + col as u32 * (c.cell_px + c.gap_px)) as i64;
                let y = top + (c.gap_px + row as u32 * (c.cell_px + c.gap_px)) as i64;
                self.draw_tile(&mut img, board.tile_value(row * 4 + col), x, y);
            }
        }
        img
    }

    fn draw_tile(&self, img: &mut RgbImage, value: u32, x: i64, y: i64) {
        let cell = self.config.cell_px;
        fill_rect(img, x, y, cell, cell, tile_color(value));
        if value == 0 {
            return;
        }
        let text = value.to_string();
        let (color, size) = text_style(value);
        let mut scale = (cell * size / 500).max(1);
        while scale > 1 && text_width(&text, scale) > cell * 4 / 5 {
            scale -= 1;
        }
        let half = (cell / 2) as i64;
        draw_text_centered(img, &text, x + half, y + half, scale, color);
    }

    pub fn save_png<P: AsRef<Path>>(&self, state: &State, path: P) -> Result<(), RenderError> {
        self.render(state).save_with_format(path.as_ref(), ImageFormat::Png)?;
        log::info!("{}: saved frame to {}", self.config.name, path.as_ref().display());
        Ok(())
    }

    /// Write an endlessly looping GIF with one frame per state.
    pub fn animate<P: AsRef<Path>>(&self, states: &[State], interval_ms: u32, path: P) -> Result<usize, RenderError> {
        let frames: Vec<(Board, u64)> = states.iter().map(|s| (s.board, s.score)).collect();
        self.animate_frames(&frames, interval_ms, path)
    }

    /// Like [`Viewer::animate`] from `(board, score)` pairs. Returns the number of frames written.
    pub fn animate_frames<P: AsRef<Path>>(&self, frames: &[(Board, u64)], interval_ms: u32, path: P) -> Result<usize, RenderError> {
        if frames.is_empty() {
            return Err(RenderError::NoFrames);
        }
        let file = BufWriter::new(File::create(path.as_ref())?);
        let mut encoder = GifEncoder::new_with_speed(file, 10);
        encoder.set_repeat(Repeat::Infinite)?;
        let delay = Delay::from_numer_denom_ms(interval_ms, 1);
        for &(board, score) in frames {
            let rgba = DynamicImage::ImageRgb8(self.render_board(board, score)).to_rgba8();
            encoder.encode_frame(Frame::from_parts(rgba, 0, 0, delay))?;
        }
        log::info!("{}: saved {} frame animation to {}", self.config.name, frames.len(), path.as_ref().display());
        Ok(frames.len())
    }
}

impl Default for Viewer {
    fn default() -> Self { Self::new(ViewerConfig::default()) }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::env::{Game2048, Key};
    use tempfile::tempdir;

    fn small() -> Viewer {
        Viewer::new(ViewerConfig { cell_px: 20, gap_px: 2, margin_px: 4, title_px: 14, ..Default::default() })
    }

    #[test]
    fn colours_follow_table() {
        assert_eq!(tile_color(0), rgb(0xccc0b3));
        assert_eq!(tile_color(2048), rgb(0xecc22e));
        assert_eq!(tile_color(8), tile_color(16));
        assert_eq!(tile_color(32768), OTHER);
    }

    #[test]
    fn text_tiers() {
        assert_eq!(text_style(2), (DARK_TEXT, 30));
        assert_eq!(text_style(512), (LIGHT_TEXT, 30));
        assert_eq!(text_style(1024), (LIGHT_TEXT, 25));
        assert_eq!(text_style(16384), (LIGHT_TEXT, 20));
    }

    #[test]
    fn tiles_are_painted_in_place() {
        let v = small();
        let board = Board::from_exponents([[11, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let img = v.render_board(board, 0);
        let c = v.config();
        // Top-left corner pixel of each tile carries its fill colour.
        let x0 = c.margin_px + c.gap_px;
        let y0 = c.margin_px + c.title_px + c.gap_px;
        assert_eq!(*img.get_pixel(x0, y0), tile_color(2048));
        assert_eq!(*img.get_pixel(x0 + c.cell_px + c.gap_px, y0), tile_color(0));
        assert_eq!(*img.get_pixel(c.margin_px, y0), EDGE);
        assert_eq!(*img.get_pixel(0, 0), BACKGROUND);
        // The label is drawn on top of the 2048 tile.
        let centre = (x0 + c.cell_px / 2, y0 + c.cell_px / 2);
        let label = (x0..x0 + c.cell_px).flat_map(|x| (y0..y0 + c.cell_px).map(move |y| (x, y)));
        assert!(label.into_iter().any(|(x, y)| *img.get_pixel(x, y) == LIGHT_TEXT), "no text near {centre:?}");
    }

    #[test]
    fn title_ignores_viewer_name() {
        let board = Board::from_exponents([[1, 0, 0, 0], [0; 4], [0; 4], [0; 4]]);
        let named = Viewer::new(ViewerConfig { name: "lane-7".to_string(), ..small().config().clone() });
        assert_eq!(named.render_board(board, 12), small().render_board(board, 12));
    }

    #[test]
    fn writes_png_and_gif() {
        let dir = tempdir().unwrap();
        let env = Game2048::new();
        let (s0, _) = env.reset(Key::new(1));
        let a = s0.action_mask.legal_moves().next().unwrap();
        let (s1, _) = env.step(&s0, a);
        let v = small();

        let png = dir.path().join("board.png");
        v.save_png(&s1, &png).unwrap();
        let decoded = image::open(&png).unwrap();
        assert_eq!((decoded.width(), decoded.height()), v.dimensions());

        let gif = dir.path().join("episode.gif");
        assert_eq!(v.animate(&[s0, s1], 50, &gif).unwrap(), 2);
        assert!(std::fs::metadata(&gif).unwrap().len() > 0);

        assert!(matches!(v.animate(&[], 50, dir.path().join("empty.gif")), Err(RenderError::NoFrames)));
    }
}
