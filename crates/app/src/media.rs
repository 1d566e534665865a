//! Built-in media backend. Video and image decoding are outside the engine,
//! so assets are rendered procedurally: videos become animated colour fields
//! and images become a placeholder glyph on a transparent canvas.

use std::path::{Path, PathBuf};

use visual_hive_core::{
    AssetDescriptor, AssetSource, Frame, Layer, MediaBackend, Resolution, Result, Rgb, VideoStream,
};

const VIDEO_FPS: f64 = 30.0;
const FRAMES_PER_LOOP: u32 = 240;

#[derive(Debug, Clone)]
pub struct ProceduralBackend {
    resolution: Resolution,
}

impl ProceduralBackend {
    pub fn new(resolution: Resolution) -> Self {
        Self { resolution }
    }
}

impl MediaBackend for ProceduralBackend {
    fn open_video(&self, path: &Path) -> Result<Box<dyn VideoStream>> {
        tracing::debug!(path = %path.display(), "procedural video");
        Ok(Box::new(ColourField {
            resolution: self.resolution,
            base_hue: path_hue(path),
            frame: 0,
        }))
    }

    fn load_image(&self, path: &Path) -> Result<Frame> {
        let size = self.resolution.width.min(self.resolution.height).max(2);
        glyph(size, path_hue(path))
    }
}

struct ColourField {
    resolution: Resolution,
    base_hue: f32,
    frame: u32,
}

impl VideoStream for ColourField {
    fn read_frame(&mut self) -> Result<Option<Frame>> {
        if self.frame >= FRAMES_PER_LOOP {
            return Ok(None);
        }
        let t = self.frame as f32 / FRAMES_PER_LOOP as f32;
        self.frame += 1;

        let Resolution { width, height } = self.resolution;
        let mut pixels = Vec::with_capacity(width as usize * height as usize * 4);
        for y in 0..height {
            for x in 0..width {
                let u = x as f32 / width.max(1) as f32;
                let v = y as f32 / height.max(1) as f32;
                let Rgb(r, g, b) = hue_to_rgb(self.base_hue + 0.25 * (u + v) + t);
                pixels.extend_from_slice(&[r, g, b, 255]);
            }
        }
        Frame::from_rgba(width, height, pixels).map(Some)
    }

    fn rewind(&mut self) -> Result<()> {
        self.frame = 0;
        Ok(())
    }

    fn fps(&self) -> Option<f64> {
        Some(VIDEO_FPS)
    }
}

/// Filled diamond on a transparent square.
fn glyph(size: u32, hue: f32) -> Result<Frame> {
    let Rgb(r, g, b) = hue_to_rgb(hue);
    let centre = size as f32 / 2.0;
    let mut pixels = Vec::with_capacity(size as usize * size as usize * 4);
    for y in 0..size {
        for x in 0..size {
            let distance = (x as f32 + 0.5 - centre).abs() + (y as f32 + 0.5 - centre).abs();
            let alpha = if distance < centre * 0.8 { 255 } else { 0 };
            pixels.extend_from_slice(&[r, g, b, alpha]);
        }
    }
    Frame::from_rgba(size, size, pixels)
}

fn path_hue(path: &Path) -> f32 {
    let hash = path
        .to_string_lossy()
        .bytes()
        .fold(2_166_136_261u32, |hash, byte| (hash ^ byte as u32).wrapping_mul(16_777_619));
    (hash % 360) as f32 / 360.0
}

fn hue_to_rgb(hue: f32) -> Rgb {
    let h = hue.rem_euclid(1.0) * 6.0;
    let x = 1.0 - (h % 2.0 - 1.0).abs();
    let (r, g, b) = match h as u32 {
        0 => (1.0, x, 0.0),
        1 => (x, 1.0, 0.0),
        2 => (0.0, 1.0, x),
        3 => (0.0, x, 1.0),
        4 => (x, 0.0, 1.0),
        _ => (1.0, 0.0, x),
    };
    let channel = |value: f32| (value * 255.0).round() as u8;
    Rgb(channel(r), channel(g), channel(b))
}

/// Assets used when the configuration lists none.
pub fn demo_assets() -> Vec<AssetDescriptor> {
    let video = |name: &str| AssetSource::Video {
        path: PathBuf::from(format!("procedural/{name}")),
    };
    let image = |name: &str| AssetSource::Image {
        path: PathBuf::from(format!("procedural/{name}")),
    };
    vec![
        AssetDescriptor::new("plasma", Layer::Background, video("plasma")).with_key('1'),
        AssetDescriptor::new("aurora", Layer::Background, video("aurora"))
            .with_key('2')
            .with_overlay_color(Rgb(255, 64, 160)),
        AssetDescriptor::new(
            "blackout",
            Layer::Background,
            AssetSource::Solid { color: Rgb::BLACK },
        )
        .with_key('3'),
        AssetDescriptor::new("diamond", Layer::Foreground, image("diamond")).with_key('a'),
        AssetDescriptor::new("emblem", Layer::Foreground, image("emblem")).with_key('d'),
    ]
}
