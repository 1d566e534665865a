use std::{
    collections::HashMap,
    fmt,
    path::{Path, PathBuf},
    sync::Arc,
};

use serde::{Deserialize, Serialize};

use crate::{Result, VisualHiveError};

/// 8-bit RGB colour.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Rgb(pub u8, pub u8, pub u8);

impl Rgb {
    pub const BLACK: Rgb = Rgb(0, 0, 0);
    pub const WHITE: Rgb = Rgb(255, 255, 255);
}

/// Output size in pixels.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Resolution {
    pub width: u32,
    pub height: u32,
}

impl Resolution {
    pub fn new(width: u32, height: u32) -> Self {
        Self { width, height }
    }
}

/// Decoded RGBA image. Pixel data is shared so frames can be handed between
/// threads without copying.
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    width: u32,
    height: u32,
    pixels: Arc<[u8]>,
}

impl Frame {
    /// Wraps an RGBA buffer; errors unless it holds `width * height * 4` bytes.
    pub fn from_rgba(width: u32, height: u32, pixels: Vec<u8>) -> Result<Self> {
        let expected = width as usize * height as usize * 4;
        if pixels.len() != expected {
            return Err(VisualHiveError::msg(format!(
                "frame of {width}x{height} needs {expected} bytes, got {}",
                pixels.len()
            )));
        }
        Ok(Self {
            width,
            height,
            pixels: pixels.into(),
        })
    }

    /// Opaque frame filled with one colour.
    pub fn solid(size: Resolution, color: Rgb) -> Self {
        let Rgb(r, g, b) = color;
        let pixels = [r, g, b, 255].repeat(size.width as usize * size.height as usize);
        Self {
            width: size.width,
            height: size.height,
            pixels: pixels.into(),
        }
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    /// Returns the RGBA bytes, row-major.
    pub fn pixels(&self) -> &[u8] {
        &self.pixels
    }
}

impl fmt::Debug for Frame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Frame")
            .field("width", &self.width)
            .field("height", &self.height)
            .finish()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Layer {
    Background,
    Foreground,
}

/// Where an asset's pixels come from.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "lowercase")]
pub enum AssetSource {
    /// Looping video, backgrounds only.
    Video { path: PathBuf },
    /// Still image with alpha, used as an overlay.
    Image { path: PathBuf },
    /// Flat colour filling the output.
    Solid { color: Rgb },
}

/// Catalog entry for one asset.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AssetDescriptor {
    pub name: String,
    pub layer: Layer,
    pub source: AssetSource,
    #[serde(default)]
    pub key: Option<char>,
    /// Overlay width as a percentage of the output width.
    #[serde(default = "default_scale")]
    pub scale: f64,
    /// Colour the overlay is tinted with while this background is active.
    #[serde(default)]
    pub overlay_color: Option<Rgb>,
}

fn default_scale() -> f64 {
    100.0
}

impl AssetDescriptor {
    pub fn new(name: impl Into<String>, layer: Layer, source: AssetSource) -> Self {
        Self {
            name: name.into(),
            layer,
            source,
            key: None,
            scale: default_scale(),
            overlay_color: None,
        }
    }

    /// Binds the asset to a selection key.
    pub fn with_key(mut self, key: char) -> Self {
        self.key = Some(key);
        self
    }

    pub fn with_overlay_color(mut self, color: Rgb) -> Self {
        self.overlay_color = Some(color);
        self
    }

    /// Overlay tint, white when none is configured.
    pub fn overlay_color(&self) -> Rgb {
        self.overlay_color.unwrap_or(Rgb::WHITE)
    }
}

/// Keyboard input arrives lowercased, so bindings are compared that way.
pub fn normalize_key(key: char) -> char {
    key.to_ascii_lowercase()
}

/// Registry of every asset the operator can switch to.
#[derive(Debug)]
pub struct AssetCatalog {
    assets: Vec<Arc<AssetDescriptor>>,
    by_key: HashMap<char, usize>,
    rng: fastrand::Rng,
}

impl AssetCatalog {
    /// Catalog seeded from system entropy. Fails on duplicate keys.
    pub fn new(descriptors: Vec<AssetDescriptor>) -> Result<Self> {
        Self::with_rng(descriptors, fastrand::Rng::new())
    }

    /// Catalog with a deterministic random pick sequence.
    pub fn with_seed(descriptors: Vec<AssetDescriptor>, seed: u64) -> Result<Self> {
        Self::with_rng(descriptors, fastrand::Rng::with_seed(seed))
    }

    fn with_rng(descriptors: Vec<AssetDescriptor>, rng: fastrand::Rng) -> Result<Self> {
        let mut by_key = HashMap::new();
        for (index, asset) in descriptors.iter().enumerate() {
            let Some(key) = asset.key.map(normalize_key) else { continue };
            if let Some(&first) = by_key.get(&key) {
                let first: &AssetDescriptor = &descriptors[first];
                return Err(VisualHiveError::DuplicateKey {
                    key,
                    first: first.name.clone(),
                    second: asset.name.clone(),
                });
            }
            by_key.insert(key, index);
        }

        Ok(Self {
            assets: descriptors.into_iter().map(Arc::new).collect(),
            by_key,
            rng,
        })
    }

    /// Returns the number of assets in the catalog.
    pub fn len(&self) -> usize {
        self.assets.len()
    }

    pub fn is_empty(&self) -> bool {
        self.assets.is_empty()
    }

    /// Asset bound to `key`, ignoring ASCII case.
    pub fn asset_by_key(&self, key: char) -> Option<Arc<AssetDescriptor>> {
        self.by_key.get(&normalize_key(key)).map(|&index| Arc::clone(&self.assets[index]))
    }

    /// Assets on `layer`, in catalog order.
    pub fn layer(&self, layer: Layer) -> impl Iterator<Item = &Arc<AssetDescriptor>> {
        self.assets.iter().filter(move |asset| asset.layer == layer)
    }

    /// First background in catalog order.
    pub fn default_background(&self) -> Option<Arc<AssetDescriptor>> {
        self.layer(Layer::Background).next().cloned()
    }

    /// First foreground in catalog order.
    pub fn default_foreground(&self) -> Option<Arc<AssetDescriptor>> {
        self.layer(Layer::Foreground).next().cloned()
    }

    /// Random background other than `current`, when another exists.
    pub fn random_background(&mut self, current: Option<&AssetDescriptor>) -> Option<Arc<AssetDescriptor>> {
        self.random_pick(Layer::Background, current)
    }

    pub fn random_foreground(&mut self, current: Option<&AssetDescriptor>) -> Option<Arc<AssetDescriptor>> {
        self.random_pick(Layer::Foreground, current)
    }

    /// Uniform pick within `layer`, avoiding `current` whenever there is an
    /// alternative.
    pub fn random_pick(
        &mut self,
        layer: Layer,
        current: Option<&AssetDescriptor>,
    ) -> Option<Arc<AssetDescriptor>> {
        let pool: Vec<Arc<AssetDescriptor>> = self.layer(layer).cloned().collect();
        let candidates: Vec<Arc<AssetDescriptor>> = match current {
            Some(current) if pool.len() > 1 => pool
                .into_iter()
                .filter(|asset| asset.name != current.name)
                .collect(),
            _ => pool,
        };
        if candidates.is_empty() {
            return None;
        }
        let index = self.rng.usize(..candidates.len());
        candidates.into_iter().nth(index)
    }
}

/// A looping video decoder. Decoding itself lives outside the engine.
pub trait VideoStream: Send {
    /// Next frame, or `None` once the end of the stream is reached.
    fn read_frame(&mut self) -> Result<Option<Frame>>;

    fn rewind(&mut self) -> Result<()>;

    /// Native frame rate, if the container reports one.
    fn fps(&self) -> Option<f64>;

    fn close(&mut self) {}
}

/// Opens the media behind asset descriptors.
pub trait MediaBackend: Send + Sync {
    fn open_video(&self, path: &Path) -> Result<Box<dyn VideoStream>>;

    fn load_image(&self, path: &Path) -> Result<Frame>;
}

/// An asset with its playback resources open.
pub enum ActiveAsset {
    VideoLoop {
        descriptor: Arc<AssetDescriptor>,
        stream: Box<dyn VideoStream>,
    },
    Still {
        descriptor: Arc<AssetDescriptor>,
        image: Frame,
    },
    SolidColor {
        descriptor: Arc<AssetDescriptor>,
        frame: Frame,
    },
}

impl ActiveAsset {
    /// Opens the asset through `backend` at `resolution`.
    pub fn open(
        descriptor: Arc<AssetDescriptor>,
        backend: &dyn MediaBackend,
        resolution: Resolution,
    ) -> Result<Self> {
        let opened = match &descriptor.source {
            AssetSource::Video { path } => backend.open_video(path).map(|stream| Self::VideoLoop {
                descriptor: Arc::clone(&descriptor),
                stream,
            }),
            AssetSource::Image { path } => backend.load_image(path).map(|image| Self::Still {
                descriptor: Arc::clone(&descriptor),
                image,
            }),
            AssetSource::Solid { color } => Ok(Self::SolidColor {
                descriptor: Arc::clone(&descriptor),
                frame: Frame::solid(resolution, *color),
            }),
        };
        opened.map_err(|err| VisualHiveError::AssetOpen {
            asset: descriptor.name.clone(),
            reason: err.to_string(),
        })
    }

    pub fn descriptor(&self) -> &Arc<AssetDescriptor> {
        match self {
            Self::VideoLoop { descriptor, .. }
            | Self::Still { descriptor, .. }
            | Self::SolidColor { descriptor, .. } => descriptor,
        }
    }

    pub fn name(&self) -> &str {
        &self.descriptor().name
    }

    /// Native frame rate for videos, `None` for stills.
    pub fn fps(&self) -> Option<f64> {
        match self {
            Self::VideoLoop { stream, .. } => stream.fps().filter(|fps| *fps > 0.0),
            Self::Still { .. } | Self::SolidColor { .. } => None,
        }
    }

    /// Next frame to show; videos loop back to the start at the end.
    pub fn next_frame(&mut self) -> Result<Frame> {
        match self {
            Self::VideoLoop { descriptor, stream } => {
                if let Some(frame) = stream.read_frame()? {
                    return Ok(frame);
                }
                stream.rewind()?;
                stream.read_frame()?.ok_or_else(|| {
                    VisualHiveError::msg(format!("could not loop video `{}`", descriptor.name))
                })
            }
            Self::Still { image, .. } => Ok(image.clone()),
            Self::SolidColor { frame, .. } => Ok(frame.clone()),
        }
    }

    /// Releases playback resources.
    pub fn close(self) {
        if let Self::VideoLoop { mut stream, .. } = self {
            stream.close();
        }
    }
}

impl fmt::Debug for ActiveAsset {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let kind = match self {
            Self::VideoLoop { .. } => "VideoLoop",
            Self::Still { .. } => "Still",
            Self::SolidColor { .. } => "SolidColor",
        };
        f.debug_struct(kind).field("asset", &self.name()).finish()
    }
}
