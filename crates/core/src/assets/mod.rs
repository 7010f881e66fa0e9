//! Decoding of user-supplied files into [`ContentDescriptor`]s, and the media
//! element types the image and video backends play back.

use std::io::Cursor;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use image::codecs::gif::GifDecoder;
use image::{AnimationDecoder, ImageFormat};
use serde::Deserialize;

use crate::{
    parse_preset_text, CompositorError, ContentDescriptor, ContentKind, ContentPayload,
    MilkTextConverter, Preset, PresetConverter, RasterImage, Result, VideoConfig,
};

/// GIF frames with a zero delay play at this rate, as browsers do.
const DEFAULT_FRAME_DELAY: f32 = 0.1;

#[derive(Debug, Clone)]
pub struct ImageFrame {
    pub image: RasterImage,
    pub delay_seconds: f32,
}

/// Still or animated image. A still image is a single frame.
#[derive(Debug, Clone)]
pub struct AnimatedImage {
    frames: Arc<Vec<ImageFrame>>,
    duration: f32,
}

impl AnimatedImage {
    pub fn new(frames: Vec<ImageFrame>) -> Result<Self> {
        if frames.is_empty() {
            return Err(CompositorError::decode("image has no frames"));
        }
        let duration = frames.iter().map(|f| f.delay_seconds).sum();
        Ok(Self {
            frames: Arc::new(frames),
            duration,
        })
    }

    pub fn still(image: RasterImage) -> Self {
        Self {
            frames: Arc::new(vec![ImageFrame {
                image,
                delay_seconds: 0.0,
            }]),
            duration: 0.0,
        }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    /// Frame visible `elapsed` seconds into a looped playback.
    pub fn frame_at(&self, elapsed: f64) -> &RasterImage {
        if self.frames.len() == 1 || self.duration <= 0.0 {
            return &self.frames[0].image;
        }
        let mut t = (elapsed.max(0.0) % f64::from(self.duration)) as f32;
        for frame in self.frames.iter() {
            if t < frame.delay_seconds {
                return &frame.image;
            }
            t -= frame.delay_seconds;
        }
        &self.frames[self.frames.len() - 1].image
    }
}

/// Decoded video frames played back in a loop at a fixed rate.
#[derive(Debug, Clone)]
pub struct VideoClip {
    frames: Arc<Vec<RasterImage>>,
    fps: f32,
}

impl VideoClip {
    pub fn new(frames: Vec<RasterImage>, fps: f32) -> Result<Self> {
        if frames.is_empty() {
            return Err(CompositorError::decode("video has no frames"));
        }
        if !(fps.is_finite() && fps > 0.0) {
            return Err(CompositorError::decode(format!("invalid frame rate {fps}")));
        }
        Ok(Self {
            frames: Arc::new(frames),
            fps,
        })
    }

    pub fn fps(&self) -> f32 {
        self.fps
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }

    pub fn frame_at(&self, elapsed: f64) -> &RasterImage {
        let index = (elapsed.max(0.0) * f64::from(self.fps)) as usize % self.frames.len();
        &self.frames[index]
    }
}

/// A user-supplied file, possibly without a backing path.
#[derive(Debug, Clone)]
pub struct MediaFile {
    pub name: String,
    pub bytes: Vec<u8>,
    pub path: Option<PathBuf>,
}

impl MediaFile {
    pub fn from_bytes(name: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            name: name.into(),
            bytes,
            path: None,
        }
    }

    pub fn from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .ok_or_else(|| CompositorError::invalid(format!("{} is not a file", path.display())))?;
        Ok(Self {
            name,
            bytes: std::fs::read(path)?,
            path: Some(path.to_path_buf()),
        })
    }

    pub fn kind(&self) -> Result<ContentKind> {
        ContentKind::from_file_name(&self.name)
    }

    fn text(&self) -> Result<&str> {
        std::str::from_utf8(&self.bytes)
            .map_err(|err| CompositorError::decode(format!("{} is not UTF-8: {err}", self.name)))
    }

    fn stem(&self) -> &str {
        self.name.rsplit_once('.').map_or(self.name.as_str(), |(stem, _)| stem)
    }
}

/// Turns a file of a detected kind into decoded content. Runs off the render
/// thread.
pub trait ContentLoader: Send + Sync {
    fn load(&self, file: &MediaFile, kind: ContentKind) -> Result<ContentDescriptor>;
}

/// Default loader: `image` for stills and GIFs, `ffmpeg` for video, UTF-8 text
/// for shaders and presets.
pub struct FileLoader {
    video: VideoConfig,
    converter: Arc<dyn PresetConverter>,
}

impl FileLoader {
    pub fn new(video: VideoConfig) -> Self {
        Self::with_converter(video, Arc::new(MilkTextConverter))
    }

    pub fn with_converter(video: VideoConfig, converter: Arc<dyn PresetConverter>) -> Self {
        Self { video, converter }
    }
}

impl ContentLoader for FileLoader {
    fn load(&self, file: &MediaFile, kind: ContentKind) -> Result<ContentDescriptor> {
        let payload = match kind {
            ContentKind::StaticImage => ContentPayload::Image(decode_image(&file.bytes)?),
            ContentKind::Video => {
                let path = file.path.as_deref().ok_or_else(|| {
                    CompositorError::decode("video decoding needs a file on disk")
                })?;
                ContentPayload::Video(decode_video(path, &self.video)?)
            }
            ContentKind::ShaderProgram => ContentPayload::ShaderSource(file.text()?.to_string()),
            ContentKind::GenerativeAudioReactive => {
                let payload = parse_preset_text(file.text()?, self.converter.as_ref())?;
                ContentPayload::Preset(Preset::new(file.stem(), payload))
            }
        };
        Ok(ContentDescriptor::new(file.name.clone(), payload))
    }
}

impl std::fmt::Debug for FileLoader {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileLoader").field("video", &self.video).finish()
    }
}

pub fn decode_image(bytes: &[u8]) -> Result<AnimatedImage> {
    let format = image::guess_format(bytes)?;
    if format != ImageFormat::Gif {
        let rgba = image::load_from_memory_with_format(bytes, format)?.to_rgba8();
        let (w, h) = rgba.dimensions();
        return Ok(AnimatedImage::still(RasterImage::from_rgba(w, h, rgba.into_raw())?));
    }

    let decoder = GifDecoder::new(Cursor::new(bytes))?;
    let frames = decoder
        .into_frames()
        .collect_frames()?
        .into_iter()
        .map(|frame| {
            let (numer, denom) = frame.delay().numer_denom_ms();
            let delay = numer as f32 / denom.max(1) as f32 / 1000.0;
            let buffer = frame.into_buffer();
            let (w, h) = buffer.dimensions();
            Ok(ImageFrame {
                image: RasterImage::from_rgba(w, h, buffer.into_raw())?,
                delay_seconds: if delay <= 0.01 { DEFAULT_FRAME_DELAY } else { delay },
            })
        })
        .collect::<Result<Vec<_>>>()?;
    AnimatedImage::new(frames)
}

#[derive(Debug, Deserialize)]
struct ProbeOutput {
    #[serde(default)]
    streams: Vec<ProbeStream>,
}

#[derive(Debug, Deserialize)]
struct ProbeStream {
    width: u32,
    height: u32,
    #[serde(default)]
    avg_frame_rate: Option<String>,
}

/// Decodes up to `max_frames` frames scaled down to at most `max_width`.
pub fn decode_video(path: &Path, bounds: &VideoConfig) -> Result<VideoClip> {
    let probe = std::process::Command::new("ffprobe")
        .args(["-v", "error", "-select_streams", "v:0"])
        .args(["-show_entries", "stream=width,height,avg_frame_rate", "-of", "json"])
        .arg(path)
        .output()
        .map_err(|err| CompositorError::decode(format!("failed to run ffprobe: {err}")))?;
    if !probe.status.success() {
        return Err(CompositorError::decode(format!(
            "ffprobe failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&probe.stderr).trim()
        )));
    }
    let info: ProbeOutput = serde_json::from_slice(&probe.stdout)?;
    let stream = info
        .streams
        .into_iter()
        .next()
        .ok_or_else(|| {
            CompositorError::decode(format!("no video stream in '{}'", path.display()))
        })?;
    let fps = stream
        .avg_frame_rate
        .as_deref()
        .and_then(parse_rate)
        .unwrap_or(30.0);
    let (width, height) = fit_width(stream.width, stream.height, bounds.max_width);

    let out = std::process::Command::new("ffmpeg")
        .args(["-v", "error", "-i"])
        .arg(path)
        .args(["-frames:v", &bounds.max_frames.to_string()])
        .args(["-vf", &format!("scale={width}:{height}")])
        .args(["-f", "rawvideo", "-pix_fmt", "rgba", "pipe:1"])
        .output()
        .map_err(|err| CompositorError::decode(format!("failed to run ffmpeg: {err}")))?;
    if !out.status.success() {
        return Err(CompositorError::decode(format!(
            "ffmpeg failed for '{}': {}",
            path.display(),
            String::from_utf8_lossy(&out.stderr).trim()
        )));
    }

    let frame_len = width as usize * height as usize * 4;
    let frames = out
        .stdout
        .chunks_exact(frame_len)
        .map(|chunk| RasterImage::from_rgba(width, height, chunk.to_vec()))
        .collect::<Result<Vec<_>>>()?;
    VideoClip::new(frames, fps)
}

/// Decodes a WAV file into mono samples and its sample rate.
pub fn decode_wav(path: impl AsRef<Path>) -> Result<(Vec<f32>, u32)> {
    let mut reader = hound::WavReader::open(path.as_ref())?;
    let spec = reader.spec();
    let channels = usize::from(spec.channels.max(1));
    let interleaved: Vec<f32> = match spec.sample_format {
        hound::SampleFormat::Float => {
            reader.samples::<f32>().collect::<std::result::Result<_, _>>()?
        }
        hound::SampleFormat::Int => {
            let scale = (1_i64 << (spec.bits_per_sample.max(1) - 1)) as f32;
            reader
                .samples::<i32>()
                .map(|s| s.map(|v| v as f32 / scale))
                .collect::<std::result::Result<_, _>>()?
        }
    };
    let mono = interleaved
        .chunks(channels)
        .map(|frame| frame.iter().sum::<f32>() / frame.len() as f32)
        .collect();
    Ok((mono, spec.sample_rate))
}

/// Reads every `.json` and `.milk` preset in `dir`, ordered by file name.
/// Files that fail to parse are skipped with a warning.
pub fn load_preset_directory(
    dir: impl AsRef<Path>,
    converter: &dyn PresetConverter,
) -> Result<Vec<Preset>> {
    let mut paths: Vec<PathBuf> = std::fs::read_dir(dir.as_ref())?
        .filter_map(|entry| entry.ok().map(|e| e.path()))
        .filter(|path| {
            path.extension()
                .and_then(|ext| ext.to_str())
                .and_then(ContentKind::from_extension)
                == Some(ContentKind::GenerativeAudioReactive)
        })
        .collect();
    paths.sort();

    let mut presets = Vec::with_capacity(paths.len());
    for path in paths {
        let file = MediaFile::from_path(&path)?;
        match file.text().and_then(|text| parse_preset_text(text, converter)) {
            Ok(payload) => presets.push(Preset::new(file.stem(), payload)),
            Err(err) => tracing::warn!(path = %path.display(), %err, "skipping preset"),
        }
    }
    Ok(presets)
}

fn parse_rate(rate: &str) -> Option<f32> {
    let (num, den) = rate.split_once('/').unwrap_or((rate, "1"));
    let num: f32 = num.trim().parse().ok()?;
    let den: f32 = den.trim().parse().ok()?;
    (den > 0.0 && num > 0.0).then(|| num / den)
}

fn fit_width(width: u32, height: u32, max_width: u32) -> (u32, u32) {
    if width <= max_width || width == 0 {
        return (width.max(2) & !1, height.max(2) & !1);
    }
    let scaled = (u64::from(height) * u64::from(max_width) / u64::from(width)) as u32;
    (max_width.max(2) & !1, scaled.max(2) & !1)
}
