use anyhow::{anyhow, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_FRAME_WIDTH: u32 = 860;
const DEFAULT_FRAME_HEIGHT: u32 = 720;
const DEFAULT_MIN_AREA: f64 = 3000.0;
const DEFAULT_THRESHOLD: u8 = 25;
const DEFAULT_DILATE_KERNEL: u32 = 3;
const DEFAULT_TRANSCODER: &str = "ffmpeg";
const DEFAULT_KEEPALIVE_SECS: u64 = 3;
const DEFAULT_FOURCC: &str = "VP80";
const DEFAULT_HISTORY: u32 = 500;
const DEFAULT_VAR_THRESHOLD: f32 = 16.0;
const DEFAULT_BACKGROUND_RATIO: f32 = 0.9;
const DEFAULT_MAX_MODES: usize = 3;

#[derive(Debug, Deserialize, Default)]
struct MotionConfigFile {
    frame: Option<FrameConfigFile>,
    detect: Option<DetectConfigFile>,
    background: Option<BackgroundConfigFile>,
    transcoder: Option<TranscoderConfigFile>,
    ingest: Option<IngestConfigFile>,
    display: Option<DisplayConfigFile>,
}

#[derive(Debug, Deserialize, Default)]
struct FrameConfigFile {
    width: Option<u32>,
    height: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct DetectConfigFile {
    min_area: Option<f64>,
    threshold: Option<u8>,
    dilate_kernel: Option<u32>,
}

#[derive(Debug, Deserialize, Default)]
struct BackgroundConfigFile {
    history: Option<u32>,
    var_threshold: Option<f32>,
    background_ratio: Option<f32>,
    max_modes: Option<usize>,
}

#[derive(Debug, Deserialize, Default)]
struct TranscoderConfigFile {
    program: Option<String>,
    args: Option<Vec<String>>,
}

#[derive(Debug, Deserialize, Default)]
struct IngestConfigFile {
    keepalive_secs: Option<u64>,
    fourcc: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct DisplayConfigFile {
    snapshot_dir: Option<PathBuf>,
    font_path: Option<PathBuf>,
}

/// Startup configuration. Immutable once loaded.
#[derive(Debug, Clone)]
pub struct MotionConfig {
    pub frame: FrameSettings,
    pub detect: DetectSettings,
    pub background: BackgroundSettings,
    pub transcoder: TranscoderSettings,
    pub ingest: IngestSettings,
    pub display: DisplaySettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FrameSettings {
    pub width: u32,
    pub height: u32,
}

impl FrameSettings {
    /// Bytes in one interleaved 3-channel frame.
    pub fn frame_len(&self) -> usize {
        self.width as usize * self.height as usize * 3
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DetectSettings {
    pub min_area: f64,
    pub threshold: u8,
    pub dilate_kernel: u32,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BackgroundSettings {
    pub history: u32,
    pub var_threshold: f32,
    pub background_ratio: f32,
    pub max_modes: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TranscoderSettings {
    pub program: String,
    /// Replaces the generated ffmpeg arguments when set.
    pub args: Option<Vec<String>>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IngestSettings {
    pub keepalive: Duration,
    pub fourcc: [u8; 4],
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct DisplaySettings {
    pub snapshot_dir: Option<PathBuf>,
    pub font_path: Option<PathBuf>,
}

impl Default for DetectSettings {
    fn default() -> Self {
        Self {
            min_area: DEFAULT_MIN_AREA,
            threshold: DEFAULT_THRESHOLD,
            dilate_kernel: DEFAULT_DILATE_KERNEL,
        }
    }
}

impl Default for BackgroundSettings {
    fn default() -> Self {
        Self {
            history: DEFAULT_HISTORY,
            var_threshold: DEFAULT_VAR_THRESHOLD,
            background_ratio: DEFAULT_BACKGROUND_RATIO,
            max_modes: DEFAULT_MAX_MODES,
        }
    }
}

impl Default for MotionConfig {
    fn default() -> Self {
        // Defaults are valid by construction.
        Self {
            frame: FrameSettings {
                width: DEFAULT_FRAME_WIDTH,
                height: DEFAULT_FRAME_HEIGHT,
            },
            detect: DetectSettings::default(),
            background: BackgroundSettings::default(),
            transcoder: TranscoderSettings {
                program: DEFAULT_TRANSCODER.to_string(),
                args: None,
            },
            ingest: IngestSettings {
                keepalive: Duration::from_secs(DEFAULT_KEEPALIVE_SECS),
                fourcc: *b"VP80",
            },
            display: DisplaySettings::default(),
        }
    }
}

impl MotionConfig {
    pub fn load() -> Result<Self> {
        let config_path = std::env::var("MOTION_CONFIG").ok();
        let file_cfg = match config_path.as_deref() {
            Some(path) => Some(read_config_file(Path::new(path))?),
            None => None,
        };
        let mut cfg = Self::from_file(file_cfg.unwrap_or_default())?;
        cfg.apply_env()?;
        cfg.validate()?;
        Ok(cfg)
    }

    fn from_file(file: MotionConfigFile) -> Result<Self> {
        let frame = FrameSettings {
            width: file
                .frame
                .as_ref()
                .and_then(|frame| frame.width)
                .unwrap_or(DEFAULT_FRAME_WIDTH),
            height: file
                .frame
                .as_ref()
                .and_then(|frame| frame.height)
                .unwrap_or(DEFAULT_FRAME_HEIGHT),
        };
        let detect = DetectSettings {
            min_area: file
                .detect
                .as_ref()
                .and_then(|detect| detect.min_area)
                .unwrap_or(DEFAULT_MIN_AREA),
            threshold: file
                .detect
                .as_ref()
                .and_then(|detect| detect.threshold)
                .unwrap_or(DEFAULT_THRESHOLD),
            dilate_kernel: file
                .detect
                .as_ref()
                .and_then(|detect| detect.dilate_kernel)
                .unwrap_or(DEFAULT_DILATE_KERNEL),
        };
        let background = {
            let bg = file.background.unwrap_or_default();
            BackgroundSettings {
                history: bg.history.unwrap_or(DEFAULT_HISTORY),
                var_threshold: bg.var_threshold.unwrap_or(DEFAULT_VAR_THRESHOLD),
                background_ratio: bg.background_ratio.unwrap_or(DEFAULT_BACKGROUND_RATIO),
                max_modes: bg.max_modes.unwrap_or(DEFAULT_MAX_MODES),
            }
        };
        let transcoder = {
            let tc = file.transcoder.unwrap_or_default();
            TranscoderSettings {
                program: tc.program.unwrap_or_else(|| DEFAULT_TRANSCODER.to_string()),
                args: tc.args,
            }
        };
        let ingest = {
            let ingest = file.ingest.unwrap_or_default();
            IngestSettings {
                keepalive: Duration::from_secs(
                    ingest.keepalive_secs.unwrap_or(DEFAULT_KEEPALIVE_SECS),
                ),
                fourcc: parse_fourcc(ingest.fourcc.as_deref().unwrap_or(DEFAULT_FOURCC))?,
            }
        };
        let display = {
            let display = file.display.unwrap_or_default();
            DisplaySettings {
                snapshot_dir: display.snapshot_dir,
                font_path: display.font_path,
            }
        };
        Ok(Self {
            frame,
            detect,
            background,
            transcoder,
            ingest,
            display,
        })
    }

    fn apply_env(&mut self) -> Result<()> {
        if let Some(width) = env_number::<u32>("MOTION_FRAME_WIDTH")? {
            self.frame.width = width;
        }
        if let Some(height) = env_number::<u32>("MOTION_FRAME_HEIGHT")? {
            self.frame.height = height;
        }
        if let Some(min_area) = env_number::<f64>("MOTION_MIN_AREA")? {
            self.detect.min_area = min_area;
        }
        if let Some(threshold) = env_number::<u8>("MOTION_THRESHOLD")? {
            self.detect.threshold = threshold;
        }
        if let Some(kernel) = env_number::<u32>("MOTION_DILATE_KERNEL")? {
            self.detect.dilate_kernel = kernel;
        }
        if let Ok(program) = std::env::var("MOTION_TRANSCODER") {
            if !program.trim().is_empty() {
                self.transcoder.program = program;
            }
        }
        if let Some(secs) = env_number::<u64>("MOTION_KEEPALIVE_SECS")? {
            self.ingest.keepalive = Duration::from_secs(secs);
        }
        if let Ok(dir) = std::env::var("MOTION_SNAPSHOT_DIR") {
            if !dir.trim().is_empty() {
                self.display.snapshot_dir = Some(PathBuf::from(dir));
            }
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<()> {
        if self.frame.width == 0 || self.frame.height == 0 {
            return Err(anyhow!("frame width and height must be greater than zero"));
        }
        if self.frame.width % 2 != 0 || self.frame.height % 2 != 0 {
            return Err(anyhow!(
                "frame dimensions must be even for rgb24 transcoding (got {}x{})",
                self.frame.width,
                self.frame.height
            ));
        }
        if self.frame.width > u16::MAX as u32 || self.frame.height > u16::MAX as u32 {
            return Err(anyhow!("frame dimensions must fit the container header"));
        }
        if !self.detect.min_area.is_finite() || self.detect.min_area < 0.0 {
            return Err(anyhow!("min_area must be a non-negative number"));
        }
        if self.detect.dilate_kernel == 0 || self.detect.dilate_kernel % 2 == 0 {
            return Err(anyhow!("dilate_kernel must be odd and at least 1"));
        }
        if self.detect.dilate_kernel > 2 * u8::MAX as u32 + 1 {
            return Err(anyhow!("dilate_kernel is too large"));
        }
        if self.background.history == 0 {
            return Err(anyhow!("background history must be greater than zero"));
        }
        if self.background.var_threshold <= 0.0 {
            return Err(anyhow!("background var_threshold must be positive"));
        }
        if !(0.0..=1.0).contains(&self.background.background_ratio) {
            return Err(anyhow!("background_ratio must be within 0..=1"));
        }
        if self.background.max_modes == 0 || self.background.max_modes > 8 {
            return Err(anyhow!("background max_modes must be within 1..=8"));
        }
        if self.transcoder.program.trim().is_empty() {
            return Err(anyhow!("transcoder program must not be empty"));
        }
        if self.ingest.keepalive.is_zero() {
            return Err(anyhow!("keepalive interval must be greater than zero"));
        }
        Ok(())
    }
}

fn read_config_file(path: &Path) -> Result<MotionConfigFile> {
    let raw = std::fs::read_to_string(path)
        .map_err(|e| anyhow!("failed to read config file {}: {}", path.display(), e))?;
    let cfg = serde_json::from_str(&raw)
        .map_err(|e| anyhow!("invalid config file {}: {}", path.display(), e))?;
    Ok(cfg)
}

fn env_number<T: std::str::FromStr>(key: &str) -> Result<Option<T>> {
    match std::env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse()
            .map(Some)
            .map_err(|_| anyhow!("{} must be a number (got '{}')", key, value)),
        _ => Ok(None),
    }
}

fn parse_fourcc(value: &str) -> Result<[u8; 4]> {
    let bytes = value.as_bytes();
    if bytes.len() != 4 || !bytes.iter().all(|b| b.is_ascii_graphic()) {
        return Err(anyhow!("fourcc must be exactly 4 ASCII characters (got '{}')", value));
    }
    Ok([bytes[0], bytes[1], bytes[2], bytes[3]])
}
