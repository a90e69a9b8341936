//! Frame transformers.
//!
//! A transformer reads one image, applies a style and writes one image. The
//! same input and style must always produce the same bytes so a redelivered
//! frame overwrites its output with identical content.

use std::fmt;
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::str::FromStr;

use async_trait::async_trait;
use image::{DynamicImage, Rgb, RgbImage};
use tokio::process::Command;
use tracing::debug;

use crate::error::{MediaError, MediaResult};

/// Applies a visual transformation to one frame.
#[async_trait]
pub trait FrameTransformer: Send + Sync {
    /// Short name for logs.
    fn name(&self) -> &str;

    /// Transform `input` into `output`. `style` of `None` uses the
    /// transformer's default.
    async fn transform(&self, input: &Path, output: &Path, style: Option<&str>) -> MediaResult<()>;
}

/// Built-in styles.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Style {
    #[default]
    Identity,
    Grayscale,
    Invert,
    Sepia,
    Blur,
}

impl Style {
    pub fn as_str(&self) -> &'static str {
        match self {
            Style::Identity => "identity",
            Style::Grayscale => "grayscale",
            Style::Invert => "invert",
            Style::Sepia => "sepia",
            Style::Blur => "blur",
        }
    }

    /// Apply the style to a decoded image.
    pub fn apply(&self, img: DynamicImage) -> RgbImage {
        match self {
            Style::Identity => img.to_rgb8(),
            Style::Grayscale => img.grayscale().to_rgb8(),
            Style::Invert => {
                let mut img = img.to_rgb8();
                image::imageops::invert(&mut img);
                img
            }
            Style::Sepia => sepia(img.to_rgb8()),
            Style::Blur => img.blur(2.0).to_rgb8(),
        }
    }
}

impl fmt::Display for Style {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Style {
    type Err = MediaError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "identity" | "none" | "original" => Ok(Style::Identity),
            "grayscale" | "greyscale" | "gray" => Ok(Style::Grayscale),
            "invert" => Ok(Style::Invert),
            "sepia" => Ok(Style::Sepia),
            "blur" => Ok(Style::Blur),
            other => Err(MediaError::UnknownStyle(other.to_string())),
        }
    }
}

fn sepia(mut img: RgbImage) -> RgbImage {
    for pixel in img.pixels_mut() {
        let [r, g, b] = pixel.0.map(f32::from);
        let tone = |cr: f32, cg: f32, cb: f32| (r * cr + g * cg + b * cb).round().min(255.0) as u8;
        *pixel = Rgb([
            tone(0.393, 0.769, 0.189),
            tone(0.349, 0.686, 0.168),
            tone(0.272, 0.534, 0.131),
        ]);
    }
    img
}

/// Image-crate transformer with deterministic built-in styles.
#[derive(Debug, Clone, Default)]
pub struct ImageStyleTransformer {
    default_style: Style,
}

impl ImageStyleTransformer {
    pub fn new(default_style: Style) -> Self {
        Self { default_style }
    }

    fn resolve(&self, style: Option<&str>) -> MediaResult<Style> {
        match style {
            Some(s) => s.parse(),
            None => Ok(self.default_style),
        }
    }
}

#[async_trait]
impl FrameTransformer for ImageStyleTransformer {
    fn name(&self) -> &str {
        "image"
    }

    async fn transform(&self, input: &Path, output: &Path, style: Option<&str>) -> MediaResult<()> {
        let style = self.resolve(style)?;
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        let input = input.to_path_buf();
        let output = output.to_path_buf();

        tokio::task::spawn_blocking(move || -> MediaResult<()> {
            let img = image::open(&input)?;
            style.apply(img).save(&output)?;
            debug!("Applied {} to {}", style, input.display());
            Ok(())
        })
        .await
        .map_err(|e| MediaError::internal(format!("transform task failed: {}", e)))?
    }
}

/// Runs an external stylization command per frame.
///
/// Invoked as `<program> [args...] --input <in> --output <out> [--style <s>] [--model-dir <dir>]`.
#[derive(Debug, Clone)]
pub struct CommandTransformer {
    program: String,
    args: Vec<String>,
    model_dir: Option<PathBuf>,
    default_style: Option<String>,
}

impl CommandTransformer {
    /// Parse a whitespace-separated command line.
    pub fn new(command_line: &str) -> MediaResult<Self> {
        let mut parts = command_line.split_whitespace().map(str::to_string);
        let program = parts
            .next()
            .ok_or_else(|| MediaError::transform_failed("empty transform command"))?;

        Ok(Self {
            program,
            args: parts.collect(),
            model_dir: None,
            default_style: None,
        })
    }

    /// Pass a model directory to the command. The directory must exist.
    pub fn with_model_dir(mut self, dir: impl Into<PathBuf>) -> MediaResult<Self> {
        let dir = dir.into();
        if !dir.is_dir() {
            return Err(MediaError::model_not_found(dir.display().to_string()));
        }
        self.model_dir = Some(dir);
        Ok(self)
    }

    pub fn with_default_style(mut self, style: Option<String>) -> Self {
        self.default_style = style;
        self
    }

    /// Fail early if the program is not on PATH.
    pub fn check_available(&self) -> MediaResult<PathBuf> {
        which::which(&self.program)
            .map_err(|_| MediaError::transform_failed(format!("{} not found in PATH", self.program)))
    }

    pub fn build_args(&self, input: &Path, output: &Path, style: Option<&str>) -> Vec<String> {
        let mut args = self.args.clone();
        args.push("--input".to_string());
        args.push(input.to_string_lossy().to_string());
        args.push("--output".to_string());
        args.push(output.to_string_lossy().to_string());

        if let Some(style) = style.or(self.default_style.as_deref()) {
            args.push("--style".to_string());
            args.push(style.to_string());
        }
        if let Some(dir) = &self.model_dir {
            args.push("--model-dir".to_string());
            args.push(dir.to_string_lossy().to_string());
        }

        args
    }
}

#[async_trait]
impl FrameTransformer for CommandTransformer {
    fn name(&self) -> &str {
        "command"
    }

    async fn transform(&self, input: &Path, output: &Path, style: Option<&str>) -> MediaResult<()> {
        if !input.exists() {
            return Err(MediaError::FileNotFound(input.to_path_buf()));
        }

        let args = self.build_args(input, output, style);
        debug!("Running transformer: {} {}", self.program, args.join(" "));

        let result = Command::new(&self.program)
            .args(&args)
            .stdin(Stdio::null())
            .kill_on_drop(true)
            .output()
            .await?;

        if !result.status.success() {
            let stderr = String::from_utf8_lossy(&result.stderr);
            let tail: Vec<&str> = stderr.lines().rev().take(5).collect();
            return Err(MediaError::transform_failed(format!(
                "{} exited with {}: {}",
                self.program,
                result.status,
                tail.into_iter().rev().collect::<Vec<_>>().join(" | ")
            )));
        }

        if !output.exists() {
            return Err(MediaError::transform_failed(format!(
                "{} produced no output at {}",
                self.program,
                output.display()
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn write_test_image(path: &Path) {
        let img = RgbImage::from_fn(16, 8, |x, y| Rgb([(x * 16) as u8, (y * 32) as u8, 128]));
        img.save(path).unwrap();
    }

    #[test]
    fn test_style_parse() {
        assert_eq!("Sepia".parse::<Style>().unwrap(), Style::Sepia);
        assert_eq!("greyscale".parse::<Style>().unwrap(), Style::Grayscale);
        assert!(matches!("mosaic".parse::<Style>(), Err(MediaError::UnknownStyle(_))));
    }

    #[test]
    fn test_invert_and_sepia_pixels() {
        let img = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([10, 20, 30])));

        let inverted = Style::Invert.apply(img.clone());
        assert_eq!(inverted.get_pixel(0, 0).0, [245, 235, 225]);

        let white = DynamicImage::ImageRgb8(RgbImage::from_pixel(1, 1, Rgb([255, 255, 255])));
        let toned = Style::Sepia.apply(white);
        assert_eq!(toned.get_pixel(0, 0).0, [255, 255, 239]);
    }

    #[tokio::test]
    async fn test_image_transform_is_deterministic() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("000001_frame.jpg");
        write_test_image(&input);

        let transformer = ImageStyleTransformer::default();
        let first = dir.path().join("a.jpg");
        let second = dir.path().join("b.jpg");
        transformer.transform(&input, &first, Some("sepia")).await.unwrap();
        transformer.transform(&input, &second, Some("sepia")).await.unwrap();

        assert_eq!(std::fs::read(&first).unwrap(), std::fs::read(&second).unwrap());
    }

    #[tokio::test]
    async fn test_image_transform_errors() {
        let dir = tempfile::tempdir().unwrap();
        let transformer = ImageStyleTransformer::new(Style::Grayscale);

        let missing = transformer
            .transform(&dir.path().join("nope.jpg"), &dir.path().join("out.jpg"), None)
            .await;
        assert!(matches!(missing, Err(MediaError::FileNotFound(_))));

        let input = dir.path().join("in.png");
        write_test_image(&input);
        let unknown = transformer
            .transform(&input, &dir.path().join("out.jpg"), Some("mosaic"))
            .await;
        assert!(matches!(unknown, Err(MediaError::UnknownStyle(_))));
    }

    #[test]
    fn test_command_args() {
        let transformer = CommandTransformer::new("python stylize.py --cuda 0")
            .unwrap()
            .with_default_style(Some("candy".to_string()));

        let args = transformer.build_args(Path::new("in.jpg"), Path::new("out.jpg"), None);
        assert_eq!(
            args,
            vec!["stylize.py", "--cuda", "0", "--input", "in.jpg", "--output", "out.jpg", "--style", "candy"]
        );

        let args = transformer.build_args(Path::new("in.jpg"), Path::new("out.jpg"), Some("mosaic"));
        assert_eq!(args.last().unwrap(), "mosaic");
    }

    #[test]
    fn test_command_requires_model_dir() {
        assert!(CommandTransformer::new("   ").is_err());

        let result = CommandTransformer::new("stylize")
            .unwrap()
            .with_model_dir("/definitely/not/here");
        assert!(matches!(result, Err(MediaError::ModelNotFound(_))));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn test_command_failure_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("in.jpg");
        std::fs::write(&input, b"x").unwrap();

        let transformer = CommandTransformer::new("false").unwrap();
        let result = transformer.transform(&input, &dir.path().join("out.jpg"), None).await;
        assert!(matches!(result, Err(MediaError::TransformFailed(_))));
    }
}
