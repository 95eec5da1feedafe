use std::path::{Path, PathBuf};

use anyhow::Result;
use clap::Parser;
use sceneconfig::RenderMode;

#[derive(Parser, Debug)]
#[command(
    name = "inkfire",
    author,
    version,
    about = "Render inkfire frames headlessly or in a window"
)]
pub struct Cli {
    /// Scene configuration TOML; built-in defaults are used when omitted.
    #[arg(long, value_name = "FILE", env = "INKFIRE_CONFIG")]
    pub config: Option<PathBuf>,

    /// Pipeline to run: `post`, `ink-scene-paper`, `ink`, or `scene`.
    #[arg(long, value_name = "MODE", value_parser = parse_mode)]
    pub mode: Option<RenderMode>,

    /// Override the canvas size (e.g. `1280x720`).
    #[arg(long, value_name = "WIDTHxHEIGHT")]
    pub size: Option<String>,

    /// Number of frames to render before exporting.
    #[arg(
        long,
        value_name = "N",
        default_value_t = 1,
        value_parser = clap::value_parser!(u32).range(1..)
    )]
    pub frames: u32,

    /// Write the final screen buffer to this PNG path.
    #[arg(long, value_name = "PATH")]
    pub output: Option<PathBuf>,

    /// Print the run summary as JSON.
    #[arg(long)]
    pub json: bool,

    /// Open a window and render continuously until it is closed; `--frames`
    /// is ignored.
    #[arg(long, conflicts_with_all = ["output", "json"])]
    pub window: bool,
}

pub fn parse() -> Cli {
    Cli::parse()
}

pub fn parse_mode(value: &str) -> Result<RenderMode, String> {
    if value.trim().is_empty() {
        return Err("mode must not be empty".to_string());
    }
    value.parse()
}

pub fn parse_surface_size(value: &str) -> Result<(u32, u32)> {
    let trimmed = value.trim();
    let (width, height) = trimmed
        .split_once(['x', 'X', '×'])
        .ok_or_else(|| anyhow::anyhow!("expected WxH format, e.g. 1920x1080"))?;

    let width: u32 = width
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid width in size specification"))?;
    let height: u32 = height
        .trim()
        .parse()
        .map_err(|_| anyhow::anyhow!("invalid height in size specification"))?;

    if width == 0 || height == 0 {
        anyhow::bail!("surface dimensions must be greater than zero");
    }

    Ok((width, height))
}

pub fn ensure_png_path(path: &Path) -> Result<(), String> {
    match path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(|ext| ext.to_ascii_lowercase())
        .as_deref()
    {
        Some("png") => Ok(()),
        None => Err("output path has no extension; expected .png".to_string()),
        Some(other) => Err(format!(
            "unsupported output format '.{other}'; expected .png"
        )),
    }
}
