use std::fmt;
use std::str::FromStr;

use serde::de::{self, Deserializer};
use serde::{Deserialize, Serialize, Serializer};

#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("failed to parse configuration: {0}")]
    Parse(#[from] toml::de::Error),
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

/// Which of the four pipelines a frame runs through.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "kebab-case")]
pub enum RenderMode {
    /// Scene offscreen, then a post-process pass on screen.
    #[default]
    Post,
    /// Ink and scene offscreen, composited over paper on screen.
    InkScenePaper,
    Ink,
    Scene,
}

impl RenderMode {
    pub const ALL: [RenderMode; 4] = [
        RenderMode::Post,
        RenderMode::InkScenePaper,
        RenderMode::Ink,
        RenderMode::Scene,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            RenderMode::Post => "post",
            RenderMode::InkScenePaper => "ink-scene-paper",
            RenderMode::Ink => "ink",
            RenderMode::Scene => "scene",
        }
    }
}

impl fmt::Display for RenderMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for RenderMode {
    type Err = String;

    fn from_str(raw: &str) -> Result<Self, Self::Err> {
        let normalized = raw.trim().to_ascii_lowercase();
        RenderMode::ALL
            .into_iter()
            .find(|mode| mode.as_str() == normalized)
            .ok_or_else(|| {
                format!("invalid mode '{raw}'; expected post, ink-scene-paper, ink or scene")
            })
    }
}

/// Normalised RGBA color.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Rgba(pub [f32; 4]);

impl Rgba {
    pub const fn new(r: f32, g: f32, b: f32, a: f32) -> Self {
        Self([r, g, b, a])
    }

    /// Color from 0–255 channels with an opaque alpha.
    pub fn from_bytes(r: u8, g: u8, b: u8) -> Self {
        Self::new(
            f32::from(r) / 255.0,
            f32::from(g) / 255.0,
            f32::from(b) / 255.0,
            1.0,
        )
    }

    pub fn to_array(self) -> [f32; 4] {
        self.0
    }
}

impl Serialize for Rgba {
    fn serialize<S>(&self, serializer: S) -> Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        self.0.serialize(serializer)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Deserialize, Serialize)]
pub struct SceneConfig {
    #[serde(default)]
    pub mode: RenderMode,
    #[serde(default)]
    pub surface: SurfaceConfig,
    #[serde(default)]
    pub palette: PaletteConfig,
    #[serde(default)]
    pub splash: SplashConfig,
    #[serde(default)]
    pub animation: AnimationConfig,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SurfaceConfig {
    #[serde(default = "default_width")]
    pub width: u32,
    #[serde(default = "default_height")]
    pub height: u32,
    /// Channels in `0.0..=1.0`, or a hex string.
    #[serde(
        default = "default_clear_color",
        deserialize_with = "deserialize_unit_color"
    )]
    pub clear_color: Rgba,
}

/// Scene colors. Arrays are 0–255 channels as in a color picker.
#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct PaletteConfig {
    #[serde(default = "default_color1", deserialize_with = "deserialize_byte_color")]
    pub color1: Rgba,
    #[serde(default = "default_color2", deserialize_with = "deserialize_byte_color")]
    pub color2: Rgba,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct SplashConfig {
    #[serde(
        default = "default_splash_color",
        deserialize_with = "deserialize_byte_color"
    )]
    pub color: Rgba,
    #[serde(default = "default_splash_count")]
    pub count: f32,
    #[serde(default = "default_scale_variance")]
    pub scale_variance: f32,
}

#[derive(Debug, Clone, PartialEq, Deserialize, Serialize)]
pub struct AnimationConfig {
    #[serde(default = "default_frequency")]
    pub frequency: f32,
    #[serde(default = "default_layers")]
    pub layers: i32,
    /// Added to the time uniform after every frame.
    #[serde(default = "default_time_step")]
    pub time_step: f32,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            clear_color: default_clear_color(),
        }
    }
}

impl Default for PaletteConfig {
    fn default() -> Self {
        Self {
            color1: default_color1(),
            color2: default_color2(),
        }
    }
}

impl Default for SplashConfig {
    fn default() -> Self {
        Self {
            color: default_splash_color(),
            count: default_splash_count(),
            scale_variance: default_scale_variance(),
        }
    }
}

impl Default for AnimationConfig {
    fn default() -> Self {
        Self {
            frequency: default_frequency(),
            layers: default_layers(),
            time_step: default_time_step(),
        }
    }
}

fn default_width() -> u32 {
    800
}

fn default_height() -> u32 {
    600
}

fn default_clear_color() -> Rgba {
    Rgba::new(0.98, 0.965, 0.93, 1.0)
}

fn default_color1() -> Rgba {
    Rgba::from_bytes(255, 180, 125)
}

fn default_color2() -> Rgba {
    Rgba::from_bytes(57, 15, 255)
}

fn default_splash_color() -> Rgba {
    Rgba::from_bytes(24, 22, 38)
}

fn default_splash_count() -> f32 {
    8.0
}

fn default_scale_variance() -> f32 {
    0.5
}

fn default_frequency() -> f32 {
    1.0
}

fn default_layers() -> i32 {
    4
}

fn default_time_step() -> f32 {
    1.0
}

#[derive(Deserialize)]
#[serde(untagged)]
enum ColorRepr {
    Hex(String),
    Channels(Vec<f32>),
}

fn deserialize_unit_color<'de, D>(deserializer: D) -> Result<Rgba, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_color(deserializer, 1.0)
}

fn deserialize_byte_color<'de, D>(deserializer: D) -> Result<Rgba, D::Error>
where
    D: Deserializer<'de>,
{
    deserialize_color(deserializer, 255.0)
}

fn deserialize_color<'de, D>(deserializer: D, scale: f32) -> Result<Rgba, D::Error>
where
    D: Deserializer<'de>,
{
    match ColorRepr::deserialize(deserializer)? {
        ColorRepr::Hex(raw) => parse_hex_color(&raw).map_err(de::Error::custom),
        ColorRepr::Channels(channels) => {
            color_from_channels(&channels, scale).map_err(de::Error::custom)
        }
    }
}

fn color_from_channels(channels: &[f32], scale: f32) -> Result<Rgba, String> {
    if !(3..=4).contains(&channels.len()) {
        return Err(format!(
            "color must have 3 or 4 channels, found {}",
            channels.len()
        ));
    }
    let mut color = [1.0; 4];
    for (slot, &value) in color.iter_mut().zip(channels) {
        if !value.is_finite() || !(0.0..=scale).contains(&value) {
            return Err(format!("color channel {value} is outside 0..={scale}"));
        }
        *slot = value / scale;
    }
    Ok(Rgba(color))
}

/// Parses `#rrggbb` or `#rrggbbaa`.
pub fn parse_hex_color(raw: &str) -> Result<Rgba, String> {
    let digits = raw.trim().strip_prefix('#').unwrap_or(raw.trim());
    if !matches!(digits.len(), 6 | 8) || !digits.chars().all(|ch| ch.is_ascii_hexdigit()) {
        return Err(format!("invalid hex color '{raw}'; expected #rrggbb or #rrggbbaa"));
    }
    let mut color = [1.0; 4];
    for (index, slot) in color.iter_mut().enumerate().take(digits.len() / 2) {
        let byte = u8::from_str_radix(&digits[index * 2..index * 2 + 2], 16)
            .map_err(|err| format!("invalid hex color '{raw}': {err}"))?;
        *slot = f32::from(byte) / 255.0;
    }
    Ok(Rgba(color))
}

impl SceneConfig {
    pub fn from_toml_str(input: &str) -> Result<Self, ConfigError> {
        let raw: SceneConfig = toml::from_str(input)?;
        raw.validate()?;
        Ok(raw)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.surface.width == 0 || self.surface.height == 0 {
            return Err(ConfigError::Invalid(format!(
                "surface must be non-empty, got {}x{}",
                self.surface.width, self.surface.height
            )));
        }

        let frequency = self.animation.frequency;
        if !frequency.is_finite() || frequency <= 0.0 {
            return Err(ConfigError::Invalid(format!(
                "animation.frequency must be > 0, got {frequency}"
            )));
        }

        if !self.animation.time_step.is_finite() {
            return Err(ConfigError::Invalid(
                "animation.time_step must be finite".into(),
            ));
        }

        if self.animation.layers < 0 {
            return Err(ConfigError::Invalid(format!(
                "animation.layers must be >= 0, got {}",
                self.animation.layers
            )));
        }

        if !self.splash.count.is_finite() || self.splash.count < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "splash.count must be >= 0, got {}",
                self.splash.count
            )));
        }

        if !self.splash.scale_variance.is_finite() || self.splash.scale_variance < 0.0 {
            return Err(ConfigError::Invalid(format!(
                "splash.scale_variance must be >= 0, got {}",
                self.splash.scale_variance
            )));
        }

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r##"
mode = "ink-scene-paper"

[surface]
width = 320
height = 200
clear_color = [0.1, 0.2, 0.3, 1.0]

[palette]
color1 = [255, 0, 0]
color2 = "#0000ff80"

[splash]
color = "#101820"
count = 12
scale_variance = 0.25

[animation]
frequency = 2.5
layers = 6
time_step = 0.5
"##;

    fn assert_color(actual: Rgba, expected: [f32; 4]) {
        for (a, e) in actual.0.iter().zip(expected) {
            assert!((a - e).abs() < 1e-6, "{actual:?} != {expected:?}");
        }
    }

    #[test]
    fn parses_sample_config() {
        let config = SceneConfig::from_toml_str(SAMPLE).expect("parse config");
        assert_eq!(config.mode, RenderMode::InkScenePaper);
        assert_eq!((config.surface.width, config.surface.height), (320, 200));
        assert_color(config.surface.clear_color, [0.1, 0.2, 0.3, 1.0]);
        assert_color(config.palette.color1, [1.0, 0.0, 0.0, 1.0]);
        assert_color(config.palette.color2, [0.0, 0.0, 1.0, 128.0 / 255.0]);
        assert_color(
            config.splash.color,
            [16.0 / 255.0, 24.0 / 255.0, 32.0 / 255.0, 1.0],
        );
        assert_eq!(config.splash.count, 12.0);
        assert_eq!(config.animation.layers, 6);
        assert_eq!(config.animation.time_step, 0.5);
    }

    #[test]
    fn empty_config_uses_defaults() {
        let config = SceneConfig::from_toml_str("").expect("parse empty config");
        assert_eq!(config, SceneConfig::default());
        assert_eq!(config.mode, RenderMode::Post);
        assert_color(config.surface.clear_color, [0.98, 0.965, 0.93, 1.0]);
        assert_color(
            config.palette.color1,
            [1.0, 180.0 / 255.0, 125.0 / 255.0, 1.0],
        );
        assert_eq!(config.animation.frequency, 1.0);
        assert_eq!(config.animation.time_step, 1.0);
    }

    #[test]
    fn rejects_zero_surface() {
        let err = SceneConfig::from_toml_str("[surface]\nwidth = 0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_non_positive_frequency() {
        let err = SceneConfig::from_toml_str("[animation]\nfrequency = 0.0\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_negative_splash_count() {
        let err = SceneConfig::from_toml_str("[splash]\ncount = -1\n").unwrap_err();
        assert!(matches!(err, ConfigError::Invalid(_)));
    }

    #[test]
    fn rejects_out_of_range_channels() {
        let err = SceneConfig::from_toml_str("[palette]\ncolor1 = [300, 0, 0]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));

        let err = SceneConfig::from_toml_str("[surface]\nclear_color = [2.0, 0, 0]\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn rejects_unknown_mode() {
        let err = SceneConfig::from_toml_str("mode = \"wireframe\"\n").unwrap_err();
        assert!(matches!(err, ConfigError::Parse(_)));
    }

    #[test]
    fn hex_colors_require_six_or_eight_digits() {
        assert_color(
            parse_hex_color("#ff8000").expect("hex"),
            [1.0, 128.0 / 255.0, 0.0, 1.0],
        );
        assert!(parse_hex_color("#fff").is_err());
        assert!(parse_hex_color("#gg0000").is_err());
    }

    #[test]
    fn mode_parses_from_cli_spelling() {
        assert_eq!(
            "ink-scene-paper".parse::<RenderMode>(),
            Ok(RenderMode::InkScenePaper)
        );
        assert_eq!(" Scene ".parse::<RenderMode>(), Ok(RenderMode::Scene));
        assert!("paper".parse::<RenderMode>().is_err());
        for mode in RenderMode::ALL {
            assert_eq!(mode.to_string().parse::<RenderMode>(), Ok(mode));
        }
    }
}
