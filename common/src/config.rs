use std::{fs, path::Path};

use anyhow::{bail, Result};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::format::Format;

/// Settings for the image filter chain. A snapshot of these is taken for every
/// run, the pipeline never mutates it.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct FilterConfig {
    /// Contrast multiplier applied about the midpoint (128).
    pub contrast: f32,
    /// Brightness multiplier.
    pub brightness: f32,
    /// Gaussian smoothing strength, 0 disables.
    pub smoothing: f32,
    pub invert: bool,
    pub threshold: ThresholdConfig,
    /// Radius of the square dilation mask, 0 disables.
    pub dilate: u32,
    /// Radius of the square erosion mask, 0 disables.
    pub erode: u32,
    /// Radius of the median filter, 0 disables.
    pub noise_reduction: u32,
    pub stroke: StrokeConfig,
    pub artistic_smoothing: ArtisticSmoothingConfig,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct ThresholdConfig {
    pub enabled: bool,
    pub level: u8,
}

#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct StrokeConfig {
    pub enabled: bool,
    /// Outline thickness in pixels.
    pub thickness: u32,
}

/// Edge preserving (bilateral) smoothing.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq)]
#[serde(default)]
pub struct ArtisticSmoothingConfig {
    pub enabled: bool,
    /// Slider value, 0-100.
    pub strength: f32,
}

/// Settings for turning a height field into a solid.
#[derive(Serialize, Deserialize, Clone, Debug, PartialEq)]
#[serde(default)]
pub struct ModelConfig {
    /// Width of the finished model along X in mm.
    pub width: f32,
    /// Thickness of the base in mm.
    pub base_thickness: f32,
    /// Height of the relief above the base in mm.
    pub relief_height: f32,

    pub mirror: bool,
    /// Grow the base footprint by [`CUTTING_MARGIN`] on every side.
    pub cutting_margin: bool,
    /// Export only the open relief surface.
    pub relief_only: bool,
    /// Build a flat bottomed solid with a boolean union.
    pub flat_bottom: bool,
    pub format: Format,

    /// Longest side the image is downscaled to before meshing, 0 disables.
    pub max_dimension: u32,
    /// Fraction of triangles removed when decimating triangulated surfaces.
    pub target_reduction: f32,
    /// Substitute the extruded solid when the flat bottom union fails.
    pub boolean_fallback: bool,
}

/// Everything needed to reproduce an export, as stored on disk.
#[derive(Serialize, Deserialize, Clone, Debug, Default, PartialEq)]
#[serde(default)]
pub struct ReliefConfig {
    pub filter: FilterConfig,
    pub model: ModelConfig,
}

/// Margin added around the base footprint, in mm.
pub const CUTTING_MARGIN: f32 = 1.0;

impl FilterConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("contrast", self.contrast),
            ("brightness", self.brightness),
            ("smoothing", self.smoothing),
            ("artistic smoothing strength", self.artistic_smoothing.strength),
        ] {
            if !value.is_finite() {
                bail!("{name} must be finite, got {value}");
            }
        }

        if self.brightness < 0.0 {
            bail!("brightness must not be negative, got {}", self.brightness);
        }

        if self.stroke.enabled && self.stroke.thickness == 0 {
            bail!("stroke thickness must be at least one pixel");
        }

        Ok(())
    }
}

impl ModelConfig {
    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("model width", self.width),
            ("base thickness", self.base_thickness),
            ("relief height", self.relief_height),
            ("target reduction", self.target_reduction),
        ] {
            if !value.is_finite() {
                bail!("{name} must be finite, got {value}");
            }
            if value < 0.0 {
                bail!("{name} must not be negative, got {value}");
            }
        }

        if self.width <= 0.0 {
            bail!("model width must be positive, got {}", self.width);
        }

        if self.target_reduction >= 1.0 {
            bail!(
                "target reduction must be below 1.0, got {}",
                self.target_reduction
            );
        }

        Ok(())
    }

    /// The margin applied to the base footprint on every side, in mm.
    pub fn margin(&self) -> f32 {
        if self.cutting_margin {
            CUTTING_MARGIN
        } else {
            0.0
        }
    }
}

impl ReliefConfig {
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(err) => {
                warn!("Failed to load config, using defaults: {}", err);
                ReliefConfig::default()
            }
        }
    }

    pub fn load(path: &Path) -> Result<Self> {
        Ok(if path.exists() {
            let file = fs::read(path)?;
            let string = String::from_utf8_lossy(&file);
            let config = toml::from_str(&string)?;
            info!("Loaded config from `{}`", path.display());
            config
        } else {
            info!("No config file at `{}`, using defaults", path.display());
            Self::default()
        })
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent().filter(|x| !x.as_os_str().is_empty()) {
            fs::create_dir_all(parent)?;
        }

        let string = toml::to_string(self)?;
        fs::write(path, string)?;
        Ok(())
    }
}

impl Default for FilterConfig {
    fn default() -> Self {
        Self {
            contrast: 1.0,
            brightness: 1.0,
            smoothing: 0.0,
            invert: false,
            threshold: ThresholdConfig::default(),
            dilate: 0,
            erode: 0,
            noise_reduction: 0,
            stroke: StrokeConfig::default(),
            artistic_smoothing: ArtisticSmoothingConfig::default(),
        }
    }
}

impl Default for ThresholdConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            level: 128,
        }
    }
}

impl Default for StrokeConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            thickness: 3,
        }
    }
}

impl Default for ArtisticSmoothingConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            strength: 0.0,
        }
    }
}

impl Default for ModelConfig {
    fn default() -> Self {
        Self {
            width: 100.0,
            base_thickness: 2.0,
            relief_height: 4.0,

            mirror: false,
            cutting_margin: false,
            relief_only: false,
            flat_bottom: false,
            format: Format::Binary,

            max_dimension: 800,
            target_reduction: 0.98,
            boolean_fallback: false,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        FilterConfig::default().validate().unwrap();
        ModelConfig::default().validate().unwrap();
    }

    #[test]
    fn rejects_non_finite_and_negative_values() {
        let filter = FilterConfig {
            contrast: f32::NAN,
            ..Default::default()
        };
        assert!(filter.validate().is_err());

        let model = ModelConfig {
            base_thickness: -1.0,
            ..Default::default()
        };
        assert!(model.validate().is_err());

        let model = ModelConfig {
            width: 0.0,
            ..Default::default()
        };
        assert!(model.validate().is_err());
    }

    #[test]
    fn margin_follows_flag() {
        let mut model = ModelConfig::default();
        assert_eq!(model.margin(), 0.0);
        model.cutting_margin = true;
        assert_eq!(model.margin(), CUTTING_MARGIN);
    }

    #[test]
    fn round_trips_through_toml() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("relief.toml");

        let mut config = ReliefConfig::default();
        config.filter.threshold = ThresholdConfig {
            enabled: true,
            level: 90,
        };
        config.model.flat_bottom = true;
        config.model.format = Format::Ascii;
        config.save(&path).unwrap();

        assert_eq!(ReliefConfig::load(&path).unwrap(), config);
    }

    #[test]
    fn partial_files_fill_in_defaults() {
        let config: ReliefConfig = toml::from_str("[model]\nwidth = 50.0\n").unwrap();
        assert_eq!(config.model.width, 50.0);
        assert_eq!(config.model.base_thickness, 2.0);
        assert_eq!(config.filter, FilterConfig::default());
    }

    #[test]
    fn missing_file_loads_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = ReliefConfig::load_or_default(&dir.path().join("absent.toml"));
        assert_eq!(config, ReliefConfig::default());
    }
}
