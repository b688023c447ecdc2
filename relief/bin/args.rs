use std::path::PathBuf;

use clap::Parser;
use common::{config::ReliefConfig, format::Format};
use tracing::level_filters::LevelFilter;

#[derive(Debug, Parser)]
/// relief command line interface. Turns a grayscale image into a printable
/// relief and writes it as STL.
pub struct Args {
    /// Image to turn into a relief. Color images are converted to grayscale.
    pub image: PathBuf,
    /// File to write the mesh to.
    pub output: PathBuf,

    #[arg(long)]
    /// TOML file with filter and model settings. Flags given on the command
    /// line override its values.
    pub config: Option<PathBuf>,
    #[arg(long)]
    /// Write the effective settings to this TOML file.
    pub save_config: Option<PathBuf>,
    #[arg(long)]
    /// Write the filtered image to this path before meshing.
    pub preview: Option<PathBuf>,
    #[arg(long)]
    /// Read the written file back and check its triangle count.
    pub verify: bool,
    #[arg(short, long, action = clap::ArgAction::Count)]
    /// Log more. Repeat for more detail.
    pub verbose: u8,

    #[command(flatten)]
    pub filter: FilterArgs,
    #[command(flatten)]
    pub model: ModelArgs,
}

#[derive(clap::Args, Debug)]
pub struct FilterArgs {
    #[arg(long)]
    /// Contrast multiplier applied about mid gray.
    pub contrast: Option<f32>,
    #[arg(long)]
    /// Brightness multiplier.
    pub brightness: Option<f32>,
    #[arg(long)]
    /// Gaussian smoothing strength.
    pub smoothing: Option<f32>,
    #[arg(long)]
    /// Make bright areas high instead of dark ones.
    pub invert: bool,
    #[arg(long, value_name = "LEVEL")]
    /// Binarize the image, pixels brighter than LEVEL become white.
    pub threshold: Option<u8>,
    #[arg(long, value_name = "RADIUS")]
    /// Grow bright areas by RADIUS pixels.
    pub dilate: Option<u32>,
    #[arg(long, value_name = "RADIUS")]
    /// Shrink bright areas by RADIUS pixels.
    pub erode: Option<u32>,
    #[arg(long, value_name = "RADIUS")]
    /// Median filter radius.
    pub noise_reduction: Option<u32>,
    #[arg(long, value_name = "THICKNESS")]
    /// Replace the image with the outlines of its shapes, THICKNESS pixels
    /// wide.
    pub stroke: Option<u32>,
    #[arg(long, value_name = "STRENGTH")]
    /// Edge preserving smoothing, 0-100.
    pub artistic_smoothing: Option<f32>,
}

#[derive(clap::Args, Debug)]
pub struct ModelArgs {
    #[arg(long)]
    /// Width of the model along X in mm.
    pub width: Option<f32>,
    #[arg(long)]
    /// Thickness of the base in mm.
    pub base_thickness: Option<f32>,
    #[arg(long)]
    /// Height of the relief above the base in mm.
    pub relief_height: Option<f32>,
    #[arg(long)]
    /// Mirror the image horizontally.
    pub mirror: bool,
    #[arg(long)]
    /// Add a 1 mm margin around the base.
    pub cutting_margin: bool,
    #[arg(long)]
    /// Export only the relief surface, without base or walls.
    pub relief_only: bool,
    #[arg(long)]
    /// Fuse the relief onto a flat rectangular base.
    pub flat_bottom: bool,
    #[arg(long)]
    /// Write ASCII instead of binary STL.
    pub ascii: bool,
    #[arg(long)]
    /// Downscale the image so its longer side is at most this many pixels,
    /// 0 keeps the full resolution.
    pub max_dimension: Option<u32>,
    #[arg(long)]
    /// Fraction of triangles to remove from triangulated surfaces.
    pub target_reduction: Option<f32>,
    #[arg(long)]
    /// Fall back to an extruded solid if the flat bottom union fails.
    pub boolean_fallback: bool,
}

impl Args {
    pub fn level(&self) -> LevelFilter {
        match self.verbose {
            0 => LevelFilter::WARN,
            1 => LevelFilter::INFO,
            2 => LevelFilter::DEBUG,
            _ => LevelFilter::TRACE,
        }
    }

    /// Overrides the values in `config` with the flags that were given.
    pub fn apply(&self, config: &mut ReliefConfig) {
        let (filter, model) = (&self.filter, &self.model);
        let out = &mut config.filter;

        set(&mut out.contrast, filter.contrast);
        set(&mut out.brightness, filter.brightness);
        set(&mut out.smoothing, filter.smoothing);
        out.invert |= filter.invert;
        if let Some(level) = filter.threshold {
            out.threshold.enabled = true;
            out.threshold.level = level;
        }
        set(&mut out.dilate, filter.dilate);
        set(&mut out.erode, filter.erode);
        set(&mut out.noise_reduction, filter.noise_reduction);
        if let Some(thickness) = filter.stroke {
            out.stroke.enabled = true;
            out.stroke.thickness = thickness;
        }
        if let Some(strength) = filter.artistic_smoothing {
            out.artistic_smoothing.enabled = true;
            out.artistic_smoothing.strength = strength;
        }

        let out = &mut config.model;
        set(&mut out.width, model.width);
        set(&mut out.base_thickness, model.base_thickness);
        set(&mut out.relief_height, model.relief_height);
        out.mirror |= model.mirror;
        out.cutting_margin |= model.cutting_margin;
        out.relief_only |= model.relief_only;
        out.flat_bottom |= model.flat_bottom;
        if model.ascii {
            out.format = Format::Ascii;
        }
        set(&mut out.max_dimension, model.max_dimension);
        set(&mut out.target_reduction, model.target_reduction);
        out.boolean_fallback |= model.boolean_fallback;
    }
}

fn set<T>(target: &mut T, value: Option<T>) {
    if let Some(value) = value {
        *target = value;
    }
}
