//! The end to end export pipeline: filter, mesh, clean up and write.

use std::{
    fmt::{self, Display},
    io::{self, Write},
    path::{Path, PathBuf},
    sync::Arc,
    time::{Duration, Instant},
};

use common::{
    config::{FilterConfig, ModelConfig},
    progress::Progress,
};
use image::{
    imageops::{self, FilterType},
    GrayImage,
};
use tempfile::NamedTempFile;
use tracing::{error, info};

use crate::{
    error::{ReliefError, Result, Stage},
    filter,
    finalize::finalize,
    height_field::HeightField,
    synth::{synthesize, Strategy},
    Pos,
};

/// A snapshot of everything one export needs. The source image is shared so
/// handing a request to a worker thread does not copy the pixels.
#[derive(Debug, Clone)]
pub struct ExportRequest {
    pub image: Arc<GrayImage>,
    pub filter: FilterConfig,
    pub model: ModelConfig,
    pub path: PathBuf,
}

/// Summary of a finished export.
#[derive(Debug, Clone)]
pub struct ExportReport {
    pub path: PathBuf,
    pub strategy: Strategy,
    pub triangles: usize,
    pub vertices: usize,
    pub bounds: (Pos, Pos),
    pub elapsed: Duration,
}

/// Runs the whole pipeline for `request` and writes the mesh to its path.
/// Nothing is written unless every stage succeeded.
pub fn export(request: &ExportRequest, progress: &Progress) -> Result<ExportReport> {
    let result = run(request, progress);
    if let Err(err) = &result {
        error!(
            "Export to `{}` failed: {err} ({:?})",
            request.path.display(),
            err
        );
    }
    result
}

fn run(request: &ExportRequest, progress: &Progress) -> Result<ExportReport> {
    let start = Instant::now();
    let model = &request.model;
    progress.set(5);

    model
        .validate()
        .map_err(|err| ReliefError::invalid_input(err.to_string()))?;
    check_size(&request.image)?;

    let filtered = filter::process(Some(&request.image), &request.filter)?;
    let image = prepare_image(&filtered, model);
    check_size(&image)?;

    let field = HeightField::from_image(&image);
    progress.set(20);

    let mesh = finalize(synthesize(&field, model, progress)?)?;
    progress.set(90);

    let bytes = mesh_format::encode(&mesh.to_format(), model.format)
        .map_err(|err| ReliefError::geometry(Stage::Serialization, format!("{err:#}")))?;
    write_replacing(&request.path, &bytes).map_err(|err| ReliefError::io(&request.path, err))?;
    progress.set(100);

    let report = ExportReport {
        path: request.path.clone(),
        strategy: Strategy::select(model),
        triangles: mesh.face_count(),
        vertices: mesh.vertex_count(),
        bounds: mesh.bounds(),
        elapsed: start.elapsed(),
    };
    info!("{report}");
    Ok(report)
}

/// Downscales `image` so its longer side fits `max_dimension`, keeping the
/// aspect ratio, and mirrors it horizontally when requested.
pub fn prepare_image(image: &GrayImage, model: &ModelConfig) -> GrayImage {
    let (width, height) = image.dimensions();
    let max = model.max_dimension;

    let mut out = if max > 0 && width.max(height) > max {
        let scale = max as f64 / width.max(height) as f64;
        let (new_width, new_height) = (
            ((width as f64 * scale).round() as u32).clamp(1, max),
            ((height as f64 * scale).round() as u32).clamp(1, max),
        );
        info!("Downscaling {width}x{height} image to {new_width}x{new_height}");
        imageops::resize(image, new_width, new_height, FilterType::Lanczos3)
    } else {
        image.clone()
    };

    if model.mirror {
        imageops::flip_horizontal_in_place(&mut out);
    }

    out
}

/// Writes `bytes` to a temporary file next to `path` and renames it into
/// place, so `path` never holds a partial file.
fn write_replacing(path: &Path, bytes: &[u8]) -> io::Result<()> {
    let dir = match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => dir,
        _ => Path::new("."),
    };

    let mut file = NamedTempFile::new_in(dir)?;
    file.write_all(bytes)?;
    file.as_file().sync_all()?;
    file.persist(path).map_err(|err| err.error)?;
    Ok(())
}

fn check_size(image: &GrayImage) -> Result<()> {
    let (width, height) = image.dimensions();
    if width < 2 || height < 2 {
        return Err(ReliefError::invalid_input(format!(
            "image of {width}x{height} pixels is too small, at least 2x2 is needed"
        )));
    }
    Ok(())
}

impl Display for ExportReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (min, max) = self.bounds;
        let size = max - min;
        write!(
            f,
            "Wrote `{}` ({} strategy): {} triangles, {} vertices, {:.2} x {:.2} x {:.2} mm in {}",
            self.path.display(),
            self.strategy,
            self.triangles,
            self.vertices,
            size.x,
            size.y,
            size.z,
            Elapsed(self.elapsed)
        )
    }
}

struct Elapsed(Duration);

impl Display for Elapsed {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.0.as_millis() {
            ms @ 0..=999 => write!(f, "{ms} ms"),
            _ => write!(f, "{:.1} s", self.0.as_secs_f64()),
        }
    }
}

#[cfg(test)]
mod tests {
    use image::Luma;

    use super::*;

    #[test]
    fn downscales_longer_side() {
        let image = GrayImage::new(400, 100);
        let model = ModelConfig {
            max_dimension: 200,
            ..Default::default()
        };
        assert_eq!(prepare_image(&image, &model).dimensions(), (200, 50));

        let model = ModelConfig {
            max_dimension: 0,
            ..Default::default()
        };
        assert_eq!(prepare_image(&image, &model).dimensions(), (400, 100));
    }

    #[test]
    fn mirror_flips_columns() {
        let image = GrayImage::from_fn(3, 2, |x, _| Luma([x as u8 * 100]));
        let model = ModelConfig {
            mirror: true,
            ..Default::default()
        };
        let out = prepare_image(&image, &model);
        assert_eq!(out.get_pixel(0, 1).0, [200]);
        assert_eq!(out.get_pixel(2, 0).0, [0]);
    }

    #[test]
    fn rejects_tiny_images_before_writing() {
        let dir = tempfile::tempdir().unwrap();
        let request = ExportRequest {
            image: Arc::new(GrayImage::new(1, 1)),
            filter: FilterConfig::default(),
            model: ModelConfig::default(),
            path: dir.path().join("tiny.stl"),
        };

        let err = export(&request, &Progress::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::InvalidInput);
        assert!(!request.path.exists());
    }

    #[test]
    fn replaces_existing_file_whole() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("out.stl");
        std::fs::write(&path, b"old contents that are longer than the new ones").unwrap();

        write_replacing(&path, b"new").unwrap();
        assert_eq!(std::fs::read(&path).unwrap(), b"new");
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
    }

    #[test]
    fn failed_write_leaves_no_partial_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("taken");
        std::fs::create_dir(&path).unwrap();
        std::fs::write(path.join("keep"), b"x").unwrap();

        let request = ExportRequest {
            image: Arc::new(GrayImage::new(4, 4)),
            filter: FilterConfig::default(),
            model: ModelConfig::default(),
            path: path.clone(),
        };
        let err = export(&request, &Progress::new()).unwrap_err();
        assert_eq!(err.kind(), crate::ErrorKind::IoFailure);

        // Only the blocking directory remains, no stray temporary file.
        assert_eq!(std::fs::read_dir(dir.path()).unwrap().count(), 1);
        assert!(path.is_dir());
    }

    #[test]
    fn report_mentions_counts() {
        let report = ExportReport {
            path: PathBuf::from("out.stl"),
            strategy: Strategy::Lattice,
            triangles: 12,
            vertices: 8,
            bounds: (Pos::zeros(), Pos::new(10.0, 5.0, 2.0)),
            elapsed: Duration::from_millis(20),
        };
        let text = report.to_string();
        assert!(text.contains("12 triangles"));
        assert!(text.contains("lattice"));
        assert!(text.contains("10.00 x 5.00 x 2.00 mm in 20 ms"));
        assert_eq!(Elapsed(Duration::from_millis(2345)).to_string(), "2.3 s");
    }
}
