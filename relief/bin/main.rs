use std::{
    fs::File,
    io::{stdout, BufReader, Write},
    sync::Arc,
};

use anyhow::{ensure, Context, Result};
use clap::Parser;
use tracing_subscriber::{filter, layer::SubscriberExt, util::SubscriberInitExt};

use common::config::ReliefConfig;
use relief::{export::ExportRequest, filter::process, operation::ExportOperation, Mesh};

use args::Args;

mod args;

fn main() -> Result<()> {
    let args = Args::parse();

    let level = args.level();
    let filter = filter::Targets::new()
        .with_default(filter::LevelFilter::OFF)
        .with_target("relief", level)
        .with_target("mesh_format", level)
        .with_target("common", level);
    tracing_subscriber::registry()
        .with(filter)
        .with(tracing_subscriber::fmt::layer())
        .init();

    let mut config = match &args.config {
        Some(path) => ReliefConfig::load(path)
            .with_context(|| format!("Failed to load config `{}`", path.display()))?,
        None => ReliefConfig::default(),
    };
    args.apply(&mut config);

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to save config to `{}`", path.display()))?;
    }

    let image = image::open(&args.image)
        .with_context(|| format!("Failed to load image `{}`", args.image.display()))?
        .to_luma8();
    println!(
        "Loaded `{}`. {{ width: {}, height: {} }}",
        args.image.display(),
        image.width(),
        image.height()
    );

    if let Some(path) = &args.preview {
        process(Some(&image), &config.filter)?
            .save(path)
            .with_context(|| format!("Failed to write preview `{}`", path.display()))?;
    }

    // Mesh on another thread and report progress from this one.
    let operation = ExportOperation::spawn(ExportRequest {
        image: Arc::new(image),
        filter: config.filter,
        model: config.model,
        path: args.output.clone(),
    });

    let progress = operation.progress();
    let mut seen = 0;
    while !progress.is_finished() {
        seen = progress.wait(seen);
        print!("\rExporting: {seen}%");
        stdout().flush()?;
    }
    println!();

    let report = operation.wait().context("Export result was already taken")??;
    println!("{report}");

    if args.verify {
        let mut file = BufReader::new(
            File::open(&report.path)
                .with_context(|| format!("Failed to reopen `{}`", report.path.display()))?,
        );
        let mesh = Mesh::from(mesh_format::parse(&mut file)?);
        ensure!(
            mesh.face_count() == report.triangles,
            "Read back {} triangles, expected {}",
            mesh.face_count(),
            report.triangles
        );
        println!(
            "Verified `{}`. {{ vert: {}, face: {}, open edges: {} }}",
            report.path.display(),
            mesh.vertex_count(),
            mesh.face_count(),
            mesh.boundary_edge_count()
        );
    }

    Ok(())
}
