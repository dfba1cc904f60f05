//! Integration test: full capture run with the software renderer
//!
//! Builds a small dataset on disk, renders every modality from the fixed
//! trajectory at a low resolution and checks the written images and the
//! camera manifest.

use dental_capture::backend::{negotiate, BackendConfig};
use dental_capture::batch::BatchScheduler;
use dental_capture::context::{RenderContext, RenderSettings, Renderer};
use dental_capture::dataset::Dataset;
use dental_capture::executor::PassExecutor;
use dental_capture::manifest::CameraManifest;
use dental_capture::modality::{MaterialLibrary, RenderModality};
use dental_capture::raster::SoftwareRenderer;
use dental_capture::trajectory::{generate, TrajectoryConfig};
use dental_capture::{CaptureConfig, Resolution};
use std::fs;
use std::path::Path;
use tempfile::TempDir;

const RES: u32 = 32;

/// A 20-unit box around the target, bottom half gum and top half tooth.
fn write_box_case(dir: &Path) {
    fs::create_dir_all(dir).unwrap();
    let mut obj = String::new();
    for z in [-10.0, 10.0] {
        for (x, y) in [(-10.0, 90.0), (10.0, 90.0), (10.0, 110.0), (-10.0, 110.0)] {
            obj.push_str(&format!("v {} {} {}\n", x, y, z));
        }
    }
    // bottom, top, then four sides
    obj.push_str("f 1 4 3 2\nf 5 6 7 8\nf 1 2 6 5\nf 2 3 7 6\nf 3 4 8 7\nf 4 1 5 8\n");
    fs::write(dir.join("jaw.obj"), obj).unwrap();
    fs::write(
        dir.join("jaw.json"),
        r#"{"labels": [0, 0, 0, 0, 1, 1, 1, 1], "jaw": "lower"}"#,
    )
    .unwrap();
}

fn config(temp: &TempDir) -> CaptureConfig {
    let mut config = CaptureConfig::default();
    config.dataset.root = temp.path().join("scans");
    config.trajectory = TrajectoryConfig::fixed();
    config.render.camera.resolution = Resolution::new(RES, RES);
    config
}

#[test]
fn test_capture_run_writes_every_modality() {
    let temp = TempDir::new().unwrap();
    let config = config(&temp);
    write_box_case(&config.dataset.root.join("case_01"));
    let output = config.dataset.output_root();

    let trajectory = generate(&config.trajectory).unwrap();
    let manifest = CameraManifest::build(&trajectory, &config.render.camera).unwrap();
    let manifest_path = manifest.save(&output).unwrap();

    let renderer = SoftwareRenderer::new();
    let negotiated = negotiate(
        &renderer.capabilities(),
        &BackendConfig::new(config.sampling.device),
        config.render.float_passes,
    )
    .unwrap();
    let dataset = Dataset::discover(&config.dataset).unwrap();
    let library = MaterialLibrary::new(config.curvature_exponent);
    let light = config.light.to_state();
    let executor = PassExecutor::new(&library, light, negotiated.float_passes);
    let scheduler =
        BatchScheduler::new(&dataset, &output, &config.modalities, &manifest, executor).unwrap();

    let mut ctx = RenderContext::new(
        renderer,
        negotiated.engines,
        config.render.camera.resolution,
        config.sampling.clone(),
        RenderSettings::baseline(light),
    );
    let summary = scheduler.run(&mut ctx).unwrap();

    let views = manifest.cameras.len();
    assert_eq!(views, 10);
    assert_eq!(summary.jobs_total, 6 * views);
    assert_eq!(summary.jobs_failed, 0, "{:?}", summary.failures);
    assert_eq!(summary.jobs_completed, 6 * views);
    assert_eq!(ctx.renderer().stats().renders, 6 * views);
    // the software renderer only offers the rasterizer
    assert_eq!(ctx.renderer().stats().reclaims, 0);
    assert_eq!(ctx.renderer().stats().configures, 1);

    for modality in RenderModality::ALL {
        let path = output
            .join(modality.dir_name())
            .join("scans_case_01_front.png");
        assert!(path.exists(), "missing {}", path.display());
    }

    let unlit = image::open(output.join("unlit").join("scans_case_01_front.png"))
        .unwrap()
        .to_rgba8();
    assert_eq!(unlit.dimensions(), (RES, RES));
    // background is transparent, the box covers the center
    assert_eq!(unlit.get_pixel(0, 0)[3], 0);
    let center = unlit.get_pixel(RES / 2, RES / 2);
    assert_eq!(center[3], 255);

    let depth = image::open(output.join("depth").join("scans_case_01_front.png"))
        .unwrap()
        .to_luma16();
    assert_eq!(depth.dimensions(), (RES, RES));
    // background maps to the far end, the box is nearer
    assert_eq!(depth.get_pixel(0, 0)[0], u16::MAX);
    assert!(depth.get_pixel(RES / 2, RES / 2)[0] < u16::MAX);

    let loaded = CameraManifest::load(&manifest_path).unwrap();
    assert_eq!(loaded, manifest);
    assert_eq!(loaded.metadata.view_count, views);
    assert_eq!(loaded.metadata.view_order[0], "front");
}

#[test]
fn test_float_passes_write_exr() {
    let temp = TempDir::new().unwrap();
    let mut config = config(&temp);
    config.render.float_passes = true;
    config.modalities = vec![RenderModality::Depth, RenderModality::Normal];
    write_box_case(&config.dataset.root.join("case_01"));
    let output = config.dataset.output_root();

    let trajectory = generate(&config.trajectory).unwrap();
    let manifest = CameraManifest::build(&trajectory, &config.render.camera).unwrap();
    let renderer = SoftwareRenderer::new();
    let negotiated = negotiate(
        &renderer.capabilities(),
        &BackendConfig::default(),
        config.render.float_passes,
    )
    .unwrap();
    assert!(negotiated.float_passes);

    let dataset = Dataset::discover(&config.dataset).unwrap();
    let library = MaterialLibrary::default();
    let light = config.light.to_state();
    let executor = PassExecutor::new(&library, light, negotiated.float_passes);
    let scheduler =
        BatchScheduler::new(&dataset, &output, &config.modalities, &manifest, executor).unwrap();
    let mut ctx = RenderContext::new(
        renderer,
        negotiated.engines,
        config.render.camera.resolution,
        config.sampling.clone(),
        RenderSettings::baseline(light),
    );
    let summary = scheduler.run(&mut ctx).unwrap();
    assert_eq!(summary.jobs_failed, 0, "{:?}", summary.failures);

    for dir in ["depth", "normal"] {
        let path = output.join(dir).join("scans_case_01_front.exr");
        assert!(path.exists(), "missing {}", path.display());
    }
}
