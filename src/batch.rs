//! Batch scheduling across cases, modalities and views.
//!
//! Work is enumerated up front by [`plan_jobs`] in modality-major order
//! (case, then modality, then view) and consumed by a single executor loop.
//! Keeping all views of one modality together means the engine and material
//! bindings change once per group instead of once per image, and lets the
//! scheduler reclaim renderer memory between path-traced groups.
//!
//! # Example
//!
//! ```ignore
//! use dental_capture::batch::BatchScheduler;
//!
//! let scheduler = BatchScheduler::new(&dataset, output_root, &modalities, &manifest, executor)?;
//! let summary = scheduler.run(&mut ctx)?;
//! println!("{} images, {} failed", summary.jobs_completed, summary.jobs_failed);
//! ```

use crate::camera::CameraParameters;
use crate::context::{Engine, RenderContext, Renderer};
use crate::dataset::{CaseEntry, Dataset};
use crate::executor::{output_path, PassExecutor, PassRequest};
use crate::manifest::CameraManifest;
use crate::mesh::{Mesh, VertexLabels};
use crate::modality::RenderModality;
use log::{info, warn};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum BatchError {
    #[error("no modalities enabled")]
    NoModalities,
    #[error("trajectory has no usable cameras")]
    NoViews,
}

/// One unit of work: a case rendered in one modality from one view.
#[derive(Debug)]
pub struct RenderJob<'a, C> {
    pub case: &'a C,
    pub modality: RenderModality,
    /// Position of the view in the trajectory
    pub view_index: usize,
    pub camera: &'a CameraParameters,
}

// Manual impls: `C` itself need not be Clone or Copy.
impl<C> Clone for RenderJob<'_, C> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<C> Copy for RenderJob<'_, C> {}

/// Enumerate jobs: case, then modality, then view.
///
/// `modalities` is used in the order given; pass it through
/// [`RenderModality::canonical`] for the standard schedule.
pub fn plan_jobs<'a, C>(
    cases: &'a [C],
    modalities: &[RenderModality],
    cameras: &[&'a CameraParameters],
) -> Vec<RenderJob<'a, C>> {
    let mut jobs = Vec::with_capacity(cases.len() * modalities.len() * cameras.len());
    for case in cases {
        for &modality in modalities {
            for (view_index, &camera) in cameras.iter().enumerate() {
                jobs.push(RenderJob {
                    case,
                    modality,
                    view_index,
                    camera,
                });
            }
        }
    }
    jobs
}

// ============================================================================
// Progress
// ============================================================================

/// Format a duration as `MM:SS`, or `HH:MM:SS` from one hour on.
pub fn format_duration(duration: Duration) -> String {
    let secs = duration.as_secs();
    let (h, m, s) = (secs / 3600, (secs % 3600) / 60, secs % 60);
    if h > 0 {
        format!("{:02}:{:02}:{:02}", h, m, s)
    } else {
        format!("{:02}:{:02}", m, s)
    }
}

/// Job counters and remaining-time estimate for one run.
#[derive(Clone, Debug)]
pub struct ProgressTracker {
    total: usize,
    succeeded: usize,
    failed: usize,
    started: Instant,
}

impl ProgressTracker {
    pub fn new(total: usize) -> Self {
        Self {
            total,
            succeeded: 0,
            failed: 0,
            started: Instant::now(),
        }
    }

    pub fn record(&mut self, success: bool) {
        if success {
            self.succeeded += 1;
        } else {
            self.failed += 1;
        }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    /// Jobs attempted so far, failed ones included.
    pub fn completed(&self) -> usize {
        self.succeeded + self.failed
    }

    pub fn succeeded(&self) -> usize {
        self.succeeded
    }

    pub fn failed(&self) -> usize {
        self.failed
    }

    pub fn elapsed(&self) -> Duration {
        self.started.elapsed()
    }

    pub fn percent(&self) -> f64 {
        if self.total == 0 {
            100.0
        } else {
            self.completed() as f64 / self.total as f64 * 100.0
        }
    }

    /// `elapsed / completed * (total - completed)`; `None` before the first job.
    pub fn eta_at(&self, elapsed: Duration) -> Option<Duration> {
        let completed = self.completed();
        if completed == 0 {
            return None;
        }
        let remaining = self.total.saturating_sub(completed);
        Some(elapsed.div_f64(completed as f64).mul_f64(remaining as f64))
    }

    pub fn eta(&self) -> Option<Duration> {
        self.eta_at(self.elapsed())
    }
}

// ============================================================================
// Scheduler
// ============================================================================

/// A case that was not rendered.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SkippedCase {
    pub id: String,
    pub reason: String,
}

/// A job whose render or encode failed.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct JobFailure {
    pub case: String,
    pub modality: RenderModality,
    pub view: String,
    pub error: String,
}

/// Outcome of a scheduler run.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct BatchSummary {
    pub jobs_total: usize,
    pub jobs_completed: usize,
    pub jobs_failed: usize,
    pub cases_rendered: usize,
    pub skipped_cases: Vec<SkippedCase>,
    pub failures: Vec<JobFailure>,
    pub engine_switches: usize,
    pub elapsed: Duration,
}

/// Drives the pass executor over a dataset.
pub struct BatchScheduler<'a> {
    dataset: &'a Dataset,
    output_root: PathBuf,
    modalities: Vec<RenderModality>,
    cameras: Vec<&'a CameraParameters>,
    executor: PassExecutor<'a>,
}

impl<'a> BatchScheduler<'a> {
    /// Views come from the manifest in trajectory order, so poses whose
    /// cameras could not be derived are never rendered.
    pub fn new(
        dataset: &'a Dataset,
        output_root: impl Into<PathBuf>,
        modalities: &[RenderModality],
        manifest: &'a CameraManifest,
        executor: PassExecutor<'a>,
    ) -> Result<Self, BatchError> {
        let modalities = RenderModality::canonical(modalities);
        if modalities.is_empty() {
            return Err(BatchError::NoModalities);
        }
        let cameras: Vec<_> = manifest.ordered().collect();
        if cameras.is_empty() {
            return Err(BatchError::NoViews);
        }
        Ok(Self {
            dataset,
            output_root: output_root.into(),
            modalities,
            cameras,
            executor,
        })
    }

    pub fn modalities(&self) -> &[RenderModality] {
        &self.modalities
    }

    pub fn output_root(&self) -> &Path {
        &self.output_root
    }

    /// `cases x modalities x views`, fixed before the first job.
    pub fn total_jobs(&self) -> usize {
        self.dataset.len() * self.modalities.len() * self.cameras.len()
    }

    /// Every job of the run in execution order.
    pub fn plan(&self) -> Vec<RenderJob<'_, CaseEntry>> {
        plan_jobs(&self.dataset.cases, &self.modalities, &self.cameras)
    }

    /// Output file of a planned job.
    pub fn job_output(&self, job: &RenderJob<'_, CaseEntry>) -> PathBuf {
        output_path(
            &self.output_root,
            job.modality,
            &self.dataset.prefix,
            &job.case.id,
            &job.camera.view_name,
            self.executor.output_settings(job.modality).extension(),
        )
    }

    /// Render every case. Case-level problems are skipped and job failures
    /// are counted; neither stops the run.
    pub fn run<R: Renderer>(&self, ctx: &mut RenderContext<R>) -> Result<BatchSummary, BatchError> {
        let mut progress = ProgressTracker::new(self.total_jobs());
        let mut summary = BatchSummary {
            jobs_total: progress.total(),
            ..Default::default()
        };
        let switches_before = ctx.engine_switches();

        info!(
            "Rendering {} of {} cases: {} modalities x {} views = {} images",
            self.dataset.len(),
            self.dataset.total_cases,
            self.modalities.len(),
            self.cameras.len(),
            progress.total()
        );

        for (position, case) in self.dataset.cases.iter().enumerate() {
            let case_started = Instant::now();
            info!(
                "[{}/{}] Processing: {}",
                position + 1,
                self.dataset.len(),
                case.id
            );

            let mesh = match self.load_case(case) {
                Ok(mesh) => mesh,
                Err(reason) => {
                    warn!("Skipping case '{}': {}", case.id, reason);
                    summary.skipped_cases.push(SkippedCase {
                        id: case.id.clone(),
                        reason,
                    });
                    continue;
                }
            };
            if let Err(e) = ctx.load_mesh(&mesh) {
                warn!("Skipping case '{}': renderer rejected mesh: {}", case.id, e);
                summary.skipped_cases.push(SkippedCase {
                    id: case.id.clone(),
                    reason: e.to_string(),
                });
                continue;
            }

            self.render_case(ctx, case, &mesh, position, &mut progress, &mut summary);
            summary.cases_rendered += 1;
            info!(
                "  Case {} completed in {}",
                case.id,
                format_duration(case_started.elapsed())
            );
        }

        summary.jobs_completed = progress.succeeded();
        summary.jobs_failed = progress.failed();
        summary.engine_switches = ctx.engine_switches() - switches_before;
        summary.elapsed = progress.elapsed();
        info!(
            "Rendering finished in {}: {} images, {} failed, {} cases skipped",
            format_duration(summary.elapsed),
            summary.jobs_completed,
            summary.jobs_failed,
            summary.skipped_cases.len()
        );
        Ok(summary)
    }

    fn load_case(&self, case: &CaseEntry) -> Result<Mesh, String> {
        let (obj, labels) = case.inputs().map_err(|e| e.to_string())?;
        let mut mesh = Mesh::load_obj(obj).map_err(|e| e.to_string())?;
        let labels = VertexLabels::load(labels).map_err(|e| e.to_string())?;
        mesh.assign_polygon_classes(&labels)
            .map_err(|e| e.to_string())?;
        Ok(mesh)
    }

    fn render_case<R: Renderer>(
        &self,
        ctx: &mut RenderContext<R>,
        case: &CaseEntry,
        mesh: &Mesh,
        position: usize,
        progress: &mut ProgressTracker,
        summary: &mut BatchSummary,
    ) {
        let jobs = plan_jobs(std::slice::from_ref(case), &self.modalities, &self.cameras);
        let case_total = jobs.len();
        let mut case_done = 0;

        for (group_index, group) in jobs.chunk_by(|a, b| a.modality == b.modality).enumerate() {
            let modality = group[0].modality;
            for job in group {
                let request = PassRequest {
                    modality,
                    camera: job.camera,
                    mesh,
                    prefix: &self.dataset.prefix,
                    case_id: &case.id,
                    output_root: &self.output_root,
                };
                match self.executor.execute(ctx, &request) {
                    Ok(_) => progress.record(true),
                    Err(e) => {
                        warn!(
                            "{} {} {} failed: {}",
                            case.id, modality, job.camera.view_name, e
                        );
                        progress.record(false);
                        summary.failures.push(JobFailure {
                            case: case.id.clone(),
                            modality,
                            view: job.camera.view_name.clone(),
                            error: e.to_string(),
                        });
                    }
                }
                case_done += 1;

                let eta = progress
                    .eta()
                    .map(format_duration)
                    .unwrap_or_else(|| "--:--".to_string());
                info!(
                    "  [{}/{}] {} {}/{} | Case: {}/{} ({:.1}%) | Overall: {}/{} ({:.1}%) | ETA: {}",
                    position + 1,
                    self.dataset.len(),
                    modality,
                    job.view_index + 1,
                    self.cameras.len(),
                    case_done,
                    case_total,
                    case_done as f64 / case_total as f64 * 100.0,
                    progress.completed(),
                    progress.total(),
                    progress.percent(),
                    eta
                );
            }

            info!(
                "  [{}/{}] Completed {} rendering",
                group_index + 1,
                self.modalities.len(),
                modality.name().to_uppercase()
            );
            if ctx.resolve_engine(modality.preferred_engine()) == Engine::PathTracer {
                ctx.reclaim_memory();
            }
        }
    }
}
