//! When in a frame visibility is computed relative to drawing.
//!
//! The scheduler only orders work; all drawing is done by the consumer
//! through [`SceneDrawer`].

use occlusion_types::{BitMode, CullMethod, ResultTiming, View};

use crate::{
    culling::CullingSystem,
    executor::{CommandExecutor, Stage},
    hi_z,
    job::Job,
    options::CullingOptions,
    CullError,
};

/// What the consumer is asked to draw.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash)]
pub enum DrawPass {
    /// Depth of the objects passing the frustum test, for the depth based tests to cull against.
    DepthPrepass,
    /// The visible set.
    Scene,
    /// Objects that were visible last frame.
    TemporalLast,
    /// Objects that became visible this frame.
    TemporalNew,
}

/// Draws a job's delivered result.
///
/// Called after the job's result was delivered and synchronized. Passes that
/// feed the depth based tests must write the depth of `job.depth` level 0.
pub trait SceneDrawer<E: CommandExecutor + ?Sized> {
    fn draw(&mut self, exec: &mut E, job: &Job, pass: DrawPass) -> Result<(), CullError>;
}

impl<E, F> SceneDrawer<E> for F
where
    E: CommandExecutor + ?Sized,
    F: FnMut(&mut E, &Job, DrawPass) -> Result<(), CullError>,
{
    fn draw(&mut self, exec: &mut E, job: &Job, pass: DrawPass) -> Result<(), CullError> {
        self(exec, job, pass)
    }
}

/// Runs one frame of a job in the configured [`ResultTiming`].
#[derive(Debug)]
pub struct TimingScheduler {
    options: CullingOptions,
    culling: CullingSystem,
    pending_change: bool,
    frame_index: u64,
}

impl TimingScheduler {
    pub fn new(options: CullingOptions) -> Self {
        Self {
            options,
            culling: CullingSystem::new(),
            pending_change: true,
            frame_index: 0,
        }
    }

    pub fn options(&self) -> &CullingOptions {
        &self.options
    }

    pub fn culling(&self) -> &CullingSystem {
        &self.culling
    }

    /// Replaces the options. Any difference resets the temporal state of the
    /// jobs at the start of the next frame.
    pub fn set_options(&mut self, options: CullingOptions) {
        if options != self.options {
            log::debug!("culling options changed from {:?} to {:?}", self.options, options);
            self.options = options;
            self.pending_change = true;
        }
    }

    /// Forces a temporal reset at the start of the next frame.
    pub fn invalidate(&mut self) {
        self.pending_change = true;
    }

    /// The timing actually used for `method`. Frustum culling has no depth to
    /// be temporal about and runs regularly.
    pub fn effective_timing(&self) -> ResultTiming {
        match (self.options.method, self.options.timing) {
            (CullMethod::Frustum, ResultTiming::TemporalCurrent) => ResultTiming::RegularCurrent,
            (_, timing) => timing,
        }
    }

    /// Culls and draws one frame of `job` as seen from `view`.
    ///
    /// `view.min_pixel_size` is ignored, the threshold always comes from
    /// [`CullingOptions::min_pixel_size`].
    ///
    /// # Panics
    ///
    /// Panics if a depth based method is configured and `job` has no depth pyramid.
    pub fn frame<E, D>(&mut self, exec: &mut E, job: &mut Job, view: &View, drawer: &mut D) -> Result<(), CullError>
    where
        E: CommandExecutor + ?Sized,
        D: SceneDrawer<E> + ?Sized,
    {
        profiling::scope!("culling frame");

        let method = self.options.method;
        assert!(
            method == CullMethod::Frustum || job.depth.is_some(),
            "{:?} culling needs a depth pyramid",
            method
        );
        let view = View {
            min_pixel_size: self.options.min_pixel_size,
            ..*view
        };

        if self.pending_change {
            self.culling.system_change(exec, job)?;
            self.pending_change = false;
        }

        let timing = self.effective_timing();
        log::trace!("frame {} with {:?} culling, {:?} timing", self.frame_index, method, timing);
        self.frame_index += 1;

        let culling = &self.culling;
        match timing {
            ResultTiming::RegularCurrent => {
                if method != CullMethod::Frustum {
                    culling.cull(exec, CullMethod::Frustum, BitMode::Current, job, &view)?;
                    culling.result_client(exec, job)?;
                    drawer.draw(exec, job, DrawPass::DepthPrepass)?;
                    prepare_depth(exec, method, job);
                }
                culling.cull(exec, method, BitMode::Current, job, &view)?;
                culling.result_client(exec, job)?;
                drawer.draw(exec, job, DrawPass::Scene)?;
            }
            ResultTiming::RegularLastFrame => {
                culling.result_from_bits(exec, job)?;
                culling.result_client(exec, job)?;
                drawer.draw(exec, job, DrawPass::Scene)?;
                prepare_depth(exec, method, job);
                culling.build_output(exec, method, job, &view);
                culling.bits_from_output(exec, job, BitMode::Current);
            }
            ResultTiming::TemporalCurrent => {
                culling.result_from_bits(exec, job)?;
                culling.swap_bits(job);
                culling.result_client(exec, job)?;
                drawer.draw(exec, job, DrawPass::TemporalLast)?;
                prepare_depth(exec, method, job);

                culling.build_output(exec, method, job, &view);
                culling.bits_from_output(exec, job, BitMode::CurrentAndNotLast);
                culling.result_from_bits(exec, job)?;
                culling.result_client(exec, job)?;
                drawer.draw(exec, job, DrawPass::TemporalNew)?;

                // The delivery above read the current bits.
                exec.barrier(Stage::Draw, Stage::Pack);
                culling.bits_from_output(exec, job, BitMode::Current);
            }
        }
        Ok(())
    }
}

/// Makes the depth drawn so far readable by the depth based tests.
fn prepare_depth<E: CommandExecutor + ?Sized>(exec: &mut E, method: CullMethod, job: &Job) {
    match (method, &job.depth) {
        (CullMethod::HiZ, Some(depth)) => hi_z::build_mips(exec, depth),
        (CullMethod::Raster, Some(_)) => exec.barrier(Stage::Draw, Stage::Test),
        _ => {}
    }
}
