//! The per-job culling operations.
//!
//! A frame typically looks like
//!
//! ```text
//! build_output -> bits_from_output -> result_from_bits -> (draw) -> result_client
//! ```
//!
//! with [`swap_bits`](CullingSystem::swap_bits) in between when the previous
//! result has to be kept around. [`TimingScheduler`](crate::frame::TimingScheduler)
//! strings these together for the supported timing modes.

use occlusion_types::{BitMode, CullMethod, View};

use crate::{
    bits,
    executor::{CommandExecutor, Stage},
    geometry,
    job::Job,
    scan::ScanEngine,
    CullError,
};

/// Records culling work for any number of jobs.
///
/// Holds no per-job state, so one system can serve every job of a scene.
#[derive(Debug, Default)]
pub struct CullingSystem {
    scan: ScanEngine,
}

impl CullingSystem {
    pub fn new() -> Self {
        Self { scan: ScanEngine::new() }
    }

    pub fn scan_engine(&self) -> &ScanEngine {
        &self.scan
    }

    /// Runs the geometry test `method` over every object of `job`.
    pub fn build_output<E: CommandExecutor + ?Sized>(&self, exec: &mut E, method: CullMethod, job: &Job, view: &View) {
        geometry::record(exec, method, job, view);
    }

    /// Packs the output of the last geometry test into the current bitset.
    pub fn bits_from_output<E: CommandExecutor + ?Sized>(&self, exec: &mut E, job: &Job, mode: BitMode) {
        bits::pack(exec, job, mode);
    }

    /// Hands the current bitset to the job's result consumer.
    pub fn result_from_bits<E: CommandExecutor + ?Sized>(&self, exec: &mut E, job: &mut Job) -> Result<(), CullError> {
        let bits = job.current_bits();
        let count = job.object_count();
        job.delivery.materialize(exec, &self.scan, bits, count)
    }

    /// Waits until the host can read the last delivered result.
    pub fn result_client<E: CommandExecutor + ?Sized>(&self, exec: &mut E, job: &mut Job) -> Result<(), CullError> {
        job.delivery.client_sync(exec)
    }

    /// Makes the current bitset the last one and vice versa. Nothing is copied.
    pub fn swap_bits(&self, job: &mut Job) {
        job.bits.swap();
    }

    /// Resets the temporal state of `job` after anything invalidated it.
    ///
    /// `last` becomes all invisible and `current` all visible, so the next
    /// delivery draws everything and the next temporal pass treats every
    /// object as newly visible. Fails without recording anything if a range
    /// of `job` is larger than the executor can bind.
    pub fn system_change<E: CommandExecutor + ?Sized>(&self, exec: &mut E, job: &mut Job) -> Result<(), CullError> {
        profiling::scope!("culling system change");

        job.check_bindings(exec.capabilities())?;
        log::debug!("resetting visibility state of {} objects", job.object_count());
        if job.bit_words() != 0 {
            exec.fill_buffer(job.last_bits(), 0);
            exec.fill_buffer(job.current_bits(), !0);
            exec.barrier(Stage::Transfer, Stage::Pack);
            exec.barrier(Stage::Transfer, Stage::Deliver);
        }
        let count = job.object_count();
        job.delivery.reset_host_bits(count);
        Ok(())
    }

    /// Test, pack and deliver in one go.
    pub fn cull<E: CommandExecutor + ?Sized>(
        &self,
        exec: &mut E,
        method: CullMethod,
        mode: BitMode,
        job: &mut Job,
        view: &View,
    ) -> Result<(), CullError> {
        self.build_output(exec, method, job, view);
        self.bits_from_output(exec, job, mode);
        self.result_from_bits(exec, job)
    }
}
