use std::time::{Duration, Instant};

use flume::{Receiver, TryRecvError};
use occlusion::CullError;
use wgpu::{Buffer, Device, Maintain, MapMode, Queue};

/// Signals once the work submitted before its creation completes.
pub(super) struct Fence {
    signaled: Receiver<()>,
    done: bool,
}

impl Fence {
    pub fn new(queue: &Queue) -> Self {
        let (sender, receiver) = flume::bounded(1);
        queue.on_submitted_work_done(move || {
            // The fence may already be deleted.
            let _ = sender.send(());
        });
        Self {
            signaled: receiver,
            done: false,
        }
    }

    pub fn wait(&mut self, device: &Device, timeout: Duration) -> Result<(), CullError> {
        profiling::scope!("wait fence");

        if !self.done {
            poll_until(device, &self.signaled, timeout)?;
            self.done = true;
        }
        Ok(())
    }
}

/// Polls `device` until `receiver` yields a value, for at most `timeout`.
///
/// A dropped sender means wgpu discarded the callback, which only happens when the device is gone.
fn poll_until<T>(device: &Device, receiver: &Receiver<T>, timeout: Duration) -> Result<T, CullError> {
    let deadline = Instant::now() + timeout;
    loop {
        device.poll(Maintain::Poll);
        match receiver.try_recv() {
            Ok(value) => return Ok(value),
            Err(TryRecvError::Disconnected) => return Err(CullError::DeviceLost),
            Err(TryRecvError::Empty) if Instant::now() >= deadline => {
                log::error!("device did not answer within {:?}", timeout);
                return Err(CullError::FenceTimeout { timeout });
            }
            Err(TryRecvError::Empty) => std::thread::yield_now(),
        }
    }
}

/// Maps the first `size` bytes of `staging` once the device is done writing it and copies them out.
///
/// Only submitted work can complete, anything still recorded has to be submitted first.
pub(super) fn map_read(device: &Device, staging: &Buffer, size: u64, timeout: Duration) -> Result<Vec<u32>, CullError> {
    profiling::scope!("map staging");

    if size == 0 {
        return Ok(Vec::new());
    }
    let slice = staging.slice(..size);
    let (sender, receiver) = flume::bounded(1);
    slice.map_async(MapMode::Read, move |result| {
        let _ = sender.send(result);
    });

    match poll_until(device, &receiver, timeout) {
        Ok(Ok(())) => {}
        Ok(Err(err)) => return Err(CullError::Map { reason: err.to_string() }),
        Err(err) => {
            // Aborts the pending map so the buffer stays usable.
            staging.unmap();
            return Err(err);
        }
    }
    let words = {
        let mapped = slice.get_mapped_range();
        bytemuck::pod_collect_to_vec(&mapped[..])
    };
    staging.unmap();
    Ok(words)
}
