use std::time::Duration;

use occlusion_types::{CullMethod, ResultTiming};
use serde::{Deserialize, Serialize};

/// Settings shared by every job of a [`TimingScheduler`](crate::frame::TimingScheduler).
///
/// Changing any of them invalidates the temporal state of all jobs.
#[derive(Debug, Copy, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CullingOptions {
    pub method: CullMethod,
    pub timing: ResultTiming,
    /// Upper bound of every fence wait. Expiry is treated as device loss.
    pub fence_timeout: Duration,
    /// Slots of a fenced readback, at least 2.
    pub readback_slots: usize,
    /// Screen-size cull threshold in pixels, 0 disables it. Takes precedence
    /// over the threshold of the views handed to the scheduler.
    pub min_pixel_size: f32,
}

impl Default for CullingOptions {
    fn default() -> Self {
        Self {
            method: CullMethod::Frustum,
            timing: ResultTiming::RegularCurrent,
            fence_timeout: Duration::from_secs(5),
            readback_slots: 2,
            min_pixel_size: 0.0,
        }
    }
}

#[cfg(test)]
mod test {
    use std::time::Duration;

    use occlusion_types::CullMethod;

    use super::CullingOptions;

    #[test]
    fn partial_options_use_defaults() {
        let options: CullingOptions = serde_json::from_str(r#"{ "method": "HiZ", "min_pixel_size": 1.5 }"#).unwrap();
        assert_eq!(options.method, CullMethod::HiZ);
        assert_eq!(options.min_pixel_size, 1.5);
        assert_eq!(options.fence_timeout, Duration::from_secs(5));
        assert_eq!(options.readback_slots, 2);
    }
}
