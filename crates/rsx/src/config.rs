//! Runtime configuration, read once at startup and shared read-only
//! thereafter.

#[derive(Debug, Clone)]
pub struct Environment {
    pub thread_scheduler_enabled: bool,
    pub frame_skip_enabled: bool,
    pub consecutive_frames_to_draw: u32,
    pub consecutive_frames_to_skip: u32,
    pub disable_zcull_queries: bool,
    pub min_scalable_dimension: u32,
    pub resolution_scale: f32,
}

impl Default for Environment {
    fn default() -> Self {
        Self {
            thread_scheduler_enabled: true,
            frame_skip_enabled: false,
            consecutive_frames_to_draw: 1,
            consecutive_frames_to_skip: 0,
            disable_zcull_queries: false,
            min_scalable_dimension: 16,
            resolution_scale: 1.0,
        }
    }
}
