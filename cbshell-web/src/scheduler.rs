use crate::error::ShellError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    Unstarted,
    WaitingForEngine,
    Running,
    Paused,
}

/// What to do with one host animation frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TickDecision {
    /// Engine not ready yet; nothing to draw.
    Idle,
    Paused,
    /// The previous draw is still in flight.
    Dropped,
    Run,
}

/// Outcome reported by the renderer for one draw.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DrawStatus {
    Completed,
    /// Acknowledged later through [`FrameScheduler::acknowledge_draw`].
    Pending,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameStats {
    pub ticks_run: u64,
    pub ticks_dropped: u64,
    pub ticks_paused: u64,
    pub ticks_idle: u64,
}

/// Gates the per-frame tick on engine readiness, the rendering toggle and
/// draw acknowledgement.
#[derive(Debug, Clone)]
pub struct FrameScheduler {
    state: SchedulerState,
    draw_in_flight: bool,
    stats: FrameStats,
}

impl Default for FrameScheduler {
    fn default() -> Self {
        Self {
            state: SchedulerState::Unstarted,
            draw_in_flight: false,
            stats: FrameStats::default(),
        }
    }
}

impl FrameScheduler {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn state(&self) -> SchedulerState {
        self.state
    }

    pub fn stats(&self) -> FrameStats {
        self.stats
    }

    pub fn draw_in_flight(&self) -> bool {
        self.draw_in_flight
    }

    pub fn mount(&mut self) -> Result<(), ShellError> {
        self.transition(SchedulerState::Unstarted, SchedulerState::WaitingForEngine, "mount")
    }

    pub fn engine_ready(&mut self) -> Result<(), ShellError> {
        self.transition(SchedulerState::WaitingForEngine, SchedulerState::Running, "start")
    }

    fn transition(
        &mut self,
        from: SchedulerState,
        to: SchedulerState,
        event: &'static str,
    ) -> Result<(), ShellError> {
        if self.state != from {
            return Err(ShellError::InvalidTransition {
                from: self.state,
                event,
            });
        }
        log::info!("Frame scheduler: {from:?} -> {to:?}");
        self.state = to;
        Ok(())
    }

    /// Decide the fate of one animation frame. Called exactly once per host
    /// frame; nothing carries over between calls.
    pub fn begin_tick(&mut self, rendering_enabled: bool) -> TickDecision {
        match (self.state, rendering_enabled) {
            (SchedulerState::Unstarted | SchedulerState::WaitingForEngine, _) => {
                self.stats.ticks_idle += 1;
                TickDecision::Idle
            }
            (SchedulerState::Running, false) => {
                log::info!("Rendering paused");
                self.state = SchedulerState::Paused;
                self.stats.ticks_paused += 1;
                TickDecision::Paused
            }
            (SchedulerState::Paused, false) => {
                self.stats.ticks_paused += 1;
                TickDecision::Paused
            }
            (SchedulerState::Running | SchedulerState::Paused, true) => {
                if self.state == SchedulerState::Paused {
                    log::info!("Rendering resumed");
                    self.state = SchedulerState::Running;
                }
                if self.draw_in_flight {
                    log::debug!("Dropping tick, previous draw not acknowledged");
                    self.stats.ticks_dropped += 1;
                    TickDecision::Dropped
                } else {
                    self.stats.ticks_run += 1;
                    TickDecision::Run
                }
            }
        }
    }

    pub fn draw_issued(&mut self, status: DrawStatus) {
        self.draw_in_flight = status == DrawStatus::Pending;
    }

    pub fn acknowledge_draw(&mut self) {
        self.draw_in_flight = false;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn running() -> FrameScheduler {
        let mut scheduler = FrameScheduler::new();
        scheduler.mount().unwrap();
        scheduler.engine_ready().unwrap();
        scheduler
    }

    // ── transitions ──

    #[test]
    fn test_idle_until_engine_ready() {
        let mut scheduler = FrameScheduler::new();
        assert_eq!(scheduler.begin_tick(true), TickDecision::Idle);
        scheduler.mount().unwrap();
        for _ in 0..5 {
            assert_eq!(scheduler.begin_tick(true), TickDecision::Idle);
        }
        assert_eq!(scheduler.stats().ticks_run, 0);
        scheduler.engine_ready().unwrap();
        assert_eq!(scheduler.begin_tick(true), TickDecision::Run);
    }

    #[test]
    fn test_engine_ready_only_once() {
        let mut scheduler = running();
        let err = scheduler.engine_ready().unwrap_err();
        assert_eq!(
            err,
            ShellError::InvalidTransition {
                from: SchedulerState::Running,
                event: "start"
            }
        );
    }

    #[test]
    fn test_engine_ready_before_mount_rejected() {
        let mut scheduler = FrameScheduler::new();
        assert!(scheduler.engine_ready().is_err());
        assert_eq!(scheduler.state(), SchedulerState::Unstarted);
    }

    // ── pause ──

    #[test]
    fn test_pause_then_resume_without_backlog() {
        let mut scheduler = running();
        for _ in 0..10 {
            assert_eq!(scheduler.begin_tick(false), TickDecision::Paused);
        }
        assert_eq!(scheduler.state(), SchedulerState::Paused);
        assert_eq!(scheduler.begin_tick(true), TickDecision::Run);
        assert_eq!(scheduler.state(), SchedulerState::Running);
        let stats = scheduler.stats();
        assert_eq!(stats.ticks_run, 1);
        assert_eq!(stats.ticks_paused, 10);
    }

    // ── draw acknowledgement ──

    #[test]
    fn test_pending_draw_drops_ticks() {
        let mut scheduler = running();
        assert_eq!(scheduler.begin_tick(true), TickDecision::Run);
        scheduler.draw_issued(DrawStatus::Pending);
        assert_eq!(scheduler.begin_tick(true), TickDecision::Dropped);
        assert_eq!(scheduler.begin_tick(true), TickDecision::Dropped);
        scheduler.acknowledge_draw();
        assert_eq!(scheduler.begin_tick(true), TickDecision::Run);
        assert_eq!(scheduler.stats().ticks_dropped, 2);
        assert_eq!(scheduler.stats().ticks_run, 2);
    }

    #[test]
    fn test_completed_draw_never_drops() {
        let mut scheduler = running();
        for _ in 0..3 {
            assert_eq!(scheduler.begin_tick(true), TickDecision::Run);
            scheduler.draw_issued(DrawStatus::Completed);
        }
        assert!(!scheduler.draw_in_flight());
    }
}
