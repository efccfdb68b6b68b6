//! Frame pacing controller.
//!
//! Decides, once per host-loop invocation, how much simulation time the
//! engine may advance. The simulation runs in fixed steps; a step is granted
//! only when enough host time has accumulated, the step would not cross any
//! peer's validated horizon, and (if the local clock has drifted ahead of
//! the slowest peer's estimated present) a re-alignment pause is not due.
//! Re-alignment pauses are rate-limited so the simulation slows down smoothly
//! instead of micro-pausing every frame.

use tracing::trace;

use crate::{FrameDuration, GameTime, LockstepConfig};

/// Inputs the pacer evaluates for one decision.
#[derive(Debug, Copy, Clone)]
pub(crate) struct PacingInputs {
    /// Host requested an explicit pause.
    pub paused: bool,
    /// Gameplay time at the end of the last executed step.
    pub current_time: GameTime,
    /// The slowest remote peer's estimated present gameplay time
    /// (`current_time` + one step when there are no remote peers).
    pub target_time: GameTime,
    /// Minimum validated horizon over all remote peers (`+inf` without
    /// remote peers).
    pub synchronized_until: GameTime,
}

/// Accumulator state for the pacing decision.
#[derive(Debug, Default)]
pub(crate) struct Pacer {
    time_since_progress: FrameDuration,
    last_paused_on: GameTime,
}

impl Pacer {
    pub(crate) fn new() -> Self {
        Self::default()
    }

    /// Returns the simulation advance for this host tick: one fixed step or
    /// zero.
    pub(crate) fn adjust(
        &mut self,
        target_delta: FrameDuration,
        config: &LockstepConfig,
        inputs: PacingInputs,
    ) -> FrameDuration {
        self.time_since_progress += target_delta;

        let step = if inputs.paused {
            0.0
        } else {
            config.fixed_delta_time_seconds
        };

        if self.time_since_progress < step {
            return 0.0;
        }

        let next_time = inputs.current_time + step;

        if step > 0.0 && next_time > inputs.synchronized_until {
            trace!(
                "pacer stall: next {} would cross horizon {}",
                next_time,
                inputs.synchronized_until
            );
            return 0.0;
        }

        if step > 0.0
            && next_time > inputs.target_time + config.fixed_delta_time_seconds
            && (inputs.current_time - self.last_paused_on)
                > config.min_pause_delay_on_slow_adjust
        {
            trace!(
                "pacer slow-adjust: next {} ahead of target {}",
                next_time,
                inputs.target_time
            );
            return 0.0;
        }

        self.time_since_progress -= step;
        step
    }

    /// Records that the engine stalled at `current_time`; arms the
    /// slow-adjust hysteresis.
    pub(crate) fn note_stall(&mut self, current_time: GameTime) {
        self.last_paused_on = current_time;
    }
}

// #########
// # TESTS #
// #########

#[cfg(test)]
mod pacer_tests {
    use super::*;

    const DELTA: f64 = 1.0 / 30.0;

    fn free_run(current_time: GameTime) -> PacingInputs {
        PacingInputs {
            paused: false,
            current_time,
            target_time: current_time + DELTA,
            synchronized_until: f64::INFINITY,
        }
    }

    #[test]
    fn grants_fixed_step_when_enough_time_accumulated() {
        let mut pacer = Pacer::new();
        let config = LockstepConfig::default();
        let granted = pacer.adjust(DELTA, &config, free_run(0.0));
        assert_eq!(granted, DELTA);
    }

    #[test]
    fn withholds_step_until_accumulator_fills() {
        let mut pacer = Pacer::new();
        let config = LockstepConfig::default();
        // Host runs at 120 fps: every fourth call grants a 30 Hz step.
        let mut grants = 0;
        for _ in 0..8 {
            if pacer.adjust(DELTA / 4.0, &config, free_run(0.0)) > 0.0 {
                grants += 1;
            }
        }
        assert_eq!(grants, 2);
    }

    #[test]
    fn paused_never_advances_and_keeps_accumulating() {
        let mut pacer = Pacer::new();
        let config = LockstepConfig::default();
        for _ in 0..10 {
            let granted = pacer.adjust(
                DELTA,
                &config,
                PacingInputs {
                    paused: true,
                    ..free_run(0.0)
                },
            );
            assert_eq!(granted, 0.0);
        }
        // Unpausing grants immediately: the accumulator filled during pause.
        assert_eq!(pacer.adjust(0.0, &config, free_run(0.0)), DELTA);
    }

    #[test]
    fn never_crosses_the_synchronization_horizon() {
        let mut pacer = Pacer::new();
        let config = LockstepConfig::default();
        let inputs = PacingInputs {
            paused: false,
            current_time: 0.5,
            target_time: 1.0,
            synchronized_until: 0.5,
        };
        assert_eq!(pacer.adjust(DELTA, &config, inputs), 0.0);
    }

    #[test]
    fn step_exactly_reaching_the_horizon_is_allowed() {
        let mut pacer = Pacer::new();
        let config = LockstepConfig::default();
        let inputs = PacingInputs {
            paused: false,
            current_time: 0.5 - DELTA,
            target_time: 1.0,
            synchronized_until: 0.5,
        };
        assert_eq!(pacer.adjust(DELTA, &config, inputs), DELTA);
    }

    #[test]
    fn slow_adjust_pause_requires_hysteresis_window() {
        let mut pacer = Pacer::new();
        let config = LockstepConfig::default();
        // Far ahead of the slowest peer, and the last pause was long ago.
        let inputs = PacingInputs {
            paused: false,
            current_time: 5.0,
            target_time: 4.0,
            synchronized_until: f64::INFINITY,
        };
        assert_eq!(pacer.adjust(DELTA, &config, inputs), 0.0);

        // A recent stall suppresses the re-alignment pause.
        pacer.note_stall(5.0);
        let mut pacer_inputs = inputs;
        pacer_inputs.current_time = 5.5;
        pacer_inputs.target_time = 4.5;
        assert_eq!(pacer.adjust(DELTA, &config, pacer_inputs), DELTA);
    }
}
