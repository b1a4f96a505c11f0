/// Host transport as handed to `process` each cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct TransportInfo {
    pub transport_sample: usize,
    pub playing: bool,
    pub recording: bool,
    pub loop_enabled: bool,
    pub loop_range_samples: Option<(usize, usize)>,
    pub bpm: f64,
    pub tsig_num: u16,
    pub tsig_denom: u16,
}

/// `ProcessContext::StatesAndFlags` bit values.
pub mod state_flags {
    pub const PLAYING: u32 = 1 << 1;
    pub const CYCLE_ACTIVE: u32 = 1 << 2;
    pub const RECORDING: u32 = 1 << 3;
    pub const PROJECT_TIME_MUSIC_VALID: u32 = 1 << 9;
    pub const TEMPO_VALID: u32 = 1 << 10;
    pub const BAR_POSITION_VALID: u32 = 1 << 11;
    pub const CYCLE_VALID: u32 = 1 << 12;
    pub const TIME_SIG_VALID: u32 = 1 << 13;
    pub const CONT_TIME_VALID: u32 = 1 << 17;
}

/// Timing state the plugin sees for exactly one cycle.
#[derive(Clone, Copy, Debug, Default, PartialEq)]
pub struct ProcessContext {
    pub state: u32,
    pub sample_rate: f64,
    pub project_time_samples: i64,
    pub continuous_time_samples: i64,
    /// Quarter notes since project start.
    pub project_time_music: f64,
    pub bar_position_music: f64,
    pub cycle_start_music: f64,
    pub cycle_end_music: f64,
    pub tempo: f64,
    pub time_sig_numerator: i32,
    pub time_sig_denominator: i32,
}

impl ProcessContext {
    /// Rewrites every field from `transport`. `continuous_samples` is the
    /// bridge's own running sample counter, independent of locates.
    pub fn update(&mut self, transport: &TransportInfo, sample_rate: f64, continuous_samples: i64) {
        let bpm = if transport.bpm > 0.0 { transport.bpm } else { 120.0 };
        let sample_rate = sample_rate.max(1.0);
        let quarters_per_sample = bpm / 60.0 / sample_rate;
        let beats = transport.transport_sample as f64 * quarters_per_sample;

        let mut state = state_flags::PROJECT_TIME_MUSIC_VALID
            | state_flags::TEMPO_VALID
            | state_flags::BAR_POSITION_VALID
            | state_flags::TIME_SIG_VALID
            | state_flags::CONT_TIME_VALID;
        if transport.playing {
            state |= state_flags::PLAYING;
        }
        if transport.recording {
            state |= state_flags::RECORDING;
        }

        let (cycle_start, cycle_end) = match transport.loop_range_samples {
            Some((start, end)) if transport.loop_enabled && end > start => {
                state |= state_flags::CYCLE_ACTIVE | state_flags::CYCLE_VALID;
                (
                    start as f64 * quarters_per_sample,
                    end as f64 * quarters_per_sample,
                )
            }
            _ => (0.0, 0.0),
        };

        // An unset signature reads as common time.
        let (ts_num, ts_denom) = match (transport.tsig_num, transport.tsig_denom) {
            (0, _) | (_, 0) => (4, 4),
            signature => signature,
        };
        let beats_per_bar = f64::from(ts_num) * (4.0 / f64::from(ts_denom));
        let bar_number = (beats / beats_per_bar).floor().max(0.0);

        *self = Self {
            state,
            sample_rate,
            project_time_samples: transport.transport_sample as i64,
            continuous_time_samples: continuous_samples,
            project_time_music: beats,
            bar_position_music: bar_number * beats_per_bar,
            cycle_start_music: cycle_start,
            cycle_end_music: cycle_end,
            tempo: bpm,
            time_sig_numerator: i32::from(ts_num),
            time_sig_denominator: i32::from(ts_denom),
        };
    }

    pub fn is_playing(&self) -> bool {
        self.state & state_flags::PLAYING != 0
    }
}
