//! TickScheduler: the fixed, ordered list of tick sections and their rates.

use crate::config::Config;
use serde::Serialize;
use std::time::Duration;

/// Tick sections in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum SectionId {
    SyncState,
    Scripts,
    Subscriptions,
    CreatureStates,
    Stairs,
    Growth,
    Time,
    Hunger,
    Autosave,
    Messages,
    Flush,
    Performance,
}

impl SectionId {
    pub const ORDER: [SectionId; 12] = [
        SectionId::SyncState,
        SectionId::Scripts,
        SectionId::Subscriptions,
        SectionId::CreatureStates,
        SectionId::Stairs,
        SectionId::Growth,
        SectionId::Time,
        SectionId::Hunger,
        SectionId::Autosave,
        SectionId::Messages,
        SectionId::Flush,
        SectionId::Performance,
    ];

    pub fn description(self) -> &'static str {
        match self {
            SectionId::SyncState => "install finished sector loads and drop closed connections",
            SectionId::Scripts => "run scripts",
            SectionId::Subscriptions => "update creature subscriptions",
            SectionId::CreatureStates => "advance creature behaviour",
            SectionId::Stairs => "stairs and warps",
            SectionId::Growth => "grow items",
            SectionId::Time => "broadcast world time",
            SectionId::Hunger => "hunger",
            SectionId::Autosave => "save the world",
            SectionId::Messages => "process client messages",
            SectionId::Flush => "flush outbound messages",
            SectionId::Performance => "timing summary",
        }
    }

    fn index(self) -> usize {
        self as usize
    }
}

/// How a section invocation ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SectionStatus {
    Done,
    /// The section has more work and runs again next tick regardless of its rate.
    Yielded,
}

#[derive(Debug, Clone, Copy, Default)]
struct SectionTiming {
    runs: u64,
    total: Duration,
    max: Duration,
}

#[derive(Debug, Clone)]
struct Section {
    /// Run at most once every `period` ticks. Zero disables the section.
    period: u64,
    last_run: Option<u64>,
    resume: bool,
    timing: SectionTiming,
}

/// Timing digest over one reporting window.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct PerfSummary {
    pub ticks: u64,
    pub ticks_per_sec: f64,
    pub avg_tick_ms: f64,
    pub max_tick_ms: f64,
    pub longest_tick: u64,
    /// Slowest section by accumulated time in the window.
    pub slowest_section: Option<String>,
}

#[derive(Debug)]
pub struct TickScheduler {
    sections: Vec<Section>,
    tick_interval: Duration,
    window_ticks: u64,
    window_total: Duration,
    window_max: Duration,
    longest_tick: u64,
}

impl TickScheduler {
    pub fn new(config: &Config) -> Self {
        let every_tick = 1;
        let minute = config.ticks_for_secs(60);
        let sections = SectionId::ORDER
            .iter()
            .map(|section| {
                let period = match section {
                    SectionId::Growth => config.ticks_for_secs(config.world.seconds_per_world_tick as u64),
                    SectionId::Time | SectionId::Hunger => minute,
                    SectionId::Autosave if config.server.autosave_secs == 0 => 0,
                    SectionId::Autosave => config.ticks_for_secs(config.server.autosave_secs),
                    SectionId::Performance => config.ticks_for_secs(10),
                    _ => every_tick,
                };
                Section {
                    period,
                    last_run: None,
                    resume: false,
                    timing: SectionTiming::default(),
                }
            })
            .collect();

        Self {
            sections,
            tick_interval: Duration::from_millis(config.server.tick_interval_ms.max(1)),
            window_ticks: 0,
            window_total: Duration::ZERO,
            window_max: Duration::ZERO,
            longest_tick: 0,
        }
    }

    pub fn period(&self, section: SectionId) -> u64 {
        self.sections[section.index()].period
    }

    /// Whether `section` should run on `tick`. Rated sections are due on
    /// their first tick and then every `period` ticks; a yielded section is
    /// always due.
    pub fn due(&self, section: SectionId, tick: u64) -> bool {
        let state = &self.sections[section.index()];
        if state.resume {
            return true;
        }
        if state.period == 0 {
            return false;
        }
        match state.last_run {
            None => state.period == 1 || tick >= state.period,
            Some(last) => tick.saturating_sub(last) >= state.period,
        }
    }

    /// Record a run. The rate clock only restarts when a section begins a
    /// fresh run, not when it resumes a yielded one.
    pub fn record(&mut self, section: SectionId, tick: u64, status: SectionStatus, elapsed: Duration) {
        let state = &mut self.sections[section.index()];
        if !state.resume {
            state.last_run = Some(tick);
        }
        state.resume = status == SectionStatus::Yielded;
        state.timing.runs += 1;
        state.timing.total += elapsed;
        state.timing.max = state.timing.max.max(elapsed);
    }

    pub fn record_tick(&mut self, tick: u64, elapsed: Duration) {
        self.window_ticks += 1;
        self.window_total += elapsed;
        if elapsed > self.window_max {
            self.window_max = elapsed;
            self.longest_tick = tick;
        }
    }

    /// Summarise and reset the current window.
    pub fn take_summary(&mut self) -> Option<PerfSummary> {
        if self.window_ticks == 0 {
            return None;
        }
        let ticks = self.window_ticks;
        let window_secs = (self.tick_interval * ticks as u32).as_secs_f64();
        let slowest_section = SectionId::ORDER
            .iter()
            .zip(&self.sections)
            .filter(|(_, s)| s.timing.runs > 0)
            .max_by_key(|(_, s)| s.timing.total)
            .map(|(id, _)| format!("{:?}", id));

        let summary = PerfSummary {
            ticks,
            ticks_per_sec: if window_secs > 0.0 { ticks as f64 / window_secs } else { 0.0 },
            avg_tick_ms: self.window_total.as_secs_f64() * 1000.0 / ticks as f64,
            max_tick_ms: self.window_max.as_secs_f64() * 1000.0,
            longest_tick: self.longest_tick,
            slowest_section,
        };

        self.window_ticks = 0;
        self.window_total = Duration::ZERO;
        self.window_max = Duration::ZERO;
        for section in &mut self.sections {
            section.timing = SectionTiming::default();
        }
        Some(summary)
    }
}
