//! Measurement collection and `RESULT` output.
//!
//! Counters and phase timers accumulate on every rank; `write_on_root`
//! prints one space-separated `RESULT key=value` line per record on rank 0.

use std::time::Instant;

use mpi::traits::Communicator;

/// One measurement record.
#[derive(Clone, Debug)]
struct Record {
    phase: String,
    counter_per_phase: u64,
    round: u64,
    description: String,
    value: u64,
}

/// Accumulates counters and timings for one sorting run.
#[derive(Default)]
pub struct MeasuringTool {
    prefix: String,
    enabled: bool,
    verbose: bool,
    phase: String,
    round: u64,
    records: Vec<Record>,
    running: Vec<(String, Instant)>,
}

impl MeasuringTool {
    /// An enabled tool with an empty prefix.
    pub fn new() -> Self {
        Self {
            enabled: true,
            phase: "none".to_string(),
            ..Default::default()
        }
    }

    /// Set the `RESULT` line prefix, e.g. `num_procs=4 iteration=0`.
    pub fn set_prefix(&mut self, prefix: impl Into<String>) {
        self.prefix = prefix.into();
    }

    /// Echo records to stderr as they are taken.
    pub fn set_verbose(&mut self, verbose: bool) {
        self.verbose = verbose;
    }

    /// Name the current phase.
    pub fn set_phase(&mut self, phase: impl Into<String>) {
        self.phase = phase.into();
    }

    /// Name the current round.
    pub fn set_round(&mut self, round: u64) {
        self.round = round;
    }

    /// Resume recording.
    pub fn enable(&mut self) {
        self.enabled = true;
    }

    /// Stop recording; add/start/stop become no-ops.
    pub fn disable(&mut self) {
        self.enabled = false;
    }

    /// Record a counter value.
    pub fn add(&mut self, value: u64, description: &str) {
        if !self.enabled {
            return;
        }
        self.push(description, value);
    }

    /// Start a phase timer.
    pub fn start(&mut self, description: &str) {
        if !self.enabled {
            return;
        }
        self.running.push((description.to_string(), Instant::now()));
    }

    /// Stop the innermost timer with this description and record the
    /// elapsed nanoseconds.
    pub fn stop(&mut self, description: &str) {
        if !self.enabled {
            return;
        }
        let position = self
            .running
            .iter()
            .rposition(|(running, _)| running == description);
        if let Some(position) = position {
            let (_, started) = self.running.remove(position);
            let elapsed = started.elapsed().as_nanos() as u64;
            self.push(description, elapsed);
        }
    }

    fn push(&mut self, description: &str, value: u64) {
        let counter_per_phase = self
            .records
            .iter()
            .filter(|r| r.phase == self.phase && r.description == description)
            .count() as u64;
        let record = Record {
            phase: self.phase.clone(),
            counter_per_phase,
            round: self.round,
            description: description.to_string(),
            value,
        };
        if self.verbose {
            eprintln!(
                "phase={} round={} description={} value={}",
                record.phase, record.round, record.description, record.value
            );
        }
        self.records.push(record);
    }

    /// Print every record as a `RESULT` line on rank 0 of `comm`.
    pub fn write_on_root<C: Communicator>(&self, comm: &C) {
        if comm.rank() != 0 {
            return;
        }
        for record in &self.records {
            println!(
                "RESULT {} phase={} counter_per_phase={} round={} description={} value={}",
                self.prefix,
                record.phase,
                record.counter_per_phase,
                record.round,
                record.description,
                record.value
            );
        }
    }

    /// Drop all records and timers; the prefix stays.
    pub fn reset(&mut self) {
        self.records.clear();
        self.running.clear();
        self.phase = "none".to_string();
        self.round = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_increment_per_phase() {
        let mut tool = MeasuringTool::new();
        tool.set_phase("sorting");
        tool.add(1, "strings");
        tool.add(2, "strings");
        tool.set_phase("exchange");
        tool.add(3, "strings");
        assert_eq!(tool.records[0].counter_per_phase, 0);
        assert_eq!(tool.records[1].counter_per_phase, 1);
        assert_eq!(tool.records[2].counter_per_phase, 0);
    }

    #[test]
    fn disabled_tool_records_nothing() {
        let mut tool = MeasuringTool::new();
        tool.disable();
        tool.add(1, "strings");
        tool.start("timer");
        tool.stop("timer");
        assert!(tool.records.is_empty());
    }

    #[test]
    fn timers_nest() {
        let mut tool = MeasuringTool::new();
        tool.start("outer");
        tool.start("inner");
        tool.stop("inner");
        tool.stop("outer");
        assert_eq!(tool.records.len(), 2);
        assert_eq!(tool.records[0].description, "inner");
        assert_eq!(tool.records[1].description, "outer");
    }
}
