//! ---
//! trpc_section: "01-core-functionality"
//! trpc_subsection: "module"
//! trpc_type: "source"
//! trpc_scope: "code"
//! trpc_description: "Tick engine, scheduling, and streaming."
//! trpc_version: "v0.0.0-prealpha"
//! trpc_owner: "tbd"
//! ---
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tickrpc_common::time::rate_per_second;
use tickrpc_common::ExponentialMovingAverage;
use tickrpc_msg::Value;

/// Per-tick measurements fed into [`EngineStats::record`].
#[derive(Debug, Clone, Copy, Default)]
pub struct TickSample {
    /// Wall time since the previous update.
    pub elapsed: Duration,
    pub calls_executed: u64,
    pub rpc_time: Duration,
    pub poll_time: Duration,
    pub exec_time: Duration,
    pub stream_calls_executed: u64,
    pub stream_time: Duration,
    /// Cumulative byte totals across all servers.
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub budget: Duration,
}

/// Smoothed engine statistics.
#[derive(Debug, Clone)]
pub struct EngineStats {
    calls_executed: u64,
    call_rate: ExponentialMovingAverage,
    time_per_tick: ExponentialMovingAverage,
    poll_time: ExponentialMovingAverage,
    exec_time: ExponentialMovingAverage,
    stream_calls_executed: u64,
    stream_call_rate: ExponentialMovingAverage,
    time_per_stream_tick: ExponentialMovingAverage,
    bytes_read: u64,
    bytes_written: u64,
    bytes_read_rate: ExponentialMovingAverage,
    bytes_written_rate: ExponentialMovingAverage,
    max_time_per_tick: Duration,
}

/// Point-in-time copy of [`EngineStats`] plus connection counts.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct StatsSnapshot {
    pub calls_executed: u64,
    pub call_rate: f64,
    pub time_per_tick_secs: f64,
    pub poll_time_secs: f64,
    pub exec_time_secs: f64,
    pub max_time_per_tick_secs: f64,
    pub stream_calls: usize,
    pub stream_calls_executed: u64,
    pub stream_call_rate: f64,
    pub time_per_stream_tick_secs: f64,
    pub bytes_read: u64,
    pub bytes_written: u64,
    pub bytes_read_rate: f64,
    pub bytes_written_rate: f64,
    pub rpc_clients: usize,
    pub stream_clients: usize,
}

impl EngineStats {
    pub fn new(smoothing: f64) -> Self {
        let ema = || ExponentialMovingAverage::new(smoothing);
        Self {
            calls_executed: 0,
            call_rate: ema(),
            time_per_tick: ema(),
            poll_time: ema(),
            exec_time: ema(),
            stream_calls_executed: 0,
            stream_call_rate: ema(),
            time_per_stream_tick: ema(),
            bytes_read: 0,
            bytes_written: 0,
            bytes_read_rate: ema(),
            bytes_written_rate: ema(),
            max_time_per_tick: Duration::ZERO,
        }
    }

    pub fn record(&mut self, sample: &TickSample) {
        self.calls_executed += sample.calls_executed;
        self.stream_calls_executed += sample.stream_calls_executed;
        self.call_rate
            .update(rate_per_second(sample.calls_executed, sample.elapsed));
        self.stream_call_rate
            .update(rate_per_second(sample.stream_calls_executed, sample.elapsed));
        self.time_per_tick.update(sample.rpc_time.as_secs_f64());
        self.poll_time.update(sample.poll_time.as_secs_f64());
        self.exec_time.update(sample.exec_time.as_secs_f64());
        self.time_per_stream_tick
            .update(sample.stream_time.as_secs_f64());

        let read = sample.bytes_read.saturating_sub(self.bytes_read);
        let written = sample.bytes_written.saturating_sub(self.bytes_written);
        self.bytes_read = sample.bytes_read;
        self.bytes_written = sample.bytes_written;
        self.bytes_read_rate
            .update(rate_per_second(read, sample.elapsed));
        self.bytes_written_rate
            .update(rate_per_second(written, sample.elapsed));
        self.max_time_per_tick = sample.budget;
    }

    pub fn reset(&mut self) {
        self.calls_executed = 0;
        self.stream_calls_executed = 0;
        self.bytes_read = 0;
        self.bytes_written = 0;
        for ema in [
            &mut self.call_rate,
            &mut self.time_per_tick,
            &mut self.poll_time,
            &mut self.exec_time,
            &mut self.stream_call_rate,
            &mut self.time_per_stream_tick,
            &mut self.bytes_read_rate,
            &mut self.bytes_written_rate,
        ] {
            ema.reset();
        }
    }

    pub fn calls_executed(&self) -> u64 {
        self.calls_executed
    }

    pub fn stream_calls_executed(&self) -> u64 {
        self.stream_calls_executed
    }

    pub fn snapshot(&self, rpc_clients: usize, stream_clients: usize, streams: usize) -> StatsSnapshot {
        StatsSnapshot {
            calls_executed: self.calls_executed,
            call_rate: self.call_rate.value(),
            time_per_tick_secs: self.time_per_tick.value(),
            poll_time_secs: self.poll_time.value(),
            exec_time_secs: self.exec_time.value(),
            max_time_per_tick_secs: self.max_time_per_tick.as_secs_f64(),
            stream_calls: streams,
            stream_calls_executed: self.stream_calls_executed,
            stream_call_rate: self.stream_call_rate.value(),
            time_per_stream_tick_secs: self.time_per_stream_tick.value(),
            bytes_read: self.bytes_read,
            bytes_written: self.bytes_written,
            bytes_read_rate: self.bytes_read_rate.value(),
            bytes_written_rate: self.bytes_written_rate.value(),
            rpc_clients,
            stream_clients,
        }
    }
}

impl StatsSnapshot {
    /// Status map returned to clients by `KRPC.GetStatus`.
    pub fn to_value(&self) -> Value {
        let entry = |key: &str, value: Value| (Value::String(key.to_owned()), value);
        Value::Map(vec![
            entry("version", Value::from(env!("CARGO_PKG_VERSION"))),
            entry("calls_executed", Value::UInt(self.calls_executed)),
            entry("call_rate", Value::Float(self.call_rate)),
            entry("time_per_tick", Value::Float(self.time_per_tick_secs)),
            entry("poll_time_per_tick", Value::Float(self.poll_time_secs)),
            entry("exec_time_per_tick", Value::Float(self.exec_time_secs)),
            entry("max_time_per_tick", Value::Float(self.max_time_per_tick_secs)),
            entry("stream_calls", Value::UInt(self.stream_calls as u64)),
            entry("stream_calls_executed", Value::UInt(self.stream_calls_executed)),
            entry("stream_call_rate", Value::Float(self.stream_call_rate)),
            entry("time_per_stream_tick", Value::Float(self.time_per_stream_tick_secs)),
            entry("bytes_read", Value::UInt(self.bytes_read)),
            entry("bytes_written", Value::UInt(self.bytes_written)),
            entry("bytes_read_rate", Value::Float(self.bytes_read_rate)),
            entry("bytes_written_rate", Value::Float(self.bytes_written_rate)),
            entry("rpc_clients", Value::UInt(self.rpc_clients as u64)),
            entry("stream_clients", Value::UInt(self.stream_clients as u64)),
        ])
    }
}
