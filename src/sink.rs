//! Alert sinks.
//!
//! The engine only returns alerts. Sinks are where a host sends them:
//! the log, a JSON-lines stream, or a bounded in-memory history for a
//! display panel. Sinks must not hold on to anything but the alert itself.

use anyhow::{anyhow, Result};
use std::collections::VecDeque;
use std::io::Write;

use crate::{AlertRecord, AlertType};

pub const DEFAULT_HISTORY_CAPACITY: usize = 20;

/// Destination for alerts produced by the engine.
pub trait AlertSink {
    /// Sink identifier.
    fn name(&self) -> &'static str;

    /// Accepts one alert.
    fn deliver(&mut self, alert: &AlertRecord) -> Result<()>;

    /// Optional flush hook, called by hosts at shutdown.
    fn flush(&mut self) -> Result<()> {
        Ok(())
    }
}

/// Writes alerts through the `log` facade.
#[derive(Debug, Default)]
pub struct LogSink;

impl AlertSink for LogSink {
    fn name(&self) -> &'static str {
        "log"
    }

    fn deliver(&mut self, alert: &AlertRecord) -> Result<()> {
        match alert.alert_type {
            AlertType::Crowd => log::info!(
                "[ALERT][{}] frame {}: {}",
                alert.alert_type,
                alert.frame_index,
                alert.message
            ),
            _ => log::warn!(
                "[ALERT][{}] frame {}: {}",
                alert.alert_type,
                alert.frame_index,
                alert.message
            ),
        }
        Ok(())
    }
}

/// Serializes each alert as one JSON object per line.
pub struct JsonLinesSink<W: Write> {
    out: W,
    written: u64,
}

impl<W: Write> JsonLinesSink<W> {
    pub fn new(out: W) -> Self {
        Self { out, written: 0 }
    }

    pub fn written(&self) -> u64 {
        self.written
    }

    pub fn into_inner(self) -> W {
        self.out
    }
}

impl<W: Write> AlertSink for JsonLinesSink<W> {
    fn name(&self) -> &'static str {
        "json_lines"
    }

    fn deliver(&mut self, alert: &AlertRecord) -> Result<()> {
        serde_json::to_writer(&mut self.out, alert)
            .map_err(|e| anyhow!("failed to encode alert: {}", e))?;
        self.out.write_all(b"\n")?;
        self.written += 1;
        Ok(())
    }

    fn flush(&mut self) -> Result<()> {
        self.out.flush()?;
        Ok(())
    }
}

/// Collects every alert. Intended for tests and short replays.
#[derive(Debug, Default)]
pub struct MemorySink {
    alerts: Vec<AlertRecord>,
}

impl MemorySink {
    pub fn alerts(&self) -> &[AlertRecord] {
        &self.alerts
    }

    pub fn take(&mut self) -> Vec<AlertRecord> {
        std::mem::take(&mut self.alerts)
    }
}

impl AlertSink for MemorySink {
    fn name(&self) -> &'static str {
        "memory"
    }

    fn deliver(&mut self, alert: &AlertRecord) -> Result<()> {
        self.alerts.push(alert.clone());
        Ok(())
    }
}

/// Most-recent-first history of formatted alert lines, bounded in size.
///
/// Lines look like `14:03:07 - [WEAPON] Weapon (knife) detected!`, with the
/// time of day taken from the alert timestamp (seconds, UTC).
#[derive(Debug)]
pub struct AlertHistory {
    capacity: usize,
    lines: VecDeque<String>,
}

impl AlertHistory {
    pub fn new(capacity: usize) -> Result<Self> {
        if capacity == 0 {
            return Err(anyhow!("alert history capacity must be > 0"));
        }
        Ok(Self {
            capacity,
            lines: VecDeque::with_capacity(capacity),
        })
    }

    /// Newest first.
    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.lines.iter().map(String::as_str)
    }

    pub fn len(&self) -> usize {
        self.lines.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

impl Default for AlertHistory {
    fn default() -> Self {
        Self {
            capacity: DEFAULT_HISTORY_CAPACITY,
            lines: VecDeque::with_capacity(DEFAULT_HISTORY_CAPACITY),
        }
    }
}

impl AlertSink for AlertHistory {
    fn name(&self) -> &'static str {
        "history"
    }

    fn deliver(&mut self, alert: &AlertRecord) -> Result<()> {
        self.lines.push_front(format!(
            "{} - [{}] {}",
            clock_time(alert.timestamp),
            alert.alert_type,
            alert.message
        ));
        self.lines.truncate(self.capacity);
        Ok(())
    }
}

/// `HH:MM:SS` of a timestamp in seconds, wrapped to one day.
fn clock_time(timestamp: f64) -> String {
    let secs = if timestamp.is_finite() {
        (timestamp.floor() as i64).rem_euclid(86_400)
    } else {
        0
    };
    format!("{:02}:{:02}:{:02}", secs / 3600, (secs % 3600) / 60, secs % 60)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{BBox, TrackId};

    fn alert(ts: f64, msg: &str) -> AlertRecord {
        AlertRecord::new(AlertType::Weapon, msg.to_string(), ts, 1).with_track(
            TrackId(3),
            BBox::new(0, 0, 1, 1),
            "knife",
        )
    }

    #[test]
    fn json_lines_writes_one_object_per_line() -> Result<()> {
        let mut sink = JsonLinesSink::new(Vec::new());
        sink.deliver(&alert(1.0, "a"))?;
        sink.deliver(&alert(2.0, "b"))?;
        sink.flush()?;
        assert_eq!(sink.name(), "json_lines");
        assert_eq!(sink.written(), 2);
        let text = String::from_utf8(sink.into_inner())?;
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        let parsed: AlertRecord = serde_json::from_str(lines[1])?;
        assert_eq!(parsed.message, "b");
        assert_eq!(parsed.track_id, Some(TrackId(3)));
        Ok(())
    }

    #[test]
    fn history_keeps_newest_first_and_bounded() -> Result<()> {
        let mut history = AlertHistory::new(2)?;
        assert_eq!(history.name(), "history");
        history.deliver(&alert(0.0, "first"))?;
        history.deliver(&alert(61.0, "second"))?;
        history.deliver(&alert(3723.0, "third"))?;
        let lines: Vec<&str> = history.lines().collect();
        assert_eq!(
            lines,
            vec![
                "01:02:03 - [WEAPON] third",
                "00:01:01 - [WEAPON] second"
            ]
        );
        Ok(())
    }

    #[test]
    fn history_rejects_zero_capacity() {
        assert!(AlertHistory::new(0).is_err());
        assert_eq!(AlertHistory::default().len(), 0);
    }

    #[test]
    fn clock_time_wraps_days() {
        assert_eq!(clock_time(86_400.0 + 5.9), "00:00:05");
        assert_eq!(clock_time(f64::NAN), "00:00:00");
    }

    #[test]
    fn memory_sink_take_drains() -> Result<()> {
        let mut sink = MemorySink::default();
        sink.deliver(&alert(0.0, "x"))?;
        assert_eq!(sink.take().len(), 1);
        assert!(sink.alerts().is_empty());
        Ok(())
    }
}
