//! Recorded track streams.
//!
//! A recording is JSON lines, one frame per line:
//!
//! ```text
//! {"frame_index": 12, "timestamp": 3.4, "tracks": [
//!     {"track_id": 7, "bbox": [90, 90, 110, 110], "label": "suitcase", "confirmed": true}
//! ]}
//! ```
//!
//! Parsing is strict: unknown fields are rejected so that a recording made
//! for a different schema fails loudly instead of replaying half its data.
//! Blank lines and lines starting with `#` are skipped.

use anyhow::{anyhow, Result};
use serde_json::Value;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::{BBox, TrackId, TrackObservation};

const FRAME_FIELDS: [&str; 3] = ["frame_index", "timestamp", "tracks"];
const TRACK_FIELDS: [&str; 4] = ["track_id", "bbox", "label", "confirmed"];

/// One frame of a recorded track stream.
#[derive(Clone, Debug, PartialEq)]
pub struct FrameRecord {
    pub frame_index: u64,
    pub timestamp: f64,
    pub tracks: Vec<TrackObservation>,
}

fn ensure_allowed_fields(
    context: &str,
    obj: &serde_json::Map<String, Value>,
    allowed: &[&str],
) -> Result<()> {
    let extras: Vec<String> = obj
        .keys()
        .filter(|key| !allowed.contains(&key.as_str()))
        .cloned()
        .collect();
    if extras.is_empty() {
        return Ok(());
    }
    Err(anyhow!(
        "{} contains unknown fields: {}",
        context,
        extras.join(", ")
    ))
}

/// Accepts numeric ids and decimal strings (some trackers emit `"17"`).
fn parse_track_id(value: &Value) -> Result<TrackId> {
    if let Some(id) = value.as_u64() {
        return Ok(TrackId(id));
    }
    let raw = value
        .as_str()
        .ok_or_else(|| anyhow!("track_id must be an unsigned integer or a numeric string"))?;
    raw.trim()
        .parse::<u64>()
        .map(TrackId)
        .map_err(|_| anyhow!("track_id '{}' is not an unsigned integer", raw))
}

/// Coordinates may be floats; they are truncated toward zero.
fn parse_bbox(value: &Value) -> Result<BBox> {
    let items = value
        .as_array()
        .ok_or_else(|| anyhow!("bbox must be an array [x1, y1, x2, y2]"))?;
    if items.len() != 4 {
        return Err(anyhow!("bbox must have exactly 4 coordinates"));
    }
    let mut coords = [0i32; 4];
    for (slot, item) in coords.iter_mut().zip(items) {
        let v = item
            .as_f64()
            .filter(|v| v.is_finite())
            .ok_or_else(|| anyhow!("bbox coordinates must be finite numbers"))?;
        if v < f64::from(i32::MIN) || v > f64::from(i32::MAX) {
            return Err(anyhow!("bbox coordinate {} out of range", v));
        }
        *slot = v.trunc() as i32;
    }
    Ok(BBox::from(coords))
}

fn parse_track(value: &Value) -> Result<TrackObservation> {
    let obj = value
        .as_object()
        .ok_or_else(|| anyhow!("track must be a JSON object"))?;
    ensure_allowed_fields("track", obj, &TRACK_FIELDS)?;

    let track_id = obj
        .get("track_id")
        .ok_or_else(|| anyhow!("track_id is required"))
        .and_then(parse_track_id)?;
    let bbox = obj
        .get("bbox")
        .ok_or_else(|| anyhow!("bbox is required"))
        .and_then(parse_bbox)?;
    // Labels are free text; classification copes with anything.
    let label = match obj.get("label") {
        None | Some(Value::Null) => "",
        Some(v) => v
            .as_str()
            .ok_or_else(|| anyhow!("label must be a string"))?,
    };
    let confirmed = match obj.get("confirmed") {
        None => true,
        Some(v) => v
            .as_bool()
            .ok_or_else(|| anyhow!("confirmed must be a boolean"))?,
    };

    Ok(TrackObservation::new(track_id, bbox, label, confirmed))
}

/// Parses one frame object, rejecting unknown fields at every level.
pub fn parse_frame_record(payload: &Value) -> Result<FrameRecord> {
    let obj = payload
        .as_object()
        .ok_or_else(|| anyhow!("frame must be a JSON object"))?;
    ensure_allowed_fields("frame", obj, &FRAME_FIELDS)?;

    let frame_index = obj
        .get("frame_index")
        .and_then(Value::as_u64)
        .ok_or_else(|| anyhow!("frame_index must be an unsigned integer"))?;
    if frame_index == 0 {
        return Err(anyhow!("frame_index must be >= 1"));
    }
    let timestamp = obj
        .get("timestamp")
        .and_then(Value::as_f64)
        .filter(|t| t.is_finite())
        .ok_or_else(|| anyhow!("timestamp must be a finite number of seconds"))?;
    let tracks = obj
        .get("tracks")
        .and_then(Value::as_array)
        .ok_or_else(|| anyhow!("tracks must be an array"))?
        .iter()
        .enumerate()
        .map(|(i, t)| parse_track(t).map_err(|e| anyhow!("tracks[{}]: {}", i, e)))
        .collect::<Result<Vec<_>>>()?;

    Ok(FrameRecord {
        frame_index,
        timestamp,
        tracks,
    })
}

/// Streams [`FrameRecord`]s out of a JSON-lines reader.
pub struct ReplaySource<R: BufRead> {
    reader: R,
    line_no: usize,
    buf: String,
}

impl ReplaySource<BufReader<File>> {
    pub fn open(path: &Path) -> Result<Self> {
        let file = File::open(path)
            .map_err(|e| anyhow!("replay: failed to open {}: {}", path.display(), e))?;
        Ok(Self::new(BufReader::new(file)))
    }
}

impl<R: BufRead> ReplaySource<R> {
    pub fn new(reader: R) -> Self {
        Self {
            reader,
            line_no: 0,
            buf: String::new(),
        }
    }

    /// Line number of the most recently read line (1-based).
    pub fn line_no(&self) -> usize {
        self.line_no
    }

    /// Returns the next frame, or `None` at end of input.
    pub fn next_frame(&mut self) -> Result<Option<FrameRecord>> {
        loop {
            self.buf.clear();
            let n = self
                .reader
                .read_line(&mut self.buf)
                .map_err(|e| anyhow!("replay: read failed after line {}: {}", self.line_no, e))?;
            if n == 0 {
                return Ok(None);
            }
            self.line_no += 1;

            let line = self.buf.trim();
            if line.is_empty() || line.starts_with('#') {
                continue;
            }
            let value: Value = serde_json::from_str(line)
                .map_err(|e| anyhow!("replay: line {}: invalid JSON: {}", self.line_no, e))?;
            let record = parse_frame_record(&value)
                .map_err(|e| anyhow!("replay: line {}: {}", self.line_no, e))?;
            return Ok(Some(record));
        }
    }
}

impl<R: BufRead> Iterator for ReplaySource<R> {
    type Item = Result<FrameRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.next_frame().transpose()
    }
}
