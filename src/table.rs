//! Keypoint table ingestion and result tables
//!
//! Reads DeepLabCut-style CSV (three header rows for single-animal tracking,
//! four with an `individuals` row for multi-animal tracking) into a
//! `KeypointTable`, and writes bout, record and trajectory tables as CSV.

use crate::error::AnalysisError;
use crate::types::{Bout, FrameSeries, KeypointKey, KeypointTable, TrajectorySlice};
use serde::Serialize;
use std::collections::{BTreeMap, BTreeSet};
use std::io::{Read, Write};
use std::path::Path;
use tracing::{debug, warn};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Channel {
    X,
    Y,
    Likelihood,
}

impl Channel {
    fn parse(name: &str) -> Option<Self> {
        match name.trim() {
            "x" => Some(Channel::X),
            "y" => Some(Channel::Y),
            "likelihood" => Some(Channel::Likelihood),
            _ => None,
        }
    }
}

#[derive(Default)]
struct Channels {
    x: Option<Vec<f64>>,
    y: Option<Vec<f64>>,
    likelihood: Option<Vec<f64>>,
}

impl Channels {
    fn slot(&mut self, channel: Channel) -> &mut Option<Vec<f64>> {
        match channel {
            Channel::X => &mut self.x,
            Channel::Y => &mut self.y,
            Channel::Likelihood => &mut self.likelihood,
        }
    }

    fn into_series(self, key: &KeypointKey) -> Result<FrameSeries, AnalysisError> {
        let missing = |channel: &str| {
            AnalysisError::MissingInput(format!("keypoint {key} has no {channel} column"))
        };
        FrameSeries::new(
            self.x.ok_or_else(|| missing("x"))?,
            self.y.ok_or_else(|| missing("y"))?,
            self.likelihood.ok_or_else(|| missing("likelihood"))?,
        )
    }
}

fn parse_value(field: Option<&str>, row: usize, column: usize) -> Result<f64, AnalysisError> {
    match field.map(str::trim) {
        None | Some("") => Ok(f64::NAN),
        Some(text) => text.parse::<f64>().map_err(|_| {
            AnalysisError::Parse(format!("row {row}, column {column}: invalid number {text:?}"))
        }),
    }
}

/// Parse a DeepLabCut CSV from any reader
pub fn read_keypoint_table<R: Read>(reader: R) -> Result<KeypointTable, AnalysisError> {
    let mut csv_reader = csv::ReaderBuilder::new()
        .has_headers(false)
        .flexible(true)
        .from_reader(reader);
    let rows = csv_reader.records().collect::<Result<Vec<_>, _>>()?;

    let label_of = |row: &csv::StringRecord| row.get(0).map(|s| s.trim().to_string());
    let coords_at = rows
        .iter()
        .take(4)
        .position(|row| label_of(row).as_deref() == Some("coords"))
        .ok_or_else(|| AnalysisError::Parse("missing `coords` header row".to_string()))?;
    if coords_at < 2 {
        return Err(AnalysisError::Parse(format!(
            "expected 3 or 4 header rows, found {}",
            coords_at + 1
        )));
    }
    let header = &rows[..=coords_at];
    let find = |name: &str| header.iter().find(|row| label_of(*row).as_deref() == Some(name));
    let bodyparts = find("bodyparts")
        .ok_or_else(|| AnalysisError::Parse("missing `bodyparts` header row".to_string()))?;
    let individuals = find("individuals");
    let coords = &rows[coords_at];

    let mut columns: Vec<Option<(KeypointKey, Channel)>> = vec![None; coords.len()];
    for (c, name) in coords.iter().enumerate().skip(1) {
        let Some(channel) = Channel::parse(name) else {
            warn!(column = c, name, "skipping unknown channel");
            continue;
        };
        let bodypart = bodyparts.get(c).unwrap_or_default().trim();
        let individual = individuals.and_then(|row| row.get(c)).map(str::trim);
        columns[c] = Some((KeypointKey::new(individual, bodypart), channel));
    }

    let data = &rows[coords_at + 1..];
    let mut channels: BTreeMap<KeypointKey, Channels> = BTreeMap::new();
    for (c, column) in columns.iter().enumerate() {
        let Some((key, channel)) = column else {
            continue;
        };
        let values = data
            .iter()
            .enumerate()
            .map(|(r, row)| parse_value(row.get(c), coords_at + 1 + r, c))
            .collect::<Result<Vec<_>, _>>()?;
        *channels.entry(key.clone()).or_default().slot(*channel) = Some(values);
    }

    let mut table = KeypointTable::new();
    for (key, parts) in channels {
        let series = parts.into_series(&key)?;
        table.insert(key, series)?;
    }
    debug!(
        frames = table.frame_count(),
        keypoints = table.keys().count(),
        "keypoint table loaded"
    );
    Ok(table)
}

/// Parse a DeepLabCut CSV file
pub fn read_keypoint_csv(path: &Path) -> Result<KeypointTable, AnalysisError> {
    let file = std::fs::File::open(path).map_err(|e| {
        AnalysisError::MissingInput(format!("cannot open {}: {e}", path.display()))
    })?;
    read_keypoint_table(file)
}

/// Write a bout table. Snapshot features become trailing columns.
pub fn write_bouts<W: Write>(writer: W, bouts: &[Bout]) -> Result<(), AnalysisError> {
    let features: BTreeSet<&str> = bouts
        .iter()
        .flat_map(|bout| bout.snapshot.keys().map(String::as_str))
        .collect();

    let mut wtr = csv::Writer::from_writer(writer);
    let mut header = vec![
        "behavior_type",
        "start_frame",
        "end_frame",
        "start_time",
        "end_time",
        "start_s",
        "end_s",
        "duration_frames",
        "duration_seconds",
    ];
    header.extend(features.iter().copied());
    wtr.write_record(&header)?;

    for bout in bouts {
        let mut row = vec![
            bout.label.to_string(),
            bout.start_frame.to_string(),
            bout.end_frame.to_string(),
            bout.start_time.clone(),
            bout.end_time.clone(),
            bout.start_s.to_string(),
            bout.end_s.to_string(),
            bout.duration_frames.to_string(),
            bout.duration_s.to_string(),
        ];
        row.extend(
            features
                .iter()
                .map(|name| bout.snapshot.get(*name).map(f64::to_string).unwrap_or_default()),
        );
        wtr.write_record(&row)?;
    }
    wtr.flush()?;
    Ok(())
}

/// Write serializable rows (catch records, trajectory points) with a header
pub fn write_rows<W: Write, T: Serialize>(writer: W, rows: &[T]) -> Result<(), AnalysisError> {
    let mut wtr = csv::Writer::from_writer(writer);
    for row in rows {
        wtr.serialize(row)?;
    }
    wtr.flush()?;
    Ok(())
}

pub fn write_trajectory<W: Write>(writer: W, slice: &TrajectorySlice) -> Result<(), AnalysisError> {
    write_rows(writer, &slice.points)
}

/// Write an indexed count column, e.g. scratch counts per minute
pub fn write_counts<W: Write>(
    writer: W,
    index_name: &str,
    counts: &[usize],
) -> Result<(), AnalysisError> {
    let mut wtr = csv::Writer::from_writer(writer);
    wtr.write_record([index_name, "count"])?;
    for (i, count) in counts.iter().enumerate() {
        wtr.write_record([i.to_string(), count.to_string()])?;
    }
    wtr.flush()?;
    Ok(())
}
