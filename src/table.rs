//! Ordered live table.
//!
//! Holds displayed samples sorted by one active column and direction. New
//! samples are placed by binary search so the table never resorts on
//! insertion; a full stable resort happens only when the sort key changes.
//!
//! Among rows with equal keys the most recently inserted comes first in
//! either direction. Resorts break ties on an insertion sequence number, so
//! after any column or direction change the order equals inserting every
//! sample fresh under the new sort.

use std::cmp::Ordering;

use serde::Serialize;

use crate::measurement::Measurement;

/// Timestamp format used for display and for the datetime sort key.
pub const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// Sortable column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Column {
    /// Device timestamp, compared as text.
    DateTime,
    /// Watts.
    Wattage,
    /// Milliamps.
    Current,
    /// Volts.
    Voltage,
}

impl Column {
    /// All columns in display order.
    pub const ALL: [Column; 4] = [
        Column::DateTime,
        Column::Wattage,
        Column::Current,
        Column::Voltage,
    ];

    /// Header label, with unit.
    pub const fn label(self) -> &'static str {
        match self {
            Column::DateTime => "datetime",
            Column::Wattage => "wattage[W]",
            Column::Current => "current[mA]",
            Column::Voltage => "voltage[V]",
        }
    }
}

/// Sort direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Smallest key first.
    Ascending,
    /// Largest key first.
    Descending,
}

impl Direction {
    /// The opposite direction.
    pub fn toggled(self) -> Self {
        match self {
            Direction::Ascending => Direction::Descending,
            Direction::Descending => Direction::Ascending,
        }
    }
}

/// Active sort column and direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SortState {
    /// Column whose values order the rows.
    pub column: Column,
    /// Order of that column.
    pub direction: Direction,
}

impl Default for SortState {
    /// Newest first.
    fn default() -> Self {
        Self {
            column: Column::DateTime,
            direction: Direction::Descending,
        }
    }
}

/// One displayed row: a sample rounded for display.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LiveRow {
    /// Device timestamp as `YYYY-MM-DD HH:MM:SS`.
    pub datetime: String,
    /// Watts, 3 decimals.
    pub wattage: f64,
    /// Milliamps, truncated to an integer.
    pub current: i64,
    /// Volts, 2 decimals.
    pub voltage: f64,
    /// Insertion order within the table.
    #[serde(skip)]
    seq: u64,
}

impl From<&Measurement> for LiveRow {
    fn from(m: &Measurement) -> Self {
        Self {
            datetime: m.timestamp.format(TIMESTAMP_FORMAT).to_string(),
            wattage: round_to(m.wattage, 3),
            current: m.current as i64,
            voltage: round_to(m.voltage, 2),
            seq: 0,
        }
    }
}

impl LiveRow {
    /// Full ordering under `column`; equal keys put the newer row first.
    fn cmp_by(&self, other: &Self, column: Column, direction: Direction) -> Ordering {
        let by_key = match direction {
            Direction::Ascending => self.key(column).compare(&other.key(column)),
            Direction::Descending => other.key(column).compare(&self.key(column)),
        };
        by_key.then_with(|| other.seq.cmp(&self.seq))
    }

    fn key(&self, column: Column) -> SortKey<'_> {
        match column {
            Column::DateTime => SortKey::Text(&self.datetime),
            Column::Wattage => SortKey::Number(self.wattage),
            Column::Current => SortKey::Number(self.current as f64),
            Column::Voltage => SortKey::Number(self.voltage),
        }
    }
}

fn round_to(value: f64, decimals: i32) -> f64 {
    let factor = 10f64.powi(decimals);
    (value * factor).round() / factor
}

/// Comparison key of one row under one column.
#[derive(Debug, Clone, Copy)]
enum SortKey<'a> {
    Text(&'a str),
    Number(f64),
}

impl SortKey<'_> {
    fn compare(&self, other: &Self) -> Ordering {
        match (self, other) {
            (SortKey::Text(a), SortKey::Text(b)) => a.cmp(b),
            (SortKey::Number(a), SortKey::Number(b)) => a.total_cmp(b),
            // Keys of one table always come from the same column.
            (SortKey::Text(_), SortKey::Number(_)) => Ordering::Greater,
            (SortKey::Number(_), SortKey::Text(_)) => Ordering::Less,
        }
    }
}

/// Rows kept sorted under the active [`SortState`].
#[derive(Debug, Clone, Default)]
pub struct LiveTable {
    rows: Vec<LiveRow>,
    sort: SortState,
    /// Sequence number for the next inserted row.
    next_seq: u64,
}

impl LiveTable {
    /// Empty table sorted by datetime, newest first.
    pub fn new() -> Self {
        Self::default()
    }

    /// Empty table with an explicit initial sort.
    pub fn with_sort(sort: SortState) -> Self {
        Self {
            rows: Vec::new(),
            sort,
            next_seq: 0,
        }
    }

    /// Insert a sample at its sorted position and return the index.
    pub fn insert(&mut self, sample: &Measurement) -> usize {
        let mut row = LiveRow::from(sample);
        row.seq = self.next_seq;
        self.next_seq += 1;
        let index = self.insertion_index(&row);
        self.rows.insert(index, row);
        index
    }

    fn insertion_index(&self, row: &LiveRow) -> usize {
        let column = self.sort.column;
        let key = row.key(column);
        match self.sort.direction {
            // Leftmost position among equal keys.
            Direction::Ascending => self
                .rows
                .partition_point(|r| r.key(column).compare(&key) == Ordering::Less),
            // Number of keys strictly greater than the new one.
            Direction::Descending => self
                .rows
                .partition_point(|r| r.key(column).compare(&key) == Ordering::Greater),
        }
    }

    /// Header click: adopt `column` and flip the direction, then resort.
    pub fn toggle_sort(&mut self, column: Column) {
        let direction = self.sort.direction.toggled();
        self.set_sort(column, direction);
    }

    /// Set column and direction, then resort once.
    pub fn set_sort(&mut self, column: Column, direction: Direction) {
        self.sort = SortState { column, direction };
        tracing::debug!("Resorting {} rows by {:?} {:?}", self.rows.len(), column, direction);

        self.rows.sort_by(|a, b| a.cmp_by(b, column, direction));
    }

    /// Active column and direction.
    pub fn sort_state(&self) -> SortState {
        self.sort
    }

    /// Rows in display order.
    pub fn rows(&self) -> &[LiveRow] {
        &self.rows
    }

    /// Number of rows.
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    /// Check if the table has no rows.
    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Remove every row; the sort state is kept.
    pub fn clear(&mut self) {
        self.rows.clear();
    }
}
