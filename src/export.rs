//! CSV export of the live table.

use std::io;
use std::path::Path;

use crate::error::Result;
use crate::table::{Column, LiveTable};

/// Header row, one label per column in display order.
pub const CSV_HEADER: [&str; 4] = [
    Column::DateTime.label(),
    Column::Wattage.label(),
    Column::Current.label(),
    Column::Voltage.label(),
];

/// Write the header and every row, in the table's current display order.
pub fn write_csv<W: io::Write>(table: &LiveTable, writer: W) -> Result<()> {
    let mut csv = csv::WriterBuilder::new()
        .has_headers(false)
        .from_writer(writer);

    csv.write_record(CSV_HEADER)?;
    for row in table.rows() {
        csv.serialize(row)?;
    }
    csv.flush()?;
    Ok(())
}

/// Write the table to a file at `path`, replacing it if it exists.
pub fn save_csv(table: &LiveTable, path: impl AsRef<Path>) -> Result<()> {
    let path = path.as_ref();
    let file = std::fs::File::create(path)?;
    write_csv(table, io::BufWriter::new(file))?;
    tracing::info!("Saved {} rows to {}", table.len(), path.display());
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::measurement::Measurement;
    use crate::table::{Direction, SortState};
    use chrono::{Duration, NaiveDate};
    use tempfile::NamedTempFile;

    fn table(sort: SortState) -> LiveTable {
        let t0 = NaiveDate::from_ymd_opt(2024, 3, 15)
            .unwrap()
            .and_hms_opt(12, 0, 0)
            .unwrap();
        let mut table = LiveTable::with_sort(sort);
        for (i, w) in [25.125, 3.5].into_iter().enumerate() {
            table.insert(&Measurement::new(
                t0 + Duration::seconds(i as i64),
                100.456,
                250.9,
                w,
            ));
        }
        table
    }

    #[test]
    fn test_write_csv_in_display_order() {
        let mut out = Vec::new();
        write_csv(&table(SortState::default()), &mut out).unwrap();

        assert_eq!(
            String::from_utf8(out).unwrap(),
            "datetime,wattage[W],current[mA],voltage[V]\n\
             2024-03-15 12:00:01,3.5,250,100.46\n\
             2024-03-15 12:00:00,25.125,250,100.46\n"
        );
    }

    #[test]
    fn test_write_csv_follows_active_sort() {
        let sorted = table(SortState {
            column: Column::Wattage,
            direction: Direction::Descending,
        });
        let mut out = Vec::new();
        write_csv(&sorted, &mut out).unwrap();

        let text = String::from_utf8(out).unwrap();
        let first_row = text.lines().nth(1).unwrap();
        assert!(first_row.starts_with("2024-03-15 12:00:00,25.125"));
    }

    #[test]
    fn test_empty_table_writes_header_only() {
        let mut out = Vec::new();
        write_csv(&LiveTable::new(), &mut out).unwrap();
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "datetime,wattage[W],current[mA],voltage[V]\n"
        );
    }

    #[test]
    fn test_save_csv() {
        let file = NamedTempFile::new().unwrap();
        save_csv(&table(SortState::default()), file.path()).unwrap();

        let mut reader = csv::Reader::from_path(file.path()).unwrap();
        let headers: Vec<String> = reader
            .headers()
            .unwrap()
            .iter()
            .map(str::to_string)
            .collect();
        assert_eq!(headers, CSV_HEADER);
        assert_eq!(reader.records().count(), 2);
    }
}
