use tracing::debug;

use super::cells::CellEntry;
use crate::record::RawRecord;

/// Repeated header text rendered in the contractor column on every page.
pub const HEADER_LABEL: &str = "CONTRACTOR";

/// Where a cell's value lands in the row being assembled.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Column {
    Contractor,
    Start,
    End,
    Street,
    City,
    Zip,
    /// Seen in the grid but not mapped to a field.
    Unclassified,
    /// Last column (case reference); closes the row.
    Terminator,
    Ignored,
}

fn column_for(role: i64) -> Column {
    match role {
        2 => Column::Contractor,
        4 => Column::Start,
        6 => Column::End,
        8 => Column::Street,
        10 => Column::City,
        12 => Column::Zip,
        3 | 13 => Column::Unclassified,
        14 => Column::Terminator,
        _ => Column::Ignored,
    }
}

#[derive(Default)]
struct RowBuilder {
    contractor: Option<String>,
    start: Option<String>,
    end: Option<String>,
    street: Option<String>,
    city: Option<String>,
    zip: Option<String>,
}

impl RowBuilder {
    /// Rows without a contractor are layout filler and are not emitted.
    fn finish(self) -> Option<RawRecord> {
        let contractor = self.contractor?;
        Some(RawRecord {
            contractor,
            start: self.start.unwrap_or_default(),
            end: self.end.unwrap_or_default(),
            street: self.street.unwrap_or_default(),
            city: self.city.unwrap_or_default(),
            zip: self.zip.unwrap_or_default(),
            county: None,
        })
    }
}

/// Replay ordered cells into rows. A row only materialises at its terminator
/// cell; anything accumulated after the last terminator is dropped.
pub fn assemble(cells: &[CellEntry]) -> Vec<RawRecord> {
    let mut records = Vec::new();
    let mut current = RowBuilder::default();

    for cell in cells {
        let value = cell.value.clone();
        match column_for(cell.role) {
            Column::Contractor if cell.value == HEADER_LABEL => {}
            Column::Contractor => current.contractor = Some(value),
            Column::Start => current.start = Some(value),
            Column::End => current.end = Some(value),
            Column::Street => current.street = Some(value),
            Column::City => current.city = Some(value),
            Column::Zip => current.zip = Some(value),
            Column::Unclassified => {
                debug!("Unclassified column {} (cell {}): {}", cell.role, cell.index, cell.value);
            }
            Column::Terminator => {
                if let Some(record) = std::mem::take(&mut current).finish() {
                    records.push(record);
                }
            }
            Column::Ignored => {}
        }
    }

    records
}
