//! Splitting raw delimited lines into metadata, header and rows.

use crate::config::FormatConfig;
use crate::error::MergeError;
use crate::model::{
    MergedTable, SourceMeta, SourceTable, Table, META_MATERIAL, META_ORDER, META_ROUTING,
    META_SERIAL,
};

fn is_blank(line: &[String]) -> bool {
    line.iter().all(|c| c.trim().is_empty())
}

/// Position of the structural header: the first line whose first cell
/// starts with the header marker.
fn find_header(lines: &[Vec<String>], marker: &str) -> Option<usize> {
    lines
        .iter()
        .position(|l| l.first().is_some_and(|c| c.trim_start().starts_with(marker)))
}

/// Metadata key/value pairs; lines with fewer than two cells are ignored.
pub fn read_meta(metadata: &[Vec<String>]) -> SourceMeta {
    let get = |key: &str| -> String {
        metadata
            .iter()
            .filter(|l| l.len() >= 2)
            .find(|l| l[0].trim() == key)
            .map(|l| l[1].trim().to_string())
            .unwrap_or_default()
    };
    SourceMeta {
        order_id: get(META_ORDER),
        material_id: get(META_MATERIAL),
        serial: get(META_SERIAL),
        routing: get(META_ROUTING),
    }
}

/// Drop trailing empty cells, e.g. the padding added to merged metadata.
pub fn trim_trailing_empty(line: &[String]) -> Vec<String> {
    let end = line
        .iter()
        .rposition(|c| !c.is_empty())
        .map(|i| i + 1)
        .unwrap_or(0);
    line[..end].to_vec()
}

/// Pad or cut a row to `width` cells. Returns the number of non-empty
/// cells that were cut off.
pub fn fit_row(row: &mut Vec<String>, width: usize) -> usize {
    let dropped = row
        .iter()
        .skip(width)
        .filter(|c| !c.trim().is_empty())
        .count();
    row.resize(width, String::new());
    dropped
}

impl SourceTable {
    /// Build a source table from raw lines.
    ///
    /// Returns `None` when no line carries the structural-header marker; the
    /// caller reports it as a skipped source.
    pub fn from_lines(
        file_name: &str,
        lines: Vec<Vec<String>>,
        format: &FormatConfig,
    ) -> Option<SourceTable> {
        let header_at = find_header(&lines, &format.header_marker)?;
        let meta_end = format.metadata_lines.min(header_at);

        let mut lines = lines;
        let rows: Vec<Vec<String>> = lines
            .split_off(header_at + 1)
            .into_iter()
            .filter(|l| !is_blank(l))
            .collect();
        let header = lines.pop().unwrap_or_default();
        lines.truncate(meta_end);
        let metadata = lines;

        Some(SourceTable {
            file_name: file_name.to_string(),
            meta: read_meta(&metadata),
            table: Table { metadata, header, rows },
        })
    }
}

impl MergedTable {
    /// Parse a merged export. The header is the marker line, or the line
    /// right after the metadata block when no line carries the marker.
    pub fn from_lines(
        file_name: &str,
        lines: Vec<Vec<String>>,
        format: &FormatConfig,
    ) -> Result<MergedTable, MergeError> {
        let header_at = match find_header(&lines, &format.header_marker) {
            Some(i) => i,
            None if lines.len() > format.metadata_lines => format.metadata_lines,
            None => return Err(MergeError::TruncatedTable { lines: lines.len() }),
        };
        let meta_end = format.metadata_lines.min(header_at);

        let mut lines = lines;
        let rows: Vec<Vec<String>> = lines
            .split_off(header_at + 1)
            .into_iter()
            .filter(|l| !is_blank(l))
            .collect();
        let header = lines.pop().unwrap_or_default();
        lines.truncate(meta_end);

        Ok(MergedTable {
            file_name: file_name.to_string(),
            table: Table { metadata: lines, header, rows },
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn line(values: &[&str]) -> Vec<String> {
        values.iter().map(|v| v.to_string()).collect()
    }

    fn export() -> Vec<Vec<String>> {
        vec![
            line(&["Material-Id", "M-7"]),
            line(&["Arbeitsplan", "AP1"]),
            line(&["Fertigungsauftrag", "100200"]),
            line(&["MSN", "S01"]),
            line(&["SAP-Arbeitsvorgang", "Text", "Einheit", "Wert"]),
            line(&["0010", "Bohren", "min", "12"]),
            line(&["", "", "", ""]),
            line(&["0020", "Fraesen", "min", "3"]),
        ]
    }

    #[test]
    fn source_table_split() {
        let src = SourceTable::from_lines("a.csv", export(), &FormatConfig::default()).unwrap();
        assert_eq!(src.table.metadata.len(), 4);
        assert_eq!(src.table.header[0], "SAP-Arbeitsvorgang");
        // blank line skipped
        assert_eq!(src.table.rows.len(), 2);
        assert_eq!(src.meta.order_id, "100200");
        assert_eq!(src.meta.material_id, "M-7");
        assert_eq!(src.meta.serial, "S01");
        assert_eq!(src.meta.routing, "AP1");
    }

    #[test]
    fn header_found_after_extra_lines() {
        let mut lines = export();
        lines.insert(4, line(&["Kommentar", "x"]));
        let src = SourceTable::from_lines("a.csv", lines, &FormatConfig::default()).unwrap();
        assert_eq!(src.table.metadata.len(), 4);
        assert_eq!(src.table.rows.len(), 2);
    }

    #[test]
    fn missing_marker_is_none() {
        let mut lines = export();
        lines[4][0] = "Vorgang".into();
        assert!(SourceTable::from_lines("a.csv", lines, &FormatConfig::default()).is_none());
    }

    #[test]
    fn merged_table_falls_back_to_fixed_header_line() {
        let mut lines = export();
        lines[4][0] = "Vorgang".into();
        let merged = MergedTable::from_lines("m.csv", lines, &FormatConfig::default()).unwrap();
        assert_eq!(merged.table.header[0], "Vorgang");
        assert_eq!(merged.table.rows.len(), 2);
    }

    #[test]
    fn merged_table_too_short() {
        let lines = vec![line(&["a", "b"])];
        let err = MergedTable::from_lines("m.csv", lines, &FormatConfig::default()).unwrap_err();
        assert!(matches!(err, MergeError::TruncatedTable { lines: 1 }));
    }

    #[test]
    fn fit_row_pads_and_cuts() {
        let mut row = line(&["a"]);
        assert_eq!(fit_row(&mut row, 3), 0);
        assert_eq!(row, line(&["a", "", ""]));

        let mut row = line(&["a", "b", "", "x"]);
        assert_eq!(fit_row(&mut row, 2), 1);
        assert_eq!(row, line(&["a", "b"]));
    }

    #[test]
    fn trailing_padding_removed() {
        assert_eq!(trim_trailing_empty(&line(&["k", "v", "", ""])), line(&["k", "v"]));
        assert!(trim_trailing_empty(&line(&["", ""])).is_empty());
    }
}
