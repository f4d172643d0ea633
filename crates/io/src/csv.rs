// Delimited export read/write

use std::io::Read;
use std::path::Path;

use encoding_rs::{Encoding, UTF_8};
use opmerge_recon::config::FormatConfig;
use opmerge_recon::{RawFile, Table};

use crate::error::IoError;
use crate::fsutil::write_durable;

const UTF8_BOM: &[u8] = b"\xEF\xBB\xBF";

/// Look up an encoding by WHATWG label (`utf-8`, `windows-1252`, `latin1`, ...).
pub fn resolve_encoding(label: &str) -> Result<&'static Encoding, IoError> {
    Encoding::for_label(label.trim().as_bytes())
        .ok_or_else(|| IoError::UnknownEncoding(label.to_string()))
}

/// Read a file as text: UTF-8 (BOM stripped) when valid, otherwise decoded
/// with `fallback`.
pub fn read_file_as_utf8(path: &Path, fallback: &'static Encoding) -> Result<String, IoError> {
    let mut file = std::fs::File::open(path).map_err(|e| IoError::read(path, e))?;
    let mut bytes = Vec::new();
    file.read_to_end(&mut bytes)
        .map_err(|e| IoError::read(path, e))?;

    let body = bytes.strip_prefix(UTF8_BOM).unwrap_or(&bytes);
    match std::str::from_utf8(body) {
        Ok(s) => Ok(s.to_string()),
        Err(_) => {
            // Excel/SAP exports are usually windows-1252
            let (decoded, _, _) = fallback.decode(body);
            Ok(decoded.into_owned())
        }
    }
}

/// Split text into lines of cells. Rows may differ in width.
pub fn parse_lines(content: &str, delimiter: u8, path: &Path) -> Result<Vec<Vec<String>>, IoError> {
    let mut reader = csv::ReaderBuilder::new()
        .delimiter(delimiter)
        .has_headers(false)
        .flexible(true)
        .from_reader(content.as_bytes());

    let mut lines = Vec::new();
    for result in reader.records() {
        let record = result.map_err(|e| IoError::Csv {
            path: path.to_path_buf(),
            source: e,
        })?;
        lines.push(record.iter().map(str::to_string).collect());
    }
    Ok(lines)
}

/// Load one export with the configured delimiter and input encoding.
pub fn read_export(path: &Path, format: &FormatConfig) -> Result<RawFile, IoError> {
    let fallback = resolve_encoding(&format.input_encoding)?;
    let content = read_file_as_utf8(path, fallback)?;
    let lines = parse_lines(&content, format.delimiter_byte(), path)?;
    let file_name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    Ok(RawFile { file_name, lines })
}

/// Render lines as delimited text with CRLF terminators.
pub fn render_lines(lines: &[Vec<String>], delimiter: u8) -> Result<String, csv::Error> {
    let mut writer = csv::WriterBuilder::new()
        .delimiter(delimiter)
        .flexible(true)
        .terminator(csv::Terminator::CRLF)
        .from_writer(Vec::new());
    for line in lines {
        writer.write_record(line)?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| csv::Error::from(e.into_error()))?;
    Ok(String::from_utf8_lossy(&bytes).into_owned())
}

/// Durably write a table in the configured output encoding.
pub fn write_table(path: &Path, table: &Table, format: &FormatConfig) -> Result<(), IoError> {
    let encoding = resolve_encoding(&format.output_encoding)?;
    let text = render_lines(&table.to_lines(), format.delimiter_byte()).map_err(|e| {
        IoError::Csv {
            path: path.to_path_buf(),
            source: e,
        }
    })?;

    let bytes = if encoding == UTF_8 {
        text.into_bytes()
    } else {
        let (encoded, _, _) = encoding.encode(&text);
        encoded.into_owned()
    };
    write_durable(path, &bytes)
}
