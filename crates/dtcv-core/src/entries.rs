//! Loading the ordered set of DTC entries to test
//!
//! Two source formats are accepted:
//! - delimited text (`;` or `,`) with a header row naming the columns
//! - TOML with one `[[entry]]` table per DTC
//!
//! Malformed rows are skipped with a diagnostic; a load only fails when the
//! header is unusable or no valid entry remains.

use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{LoadError, LoadResult};
use crate::models::{default_description, fmi_in_range, spn_in_range, DtcEntry, Lamp};

/// A row that was skipped while loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RowDiagnostic {
    /// 1-based line (delimited) or entry number (TOML)
    pub line: usize,
    pub message: String,
}

/// Entries loaded from one source, in file order
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct EntrySet {
    pub entries: Vec<DtcEntry>,
    pub diagnostics: Vec<RowDiagnostic>,
}

impl EntrySet {
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn finish(self) -> LoadResult<Self> {
        for diag in &self.diagnostics {
            warn!(line = diag.line, "Skipped entry: {}", diag.message);
        }
        if self.entries.is_empty() {
            return Err(LoadError::NoValidEntries {
                rejected: self.diagnostics.len(),
            });
        }
        info!(
            loaded = self.entries.len(),
            skipped = self.diagnostics.len(),
            "Loaded DTC entries"
        );
        Ok(self)
    }
}

/// Load entries from a file, choosing the format by extension
pub fn load_entries(path: &Path) -> LoadResult<EntrySet> {
    let content = std::fs::read_to_string(path)?;
    let ext = path
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or("")
        .to_ascii_lowercase();

    match ext.as_str() {
        "toml" => parse_toml(&content),
        "csv" | "txt" | "" => parse_delimited(&content),
        other => Err(LoadError::UnsupportedFormat(other.to_string())),
    }
}

#[derive(Debug, Default)]
struct Columns {
    spn: Option<usize>,
    fmi: Option<usize>,
    lamp: Option<usize>,
    source_address: Option<usize>,
    description: Option<usize>,
}

impl Columns {
    fn map(header: &[String]) -> Self {
        let mut cols = Columns::default();
        for (i, name) in header.iter().enumerate() {
            let name = name.as_str();
            if (name.contains("SOURCE") && name.contains("CONTROLLER"))
                || name == "SA"
                || name == "SOURCE_ADDRESS"
            {
                cols.source_address = Some(i);
            } else if name.contains("SPN") {
                cols.spn = Some(i);
            } else if name.contains("FMI") {
                cols.fmi = Some(i);
            } else if name.contains("LAMP") {
                cols.lamp = Some(i);
            } else if name.contains("DESCRIPTION") {
                cols.description = Some(i);
            }
        }
        cols
    }
}

/// Split one row, honoring double-quoted fields (`""` is a literal quote)
fn split_row(line: &str, delimiter: char) -> Vec<String> {
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut quoted = false;
    let mut chars = line.chars().peekable();

    while let Some(c) = chars.next() {
        match c {
            '"' if quoted && chars.peek() == Some(&'"') => {
                field.push('"');
                chars.next();
            }
            '"' => quoted = !quoted,
            c if c == delimiter && !quoted => {
                fields.push(field.trim().to_string());
                field.clear();
            }
            c => field.push(c),
        }
    }
    fields.push(field.trim().to_string());
    fields
}

/// Parse a source address written as hex (`0x1A`, `1A`) or, failing that, decimal
pub fn parse_source_address(s: &str) -> Option<u8> {
    let s = s.trim();
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        return u8::from_str_radix(hex, 16).ok();
    }
    u8::from_str_radix(s, 16).ok().or_else(|| s.parse().ok())
}

/// Parse delimited text with a header row
pub fn parse_delimited(text: &str) -> LoadResult<EntrySet> {
    let mut lines = text
        .lines()
        .enumerate()
        .filter(|(_, line)| !line.trim().is_empty());

    let (_, header_line) = lines.next().ok_or(LoadError::Empty)?;
    let delimiter = if header_line.contains(';') { ';' } else { ',' };
    let header: Vec<String> = split_row(header_line, delimiter)
        .into_iter()
        .map(|h| h.to_ascii_uppercase())
        .collect();

    let cols = Columns::map(&header);
    let spn_col = cols.spn.ok_or(LoadError::MissingColumn("SPN"))?;
    let fmi_col = cols.fmi.ok_or(LoadError::MissingColumn("FMI"))?;
    let lamp_col = cols.lamp.ok_or(LoadError::MissingColumn("LAMP"))?;

    let mut set = EntrySet::default();
    for (i, line) in lines {
        let line_no = i + 1;
        let row = split_row(line, delimiter);
        match parse_row(&row, &cols, spn_col, fmi_col, lamp_col) {
            Ok(entry) => set.entries.push(entry),
            Err(message) => set.diagnostics.push(RowDiagnostic {
                line: line_no,
                message,
            }),
        }
    }

    set.finish()
}

fn parse_row(
    row: &[String],
    cols: &Columns,
    spn_col: usize,
    fmi_col: usize,
    lamp_col: usize,
) -> Result<DtcEntry, String> {
    let field = |col: usize, name: &str| {
        row.get(col)
            .map(String::as_str)
            .ok_or_else(|| format!("missing {} field", name))
    };

    let spn_text = field(spn_col, "SPN")?;
    let spn: u32 = spn_text
        .parse()
        .map_err(|_| format!("invalid SPN: {}", spn_text))?;
    if !spn_in_range(spn) {
        return Err(format!("SPN {} out of range", spn));
    }

    let fmi_text = field(fmi_col, "FMI")?;
    let fmi: u32 = fmi_text
        .parse()
        .map_err(|_| format!("invalid FMI: {}", fmi_text))?;
    if !fmi_in_range(fmi) {
        return Err(format!("FMI {} out of range", fmi));
    }

    let lamp: Lamp = field(lamp_col, "LAMP")?
        .parse()
        .map_err(|e: LoadError| e.to_string())?;

    let source_address = match cols.source_address.and_then(|c| row.get(c)) {
        Some(sa) if !sa.is_empty() => parse_source_address(sa)
            .ok_or_else(|| format!("invalid source address: {}", sa))?,
        _ => 0,
    };

    let description = cols
        .description
        .and_then(|c| row.get(c))
        .filter(|d| !d.is_empty())
        .cloned()
        .unwrap_or_else(|| default_description(spn, fmi as u8));

    Ok(DtcEntry {
        spn,
        fmi: fmi as u8,
        lamp,
        source_address,
        description,
        error_found: false,
    })
}

#[derive(Deserialize)]
struct TomlEntries {
    #[serde(default)]
    entry: Vec<toml::Value>,
}

/// Parse a TOML document of `[[entry]]` tables
pub fn parse_toml(text: &str) -> LoadResult<EntrySet> {
    let doc: TomlEntries = toml::from_str(text)?;
    let mut set = EntrySet::default();

    for (i, value) in doc.entry.into_iter().enumerate() {
        let line = i + 1;
        let entry: Result<DtcEntry, String> = value
            .try_into::<DtcEntry>()
            .map_err(|e| e.to_string())
            .and_then(|mut entry| {
                if !entry.is_valid() {
                    return Err(format!(
                        "SPN {} / FMI {} out of range",
                        entry.spn, entry.fmi
                    ));
                }
                if entry.description.is_empty() {
                    entry.description = default_description(entry.spn, entry.fmi);
                }
                Ok(entry)
            });

        match entry {
            Ok(entry) => set.entries.push(entry),
            Err(message) => set.diagnostics.push(RowDiagnostic { line, message }),
        }
    }

    set.finish()
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use std::io::Write;

    #[test]
    fn test_semicolon_file_with_source_controller() {
        let text = "SPN;FMI;Lamp;DTC Source Controller;Description\n\
                    520313;14;AMBER;0x00;Coolant level\n\
                    100;1;2;27;\n";
        let set = parse_delimited(text).unwrap();

        assert_eq!(set.len(), 2);
        assert!(set.diagnostics.is_empty());
        assert_eq!(set.entries[0].description, "Coolant level");
        assert_eq!(set.entries[0].lamp, Lamp::Amber);
        assert_eq!(set.entries[1].lamp, Lamp::Red);
        assert_eq!(set.entries[1].source_address, 0x27);
        assert_eq!(set.entries[1].description, "DTC 100-1");
    }

    #[test]
    fn test_bad_rows_are_skipped_with_diagnostics() {
        let text = "spn,fmi,lamp\n\
                    100,1,NONE\n\
                    abc,1,NONE\n\
                    100,40,NONE\n\
                    600000,1,NONE\n\
                    200,2,PURPLE\n\
                    300\n";
        let set = parse_delimited(text).unwrap();

        assert_eq!(set.len(), 1);
        let lines: Vec<usize> = set.diagnostics.iter().map(|d| d.line).collect();
        assert_eq!(lines, vec![3, 4, 5, 6, 7]);
        assert_eq!(set.diagnostics[1].message, "FMI 40 out of range");
    }

    #[test]
    fn test_quoted_description_keeps_columns() {
        let text = "SPN,FMI,LAMP,SA,DESCRIPTION\n\
                    520313,14,AMBER,0x00,\"Coolant temp, sensor \"\"B\"\"\"\n\
                    \"100\",\"1\",NONE,00,Oil pressure\n";
        let set = parse_delimited(text).unwrap();
        assert!(set.diagnostics.is_empty());
        assert_eq!(set.entries[0].description, "Coolant temp, sensor \"B\"");
        assert_eq!(set.entries[0].fmi, 14);
        assert_eq!(set.entries[1].spn, 100);
        assert_eq!(set.entries[1].description, "Oil pressure");
    }

    #[test]
    fn test_split_row_quotes() {
        assert_eq!(
            split_row(r#" a ;"b;c"; "d""e" ;"#, ';'),
            vec!["a", "b;c", "d\"e", ""]
        );
    }

    #[test]
    fn test_missing_column_rejects_load() {
        let err = parse_delimited("SPN;LAMP\n100;0\n").unwrap_err();
        assert!(matches!(err, LoadError::MissingColumn("FMI")));
    }

    #[test]
    fn test_zero_valid_rows_rejects_load() {
        let err = parse_delimited("SPN;FMI;LAMP\nx;y;z\n").unwrap_err();
        assert!(matches!(err, LoadError::NoValidEntries { rejected: 1 }));
        assert!(matches!(parse_delimited("\n\n"), Err(LoadError::Empty)));
    }

    #[test]
    fn test_source_address_forms() {
        assert_eq!(parse_source_address("0x1A"), Some(0x1A));
        assert_eq!(parse_source_address("FF"), Some(0xFF));
        assert_eq!(parse_source_address("10"), Some(0x10));
        assert_eq!(parse_source_address("100"), Some(100));
        assert_eq!(parse_source_address("0x100"), None);
        assert_eq!(parse_source_address("zz"), None);
    }

    #[test]
    fn test_toml_entries() {
        let text = r#"
            [[entry]]
            spn = 520313
            fmi = 14
            lamp = "AMBER"
            description = "Coolant level"

            [[entry]]
            spn = 0
            fmi = 1

            [[entry]]
            spn = 100
            fmi = 2
            lamp = 2
        "#;
        let set = parse_toml(text).unwrap();
        assert_eq!(set.len(), 2);
        assert_eq!(set.diagnostics.len(), 1);
        assert_eq!(set.diagnostics[0].line, 2);
        assert_eq!(set.entries[1].description, "DTC 100-2");
    }

    #[test]
    fn test_load_entries_by_extension() {
        let mut file = tempfile::Builder::new().suffix(".csv").tempfile().unwrap();
        writeln!(file, "SPN,FMI,LAMP").unwrap();
        writeln!(file, "1569,31,1").unwrap();
        let set = load_entries(file.path()).unwrap();
        assert_eq!(set.entries[0].spn, 1569);

        let other = tempfile::Builder::new().suffix(".xlsx").tempfile().unwrap();
        assert!(matches!(
            load_entries(other.path()),
            Err(LoadError::UnsupportedFormat(_))
        ));
    }
}
