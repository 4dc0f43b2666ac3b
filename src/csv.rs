//! CSV codec for information tables
//!
//! Parses uploaded CSV text into a header plus row mappings and
//! serializes row mappings back to CSV. Quoting follows RFC 4180: a
//! quoted field may contain commas and newlines, and an embedded quote
//! is written as two consecutive quotes.
//!
//! Parsing is forgiving in two ways the portal relies on: blank lines
//! and all-empty records are skipped, and a short record fills the
//! remaining columns with empty strings.

use std::collections::BTreeMap;

use crate::types::{LecternError, Result};

/// Result of parsing CSV text
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ParsedCsv {
    /// Header names in file order
    pub columns: Vec<String>,
    /// One mapping per data record, keyed by header name
    pub rows: Vec<BTreeMap<String, String>>,
}

/// Parse CSV text into a header and row mappings.
///
/// Fails when the input contains no non-blank records.
pub fn parse(text: &str) -> Result<ParsedCsv> {
    let mut records = split_records(text);

    if records.is_empty() {
        return Err(LecternError::Validation(
            "CSV input contains no data".into(),
        ));
    }

    let columns = records.remove(0);

    let rows = records
        .into_iter()
        .map(|fields| {
            columns
                .iter()
                .enumerate()
                .map(|(i, name)| (name.clone(), fields.get(i).cloned().unwrap_or_default()))
                .collect()
        })
        .collect();

    Ok(ParsedCsv { columns, rows })
}

/// Check parsed CSV against the table invariants: a non-empty header
/// with unique names and at least one data row.
pub fn validate(columns: &[String], rows: &[BTreeMap<String, String>]) -> Result<()> {
    crate::db::schemas::validate_columns(columns)?;

    if rows.is_empty() {
        return Err(LecternError::Validation(
            "CSV input contains no data rows".into(),
        ));
    }

    Ok(())
}

/// Serialize rows to CSV text.
///
/// Field order follows `columns` regardless of map key order; keys
/// missing from a row render as empty fields. No trailing newline.
pub fn serialize(columns: &[String], rows: &[BTreeMap<String, String>]) -> String {
    let mut lines = Vec::with_capacity(rows.len() + 1);

    lines.push(
        columns
            .iter()
            .map(|c| escape_field(c))
            .collect::<Vec<_>>()
            .join(","),
    );

    for row in rows {
        lines.push(
            columns
                .iter()
                .map(|c| escape_field(row.get(c).map(String::as_str).unwrap_or("")))
                .collect::<Vec<_>>()
                .join(","),
        );
    }

    lines.join("\n")
}

/// Quote a field exactly when it contains a comma, quote, or newline
fn escape_field(field: &str) -> String {
    if field.contains(',') || field.contains('"') || field.contains('\n') || field.contains('\r') {
        format!("\"{}\"", field.replace('"', "\"\""))
    } else {
        field.to_string()
    }
}

/// Split raw text into records of fields, honoring quoting. Record
/// separators are newlines outside quotes; CRLF is treated as one
/// separator. Blank lines and all-empty records are dropped.
fn split_records(text: &str) -> Vec<Vec<String>> {
    let mut records = Vec::new();
    let mut fields = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;

    let mut chars = text.chars().peekable();
    while let Some(ch) = chars.next() {
        if in_quotes {
            match ch {
                '"' => {
                    if chars.peek() == Some(&'"') {
                        // Escaped quote
                        chars.next();
                        field.push('"');
                    } else {
                        in_quotes = false;
                    }
                }
                _ => field.push(ch),
            }
            continue;
        }

        match ch {
            '"' => in_quotes = true,
            ',' => {
                fields.push(std::mem::take(&mut field));
                // A trailing comma still means one more (empty) field
                if chars.peek().is_none() {
                    fields.push(String::new());
                }
            }
            '\r' => {
                if chars.peek() == Some(&'\n') {
                    chars.next();
                }
                end_record(&mut records, &mut fields, &mut field);
            }
            '\n' => end_record(&mut records, &mut fields, &mut field),
            _ => field.push(ch),
        }
    }

    end_record(&mut records, &mut fields, &mut field);

    records
}

fn end_record(records: &mut Vec<Vec<String>>, fields: &mut Vec<String>, field: &mut String) {
    if !field.is_empty() || !fields.is_empty() {
        fields.push(std::mem::take(field));
    }

    if fields.iter().any(|f| !f.is_empty()) {
        records.push(std::mem::take(fields));
    } else {
        fields.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn row(pairs: &[(&str, &str)]) -> BTreeMap<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn cols(names: &[&str]) -> Vec<String> {
        names.iter().map(|s| s.to_string()).collect()
    }

    #[test]
    fn test_parse_simple() {
        let parsed = parse("Name,Marks\nA,80\nB,75").unwrap();
        assert_eq!(parsed.columns, cols(&["Name", "Marks"]));
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[0], row(&[("Name", "A"), ("Marks", "80")]));
        assert_eq!(parsed.rows[1], row(&[("Name", "B"), ("Marks", "75")]));
    }

    #[test]
    fn test_parse_skips_blank_lines() {
        let parsed = parse("Name,Marks\n\nA,80\n\n\nB,75\n").unwrap();
        assert_eq!(parsed.rows.len(), 2);
    }

    #[test]
    fn test_parse_skips_all_empty_records() {
        // A line of only separators parses to all-empty fields
        let parsed = parse("Name,Marks\nA,80\n,\n").unwrap();
        assert_eq!(parsed.rows.len(), 1);
    }

    #[test]
    fn test_parse_short_record_fills_empty() {
        let parsed = parse("Name,Marks,Grade\nA,80").unwrap();
        assert_eq!(
            parsed.rows[0],
            row(&[("Name", "A"), ("Marks", "80"), ("Grade", "")])
        );
    }

    #[test]
    fn test_parse_quoted_comma_and_newline() {
        let parsed = parse("Name,Note\nA,\"line one\nline two, still\"").unwrap();
        assert_eq!(
            parsed.rows[0],
            row(&[("Name", "A"), ("Note", "line one\nline two, still")])
        );
    }

    #[test]
    fn test_parse_escaped_quote() {
        let parsed = parse("Name,Note\nA,\"said \"\"hi\"\"\"").unwrap();
        assert_eq!(parsed.rows[0].get("Note").unwrap(), "said \"hi\"");
    }

    #[test]
    fn test_parse_crlf() {
        let parsed = parse("Name,Marks\r\nA,80\r\nB,75\r\n").unwrap();
        assert_eq!(parsed.rows.len(), 2);
        assert_eq!(parsed.rows[1].get("Marks").unwrap(), "75");
    }

    #[test]
    fn test_parse_empty_input_fails() {
        assert!(matches!(parse(""), Err(LecternError::Validation(_))));
        assert!(matches!(parse("\n\n\n"), Err(LecternError::Validation(_))));
    }

    #[test]
    fn test_validate_duplicate_header() {
        let columns = cols(&["Name", "Name"]);
        let rows = vec![row(&[("Name", "A")])];
        assert!(matches!(
            validate(&columns, &rows),
            Err(LecternError::Validation(_))
        ));
    }

    #[test]
    fn test_validate_no_rows() {
        assert!(matches!(
            validate(&cols(&["Name"]), &[]),
            Err(LecternError::Validation(_))
        ));
    }

    #[test]
    fn test_serialize_field_order_follows_columns() {
        // BTreeMap orders keys alphabetically; columns say otherwise
        let columns = cols(&["Marks", "Name"]);
        let rows = vec![row(&[("Name", "A"), ("Marks", "80")])];
        assert_eq!(serialize(&columns, &rows), "Marks,Name\n80,A");
    }

    #[test]
    fn test_serialize_missing_key_renders_empty() {
        let columns = cols(&["Name", "Marks"]);
        let rows = vec![row(&[("Name", "A")])];
        assert_eq!(serialize(&columns, &rows), "Name,Marks\nA,");
    }

    #[test]
    fn test_serialize_quotes_only_when_needed() {
        let columns = cols(&["A", "B"]);
        let rows = vec![row(&[("A", "1,2"), ("B", "x")])];
        assert_eq!(serialize(&columns, &rows), "A,B\n\"1,2\",x");
    }

    #[test]
    fn test_serialize_doubles_embedded_quotes() {
        let columns = cols(&["A"]);
        let rows = vec![row(&[("A", "say \"hi\"")])];
        assert_eq!(serialize(&columns, &rows), "A\n\"say \"\"hi\"\"\"");
    }

    #[test]
    fn test_round_trip() {
        let columns = cols(&["Name", "Note", "Marks"]);
        let rows = vec![
            row(&[("Name", "A"), ("Note", "plain"), ("Marks", "80")]),
            row(&[("Name", "B,C"), ("Note", "multi\nline"), ("Marks", "\"90\"")]),
            row(&[("Name", "D"), ("Note", ""), ("Marks", "75")]),
        ];

        let text = serialize(&columns, &rows);
        let parsed = parse(&text).unwrap();

        assert_eq!(parsed.columns, columns);
        assert_eq!(parsed.rows, rows);
    }

    #[test]
    fn test_round_trip_special_fields_recovered_exactly() {
        for field in ["a,b", "a\"b", "a\nb", "a\r\nb", "\"\"", ","] {
            let columns = cols(&["X", "Y"]);
            let rows = vec![row(&[("X", field), ("Y", "marker")])];
            let parsed = parse(&serialize(&columns, &rows)).unwrap();
            assert_eq!(parsed.rows[0].get("X").unwrap(), field, "field {:?}", field);
        }
    }
}
