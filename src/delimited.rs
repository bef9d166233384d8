//! Comma-delimited text codec shared by CSV input and prompt serialization.

pub const DELIMITER: char = ',';

/// Appends one field to `out`, quoting it when it contains the delimiter,
/// a quote or a line break. Embedded quotes are doubled.
pub fn push_field(out: &mut String, value: &str) {
    if value.contains(DELIMITER) || value.contains('"') || value.contains('\n') || value.contains('\r')
    {
        out.push('"');
        out.push_str(&value.replace('"', "\"\""));
        out.push('"');
    } else {
        out.push_str(value);
    }
}

/// Joins fields into one record line (without the line terminator)
pub fn format_record<'a>(fields: impl IntoIterator<Item = &'a str>) -> String {
    let mut line = String::new();
    for (i, field) in fields.into_iter().enumerate() {
        if i > 0 {
            line.push(DELIMITER);
        }
        push_field(&mut line, field);
    }
    line
}

/// Parses delimited text into records of raw fields
///
/// Quoted fields may span lines and contain doubled quotes. Both `\n` and
/// `\r\n` terminate records. A trailing line terminator does not produce an
/// extra empty record, and neither do blank lines.
pub fn parse_records(content: &str) -> Vec<Vec<String>> {
    let content = content.strip_prefix('\u{feff}').unwrap_or(content);
    let mut records = Vec::new();
    let mut record = Vec::new();
    let mut field = String::new();
    let mut in_quotes = false;
    // A quoted empty field still counts as a field on an otherwise blank line.
    let mut field_started = false;
    let mut chars = content.chars().peekable();

    while let Some(c) = chars.next() {
        if in_quotes {
            match c {
                '"' if chars.peek() == Some(&'"') => {
                    field.push('"');
                    chars.next();
                }
                '"' => in_quotes = false,
                _ => field.push(c),
            }
            continue;
        }

        match c {
            '"' => {
                in_quotes = true;
                field_started = true;
            }
            c if c == DELIMITER => {
                record.push(std::mem::take(&mut field));
                field_started = true;
            }
            '\r' if chars.peek() == Some(&'\n') => {}
            '\n' | '\r' => {
                if field_started || !field.is_empty() || !record.is_empty() {
                    record.push(std::mem::take(&mut field));
                    records.push(std::mem::take(&mut record));
                }
                field_started = false;
            }
            _ => field.push(c),
        }
    }

    if field_started || !field.is_empty() || !record.is_empty() {
        record.push(field);
        records.push(record);
    }

    records
}
