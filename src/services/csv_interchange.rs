//! CSV Interchange
//!
//! Tool result rows go to the code interpreter as CSV files, and its CSV
//! outputs come back as JSON rows.

use serde_json::{Map, Number, Value};

use crate::utils::error::{AppError, AppResult};

/// Union of row keys in first-seen order.
fn header_of(rows: &[Value]) -> Vec<String> {
    let mut header: Vec<String> = Vec::new();
    for row in rows {
        if let Some(obj) = row.as_object() {
            for key in obj.keys() {
                if !header.iter().any(|h| h == key) {
                    header.push(key.clone());
                }
            }
        }
    }
    header
}

fn cell(value: Option<&Value>) -> String {
    match value {
        None | Some(Value::Null) => String::new(),
        Some(Value::String(s)) => s.clone(),
        Some(other) => other.to_string(),
    }
}

/// Render rows as CSV.
///
/// An empty row set still yields a header line, from `fallback_columns` or
/// the single column `data` when none are known.
pub fn rows_to_csv(rows: &[Value], fallback_columns: &[String]) -> AppResult<String> {
    let mut header = header_of(rows);
    if header.is_empty() {
        header = if fallback_columns.is_empty() {
            vec!["data".to_string()]
        } else {
            fallback_columns.to_vec()
        };
    }

    let mut writer = csv::Writer::from_writer(Vec::new());
    writer
        .write_record(&header)
        .map_err(|e| AppError::internal(format!("csv write failed: {}", e)))?;
    for row in rows {
        let record: Vec<String> = header.iter().map(|h| cell(row.get(h))).collect();
        writer
            .write_record(&record)
            .map_err(|e| AppError::internal(format!("csv write failed: {}", e)))?;
    }
    let bytes = writer
        .into_inner()
        .map_err(|e| AppError::internal(format!("csv flush failed: {}", e)))?;
    String::from_utf8(bytes).map_err(|e| AppError::internal(format!("csv is not utf-8: {}", e)))
}

/// Parse a CSV cell back into a JSON primitive.
fn parse_cell(raw: &str) -> Value {
    let trimmed = raw.trim();
    if trimmed.is_empty() {
        return Value::Null;
    }
    match trimmed {
        "true" | "True" | "TRUE" => return Value::Bool(true),
        "false" | "False" | "FALSE" => return Value::Bool(false),
        _ => {}
    }
    // Keep identifiers such as zip codes or order numbers with leading zeros as text.
    let leading_zero = trimmed.len() > 1
        && trimmed.starts_with('0')
        && !trimmed.starts_with("0.");
    if !leading_zero {
        if let Ok(i) = trimmed.parse::<i64>() {
            return Value::Number(i.into());
        }
        if let Ok(f) = trimmed.parse::<f64>() {
            if let Some(n) = Number::from_f64(f) {
                return Value::Number(n);
            }
        }
    }
    Value::String(raw.to_string())
}

/// Parse CSV text into JSON rows keyed by header.
pub fn csv_to_rows(text: &str) -> AppResult<Vec<Map<String, Value>>> {
    let mut reader = csv::ReaderBuilder::new()
        .flexible(true)
        .from_reader(text.as_bytes());
    let header: Vec<String> = reader
        .headers()
        .map_err(|e| AppError::validation(format!("csv header unreadable: {}", e)))?
        .iter()
        .map(|h| h.trim().to_string())
        .collect();

    let mut rows = Vec::new();
    for record in reader.records() {
        let record = record.map_err(|e| AppError::validation(format!("csv row unreadable: {}", e)))?;
        let row: Map<String, Value> = header
            .iter()
            .enumerate()
            .map(|(i, name)| (name.clone(), record.get(i).map(parse_cell).unwrap_or(Value::Null)))
            .collect();
        rows.push(row);
    }
    Ok(rows)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_header_is_union_in_first_seen_order() {
        let rows = vec![
            json!({"order_number": "A1", "status": "on_hold"}),
            json!({"order_number": "A2", "carrier": "UPS"}),
        ];
        let csv = rows_to_csv(&rows, &[]).unwrap();
        let mut lines = csv.lines();
        assert_eq!(lines.next(), Some("order_number,status,carrier"));
        assert_eq!(lines.next(), Some("A1,on_hold,"));
        assert_eq!(lines.next(), Some("A2,,UPS"));
    }

    #[test]
    fn test_empty_rows_keep_schema() {
        let columns = vec!["sku".to_string(), "available".to_string()];
        assert_eq!(rows_to_csv(&[], &columns).unwrap(), "sku,available\n");
        assert_eq!(rows_to_csv(&[], &[]).unwrap(), "data\n");
    }

    #[test]
    fn test_quoting_and_nested_values() {
        let rows = vec![json!({"note": "late, damaged", "tags": ["a", "b"], "qty": 3})];
        let csv = rows_to_csv(&rows, &[]).unwrap();
        assert!(csv.contains("\"late, damaged\""));
        assert!(csv.contains("\"[\"\"a\"\",\"\"b\"\"]\""));
    }

    #[test]
    fn test_csv_to_rows_parses_primitives() {
        let rows = csv_to_rows("sku,available,rate,active,zip,note\nA-1,12,0.5,true,02134,\n").unwrap();
        assert_eq!(rows.len(), 1);
        let row = &rows[0];
        assert_eq!(row["sku"], "A-1");
        assert_eq!(row["available"], 12);
        assert_eq!(row["rate"], 0.5);
        assert_eq!(row["active"], true);
        assert_eq!(row["zip"], "02134");
        assert_eq!(row["note"], Value::Null);
    }

    #[test]
    fn test_csv_to_rows_header_only() {
        assert!(csv_to_rows("a,b\n").unwrap().is_empty());
    }
}
