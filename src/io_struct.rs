use crate::error::PredictError;

/// Parsed request body: one feature row per input line, in input order. Row
/// width is checked against the model's feature count at parse time so the
/// model never sees a malformed batch.
#[derive(Debug, Clone, PartialEq)]
pub struct CsvBatch {
    pub rows: Vec<Vec<f32>>,
}

impl CsvBatch {
    pub fn len(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }
}

/// Decodes a raw request body as CSV feature rows.
///
/// The body must be UTF-8 text with one comma-separated row of numeric
/// tokens per line, each row exactly `num_features` wide. Any violation is
/// a [`PredictError::InputFormat`] naming the offending line.
pub fn parse_csv(raw: &[u8], num_features: usize) -> Result<CsvBatch, PredictError> {
    let text = std::str::from_utf8(raw)
        .map_err(|_| PredictError::InputFormat("body is not valid UTF-8".to_string()))?;

    let mut rows = Vec::new();
    for (lineno, line) in text.lines().enumerate() {
        let fields: Vec<&str> = line.split(',').collect();
        if fields.len() != num_features {
            return Err(PredictError::InputFormat(format!(
                "line {}: expected {} columns, got {}",
                lineno + 1,
                num_features,
                fields.len()
            )));
        }
        let mut row = Vec::with_capacity(num_features);
        for field in fields {
            let value = field.trim().parse::<f32>().map_err(|_| {
                PredictError::InputFormat(format!(
                    "line {}: invalid numeric value {:?}",
                    lineno + 1,
                    field.trim()
                ))
            })?;
            row.push(value);
        }
        rows.push(row);
    }

    if rows.is_empty() {
        return Err(PredictError::InputFormat("empty request body".to_string()));
    }
    Ok(CsvBatch { rows })
}

/// Serializes predictions back to the transport format: one output line per
/// input line, newline-terminated.
pub fn encode_csv(outputs: &[f32]) -> String {
    let mut text = outputs
        .iter()
        .map(|v| v.to_string())
        .collect::<Vec<_>>()
        .join("\n");
    text.push('\n');
    text
}
