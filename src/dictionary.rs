use std::collections::HashMap;

use crate::tables::Row;

/// Code reserved for absent cells.
pub const NULL_CODE: u32 = 0;

/// Per-column dictionary: every distinct value gets a small integer code,
/// assigned in first-seen order starting at 1.
#[derive(Debug, Default)]
pub struct DictionaryEncoder {
    codes: HashMap<String, u32>,
}

impl DictionaryEncoder {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn encode(&mut self, value: Option<&str>) -> u32 {
        let Some(value) = value else {
            return NULL_CODE;
        };
        if let Some(code) = self.codes.get(value) {
            return *code;
        }
        let code = self.codes.len() as u32 + 1;
        self.codes.insert(value.to_owned(), code);
        code
    }
}

/// Encode `rows` column by column. Rows shorter than `column_count` are
/// padded with nulls.
pub fn encode_rows<'a>(
    rows: impl IntoIterator<Item = &'a Row>,
    column_count: usize,
) -> Vec<Vec<u32>> {
    let mut encoders: Vec<DictionaryEncoder> =
        (0..column_count).map(|_| DictionaryEncoder::new()).collect();
    rows.into_iter()
        .map(|row| {
            encoders
                .iter_mut()
                .enumerate()
                .map(|(i, enc)| enc.encode(row.values.get(i).and_then(|v| v.as_deref())))
                .collect()
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn equal_values_share_a_code_per_column() {
        let rows = vec![
            Row::from_strs(&["x", "x"]),
            Row::new(vec![Some("y".into()), None]),
            Row::from_strs(&["x", "z"]),
        ];
        let enc = encode_rows(&rows, 2);
        assert_eq!(enc[0][0], enc[2][0]);
        assert_ne!(enc[0][0], enc[1][0]);
        assert_eq!(enc[1][1], NULL_CODE);
        // Codes are per column: "x" in column 1 is independent of column 0.
        assert_eq!(enc[0][1], 1);
    }
}
