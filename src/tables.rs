use bincode::{Decode, Encode};
use std::collections::HashMap;

pub type BatchId = u32;

/// One tuple. `None` is an absent cell.
#[derive(Clone, Debug, PartialEq, Eq, Encode, Decode)]
pub struct Row {
    pub values: Vec<Option<String>>,
}

impl Row {
    pub fn new(values: Vec<Option<String>>) -> Self {
        Self { values }
    }

    pub fn from_strs(values: &[&str]) -> Self {
        Self {
            values: values.iter().map(|v| Some((*v).to_owned())).collect(),
        }
    }
}

/// The relation under analysis, already parsed.
#[derive(Clone, Debug, Default)]
pub struct Table {
    pub column_count: usize,
    pub rows: Vec<Row>,
}

impl Table {
    pub fn new(column_count: usize, rows: Vec<Row>) -> Self {
        Self { column_count, rows }
    }

    /// Cut the rows into `batch_count` contiguous batches of near-equal size.
    /// Never yields more batches than rows, and always at least one.
    pub fn batches(&self, batch_count: usize) -> Vec<Vec<Row>> {
        let n = batch_count.clamp(1, self.rows.len().max(1));
        let base = self.rows.len() / n;
        let extra = self.rows.len() % n;
        let mut out = Vec::with_capacity(n);
        let mut start = 0;
        for i in 0..n {
            let len = base + usize::from(i < extra);
            out.push(self.rows[start..start + len].to_vec());
            start += len;
        }
        out
    }
}

/// One batch being reassembled from split fragments.
#[derive(Debug, Default)]
struct PartialBatch {
    rows: Vec<Row>,
    split_count: u32,
    received: u32,
}

/// Peer-local batch cache. A batch is readable only once every declared
/// split arrived.
#[derive(Debug, Default)]
pub struct Batches {
    batches: HashMap<BatchId, PartialBatch>,
}

impl Batches {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one fragment. Returns the number of splits still missing.
    pub fn add_fragment(
        &mut self,
        id: BatchId,
        rows: Vec<Row>,
        split_count: u32,
    ) -> u32 {
        let b = self.batches.entry(id).or_default();
        b.split_count = split_count.max(1);
        b.received = (b.received + 1).min(b.split_count);
        b.rows.extend(rows);
        b.split_count - b.received
    }

    pub fn has_batch(&self, id: BatchId) -> bool {
        self.batches
            .get(&id)
            .is_some_and(|b| b.split_count > 0 && b.received == b.split_count)
    }

    pub fn batch(&self, id: BatchId) -> Option<&[Row]> {
        if self.has_batch(id) {
            self.batches.get(&id).map(|b| b.rows.as_slice())
        } else {
            None
        }
    }
}
