//! Parsing of the CSV-shaped sample blob.

use crate::error::Error;

/// A parsed sample file: one header row and the sample rows beneath it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct SampleSet {
    pub header: Vec<String>,
    pub rows: Vec<Vec<String>>,
}

impl SampleSet {
    pub fn parse(bytes: &[u8]) -> Result<Self, Error> {
        let mut reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .from_reader(bytes);
        let header = reader.headers()?.iter().map(String::from).collect();
        let mut rows = Vec::new();
        for record in reader.records() {
            rows.push(record?.iter().map(String::from).collect());
        }
        Ok(Self { header, rows })
    }

    /// Index of the named column.
    pub fn column(&self, name: &str) -> Option<usize> {
        self.header.iter().position(|column| column == name)
    }
}
