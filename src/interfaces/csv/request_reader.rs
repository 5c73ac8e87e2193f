use crate::domain::request::Request;
use crate::error::{GuardError, Result};
use std::io::Read;

/// Reads deposit and withdrawal requests from a CSV source.
///
/// Expects a `type, client, amount` header. Whitespace around fields is trimmed
/// and a row with a missing, zero or negative amount fails to deserialize.
pub struct RequestReader<R: Read> {
    reader: csv::Reader<R>,
}

impl<R: Read> RequestReader<R> {
    /// Creates a new `RequestReader` from any `Read` source (e.g., File, Stdin).
    pub fn new(source: R) -> Self {
        let reader = csv::ReaderBuilder::new()
            .trim(csv::Trim::All)
            .flexible(true)
            .from_reader(source);
        Self { reader }
    }

    /// Returns an iterator that lazily reads and deserializes requests.
    pub fn requests(self) -> impl Iterator<Item = Result<Request>> {
        self.reader
            .into_deserialize()
            .map(|result| result.map_err(GuardError::from))
    }
}
