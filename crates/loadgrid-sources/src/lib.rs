//! Request sources.
//!
//! A [`RequestSource`] produces the individual request descriptors the
//! scheduler packs into jobs. Finite sources restart transparently when
//! they reach their end; `next` never reports exhaustion for a valid
//! source. Sources are shared behind an `Arc`, so they take `&self` and
//! keep any cursor state behind interior mutability.

use std::path::Path;
use std::sync::Mutex;

use rand::Rng;
use thiserror::Error;

use loadgrid_types::RequestSpec;

/// Errors surfaced while constructing or pulling from a source.
#[derive(Debug, Error)]
pub enum SourceError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("invalid request document: {0}")]
    Parse(#[from] serde_json::Error),

    #[error("invalid source configuration: {0}")]
    InvalidConfig(String),
}

/// Produces request descriptors for the scheduler.
pub trait RequestSource: Send + Sync {
    /// The next request to dispatch. Finite sources wrap around instead
    /// of signalling exhaustion.
    fn next(&self) -> Result<RequestSpec, SourceError>;

    /// Rewind to the beginning.
    fn reset(&self) -> Result<(), SourceError>;
}

/// Replays a file containing a stream of JSON request specs.
///
/// The file may hold either concatenated JSON objects or a single JSON
/// array; both decode to the same sequence. The full sequence is decoded
/// once at construction and a cursor wraps over it forever.
pub struct FileSource {
    requests: Vec<RequestSpec>,
    cursor: Mutex<usize>,
}

impl FileSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, SourceError> {
        let content = std::fs::read_to_string(path)?;
        Self::from_json(&content)
    }

    pub fn from_json(content: &str) -> Result<Self, SourceError> {
        let trimmed = content.trim_start();
        let requests: Vec<RequestSpec> = if trimmed.starts_with('[') {
            serde_json::from_str(trimmed)?
        } else {
            serde_json::Deserializer::from_str(content)
                .into_iter::<RequestSpec>()
                .collect::<Result<_, _>>()?
        };
        if requests.is_empty() {
            return Err(SourceError::InvalidConfig(
                "request file contains no requests".to_string(),
            ));
        }
        Ok(Self {
            requests,
            cursor: Mutex::new(0),
        })
    }

    pub fn len(&self) -> usize {
        self.requests.len()
    }

    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }
}

impl RequestSource for FileSource {
    fn next(&self) -> Result<RequestSpec, SourceError> {
        let mut cursor = self.cursor.lock().unwrap();
        let spec = self.requests[*cursor].clone();
        *cursor = (*cursor + 1) % self.requests.len();
        Ok(spec)
    }

    fn reset(&self) -> Result<(), SourceError> {
        *self.cursor.lock().unwrap() = 0;
        Ok(())
    }
}

/// Generates GET requests against a sum endpoint with two random operands.
pub struct RandomSumSource {
    path: String,
    min: i64,
    max: i64,
}

impl RandomSumSource {
    pub fn new(path: &str, min: i64, max: i64) -> Result<Self, SourceError> {
        if max < min {
            return Err(SourceError::InvalidConfig(
                "max must be >= min".to_string(),
            ));
        }
        let path = if path.is_empty() { "/sum" } else { path };
        Ok(Self {
            path: path.to_string(),
            min,
            max,
        })
    }

    fn next_value(&self) -> i64 {
        if self.max == self.min {
            return self.min;
        }
        rand::thread_rng().gen_range(self.min..=self.max)
    }
}

impl RequestSource for RandomSumSource {
    fn next(&self) -> Result<RequestSpec, SourceError> {
        let a = self.next_value();
        let b = self.next_value();
        Ok(RequestSpec {
            method: "GET".to_string(),
            path: self.path.clone(),
            query_string: format!("a={a}&b={b}"),
            ..RequestSpec::default()
        })
    }

    fn reset(&self) -> Result<(), SourceError> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn file_source_decodes_concatenated_objects() {
        let source = FileSource::from_json(
            "{\"path\":\"/a\"}\n{\"path\":\"/b\",\"method\":\"POST\"}\n",
        )
        .unwrap();
        assert_eq!(source.len(), 2);
        assert_eq!(source.next().unwrap().path, "/a");
        let second = source.next().unwrap();
        assert_eq!(second.path, "/b");
        assert_eq!(second.method, "POST");
    }

    #[test]
    fn file_source_decodes_a_json_array() {
        let source =
            FileSource::from_json("[{\"path\":\"/a\"},{\"path\":\"/b\"}]").unwrap();
        assert_eq!(source.len(), 2);
    }

    #[test]
    fn file_source_wraps_around_at_the_end() {
        let source = FileSource::from_json("{\"path\":\"/a\"}{\"path\":\"/b\"}").unwrap();
        assert_eq!(source.next().unwrap().path, "/a");
        assert_eq!(source.next().unwrap().path, "/b");
        assert_eq!(source.next().unwrap().path, "/a");
    }

    #[test]
    fn file_source_reset_rewinds_the_cursor() {
        let source = FileSource::from_json("{\"path\":\"/a\"}{\"path\":\"/b\"}").unwrap();
        source.next().unwrap();
        source.reset().unwrap();
        assert_eq!(source.next().unwrap().path, "/a");
    }

    #[test]
    fn empty_file_is_rejected() {
        assert!(matches!(
            FileSource::from_json(""),
            Err(SourceError::InvalidConfig(_))
        ));
        assert!(matches!(
            FileSource::from_json("[]"),
            Err(SourceError::InvalidConfig(_))
        ));
    }

    #[test]
    fn malformed_file_is_rejected() {
        assert!(matches!(
            FileSource::from_json("{\"path\": oops}"),
            Err(SourceError::Parse(_))
        ));
    }

    #[test]
    fn random_sum_requests_stay_in_range() {
        let source = RandomSumSource::new("/sum", 3, 7).unwrap();
        for _ in 0..50 {
            let spec = source.next().unwrap();
            assert_eq!(spec.method, "GET");
            assert_eq!(spec.path, "/sum");
            let operands: Vec<i64> = spec
                .query_string
                .split('&')
                .map(|pair| pair.split_once('=').unwrap().1.parse().unwrap())
                .collect();
            assert_eq!(operands.len(), 2);
            assert!(operands.iter().all(|v| (3..=7).contains(v)));
        }
    }

    #[test]
    fn random_sum_defaults_the_path() {
        let source = RandomSumSource::new("", 1, 1).unwrap();
        let spec = source.next().unwrap();
        assert_eq!(spec.path, "/sum");
        assert_eq!(spec.query_string, "a=1&b=1");
    }

    #[test]
    fn random_sum_rejects_inverted_bounds() {
        assert!(matches!(
            RandomSumSource::new("/sum", 10, 1),
            Err(SourceError::InvalidConfig(_))
        ));
    }
}
