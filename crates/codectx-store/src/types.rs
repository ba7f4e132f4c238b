use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Payload key every point carries; deletion and listing filter on it.
pub const FILE_PATH_KEY: &str = "file_path";

/// Similarity metric, fixed when a collection is created.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Dot,
}

impl fmt::Display for Distance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Cosine => f.write_str("cosine"),
            Self::Dot => f.write_str("dot"),
        }
    }
}

impl Distance {
    /// Similarity between two vectors of equal length; higher is closer.
    #[must_use]
    pub fn score(self, a: &[f32], b: &[f32]) -> f32 {
        let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
        match self {
            Self::Dot => dot,
            Self::Cosine => {
                let norm_a = a.iter().map(|x| x * x).sum::<f32>().sqrt();
                let norm_b = b.iter().map(|x| x * x).sum::<f32>().sqrt();
                if norm_a == 0.0 || norm_b == 0.0 {
                    0.0
                } else {
                    dot / (norm_a * norm_b)
                }
            }
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct VectorPoint {
    /// Point id; must be a UUID string for Qdrant.
    pub id: String,
    pub file_path: String,
    pub vector: Vec<f32>,
    pub payload: Map<String, Value>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct QueryHit {
    pub id: String,
    pub file_path: String,
    pub score: f32,
    pub payload: Map<String, Value>,
}

impl QueryHit {
    #[must_use]
    pub fn payload_str(&self, key: &str) -> Option<&str> {
        self.payload.get(key).and_then(Value::as_str)
    }

    #[must_use]
    pub fn payload_u64(&self, key: &str) -> Option<u64> {
        self.payload.get(key).and_then(Value::as_u64)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cosine_identical_is_one() {
        let v = [0.3, 0.4, 0.5];
        assert!((Distance::Cosine.score(&v, &v) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn cosine_orthogonal_is_zero() {
        assert!(Distance::Cosine.score(&[1.0, 0.0], &[0.0, 1.0]).abs() < 1e-6);
    }

    #[test]
    fn cosine_zero_vector_is_zero() {
        assert!(Distance::Cosine.score(&[0.0, 0.0], &[1.0, 1.0]).abs() < f32::EPSILON);
    }

    #[test]
    fn dot_is_unnormalized() {
        assert!((Distance::Dot.score(&[2.0, 0.0], &[3.0, 0.0]) - 6.0).abs() < 1e-6);
    }

    #[test]
    fn distance_serde_lowercase() {
        assert_eq!(serde_json::to_string(&Distance::Dot).unwrap(), "\"dot\"");
        let d: Distance = serde_json::from_str("\"cosine\"").unwrap();
        assert_eq!(d, Distance::Cosine);
    }

    #[test]
    fn payload_accessors() {
        let mut payload = Map::new();
        payload.insert("start_line".into(), Value::from(12));
        payload.insert("symbol".into(), Value::from("parse"));
        let hit = QueryHit {
            id: "id".into(),
            file_path: "src/a.rs".into(),
            score: 0.5,
            payload,
        };
        assert_eq!(hit.payload_u64("start_line"), Some(12));
        assert_eq!(hit.payload_str("symbol"), Some("parse"));
        assert_eq!(hit.payload_str("missing"), None);
    }

    use proptest::prelude::*;

    proptest! {
        #[test]
        fn cosine_is_bounded(a in proptest::collection::vec(-10.0f32..10.0, 4),
                             b in proptest::collection::vec(-10.0f32..10.0, 4)) {
            let s = Distance::Cosine.score(&a, &b);
            prop_assert!((-1.0001..=1.0001).contains(&s));
        }
    }
}
