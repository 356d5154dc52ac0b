use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Metadata attached to a stored document.
pub type Metadata = Map<String, Value>;

/// Distance metric used to rank documents.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Distance {
    #[default]
    Cosine,
    Euclidean,
}

impl Distance {
    /// The sqlite-vec scalar function computing this metric.
    pub(crate) fn sql_function(self) -> &'static str {
        match self {
            Distance::Cosine => "vec_distance_cosine",
            Distance::Euclidean => "vec_distance_l2",
        }
    }
}

/// A document waiting to be embedded and written.
#[derive(Debug, Clone)]
pub struct NewDocument {
    pub content: String,
    pub metadata: Metadata,
}

impl NewDocument {
    /// A question/answer pair: the question is the content, the answer lives in metadata.
    pub fn question_answer(question: &str, answer: &str) -> Self {
        let mut metadata = Metadata::new();
        metadata.insert("answer".to_string(), Value::String(answer.to_string()));
        Self {
            content: question.to_string(),
            metadata,
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Document {
    pub id: i64,
    pub content: String,
    #[serde(skip_serializing)]
    pub embedding: Vec<f32>,
    pub metadata: Metadata,
    pub created_at: DateTime<Utc>,
}

impl Document {
    pub fn answer(&self) -> Option<&str> {
        self.metadata.get("answer").and_then(Value::as_str)
    }
}

/// A search hit; lower `distance` is closer.
#[derive(Debug, Clone, Serialize)]
pub struct ScoredDocument {
    pub document: Document,
    pub distance: f64,
}
