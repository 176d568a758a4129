//! Dot-path field mapping from dataset items to grader inputs
//!
//! Paths such as `evaluation_data.response_a` or `items.0.text` are parsed
//! once when the mapper is built, so a bad expression is a configuration
//! error and never surfaces in the middle of a grading run.

use indexmap::IndexMap;
use serde_json::Value;

use super::scoring::GraderInput;

/// Field mapping and projection errors
#[derive(Debug, Clone, PartialEq, thiserror::Error)]
pub enum MappingError {
    #[error("invalid path '{path}' for field '{target}': {reason}")]
    InvalidPath {
        target: String,
        path: String,
        reason: String,
    },

    #[error("grader '{grader}' requires field '{field}' but the mapper does not provide it")]
    MissingRequiredField { grader: String, field: String },

    #[error("item {item}: path '{path}' (field '{target}' of grader '{grader}') does not resolve")]
    Unresolved {
        grader: String,
        item: usize,
        target: String,
        path: String,
    },

    #[error("duplicate grader name '{0}'")]
    DuplicateGrader(String),
}

#[derive(Debug, Clone, PartialEq)]
enum Segment {
    Key(String),
    /// Numeric segment; indexes arrays, falls back to a key on objects
    Index(usize, String),
}

/// A compiled dot-path expression
#[derive(Debug, Clone, PartialEq)]
pub struct FieldPath {
    raw: String,
    segments: Vec<Segment>,
}

impl FieldPath {
    pub fn parse(target: &str, raw: &str) -> Result<Self, MappingError> {
        let invalid = |reason: &str| MappingError::InvalidPath {
            target: target.to_string(),
            path: raw.to_string(),
            reason: reason.to_string(),
        };

        if raw.trim().is_empty() {
            return Err(invalid("empty path"));
        }

        let mut segments = Vec::new();
        for part in raw.split('.') {
            if part.is_empty() {
                return Err(invalid("empty segment"));
            }
            if !part.chars().all(|c| c.is_alphanumeric() || c == '_' || c == '-') {
                return Err(invalid("segments may only contain letters, digits, '_' and '-'"));
            }
            segments.push(match part.parse::<usize>() {
                Ok(index) => Segment::Index(index, part.to_string()),
                Err(_) => Segment::Key(part.to_string()),
            });
        }

        Ok(Self {
            raw: raw.to_string(),
            segments,
        })
    }

    pub fn as_str(&self) -> &str {
        &self.raw
    }

    pub fn resolve<'a>(&self, item: &'a Value) -> Option<&'a Value> {
        self.segments.iter().try_fold(item, |current, segment| match (segment, current) {
            (Segment::Key(key), Value::Object(map)) => map.get(key),
            (Segment::Index(index, _), Value::Array(list)) => list.get(*index),
            (Segment::Index(_, key), Value::Object(map)) => map.get(key),
            _ => None,
        })
    }
}

/// Compiled mapping of grader field name to source path
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FieldMapper {
    fields: IndexMap<String, FieldPath>,
}

impl FieldMapper {
    pub fn compile<I, K, V>(mapping: I) -> Result<Self, MappingError>
    where
        I: IntoIterator<Item = (K, V)>,
        K: Into<String>,
        V: AsRef<str>,
    {
        let mut fields = IndexMap::new();
        for (target, path) in mapping {
            let target = target.into();
            let path = FieldPath::parse(&target, path.as_ref())?;
            fields.insert(target, path);
        }
        Ok(Self { fields })
    }

    pub fn provides(&self, field: &str) -> bool {
        self.fields.contains_key(field)
    }

    /// Project one item; on failure returns the offending (target, path)
    pub fn project(&self, item: &Value) -> Result<GraderInput, (String, String)> {
        let mut input = GraderInput::new();
        for (target, path) in &self.fields {
            let value = path
                .resolve(item)
                .ok_or_else(|| (target.clone(), path.as_str().to_string()))?;
            input.insert(target.clone(), value.clone());
        }
        Ok(input)
    }
}
