use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::str::FromStr;

use crate::error::AttemptError;

pub const QUESTION_NODE_TYPE: &str = "question";
pub const QUESTION_BANK_NODE_TYPE: &str = "question_bank";

/// A node of the document tree: either a question leaf or a grouping
/// container (question bank) whose `content` carries its selection settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ContentNode {
    pub id: String,
    #[serde(rename = "type")]
    pub node_type: String,
    #[serde(default)]
    pub content: Value,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<ContentNode>,
}

impl ContentNode {
    pub fn question(id: impl Into<String>, content: Value) -> Self {
        Self {
            id: id.into(),
            node_type: QUESTION_NODE_TYPE.to_string(),
            content,
            children: Vec::new(),
        }
    }

    pub fn question_bank(
        id: impl Into<String>,
        content: Value,
        children: Vec<ContentNode>,
    ) -> Self {
        Self {
            id: id.into(),
            node_type: QUESTION_BANK_NODE_TYPE.to_string(),
            content,
            children,
        }
    }

    pub fn is_question(&self) -> bool {
        self.node_type == QUESTION_NODE_TYPE
    }

    /// Tag used to look up the grader for this question, e.g. `"multiple_choice"`.
    pub fn question_type(&self) -> Option<&str> {
        self.content.get("question_type").and_then(Value::as_str)
    }

    /// Depth-first lookup of a descendant (or self) by id.
    pub fn find(&self, id: &str) -> Option<&ContentNode> {
        if self.id == id {
            return Some(self);
        }
        self.children.iter().find_map(|child| child.find(id))
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReviewPolicy {
    Never,
    Always,
    NoAttemptsRemaining,
}

impl ReviewPolicy {
    pub fn as_str(&self) -> &'static str {
        match self {
            ReviewPolicy::Never => "never",
            ReviewPolicy::Always => "always",
            ReviewPolicy::NoAttemptsRemaining => "no-attempts-remaining",
        }
    }
}

impl FromStr for ReviewPolicy {
    type Err = AttemptError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value {
            "never" => Ok(ReviewPolicy::Never),
            "always" => Ok(ReviewPolicy::Always),
            "no-attempts-remaining" => Ok(ReviewPolicy::NoAttemptsRemaining),
            other => Err(AttemptError::UnknownReviewPolicy(other.to_string())),
        }
    }
}

/// Number of attempts a learner may make: a positive count or `"unlimited"`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "RawAttemptLimit", into = "RawAttemptLimit")]
pub enum AttemptLimit {
    #[default]
    Unlimited,
    Limited(u32),
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(untagged)]
enum RawAttemptLimit {
    Count(u32),
    Keyword(String),
}

impl TryFrom<RawAttemptLimit> for AttemptLimit {
    type Error = String;

    fn try_from(raw: RawAttemptLimit) -> Result<Self, Self::Error> {
        match raw {
            RawAttemptLimit::Count(0) => Err("attempt limit must be positive".to_string()),
            RawAttemptLimit::Count(n) => Ok(AttemptLimit::Limited(n)),
            RawAttemptLimit::Keyword(word) if word == "unlimited" => Ok(AttemptLimit::Unlimited),
            RawAttemptLimit::Keyword(word) => Err(format!("Invalid attempt limit: {}", word)),
        }
    }
}

impl From<AttemptLimit> for RawAttemptLimit {
    fn from(limit: AttemptLimit) -> Self {
        match limit {
            AttemptLimit::Unlimited => RawAttemptLimit::Keyword("unlimited".to_string()),
            AttemptLimit::Limited(n) => RawAttemptLimit::Count(n),
        }
    }
}

impl AttemptLimit {
    pub fn is_last_attempt(&self, attempt_number: u32) -> bool {
        matches!(self, AttemptLimit::Limited(limit) if *limit == attempt_number)
    }

    pub fn as_count(&self) -> Option<u32> {
        match self {
            AttemptLimit::Unlimited => None,
            AttemptLimit::Limited(n) => Some(*n),
        }
    }
}

fn default_review() -> String {
    ReviewPolicy::Never.as_str().to_string()
}

/// Read-only assessment definition supplied by the document model.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Assessment {
    pub id: String,
    pub draft_id: String,
    #[serde(default)]
    pub attempt_limit: AttemptLimit,
    /// Raw review setting; parsed lazily so that an unrecognised value is a
    /// logged configuration error instead of a load failure.
    #[serde(default = "default_review")]
    pub review: String,
    pub question_bank: ContentNode,
}

impl Assessment {
    pub fn review_policy(&self) -> Result<ReviewPolicy, AttemptError> {
        self.review.parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn attempt_limit_accepts_count_and_keyword() {
        let limited: AttemptLimit = serde_json::from_value(json!(3)).unwrap();
        assert_eq!(limited, AttemptLimit::Limited(3));

        let unlimited: AttemptLimit = serde_json::from_value(json!("unlimited")).unwrap();
        assert_eq!(unlimited, AttemptLimit::Unlimited);

        assert!(serde_json::from_value::<AttemptLimit>(json!(0)).is_err());
        assert!(serde_json::from_value::<AttemptLimit>(json!("lots")).is_err());
        assert_eq!(
            serde_json::to_value(AttemptLimit::Unlimited).unwrap(),
            json!("unlimited")
        );
    }

    #[test]
    fn last_attempt_only_for_limited() {
        assert!(AttemptLimit::Limited(2).is_last_attempt(2));
        assert!(!AttemptLimit::Limited(2).is_last_attempt(1));
        assert!(!AttemptLimit::Unlimited.is_last_attempt(1));
    }

    #[test]
    fn review_policy_parsing() {
        assert_eq!(
            "never".parse::<ReviewPolicy>().unwrap(),
            ReviewPolicy::Never
        );
        assert_eq!(
            "no-attempts-remaining".parse::<ReviewPolicy>().unwrap(),
            ReviewPolicy::NoAttemptsRemaining
        );
        assert!(matches!(
            "sometimes".parse::<ReviewPolicy>(),
            Err(AttemptError::UnknownReviewPolicy(value)) if value == "sometimes"
        ));
    }

    #[test]
    fn find_walks_nested_banks() {
        let tree = ContentNode::question_bank(
            "bank",
            json!({}),
            vec![ContentNode::question_bank(
                "inner",
                json!({}),
                vec![ContentNode::question("q1", json!({ "text": "hi" }))],
            )],
        );
        assert_eq!(tree.find("q1").map(|n| n.id.as_str()), Some("q1"));
        assert!(tree.find("missing").is_none());
    }
}
