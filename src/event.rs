//! Feedback event types recorded by the kiosk buttons.
//!
//! The serialized names match what the feedback endpoint validates, so the
//! same representation is used on the wire and in the persisted queue.

use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Satisfaction grade chosen by a kiosk user.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum SatisfactionGrade {
    #[serde(rename = "muito_satisfeito")]
    VerySatisfied,
    #[serde(rename = "satisfeito")]
    Satisfied,
    #[serde(rename = "insatisfeito")]
    Unsatisfied,
}

impl SatisfactionGrade {
    /// Get all grades in button order.
    pub fn all() -> &'static [SatisfactionGrade] {
        &[
            SatisfactionGrade::VerySatisfied,
            SatisfactionGrade::Satisfied,
            SatisfactionGrade::Unsatisfied,
        ]
    }

    /// Identifier accepted by the feedback endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            SatisfactionGrade::VerySatisfied => "muito_satisfeito",
            SatisfactionGrade::Satisfied => "satisfeito",
            SatisfactionGrade::Unsatisfied => "insatisfeito",
        }
    }
}

impl std::fmt::Display for SatisfactionGrade {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when text does not name a grade.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown satisfaction grade: '{0}'")]
pub struct ParseGradeError(pub String);

impl FromStr for SatisfactionGrade {
    type Err = ParseGradeError;

    /// Accepts the endpoint identifiers, the English names and the
    /// kiosk button shortcuts `1`, `2`, `3`.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "muito_satisfeito" | "very_satisfied" | "happy" | "1" => {
                Ok(SatisfactionGrade::VerySatisfied)
            }
            "satisfeito" | "satisfied" | "neutral" | "2" => Ok(SatisfactionGrade::Satisfied),
            "insatisfeito" | "unsatisfied" | "unhappy" | "3" => {
                Ok(SatisfactionGrade::Unsatisfied)
            }
            _ => Err(ParseGradeError(s.to_string())),
        }
    }
}

/// One tap on the kiosk, in the form kept by the pending queue.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FeedbackEvent {
    /// Grade the user tapped
    #[serde(rename = "grau_satisfacao")]
    pub grade: SatisfactionGrade,

    /// Client wall-clock time of the tap
    pub created_at: DateTime<Utc>,

    /// Locally generated 16-digit identifier, if one was assigned
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub local_id: Option<u64>,
}

impl FeedbackEvent {
    /// Create an event stamped with the current time.
    pub fn new(grade: SatisfactionGrade) -> Self {
        Self::at(grade, Utc::now())
    }

    /// Create an event with an explicit timestamp.
    pub fn at(grade: SatisfactionGrade, created_at: DateTime<Utc>) -> Self {
        Self {
            grade,
            created_at,
            local_id: None,
        }
    }

    /// Attach a local identifier.
    pub fn with_local_id(mut self, local_id: u64) -> Self {
        self.local_id = Some(local_id);
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn test_grade_wire_names() {
        let json = serde_json::to_string(&SatisfactionGrade::VerySatisfied).unwrap();
        assert_eq!(json, "\"muito_satisfeito\"");

        let grade: SatisfactionGrade = serde_json::from_str("\"insatisfeito\"").unwrap();
        assert_eq!(grade, SatisfactionGrade::Unsatisfied);

        for grade in SatisfactionGrade::all() {
            assert_eq!(grade.to_string(), grade.as_str());
        }
    }

    #[test]
    fn test_grade_from_str() {
        assert_eq!("1".parse::<SatisfactionGrade>(), Ok(SatisfactionGrade::VerySatisfied));
        assert_eq!(" Satisfied ".parse::<SatisfactionGrade>(), Ok(SatisfactionGrade::Satisfied));
        assert_eq!("insatisfeito".parse::<SatisfactionGrade>(), Ok(SatisfactionGrade::Unsatisfied));
        assert_eq!("unhappy".parse::<SatisfactionGrade>(), Ok(SatisfactionGrade::Unsatisfied));

        let err = "meh".parse::<SatisfactionGrade>().unwrap_err();
        assert_eq!(err.to_string(), "unknown satisfaction grade: 'meh'");
    }

    #[test]
    fn test_event_serialization_shape() {
        let at = Utc.with_ymd_and_hms(2024, 3, 1, 12, 30, 0).unwrap();
        let event = FeedbackEvent::at(SatisfactionGrade::Satisfied, at);

        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["grau_satisfacao"], "satisfeito");
        assert_eq!(value["created_at"], "2024-03-01T12:30:00Z");
        assert!(value.get("local_id").is_none());

        let with_id = event.with_local_id(1_709_296_200_000_042);
        let value = serde_json::to_value(&with_id).unwrap();
        assert_eq!(value["local_id"], 1_709_296_200_000_042u64);
    }

    #[test]
    fn test_event_without_local_id_parses() {
        let json = r#"{"grau_satisfacao":"muito_satisfeito","created_at":"2024-03-01T12:30:00.123Z"}"#;
        let event: FeedbackEvent = serde_json::from_str(json).unwrap();
        assert_eq!(event.grade, SatisfactionGrade::VerySatisfied);
        assert!(event.local_id.is_none());
    }
}
