use serde::{Deserialize, Serialize};

/// One friend recognized in an uploaded photo
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaceMatch {
    pub user_id: String,
    pub confidence: f32,
}

impl FaceMatch {
    pub fn new(user_id: impl Into<String>, confidence: f32) -> Self {
        Self {
            user_id: user_id.into(),
            confidence,
        }
    }
}

/// Outcome of the remote face-match step
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct FaceProcessingResult {
    pub faces_detected: u32,
    pub matches: Vec<FaceMatch>,
    /// Number of distinct friends among `matches`
    pub friends_matched: usize,
    pub processing_failed: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl FaceProcessingResult {
    pub fn from_matches(faces_detected: u32, matches: Vec<FaceMatch>) -> Self {
        Self {
            faces_detected,
            matches,
            ..Default::default()
        }
        .normalized()
    }

    /// Synthetic result attached to a modal item that failed for good,
    /// so the waiting UI always gets an answer.
    pub fn failed(error: impl Into<String>) -> Self {
        Self {
            processing_failed: true,
            error: Some(error.into()),
            ..Default::default()
        }
    }

    /// Collapse matches to one per friend (highest confidence wins, first
    /// occurrence keeps its position) and recount `friends_matched`.
    pub fn normalized(mut self) -> Self {
        let mut unique: Vec<FaceMatch> = Vec::with_capacity(self.matches.len());
        for m in self.matches.drain(..) {
            match unique.iter_mut().find(|u| u.user_id == m.user_id) {
                Some(existing) => {
                    if m.confidence > existing.confidence {
                        existing.confidence = m.confidence;
                    }
                }
                None => unique.push(m),
            }
        }
        self.friends_matched = unique.len();
        self.matches = unique;
        self
    }

    pub fn has_matches(&self) -> bool {
        !self.matches.is_empty()
    }

    pub fn matched_friend_ids(&self) -> Vec<String> {
        self.matches.iter().map(|m| m.user_id.clone()).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_normalize_dedups_by_user() {
        let result = FaceProcessingResult::from_matches(
            3,
            vec![
                FaceMatch::new("u1", 0.71),
                FaceMatch::new("u2", 0.90),
                FaceMatch::new("u1", 0.95),
            ],
        );

        assert_eq!(result.friends_matched, 2);
        assert_eq!(result.matched_friend_ids(), vec!["u1", "u2"]);
        assert_eq!(result.matches[0].confidence, 0.95);
    }

    #[test]
    fn test_failed_result() {
        let result = FaceProcessingResult::failed("boom");
        assert!(result.processing_failed);
        assert!(!result.has_matches());
        assert_eq!(result.error.as_deref(), Some("boom"));
    }

    #[test]
    fn test_camel_case_json() {
        let json = serde_json::to_string(&FaceProcessingResult::from_matches(
            1,
            vec![FaceMatch::new("u1", 0.5)],
        ))
        .unwrap();
        assert!(json.contains("\"facesDetected\":1"));
        assert!(json.contains("\"friendsMatched\":1"));
        assert!(json.contains("\"userId\":\"u1\""));
    }
}
