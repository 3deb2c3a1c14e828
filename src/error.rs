use std::fmt;

/// Central error type of the upload core
#[derive(Debug)]
pub enum AppError {
    /// Local storage error (queue snapshot file)
    Storage(std::io::Error),
    /// Snapshot (de)serialization error
    Serialization(serde_json::Error),
    /// Invalid or unreadable configuration
    Config(String),
    /// Photo upload failed (transport or validation)
    Upload(String),
    /// Sharing to friends failed
    Share(String),
    /// Generating a signed URL failed
    Sign(String),
    /// Resource not found
    NotFound(String),
    /// General error
    Other(String),
}

impl fmt::Display for AppError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            AppError::Storage(e) => write!(f, "Storage error: {}", e),
            AppError::Serialization(e) => write!(f, "Serialization error: {}", e),
            AppError::Config(msg) => write!(f, "Configuration error: {}", msg),
            AppError::Upload(msg) => write!(f, "Upload failed: {}", msg),
            AppError::Share(msg) => write!(f, "Share failed: {}", msg),
            AppError::Sign(msg) => write!(f, "URL signing failed: {}", msg),
            AppError::NotFound(msg) => write!(f, "Not found: {}", msg),
            AppError::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for AppError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            AppError::Storage(e) => Some(e),
            AppError::Serialization(e) => Some(e),
            _ => None,
        }
    }
}

impl From<std::io::Error> for AppError {
    fn from(e: std::io::Error) -> Self {
        AppError::Storage(e)
    }
}

impl From<serde_json::Error> for AppError {
    fn from(e: serde_json::Error) -> Self {
        AppError::Serialization(e)
    }
}

impl From<toml::de::Error> for AppError {
    fn from(e: toml::de::Error) -> Self {
        AppError::Config(e.to_string())
    }
}

/// User-friendly error messages for the UI
impl AppError {
    pub fn user_message(&self) -> String {
        match self {
            AppError::Storage(_) | AppError::Serialization(_) => {
                "Could not save the upload queue. Please try again.".to_string()
            }
            AppError::Config(_) => "The app configuration is invalid.".to_string(),
            AppError::Upload(_) => {
                "Upload failed. Check your connection and try again.".to_string()
            }
            AppError::Share(_) => "The photo was uploaded but could not be shared.".to_string(),
            AppError::Sign(_) => "Could not load the photo right now.".to_string(),
            AppError::NotFound(msg) => format!("{} was not found.", msg),
            AppError::Other(msg) => msg.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_display_and_user_message() {
        let err = AppError::Upload("timeout".to_string());
        assert_eq!(err.to_string(), "Upload failed: timeout");
        assert!(err.user_message().contains("try again"));

        let err = AppError::NotFound("Queue item".to_string());
        assert_eq!(err.user_message(), "Queue item was not found.");
    }

    #[test]
    fn test_from_serde_error_keeps_source() {
        let parse_err = serde_json::from_str::<u32>("nope").unwrap_err();
        let err: AppError = parse_err.into();
        assert!(std::error::Error::source(&err).is_some());
    }
}
