use thiserror::Error;

/// Everything a single submission can fail with. Each variant maps to one
/// user-facing notice; none of them take the session down.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ChatError {
    #[error("API key is required")]
    CredentialMissing,

    #[error("rate limited after {attempts} attempts: {last}")]
    RateLimited { attempts: u32, last: String },

    #[error("prompt exceeds the model's token limit")]
    PromptTooLong,

    #[error("failed to extract {mime} content: {reason}")]
    Extraction { mime: String, reason: String },

    #[error("unsupported file type: {0}")]
    UnsupportedFileType(String),

    #[error("search results could not be parsed: {0}")]
    SearchParse(String),

    #[error("model request failed: {0}")]
    UnknownModel(String),
}

impl ChatError {
    /// Text shown in the notice and in the `Error:` transcript entry.
    pub fn user_message(&self) -> String {
        match self {
            ChatError::CredentialMissing => {
                "Please add your Gemini API key in settings before sending a message.".to_string()
            }
            ChatError::RateLimited { .. } => {
                "API rate limit exceeded. Please try again in a few moments. If this persists, consider using a different API key.".to_string()
            }
            ChatError::PromptTooLong => {
                "Your message is too long. Please try sending a shorter message.".to_string()
            }
            ChatError::Extraction { .. } => {
                "Failed to process the file. Please try again.".to_string()
            }
            ChatError::UnsupportedFileType(_) => {
                "Please upload images (JPEG, PNG, GIF), PDF, or PPTX files.".to_string()
            }
            ChatError::SearchParse(_) => "Web search returned no usable sources.".to_string(),
            ChatError::UnknownModel(_) => "Failed to get response from Gemini".to_string(),
        }
    }

    /// Notice title for the variant.
    pub fn title(&self) -> &'static str {
        match self {
            ChatError::UnsupportedFileType(_) => "Unsupported file type",
            ChatError::Extraction { .. } => "Error processing file",
            _ => "Error",
        }
    }
}

/// A failed call as the transport saw it, before classification.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApiFailure {
    pub status: Option<u16>,
    pub body: String,
}

impl ApiFailure {
    pub fn new(status: Option<u16>, body: impl Into<String>) -> Self {
        Self { status, body: body.into() }
    }

    pub fn is_transient(&self) -> bool {
        self.status == Some(429) || self.body.contains("RESOURCE_EXHAUSTED")
    }

    pub fn is_prompt_too_long(&self) -> bool {
        self.status == Some(400) && self.body.contains("max tokens limit")
    }
}

impl std::fmt::Display for ApiFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self.status {
            Some(status) => write!(f, "HTTP {}: {}", status, self.body),
            None => write!(f, "{}", self.body),
        }
    }
}

impl From<reqwest::Error> for ApiFailure {
    fn from(err: reqwest::Error) -> Self {
        ApiFailure::new(err.status().map(|s| s.as_u16()), err.to_string())
    }
}

/// Maps a non-retryable failure to its final error. Transient failures that
/// ran out of attempts are handled by the retry loop, which knows the count.
pub fn classify(failure: &ApiFailure) -> ChatError {
    if failure.is_prompt_too_long() {
        ChatError::PromptTooLong
    } else {
        ChatError::UnknownModel(failure.to_string())
    }
}
