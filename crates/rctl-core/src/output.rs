use serde::{Deserialize, Serialize};

/// One line of text received from the endpoint.
///
/// `epoch` identifies the connection the line arrived on; it increases every
/// time the session opens a new transport.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OutputLine {
    pub epoch: u64,
    pub text: String,
}

impl OutputLine {
    pub fn new(epoch: u64, text: impl Into<String>) -> Self {
        Self {
            epoch,
            text: text.into(),
        }
    }
}
