use reqwatch_core::{ArtifactKind, RequirementSnapshot};
use serde::{Deserialize, Serialize};

/// One chat-completion message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: String,
    pub content: String,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self {
            role: "system".into(),
            content: content.into(),
        }
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self {
            role: "user".into(),
            content: content.into(),
        }
    }
}

/// System and user messages asking for artifacts of `kind` as JSON.
pub fn build_messages(requirement: &RequirementSnapshot, kind: ArtifactKind) -> Vec<ChatMessage> {
    let (noun, key, extra) = match kind {
        ArtifactKind::UserStory => ("user stories", "stories", "acceptance_criteria"),
        ArtifactKind::TestCase => ("test cases", "test_cases", "test_steps"),
    };
    let system = format!(
        "You derive {noun} from software requirements. Reply with a single JSON object \
         of the form {{\"{key}\": [{{\"title\": string, \"description\": string, \
         \"{extra}\": [string]}}]}} and nothing else."
    );

    let mut user = format!(
        "Requirement {}\nTitle: {}\nState: {}\n",
        requirement.requirement_id, requirement.title, requirement.state
    );
    if let Some(priority) = &requirement.priority {
        user.push_str(&format!("Priority: {priority}\n"));
    }
    user.push_str("\nDescription:\n");
    user.push_str(&requirement.description);

    vec![ChatMessage::system(system), ChatMessage::user(user)]
}
