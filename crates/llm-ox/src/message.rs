use serde::{Deserialize, Serialize};
use strum::{AsRefStr, Display, EnumString};

use crate::content::Content;

#[derive(
    Debug,
    Clone,
    Copy,
    Default,
    PartialEq,
    Eq,
    Hash,
    Serialize,
    Deserialize,
    Display,
    EnumString,
    AsRefStr,
)]
#[serde(rename_all = "lowercase")]
#[strum(serialize_all = "lowercase")]
pub enum Role {
    System,
    User,
    #[default]
    Assistant,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Message {
    pub role: Role,
    pub content: Vec<Content>,
}

impl Message {
    pub fn new(role: Role, content: impl IntoIterator<Item = impl Into<Content>>) -> Self {
        Self {
            role,
            content: content.into_iter().map(Into::into).collect(),
        }
    }

    pub fn user(content: impl IntoIterator<Item = impl Into<Content>>) -> Self {
        Self::new(Role::User, content)
    }

    pub fn assistant(content: impl IntoIterator<Item = impl Into<Content>>) -> Self {
        Self::new(Role::Assistant, content)
    }

    pub fn system(content: impl IntoIterator<Item = impl Into<Content>>) -> Self {
        Self::new(Role::System, content)
    }

    /// All text blocks joined together.
    #[must_use]
    pub fn text(&self) -> String {
        self.content.iter().filter_map(Content::as_text).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn role_round_trips_through_strings() {
        assert_eq!(Role::Assistant.to_string(), "assistant");
        assert_eq!("user".parse::<Role>().unwrap(), Role::User);
    }

    #[test]
    fn text_skips_non_text_blocks() {
        let message = Message::assistant([
            Content::text("a"),
            Content::tool_use("id", "t", serde_json::json!({})),
            Content::text("b"),
        ]);
        assert_eq!(message.text(), "ab");
    }
}
