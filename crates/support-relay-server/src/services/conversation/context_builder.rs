use crate::models::chat::{ChatMessage, Role, Turn};

pub const DEFAULT_HISTORY_WINDOW: usize = 10;

/// Builds the bounded message list sent with a stateless completion.
#[derive(Debug, Clone)]
pub struct ContextBuilder {
    system_prompt: String,
    window: usize,
}

impl ContextBuilder {
    pub fn new(system_prompt: String, window: usize) -> Self {
        Self {
            system_prompt,
            window,
        }
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    pub fn window(&self) -> usize {
        self.window
    }

    /// System prompt, trailing history, then the new user text.
    pub fn build_request(&self, history: &[Turn], user_text: &str) -> Vec<ChatMessage> {
        let mut messages = build_context(history, &self.system_prompt, self.window);
        messages.push(ChatMessage::new(Role::User, user_text));
        messages
    }
}

/// Exactly one system message followed by the last `window` turns of
/// `history`, which must already be in chronological order.
pub fn build_context(history: &[Turn], system_prompt: &str, window: usize) -> Vec<ChatMessage> {
    let start = history.len().saturating_sub(window);
    let tail = &history[start..];

    let mut messages = Vec::with_capacity(tail.len() + 1);
    messages.push(ChatMessage::new(Role::System, system_prompt));
    messages.extend(tail.iter().map(Turn::to_message));
    messages
}

impl Default for ContextBuilder {
    fn default() -> Self {
        Self::new(
            crate::config::DEFAULT_SYSTEM_PROMPT.to_string(),
            DEFAULT_HISTORY_WINDOW,
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, Utc};

    fn history(len: usize) -> Vec<Turn> {
        let base = Utc::now();
        (0..len)
            .map(|i| Turn {
                id: i as i64 + 1,
                conversation_id: "c-1".to_string(),
                role: if i % 2 == 0 { Role::User } else { Role::Assistant },
                content: format!("turn {}", i),
                timestamp: base + Duration::seconds(i as i64),
                session_handle: None,
            })
            .collect()
    }

    #[test]
    fn test_output_length_is_min_plus_system() {
        for (len, window) in [(0, 10), (3, 10), (10, 10), (25, 10), (7, 1), (4, 0)] {
            let out = build_context(&history(len), "sys", window);
            assert_eq!(out.len(), len.min(window) + 1, "len={} window={}", len, window);
            assert_eq!(out[0], ChatMessage::new(Role::System, "sys"));
        }
    }

    #[test]
    fn test_keeps_most_recent_turns_in_order() {
        let out = build_context(&history(15), "sys", 4);
        let contents: Vec<&str> = out[1..].iter().map(|m| m.content.as_str()).collect();
        assert_eq!(contents, vec!["turn 11", "turn 12", "turn 13", "turn 14"]);
        assert_eq!(out[1].role, Role::Assistant);
        assert_eq!(out[2].role, Role::User);
    }

    #[test]
    fn test_only_one_system_message() {
        let out = build_context(&history(12), "sys", 10);
        assert_eq!(out.iter().filter(|m| m.role == Role::System).count(), 1);
    }

    #[test]
    fn test_build_request_appends_user_text() {
        let builder = ContextBuilder::new("sys".to_string(), 2);
        let out = builder.build_request(&history(5), "And refunds?");
        assert_eq!(out.len(), 4);
        assert_eq!(out.last().unwrap(), &ChatMessage::new(Role::User, "And refunds?"));
    }

    #[test]
    fn test_default_window() {
        let builder = ContextBuilder::default();
        assert_eq!(builder.window(), DEFAULT_HISTORY_WINDOW);
        assert!(builder.system_prompt().contains("customer support"));
    }
}
