use std::sync::OnceLock;

use regex::Regex;

use crate::domain::{LocalId, RoomId};

fn token_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(r"#(\d+)/(\d+)").expect("token pattern"))
}

/// Correlation token embedded in outbound notifications.
///
/// The token maps a channel-side reply back to (room id, local message id).
/// It rides inside the notification text, so it must survive the channel's
/// reply feature verbatim (Telegram quotes the replied-to text back to us).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct CorrelationToken {
    pub room: RoomId,
    pub local_id: LocalId,
}

impl CorrelationToken {
    pub fn new(room: RoomId, local_id: LocalId) -> Self {
        Self { room, local_id }
    }

    pub fn render(&self) -> String {
        format!("#{}/{}", self.room, self.local_id)
    }

    /// Recover a token from the text of a replied-to notification. Returns
    /// `None` for anything that does not carry a token.
    pub fn parse(text: &str) -> Option<Self> {
        let caps = token_pattern().captures(text)?;
        let room = caps.get(1)?.as_str().parse::<i64>().ok()?;
        let local = caps.get(2)?.as_str().parse::<i64>().ok()?;
        Some(Self {
            room: RoomId(room),
            local_id: LocalId(local),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn render_parse_round_trip() {
        let token = CorrelationToken::new(RoomId(42), LocalId(7));
        let parsed = CorrelationToken::parse(&token.render()).unwrap();
        assert_eq!(parsed, token);
    }

    #[test]
    fn parses_token_embedded_in_notification_text() {
        let text = "New message #123/456\nFrom client 9\nhello there";
        let token = CorrelationToken::parse(text).unwrap();
        assert_eq!(token.room, RoomId(123));
        assert_eq!(token.local_id, LocalId(456));
    }

    #[test]
    fn pattern_is_compiled_once() {
        assert!(std::ptr::eq(token_pattern(), token_pattern()));
    }

    #[test]
    fn rejects_text_without_token() {
        assert!(CorrelationToken::parse("just some chatter").is_none());
        assert!(CorrelationToken::parse("#12-34").is_none());
        assert!(CorrelationToken::parse("").is_none());
    }
}
