pub const STRAWBERRY_REPLY: &str = "There are 3 R's in the word 'strawberry' - two R's together in the middle (st-rr-awberry) and one at the end (strawber-r-y). This is a common tricky question because people often miss the double R in the middle!";
pub const BLACK_HOLE_REPLY: &str = "Yes, black holes are real! They're regions of spacetime where gravity is so strong that nothing, not even light, can escape. Scientists have detected many black holes through their gravitational effects and even captured the first image of one in 2019.";
pub const HOW_AI_WORKS_REPLY: &str = "AI works by using algorithms to process data, learn patterns, and make predictions or decisions. Modern AI uses techniques like neural networks that loosely mimic how human brains process information, learning from vast amounts of training data.";
pub const MEANING_OF_LIFE_REPLY: &str = "The meaning of life is a profound philosophical question with many perspectives. Some find meaning through relationships, personal growth, helping others, creative expression, or spiritual beliefs. It's ultimately something each person discovers for themselves.";
pub const DEMO_MODE_REPLY: &str = "I'm currently running in demo mode while the AI integration is being set up. I can provide basic responses to common questions, but for full AI capabilities, please wait for the webhook configuration to be completed.";

/// Produces the canned assistant reply used when the assistant action is unreachable.
pub trait FallbackStrategy: Send + Sync {
    fn reply_for(&self, text: &str) -> String;
}

type Trigger = Box<dyn Fn(&str) -> bool + Send + Sync>;

struct KeywordRule {
    trigger: Trigger,
    reply: String,
}

/// Ordered keyword rules matched against the lower-cased message; first match wins.
pub struct KeywordFallback {
    rules: Vec<KeywordRule>,
    default_reply: String,
}

impl KeywordFallback {
    /// Empty table that always answers `default_reply`.
    pub fn new(default_reply: impl Into<String>) -> Self {
        Self {
            rules: Vec::new(),
            default_reply: default_reply.into(),
        }
    }

    /// Appends a rule whose trigger sees the lower-cased message.
    pub fn with_rule(
        mut self,
        trigger: impl Fn(&str) -> bool + Send + Sync + 'static,
        reply: impl Into<String>,
    ) -> Self {
        self.rules.push(KeywordRule {
            trigger: Box::new(trigger),
            reply: reply.into(),
        });
        self
    }

    /// Appends a rule that fires when every keyword occurs in the message.
    pub fn with_keywords(self, keywords: &[&str], reply: impl Into<String>) -> Self {
        let keywords = keywords
            .iter()
            .map(|keyword| keyword.to_lowercase())
            .collect::<Vec<_>>();
        self.with_rule(
            move |text| keywords.iter().all(|keyword| text.contains(keyword.as_str())),
            reply,
        )
    }

    pub fn rule_count(&self) -> usize {
        self.rules.len()
    }
}

impl Default for KeywordFallback {
    fn default() -> Self {
        Self::new(DEMO_MODE_REPLY)
            .with_keywords(&["how many", "strawberry"], STRAWBERRY_REPLY)
            .with_keywords(&["black hole"], BLACK_HOLE_REPLY)
            .with_keywords(&["how", "ai"], HOW_AI_WORKS_REPLY)
            .with_keywords(&["meaning of life"], MEANING_OF_LIFE_REPLY)
    }
}

impl FallbackStrategy for KeywordFallback {
    fn reply_for(&self, text: &str) -> String {
        let lowered = text.to_lowercase();
        self.rules
            .iter()
            .find(|rule| (rule.trigger)(&lowered))
            .map(|rule| rule.reply.clone())
            .unwrap_or_else(|| self.default_reply.clone())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn strawberry_question_matches_case_insensitively() {
        let fallback = KeywordFallback::default();
        assert_eq!(
            fallback.reply_for("How MANY r's are in STRAWBERRY?"),
            STRAWBERRY_REPLY
        );
    }

    #[test]
    fn strawberry_alone_does_not_trigger_the_letter_count() {
        let fallback = KeywordFallback::default();
        assert_eq!(fallback.reply_for("I like strawberry jam"), DEMO_MODE_REPLY);
    }

    #[test]
    fn earlier_rules_win_over_later_ones() {
        let fallback = KeywordFallback::default();
        // Matches both the black hole rule and the how+ai rule.
        assert_eq!(
            fallback.reply_for("How does AI find a black hole?"),
            BLACK_HOLE_REPLY
        );
    }

    #[test]
    fn how_and_ai_match_as_plain_substrings() {
        let fallback = KeywordFallback::default();
        assert_eq!(fallback.reply_for("how do you explain this"), HOW_AI_WORKS_REPLY);
        assert_eq!(
            fallback.reply_for("What is the Meaning of Life?"),
            MEANING_OF_LIFE_REPLY
        );
    }

    #[test]
    fn unmatched_text_gets_the_demo_notice() {
        let fallback = KeywordFallback::default();
        assert_eq!(fallback.reply_for("hello there"), DEMO_MODE_REPLY);
    }

    #[test]
    fn custom_rules_replace_the_table() {
        let fallback = KeywordFallback::new("offline")
            .with_rule(|text| text.starts_with("ping"), "pong");

        assert_eq!(fallback.rule_count(), 1);
        assert_eq!(fallback.reply_for("PING"), "pong");
        assert_eq!(fallback.reply_for("strawberry how many"), "offline");
    }
}
