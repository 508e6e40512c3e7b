//! Keyword-based intent classification.
//!
//! Fast heuristics over the transcript, used to tag interaction logs and to
//! answer greetings without a generation round trip. Anything ambiguous
//! falls through to the standard knowledge + generation flow.

use strum::Display;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Display)]
pub enum Intent {
    #[strum(serialize = "greeting")]
    Greeting,
    #[strum(serialize = "check_in")]
    CheckIn,
    #[strum(serialize = "booking")]
    Booking,
    #[strum(serialize = "info")]
    Info,
    #[strum(serialize = "contact")]
    Contact,
    #[strum(serialize = "unknown")]
    Unknown,
}

#[derive(Debug, Clone)]
pub struct IntentResult {
    pub intent: Intent,
    pub confidence: f32,
}

const GREETING_WORDS: &[&str] = &["hello", "hi there", "good morning", "good afternoon", "hey"];
const CHECK_IN_WORDS: &[&str] = &["check-in", "check in", "checking in", "arrival", "register"];
const BOOKING_WORDS: &[&str] = &["book", "reserve", "reservation", "room", "accommodation"];
const CONTACT_WORDS: &[&str] = &["contact", "call", "phone", "email", "speak to someone"];
const INFO_WORDS: &[&str] = &[
    "hours", "where", "location", "wifi", "password", "pool", "breakfast", "dinner",
    "restaurant", "gym",
];

/// Classify a transcript. Keyword heuristics only; sub-millisecond.
pub fn detect_intent(text: &str) -> IntentResult {
    let lower = text.to_lowercase();
    let lower = lower.trim();

    let contains_any = |words: &[&str]| words.iter().any(|w| lower.contains(w));

    if contains_any(GREETING_WORDS) {
        return IntentResult { intent: Intent::Greeting, confidence: 1.0 };
    }
    if contains_any(CHECK_IN_WORDS) {
        return IntentResult { intent: Intent::CheckIn, confidence: 0.9 };
    }
    if contains_any(BOOKING_WORDS) {
        return IntentResult { intent: Intent::Booking, confidence: 0.8 };
    }
    if contains_any(CONTACT_WORDS) {
        return IntentResult { intent: Intent::Contact, confidence: 0.9 };
    }
    if contains_any(INFO_WORDS) {
        return IntentResult { intent: Intent::Info, confidence: 0.8 };
    }

    IntentResult { intent: Intent::Unknown, confidence: 0.0 }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_greeting_detected() {
        let result = detect_intent("Hello, good morning!");
        assert_eq!(result.intent, Intent::Greeting);
        assert_eq!(result.confidence, 1.0);
    }

    #[test]
    fn test_booking_detected() {
        let result = detect_intent("I'd like to reserve a room for friday");
        assert_eq!(result.intent, Intent::Booking);
    }

    #[test]
    fn test_info_detected() {
        assert_eq!(detect_intent("what's the wifi password").intent, Intent::Info);
        assert_eq!(detect_intent("when does breakfast start").intent, Intent::Info);
    }

    #[test]
    fn test_unknown_falls_through() {
        let result = detect_intent("tell me a story about dragons");
        assert_eq!(result.intent, Intent::Unknown);
        assert_eq!(result.confidence, 0.0);
    }
}
