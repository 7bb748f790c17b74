//! Detecting "make me a picture" requests in chat input.

use once_cell::sync::Lazy;
use regex::{Regex, RegexBuilder};

const VERBS: &str = "generate|create|make|produce|design|render|draw|paint|sketch|illustrate";
const NOUNS: &str = "image|picture|pic|photo|drawing|illustration|painting|artwork|art|sketch|portrait|wallpaper|logo|icon";
const MIN_PROMPT_CHARS: usize = 3;

fn pattern(source: &str) -> Regex {
    RegexBuilder::new(source)
        .case_insensitive(true)
        .build()
        .expect("image request pattern is valid")
}

static MISSPELLINGS: Lazy<Vec<(Regex, &'static str)>> = Lazy::new(|| {
    vec![
        (pattern(r"\b(?:genrate|generte|genarate|gnerate|generat|genertae)\b"), "generate"),
        (pattern(r"\b(?:creat|crete|craete|cretae)\b"), "create"),
        (pattern(r"\b(?:imagin|imagne|imgine)\b"), "imagine"),
        (pattern(r"\b(?:drwa|darw)\b"), "draw"),
        (pattern(r"\b(?:imgae|iamge|imge)\b"), "image"),
        (pattern(r"\b(?:pictre|picure|pictuer)\b"), "picture"),
    ]
});

static REQUEST_PATTERNS: Lazy<Vec<Regex>> = Lazy::new(|| {
    vec![
        // "generate an image of", "create a quick sketch of"
        pattern(&format!(r"\b(?:{VERBS})\s+(?:(?:me|us)\s+)?(?:\S+\s+){{0,3}}?(?:{NOUNS})s?\b")),
        // "draw a cat", "can you paint the sea"
        pattern(r"^(?:please\s+)?(?:(?:can|could|would|will)\s+you\s+)?(?:please\s+)?(?:draw|paint|sketch|illustrate)\b"),
        // "show me a picture of"
        pattern(&format!(r"\b(?:show|give|send)\s+(?:me|us)\s+(?:an?\s+|some\s+|the\s+)?(?:\S+\s+)?(?:{NOUNS})s?\b")),
        // "imagine a castle"
        pattern(r"^(?:please\s+)?(?:(?:can|could|would|will)\s+you\s+)?imagine\s+(?:an?|some|the)\b"),
        // "i want an image of", "i'd like a picture"
        pattern(&format!(r"\bi\s*(?:want|need|would\s+like|'d\s+like)\s+(?:an?\s+|some\s+)?(?:\S+\s+)?(?:{NOUNS})s?\b")),
    ]
});

static FULL_PREFIX: Lazy<Regex> = Lazy::new(|| {
    pattern(&format!(
        concat!(
            r"^\s*(?:please\s+)?(?:(?:can|could|would|will)\s+you\s+)?(?:please\s+)?",
            r"(?:(?:{verbs}|imagine|show|give|send)|i\s*(?:want|need|would\s+like|'d\s+like))\s+",
            r"(?:(?:me|us)\s+)?(?:what\s+)?",
            r"(?:(?:(?:an?|the|some)\s+)?(?:{nouns})s?\s+(?:of|showing|depicting|with|for)\s+)?",
        ),
        verbs = VERBS,
        nouns = NOUNS,
    ))
});

static LIGHT_PREFIX: Lazy<Regex> = Lazy::new(|| {
    pattern(r"^\s*(?:please\s+)?(?:(?:can|could|would|will)\s+you\s+)?(?:please\s+)?")
});

static SUFFIX: Lazy<Regex> = Lazy::new(|| {
    pattern(r"(?:[\s,]*\b(?:please|thanks|thank\s+you|for\s+me|if\s+possible|would\s+look\s+like|looks?\s+like))?[\s.!?,]*$")
});

/// Lowercase, straighten apostrophes and fix common verb misspellings.
fn normalize(text: &str) -> String {
    let lower = text.trim().to_lowercase().replace('\u{2019}', "'");
    fix_misspellings(&lower)
}

fn fix_misspellings(text: &str) -> String {
    MISSPELLINGS
        .iter()
        .fold(text.to_string(), |acc, (re, word)| re.replace_all(&acc, *word).into_owned())
}

/// Whether `text` asks for an image rather than a chat reply.
pub fn is_image_generation_request(text: &str) -> bool {
    let normalized = normalize(text);
    if normalized.is_empty() {
        return false;
    }
    REQUEST_PATTERNS.iter().any(|re| re.is_match(&normalized))
}

fn strip_suffix(text: &str) -> String {
    let mut current = text.trim().to_string();
    loop {
        let stripped = SUFFIX.replace(&current, "").trim().to_string();
        if stripped == current {
            return current;
        }
        current = stripped;
    }
}

/// Recover the subject of an image request as a generation prompt.
///
/// Falls back to a lighter strip, then to the whole message, when the
/// result would be shorter than three characters.
pub fn extract_image_prompt(text: &str) -> String {
    let cleaned = fix_misspellings(text.trim()).replace('\u{2019}', "'");

    let full = strip_suffix(&FULL_PREFIX.replace(&cleaned, ""));
    if full.chars().count() >= MIN_PROMPT_CHARS {
        return full;
    }

    let light = strip_suffix(&LIGHT_PREFIX.replace(&cleaned, ""));
    if light.chars().count() >= MIN_PROMPT_CHARS {
        return light;
    }

    text.trim().to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_detects_requests() {
        for text in [
            "generate an image of a cat",
            "can you create a picture of a sunset",
            "Create a quick sketch of a fox",
            "draw me a red bicycle",
            "Please paint the sea at night",
            "show me a picture of the eiffel tower",
            "give me an image of a forest",
            "imagine a castle made of glass",
            "I want an image of a dragon",
            "i'd like a photo of a beach",
            "genrate an image of a dog",
            "could you creat a logo for my bakery",
            "make a wallpaper with mountains",
        ] {
            assert!(is_image_generation_request(text), "{text}");
        }
    }

    #[test]
    fn test_ignores_chat() {
        for text in [
            "what's the weather",
            "",
            "how do I create a rust crate?",
            "explain how images are compressed",
            "imagine you are a pirate and tell me a story",
            "write a poem about the sea",
        ] {
            assert!(!is_image_generation_request(text), "{text}");
        }
    }

    #[test]
    fn test_extracts_subject() {
        assert_eq!(extract_image_prompt("draw me a red bicycle"), "a red bicycle");
        assert_eq!(extract_image_prompt("generate an image of a cat"), "a cat");
        assert_eq!(extract_image_prompt("can you create a picture of a sunset"), "a sunset");
        assert_eq!(extract_image_prompt("Please draw a Golden Retriever, please!"), "a Golden Retriever");
        assert_eq!(
            extract_image_prompt("show me what a dragon looks like"),
            "a dragon"
        );
        assert_eq!(extract_image_prompt("genrate an image of a dog for me"), "a dog");
    }

    #[test]
    fn test_short_results_fall_back() {
        // Full strip leaves too little, light strip keeps the request.
        assert_eq!(extract_image_prompt("can you draw a picture of me"), "draw a picture of me");
        assert_eq!(extract_image_prompt("draw"), "draw");
        assert_eq!(extract_image_prompt("  hi  "), "hi");
    }
}
