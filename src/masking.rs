use once_cell::sync::Lazy;
use regex::Regex;

static PHONE_DIGITS: Lazy<Regex> = Lazy::new(|| Regex::new(r"\d").expect("valid regex"));
static PHONE_IN_TEXT: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"\+?\d[\d\-\s().]{7,}\d").expect("valid regex"));

/// Keeps the last four digits of a phone number for log correlation.
pub fn mask_phone(raw: &str) -> String {
    let digits = PHONE_DIGITS.find_iter(raw).count();
    if digits <= 4 {
        return "***".to_string();
    }
    let tail: String = PHONE_DIGITS
        .find_iter(raw)
        .skip(digits - 4)
        .map(|m| m.as_str())
        .collect();
    format!("***{}", tail)
}

/// MC/DOT numbers keep their last three digits.
pub fn mask_identifier(raw: &str) -> String {
    let trimmed = raw.trim();
    let count = trimmed.chars().count();
    if count <= 3 {
        return "***".to_string();
    }
    let tail: String = trimmed.chars().skip(count - 3).collect();
    format!("***{}", tail)
}

pub fn mask_optional(raw: Option<&str>) -> String {
    raw.map(mask_identifier).unwrap_or_else(|| "-".to_string())
}

/// Masks phone-number-looking runs inside free text such as transcripts.
pub fn mask_transcript(input: &str) -> (String, usize) {
    let count = PHONE_IN_TEXT.find_iter(input).count();
    if count == 0 {
        return (input.to_string(), 0);
    }
    let masked = PHONE_IN_TEXT
        .replace_all(input, |caps: &regex::Captures<'_>| mask_phone(&caps[0]))
        .to_string();
    (masked, count)
}

#[cfg(test)]
mod tests {
    use super::{mask_identifier, mask_phone, mask_transcript};

    #[test]
    fn phone_keeps_last_four_digits() {
        assert_eq!(mask_phone("+1 (555) 010-4321"), "***4321");
        assert_eq!(mask_phone("12"), "***");
    }

    #[test]
    fn identifier_keeps_last_three() {
        assert_eq!(mask_identifier("MC123456"), "***456");
        assert_eq!(mask_identifier("12"), "***");
    }

    #[test]
    fn transcript_numbers_are_masked() {
        let (masked, count) = mask_transcript("call me back at 555-010-4321 about the rate");
        assert_eq!(count, 1);
        assert_eq!(masked, "call me back at ***4321 about the rate");
    }
}
