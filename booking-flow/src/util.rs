/// Trim user input and cap its length, counted in characters rather than
/// bytes so multi-byte input is never split mid-character.
pub fn sanitize(text: &str, max_chars: usize) -> String {
    let trimmed = text.trim();
    if trimmed.chars().count() <= max_chars {
        return trimmed.to_string();
    }
    trimmed.chars().take(max_chars).collect()
}

/// Keep only the digits of a phone-like string.
pub fn extract_digits(text: &str) -> String {
    text.chars().filter(|c| c.is_ascii_digit()).collect()
}
