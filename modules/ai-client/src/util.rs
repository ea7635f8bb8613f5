/// Strip a markdown code fence from a response. Text before the opening fence
/// or after the closing one is dropped as well.
pub fn strip_code_blocks(response: &str) -> &str {
    let trimmed = response.trim();
    let Some(start) = trimmed.find("```") else {
        return trimmed;
    };
    let after_fence = &trimmed[start + 3..];
    // Skip the info string (`json`, `JSON`, ...) up to the end of the line.
    let body = match after_fence.find('\n') {
        Some(nl) if !after_fence[..nl].contains(['[', '{']) => &after_fence[nl + 1..],
        _ => after_fence,
    };
    match body.rfind("```") {
        Some(end) => body[..end].trim(),
        None => body.trim(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_strip_code_blocks() {
        assert_eq!(strip_code_blocks("```json\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("```\n{}\n```"), "{}");
        assert_eq!(strip_code_blocks("{}"), "{}");
    }

    #[test]
    fn strips_prose_around_fence() {
        let response = "Here are the events:\n```json\n[{\"title\": \"Zine Fair\"}]\n```\nLet me know!";
        assert_eq!(strip_code_blocks(response), "[{\"title\": \"Zine Fair\"}]");
    }
}
