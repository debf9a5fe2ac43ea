//! Character classes and anchor tables used by text layout.

pub fn is_whitespace(c: char) -> bool {
    matches!(c as u32, 0x09 | 0x0a | 0x0b | 0x0c | 0x0d | 0x20)
}

/// Characters a line may break after
pub fn is_breakable(c: char) -> bool {
    matches!(
        c as u32,
        0x0a | 0x20
            | 0x26 // &
            | 0x28 | 0x29
            | 0x2b | 0x2d | 0x2f
            | 0xad // soft hyphen
            | 0xb7
            | 0x200b // zero-width space
            | 0x2010 | 0x2013 | 0x2027
    )
}

/// Shift of the text box's top-left corner, as a fraction of box size
pub fn text_box_shift(anchor: &str) -> [f64; 2] {
    match anchor {
        "top-left" => [0.0, 0.0],
        "top-right" => [-1.0, 0.0],
        "top" => [-0.5, 0.0],
        "bottom-left" => [0.0, -1.0],
        "bottom-right" => [-1.0, -1.0],
        "bottom" => [-0.5, -1.0],
        "left" => [0.0, -0.5],
        "right" => [-1.0, -0.5],
        _ => [-0.5, -0.5],
    }
}

/// Shift of each line's start, as a fraction of (box width - line width)
pub fn line_shift(justify: &str, box_shift_x: f64) -> f64 {
    match justify {
        "auto" => -box_shift_x,
        "left" => 0.0,
        "right" => 1.0,
        _ => 0.5,
    }
}

/// Apply `text-transform`
pub fn transform(text: &str, code: &str) -> String {
    match code {
        "uppercase" => text.to_uppercase(),
        "lowercase" => text.to_lowercase(),
        _ => text.to_string(),
    }
}

/// Replace `{name}` tokens with feature property values. Missing
/// properties become empty strings.
pub fn substitute_tokens(template: &str, properties: &crate::feature::Properties) -> String {
    let mut out = String::with_capacity(template.len());
    let mut rest = template;
    while let Some(open) = rest.find('{') {
        let Some(close) = rest[open..].find('}') else {
            break;
        };
        out.push_str(&rest[..open]);
        let name = &rest[open + 1..open + close];
        match properties.get(name) {
            Some(serde_json::Value::String(s)) => out.push_str(s),
            Some(serde_json::Value::Null) | None => {}
            Some(other) => out.push_str(&other.to_string()),
        }
        rest = &rest[open + close + 1..];
    }
    out.push_str(rest);
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_tables() {
        assert!(is_whitespace('\t'));
        assert!(!is_whitespace('\u{200b}'));
        assert!(is_breakable('\u{200b}'));
        assert!(is_breakable('-'));
        assert!(!is_breakable('a'));
        assert_eq!(text_box_shift("bottom-right"), [-1.0, -1.0]);
        assert_eq!(text_box_shift("nonsense"), [-0.5, -0.5]);
        assert_eq!(line_shift("auto", -1.0), 1.0);
        assert_eq!(line_shift("left", -1.0), 0.0);
    }

    #[test]
    fn test_token_substitution() {
        let props = json!({"name": "Oslo", "pop": 700000, "empty": null});
        let props = props.as_object().unwrap();
        assert_eq!(substitute_tokens("{name} ({pop})", props), "Oslo (700000)");
        assert_eq!(substitute_tokens("{missing}{empty}", props), "");
        assert_eq!(substitute_tokens("plain", props), "plain");
        assert_eq!(substitute_tokens("open {name", props), "open {name");
    }

    #[test]
    fn test_transform() {
        assert_eq!(transform("Oslo", "uppercase"), "OSLO");
        assert_eq!(transform("Oslo", "lowercase"), "oslo");
        assert_eq!(transform("Oslo", "none"), "Oslo");
    }
}
