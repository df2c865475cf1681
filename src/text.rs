use unicode_segmentation::UnicodeSegmentation;

pub fn html_escape(s: &str) -> String {
    s.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

/// Обрезка по видимым символам (графемам), с `…` если что-то отрезали.
pub fn clip(s: &str, max: usize) -> String {
    let mut graphemes = s.grapheme_indices(true);
    match graphemes.nth(max) {
        None => s.to_string(),
        Some((cut, _)) => format!("{}…", s[..cut].trim_end()),
    }
}

/// Как `clip`, но вместе с `…` результат не длиннее `max`.
pub fn truncate(s: &str, max: usize) -> String {
    if max == 0 {
        return String::new();
    }
    if s.graphemes(true).nth(max).is_none() {
        return s.to_string();
    }
    clip(s, max - 1)
}
