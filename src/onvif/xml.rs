//! String-scanning helpers for ONVIF SOAP responses
//!
//! Namespace prefixes vary between devices, so matching is prefix-agnostic.

/// Extract the text content of the first element with the given local name.
pub fn extract_xml_value(xml: &str, tag: &str) -> Option<String> {
    // Common ONVIF namespace prefixes first
    let prefixed_patterns = [
        format!("<tds:{}>", tag),
        format!("<tt:{}>", tag),
        format!("<trt:{}>", tag),
    ];

    for pattern in &prefixed_patterns {
        if let Some(start) = xml.find(pattern.as_str()) {
            let content_start = start + pattern.len();
            if let Some(end) = xml[content_start..].find("</") {
                let value = xml[content_start..content_start + end].trim().to_string();
                if !value.is_empty() {
                    return Some(value);
                }
            }
        }
    }

    // Any other prefix
    let pattern = format!(":{}>", tag);
    if let Some(start) = xml.find(pattern.as_str()) {
        let content_start = start + pattern.len();
        if let Some(end) = xml[content_start..].find("</") {
            let value = xml[content_start..content_start + end].trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    // No prefix at all
    let simple_pattern = format!("<{}>", tag);
    if let Some(start) = xml.find(simple_pattern.as_str()) {
        let content_start = start + simple_pattern.len();
        let close_pattern = format!("</{}>", tag);
        if let Some(end) = xml[content_start..].find(close_pattern.as_str()) {
            let value = xml[content_start..content_start + end].trim().to_string();
            if !value.is_empty() {
                return Some(value);
            }
        }
    }

    None
}

/// Extract an attribute value from an element's start-tag body.
pub fn extract_attr(tag_body: &str, attr: &str) -> Option<String> {
    let pattern = format!("{}=", attr);
    let start = tag_body.find(pattern.as_str())?;
    let after = &tag_body[start + pattern.len()..];
    let quote = after.chars().next()?;
    if quote != '"' && quote != '\'' {
        return None;
    }
    let content = &after[1..];
    let end = content.find(quote)?;
    Some(content[..end].to_string())
}

/// Find the start offsets of elements with the given local name,
/// tolerating any (or no) namespace prefix.
pub fn find_element_starts(xml: &str, local_name: &str) -> Vec<usize> {
    let mut starts = Vec::new();
    let mut pos = 0;

    while let Some(off) = xml[pos..].find(local_name) {
        let at = pos + off;
        pos = at + local_name.len();

        // Must be a start tag: the nearest '<' before the name may only be
        // separated from it by a namespace prefix.
        let Some(lt) = xml[..at].rfind('<') else {
            continue;
        };
        let between = &xml[lt + 1..at];
        let prefix_ok = between.is_empty()
            || (between.ends_with(':')
                && !between.contains('>')
                && !between.contains(char::is_whitespace)
                && !between.starts_with('/'));
        if !prefix_ok {
            continue;
        }

        // The name must end at the tag boundary, not be a prefix of a longer name
        match xml[pos..].chars().next() {
            Some(c) if c == ' ' || c == '>' || c == '/' => starts.push(lt),
            _ => {}
        }
    }

    starts
}
