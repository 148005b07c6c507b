//! Info.plist key upserts.
//!
//! Property lists are patched as text rather than re-serialized: roxmltree
//! locates the byte ranges of the elements to touch and the surrounding
//! document is left byte-for-byte intact. This preserves the template's
//! original formatting, comments, and key order.

use roxmltree::{Document, ParsingOptions};

use super::BundleError;

const DICT_CLOSE: &str = "</dict>";

// Plist documents carry the Apple DOCTYPE, which roxmltree rejects by default.
const PARSE_OPTIONS: ParsingOptions = ParsingOptions {
    allow_dtd: true,
    nodes_limit: u32::MAX,
};

/// Sets each `(key, value)` pair in the plist's top-level dictionary,
/// replacing the existing `<string>` value in place or appending a new
/// key/string pair before the dictionary closes.
///
/// # Errors
/// - `BundleError::InvalidPlist` - the document is not well-formed XML
/// - `BundleError::PlistDictMissing` - no top-level `<dict>` element
pub fn patch_plist(text: &str, values: &[(&str, &str)]) -> Result<String, BundleError> {
    let mut patched = text.to_string();
    for (key, value) in values {
        patched = upsert(&patched, key, value)?;
    }
    Ok(patched)
}

// One key per pass; the document is reparsed after each splice so element
// byte ranges stay valid.
fn upsert(text: &str, key: &str, value: &str) -> Result<String, BundleError> {
    let document = Document::parse_with_options(text, PARSE_OPTIONS).map_err(|e| {
        BundleError::InvalidPlist {
            reason: e.to_string(),
        }
    })?;

    let dict = document
        .descendants()
        .find(|node| node.has_tag_name("dict"))
        .ok_or(BundleError::PlistDictMissing)?;

    // Replace the value element paired with an existing key.
    let existing = dict
        .children()
        .filter(|node| node.is_element())
        .find(|node| node.has_tag_name("key") && node.text() == Some(key));
    if let Some(key_node) = existing {
        let mut sibling = key_node.next_sibling();
        while let Some(node) = sibling {
            if node.is_element() {
                let range = node.range();
                let mut patched = String::with_capacity(text.len() + value.len());
                patched.push_str(&text[..range.start]);
                patched.push_str(&format!("<string>{}</string>", escape_xml(value)));
                patched.push_str(&text[range.end..]);
                return Ok(patched);
            }
            sibling = node.next_sibling();
        }
    }

    // Key absent (or present with no value element): append before the
    // dictionary's closing tag.
    let dict_range = dict.range();
    let dict_text = &text[dict_range.start..dict_range.end];
    let insertion = format!(
        "\t<key>{}</key>\n\t<string>{}</string>\n",
        escape_xml(key),
        escape_xml(value)
    );

    match dict_text.rfind(DICT_CLOSE) {
        Some(offset) => {
            let at = dict_range.start + offset;
            let mut patched = String::with_capacity(text.len() + insertion.len());
            patched.push_str(&text[..at]);
            patched.push_str(&insertion);
            patched.push_str(&text[at..]);
            Ok(patched)
        }
        None => {
            // Self-closing <dict/>: expand it.
            let mut patched = String::with_capacity(text.len() + insertion.len());
            patched.push_str(&text[..dict_range.start]);
            patched.push_str(&format!("<dict>\n{insertion}</dict>"));
            patched.push_str(&text[dict_range.end..]);
            Ok(patched)
        }
    }
}

fn escape_xml(raw: &str) -> String {
    raw.replace('&', "&amp;").replace('<', "&lt;").replace('>', "&gt;")
}

#[cfg(test)]
mod tests {
    use super::*;

    const TEMPLATE_PLIST: &str = r#"<?xml version="1.0" encoding="UTF-8"?>
<!DOCTYPE plist PUBLIC "-//Apple//DTD PLIST 1.0//EN" "http://www.apple.com/DTDs/PropertyList-1.0.dtd">
<plist version="1.0">
<dict>
	<key>CFBundleExecutable</key>
	<string>VideoSaver</string>
	<key>CFBundleName</key>
	<string>VideoSaverTemplate</string>
	<key>CFBundleVersion</key>
	<string>1.0</string>
</dict>
</plist>
"#;

    fn value_of(text: &str, key: &str) -> Option<String> {
        let document = Document::parse_with_options(text, PARSE_OPTIONS).unwrap();
        let dict = document.descendants().find(|n| n.has_tag_name("dict"))?;
        let key_node = dict
            .children()
            .find(|n| n.has_tag_name("key") && n.text() == Some(key))?;
        let mut sibling = key_node.next_sibling();
        while let Some(node) = sibling {
            if node.is_element() {
                return node.text().map(str::to_string);
            }
            sibling = node.next_sibling();
        }
        None
    }

    #[test]
    fn test_replaces_existing_value_in_place() {
        let patched = patch_plist(TEMPLATE_PLIST, &[("CFBundleName", "Sunset Loop")]).unwrap();
        assert_eq!(value_of(&patched, "CFBundleName").as_deref(), Some("Sunset Loop"));
        // Untouched keys keep their values and the document stays parseable.
        assert_eq!(value_of(&patched, "CFBundleExecutable").as_deref(), Some("VideoSaver"));
        assert_eq!(value_of(&patched, "CFBundleVersion").as_deref(), Some("1.0"));
    }

    #[test]
    fn test_appends_missing_key() {
        let patched = patch_plist(
            TEMPLATE_PLIST,
            &[("CFBundleIdentifier", "local.videosaver.12345")],
        )
        .unwrap();
        assert_eq!(
            value_of(&patched, "CFBundleIdentifier").as_deref(),
            Some("local.videosaver.12345")
        );
        assert_eq!(value_of(&patched, "CFBundleName").as_deref(), Some("VideoSaverTemplate"));
    }

    #[test]
    fn test_patch_is_idempotent() {
        let pairs: &[(&str, &str)] = &[
            ("CFBundleName", "Aurora"),
            ("CFBundleIdentifier", "local.videosaver.1"),
        ];
        let once = patch_plist(TEMPLATE_PLIST, pairs).unwrap();
        let twice = patch_plist(&once, pairs).unwrap();
        assert_eq!(once, twice);
    }

    #[test]
    fn test_values_are_escaped() {
        let patched = patch_plist(TEMPLATE_PLIST, &[("CFBundleName", "Fish & <Chips>")]).unwrap();
        assert!(patched.contains("<string>Fish &amp; &lt;Chips&gt;</string>"));
        assert_eq!(value_of(&patched, "CFBundleName").as_deref(), Some("Fish & <Chips>"));
    }

    #[test]
    fn test_self_closing_dict_expanded() {
        let text = r#"<plist version="1.0"><dict/></plist>"#;
        let patched = patch_plist(text, &[("CFBundleName", "Tide")]).unwrap();
        assert_eq!(value_of(&patched, "CFBundleName").as_deref(), Some("Tide"));
    }

    #[test]
    fn test_malformed_xml_rejected() {
        let result = patch_plist("<plist><dict>", &[("CFBundleName", "X")]);
        assert!(matches!(result, Err(BundleError::InvalidPlist { .. })));
    }

    #[test]
    fn test_missing_dict_rejected() {
        let result = patch_plist("<plist version=\"1.0\"></plist>", &[("CFBundleName", "X")]);
        assert!(matches!(result, Err(BundleError::PlistDictMissing)));
    }
}
