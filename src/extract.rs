use crate::types::Language;
use serde::{Deserialize, Serialize};

/// Plain substring hints, checked in this order.
const SNIFF_HINTS: &[(&[&str], Language)] = &[
    (&["public class"], Language::Java),
    (&["function", "var", "const"], Language::Javascript),
    (&["def ", "import "], Language::Python),
];

const FENCE_CHAR: char = '`';
const MIN_FENCE_LEN: usize = 3;

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ExtractedBlock {
    pub raw_code: String,
    pub language: Language,
    /// Info-string tag as written, if any.
    pub tag: Option<String>,
    /// Byte offsets of the opening fence start and the closing fence end.
    pub start_offset: usize,
    pub end_offset: usize,
}

struct OpenFence {
    ticks: usize,
    indent: usize,
    tag: Option<String>,
    start_offset: usize,
    body: Vec<String>,
}

/// Finds complete fenced code blocks in `text`, in source order.
///
/// Accepts indented fences and fences of three or more backticks, so plain
/// "line starts with ```" fences are a subset of what matches here.
/// Unterminated fences and blocks whose body is blank are dropped.
pub fn extract(text: &str) -> Vec<ExtractedBlock> {
    let mut blocks = Vec::new();
    let mut open: Option<OpenFence> = None;
    let mut offset = 0;

    for raw_line in text.split_inclusive('\n') {
        let line_start = offset;
        offset += raw_line.len();
        let line = raw_line.trim_end_matches(|c| c == '\n' || c == '\r');

        match open.take() {
            None => {
                if let Some((ticks, indent, tag)) = opening_fence(line) {
                    open = Some(OpenFence {
                        ticks,
                        indent,
                        tag,
                        start_offset: line_start,
                        body: Vec::new(),
                    });
                }
            }
            Some(mut fence) => {
                if is_closing_fence(line, fence.ticks) {
                    if let Some(block) = close_block(fence, offset) {
                        blocks.push(block);
                    }
                } else {
                    fence.body.push(strip_indent(line, fence.indent).to_string());
                    open = Some(fence);
                }
            }
        }
    }

    if let Some(fence) = open {
        tracing::debug!(
            "[EXTRACT] Unterminated fence at offset {} ({} lines) ignored",
            fence.start_offset,
            fence.body.len()
        );
    }

    blocks
}

fn close_block(fence: OpenFence, end_offset: usize) -> Option<ExtractedBlock> {
    let raw_code = fence.body.join("\n");
    if raw_code.trim().is_empty() {
        tracing::debug!("[EXTRACT] Empty block at offset {} discarded", fence.start_offset);
        return None;
    }
    let language = resolve_language(fence.tag.as_deref(), &raw_code);
    Some(ExtractedBlock {
        raw_code,
        language,
        tag: fence.tag,
        start_offset: fence.start_offset,
        end_offset,
    })
}

/// Returns `(fence length, indent, tag)` when `line` opens a fence.
fn opening_fence(line: &str) -> Option<(usize, usize, Option<String>)> {
    let trimmed = line.trim_start();
    let indent = line.len() - trimmed.len();
    let ticks = trimmed.chars().take_while(|c| *c == FENCE_CHAR).count();
    if ticks < MIN_FENCE_LEN {
        return None;
    }
    let info = &trimmed[ticks..];
    // A backtick in the info string means an inline span like ```x```.
    if info.contains(FENCE_CHAR) {
        return None;
    }
    let tag = info.split_whitespace().next().map(|t| t.to_string());
    Some((ticks, indent, tag))
}

fn is_closing_fence(line: &str, open_ticks: usize) -> bool {
    let trimmed = line.trim();
    let ticks = trimmed.chars().take_while(|c| *c == FENCE_CHAR).count();
    ticks >= open_ticks && trimmed[ticks..].is_empty()
}

fn strip_indent(line: &str, indent: usize) -> &str {
    let removable = line
        .char_indices()
        .take(indent)
        .take_while(|(_, c)| c.is_whitespace())
        .last()
        .map(|(i, c)| i + c.len_utf8())
        .unwrap_or(0);
    &line[removable..]
}

/// Maps a fence tag to a language, falling back to sniffing the body.
pub fn resolve_language(tag: Option<&str>, code: &str) -> Language {
    match tag.and_then(normalize_tag) {
        Some(language) => language,
        None => sniff_language(code),
    }
}

pub fn normalize_tag(tag: &str) -> Option<Language> {
    let tag = tag.trim().to_lowercase();
    let language = match tag.as_str() {
        "python" | "py" => Language::Python,
        "javascript" | "js" => Language::Javascript,
        "typescript" | "ts" => Language::Typescript,
        "java" => Language::Java,
        "csharp" | "c#" => Language::Csharp,
        "html" | "htm" => Language::Html,
        "css" => Language::Css,
        "json" => Language::Json,
        "xml" => Language::Xml,
        "text" => Language::Text,
        _ => return None,
    };
    Some(language)
}

/// Guesses the language of an untagged body. Checked in priority order.
pub fn sniff_language(code: &str) -> Language {
    SNIFF_HINTS
        .iter()
        .find(|(hints, _)| hints.iter().any(|hint| code.contains(hint)))
        .map(|(_, language)| *language)
        .unwrap_or(Language::Text)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_extract_python_block() {
        let text = "Here you go:\n```python\ndef foo():\n    pass\n```\nDone.";
        let blocks = extract(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, Language::Python);
        assert_eq!(blocks[0].raw_code, "def foo():\n    pass");
        assert_eq!(blocks[0].tag.as_deref(), Some("python"));
        assert_eq!(&text[blocks[0].start_offset..blocks[0].start_offset + 3], "```");
    }

    #[test]
    fn test_unterminated_fence_yields_nothing() {
        assert!(extract("```python\ndef foo():\n    pass\n").is_empty());
    }

    #[test]
    fn test_blank_block_discarded() {
        assert!(extract("```js\n   \n\n```").is_empty());
    }

    #[test]
    fn test_blocks_keep_source_order() {
        let text = "```js\nconst a = 1;\n```\ntext\n```py\nimport os\n```\n";
        let blocks = extract(text);
        assert_eq!(blocks.len(), 2);
        assert_eq!(blocks[0].language, Language::Javascript);
        assert_eq!(blocks[1].language, Language::Python);
        assert!(blocks[0].end_offset <= blocks[1].start_offset);
    }

    #[test]
    fn test_alias_normalization() {
        assert_eq!(normalize_tag(" TS "), Some(Language::Typescript));
        assert_eq!(normalize_tag("C#"), Some(Language::Csharp));
        assert_eq!(normalize_tag("htm"), Some(Language::Html));
        assert_eq!(normalize_tag("json"), Some(Language::Json));
        assert_eq!(normalize_tag("rust"), None);
    }

    #[test]
    fn test_sniff_priority() {
        assert_eq!(
            sniff_language("public class Bar { const int x = 1; }"),
            Language::Java
        );
        assert_eq!(sniff_language("function go() {}"), Language::Javascript);
        assert_eq!(sniff_language("import sys\nprint(sys.argv)"), Language::Python);
        assert_eq!(sniff_language("SELECT 1;"), Language::Text);
    }

    #[test]
    fn test_sniff_matches_plain_substrings() {
        assert_eq!(sniff_language("x = functional(y)"), Language::Javascript);
        assert_eq!(sniff_language("#undef DEBUG\nx = 1"), Language::Python);
        assert_eq!(sniff_language("defer close()"), Language::Text);

        let blocks = extract("```\nvariable = 5\nprint(variable)\n```\n");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, Language::Javascript);
    }

    #[test]
    fn test_unknown_tag_falls_back_to_sniffing() {
        let blocks = extract("```rust\nfn main() { let x = 1; }\n```");
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].language, Language::Text);
    }

    #[test]
    fn test_inline_triple_backticks_are_not_a_fence() {
        assert!(extract("use ```block``` here\n```inline```\n").is_empty());
    }

    #[test]
    fn test_indented_fence_strips_indent() {
        let text = "1. Run:\n   ```py\n   print('hi')\n       nested\n   ```\n";
        let blocks = extract(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw_code, "print('hi')\n    nested");
    }

    #[test]
    fn test_longer_fence_needs_matching_close() {
        let text = "````md\n```\ninner\n```\n````\n";
        let blocks = extract(text);
        assert_eq!(blocks.len(), 1);
        assert_eq!(blocks[0].raw_code, "```\ninner\n```");
    }
}
