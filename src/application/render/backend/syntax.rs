use crate::application::render::types::RenderError;

/// Reject input Mermaid cannot possibly parse before spawning the renderer.
///
/// Only structural problems are caught here. A well-formed but unknown
/// declaration is left to the renderer and the error-image scan, since the
/// set of diagram types grows with every Mermaid release.
pub(crate) fn check_mermaid_syntax(source: &str) -> Result<(), RenderError> {
    if source.trim().is_empty() {
        return Err(RenderError::syntax("diagram source is empty"));
    }

    let mut in_front_matter = false;
    let mut front_matter_allowed = true;

    for (index, raw_line) in source.lines().enumerate() {
        let line = raw_line.trim();
        let line_no = index + 1;

        if line == "---" && (front_matter_allowed || in_front_matter) {
            in_front_matter = !in_front_matter;
            front_matter_allowed = false;
            continue;
        }
        if in_front_matter || line.is_empty() || line.starts_with("%%") {
            continue;
        }

        let keyword = line
            .split(|c: char| c.is_whitespace() || c == ';' || c == ':')
            .next()
            .unwrap_or_default();
        if is_declaration(keyword) {
            return Ok(());
        }

        return Err(RenderError::syntax(format!(
            "line {line_no}: expected a diagram type declaration, found `{keyword}`"
        )));
    }

    if in_front_matter {
        return Err(RenderError::syntax("front matter block is not closed"));
    }
    Err(RenderError::syntax("missing diagram type declaration"))
}

/// `flowchart`, `stateDiagram-v2`, `C4Context`, `flowchart-elk`, ...
fn is_declaration(keyword: &str) -> bool {
    let mut chars = keyword.chars();
    chars.next().is_some_and(|c| c.is_ascii_alphabetic())
        && chars.all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
}
