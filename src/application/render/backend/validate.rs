//! Success validators: detect backends that report failure through the shape
//! of an otherwise successful artifact.

use crate::application::render::types::{OutputFormat, RenderError};

const MERMAID_FALLBACK_MESSAGE: &str = "the diagram could not be rendered (no details available)";
const MERMAID_ERROR_MARKERS: [&str; 3] = ["Syntax error in text", "error-icon", "error-text"];
/// Leading segment of the bomb icon path Mermaid draws into its error image.
const MERMAID_ERROR_ICON_PATH: &str = "m411.313,123.313";
const ERROR_TEXT_CLASS: &str = r#"class="error-text""#;

/// Inspects a produced artifact before it is accepted as a success.
pub trait ArtifactValidator: Send + Sync {
    fn validate(&self, artifact: &str) -> Result<(), RenderError>;
}

/// Recognises the error image Mermaid emits instead of failing.
#[derive(Debug, Default, Clone, Copy)]
pub struct MermaidErrorImageValidator;

impl ArtifactValidator for MermaidErrorImageValidator {
    fn validate(&self, artifact: &str) -> Result<(), RenderError> {
        let flagged = MERMAID_ERROR_MARKERS
            .iter()
            .any(|marker| artifact.contains(marker))
            || artifact.contains(MERMAID_ERROR_ICON_PATH);
        if !flagged {
            return Ok(());
        }

        let message = extract_error_text(artifact)
            .unwrap_or_else(|| MERMAID_FALLBACK_MESSAGE.to_string());
        Err(RenderError::soft_failure(message))
    }
}

/// Checks that a 2xx body from the remote service is a usable artifact.
#[derive(Debug, Clone, Copy)]
pub struct RemoteBodyValidator {
    format: OutputFormat,
}

impl RemoteBodyValidator {
    pub fn new(format: OutputFormat) -> Self {
        Self { format }
    }
}

impl ArtifactValidator for RemoteBodyValidator {
    fn validate(&self, artifact: &str) -> Result<(), RenderError> {
        if artifact.trim().is_empty() {
            return Err(RenderError::soft_failure(
                "render service returned an empty response",
            ));
        }
        if self.format == OutputFormat::Svg && !artifact.contains("<svg") {
            return Err(RenderError::soft_failure(
                "render service response does not contain an <svg> element",
            ));
        }
        Ok(())
    }
}

/// Join the text of every `error-text` element, skipping the version banner.
fn extract_error_text(artifact: &str) -> Option<String> {
    let mut messages = Vec::new();
    let mut rest = artifact;

    while let Some(class_at) = rest.find(ERROR_TEXT_CLASS) {
        let after_class = &rest[class_at..];
        let Some(open_end) = after_class.find('>') else {
            break;
        };
        let body = &after_class[open_end + 1..];
        let Some(close) = body.find('<') else {
            break;
        };

        let text = decode_entities(body[..close].trim());
        if !text.is_empty() && !text.to_ascii_lowercase().starts_with("mermaid version") {
            messages.push(text);
        }
        rest = &body[close..];
    }

    (!messages.is_empty()).then(|| messages.join(": "))
}

fn decode_entities(text: &str) -> String {
    text.replace("&lt;", "<")
        .replace("&gt;", ">")
        .replace("&quot;", "\"")
        .replace("&#39;", "'")
        .replace("&amp;", "&")
}

#[cfg(test)]
mod tests {
    use super::*;

    const ERROR_SVG: &str = r#"<svg id="m" width="100%" xmlns="http://www.w3.org/2000/svg" viewBox="768 -4.5 2048 2048"><g><path class="error-icon" d="m411.313,123.313c6.25-6.25 16.375-6.25 22.625,0l22.625,22.625"></path><text class="error-text" x="1440" y="2250" font-size="150px" style="text-anchor: middle;">Syntax error in text</text><text class="error-text" x="1250" y="2250" font-size="100px" style="text-anchor: middle;">mermaid version 10.9.1</text></g></svg>"#;

    #[test]
    fn clean_svg_passes() {
        let svg = r#"<svg><g><rect/><text>A</text></g></svg>"#;
        assert!(MermaidErrorImageValidator.validate(svg).is_ok());
    }

    #[test]
    fn error_image_becomes_soft_failure_with_extracted_text() {
        let err = MermaidErrorImageValidator
            .validate(ERROR_SVG)
            .expect_err("error image must be rejected");
        assert_eq!(
            err,
            RenderError::SoftFailure {
                message: "Syntax error in text".to_string()
            }
        );
    }

    #[test]
    fn icon_signature_alone_uses_fallback_message() {
        let svg = r#"<svg><path d="m411.313,123.313c6.25-6.25"/></svg>"#;
        let err = MermaidErrorImageValidator
            .validate(svg)
            .expect_err("icon signature must be rejected");
        assert_eq!(
            err.to_string(),
            format!("diagram renderer reported an error: {MERMAID_FALLBACK_MESSAGE}")
        );
    }

    #[test]
    fn extracted_text_is_entity_decoded() {
        let svg = r#"<svg><text class="error-text">Parse error on line 2: A -&gt; &quot;B&quot;</text></svg>"#;
        let err = MermaidErrorImageValidator.validate(svg).expect_err("flagged");
        assert!(err.to_string().contains(r#"A -> "B""#), "{err}");
    }

    #[test]
    fn remote_validator_rejects_empty_and_non_svg_bodies() {
        let svg = RemoteBodyValidator::new(OutputFormat::Svg);
        assert!(svg.validate("<svg></svg>").is_ok());
        assert!(matches!(
            svg.validate("  "),
            Err(RenderError::SoftFailure { .. })
        ));
        assert!(matches!(
            svg.validate("<html>oops</html>"),
            Err(RenderError::SoftFailure { .. })
        ));

        let txt = RemoteBodyValidator::new(OutputFormat::Txt);
        assert!(txt.validate("+--+\n|  |\n+--+").is_ok());
    }
}
