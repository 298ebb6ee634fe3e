//! Turns `.tuttle` workflow file text into the section-dict sequence the
//! engine actually consumes. The full grammar of a workflow definition
//! language is out of scope; this is the minimal grammar sufficient to
//! drive real runs and the end-to-end scenarios.
//!
//! ```text
//! <output-url> [<output-url> ...] <- [#! directive] [input-url ...]
//!     <indented process code line>
//! ```

use snafu::prelude::*;

#[derive(Debug, Snafu)]
#[snafu(visibility(pub))]
pub enum Error {
    #[snafu(display("line {line}: expected '<-' after output list"))]
    MissingArrow { line: usize },

    #[snafu(display("line {line}: section has no output URLs"))]
    NoOutputs { line: usize },
}

pub type Result<T> = std::result::Result<T, Error>;

/// One parsed section: the plain dict shape a real parser would hand to
/// the engine (`processor`, `process_code`, `inputs`, `outputs`, plus
/// whether it's a preprocess).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SectionDict {
    pub outputs: Vec<String>,
    pub inputs: Vec<String>,
    pub processor: Option<String>,
    pub is_preprocess: bool,
    pub process_code: String,
}

/// Parses the full text of a workflow file (or the concatenation of the
/// main file with its extension fragments, see `extension.rs`) into an
/// ordered sequence of sections.
pub fn parse(text: &str) -> Result<Vec<SectionDict>> {
    let mut sections = Vec::new();
    let mut current: Option<SectionDict> = None;
    let mut code_lines: Vec<String> = Vec::new();

    let flush = |current: &mut Option<SectionDict>, code_lines: &mut Vec<String>, sections: &mut Vec<SectionDict>| {
        if let Some(mut section) = current.take() {
            section.process_code = code_lines.join("\n");
            sections.push(section);
        }
        code_lines.clear();
    };

    for (idx, raw_line) in text.lines().enumerate() {
        let line_no = idx + 1;
        if raw_line.trim().is_empty() {
            continue;
        }
        let is_indented = raw_line.starts_with(' ') || raw_line.starts_with('\t');
        if is_indented {
            if current.is_some() {
                code_lines.push(raw_line.trim().to_string());
            }
            continue;
        }
        let trimmed = raw_line.trim();
        if trimmed.starts_with('#') && !trimmed.starts_with("#!") {
            continue; // column-0 comment line
        }

        // New column-0 section: flush the previous one.
        flush(&mut current, &mut code_lines, &mut sections);

        let arrow_pos = trimmed.find("<-").context(MissingArrowSnafu { line: line_no })?;
        let (outputs_part, rest) = trimmed.split_at(arrow_pos);
        let rest = &rest[2..]; // skip "<-"

        let outputs: Vec<String> = outputs_part.split_whitespace().map(String::from).collect();
        if outputs.is_empty() {
            return NoOutputsSnafu { line: line_no }.fail();
        }

        let rest = rest.trim();
        let (directive, remainder) = if let Some(stripped) = rest.strip_prefix("#!") {
            let mut parts = stripped.trim().splitn(2, char::is_whitespace);
            let directive = parts.next().unwrap_or("").to_string();
            let remainder = parts.next().unwrap_or("").trim();
            (Some(directive), remainder)
        } else {
            (None, rest)
        };

        let is_preprocess = directive.as_deref() == Some("preprocess");
        let processor = match directive.as_deref() {
            Some("preprocess") | None => None,
            Some(other) => Some(other.to_string()),
        };
        let inputs: Vec<String> = remainder.split_whitespace().map(String::from).collect();

        current = Some(SectionDict {
            outputs,
            inputs,
            processor,
            is_preprocess,
            process_code: String::new(),
        });
    }
    flush(&mut current, &mut code_lines, &mut sections);
    Ok(sections)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_trivial_build_section() {
        let sections = parse("file://B <- file://A\n    echo A produces B > B\n").unwrap();
        assert_eq!(sections.len(), 1);
        assert_eq!(sections[0].outputs, vec!["file://B"]);
        assert_eq!(sections[0].inputs, vec!["file://A"]);
        assert_eq!(sections[0].process_code, "echo A produces B > B");
        assert!(sections[0].processor.is_none());
    }

    #[test]
    fn parses_download_directive_with_no_inputs() {
        let sections = parse("http://www.google.com/ <- #! download\n").unwrap();
        assert_eq!(sections[0].processor.as_deref(), Some("download"));
        assert!(sections[0].inputs.is_empty());
    }

    #[test]
    fn parses_preprocess_directive() {
        let sections = parse("extensions/x <- #! preprocess\n    tuttle-extend-workflow t.tmpl a=b\n").unwrap();
        assert!(sections[0].is_preprocess);
        assert!(sections[0].processor.is_none());
    }

    #[test]
    fn ignores_blank_lines_and_comments() {
        let sections = parse("# a comment\n\nfile://B <- file://A\n    true\n").unwrap();
        assert_eq!(sections.len(), 1);
    }

    #[test]
    fn multiple_sections_parse_in_order() {
        let sections = parse("file://A <-\n    echo hi > A\nfile://B <- file://A\n    cp A B\n").unwrap();
        assert_eq!(sections.len(), 2);
        assert_eq!(sections[0].outputs, vec!["file://A"]);
        assert_eq!(sections[1].outputs, vec!["file://B"]);
    }

    #[test]
    fn missing_arrow_is_an_error() {
        let err = parse("file://A\n    true\n").unwrap_err();
        assert!(matches!(err, Error::MissingArrow { .. }));
    }
}
