use oxc_diagnostics::OxcDiagnostic;
use oxc_span::Span;

/// Lines shown around the offending one.
const CONTEXT_LINES: usize = 3;

/// Renders `message` followed by the source lines around `span`:
///
/// ```text
/// Unexpected token
/// Line 1 |  let a = 1;
/// Line 2 |  let b = ;
///           ~~~~~~~~~
/// Line 3 |  let c = 3;
/// ```
pub fn with_snippet(message: &str, source: &str, span: Option<Span>) -> String {
    let Some(span) = span else {
        return message.to_string();
    };

    let start = (span.start as usize).min(source.len());
    let end = (span.end as usize).min(source.len()).max(start);
    let start_line = line_of(source, start);
    let end_line = line_of(source, end);
    let lines: Vec<&str> = source.split('\n').collect();
    let width = (end_line + 1).to_string().len() + 5;

    let numbered = |n: usize| -> Option<String> {
        let line = lines.get(n)?;
        if line.is_empty() {
            return None;
        }
        let label = format!("Line {} |", n + 1);
        Some(format!("{label:>width$}  {line}"))
    };

    let mut snippet = Vec::new();
    for n in start_line.saturating_sub(CONTEXT_LINES)..start_line {
        snippet.extend(numbered(n));
    }
    snippet.extend(numbered(start_line));
    let underline_len = lines.get(start_line).map_or(0, |line| line.chars().count());
    if underline_len > 0 {
        snippet.push(format!("{}{}", " ".repeat(width + 4), "~".repeat(underline_len)));
    }
    if start_line != end_line {
        if let Some(line) = numbered(end_line) {
            snippet.push(format!("......{line}"));
        }
    }
    for n in end_line + 1..=end_line + CONTEXT_LINES {
        snippet.extend(numbered(n));
    }

    format!("{message}\n{}\n", snippet.join("\n"))
}

/// Formats the first parser diagnostic against `source`.
pub fn render(diagnostic: &OxcDiagnostic, source: &str) -> String {
    let span = diagnostic
        .labels
        .as_ref()
        .and_then(|labels| labels.first())
        .map(|label| Span::new(label.offset() as u32, (label.offset() + label.len()) as u32));
    with_snippet(&diagnostic.message, source, span)
}

fn line_of(source: &str, offset: usize) -> usize {
    source.as_bytes()[..offset]
        .iter()
        .filter(|byte| **byte == b'\n')
        .count()
}

#[cfg(test)]
mod test {
    use expect_test::expect;

    use super::*;

    #[test]
    fn underlines_the_error_line() {
        let source = "let a = 1;\nlet b = ;\nlet c = 3;";
        let rendered = with_snippet("Unexpected token", source, Some(Span::new(19, 20)));

        expect![[r#"
            Unexpected token
            Line 1 |  let a = 1;
            Line 2 |  let b = ;
                      ~~~~~~~~~
            Line 3 |  let c = 3;
        "#]]
        .assert_eq(&rendered);
    }

    #[test]
    fn marks_multi_line_spans() {
        let source = "a\nb\nc\nd\ne\nf\ng\nh\ni";
        let rendered = with_snippet("Broken", source, Some(Span::new(6, 10)));

        expect![[r#"
            Broken
            Line 1 |  a
            Line 2 |  b
            Line 3 |  c
            Line 4 |  d
                      ~
            ......Line 6 |  f
            Line 7 |  g
            Line 8 |  h
            Line 9 |  i
        "#]]
        .assert_eq(&rendered);
    }

    #[test]
    fn without_span_keeps_the_message() {
        assert_eq!(with_snippet("Broken", "a", None), "Broken");
    }
}
