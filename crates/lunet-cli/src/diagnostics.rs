//! Source-span rendering for load-time errors.

use codespan_reporting::diagnostic::{Diagnostic, Label};
use codespan_reporting::files::SimpleFile;
use codespan_reporting::term;
use lunet_engine::Span;
use termcolor::{ColorChoice, StandardStream};

/// Render a syntax error against its source with the offending span
/// highlighted.
pub fn report_syntax(name: &str, source: &str, span: Span, message: &str) {
    let file = SimpleFile::new(name.to_string(), source.to_string());
    let end = span.end.min(source.len());
    let start = span.start.min(end);
    let diagnostic = Diagnostic::error()
        .with_message(message)
        .with_labels(vec![Label::primary((), start..end)]);
    let writer = StandardStream::stderr(ColorChoice::Auto);
    let config = term::Config::default();
    let _ = term::emit(&mut writer.lock(), &config, &file, &diagnostic);
}
