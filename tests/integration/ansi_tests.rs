//! Translator tests against captured tool output

use termdeck::ansi::{clean, translate, AnsiColor, AnsiTranslator, SpanStyle, StyledSpan};

#[test]
fn test_translate_npm_install_fixture() {
    let fixture = include_str!("../fixtures/ansi_samples/npm_install.txt");
    let spans = translate(fixture);

    assert_eq!(
        spans,
        vec![
            StyledSpan::styled("added", SpanStyle::default().bold().fg(AnsiColor::Green)),
            StyledSpan::plain(" 42 packages in 3s\n"),
            StyledSpan::styled("warn", SpanStyle::default().fg(AnsiColor::Yellow)),
            StyledSpan::plain(" deprecated left-pad@1.0.0\norange text\nfound "),
            StyledSpan::styled("0", SpanStyle::default().bold().fg(AnsiColor::BrightRed)),
            StyledSpan::plain(" vulnerabilities\n"),
        ]
    );
}

#[test]
fn test_fixture_split_at_every_byte() {
    let fixture = include_str!("../fixtures/ansi_samples/npm_install.txt");
    let whole: String = translate(fixture).into_iter().map(|s| s.text).collect();

    let mut translator = AnsiTranslator::new();
    let mut pieced = String::new();
    for byte in fixture.as_bytes() {
        for span in translator.feed(std::slice::from_ref(byte)) {
            pieced.push_str(&span.text);
        }
    }
    assert_eq!(pieced, whole);
    assert!(translator.current_style().is_plain());
}

#[test]
fn test_clean_progress_fixture() {
    let fixture = include_str!("../fixtures/ansi_samples/progress.txt");
    assert_eq!(clean(fixture), "Compiling 3/3\nFinished\n");
}
