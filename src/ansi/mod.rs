//! ANSI module - SGR styling for process output

mod translator;

pub use translator::{clean, translate, AnsiColor, AnsiTranslator, SpanStyle, StyledSpan};
