//! SGR-to-span translator using VTE
//!
//! Turns process output containing ANSI escape sequences into a list of
//! [`StyledSpan`]s. Only a small fixed table of SGR codes is understood;
//! everything else (cursor movement, OSC titles, extended colors) is dropped.

use serde::{Deserialize, Serialize};
use vte::{Params, Parser, Perform};

/// The 16-color palette addressable by the SGR table
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum AnsiColor {
    Black,
    Red,
    Green,
    Yellow,
    Blue,
    Magenta,
    Cyan,
    White,
    BrightBlack,
    BrightRed,
    BrightGreen,
    BrightYellow,
    BrightBlue,
    BrightMagenta,
    BrightCyan,
    BrightWhite,
}

const BASE_COLORS: [AnsiColor; 8] = [
    AnsiColor::Black,
    AnsiColor::Red,
    AnsiColor::Green,
    AnsiColor::Yellow,
    AnsiColor::Blue,
    AnsiColor::Magenta,
    AnsiColor::Cyan,
    AnsiColor::White,
];

const BRIGHT_COLORS: [AnsiColor; 8] = [
    AnsiColor::BrightBlack,
    AnsiColor::BrightRed,
    AnsiColor::BrightGreen,
    AnsiColor::BrightYellow,
    AnsiColor::BrightBlue,
    AnsiColor::BrightMagenta,
    AnsiColor::BrightCyan,
    AnsiColor::BrightWhite,
];

impl AnsiColor {
    /// SGR foreground code for this color (30-37, 90-97)
    pub fn sgr_code(self) -> u16 {
        if let Some(idx) = BASE_COLORS.iter().position(|c| *c == self) {
            30 + idx as u16
        } else {
            let idx = BRIGHT_COLORS.iter().position(|c| *c == self).unwrap_or(7);
            90 + idx as u16
        }
    }
}

/// Text attributes carried by a span
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct SpanStyle {
    pub bold: bool,
    pub dim: bool,
    pub fg: Option<AnsiColor>,
}

impl SpanStyle {
    pub fn is_plain(&self) -> bool {
        *self == Self::default()
    }

    pub fn bold(mut self) -> Self {
        self.bold = true;
        self
    }

    pub fn dim(mut self) -> Self {
        self.dim = true;
        self
    }

    pub fn fg(mut self, color: AnsiColor) -> Self {
        self.fg = Some(color);
        self
    }
}

/// A run of text sharing one style
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StyledSpan {
    pub text: String,
    pub style: SpanStyle,
}

impl StyledSpan {
    pub fn plain(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            style: SpanStyle::default(),
        }
    }

    pub fn styled(text: impl Into<String>, style: SpanStyle) -> Self {
        Self {
            text: text.into(),
            style,
        }
    }
}

/// Stateful translator.
///
/// Keep one per output stream: the current style and any half-received
/// escape sequence carry over from one [`feed`](Self::feed) call to the next.
pub struct AnsiTranslator {
    parser: Parser,
    style: SpanStyle,
    line: CleanLine,
}

impl Default for AnsiTranslator {
    fn default() -> Self {
        Self::new()
    }
}

impl AnsiTranslator {
    pub fn new() -> Self {
        Self {
            parser: Parser::new(),
            style: SpanStyle::default(),
            line: CleanLine::default(),
        }
    }

    /// Translate a chunk of raw output into styled spans
    pub fn feed(&mut self, data: &[u8]) -> Vec<StyledSpan> {
        let mut performer = SpanPerformer {
            spans: Vec::new(),
            text: String::new(),
            style: &mut self.style,
        };

        for byte in data {
            self.parser.advance(&mut performer, *byte);
        }

        performer.flush_text();
        performer.spans
    }

    /// Clean-mode counterpart of [`feed`](Self::feed): escape sequences are
    /// stripped and carriage returns collapsed.
    ///
    /// The unfinished line is returned as soon as it arrives (so prompts
    /// show up), unless it ends in `\r` and may still be overwritten. Text
    /// overwriting an already returned line starts a new one, since returned
    /// text cannot be taken back.
    pub fn feed_clean(&mut self, data: &[u8]) -> String {
        let mut performer = CleanPerformer {
            out: String::new(),
            line: &mut self.line,
        };
        for byte in data {
            self.parser.advance(&mut performer, *byte);
        }
        performer.flush_partial();
        performer.out
    }

    /// Style that will apply to the next printed character
    pub fn current_style(&self) -> SpanStyle {
        self.style
    }
}

/// One-off translation of a complete string
pub fn translate(text: &str) -> Vec<StyledSpan> {
    AnsiTranslator::new().feed(text.as_bytes())
}

/// Strip every escape sequence and collapse carriage returns.
///
/// Each line keeps only what was written after its last `\r`, which is what
/// a terminal would show after a progress bar redraws in place.
pub fn clean(text: &str) -> String {
    let mut line = CleanLine::default();
    let mut performer = CleanPerformer {
        out: String::new(),
        line: &mut line,
    };
    let mut parser = Parser::new();
    for byte in text.as_bytes() {
        parser.advance(&mut performer, *byte);
    }
    performer.out.push_str(&performer.line.text);
    performer.out
}

/// Apply an SGR parameter list to a style. Unknown codes are ignored.
fn apply_sgr(style: &mut SpanStyle, params: &Params) {
    let codes: Vec<u16> = params.iter().flat_map(|p| p.iter().copied()).collect();
    if codes.is_empty() {
        *style = SpanStyle::default();
        return;
    }

    let mut i = 0;
    while i < codes.len() {
        match codes[i] {
            0 => *style = SpanStyle::default(),
            1 => style.bold = true,
            2 => style.dim = true,
            22 => {
                style.bold = false;
                style.dim = false;
            }
            c @ 30..=37 => style.fg = Some(BASE_COLORS[(c - 30) as usize]),
            39 => style.fg = None,
            c @ 90..=97 => style.fg = Some(BRIGHT_COLORS[(c - 90) as usize]),
            // Extended colors: skip their arguments so they aren't read as codes
            38 | 48 | 58 => match codes.get(i + 1) {
                Some(5) => i += 2,
                Some(2) => i += 4,
                _ => {}
            },
            _ => {}
        }
        i += 1;
    }
}

struct SpanPerformer<'a> {
    spans: Vec<StyledSpan>,
    text: String,
    style: &'a mut SpanStyle,
}

impl SpanPerformer<'_> {
    fn flush_text(&mut self) {
        if self.text.is_empty() {
            return;
        }
        let text = std::mem::take(&mut self.text);
        let style = *self.style;
        if let Some(last) = self.spans.last_mut() {
            if last.style == style {
                last.text.push_str(&text);
                return;
            }
        }
        self.spans.push(StyledSpan::styled(text, style));
    }
}

impl Perform for SpanPerformer<'_> {
    fn print(&mut self, c: char) {
        self.text.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => self.text.push('\n'),
            b'\t' => self.text.push('\t'),
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, params: &Params, intermediates: &[u8], _ignore: bool, action: char) {
        if action != 'm' || !intermediates.is_empty() {
            return;
        }
        let mut next = *self.style;
        apply_sgr(&mut next, params);
        if next != *self.style {
            self.flush_text();
            *self.style = next;
        }
    }

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}

/// The line being written in clean mode
#[derive(Debug, Default)]
struct CleanLine {
    /// Text not yet handed out
    text: String,
    /// A `\r` was seen; the line is overwritten only if more text follows
    /// before the newline
    pending_cr: bool,
    /// Part of this line was already handed out
    flushed: bool,
}

struct CleanPerformer<'a> {
    out: String,
    line: &'a mut CleanLine,
}

impl CleanPerformer<'_> {
    fn push(&mut self, c: char) {
        if self.line.pending_cr {
            if self.line.flushed {
                self.out.push('\n');
                self.line.flushed = false;
            }
            self.line.text.clear();
            self.line.pending_cr = false;
        }
        self.line.text.push(c);
    }

    /// Hand out the unfinished line unless a `\r` may still replace it
    fn flush_partial(&mut self) {
        if self.line.pending_cr || self.line.text.is_empty() {
            return;
        }
        self.out.push_str(&self.line.text);
        self.line.text.clear();
        self.line.flushed = true;
    }
}

impl Perform for CleanPerformer<'_> {
    fn print(&mut self, c: char) {
        self.push(c);
    }

    fn execute(&mut self, byte: u8) {
        match byte {
            b'\n' => {
                self.out.push_str(&self.line.text);
                self.out.push('\n');
                *self.line = CleanLine::default();
            }
            b'\r' => self.line.pending_cr = true,
            b'\t' => self.push('\t'),
            _ => {}
        }
    }

    fn hook(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn put(&mut self, _byte: u8) {}

    fn unhook(&mut self) {}

    fn osc_dispatch(&mut self, _params: &[&[u8]], _bell_terminated: bool) {}

    fn csi_dispatch(&mut self, _params: &Params, _intermediates: &[u8], _ignore: bool, _action: char) {}

    fn esc_dispatch(&mut self, _intermediates: &[u8], _ignore: bool, _byte: u8) {}
}
