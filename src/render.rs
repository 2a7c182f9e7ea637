//! Output rendering for chat replies.
//!
//! The session controller talks to a [`Renderer`] rather than to stdout, so
//! the same turn logic drives the terminal, tests, and anything else that
//! wants to watch replies arrive.

use std::io::{self, Stdout, Write};
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// ANSI escape code for dim text (used for informational lines).
const ANSI_DIM: &str = "\x1b[2m";

/// ANSI escape code to reset all styling.
const ANSI_RESET: &str = "\x1b[0m";

/// ANSI escape code for cyan text (used for the reply label).
const ANSI_CYAN: &str = "\x1b[36m";

/// ANSI escape code for red text (used for errors).
const ANSI_RED: &str = "\x1b[31m";

/// ANSI escape code for yellow text (used for the interrupt marker).
const ANSI_YELLOW: &str = "\x1b[33m";

/// Trait for rendering streaming output.
pub trait Renderer: Send {
    /// Called before the first fragment of a reply.
    fn start_response(&mut self, label: &str) {
        _ = label;
    }

    /// Print a chunk of reply text.
    ///
    /// This is called incrementally as fragments are streamed from the API.
    fn print_text(&mut self, text: &str);

    /// Print an error message.
    fn print_error(&mut self, error: &str);

    /// Print an informational message.
    fn print_info(&mut self, info: &str);

    /// Called when a reply is complete.
    fn finish_response(&mut self);

    /// Called when the stream is interrupted by the user.
    fn print_interrupted(&mut self) {}

    /// Returns true if streaming should be interrupted.
    fn should_interrupt(&self) -> bool {
        false
    }
}

/// Plain text renderer with optional ANSI styling.
pub struct PlainTextRenderer<W: Write + Send = Stdout> {
    out: W,
    use_color: bool,
    line_start: bool,
    interrupted: Option<Arc<AtomicBool>>,
}

impl PlainTextRenderer<Stdout> {
    /// Creates a new PlainTextRenderer on stdout with ANSI colors enabled.
    pub fn new() -> Self {
        Self::with_color(true)
    }

    /// Creates a new PlainTextRenderer on stdout with specified color setting.
    pub fn with_color(use_color: bool) -> Self {
        Self::with_writer(io::stdout(), use_color)
    }

    /// Creates a new PlainTextRenderer with specified color and interrupt flag.
    pub fn with_color_and_interrupt(use_color: bool, interrupted: Arc<AtomicBool>) -> Self {
        Self::with_color(use_color).with_interrupt(interrupted)
    }
}

impl<W: Write + Send> PlainTextRenderer<W> {
    /// Creates a renderer that writes to `out`.
    pub fn with_writer(out: W, use_color: bool) -> Self {
        Self {
            out,
            use_color,
            line_start: true,
            interrupted: None,
        }
    }

    /// Attaches an interrupt flag to the renderer.
    pub fn with_interrupt(mut self, interrupted: Arc<AtomicBool>) -> Self {
        self.interrupted = Some(interrupted);
        self
    }

    /// Consumes the renderer and returns its writer.
    pub fn into_inner(self) -> W {
        self.out
    }

    fn write(&mut self, text: &str) {
        if text.is_empty() {
            return;
        }
        let _ = self.out.write_all(text.as_bytes());
        let _ = self.out.flush();
        self.line_start = text.ends_with('\n');
    }

    fn write_styled(&mut self, style: &str, text: &str) {
        if self.use_color {
            self.write(&format!("{style}{text}{ANSI_RESET}"));
            self.line_start = text.ends_with('\n');
        } else {
            self.write(text);
        }
    }

    fn ensure_line_start(&mut self) {
        if !self.line_start {
            self.write("\n");
        }
    }
}

impl Default for PlainTextRenderer<Stdout> {
    fn default() -> Self {
        Self::new()
    }
}

impl<W: Write + Send> Renderer for PlainTextRenderer<W> {
    fn start_response(&mut self, label: &str) {
        self.ensure_line_start();
        self.write_styled(ANSI_CYAN, &format!("{label}: "));
    }

    fn print_text(&mut self, text: &str) {
        self.write(text);
    }

    fn print_error(&mut self, error: &str) {
        self.ensure_line_start();
        self.write_styled(ANSI_RED, &format!("Error: {error}\n"));
    }

    fn print_info(&mut self, info: &str) {
        self.ensure_line_start();
        self.write_styled(ANSI_DIM, &format!("{info}\n"));
    }

    fn finish_response(&mut self) {
        self.write("\n");
    }

    fn print_interrupted(&mut self) {
        self.ensure_line_start();
        self.write_styled(ANSI_YELLOW, "[interrupted]\n");
    }

    fn should_interrupt(&self) -> bool {
        self.interrupted
            .as_ref()
            .is_some_and(|flag| flag.load(Ordering::Relaxed))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rendered(renderer: PlainTextRenderer<Vec<u8>>) -> String {
        String::from_utf8(renderer.into_inner()).unwrap()
    }

    #[test]
    fn renderer_default_has_color() {
        let renderer = PlainTextRenderer::new();
        assert!(renderer.use_color);
    }

    #[test]
    fn plain_reply_layout() {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);

        renderer.start_response("Assistant");
        renderer.print_text("Hel");
        renderer.print_text("lo");
        renderer.finish_response();
        renderer.print_info("Estimated cost: $0.000100");

        assert_eq!(
            rendered(renderer),
            "Assistant: Hello\nEstimated cost: $0.000100\n"
        );
    }

    #[test]
    fn interrupt_marker_starts_a_new_line() {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), false);

        renderer.print_text("partial");
        renderer.print_interrupted();
        renderer.print_error("boom");

        assert_eq!(rendered(renderer), "partial\n[interrupted]\nError: boom\n");
    }

    #[test]
    fn colors_wrap_labels() {
        let mut renderer = PlainTextRenderer::with_writer(Vec::new(), true);
        renderer.start_response("Assistant");
        assert_eq!(rendered(renderer), format!("{ANSI_CYAN}Assistant: {ANSI_RESET}"));
    }

    #[test]
    fn interrupt_flag_is_observed() {
        let flag = Arc::new(AtomicBool::new(false));
        let renderer =
            PlainTextRenderer::with_writer(Vec::new(), false).with_interrupt(Arc::clone(&flag));

        assert!(!renderer.should_interrupt());
        flag.store(true, Ordering::Relaxed);
        assert!(renderer.should_interrupt());
    }
}
