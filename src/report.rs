// Console narration for the download run.
// Everything the user sees goes through Reporter, which writes to any
// `io::Write` so a run can be captured in tests. Write errors on the console
// are ignored: losing a banner must never fail a download.

use std::io::{self, Write};

const RULE: usize = 70;

pub struct Reporter<W: Write> {
    out: W,
}

impl Reporter<io::Stdout> {
    pub fn stdout() -> Self {
        Self::new(io::stdout())
    }
}

impl<W: Write> Reporter<W> {
    pub fn new(out: W) -> Self {
        Self { out }
    }

    pub fn into_inner(self) -> W {
        self.out
    }

    pub fn header(&mut self, text: &str) {
        let rule = "=".repeat(RULE);
        let _ = writeln!(self.out, "\n{rule}\n  {text}\n{rule}");
    }

    pub fn step(&mut self, n: usize, total: usize, text: &str) {
        let rule = "█".repeat(RULE);
        let _ = writeln!(self.out, "\n{rule}\n  Step [{n}/{total}]: {text}\n{rule}");
    }

    pub fn info(&mut self, text: &str) {
        let _ = writeln!(self.out, "\nℹ  {text}");
    }

    pub fn item(&mut self, text: &str) {
        let _ = writeln!(self.out, "  • {text}");
    }

    pub fn line(&mut self, text: &str) {
        let _ = writeln!(self.out, "{text}");
    }

    pub fn success(&mut self, text: &str) {
        let _ = writeln!(self.out, "✔  {text}");
    }

    pub fn warning(&mut self, text: &str) {
        let _ = writeln!(self.out, "⚠  {text}");
    }
}

// 25557032 -> "25,557,032"
pub fn group_thousands(n: u64) -> String {
    let digits = n.to_string();
    let mut out = String::with_capacity(digits.len() + digits.len() / 3);
    for (i, c) in digits.chars().enumerate() {
        if i > 0 && (digits.len() - i) % 3 == 0 {
            out.push(',');
        }
        out.push(c);
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn groups_thousands() {
        assert_eq!(group_thousands(0), "0");
        assert_eq!(group_thousands(999), "999");
        assert_eq!(group_thousands(1000), "1,000");
        assert_eq!(group_thousands(13394), "13,394");
        assert_eq!(group_thousands(25_557_032), "25,557,032");
    }

    #[test]
    fn writes_step_header_and_markers() {
        let mut rep = Reporter::new(Vec::new());
        rep.step(2, 3, "Download image processor");
        rep.success("saved");
        rep.warning("slow network");

        let text = String::from_utf8(rep.into_inner()).unwrap();
        assert!(text.contains("Step [2/3]: Download image processor"));
        assert!(text.contains("✔  saved"));
        assert!(text.contains("⚠  slow network"));
    }
}
