use std::io::{self, Write};

use crate::config::Provider;
use crate::runner::RunResult;

const SEPARATOR: &str = "----------------------------------------";

pub fn print_banner<W: Write>(out: &mut W, provider: Provider, model: &str) -> io::Result<()> {
    writeln!(out, "=== provider: {} | model: {} ===", provider, model)?;
    out.flush()
}

pub fn latency_line(result: &RunResult) -> String {
    format!(
        "Latency: {:.2}s  Characters: {}",
        result.latency_secs(),
        result.text.chars().count()
    )
}

pub fn print_summary<W: Write>(out: &mut W, result: &RunResult) -> io::Result<()> {
    writeln!(out, "{}", SEPARATOR)?;
    writeln!(out, "{}", latency_line(result))?;
    writeln!(out, "{}", result.text)?;
    out.flush()
}
