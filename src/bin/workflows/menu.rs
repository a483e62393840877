use std::io::{self, BufRead, Write};

use anyhow::{Context, Result};
use release_builder::error::ReleaseError;
use release_builder::pipeline::{parse_selection, StepPipeline};
use release_builder::steps::{bundle, BUNDLES};

/// Interactive fallback when `run` is given no `--steps`.
pub(crate) fn select_steps(pipeline: &StepPipeline) -> Result<Vec<String>> {
    let stdin = io::stdin();
    let mut input = stdin.lock();
    let mut out = io::stdout();
    select_from(&mut input, &mut out, pipeline)
}

fn read_line(input: &mut impl BufRead) -> Result<String> {
    let mut line = String::new();
    input.read_line(&mut line).context("reading menu choice")?;
    Ok(line.trim().to_string())
}

fn select_from(
    input: &mut impl BufRead,
    out: &mut impl Write,
    pipeline: &StepPipeline,
) -> Result<Vec<String>> {
    writeln!(out, "\nRelease menu")?;
    for (i, b) in BUNDLES.iter().enumerate() {
        writeln!(out, "{}) {} ({})", i + 1, b.label, b.steps.join(", "))?;
    }
    let custom = BUNDLES.len() + 1;
    writeln!(out, "{custom}) Custom (type step keys)")?;
    write!(out, "Select: ")?;
    out.flush()?;

    let choice = read_line(input)?;
    let picked = match choice.parse::<usize>() {
        Ok(n) if (1..=BUNDLES.len()).contains(&n) => Some(&BUNDLES[n - 1]),
        Ok(n) if n == custom => None,
        _ if choice == "custom" => None,
        _ => Some(bundle(&choice).ok_or_else(|| {
            ReleaseError::config(format!("invalid menu choice '{choice}'"))
        })?),
    };

    match picked {
        Some(b) => Ok(b.steps.iter().map(|s| s.to_string()).collect()),
        None => {
            writeln!(out, "Available step keys: {}", pipeline.keys().join(", "))?;
            write!(out, "Enter comma-separated keys: ")?;
            out.flush()?;
            Ok(parse_selection(&read_line(input)?))
        }
    }
}
