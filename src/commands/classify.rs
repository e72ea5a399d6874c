use std::fs::File;
use std::io::{BufRead, BufReader, Write};

use anyhow::{Context, Result};

use kubetap_logs::{LogClassifier, ParsedLogLine};

use crate::cli::ClassifyArgs;

pub fn run(args: ClassifyArgs) -> Result<()> {
    let input: Box<dyn BufRead> = match &args.file {
        Some(path) => Box::new(BufReader::new(
            File::open(path).context(format!("Failed to open {}", path.display()))?,
        )),
        None => Box::new(std::io::stdin().lock()),
    };

    let mut out = std::io::stdout().lock();
    for line in input.lines() {
        let line = line.context("Failed to read input")?;
        if line.trim().is_empty() {
            continue;
        }
        writeln!(out, "{}", describe(&LogClassifier::classify(&line)))?;
    }

    Ok(())
}

/// `<format> <level>` header, then the rendered text indented
fn describe(parsed: &ParsedLogLine) -> String {
    let mut text = format!("{} {}", parsed.format.as_str(), parsed.level.as_str());
    for line in parsed.rendered.lines() {
        text.push_str("\n    ");
        text.push_str(line);
    }
    text
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_describe() {
        let parsed = LogClassifier::classify(r#"level=error msg="disk full" device=sda"#);
        assert_eq!(
            describe(&parsed),
            "leveled-kv ERR\n    level: error\n    msg: disk full\n    device: sda"
        );

        let plain = LogClassifier::classify("hello world");
        assert_eq!(describe(&plain), "plain ???\n    hello world");
    }
}
