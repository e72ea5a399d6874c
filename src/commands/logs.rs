use std::fmt::Display;
use std::fs;
use std::io::{IsTerminal, Write};
use std::sync::Arc;

use anyhow::{Context, Result};
use crossterm::style::{StyledContent, Stylize};
use parking_lot::Mutex;
use tracing::info;

use kubetap_logs::{
    CombinedLogStream, EngineLogSource, ErrorCallback, KubeLogSource, KubeResolver, LineCallback,
    LogBuffer, LogClassifier, LogEntry, LogLevel, LogOptions, LogTarget, StreamError, WorkloadRef,
};

use crate::cli::LogsArgs;
use crate::commands::Cluster;
use crate::config::Config;

/// How received lines are printed
#[derive(Clone, Copy, Debug)]
struct PrintOptions {
    raw: bool,
    timestamps: bool,
    color: bool,
}

pub async fn run(args: LogsArgs, config: &Config) -> Result<()> {
    let options = LogOptions {
        follow: !args.no_follow,
        tail_lines: Some(args.tail.unwrap_or(config.tail_lines)),
        timestamps: config.timestamps || args.timestamps,
        since_seconds: args.since,
        until: None,
        previous: false,
        all_containers: args.all_containers,
    };
    let print = PrintOptions {
        raw: args.raw,
        timestamps: args.timestamps,
        color: std::io::stdout().is_terminal(),
    };

    let buffer = args.save.as_ref().map(|_| LogBuffer::new(config.buffer_size));
    let on_line = line_printer(print, buffer.clone());
    let failed: Arc<Mutex<Vec<String>>> = Arc::default();
    let on_error = error_reporter(Arc::clone(&failed));

    let mut stream = match &args.engine {
        Some(url) => {
            let url = if url.is_empty() {
                config
                    .engine_url
                    .clone()
                    .context("--engine needs a URL or engine_url in the config file")?
            } else {
                url.clone()
            };
            let targets = args
                .resources
                .iter()
                .map(|id| LogTarget::engine_container(id.as_str()))
                .collect();
            CombinedLogStream::start(
                Arc::new(EngineLogSource::new(url)),
                targets,
                options,
                on_line,
                Some(on_error),
            )
        }
        None => {
            let cluster = Cluster::connect(&args.cluster).await?;
            let workloads = parse_workloads(&args.resources, &cluster.namespace)?;
            CombinedLogStream::start_for_workloads(
                &KubeResolver::new(cluster.client.clone()),
                Arc::new(KubeLogSource::new(cluster.client)),
                &workloads,
                args.container.as_deref(),
                options,
                on_line,
                Some(on_error),
            )
            .await?
        }
    };

    info!(sources = stream.targets().len(), "streaming logs");
    let handle = stream.stop_handle();
    tokio::select! {
        _ = tokio::signal::ctrl_c() => handle.stop(),
        _ = stream.wait() => {}
    }
    stream.stop();

    if let Some(summary) = failure_summary(&failed.lock(), stream.targets().len()) {
        eprintln!("{}", summary);
    }

    if let (Some(path), Some(buffer)) = (&args.save, &buffer) {
        fs::write(path, buffer.export_raw() + "\n")
            .context(format!("Failed to write {}", path.display()))?;
        let counts = buffer.level_counts();
        eprintln!(
            "saved {} lines to {} ({} errors, {} warnings)",
            counts.total(),
            path.display(),
            counts.error,
            counts.warn
        );
        if buffer.evicted() > 0 {
            eprintln!("{} older lines did not fit in the buffer", buffer.evicted());
        }
    }

    Ok(())
}

fn parse_workloads(resources: &[String], namespace: &str) -> Result<Vec<WorkloadRef>> {
    resources
        .iter()
        .map(|spec| {
            WorkloadRef::parse(spec, namespace).context(format!("Unknown resource '{}'", spec))
        })
        .collect()
}

fn error_reporter(failed: Arc<Mutex<Vec<String>>>) -> ErrorCallback {
    Arc::new(move |err: StreamError| {
        eprintln!("{} {}", "error:".red().bold(), err);
        if let Some(source) = err.source_id() {
            let mut failed = failed.lock();
            if !failed.iter().any(|s| s == source) {
                failed.push(source.to_string());
            }
        }
    })
}

/// `<n> of <total> sources failed: a, b`
fn failure_summary(failed: &[String], total: usize) -> Option<String> {
    if failed.is_empty() {
        return None;
    }
    Some(format!("{} of {} sources failed: {}", failed.len(), total, failed.join(", ")))
}

fn line_printer(print: PrintOptions, buffer: Option<LogBuffer>) -> LineCallback {
    Arc::new(move |entry: LogEntry| {
        let line = format_entry(&entry, print);
        {
            let mut out = std::io::stdout().lock();
            let _ = writeln!(out, "{}", line);
        }
        if let Some(buffer) = &buffer {
            buffer.push(entry);
        }
    })
}

fn format_entry(entry: &LogEntry, print: PrintOptions) -> String {
    let mut line = String::new();
    if print.timestamps {
        if let Some(ts) = &entry.timestamp {
            line.push_str(&paint(ts.as_str().dark_grey(), print.color));
            line.push(' ');
        }
    }
    line.push_str(&paint(format!("[{}]", entry.label()).cyan(), print.color));
    line.push(' ');

    if print.raw {
        line.push_str(&entry.message);
        return line;
    }

    let parsed = LogClassifier::classify(&entry.message);
    line.push_str(&paint(level_style(parsed.level), print.color));
    line.push(' ');
    line.push_str(&parsed.rendered);
    line
}

fn paint<D: Display>(styled: StyledContent<D>, color: bool) -> String {
    if color {
        styled.to_string()
    } else {
        styled.content().to_string()
    }
}

fn level_style(level: LogLevel) -> StyledContent<&'static str> {
    let label = level.as_str();
    match level {
        LogLevel::Error => label.red().bold(),
        LogLevel::Warn => label.yellow(),
        LogLevel::Info => label.green(),
        LogLevel::Debug => label.blue(),
        LogLevel::Trace => label.dark_grey(),
        LogLevel::Unknown => label.dark_grey(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use kubetap_logs::WorkloadKind;

    #[test]
    fn test_parse_workloads() {
        let resources = vec!["deployment/api".to_string(), "worker-0".to_string()];
        let workloads = parse_workloads(&resources, "prod").unwrap();
        assert_eq!(
            workloads,
            vec![
                WorkloadRef::new(WorkloadKind::Deployment, "api", "prod"),
                WorkloadRef::new(WorkloadKind::Pod, "worker-0", "prod"),
            ]
        );
    }

    #[test]
    fn test_parse_workloads_unknown_kind() {
        let err = parse_workloads(&["cronjob/nightly".to_string()], "prod").unwrap_err();
        assert!(err.to_string().contains("cronjob/nightly"));
    }

    #[test]
    fn test_failed_sources_are_summarized() {
        let failed: Arc<Mutex<Vec<String>>> = Arc::default();
        let on_error = error_reporter(Arc::clone(&failed));
        let refused = |source: &str| StreamError::Transport {
            source_id: source.to_string(),
            message: "connection refused".to_string(),
        };

        on_error(refused("api-1"));
        on_error(refused("api-1"));
        on_error(refused("api-2/proxy"));
        on_error(StreamError::Resolve("nothing".to_string()));

        assert_eq!(
            failure_summary(&failed.lock(), 3).as_deref(),
            Some("2 of 3 sources failed: api-1, api-2/proxy")
        );
        assert_eq!(failure_summary(&[], 3), None);
    }

    #[test]
    fn test_format_raw_entry() {
        let mut entry = LogEntry::new("api-1", r#"{"level":"error"}"#);
        entry.sub_channel = Some("app".to_string());
        entry.timestamp = Some("2024-01-15T10:30:00Z".to_string());

        let raw = format_entry(
            &entry,
            PrintOptions {
                raw: true,
                timestamps: true,
                color: false,
            },
        );
        assert_eq!(raw, r#"2024-01-15T10:30:00Z [api-1/app] {"level":"error"}"#);
    }

    #[test]
    fn test_format_classified_entry() {
        let entry = LogEntry::new("api-1", "level=warn msg=slow");

        let line = format_entry(
            &entry,
            PrintOptions {
                raw: false,
                timestamps: false,
                color: false,
            },
        );
        assert_eq!(line, "[api-1] WRN level: warn\nmsg: slow");
    }
}
