use std::path::PathBuf;

use clap::{Args, Parser, Subcommand};

/// Kubetap - live log streaming and interactive exec for Kubernetes pods
#[derive(Parser, Debug)]
#[command(name = "kubetap")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Enable debug logging on stderr
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Config file (default: <config dir>/kubetap/config.toml)
    #[arg(long, global = true, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Stream logs from pods, workloads or engine containers
    Logs(LogsArgs),
    /// Open an interactive shell in a container
    Exec(ExecArgs),
    /// Classify log lines from a file or stdin
    Classify(ClassifyArgs),
}

/// Cluster selection shared by the cluster commands
#[derive(Args, Debug, Clone, Default)]
pub struct ClusterArgs {
    /// Kubeconfig context (default: current context)
    #[arg(long)]
    pub context: Option<String>,

    /// Namespace (default: the context's namespace)
    #[arg(short = 'n', long)]
    pub namespace: Option<String>,
}

#[derive(Args, Debug)]
pub struct LogsArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Resources as kind/name or bare pod names (container ids with --engine)
    #[arg(required = true, value_name = "RESOURCE")]
    pub resources: Vec<String>,

    /// Container name (if multi-container pod)
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Stream every container of every pod
    #[arg(long, conflicts_with = "container")]
    pub all_containers: bool,

    /// Number of historical lines per source
    #[arg(long)]
    pub tail: Option<i64>,

    /// Only lines newer than a duration such as 30s, 5m, 2h or 1d
    #[arg(long, value_parser = parse_duration)]
    pub since: Option<i64>,

    /// Print existing lines and exit
    #[arg(long)]
    pub no_follow: bool,

    /// Show line timestamps
    #[arg(long)]
    pub timestamps: bool,

    /// Read from a container engine instead of the cluster
    /// (URL defaults to `engine_url` from the config file)
    #[arg(long, value_name = "URL", num_args = 0..=1, default_missing_value = "")]
    pub engine: Option<String>,

    /// Write received lines to a file when the stream ends
    #[arg(long, value_name = "FILE")]
    pub save: Option<PathBuf>,

    /// Print messages without classification
    #[arg(long)]
    pub raw: bool,
}

#[derive(Args, Debug)]
pub struct ExecArgs {
    #[command(flatten)]
    pub cluster: ClusterArgs,

    /// Pod name
    pub pod: String,

    /// Container name (if multi-container pod)
    #[arg(short = 'c', long)]
    pub container: Option<String>,

    /// Candidate shell, repeatable; tried in order
    #[arg(long = "shell", value_name = "CMD")]
    pub shells: Vec<String>,
}

#[derive(Args, Debug)]
pub struct ClassifyArgs {
    /// Input file (default: stdin)
    pub file: Option<PathBuf>,
}

/// Parse `90`, `30s`, `5m`, `2h` or `1d` into seconds
pub fn parse_duration(s: &str) -> Result<i64, String> {
    let s = s.trim();
    let (digits, unit) = match s.find(|c: char| !c.is_ascii_digit()) {
        Some(idx) => s.split_at(idx),
        None => (s, "s"),
    };

    let value: i64 = digits
        .parse()
        .map_err(|_| format!("invalid duration '{}'", s))?;
    let scale = match unit {
        "s" => 1,
        "m" => 60,
        "h" => 3600,
        "d" => 86400,
        _ => return Err(format!("invalid duration unit in '{}' (use s, m, h or d)", s)),
    };

    Ok(value * scale)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_logs_parsing() {
        let cli = Cli::try_parse_from([
            "kubetap",
            "logs",
            "-n",
            "prod",
            "deployment/api",
            "worker-0",
            "--tail",
            "20",
            "--since",
            "5m",
        ])
        .unwrap();

        let Command::Logs(args) = cli.command else {
            panic!("expected logs command");
        };
        assert_eq!(args.cluster.namespace.as_deref(), Some("prod"));
        assert_eq!(args.resources, vec!["deployment/api", "worker-0"]);
        assert_eq!(args.tail, Some(20));
        assert_eq!(args.since, Some(300));
        assert!(!args.no_follow);
    }

    #[test]
    fn test_logs_requires_resource() {
        assert!(Cli::try_parse_from(["kubetap", "logs"]).is_err());
    }

    #[test]
    fn test_engine_url_optional() {
        let cli = Cli::try_parse_from([
            "kubetap",
            "logs",
            "--engine",
            "http://127.0.0.1:2375",
            "c0ffee",
        ])
        .unwrap();
        let Command::Logs(args) = cli.command else {
            panic!("expected logs command");
        };
        assert_eq!(args.engine.as_deref(), Some("http://127.0.0.1:2375"));
        assert_eq!(args.resources, vec!["c0ffee"]);

        let cli = Cli::try_parse_from(["kubetap", "logs", "c0ffee", "--engine"]).unwrap();
        let Command::Logs(args) = cli.command else {
            panic!("expected logs command");
        };
        assert_eq!(args.engine.as_deref(), Some(""));
        assert_eq!(args.resources, vec!["c0ffee"]);
    }

    #[test]
    fn test_container_conflicts_with_all_containers() {
        assert!(
            Cli::try_parse_from(["kubetap", "logs", "p", "-c", "app", "--all-containers"]).is_err()
        );
    }

    #[test]
    fn test_exec_parsing() {
        let cli = Cli::try_parse_from([
            "kubetap",
            "-v",
            "exec",
            "api-1",
            "-c",
            "app",
            "--shell",
            "/bin/zsh",
            "--shell",
            "/bin/sh",
        ])
        .unwrap();

        assert!(cli.verbose);
        let Command::Exec(args) = cli.command else {
            panic!("expected exec command");
        };
        assert_eq!(args.pod, "api-1");
        assert_eq!(args.container.as_deref(), Some("app"));
        assert_eq!(args.shells, vec!["/bin/zsh", "/bin/sh"]);
    }

    #[test]
    fn test_classify_stdin() {
        let cli = Cli::try_parse_from(["kubetap", "classify"]).unwrap();
        assert!(matches!(cli.command, Command::Classify(ClassifyArgs { file: None })));
    }

    #[test]
    fn test_parse_duration() {
        assert_eq!(parse_duration("90"), Ok(90));
        assert_eq!(parse_duration("30s"), Ok(30));
        assert_eq!(parse_duration("2h"), Ok(7200));
        assert_eq!(parse_duration("1d"), Ok(86400));
        assert!(parse_duration("5w").is_err());
        assert!(parse_duration("m").is_err());
    }
}
