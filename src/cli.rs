use clap::{Parser, Subcommand};

/// Encore - Reactive script runtime with memoized computation
///
/// Encore reruns app scripts on every interaction, keeps per-viewer session
/// state, and memoizes expensive calls across sessions.
#[derive(Parser, Debug)]
#[command(name = "encore")]
#[command(author = "Encore Team")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Reactive script runtime with memoized computation", long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,
}

/// Common configuration arguments shared across commands
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonConfigArgs {
    /// Config file path
    #[arg(short = 'c', long, env = "ENCORE_CONFIG")]
    pub config: Option<String>,

    /// Maximum memo cache entries
    #[arg(long, env = "ENCORE_CONFIG_MAX_ENTRIES")]
    pub config_max_entries: Option<usize>,

    /// Eviction policy when the entry bound is hit (lru, lfu)
    #[arg(long, env = "ENCORE_CONFIG_EVICTION_POLICY")]
    pub config_eviction_policy: Option<String>,

    /// Memo entry time-to-live (e.g., "30s", "10m")
    #[arg(long, env = "ENCORE_CONFIG_TTL")]
    pub config_ttl: Option<String>,

    /// Maximum concurrent sessions
    #[arg(long, env = "ENCORE_CONFIG_MAX_SESSIONS")]
    pub config_max_sessions: Option<usize>,

    /// Log level (trace|debug|info|warn|error)
    #[arg(long, env = "ENCORE_CONFIG_LOG_LEVEL")]
    pub config_log_level: Option<String>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Run the built-in tutorial app across simulated sessions
    Demo(DemoArgs),

    /// Print the fingerprint of a function call
    Fingerprint(FingerprintArgs),

    /// Configuration management utilities
    Config(ConfigArgs),
}

#[derive(Parser, Debug)]
pub struct DemoArgs {
    #[command(flatten)]
    pub common: CommonConfigArgs,

    /// Number of concurrent viewer sessions
    #[arg(long, default_value_t = 2)]
    pub sessions: usize,

    /// Button clicks per session after the initial view
    #[arg(long, default_value_t = 3)]
    pub clicks: usize,

    /// Simulated duration of the memoized data load
    #[arg(long, default_value = "200ms")]
    pub compute_delay: String,

    /// Print UI descriptions and cache stats as JSON
    #[arg(long)]
    pub json: bool,
}

#[derive(Parser, Debug)]
pub struct FingerprintArgs {
    /// Function name
    pub name: String,

    /// Function source (or a version string with --versioned)
    pub source: String,

    /// Treat `source` as an explicit version instead of source text
    #[arg(long)]
    pub versioned: bool,

    /// Positional argument as JSON (repeatable)
    #[arg(long = "arg")]
    pub args: Vec<String>,

    /// Keyword argument as name=JSON (repeatable)
    #[arg(long = "kwarg")]
    pub kwargs: Vec<String>,

    /// Print the full digest instead of the short form
    #[arg(long)]
    pub full: bool,
}

#[derive(Parser, Debug)]
pub struct ConfigArgs {
    #[command(subcommand)]
    pub command: ConfigCommands,
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommands {
    /// Validate configuration file
    Validate {
        /// Path to config file
        path: String,
    },
    /// Generate example config file
    Generate,
    /// Show effective configuration (discovered file or defaults)
    Show {
        /// Config file path
        #[arg(short = 'c', long, env = "ENCORE_CONFIG")]
        config: Option<String>,
    },
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_definition_is_valid() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_parse_fingerprint_args() {
        let cli = Cli::parse_from([
            "encore",
            "fingerprint",
            "square",
            "|x| x * x",
            "--arg",
            "3",
            "--kwarg",
            "scale=2",
        ]);

        match cli.command {
            Commands::Fingerprint(args) => {
                assert_eq!(args.name, "square");
                assert_eq!(args.args, vec!["3"]);
                assert_eq!(args.kwargs, vec!["scale=2"]);
                assert!(!args.versioned);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }

    #[test]
    fn test_parse_demo_defaults() {
        let cli = Cli::parse_from(["encore", "demo"]);
        match cli.command {
            Commands::Demo(args) => {
                assert_eq!(args.sessions, 2);
                assert_eq!(args.clicks, 3);
                assert!(!args.json);
            }
            other => panic!("unexpected command: {other:?}"),
        }
    }
}
