//! Logging initialisation.

use eyre::Result;
use tracing_subscriber::EnvFilter;

use crate::cli::LogArgs;

/// Build the log filter from command line arguments.
///
/// Precedence:
/// 1. `--quiet` shows errors only
/// 2. otherwise `RUST_LOG` if set, else the level chosen by `-v` flags
/// 3. directives from `--log.filter` are added on top
pub(crate) fn build_filter(args: &LogArgs) -> EnvFilter {
    if args.quiet {
        return EnvFilter::new("error");
    }
    let base_level = match args.verbosity {
        0 => "info",
        1 => "debug",
        _ => "trace",
    };
    let mut filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(base_level));

    if let Some(custom_filter) = &args.filter {
        for directive in custom_filter.split(',') {
            if let Ok(d) = directive.parse() {
                filter = filter.add_directive(d);
            }
        }
    }
    filter
}

pub(crate) fn init_logging(args: &LogArgs) -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(build_filter(args))
        .try_init()
        .map_err(|e| eyre::eyre!("failed to install log subscriber: {e}"))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_quiet_overrides_verbosity() {
        let args = LogArgs {
            quiet: true,
            verbosity: 2,
            filter: Some("trellis_set=trace".into()),
        };
        assert_eq!(build_filter(&args).to_string(), "error");
    }

    #[test]
    fn test_custom_directives_are_added() {
        let args = LogArgs {
            quiet: false,
            verbosity: 0,
            filter: Some("trellis_set=trace,not a directive".into()),
        };
        assert!(build_filter(&args).to_string().contains("trellis_set=trace"));
    }
}
