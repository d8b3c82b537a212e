use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Entry point shared by the query engine front ends
#[allow(async_fn_in_trait)]
pub trait UniqueryCli {
    fn service_name() -> &'static str;

    fn service_description() -> &'static str;

    /// Execute the CLI command
    async fn execute(self) -> anyhow::Result<()>;
}

/// Common CLI arguments shared across all binaries
#[derive(Parser, Debug, Clone, Default)]
pub struct CommonArgs {
    #[arg(long, global = true, help = "Configuration file path")]
    pub config: Option<PathBuf>,

    #[arg(short, long, global = true, help = "Enable verbose logging")]
    pub verbose: bool,

    #[arg(short, long, global = true, help = "Enable quiet mode (minimal output)")]
    pub quiet: bool,
}

/// Subcommands that only need the configuration
#[derive(Subcommand, Debug, Clone)]
pub enum CommonCommands {
    /// Show current configuration and exit
    Config {
        #[arg(long, help = "Show configuration in JSON format")]
        json: bool,
    },
    /// Validate configuration and exit
    Validate,
    /// Show version information and exit
    Version,
}

/// Utility functions for CLI operations
pub mod utils {
    use super::*;
    use crate::config::Configuration;
    use anyhow::{Context, Result};
    use tracing_subscriber::EnvFilter;

    /// Install the tracing subscriber. `RUST_LOG` wins over the CLI flags.
    ///
    /// Output goes to stderr so command results on stdout stay parseable.
    pub fn init_logging(args: &CommonArgs) {
        let level = if args.quiet {
            "warn"
        } else if args.verbose {
            "debug"
        } else {
            "info"
        };

        let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(level));
        let _ = tracing_subscriber::fmt()
            .with_env_filter(filter)
            .with_writer(std::io::stderr)
            .try_init();
    }

    /// Load configuration with optional override from CLI
    pub fn load_config(config_path: Option<&PathBuf>) -> Result<Configuration> {
        match config_path {
            Some(path) => {
                log::info!("Loading configuration from: {}", path.display());
                Configuration::load_from_path(path).context("Failed to load configuration")
            }
            None => Configuration::load().context("Failed to load configuration"),
        }
    }

    /// Display configuration in human-readable or JSON format
    pub fn display_config(config: &Configuration, json: bool) -> Result<()> {
        if json {
            let json = serde_json::to_string_pretty(config)
                .context("Failed to serialize configuration to JSON")?;
            println!("{json}");
        } else {
            println!("UniQuery Configuration:");
            println!("=======================");
            println!("Search URL: {}", config.search.url);
            println!(
                "Search auth: {}",
                if config.search.username.is_some() {
                    "basic"
                } else {
                    "none"
                }
            );
            println!("Search timeout: {:?}", config.search.timeout);
            println!("Scroll keep-alive: {:?}", config.search.scroll_keep_alive);

            match &config.data_model.url {
                Some(url) => println!("Data model service: {url}"),
                None => println!("Data model service: static catalog"),
            }

            println!("Max search size: {}", config.query.max_search_size);
            println!(
                "Max related logs bucket: {}",
                config.query.max_related_logs_bucket
            );
            println!("Default series num: {}", config.query.default_series_num);
            println!("Series num by batch: {}", config.query.series_num_by_batch);
            println!(
                "Static catalog: {} data views, {} log groups, {} metric models",
                config.catalog.data_views.len(),
                config.catalog.log_groups.len(),
                config.catalog.metric_models.len()
            );
        }
        Ok(())
    }

    /// Validate configuration and report any issues
    pub fn validate_config(config: &Configuration) -> Result<()> {
        log::info!("Validating configuration...");

        if let Err(problems) = config.validate() {
            for problem in &problems {
                log::error!("{problem}");
            }
            anyhow::bail!(
                "Configuration is invalid: {} problem(s): {}",
                problems.len(),
                problems.join("; ")
            );
        }

        log::info!("Configuration validation passed");
        Ok(())
    }

    pub fn handle_common_command(command: &CommonCommands, config: &Configuration) -> Result<()> {
        match command {
            CommonCommands::Config { json } => display_config(config, *json),
            CommonCommands::Validate => validate_config(config),
            CommonCommands::Version => {
                println!("{}", version_info());
                Ok(())
            }
        }
    }

    /// Standard version information
    pub fn version_info() -> String {
        format!(
            "{} {} ({})",
            env!("CARGO_PKG_NAME"),
            env!("CARGO_PKG_VERSION"),
            env!("CARGO_PKG_RUST_VERSION")
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::Configuration;

    #[test]
    fn test_version_info() {
        let version = utils::version_info();
        assert!(version.contains(env!("CARGO_PKG_VERSION")));
    }

    #[test]
    fn test_validate_config_rejects_empty_url() {
        let mut config = Configuration::default();
        assert!(utils::validate_config(&config).is_ok());

        config.search.url = String::new();
        let err = utils::validate_config(&config).unwrap_err();
        assert!(err.to_string().contains("search.url"));
    }

    #[test]
    fn test_load_config_from_path() {
        figment::Jail::expect_with(|jail| {
            jail.create_file("custom.toml", "[query]\nmax_search_size = 42\n")?;

            let config = utils::load_config(Some(&PathBuf::from("custom.toml"))).unwrap();
            assert_eq!(config.query.max_search_size, 42);
            Ok(())
        });
    }
}
