use std::path::{Path, PathBuf};
use std::process::ExitCode;

use anyhow::{Context, Result};
use clap::{Parser, Subcommand};
use common::cli::{CommonArgs, CommonCommands, UniqueryCli, utils};
use common::model::metric::MetricModelQuery;
use querier::QuerierError;
use querier::query::view_query::ViewQuery;
use querier::services::ServiceContainer;
use serde::Serialize;
use tokio_util::sync::CancellationToken;
use uniquery_api::request::{DeletePitsRequest, SpanPageParams};

#[derive(Parser)]
#[command(name = "uniquery")]
#[command(about = "UniQuery - unified trace, log view and metric queries over OpenSearch")]
#[command(version)]
struct Cli {
    #[command(flatten)]
    common: CommonArgs,

    #[command(subcommand)]
    command: QueryCommands,
}

#[derive(Subcommand)]
enum QueryCommands {
    #[command(flatten)]
    Common(CommonCommands),

    /// Assemble the span tree of one trace
    Trace {
        #[arg(help = "Data view holding the spans")]
        trace_view: String,

        #[arg(help = "Data view holding the related logs")]
        log_view: String,

        trace_id: String,
    },

    /// List the raw span documents of a trace; `_all` lists every trace
    Spans {
        trace_view: String,

        trace_id: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Read one span document
    Span {
        trace_view: String,

        #[arg(help = "Trace id, `_all` to match the span in any trace")]
        trace_id: String,

        span_id: String,
    },

    /// List the log records attached to a span
    RelatedLogs {
        log_view: String,

        trace_id: String,

        span_id: String,

        #[command(flatten)]
        page: PageArgs,
    },

    /// Query the rows of a data view
    View {
        view_id: String,

        #[arg(long, help = "JSON file with the view query (\"version\": v1, v2 or simulate)")]
        query: PathBuf,

        #[arg(long, help = "Read every row through one point in time")]
        all: bool,

        #[arg(long, default_value = "1000", help = "Rows per page with --all")]
        page_size: usize,
    },

    /// Evaluate a metric model
    Metric {
        model_id: String,

        #[arg(long, help = "JSON file with the metric query")]
        query: PathBuf,
    },

    /// Release points in time; `__all` releases every one of them
    DeletePits {
        #[arg(required = true)]
        pit_ids: Vec<String>,
    },
}

#[derive(clap::Args)]
struct PageArgs {
    #[arg(long, default_value = "0")]
    offset: i64,

    #[arg(long, default_value = "10")]
    limit: i64,

    #[arg(long, help = "JSON file with a list of {\"field\", \"direction\"} sort clauses")]
    sort: Option<PathBuf>,
}

impl PageArgs {
    fn into_params(self) -> Result<SpanPageParams> {
        let sort = match &self.sort {
            Some(path) => read_json(path)?,
            None => Vec::new(),
        };
        Ok(SpanPageParams {
            offset: self.offset,
            limit: self.limit,
            sort,
        })
    }
}

impl UniqueryCli for Cli {
    fn service_name() -> &'static str {
        "uniquery"
    }

    fn service_description() -> &'static str {
        "Unified query engine"
    }

    async fn execute(self) -> Result<()> {
        utils::init_logging(&self.common);
        let config = utils::load_config(self.common.config.as_ref())?;

        let command = match self.command {
            QueryCommands::Common(common) => return utils::handle_common_command(&common, &config),
            command => command,
        };
        utils::validate_config(&config)?;

        let container =
            ServiceContainer::from_config(config).context("Failed to initialize services")?;

        let cancel = CancellationToken::new();
        let on_signal = cancel.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                log::info!("Interrupted, cancelling the running query");
                on_signal.cancel();
            }
        });

        log::debug!(
            "Running {} command: {}",
            Self::service_name(),
            Self::service_description()
        );
        match command {
            QueryCommands::Common(_) => Ok(()),
            QueryCommands::Trace {
                trace_view,
                log_view,
                trace_id,
            } => {
                let result = container
                    .trace_service()
                    .get_trace_detail(&trace_view, &log_view, &trace_id, &cancel)
                    .await;
                print_outcome(result)
            }
            QueryCommands::Spans {
                trace_view,
                trace_id,
                page,
            } => {
                let page = page.into_params()?;
                let result = container
                    .trace_service()
                    .get_span_list(&trace_view, &trace_id, &page, &cancel)
                    .await;
                print_outcome(result)
            }
            QueryCommands::Span {
                trace_view,
                trace_id,
                span_id,
            } => {
                let result = container
                    .trace_service()
                    .get_span(&trace_view, &trace_id, &span_id, &cancel)
                    .await;
                print_outcome(result)
            }
            QueryCommands::RelatedLogs {
                log_view,
                trace_id,
                span_id,
                page,
            } => {
                let page = page.into_params()?;
                let result = container
                    .trace_service()
                    .get_span_related_logs(&log_view, &trace_id, &span_id, &page, &cancel)
                    .await;
                print_outcome(result)
            }
            QueryCommands::View {
                view_id,
                query,
                all,
                page_size,
            } => {
                let query: ViewQuery = read_json(&query)?;
                let service = container.data_view_service();
                if all {
                    print_outcome(service.export_view_data(&view_id, query, page_size, &cancel).await)
                } else {
                    print_outcome(service.query_view_data(&view_id, query, &cancel).await)
                }
            }
            QueryCommands::Metric { model_id, query } => {
                let request: MetricModelQuery = read_json(&query)?;
                let result = container
                    .metric_model_service()
                    .query_metric_model(&model_id, &request, &cancel)
                    .await;
                print_outcome(result)
            }
            QueryCommands::DeletePits { pit_ids } => {
                let request = DeletePitsRequest { pit_ids };
                let result = container.data_view_service().delete_pits(&request).await;
                print_outcome(result)
            }
        }
    }
}

fn read_json<T: serde::de::DeserializeOwned>(path: &Path) -> Result<T> {
    let raw = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read {}", path.display()))?;
    serde_json::from_str(&raw).with_context(|| format!("Invalid query in {}", path.display()))
}

/// Successful results and engine errors both go to stdout as JSON; an engine
/// error still fails the process.
fn print_outcome<T: Serialize>(result: Result<T, QuerierError>) -> Result<()> {
    match result {
        Ok(value) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&value).context("Failed to serialize result")?
            );
            Ok(())
        }
        Err(err) => {
            println!(
                "{}",
                serde_json::to_string_pretty(&err.to_response())
                    .context("Failed to serialize error")?
            );
            anyhow::bail!("{} ({})", err.code(), err.status())
        }
    }
}

#[tokio::main]
async fn main() -> ExitCode {
    match Cli::parse().execute().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            log::error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
