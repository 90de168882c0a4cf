mod cli;

use actix_web::{web, App, HttpServer};
use clap::Parser;
use cli::{Cli, CliCommand};
use microsearch::{server::AppState, store, SearchService};
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt};

#[actix_web::main]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::registry()
        .with(tracing_subscriber::EnvFilter::new(
            std::env::var("RUST_LOG").unwrap_or_else(|_| "info".into()),
        ))
        .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
        .init();

    let args = Cli::parse();
    let config = args.resolve_config()?;

    match &args.command {
        CliCommand::Serve { .. } => {
            let service = SearchService::new();
            // The server still starts and reports 503 until POST /admin/rebuild succeeds
            if let Err(error) = service.rebuild(&config.build_spec()) {
                if error.is_recoverable() {
                    tracing::warn!(error = %error, "startup build skipped");
                } else {
                    tracing::warn!(error = %error, "starting without an active similarity index");
                }
            }

            let addr = config.bind_address();
            let state = web::Data::new(AppState::with_service(service, config));
            tracing::info!("microsearch listening on http://{}", addr);

            HttpServer::new(move || App::new().app_data(state.clone()).configure(microsearch::server::config))
                .bind(&addr)?
                .run()
                .await?;
        }

        CliCommand::Query { id, n } => {
            let service = SearchService::new();
            service.rebuild(&config.build_spec())?;
            cli::print_query(&service, *id, n.unwrap_or(config.default_results));
        }

        CliCommand::Repl => {
            let service = SearchService::new();
            service.rebuild(&config.build_spec())?;
            cli::run_repl(&service, &config);
        }

        CliCommand::Info => {
            let summary = store::describe(config.feature_path(), config.layout)?;
            println!("{}", serde_json::to_string_pretty(&summary)?);
        }

        CliCommand::Pack { input, output } => {
            let count = cli::pack(input, output, config.layout)?;
            println!("Packed {} items into '{}'", count, output.display());
        }
    }

    Ok(())
}
