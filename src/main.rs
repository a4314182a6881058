use clap::Parser;

use etf_advisor::api::{self, AppState, Cli, Command};
use etf_advisor::config::Settings;

#[tokio::main]
async fn main() {
    etf_advisor::logging::init();
    let cli = Cli::parse();

    match cli.command {
        Command::Serve(args) => {
            let settings = Settings::from_args(&args.provider);
            if let Err(e) = api::run_http_server(args.port, &settings).await {
                tracing::error!(error = %e, "server error");
                std::process::exit(1);
            }
        }
        Command::Analyze(args) => {
            let request = match api::build_inputs(&args) {
                Ok(request) => request,
                Err(e) => {
                    eprintln!("{e}");
                    std::process::exit(2);
                }
            };
            let state = AppState::new(&Settings::from_args(&args.provider));
            let response = api::analyze(&state, &request).await;
            match serde_json::to_string_pretty(&response) {
                Ok(json) => println!("{json}"),
                Err(e) => {
                    tracing::error!(error = %e, "failed to serialize analysis");
                    std::process::exit(1);
                }
            }
        }
    }
}
