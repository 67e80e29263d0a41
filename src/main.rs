//! logsight - industrial log ingestion and query backend
//!
//! Binary entry point: resolve configuration from the environment, start
//! the server, and map startup failures to exit codes (1 for init
//! failures, 2 for a port bind failure).

use std::process::ExitCode;

use logsight_server::{init_tracing, serve, ServerConfig, StartError};

fn main() -> ExitCode {
    init_tracing();
    let config = ServerConfig::from_env();

    let runtime = match tokio::runtime::Runtime::new() {
        Ok(runtime) => runtime,
        Err(err) => {
            tracing::error!(error = %err, "Failed to start runtime");
            return ExitCode::from(1);
        }
    };

    match runtime.block_on(serve(config)) {
        Ok(()) => ExitCode::SUCCESS,
        Err(StartError::Bind { addr, source }) => {
            tracing::error!(addr = %addr, error = %source, "Port bind failure");
            ExitCode::from(2)
        }
        Err(err) => {
            tracing::error!(error = %err, "Fatal init error");
            ExitCode::from(1)
        }
    }
}
