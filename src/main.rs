use std::process::ExitCode;

use oee_collector::error::StartupError;

#[tokio::main]
async fn main() -> ExitCode {
    match oee_collector::run().await {
        Ok(()) | Err(StartupError::Aborted) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err}");
            eprintln!("oee-collector: {err}");
            if err.requires_operator() {
                ExitCode::from(2)
            } else {
                ExitCode::FAILURE
            }
        }
    }
}
