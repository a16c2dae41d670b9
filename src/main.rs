use std::{env, process::ExitCode};

use log::{error, warn};
use orchestra_trainer::{AppError, Mode, Settings};
use tokio_util::sync::CancellationToken;

fn report(err: &AppError) -> ExitCode {
    error!(kind = err.kind(); "{err}");
    eprintln!("{}: {err}", err.kind());
    ExitCode::from(err.exit_code())
}

#[tokio::main]
async fn main() -> ExitCode {
    env_logger::init();

    let arg = env::args().nth(1);
    let app_mode = env::var("APP_MODE").ok();
    let mode = match Mode::resolve(arg.as_deref(), app_mode.as_deref()) {
        Ok(mode) => mode,
        Err(e) => return report(&e),
    };

    let settings = match Settings::from_env() {
        Ok(settings) => settings,
        Err(e) => return report(&e.into()),
    };

    let cancel = CancellationToken::new();
    let on_signal = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            warn!("interrupted, shutting down");
            on_signal.cancel();
        }
    });

    match orchestra_trainer::run(mode, &settings, cancel).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => report(&e),
    }
}
