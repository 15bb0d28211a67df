use std::process::ExitCode;

mod adapter;
mod app;
mod config;
mod discovery;
mod dispatcher;
mod overlay;
mod page;
mod registry;
mod scenario;
mod selector;
mod storage;
mod timer;
mod utils;
mod volume;

#[tokio::main(flavor = "current_thread")]
async fn main() -> ExitCode {
    let result = app::start().await;
    match result {
        Ok(..) => ExitCode::SUCCESS,
        Err(err) => {
            log::error!("{err:?}");
            ExitCode::FAILURE
        }
    }
}
