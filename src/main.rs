use std::sync::Arc;

use clap::Parser;

use java_sandbox::config::{CliArgs, Config};
use java_sandbox::pipeline::Pipeline;
use java_sandbox::web_server::build_server;

#[actix_web::main]
async fn main() -> std::io::Result<()> {
    env_logger::init_from_env(env_logger::Env::new().default_filter_or("info"));

    let cli = CliArgs::parse();
    let Config {
        server: server_config,
        sandbox: sandbox_config,
    } = cli.to_config().expect("Failed to load configuration");

    let pipeline = Pipeline::build(&sandbox_config).expect("Failed to build execution pipeline");
    let server = build_server(server_config, Arc::new(pipeline))?;

    let server_handle = server.handle();
    let server_task = actix_web::rt::spawn(server);

    tokio::select! {
        _ = tokio::signal::ctrl_c() => {
            log::info!("Ctrl-c received, shutting down...");
        }
        res_server = server_task => {
            log::error!("Server terminated unexpectedly: {:?}", res_server);
        }
    }

    // In-flight requests finish; their programs are still bound by the deadline
    server_handle.stop(true).await;

    log::info!("Shutdown complete");
    Ok(())
}
