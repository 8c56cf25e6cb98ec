use std::sync::Arc;

use actix_web::{App, HttpServer, dev::Server, middleware, web};

use crate::config::ServerConfig;
use crate::pipeline::Pipeline;
use crate::routes;

pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1";
pub const DEFAULT_BIND_PORT: u16 = 8080;

pub fn build_server(server_config: ServerConfig, pipeline: Arc<Pipeline>) -> std::io::Result<Server> {
    let pipeline = web::Data::from(pipeline);
    let address = server_config
        .bind_address
        .unwrap_or(DEFAULT_BIND_ADDRESS.to_string());
    let port = server_config.bind_port.unwrap_or(DEFAULT_BIND_PORT);

    let server = HttpServer::new(move || {
        App::new()
            .app_data(pipeline.clone())
            .wrap(middleware::Logger::default())
            .configure(routes::configure)
    })
    .bind((address.as_str(), port))?
    .run();

    log::info!("Listening on {address}:{port}");
    Ok(server)
}
