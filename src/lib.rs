pub mod analyzer;
pub mod classpath;
pub mod compiler;
pub mod config;
pub mod pipeline;
pub mod response;
pub mod routes;
pub mod sandbox;
pub mod web_server;
pub mod workspace;
