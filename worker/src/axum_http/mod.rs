pub mod http_serve;
pub mod routers;
