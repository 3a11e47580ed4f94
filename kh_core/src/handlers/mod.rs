pub mod routes;
pub mod status;
