pub mod models;
pub mod plan;
pub mod routes;
pub mod schedule;
