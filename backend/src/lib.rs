pub mod evaluation;
pub mod model;
pub mod pipeline;
pub mod routes;
