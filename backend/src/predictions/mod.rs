pub mod service;

pub use service::PredictionService;
