pub mod catalog;
pub mod trainer;

pub use catalog::{CatalogBatch, CatalogConfig, CatalogError, CatalogProvider, HttpCatalog};
pub use trainer::{HttpTrainingSink, TrainerError, TrainingSink};
