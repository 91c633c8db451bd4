pub mod model_registry;
pub mod scheduler;
