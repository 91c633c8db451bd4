pub mod forecast;
pub mod observation;
