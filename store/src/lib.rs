pub mod config;
pub mod consul;
pub mod errors;
pub mod kv;
pub mod labels;
pub mod metered;
pub mod metrics_defs;
pub mod model;
pub mod repository;
pub mod service;
pub mod traced;

#[cfg(test)]
mod testutils;

pub use errors::{EntityKind, ErrorKind, StoreError};
pub use labels::{LabelSet, LabelsError};
pub use metered::Metered;
pub use model::{Configuration, ConfigurationGroup, Parameter};
pub use repository::Repository;
pub use service::{ConfigService, CoreService};
pub use traced::Traced;
