use cloudsweep_core::{Check, RegionalCheck};

pub mod sns;

pub use sns::TopicEncrypted;

/// Every AWS check this crate provides.
pub fn checks() -> Vec<Box<dyn Check>> {
    vec![Box::new(RegionalCheck::new(TopicEncrypted))]
}
