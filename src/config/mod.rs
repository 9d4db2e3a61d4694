mod builder;
mod types;

pub use builder::SnapConfigBuilder;
pub use types::{SiteConfig, SiteCronConfig, SnapConfig};
