pub mod constants;
pub mod url_utils;

pub use constants::*;
pub use url_utils::{format_url, is_valid_url, join_app_url, url_pathname};
