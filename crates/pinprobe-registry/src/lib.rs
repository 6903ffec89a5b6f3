mod pypi;
mod range;
mod resolver;
mod static_index;

pub use pypi::{PypiIndex, DEFAULT_INDEX_URL};
pub use range::select_range;
pub use resolver::VersionResolver;
pub use static_index::{StaticIndex, StaticPackage};
