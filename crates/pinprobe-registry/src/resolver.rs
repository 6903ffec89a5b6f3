use anyhow::Result;

pub trait VersionResolver {
    fn latest_version(&self, name: &str) -> Result<Option<String>>;

    fn versions_in_range(&self, name: &str, from: &str, to: &str) -> Result<Vec<String>>;
}

impl<T: VersionResolver + ?Sized> VersionResolver for Box<T> {
    fn latest_version(&self, name: &str) -> Result<Option<String>> {
        (**self).latest_version(name)
    }

    fn versions_in_range(&self, name: &str, from: &str, to: &str) -> Result<Vec<String>> {
        (**self).versions_in_range(name, from, to)
    }
}
