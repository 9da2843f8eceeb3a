use std::fmt;
use std::sync::Arc;

/// Names one logical downstream dependency; the unit of isolation.
/// Every key owns exactly one executor, breaker and stats window.
/// Cloning is cheap, the underlying name is shared.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct CommandKey(Arc<str>);

impl CommandKey {
    pub fn new(name: impl AsRef<str>) -> Self {
        CommandKey(Arc::from(name.as_ref()))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for CommandKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for CommandKey {
    fn from(name: &str) -> Self {
        CommandKey::new(name)
    }
}

impl From<String> for CommandKey {
    fn from(name: String) -> Self {
        CommandKey(Arc::from(name))
    }
}
