//! Scoped event names: `"scope:event"`, recursively `"s1:s2:event"`.

/// Where a possibly-qualified event name should be registered.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ScopedName<'a> {
    /// The backbone's own bus.
    Local(&'a str),
    /// The event source bound under `scope`, with the remaining name.
    Delegate { scope: &'a str, rest: &'a str },
}

impl<'a> ScopedName<'a> {
    /// Split at the first `:`. An empty scope (`":event"`) is local.
    pub fn parse(name: &'a str) -> Self {
        match name.split_once(':') {
            None => ScopedName::Local(name),
            Some(("", rest)) => ScopedName::Local(rest),
            Some((scope, rest)) => ScopedName::Delegate { scope, rest },
        }
    }
}
