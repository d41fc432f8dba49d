//! Permission wildcard matching and the resource guard.

/// Whether one granted permission satisfies a required permission.
///
/// `*` matches anything; `<resource>.*` matches any action on that
/// resource; otherwise the strings must match exactly.
#[must_use]
pub fn permission_grants(granted: &str, required: &str) -> bool {
    if granted == "*" {
        return true;
    }
    if let Some(resource) = granted.strip_suffix(".*") {
        return required
            .strip_prefix(resource)
            .is_some_and(|rest| rest.starts_with('.'));
    }
    granted == required
}

/// Whether any granted permission satisfies the required one.
#[must_use]
pub fn any_grants(granted: &[String], required: &str) -> bool {
    granted.iter().any(|g| permission_grants(g, required))
}

/// Whether a request reads or mutates.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Idempotent access.
    Read,
    /// Mutating access.
    Write,
}

impl AccessMode {
    /// Classify an HTTP-style verb: idempotent verbs read, the rest
    /// write.
    #[must_use]
    pub fn from_verb(verb: &str) -> Self {
        match verb.to_ascii_uppercase().as_str() {
            "GET" | "HEAD" | "OPTIONS" => Self::Read,
            _ => Self::Write,
        }
    }

    /// The permission action suffix for this mode.
    #[must_use]
    pub fn action(self) -> &'static str {
        match self {
            Self::Read => "read",
            Self::Write => "write",
        }
    }
}

/// Guards access to one resource family.
///
/// The guard passes when the caller holds `*`, `<resource>.*`, or the
/// exact `<resource>.<read|write>` permission for the access mode.
#[derive(Debug, Clone)]
pub struct ResourceGuard {
    resource: String,
}

impl ResourceGuard {
    /// Guard for `resource` (e.g. "tickets").
    #[must_use]
    pub fn new(resource: impl Into<String>) -> Self {
        Self {
            resource: resource.into(),
        }
    }

    /// The specific permission this mode requires.
    #[must_use]
    pub fn required(&self, mode: AccessMode) -> String {
        format!("{}.{}", self.resource, mode.action())
    }

    /// Whether `granted` admits `mode` access to the resource.
    #[must_use]
    pub fn allows(&self, granted: &[String], mode: AccessMode) -> bool {
        any_grants(granted, &self.required(mode))
    }
}
