/// Decides whether a class absent from both the module and the allowlist may still be referenced.
///
/// Array types are always acceptable; other trusted namespaces are supplied by the caller.
#[derive(Clone, Debug, Default)]
pub(crate) struct TrustPolicy {
    prefixes: Vec<String>,
}

impl TrustPolicy {
    pub(crate) fn new<I, S>(prefixes: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            prefixes: prefixes
                .into_iter()
                .map(|prefix| prefix.into().replace('.', "/"))
                .filter(|prefix| !prefix.is_empty())
                .collect(),
        }
    }

    pub(crate) fn is_trusted(&self, class: &str) -> bool {
        is_array(class) || self.prefixes.iter().any(|prefix| class.starts_with(prefix.as_str()))
    }
}

pub(crate) fn is_array(class: &str) -> bool {
    class.starts_with('[')
}
