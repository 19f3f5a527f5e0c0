/// Trait for loading service configuration from environment variables.
///
/// Implementors derive `serde::Deserialize` with lowercase field names; each
/// field maps to the upper-cased env var of the same name (`lease_duration_secs`
/// reads `LEASE_DURATION_SECS`). Comma-separated values deserialize into `Vec`s.
pub trait Config: Sized + serde::de::DeserializeOwned {
    /// Load from the process environment.
    fn try_from_env() -> Result<Self, envy::Error> {
        envy::from_env()
    }

    /// Load from an explicit set of key/value pairs (used in tests).
    fn from_pairs<I>(pairs: I) -> Result<Self, envy::Error>
    where
        I: IntoIterator<Item = (String, String)>,
    {
        envy::from_iter(pairs)
    }
}
