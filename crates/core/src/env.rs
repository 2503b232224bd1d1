// Environment variable resolution for spawned commands

use std::collections::HashMap;
use std::ffi::{OsStr, OsString};

/// Name -> value mapping for declared and resolved entries.
pub type EnvMap = HashMap<String, String>;

/// Process environment as the OS reports it, including non-UTF-8 entries.
pub type AmbientEnv = HashMap<OsString, OsString>;

const REFERENCE_PREFIX: &str = "${ENV:";
const REFERENCE_SUFFIX: &str = "}";

/// Snapshot of the current process environment.
pub fn ambient_environment() -> AmbientEnv {
    std::env::vars_os().collect()
}

/// Resolve declared environment entries against an ambient environment.
///
/// A value of the form `${ENV:NAME}` takes the ambient value of `NAME`, or the
/// empty string when `NAME` is unset. Any other value is passed through. The
/// ambient mapping is only read. A referenced value that is not valid UTF-8 is
/// converted lossily.
pub fn resolve<'a, I>(declared: I, ambient: &AmbientEnv) -> EnvMap
where
    I: IntoIterator<Item = (&'a String, &'a String)>,
{
    declared
        .into_iter()
        .map(|(key, value)| {
            let resolved = match env_reference(value) {
                Some(name) => ambient
                    .get(OsStr::new(name))
                    .map(|value| value.to_string_lossy().into_owned())
                    .unwrap_or_default(),
                None => value.clone(),
            };
            (key.clone(), resolved)
        })
        .collect()
}

/// Overlay resolved entries on top of the ambient environment.
///
/// Resolved values win on key collisions. Ambient entries are kept byte for
/// byte.
pub fn merge(ambient: &AmbientEnv, resolved: &EnvMap) -> AmbientEnv {
    let mut merged = ambient.clone();
    merged.extend(
        resolved
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v))),
    );
    merged
}

/// Variable name referenced by `${ENV:NAME}`, if the value is a reference.
fn env_reference(value: &str) -> Option<&str> {
    value
        .strip_prefix(REFERENCE_PREFIX)?
        .strip_suffix(REFERENCE_SUFFIX)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn map(entries: &[(&str, &str)]) -> EnvMap {
        entries
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn ambient(entries: &[(&str, &str)]) -> AmbientEnv {
        entries
            .iter()
            .map(|(k, v)| (OsString::from(k), OsString::from(v)))
            .collect()
    }

    #[test]
    fn test_resolves_reference_from_ambient() {
        let ambient = ambient(&[("TEST_VAR", "test_value")]);
        let declared = map(&[("MY_VAR", "${ENV:TEST_VAR}")]);

        let resolved = resolve(&declared, &ambient);
        assert_eq!(resolved["MY_VAR"], "test_value");
    }

    #[test]
    fn test_unset_reference_resolves_empty() {
        let declared = map(&[("MY_VAR", "${ENV:DOES_NOT_EXIST}")]);

        let resolved = resolve(&declared, &AmbientEnv::new());
        assert_eq!(resolved["MY_VAR"], "");
    }

    #[test]
    fn test_literal_values_pass_through() {
        let declared = map(&[("PLAIN", "value"), ("PARTIAL", "${ENV:X"), ("EMBEDDED", "a${ENV:X}")]);
        let ambient = ambient(&[("X", "ignored")]);

        let resolved = resolve(&declared, &ambient);
        assert_eq!(resolved["PLAIN"], "value");
        assert_eq!(resolved["PARTIAL"], "${ENV:X");
        assert_eq!(resolved["EMBEDDED"], "a${ENV:X}");
    }

    #[test]
    fn test_merge_prefers_resolved() {
        let ambient = ambient(&[("PATH", "/bin"), ("HOME", "/root")]);
        let resolved = map(&[("HOME", "/tmp")]);

        let merged = merge(&ambient, &resolved);
        assert_eq!(merged[OsStr::new("PATH")], "/bin");
        assert_eq!(merged[OsStr::new("HOME")], "/tmp");
        assert_eq!(ambient[OsStr::new("HOME")], "/root");
    }

    #[cfg(unix)]
    #[test]
    fn test_non_utf8_ambient_entries_survive() {
        use std::os::unix::ffi::OsStringExt;

        let bytes = OsString::from_vec(b"a\xffb".to_vec());
        let mut ambient = AmbientEnv::new();
        ambient.insert(OsString::from("RAW_BYTES"), bytes.clone());
        let declared = map(&[("COPY", "${ENV:RAW_BYTES}")]);

        let resolved = resolve(&declared, &ambient);
        let merged = merge(&ambient, &resolved);

        assert_eq!(merged[OsStr::new("RAW_BYTES")], bytes);
        assert_eq!(resolved["COPY"], "a\u{FFFD}b");
    }
}
