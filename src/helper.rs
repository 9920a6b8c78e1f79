pub type AnyResult<T = ()> = anyhow::Result<T>;

pub fn wrapping_to_usize(value: u64) -> usize {
    value.try_into().unwrap_or(usize::MAX)
}

/// Escape a binary string for line-oriented output.
///
/// Bytes follow `<[u8]>::escape_ascii` rules; the delimiter byte (if any) is
/// additionally written as `\xHH` so a field never contains a raw delimiter.
pub fn escape_bytes(input: &[u8], delimiter: Option<u8>) -> String {
    let mut out = String::with_capacity(input.len());
    for &b in input {
        if Some(b) == delimiter {
            out.push_str(&format!("\\x{b:02x}"));
        } else {
            out.extend(std::ascii::escape_default(b).map(char::from));
        }
    }
    out
}

#[macro_export]
macro_rules! impl_serde_str_conversion {
    ($ty:ty) => {
        impl std::fmt::Display for $ty {
            fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                self.serialize(f)
            }
        }

        impl std::str::FromStr for $ty {
            type Err = anyhow::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let deserializer =
                    serde::de::IntoDeserializer::<'_, serde::de::value::Error>::into_deserializer(
                        s,
                    );
                let value = <$ty>::deserialize(deserializer)?;
                Ok(value)
            }
        }
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_escape_bytes() {
        assert_eq!(escape_bytes(b"plain", None), "plain");
        assert_eq!(escape_bytes(b"a\tb", None), "a\\tb");
        assert_eq!(escape_bytes(b"\x00\xff", None), "\\x00\\xff");
        assert_eq!(escape_bytes(b"a,b", Some(b',')), "a\\x2cb");
        assert_eq!(escape_bytes(b"back\\slash", None), "back\\\\slash");
    }

    #[test]
    fn test_wrapping_to_usize() {
        assert_eq!(wrapping_to_usize(42), 42);
    }
}
