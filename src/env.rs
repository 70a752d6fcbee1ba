use tracing::warn;

/// Read a non-negative integer setting from an environment variable.
///
/// Returns `None` if the variable is unset or invalid. Invalid values are
/// logged.
pub fn env_usize(name: &str) -> Option<usize> {
    let val = std::env::var(name).ok()?;
    parse_usize(name, &val)
}

fn parse_usize(name: &str, val: &str) -> Option<usize> {
    match val.trim().parse() {
        Ok(n) => Some(n),
        Err(_) => {
            warn!("Ignoring invalid value \"{}\" for {}", val, name);
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::parse_usize;

    #[test]
    fn test_parse_usize() {
        struct Case<'a> {
            val: &'a str,
            expected: Option<usize>,
        }

        let cases = [
            Case {
                val: "16",
                expected: Some(16),
            },
            Case {
                val: " 8\n",
                expected: Some(8),
            },
            Case {
                val: "-1",
                expected: None,
            },
            Case {
                val: "many",
                expected: None,
            },
        ];

        for case in cases {
            assert_eq!(
                parse_usize("ONNXSIM_MAX_ITERATIONS", case.val),
                case.expected,
                "{}",
                case.val
            );
        }
    }
}
