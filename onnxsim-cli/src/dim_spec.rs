/// Size for a symbolic dimension, used when generating inputs to check a
/// simplified model.
#[derive(Clone, Debug, PartialEq)]
pub struct DimSize {
    pub dim_name: String,
    pub size: usize,
}

impl DimSize {
    /// Parse a specifier in the form `dim_name=size`.
    ///
    /// The name may be quoted if it contains an `=`.
    pub fn parse(spec: &str) -> Result<DimSize, ParseError> {
        let tokens = tokenize(spec, &['=']);
        let [Token::Text(dim_name), Token::Sep('='), Token::Text(size)] = tokens.as_slice() else {
            return Err(ParseError::new(
                spec,
                ParseErrorKind::InvalidFormat {
                    message: "expected <name>=<size>".into(),
                },
            ));
        };
        let size = parse_size(spec, size)?;
        Ok(DimSize {
            dim_name: dim_name.clone(),
            size,
        })
    }
}

/// Replacement shape for a model input.
#[derive(Clone, Debug, PartialEq)]
pub struct InputShape {
    pub input_name: String,
    pub shape: Vec<usize>,
}

impl InputShape {
    /// Parse a specifier in the form `input_name:d1,d2,...`.
    ///
    /// An empty dimension list specifies a scalar. The name may be quoted if
    /// it contains a `:` or `,`.
    pub fn parse(spec: &str) -> Result<InputShape, ParseError> {
        let tokens = tokenize(spec, &[':', ',']);
        let (input_name, dims) = match tokens.as_slice() {
            [Token::Text(name), Token::Sep(':'), dims @ ..] => (name, dims),
            _ => {
                return Err(ParseError::new(
                    spec,
                    ParseErrorKind::InvalidFormat {
                        message: "expected <name>:<dim>,<dim>,...".into(),
                    },
                ))
            }
        };

        let mut shape = Vec::new();
        let mut expect_dim = true;
        for token in dims {
            match (token, expect_dim) {
                (Token::Text(size), true) => shape.push(parse_size(spec, size)?),
                (Token::Sep(','), false) => {}
                _ => return Err(ParseError::new(spec, ParseErrorKind::InvalidSize)),
            }
            expect_dim = !expect_dim;
        }
        if expect_dim && !shape.is_empty() {
            // Trailing comma.
            return Err(ParseError::new(spec, ParseErrorKind::InvalidSize));
        }

        Ok(InputShape {
            input_name: input_name.clone(),
            shape,
        })
    }
}

fn parse_size(spec: &str, size: &str) -> Result<usize, ParseError> {
    size.trim()
        .parse()
        .map_err(|_| ParseError::new(spec, ParseErrorKind::InvalidSize))
}

#[derive(Debug, PartialEq)]
enum Token {
    Sep(char),
    Text(String),
}

/// Split `spec` into text and separator tokens. Separators inside double
/// quotes are treated as text.
fn tokenize(spec: &str, separators: &[char]) -> Vec<Token> {
    let mut tokens = Vec::new();
    let mut in_quote = false;

    for ch in spec.chars() {
        match ch {
            '"' => in_quote = !in_quote,
            ch if !in_quote && separators.contains(&ch) => tokens.push(Token::Sep(ch)),
            ch => match tokens.last_mut() {
                Some(Token::Text(text)) => text.push(ch),
                _ => tokens.push(Token::Text(ch.into())),
            },
        }
    }

    tokens
}

#[derive(Clone, Debug, PartialEq)]
enum ParseErrorKind {
    InvalidFormat { message: String },
    InvalidSize,
}

#[derive(Clone, Debug, PartialEq)]
pub struct ParseError {
    spec: String,
    kind: ParseErrorKind,
}

impl ParseError {
    fn new(spec: &str, kind: ParseErrorKind) -> ParseError {
        ParseError {
            spec: spec.to_string(),
            kind,
        }
    }
}

impl std::fmt::Display for ParseError {
    fn fmt(&self, fmt: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match &self.kind {
            ParseErrorKind::InvalidFormat { message } => {
                write!(fmt, "invalid format for \"{}\": {}", self.spec, message)
            }
            ParseErrorKind::InvalidSize => write!(
                fmt,
                "invalid dimension size in \"{}\". Sizes must be non-negative integers.",
                self.spec
            ),
        }
    }
}

impl std::error::Error for ParseError {}

#[cfg(test)]
mod tests {
    use super::{DimSize, InputShape, ParseError, ParseErrorKind};

    #[test]
    fn test_parse_dim_size() {
        struct Case<'a> {
            spec: &'a str,
            expected: Result<DimSize, ParseError>,
        }

        let cases = [
            Case {
                spec: "batch=4",
                expected: Ok(DimSize {
                    dim_name: "batch".to_string(),
                    size: 4,
                }),
            },
            Case {
                spec: "\"a=b\"=2",
                expected: Ok(DimSize {
                    dim_name: "a=b".to_string(),
                    size: 2,
                }),
            },
            Case {
                spec: "batch",
                expected: Err(ParseError::new(
                    "batch",
                    ParseErrorKind::InvalidFormat {
                        message: "expected <name>=<size>".into(),
                    },
                )),
            },
            Case {
                spec: "batch=-1",
                expected: Err(ParseError::new("batch=-1", ParseErrorKind::InvalidSize)),
            },
        ];

        for case in cases {
            assert_eq!(DimSize::parse(case.spec), case.expected, "{}", case.spec);
        }
    }

    #[test]
    fn test_parse_input_shape() {
        struct Case<'a> {
            spec: &'a str,
            expected: Result<InputShape, ParseError>,
        }

        let shape = |name: &str, shape: &[usize]| {
            Ok(InputShape {
                input_name: name.to_string(),
                shape: shape.to_vec(),
            })
        };

        let cases = [
            Case {
                spec: "x:1,3,224,224",
                expected: shape("x", &[1, 3, 224, 224]),
            },
            Case {
                spec: "scalar:",
                expected: shape("scalar", &[]),
            },
            Case {
                spec: "\"input:0\":2",
                expected: shape("input:0", &[2]),
            },
            Case {
                spec: "x:1,,2",
                expected: Err(ParseError::new("x:1,,2", ParseErrorKind::InvalidSize)),
            },
            Case {
                spec: "x:1,",
                expected: Err(ParseError::new("x:1,", ParseErrorKind::InvalidSize)),
            },
            Case {
                spec: "x:n",
                expected: Err(ParseError::new("x:n", ParseErrorKind::InvalidSize)),
            },
        ];

        for case in cases {
            assert_eq!(InputShape::parse(case.spec), case.expected, "{}", case.spec);
        }
    }
}
