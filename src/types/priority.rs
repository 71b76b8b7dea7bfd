use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

/// The symbolic priority levels a job may be given instead of a number.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum PriorityLevel {
    Lowest,
    Low,
    Normal,
    High,
    Highest,
}

impl PriorityLevel {
    pub fn value(self) -> i32 {
        use PriorityLevel::*;

        match self {
            Lowest => -20,
            Low => -10,
            Normal => 0,
            High => 10,
            Highest => 20,
        }
    }
}

impl FromStr for PriorityLevel {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        use PriorityLevel::*;

        Ok(match s {
            "lowest" => Lowest,
            "low" => Low,
            "normal" => Normal,
            "high" => High,
            "highest" => Highest,
            _ => return Err(()),
        })
    }
}

/// A priority as supplied by a caller: either a number, or a name that may
/// or may not be one of the [`PriorityLevel`]s.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PriorityInput {
    Value(i32),
    Name(String),
}

impl From<i32> for PriorityInput {
    fn from(value: i32) -> Self {
        Self::Value(value)
    }
}

impl From<&str> for PriorityInput {
    fn from(value: &str) -> Self {
        Self::Name(value.to_owned())
    }
}

impl From<String> for PriorityInput {
    fn from(value: String) -> Self {
        Self::Name(value)
    }
}

impl From<PriorityLevel> for PriorityInput {
    fn from(value: PriorityLevel) -> Self {
        Self::Value(value.value())
    }
}

impl fmt::Display for PriorityInput {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            Self::Value(v) => write!(f, "{v}"),
            Self::Name(name) => f.write_str(name),
        }
    }
}

/// Turns a caller-supplied priority into the number jobs are ordered by.
/// Numbers pass through unchanged; unrecognised names resolve to `None`.
pub fn resolve(priority: &PriorityInput) -> Option<i32> {
    match priority {
        PriorityInput::Value(v) => Some(*v),
        PriorityInput::Name(name) => {
            name.parse::<PriorityLevel>().ok().map(PriorityLevel::value)
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_resolve() {
        #[track_caller]
        fn check(input: impl Into<PriorityInput>, expected: Option<i32>) {
            assert_eq!(resolve(&input.into()), expected);
        }

        check("lowest", Some(-20));
        check("low", Some(-10));
        check("normal", Some(0));
        check("high", Some(10));
        check("highest", Some(20));

        for n in [i32::MIN, -20, -1, 0, 1, 7, 10, 1024, i32::MAX] {
            check(n, Some(n));
        }

        check("urgent", None);
        check("", None);
        check("HIGH", None);
        check(PriorityLevel::High, Some(10));
    }

    #[test]
    fn test_deserialise_either_form() {
        let parsed: Vec<PriorityInput> =
            serde_json::from_str(r#"[5, "high", "nope"]"#).unwrap();
        assert_eq!(
            parsed,
            vec![
                PriorityInput::Value(5),
                PriorityInput::Name("high".into()),
                PriorityInput::Name("nope".into()),
            ]
        );
    }
}
