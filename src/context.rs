use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DriverError;

/// The execution domain commands are dispatched against.
///
/// `Privileged` targets the local, chrome-side execution context and is
/// handled in-process. `Managed` targets the untrusted content context and
/// is proxied to the remote listener. The wire strings are the historical
/// `"chrome"` and `"content"`.
#[derive(Debug, Copy, Clone, Default, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Context {
    #[serde(rename = "chrome")]
    Privileged,
    #[default]
    #[serde(rename = "content")]
    Managed,
}

impl Context {
    pub fn as_str(&self) -> &'static str {
        match self {
            Context::Privileged => "chrome",
            Context::Managed => "content",
        }
    }
}

impl FromStr for Context {
    type Err = DriverError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "chrome" => Ok(Context::Privileged),
            "content" => Ok(Context::Managed),
            other => Err(DriverError::Protocol(format!("Invalid context: {other}"))),
        }
    }
}

impl fmt::Display for Context {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_wire_strings() {
        assert_eq!("chrome".parse::<Context>().unwrap(), Context::Privileged);
        assert_eq!("content".parse::<Context>().unwrap(), Context::Managed);
        assert!("bogus".parse::<Context>().is_err());
    }

    #[test]
    fn default_is_managed() {
        assert_eq!(Context::default(), Context::Managed);
    }
}
