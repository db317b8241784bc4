use std::fmt;

use serde::Serialize;

use crate::errors::RelayError;

const MIN_DIGITS: usize = 8;
const MAX_DIGITS: usize = 15;

/// A relay recipient: an international number reduced to its digits.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct Destination(String);

impl Destination {
    /// Strip every non-digit and require 8 to 15 digits.
    ///
    /// `"+593 98-765-4321"` normalizes to `"593987654321"`.
    pub fn parse(raw: &str) -> Result<Self, RelayError> {
        let digits: String = raw.chars().filter(char::is_ascii_digit).collect();
        if (MIN_DIGITS..=MAX_DIGITS).contains(&digits.len()) {
            Ok(Self(digits))
        } else {
            Err(RelayError::InvalidDestination(raw.to_string()))
        }
    }

    /// Address form the pairing client expects for one-to-one chats.
    pub fn chat_address(&self) -> String {
        format!("{}@c.us", self.0)
    }
}

impl fmt::Display for Destination {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
