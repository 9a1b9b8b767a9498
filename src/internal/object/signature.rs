//! The Signature records who made a commit and when, with second precision.
//! The encoded form is `<name> <<email>> <epoch-seconds>`.

use bstr::ByteSlice;

use crate::{errors::ConfError, model::Author};

/// Commit authorship: name, email, and seconds since the epoch.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Signature {
    pub name: String,
    pub email: String,
    pub timestamp: i64,
}

impl Signature {
    pub fn new(author: &Author, timestamp: i64) -> Signature {
        Signature {
            name: author.name.clone(),
            email: author.email.clone(),
            timestamp,
        }
    }

    pub fn author(&self) -> Author {
        Author::new(self.name.clone(), self.email.clone())
    }

    /// Encode as `<name> <<email>> <timestamp>`.
    pub fn to_data(&self) -> Vec<u8> {
        format!("{} <{}> {}", self.name, self.email, self.timestamp).into_bytes()
    }

    /// Decode a signature line. The email is delimited by the last `<`/`>`
    /// pair, so names containing spaces survive.
    pub fn from_data(data: &[u8]) -> Result<Signature, ConfError> {
        let bad = || {
            ConfError::storage(format!(
                "`{}` is not a valid signature",
                String::from_utf8_lossy(data)
            ))
        };
        let open = data.rfind_byte(b'<').ok_or_else(bad)?;
        let close = data.rfind_byte(b'>').ok_or_else(bad)?;
        if close < open || open == 0 {
            return Err(bad());
        }
        let name = data[..open - 1].to_str().map_err(|_| bad())?.trim();
        let email = data[open + 1..close].to_str().map_err(|_| bad())?;
        let timestamp = data[close + 1..]
            .to_str()
            .map_err(|_| bad())?
            .trim()
            .parse::<i64>()
            .map_err(|_| bad())?;
        Ok(Signature {
            name: name.to_owned(),
            email: email.to_owned(),
            timestamp,
        })
    }
}
