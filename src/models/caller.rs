//! The already-authenticated principal a request is made on behalf of.

use serde::{Deserialize, Serialize};
use std::{fmt, str::FromStr};

/// What kind of principal is calling.
#[derive(Serialize, Deserialize, Clone, Copy, Debug, PartialEq, Eq)]
#[serde(rename_all = "UPPERCASE")]
pub enum CallingType {
    User,
    Device,
    Service,
}

impl FromStr for CallingType {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "USER" => Ok(Self::User),
            "DEVICE" => Ok(Self::Device),
            "SERVICE" => Ok(Self::Service),
            other => Err(format!("unknown calling type `{}`", other)),
        }
    }
}

impl fmt::Display for CallingType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::User => "USER",
            Self::Device => "DEVICE",
            Self::Service => "SERVICE",
        };
        f.write_str(s)
    }
}

/// Identity supplied by the authenticating gateway.
///
/// `owner` is the account that pays quota and owns records; `subject` is
/// the concrete user, device or service acting for it.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Caller {
    pub owner: String,
    pub subject: String,
    pub calling_type: CallingType,
}

impl Caller {
    pub fn new(
        owner: impl Into<String>,
        subject: impl Into<String>,
        calling_type: CallingType,
    ) -> Self {
        Self {
            owner: owner.into(),
            subject: subject.into(),
            calling_type,
        }
    }
}
