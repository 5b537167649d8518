use std::{fmt::Display, str::FromStr};

use anyhow::{Error, bail};
use serde::{Deserialize, Serialize};

/// Coaching services a plan can belong to. A user holds at most one live
/// subscription per category.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, PartialOrd, Ord)]
#[serde(rename_all = "snake_case")]
pub enum ServiceCategory {
    Fitness,
    Psychology,
    Manifestation,
}

impl ServiceCategory {
    pub const ALL: [ServiceCategory; 3] = [
        ServiceCategory::Fitness,
        ServiceCategory::Psychology,
        ServiceCategory::Manifestation,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            ServiceCategory::Fitness => "fitness",
            ServiceCategory::Psychology => "psychology",
            ServiceCategory::Manifestation => "manifestation",
        }
    }
}

impl Display for ServiceCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for ServiceCategory {
    type Err = Error;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "fitness" => Ok(ServiceCategory::Fitness),
            "psychology" => Ok(ServiceCategory::Psychology),
            "manifestation" => Ok(ServiceCategory::Manifestation),
            other => bail!("unknown service category: {other}"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_case_insensitively() {
        assert_eq!(
            "FITNESS".parse::<ServiceCategory>().unwrap(),
            ServiceCategory::Fitness
        );
        assert_eq!(
            " psychology ".parse::<ServiceCategory>().unwrap(),
            ServiceCategory::Psychology
        );
    }

    #[test]
    fn rejects_unknown_category() {
        assert!("yoga".parse::<ServiceCategory>().is_err());
    }
}
