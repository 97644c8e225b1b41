use serde::{Deserialize, Deserializer};
use std::fmt;
use std::future::Future;
use std::str::FromStr;

/// Upper (or lower) bound of a scan range: a literal block or the node's head.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BlockTag {
    Number(u64),
    #[default]
    Latest,
}

impl BlockTag {
    /// Literal numbers resolve to themselves; `latest` asks `head` exactly once.
    pub async fn resolve<F, Fut, E>(self, head: F) -> Result<u64, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<u64, E>>,
    {
        match self {
            BlockTag::Number(n) => Ok(n),
            BlockTag::Latest => head().await,
        }
    }
}

impl FromStr for BlockTag {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let trimmed = s.trim();
        if trimmed.eq_ignore_ascii_case("latest") {
            return Ok(BlockTag::Latest);
        }
        let parsed = match trimmed.strip_prefix("0x") {
            Some(hex) => u64::from_str_radix(hex, 16),
            None => trimmed.parse::<u64>(),
        };
        parsed
            .map(BlockTag::Number)
            .map_err(|_| format!("invalid block tag '{s}': expected a block number or 'latest'"))
    }
}

impl fmt::Display for BlockTag {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlockTag::Number(n) => write!(f, "{n}"),
            BlockTag::Latest => f.write_str("latest"),
        }
    }
}

impl From<u64> for BlockTag {
    fn from(n: u64) -> Self {
        BlockTag::Number(n)
    }
}

// TOML may carry either `to_block = 123` or `to_block = "latest"`
impl<'de> Deserialize<'de> for BlockTag {
    fn deserialize<D>(deserializer: D) -> Result<Self, D::Error>
    where
        D: Deserializer<'de>,
    {
        #[derive(Deserialize)]
        #[serde(untagged)]
        enum Repr {
            Number(u64),
            Text(String),
        }

        match Repr::deserialize(deserializer)? {
            Repr::Number(n) => Ok(BlockTag::Number(n)),
            Repr::Text(s) => s.parse().map_err(serde::de::Error::custom),
        }
    }
}
