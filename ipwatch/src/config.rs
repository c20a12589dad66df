use crate::error;
use serde::Deserialize;
use std::path::Path;

#[derive(Debug, Deserialize, PartialEq, Eq)]
pub struct WatchConfig {
    #[serde(default = "enabled")]
    pub address: bool,
    #[serde(default = "enabled")]
    pub route: bool,
    #[serde(default)]
    pub limit: Option<usize>,
}

fn enabled() -> bool {
    true
}

impl WatchConfig {
    /// Reads `path`, or the bundled config.toml when there is none.
    pub fn load(path: Option<&Path>) -> error::Result<Self> {
        match path {
            Some(path) => Self::parse(&std::fs::read_to_string(path)?),
            None => Self::parse(include_str!("../config.toml")),
        }
    }

    pub fn parse(cfg: &str) -> error::Result<Self> {
        let loaded = toml::from_str::<WatchConfig>(cfg)?;
        Ok(loaded)
    }

    /// Flags given on the command line win over the file.
    pub fn kinds(&self, address: bool, route: bool) -> (bool, bool) {
        if address || route {
            (address, route)
        } else {
            (self.address, self.route)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bundled_config() {
        let cfg = WatchConfig::load(None).unwrap();
        assert!(cfg.address);
        assert!(cfg.route);
        assert_eq!(cfg.limit, None);
    }

    #[test]
    fn partial_config() {
        let cfg = WatchConfig::parse("route = false\nlimit = 3\n").unwrap();
        assert_eq!(
            cfg,
            WatchConfig {
                address: true,
                route: false,
                limit: Some(3),
            }
        );
    }

    #[test]
    fn bad_config() {
        assert!(matches!(
            WatchConfig::parse("address = \"yes\""),
            Err(error::Error::Config(_))
        ));
        assert!(matches!(
            WatchConfig::load(Some(Path::new("/nonexistent/ipwatch.toml"))),
            Err(error::Error::Io(_))
        ));
    }

    #[test]
    fn flags_override_file() {
        let cfg = WatchConfig::parse("address = true\nroute = false").unwrap();
        assert_eq!(cfg.kinds(false, false), (true, false));
        assert_eq!(cfg.kinds(false, true), (false, true));
    }
}
