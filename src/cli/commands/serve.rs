//! Serve command - run the hub.

use crate::config::Settings;

/// Command-line overrides for the serve command.
pub struct ServeArgs {
    pub bind: Option<String>,
    pub max_connections: Option<usize>,
    pub debounce_ms: Option<u64>,
}

impl ServeArgs {
    pub fn apply(self, mut config: Settings) -> Settings {
        if let Some(bind) = self.bind {
            config.server.bind = bind;
        }
        if let Some(max) = self.max_connections {
            config.server.max_connections = max;
        }
        if let Some(ms) = self.debounce_ms {
            config.watch.debounce_ms = ms;
        }
        config
    }
}

#[cfg(feature = "http-server")]
pub async fn run(args: ServeArgs, config: Settings) -> anyhow::Result<()> {
    crate::server::serve(args.apply(config)).await
}

#[cfg(not(feature = "http-server"))]
pub async fn run(_args: ServeArgs, _config: Settings) -> anyhow::Result<()> {
    anyhow::bail!("HTTP server support is not compiled in; rebuild with --features http-server")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overrides_apply_on_top_of_config() {
        let args = ServeArgs {
            bind: Some("0.0.0.0:9000".to_string()),
            max_connections: None,
            debounce_ms: Some(250),
        };
        let config = args.apply(Settings::default());
        assert_eq!(config.server.bind, "0.0.0.0:9000");
        assert_eq!(config.server.max_connections, Settings::default().server.max_connections);
        assert_eq!(config.watch.debounce_ms, 250);
    }
}
