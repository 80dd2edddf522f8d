use std::path::PathBuf;

use anyhow::{Context, Result};

use tickwire::{LinkConditions, NetConfig};

use crate::Args;

/// Everything the host needs, merged from the optional config file and the command line.
#[derive(Debug, Clone)]
pub struct ServerSettings {
    pub bind_addr: String,
    pub net: NetConfig,
    pub link: LinkConditions,
    pub demo_dir: Option<PathBuf>,
    pub net_enabled: bool,
}

impl ServerSettings {
    pub fn from_args(args: &Args) -> Result<Self> {
        let mut net = match &args.config {
            Some(path) => NetConfig::load(path)
                .with_context(|| format!("loading {}", path.display()))?,
            None => NetConfig::default(),
        };

        if let Some(tick_rate) = args.tick_rate {
            net.tick_rate = tick_rate;
        }
        if let Some(max_clients) = args.max_clients {
            net.max_clients = max_clients;
        }
        if let Some(name) = &args.name {
            net.server_name = name.clone();
        }
        net.validate()?;

        let link = LinkConditions {
            enabled: args.simulate_packet_loss,
            loss_percent: args.loss_percent.clamp(0.0, 100.0),
            min_latency_ms: args.min_latency,
            max_latency_ms: args.max_latency.max(args.min_latency),
            jitter_ms: args.jitter,
        };

        Ok(Self {
            bind_addr: format!("{}:{}", args.bind, args.port),
            net,
            link,
            demo_dir: args.demo_dir.clone(),
            net_enabled: !args.no_net,
        })
    }
}

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn command_line_overrides_defaults() {
        let args = Args::try_parse_from([
            "tickwire-server",
            "--port",
            "27000",
            "--tick-rate",
            "20",
            "--max-clients",
            "4",
            "--simulate-packet-loss",
            "--loss-percent",
            "250",
            "--min-latency",
            "30",
            "--max-latency",
            "10",
        ])
        .unwrap();

        let settings = ServerSettings::from_args(&args).unwrap();

        assert_eq!(settings.bind_addr, "0.0.0.0:27000");
        assert_eq!(settings.net.tick_rate, 20);
        assert_eq!(settings.net.max_clients, 4);
        assert!(settings.link.enabled);
        assert_eq!(settings.link.loss_percent, 100.0);
        assert_eq!(settings.link.max_latency_ms, 30);
        assert!(settings.net_enabled);
    }

    #[test]
    fn config_file_is_read_before_overrides() {
        let path = std::env::temp_dir().join(format!(
            "tickwire-server-config-{}.toml",
            std::process::id()
        ));
        std::fs::write(&path, "server_name = \"from file\"\nmax_clients = 8\n").unwrap();

        let args = Args::try_parse_from([
            "tickwire-server",
            "--config",
            path.to_str().unwrap(),
            "--max-clients",
            "2",
            "--no-net",
        ])
        .unwrap();
        let settings = ServerSettings::from_args(&args).unwrap();
        std::fs::remove_file(&path).ok();

        assert_eq!(settings.net.server_name, "from file");
        assert_eq!(settings.net.max_clients, 2);
        assert!(!settings.net_enabled);
    }

    #[test]
    fn invalid_slot_count_is_rejected() {
        let args =
            Args::try_parse_from(["tickwire-server", "--max-clients", "0"]).unwrap();
        assert!(ServerSettings::from_args(&args).is_err());
    }
}
