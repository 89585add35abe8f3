use std::path::PathBuf;
use std::time::Duration;

use clap::Parser;
use txt2img_client::ProxyClientConfig;
use txt2img_protocol::{DEFAULT_STEPS, Representation};

#[derive(Parser, Debug, Clone)]
#[command(name = "ai-requestor", about = "Hire a txt2img runtime and generate images from prompts")]
pub struct Args {
    /// Subnet whose offers are considered.
    #[arg(long, env = "REQUESTOR_SUBNET_TAG", default_value = "public")]
    pub subnet_tag: String,

    /// Payment driver for settlement. The simulated marketplace settles nothing, so this is
    /// only recorded in the session log.
    #[arg(long, env = "REQUESTOR_PAYMENT_DRIVER", default_value = "erc20")]
    pub payment_driver: String,

    /// Payment network for settlement. Recorded in the session log only.
    #[arg(long, env = "REQUESTOR_PAYMENT_NETWORK", default_value = "holesky")]
    pub payment_network: String,

    /// Only hire these provider ids. Repeat for several; when set, history is ignored.
    #[arg(long = "select-node", env = "REQUESTOR_SELECT_NODE", value_delimiter = ',')]
    pub select_node: Vec<String>,

    /// Runtime started on the provider.
    #[arg(long, env = "REQUESTOR_RUNTIME", default_value = compute_market::instance::DEFAULT_RUNTIME)]
    pub runtime: String,

    /// Write logs to this file instead of stderr.
    #[arg(long, env = "REQUESTOR_LOG_FILE")]
    pub log_file: Option<PathBuf>,

    /// Where the first generated image is saved.
    #[arg(long, env = "REQUESTOR_OUTPUT", default_value = "output.png")]
    pub output: PathBuf,

    #[arg(long, env = "REQUESTOR_INSTANCES", default_value_t = 1)]
    pub instances: usize,

    /// Spending cap. Recorded in the session log only; the simulated marketplace charges
    /// nothing.
    #[arg(long, env = "REQUESTOR_BUDGET", default_value_t = 50.0)]
    pub budget: f64,

    /// Seconds between instance polls in the prompt loop.
    #[arg(long, env = "REQUESTOR_POLL_INTERVAL_SECS", default_value_t = 3)]
    pub poll_interval_secs: u64,

    #[arg(long, env = "REQUESTOR_STEPS", default_value_t = DEFAULT_STEPS)]
    pub steps: u32,

    /// Ask for the chunked `application/octet-stream` reply instead of one JSON body.
    #[arg(long, env = "REQUESTOR_STREAM")]
    pub stream: bool,

    /// Limit on one generation call, streamed body included. Unset waits for as long as the
    /// generation takes.
    #[arg(long, env = "REQUESTOR_REQUEST_TIMEOUT_SECS")]
    pub request_timeout_secs: Option<u64>,

    /// Number of providers published by the local simulated marketplace.
    #[arg(long, env = "REQUESTOR_PROVIDERS", default_value_t = 3)]
    pub providers: usize,
}

impl Args {
    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.poll_interval_secs.max(1))
    }

    pub fn proxy_client_config(&self) -> ProxyClientConfig {
        ProxyClientConfig {
            timeout_ms: self
                .request_timeout_secs
                .map(|secs| secs.saturating_mul(1_000)),
        }
    }

    pub fn representation(&self) -> Representation {
        if self.stream {
            Representation::Stream
        } else {
            Representation::Json
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_interactive_session() {
        let args = Args::try_parse_from(["ai-requestor"]).expect("args");
        assert_eq!(args.subnet_tag, "public");
        assert_eq!(args.runtime, "dummy");
        assert_eq!(args.output, PathBuf::from("output.png"));
        assert_eq!(args.instances, 1);
        assert_eq!(args.steps, 250);
        assert!(args.select_node.is_empty());
        assert_eq!(args.poll_interval(), Duration::from_secs(3));
        assert_eq!(args.representation(), Representation::Json);
        assert_eq!(args.proxy_client_config().timeout_ms, None);
        assert_eq!(args.payment_driver, "erc20");
        assert_eq!(args.payment_network, "holesky");
        assert!((args.budget - 50.0).abs() < f64::EPSILON);
    }

    #[test]
    fn request_timeout_is_passed_to_the_client_in_millis() {
        let args = Args::try_parse_from(["ai-requestor", "--request-timeout-secs", "600"])
            .expect("args");
        assert_eq!(args.proxy_client_config().timeout_ms, Some(600_000));
    }

    #[test]
    fn select_node_is_repeatable() {
        let args = Args::try_parse_from([
            "ai-requestor",
            "--select-node",
            "0xaaa",
            "--select-node",
            "0xbbb,0xccc",
            "--stream",
        ])
        .expect("args");
        assert_eq!(args.select_node, vec!["0xaaa", "0xbbb", "0xccc"]);
        assert_eq!(args.representation(), Representation::Stream);
    }
}
