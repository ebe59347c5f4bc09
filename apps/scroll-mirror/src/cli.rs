use clap::{Args, Parser};
use std::path::PathBuf;
use std::time::Duration;

use viewport_sync::SyncConfig;
use viewport_sync::session::{SESSION_PREFIX, session_name};

use crate::simulation::SimulationConfig;
use crate::telemetry::logging::{LogConfig, LogLevel};

#[derive(Parser, Debug)]
#[command(
    name = "scroll-mirror",
    about = "Mirror one scroll position across a session of simulated replicas",
    author,
    version
)]
pub struct Cli {
    #[arg(
        long,
        short = 'n',
        env = "SCROLL_MIRROR_SESSION",
        help = "Session name; no session starts without one"
    )]
    pub name: Option<String>,

    #[arg(
        long,
        env = "SCROLL_MIRROR_REPLICAS",
        default_value_t = 3,
        value_parser = clap::value_parser!(u16).range(1..),
        help = "Number of replicas joining the session"
    )]
    pub replicas: u16,

    #[arg(
        long = "min-delay-ms",
        env = "SCROLL_MIRROR_MIN_DELAY_MS",
        default_value_t = 50,
        help = "Minimum spacing between scroll commands from one replica"
    )]
    pub min_delay_ms: u64,

    #[command(flatten)]
    pub workload: WorkloadArgs,

    #[arg(
        long = "bus-capacity",
        env = "SCROLL_MIRROR_BUS_CAPACITY",
        default_value_t = transport_bus::DEFAULT_CAPACITY,
        help = "Messages a slow replica may fall behind before it lags"
    )]
    pub bus_capacity: usize,

    #[command(flatten)]
    pub logging: LoggingArgs,
}

#[derive(Args, Debug, Clone)]
pub struct WorkloadArgs {
    #[arg(
        long,
        env = "SCROLL_MIRROR_GESTURES",
        default_value_t = 8,
        help = "Scroll gestures to simulate, each driven by a random replica"
    )]
    pub gestures: usize,

    #[arg(
        long = "steps-per-gesture",
        env = "SCROLL_MIRROR_STEPS",
        default_value_t = 12,
        help = "Scroll events emitted during one gesture"
    )]
    pub steps: usize,

    #[arg(
        long = "step-interval-ms",
        env = "SCROLL_MIRROR_STEP_INTERVAL_MS",
        default_value_t = 8,
        help = "Time between scroll events within a gesture"
    )]
    pub step_interval_ms: u64,

    #[arg(
        long = "link-every",
        env = "SCROLL_MIRROR_LINK_EVERY",
        help = "Replace every Nth gesture with a shared navigation"
    )]
    pub link_every: Option<usize>,

    #[arg(
        long = "link-interrupts",
        env = "SCROLL_MIRROR_LINK_INTERRUPTS",
        help = "Activate links while the previous gesture is still being throttled"
    )]
    pub link_interrupts: bool,

    #[arg(
        long,
        env = "SCROLL_MIRROR_LOCATION",
        default_value = "https://example.org/",
        help = "Page every replica starts on"
    )]
    pub location: String,

    #[arg(long, env = "SCROLL_MIRROR_SEED", help = "Seed for the gesture generator")]
    pub seed: Option<u64>,
}

#[derive(Args, Debug, Clone)]
pub struct LoggingArgs {
    #[arg(
        long = "log-level",
        value_enum,
        env = "SCROLL_MIRROR_LOG_LEVEL",
        default_value_t = LogLevel::Info,
        help = "Minimum log level (error, warn, info, debug, trace)"
    )]
    pub level: LogLevel,

    #[arg(
        long = "log-file",
        value_name = "PATH",
        env = "SCROLL_MIRROR_LOG_FILE",
        help = "Write structured logs to the specified file"
    )]
    pub file: Option<PathBuf>,
}

impl LoggingArgs {
    pub fn to_config(&self) -> LogConfig {
        LogConfig {
            level: self.level,
            file: self.file.clone(),
        }
    }
}

impl Cli {
    pub fn simulation_config(&self, name: &str) -> SimulationConfig {
        SimulationConfig {
            session: session_name(SESSION_PREFIX, name),
            replicas: usize::from(self.replicas),
            gestures: self.workload.gestures,
            steps_per_gesture: self.workload.steps,
            step_interval: Duration::from_millis(self.workload.step_interval_ms),
            link_every: self.workload.link_every.filter(|every| *every > 0),
            link_interrupts: self.workload.link_interrupts,
            location: self.workload.location.clone(),
            seed: self.workload.seed.unwrap_or_else(rand::random),
            bus_capacity: self.bus_capacity,
            sync: SyncConfig::with_min_delay(Duration::from_millis(self.min_delay_ms)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_describe_a_small_session() {
        let cli = Cli::try_parse_from(["scroll-mirror", "--name", "demo", "--seed", "7"])
            .expect("parse");
        let config = cli.simulation_config(cli.name.as_deref().unwrap());

        assert_eq!(config.session, "viewport-sync-demo");
        assert_eq!(config.replicas, 3);
        assert_eq!(config.sync.min_delay, Duration::from_millis(50));
        assert_eq!(config.seed, 7);
        assert_eq!(config.link_every, None);
        assert!(!config.link_interrupts);
        assert_eq!(cli.logging.level, LogLevel::Info);
    }

    #[test]
    fn zero_replicas_is_rejected() {
        assert!(Cli::try_parse_from(["scroll-mirror", "--replicas", "0"]).is_err());
    }

    #[test]
    fn link_every_zero_disables_navigation() {
        let cli = Cli::try_parse_from(["scroll-mirror", "--link-every", "0"]).expect("parse");
        assert_eq!(cli.simulation_config("x").link_every, None);
    }
}
