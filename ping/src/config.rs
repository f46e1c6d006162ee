use std::net::IpAddr;
use std::time::Duration;

use anyhow::{bail, Context};
use clap_derive::Parser;
use transport::{FecConfig, TransportConfig};

use crate::message::PingMessage;
use crate::role::Role;

#[derive(Clone, Debug)]
pub struct PingConfig {
    pub role: Role,

    /// messages per second
    pub frequency: f64,

    pub payload_size: usize,

    /// stop after this time if set, otherwise run until interrupted
    pub duration: Option<Duration>,

    pub report_interval: Duration,

    /// loss reports for the same session within this window are logged as a single event
    pub loss_window: Duration,

    /// maximum number of messages taken from the transport per non-blocking read
    pub batch_size: usize,
}

impl PingConfig {
    pub const DEFAULT_FREQUENCY: f64 = 1.0;
    pub const DEFAULT_PAYLOAD_SIZE: usize = 1000;

    pub fn new(role: Role) -> PingConfig {
        PingConfig {
            role,
            frequency: Self::DEFAULT_FREQUENCY,
            payload_size: Self::DEFAULT_PAYLOAD_SIZE,
            duration: None,
            report_interval: Duration::from_secs(2),
            loss_window: Duration::from_secs(1),
            batch_size: 20,
        }
    }

    /// saturates for frequencies that [PingConfig::validate] rejects as too low
    pub fn send_interval(&self) -> Duration {
        Duration::try_from_secs_f64(1.0 / self.frequency)
            .unwrap_or(Duration::MAX)
    }

    /// the encoded size of every message this configuration sends
    pub fn message_len(&self) -> usize {
        PingMessage::encoded_len(self.payload_size)
    }

    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.frequency.is_finite() || self.frequency <= 0.0 {
            bail!("message frequency must be positive, was {}", self.frequency);
        }
        match Duration::try_from_secs_f64(1.0 / self.frequency) {
            Err(_) => bail!("message frequency {} is too low", self.frequency),
            Ok(interval) if interval.is_zero() => bail!("message frequency {} is too high", self.frequency),
            Ok(_) => {}
        }
        if self.report_interval.is_zero() {
            bail!("report interval must be positive");
        }
        if self.batch_size == 0 {
            bail!("receive batch size must be positive");
        }
        Ok(())
    }
}

/// Command line of the `mcping` binary
#[derive(Parser, Debug)]
#[clap(name = "mcping", version, about = "Measures latency and throughput over a multicast transport")]
pub struct Args {
    /// multicast group or unicast address to send to
    #[clap(short = 'n', long, default_value_t = TransportConfig::DEFAULT_TARGET)]
    pub network: IpAddr,

    /// data-destination port
    #[clap(short = 's', long, default_value_t = TransportConfig::DEFAULT_PORT)]
    pub port: u16,

    /// UDP port for the traffic, defaults to the data-destination port
    #[clap(short = 'p', long)]
    pub udp_encap_port: Option<u16>,

    /// run time in seconds, runs until interrupted if omitted
    #[clap(short = 'd', long)]
    pub duration: Option<f64>,

    /// messages per second
    #[clap(short = 'm', long, default_value_t = PingConfig::DEFAULT_FREQUENCY)]
    pub frequency: f64,

    /// send only
    #[clap(short = 'o', long, default_value_t = false, conflicts_with_all = ["listen_only", "reflector"])]
    pub send_only: bool,

    /// receive only
    #[clap(short = 'l', long, default_value_t = false, conflicts_with = "reflector")]
    pub listen_only: bool,

    /// echo every received message
    #[clap(short = 'e', long, default_value_t = false)]
    pub reflector: bool,

    /// maximum outbound rate in bytes per second
    #[clap(short = 'r', long, default_value_t = 16_000_000)]
    pub rate: u64,

    /// enable proactive forward error correction
    #[clap(short = 'f', long, default_value_t = false)]
    pub fec: bool,

    /// FEC data packets per coding group
    #[clap(short = 'k', default_value_t = FecConfig::DEFAULT_K)]
    pub k: usize,

    /// FEC coding group size including parity
    #[clap(short = 'g', default_value_t = FecConfig::DEFAULT_N)]
    pub n: usize,

    /// parity packets sent after every coding group, defaults to min(4, n-k)
    #[clap(long)]
    pub proactive_parity: Option<usize>,

    /// payload bytes per message
    #[clap(long, default_value_t = PingConfig::DEFAULT_PAYLOAD_SIZE)]
    pub payload_size: usize,

    #[clap(short, long, default_value_t = false)]
    pub verbose: bool,

    #[clap(long, default_value_t = false)]
    pub very_verbose: bool,
}

impl Args {
    pub fn role(&self) -> Role {
        match (self.send_only, self.listen_only, self.reflector) {
            (true, _, _) => Role::Source,
            (_, true, _) => Role::Receiver,
            (_, _, true) => Role::Reflector,
            _ => Role::Initiator,
        }
    }

    /// builds and validates the configurations for the harness and the transport
    pub fn to_configs(&self) -> anyhow::Result<(PingConfig, TransportConfig)> {
        let mut ping_config = PingConfig::new(self.role());
        ping_config.frequency = self.frequency;
        ping_config.payload_size = self.payload_size;
        ping_config.duration = match self.duration {
            Some(secs) if !secs.is_finite() || secs <= 0.0 => bail!("duration must be positive, was {}", secs),
            Some(secs) => Some(Duration::try_from_secs_f64(secs)
                .with_context(|| format!("duration {} is out of range", secs))?),
            None => None,
        };
        ping_config.validate()?;

        let mut transport_config = TransportConfig::new(self.network, self.port);
        transport_config.udp_encap_port = self.udp_encap_port;
        transport_config.max_rate = self.rate;
        if self.fec {
            let mut fec_config = FecConfig::new(self.n, self.k);
            if let Some(proactive_parity) = self.proactive_parity {
                fec_config.proactive_parity = proactive_parity;
            }
            transport_config.fec = Some(fec_config);
        }
        transport_config.validate()?;

        if ping_config.message_len() > transport_config.max_message_len() {
            bail!("payload size {} exceeds the maximum of {} for a single packet",
                ping_config.payload_size, transport_config.max_message_len().saturating_sub(PingMessage::encoded_len(0)));
        }

        Ok((ping_config, transport_config))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use rstest::rstest;

    fn parse(args: &[&str]) -> Result<Args, clap::Error> {
        Args::try_parse_from(std::iter::once("mcping").chain(args.iter().copied()))
    }

    #[test]
    fn test_defaults() {
        let (ping_config, transport_config) = parse(&[]).unwrap().to_configs().unwrap();

        assert_eq!(ping_config.role, Role::Initiator);
        assert_eq!(ping_config.frequency, 1.0);
        assert_eq!(ping_config.send_interval(), Duration::from_secs(1));
        assert_eq!(ping_config.payload_size, 1000);
        assert_eq!(ping_config.duration, None);
        assert_eq!(ping_config.report_interval, Duration::from_secs(2));
        assert_eq!(ping_config.loss_window, Duration::from_secs(1));
        assert_eq!(ping_config.batch_size, 20);

        assert_eq!(transport_config.target, TransportConfig::DEFAULT_TARGET);
        assert_eq!(transport_config.port, 7500);
        assert_eq!(transport_config.udp_encap_port, None);
        assert_eq!(transport_config.max_rate, 16_000_000);
        assert_eq!(transport_config.fec, None);
    }

    #[rstest]
    #[case::initiator(&[], Role::Initiator)]
    #[case::source(&["-o"], Role::Source)]
    #[case::receiver(&["-l"], Role::Receiver)]
    #[case::reflector(&["-e"], Role::Reflector)]
    #[case::long_reflector(&["--reflector"], Role::Reflector)]
    fn test_role(#[case] args: &[&str], #[case] expected: Role) {
        assert_eq!(parse(args).unwrap().role(), expected);
    }

    #[test]
    fn test_full_command_line() {
        let args = parse(&["-n", "127.0.0.1", "-s", "8000", "-p", "9000", "-d", "2.5", "-m", "10", "-r", "1000000", "-f", "-k", "8", "-g", "12", "--payload-size", "100", "-v"]).unwrap();
        assert!(args.verbose);
        assert!(!args.very_verbose);

        let (ping_config, transport_config) = args.to_configs().unwrap();
        assert_eq!(ping_config.duration, Some(Duration::from_millis(2500)));
        assert_eq!(ping_config.send_interval(), Duration::from_millis(100));
        assert_eq!(ping_config.payload_size, 100);
        assert_eq!(transport_config.target, "127.0.0.1".parse::<IpAddr>().unwrap());
        assert_eq!(transport_config.port, 8000);
        assert_eq!(transport_config.udp_port(), 9000);
        assert_eq!(transport_config.max_rate, 1_000_000);
        assert_eq!(transport_config.fec, Some(FecConfig { n: 12, k: 8, proactive_parity: 4 }));
    }

    #[rstest]
    #[case::conflicting_roles(&["-o", "-l"])]
    #[case::conflicting_reflector(&["-l", "-e"])]
    #[case::invalid_address(&["-n", "not-an-address"])]
    #[case::invalid_port(&["-s", "70000"])]
    #[case::unknown_flag(&["--frobnicate"])]
    fn test_usage_errors(#[case] args: &[&str]) {
        assert!(parse(args).is_err());
    }

    #[rstest]
    #[case::zero_frequency(&["-m", "0"])]
    #[case::zero_duration(&["-d", "0"])]
    #[case::frequency_too_low(&["-m", "1e-300"])]
    #[case::frequency_too_high(&["-m", "1e300"])]
    #[case::duration_out_of_range(&["-d", "1e300"])]
    #[case::k_greater_than_n(&["-f", "-k", "20", "-g", "10"])]
    #[case::n_too_big(&["-f", "-g", "256"])]
    #[case::too_much_proactive_parity(&["-f", "-k", "8", "-g", "10", "--proactive-parity", "3"])]
    #[case::payload_too_big(&["--payload-size", "1500"])]
    #[case::zero_rate(&["-r", "0"])]
    fn test_configuration_errors(#[case] args: &[&str]) {
        let args = parse(args).unwrap();
        assert!(args.to_configs().is_err());
    }

    #[test]
    fn test_help_is_not_a_usage_error() {
        let err = parse(&["--help"]).unwrap_err();
        assert!(!err.use_stderr());
    }
}
