//! The command line options for the KeyServer client.

use std::path::PathBuf;
use std::time::Duration;

use log::LevelFilter;

use crate::commons::KeyServerEmptyResult;
use crate::config::{self, ConfigError};
use crate::constants::{
    DEFAULT_CA_KEY_FILE, DEFAULT_HOST, DEFAULT_KEY_BITS, DEFAULT_PORT,
};
use super::{generate_ca_key, KeyClient};


//------------ Options -------------------------------------------------------

/// The command line options for the KeyServer client.
#[derive(clap::Parser)]
#[command(
    version,
    about = "The KeyServer command line client.",
)]
pub struct Options {
    /// The level of log messages shown on stderr.
    #[arg(
        long, global = true, value_name = "LEVEL", default_value = "info"
    )]
    pub log_level: LevelFilter,

    #[command(subcommand)]
    pub command: Command,
}

impl Options {
    /// Creates the options from the process arguments.
    ///
    /// If the arguments won’t result in usable options, exits the process.
    pub fn from_args() -> Self {
        <Self as clap::Parser>::parse()
    }

    pub fn init_logging(&self) -> Result<(), ConfigError> {
        config::init_stderr_logging(self.log_level)
    }

    pub fn run(self) -> KeyServerEmptyResult {
        match self.command {
            Command::Request(cmd) => cmd.run(),
            Command::GenCaKey(cmd) => cmd.run(),
        }
    }
}


//------------ Command -------------------------------------------------------

#[derive(clap::Subcommand)]
pub enum Command {
    /// Request a private key and certificate for a name.
    Request(Request),

    /// Generate a new CA private key.
    GenCaKey(GenCaKey),
}


//------------ Request -------------------------------------------------------

#[derive(clap::Args)]
pub struct Request {
    /// The host of the KeyServer.
    #[arg(long, default_value = DEFAULT_HOST)]
    pub host: String,

    /// The port of the KeyServer.
    #[arg(short, long, default_value_t = DEFAULT_PORT)]
    pub port: u16,

    /// The name to request a key and certificate for.
    #[arg(short, long)]
    pub name: String,

    /// Seconds to wait after sending the request before reading.
    #[arg(long, value_name = "SECONDS")]
    pub delay: Option<u64>,

    /// Disconnect right after sending the request.
    #[arg(long)]
    pub crash: bool,

    /// Directory to write <NAME>.key and <NAME>.crt to.
    #[arg(short, long, value_name = "DIR", default_value = ".")]
    pub out: PathBuf,
}

impl Request {
    pub fn run(self) -> KeyServerEmptyResult {
        let client = KeyClient::new(self.host, self.port);
        if self.crash {
            return client.request_and_abort(&self.name)
        }
        let delay = self.delay.filter(|d| *d > 0).map(Duration::from_secs);
        let creds = client.request(&self.name, delay)?;
        let (key_file, cert_file) = creds.save(&self.out)?;
        println!(
            "Saved: {} and {}", key_file.display(), cert_file.display()
        );
        Ok(())
    }
}


//------------ GenCaKey ------------------------------------------------------

#[derive(clap::Args)]
pub struct GenCaKey {
    /// The file to write the key to.
    #[arg(short, long, value_name = "FILE", default_value = DEFAULT_CA_KEY_FILE)]
    pub out: PathBuf,

    /// The size of the RSA key in bits.
    #[arg(short, long, default_value_t = DEFAULT_KEY_BITS)]
    pub bits: u32,
}

impl GenCaKey {
    pub fn run(self) -> KeyServerEmptyResult {
        generate_ca_key(&self.out, self.bits)?;
        println!("CA private key written to {}", self.out.display());
        Ok(())
    }
}


//------------ Tests ---------------------------------------------------------

#[cfg(test)]
mod tests {
    use clap::Parser;

    use super::*;

    #[test]
    fn should_parse_request() {
        let options = Options::try_parse_from([
            "keyserverc", "request", "--name", "alice", "--port", "9100",
            "--delay", "2", "--out", "/tmp/keys",
        ]).unwrap();
        match options.command {
            Command::Request(req) => {
                assert_eq!(req.host, "127.0.0.1");
                assert_eq!(req.port, 9100);
                assert_eq!(req.name, "alice");
                assert_eq!(req.delay, Some(2));
                assert!(!req.crash);
                assert_eq!(req.out, PathBuf::from("/tmp/keys"));
            }
            _ => panic!("expected request"),
        }
        assert_eq!(options.log_level, LevelFilter::Info);
    }

    #[test]
    fn should_parse_log_level_after_subcommand() {
        let options = Options::try_parse_from([
            "keyserverc", "request", "--name", "bob", "--log-level", "warn",
        ]).unwrap();
        assert_eq!(options.log_level, LevelFilter::Warn);
        assert!(Options::try_parse_from([
            "keyserverc", "--log-level", "loud", "gen-ca-key",
        ]).is_err());
    }

    #[test]
    fn name_is_required() {
        assert!(Options::try_parse_from(["keyserverc", "request"]).is_err());
    }

    #[test]
    fn should_parse_gen_ca_key_defaults() {
        let options = Options::try_parse_from([
            "keyserverc", "gen-ca-key"
        ]).unwrap();
        match options.command {
            Command::GenCaKey(cmd) => {
                assert_eq!(cmd.out, PathBuf::from("ca.key"));
                assert_eq!(cmd.bits, 8192);
            }
            _ => panic!("expected gen-ca-key"),
        }
    }
}
