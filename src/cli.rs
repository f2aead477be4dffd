use clap::{Args as ClapArgs, Parser, Subcommand};
use std::net::SocketAddr;
use std::path::PathBuf;

#[derive(Parser)]
#[command(name = "pmkforge")]
#[command(version)]
#[command(about = "WPA/WPA2-PSK PMK precomputation and handshake verification", long_about = None)]
pub struct Args {
    /// JSON configuration file
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Storage directory (overrides config and PMKFORGE_STORAGE)
    #[arg(short = 'u', long, global = true, value_name = "DIR")]
    pub storage: Option<PathBuf>,

    /// Number of CPU threads to use (default: CPU count)
    #[arg(short, long, global = true)]
    pub threads: Option<usize>,

    /// Additional delegate worker (repeatable)
    #[arg(long = "delegate", global = true, value_name = "ADDR")]
    pub delegates: Vec<SocketAddr>,

    /// Do not probe for a GPU
    #[arg(long, global = true)]
    pub no_gpu: bool,

    /// Print machine-readable JSON instead of text where supported
    #[arg(long, global = true)]
    pub json: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Create a new ESSID in storage
    CreateEssid {
        #[arg(value_name = "ESSID")]
        essid: String,
    },

    /// Delete an ESSID and every result stored for it
    ///
    /// Password shards are kept. Requires --yes.
    DeleteEssid {
        #[arg(value_name = "ESSID")]
        essid: String,

        /// Confirm the deletion
        #[arg(long)]
        yes: bool,
    },

    /// List ESSIDs with their stored result counts
    ListEssids,

    /// Import password candidates, one per line
    ///
    /// Lines shorter than 8 or longer than 63 bytes are rejected.
    ImportPasswords {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Export every stored password, one per line
    ExportPasswords {
        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Export the PMKs of one ESSID as a cowpatty hash file
    ExportCowpatty {
        #[arg(long)]
        essid: String,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Export stored PMKs into an airolib-ng database
    ExportHashdb {
        /// Only this ESSID (default: all)
        #[arg(long)]
        essid: Option<String>,

        #[arg(value_name = "FILE")]
        file: PathBuf,
    },

    /// Show access points, stations and handshake state of a capture
    Analyze {
        #[arg(value_name = "CAPTURE")]
        capture: PathBuf,
    },

    /// Write a minimal capture holding only completed handshakes
    Strip {
        #[arg(value_name = "CAPTURE")]
        capture: PathBuf,

        #[arg(short, long, value_name = "FILE")]
        output: PathBuf,
    },

    /// Compute PMKs on the fly and test them against a handshake
    ///
    /// Nothing is written to storage.
    ///
    /// Example: pmkforge attack-passthrough capture.cap --wordlist rockyou.txt
    AttackPassthrough {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        source: Source,
    },

    /// Test the PMKs already stored for the handshake's ESSID
    AttackDb {
        #[command(flatten)]
        target: Target,
    },

    /// Stored PMKs first, then compute, store and test the missing ones
    AttackBatch {
        #[command(flatten)]
        target: Target,

        #[command(flatten)]
        source: OptionalSource,
    },

    /// Compute and store PMKs for every stored password
    Batch {
        /// Only this ESSID (default: all)
        #[arg(long)]
        essid: Option<String>,

        #[command(flatten)]
        source: OptionalSource,
    },

    /// Recompute stored PMKs and report mismatches
    Verify {
        #[arg(long)]
        essid: String,

        /// Recompute every PMK instead of a random sample
        #[arg(long)]
        all: bool,
    },

    /// Report how much of the password store has PMKs per ESSID
    Eval {
        #[arg(long)]
        essid: Option<String>,
    },

    /// List compute backends and their measured speed
    ListCores,

    /// Check every backend against the known-answer vector
    Selftest,

    /// Measure the PMK rate of every backend
    Benchmark {
        /// Seconds per backend
        #[arg(long, default_value = "3")]
        seconds: u64,
    },

    /// Serve the local CPU backend to remote clients
    Serve {
        #[arg(long, default_value = "0.0.0.0:17935")]
        listen: SocketAddr,
    },
}

/// The handshake under attack.
#[derive(ClapArgs)]
pub struct Target {
    /// Capture (.cap/.pcap/.pcapng) or handshake (.json) file
    #[arg(value_name = "HANDSHAKE")]
    pub handshake: PathBuf,

    /// ESSID for APs the capture never names
    #[arg(long)]
    pub essid: Option<String>,

    /// BSSID to attack when the capture holds several
    #[arg(long)]
    pub bssid: Option<String>,
}

/// Where candidates come from.
#[derive(ClapArgs)]
#[group(required = true, multiple = false)]
pub struct Source {
    /// Wordlist file, one candidate per line
    #[arg(long, value_name = "FILE")]
    pub wordlist: Option<PathBuf>,

    /// Numeric candidates, e.g. 8-10 for every 8 to 10 digit string
    #[arg(long, value_name = "MIN-MAX")]
    pub numeric: Option<String>,
}

#[derive(ClapArgs)]
#[group(required = false, multiple = false)]
pub struct OptionalSource {
    /// Import this wordlist before running
    #[arg(long, value_name = "FILE")]
    pub wordlist: Option<PathBuf>,

    /// Import numeric candidates before running, e.g. 8-8
    #[arg(long, value_name = "MIN-MAX")]
    pub numeric: Option<String>,
}
