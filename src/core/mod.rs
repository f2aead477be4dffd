/*!
 * pmkforge: WPA/WPA2-PSK PMK precomputation and handshake verification
 *
 * Password candidates are deduplicated into a sharded store, turned into
 * pairwise master keys by whatever compute backends are available, and
 * tested against four-way handshakes extracted from capture files.
 */

// Core library modules
pub mod attack;
pub mod backend;
pub mod capture;
pub mod config;
pub mod crypto;
pub mod dispatch;
pub mod error;
pub mod export;
pub mod handshake;
pub mod model;
pub mod shard;
pub mod source;
pub mod storage;

// Re-exports
pub use attack::{eval_results, AttackEngine, AttackOptions, AttackOutcome, VerifyScope};
pub use capture::{analyze, parse, strip_capture, Capture, CaptureParser, HandshakeState};
pub use config::{Config, DispatchConfig};
pub use crypto::{derive_mic, derive_pmk, derive_ptk, verify_password, verify_pmk};
pub use dispatch::{Dispatcher, StopToken, WorkUnit};
pub use error::{Error, Result};
pub use handshake::Handshake;
pub use model::{Essid, MacAddr, Password, Pmk};
pub use storage::StorageEngine;
