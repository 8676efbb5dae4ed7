//! Durable Snapshot Store
//!
//! Crash-safe persistence of consensus log snapshots. Each snapshot lives
//! in its own directory named `<term>-<index>-<creationMillis>`:
//!
//! ```text
//! <base>/snapshots/<term>-<index>-<millis>[.tmp]/meta.json
//! <base>/snapshots/<term>-<index>-<millis>[.tmp]/state.bin
//! ```
//!
//! A snapshot is written under a `.tmp` directory and becomes visible only
//! when that directory is renamed to its permanent name, so readers never
//! observe a half-written snapshot. The state file carries a CRC-64 checksum
//! that is verified on every open.

mod meta;
mod sink;
mod store;

pub use meta::SnapshotDescriptor;
pub use sink::{SnapshotReader, SnapshotSink};
pub use store::FileSnapshotStore;

use crc::{Crc, CRC_64_XZ};

/// Directory under the base path holding all snapshots
pub const SNAPSHOT_DIR: &str = "snapshots";

/// Metadata file name inside a snapshot directory
pub const META_FILE: &str = "meta.json";

/// State file name inside a snapshot directory
pub const STATE_FILE: &str = "state.bin";

/// Suffix marking an incomplete snapshot directory
pub const TMP_SUFFIX: &str = ".tmp";

/// File touched by the start-up permission test
const PERMISSION_TEST_FILE: &str = "permTest";

/// CRC-64 with the ECMA-182 polynomial, reflected (CRC-64/XZ)
pub static CRC64: Crc<u64> = Crc::<u64>::new(&CRC_64_XZ);
