// SPDX-License-Identifier: Apache-2.0

//! File discovery, identity and reading.

mod finder;
mod fingerprint;
mod reader;

pub use finder::FileFinder;
pub use fingerprint::Fingerprint;
pub use reader::{FileReader, OpenFileGauge, OpenFileGuard, ReadStats, ReaderContext};
