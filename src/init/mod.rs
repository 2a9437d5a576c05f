// SPDX-License-Identifier: Apache-2.0

//! Command line arguments for the `filelog` binary.

pub mod args;
