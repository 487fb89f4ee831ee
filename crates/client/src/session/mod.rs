// SPDX-License-Identifier: BUSL-1.1
// Copyright (c) 2026 Alfred Jean LLC

//! Session management: the connect / maintain / recover loop.

pub mod connect;
pub mod run;
pub mod step;

pub use run::{establish, maintain, run, teardown, Established, EstablishError, MaintainExit};
