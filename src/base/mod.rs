// This file is part of SENSA.
//
// Copyright (C) 2023 Affidaty Spa.
//
// SENSA is free software: you can redistribute it and/or modify it under
// the terms of the GNU Affero General Public License as published by the
// Free Software Foundation, either version 3 of the License, or (at your
// option) any later version.
//
// SENSA is distributed in the hope that it will be useful, but WITHOUT
// ANY WARRANTY; without even the implied warranty of MERCHANTABILITY or
// FITNESS FOR A PARTICULAR PURPOSE. See the GNU Affero General Public License
// for more details.
//
// You should have received a copy of the GNU Affero General Public License
// along with SENSA. If not, see <https://www.gnu.org/licenses/>.

//! Core data structures and serialization facilities.

pub mod schema;
pub mod serialize;

pub use schema::{ArchivedBlock, Block, SensorRecord, SignedSensorRecord};

/// Project-wide mutex flavor.
pub type Mutex<T> = parking_lot::Mutex<T>;

/// Project-wide read-write lock flavor.
pub type RwLock<T> = parking_lot::RwLock<T>;
