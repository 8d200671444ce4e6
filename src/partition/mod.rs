// Licensed under the Apache License, Version 2.0 (the "License");
// you may not use this file except in compliance with the License.
// You may obtain a copy of the License at
//
// http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing, software
// distributed under the License is distributed on an "AS IS" BASIS,
// WITHOUT WARRANTIES OR CONDITIONS OF ANY KIND, either express or implied.
// See the License for the specific language governing permissions and
// limitations under the License.

//! Partition metadata and partitioning
//!
//! [`Divisions`] record the index boundaries of a table's partitions.
//! [`hash_partition`] splits a frame into buckets by hashing key columns.

pub mod divisions;
pub mod hash_partition;

pub use divisions::Divisions;
pub use hash_partition::hash_partition;
