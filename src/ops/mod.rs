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

//! Operations spanning several partitions
//!
//! Each operation inspects partition metadata while it is built and adds the
//! tasks that move rows to the graph of the table it returns.

pub mod align;
pub mod concat;
pub mod hash_join;
pub mod join;
pub mod sort;

pub use align::{align, align_many, align_pair, align_to_key_sets, self_align_key_sets, Aligned, KeySet};
pub use concat::concat;
pub use hash_join::hash_join;
pub use join::{join, merge, pair_partitions, PartitionPair};
pub use sort::{batcher_network, sort_values, sort_values_binned};
