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

//! Logging utilities
//!
//! partframe logs through the `log` facade: graph construction summaries at
//! `debug`, task evaluation at `trace`, degenerate inputs at `warn` and
//! ingestion plans at `info`. These helpers install `env_logger`.

/// Initialize logging from `RUST_LOG`
///
/// Does nothing if a logger is already installed.
pub fn init_logging() {
    let _ = env_logger::try_init();
}

/// Initialize logging with a specific level
pub fn init_logging_with_level(level: log::LevelFilter) {
    let _ = env_logger::Builder::from_default_env()
        .filter_level(level)
        .try_init();
}
