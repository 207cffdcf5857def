// Library root
// -----------
// This crate exposes the client library behind the `mft-cli` binary.
// The binary (`main.rs`) loads configuration, builds a client and hands it
// to the interactive menu.
//
// Module responsibilities:
// - `api`: HTTP interactions with the file transfer server (sessions,
//   uploads, downloads, listing and the other remote operations).
// - `config`: environment descriptors and config file loading.
// - `logging`: tracing subscriber setup for the binary.
// - `ui`: terminal flows that call into `api` and render the results.
pub mod api;
pub mod config;
pub mod logging;
pub mod ui;

pub use api::{Failure, MftClient, OperationResult, Payload, Success};
pub use config::{Environment, Mode};
