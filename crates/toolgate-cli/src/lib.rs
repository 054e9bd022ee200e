//! Command-line front end for `toolgate`.
//!
//! The `toolgate` binary wires the library into a command-line tool: list
//! the tool catalog, run tool calls inside a turn, manage credit balances,
//! and sweep expired reservations. Results go to stdout as JSON; logs go to
//! stderr.
//!
//! ```sh
//! toolgate --db credits.db allocate --workspace ws-1 --user u-1 100
//! toolgate --db credits.db call create_task --workspace ws-1 --user u-1 \
//!     --capability manage_tasks --args '{"title": "Ship it"}'
//! toolgate --db credits.db sweep
//! ```

pub mod config;

pub use config::CliConfig;
