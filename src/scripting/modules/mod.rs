//! Host modules installed into the script runtime
//!
//! - **flow**: workflow inputs, context and result values (session bound)
//! - **console**: timestamped logging into the captured output (session bound)
//! - **request**: blocking HTTP helpers with normalized JSON responses
//! - **fs**: sandboxed JSON and CSV file access
//! - **num**: lenient number parsing and thousands formatting
//! - **system**: random delays and timestamps

pub mod flow;
pub mod console;
pub mod request;
pub mod fs;
pub mod num;
pub mod system;
