//! Human input for workflows that wait on a person.
//!
//! Input handlers collect answers (from the console or a script) and the
//! review loop turns them into decision signals for a running instance.

mod handler;
mod review_loop;
mod types;

pub use handler::{ConsoleInputHandler, ScriptedInputHandler};
pub use review_loop::{research_result_line, run_review_loop};
pub use types::{HumanInputHandler, HumanInputRequest, HumanInputResponse, ReviewChoice};
