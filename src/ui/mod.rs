//! Terminal output for the command line tools
//!
//! Styled markers when attached to a terminal, bracketed plain markers
//! (`[OK]`, `[WARN]`, `[FAIL]`) when piped or running under CI.

mod context;
mod output;

pub use context::UiContext;
pub use output::{
    key_value, remark, section, step_error_detail, step_ok, step_ok_detail, step_warn_hint,
};
